use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::limits::NOTIFY_CHANNEL_CAPACITY;

use super::EngineError;

/// A payload-less "something changed" signal on a named channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub channel: String,
}

/// LISTEN/NOTIFY channels, one broadcast sender per channel name.
pub struct ChannelRegistry {
    channels: DashMap<String, broadcast::Sender<Notification>>,
    closed: AtomicBool,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Register interest in a channel. Creates the channel if needed.
    pub fn listen(&self, channel: &str) -> Result<Listener, EngineError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }
        let rx = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(NOTIFY_CHANNEL_CAPACITY).0)
            .subscribe();
        // A close() racing with us may have cleared the map before our insert.
        if self.closed.load(Ordering::SeqCst) {
            self.channels.clear();
            return Err(EngineError::Closed);
        }
        Ok(Listener {
            channel: channel.to_string(),
            rx,
        })
    }

    /// Send a notification. Returns how many listeners it reached; no-op if nobody is listening.
    pub fn send(&self, channel: &str) -> usize {
        match self.channels.get(channel) {
            Some(sender) => sender
                .send(Notification {
                    channel: channel.to_string(),
                })
                .unwrap_or(0),
            None => 0,
        }
    }

    /// Drop every channel. Listeners observe `EngineError::Closed`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.channels.clear();
    }
}

/// One LISTEN registration.
pub struct Listener {
    channel: String,
    rx: broadcast::Receiver<Notification>,
}

impl Listener {
    /// Block until the next notification. Falling behind is reported as a
    /// single notification: the signal carries no payload, so nothing is lost.
    pub async fn wait_for_notification(&mut self) -> Result<Notification, EngineError> {
        match self.rx.recv().await {
            Ok(n) => Ok(n),
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(channel = %self.channel, skipped, "listener lagged, coalescing");
                Ok(Notification {
                    channel: self.channel.clone(),
                })
            }
            Err(RecvError::Closed) => Err(EngineError::Closed),
        }
    }
}
