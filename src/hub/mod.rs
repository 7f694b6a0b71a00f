//! Fan-out of the engine's `booking_changed` channel to many watchers.
//!
//! One listener task owns the upstream `LISTEN` registration. Each change is
//! pushed into every subscriber's capacity-1 channel without blocking: a
//! subscriber that has not drained its previous signal simply keeps that one,
//! so bursts of changes collapse into a single "re-query now".

mod registry;

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::{BOOKING_CHANGED, Engine, EngineError, Listener};
use crate::observability::{
    HUB_NOTIFICATIONS_TOTAL, HUB_SIGNALS_COALESCED_TOTAL, HUB_SUBSCRIBERS,
    HUB_SUBSCRIPTIONS_PRUNED_TOTAL,
};

use registry::Registry;

/// Where change signals come from. The engine's `Listener` in production.
#[async_trait]
pub trait ChangeSource: Send + 'static {
    /// Wait for the next change. Must be cancel-safe: the listener loop
    /// races it against shutdown.
    async fn next_change(&mut self) -> Result<(), EngineError>;
}

#[async_trait]
impl ChangeSource for Listener {
    async fn next_change(&mut self) -> Result<(), EngineError> {
        self.wait_for_notification().await.map(|_| ())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubError {
    /// The upstream channel failed or was closed.
    Upstream(EngineError),
    /// `shutdown` was called or the hub was dropped.
    Cancelled,
    ListenerPanicked(String),
}

impl std::fmt::Display for HubError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HubError::Upstream(e) => write!(f, "notification listener failed: {e}"),
            HubError::Cancelled => write!(f, "notification hub cancelled"),
            HubError::ListenerPanicked(e) => write!(f, "notification listener panicked: {e}"),
        }
    }
}

impl std::error::Error for HubError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HubError::Upstream(e) => Some(e),
            _ => None,
        }
    }
}

pub struct NotificationHub {
    registry: Arc<Registry>,
    shutdown: CancellationToken,
    listener: tokio::sync::Mutex<Option<JoinHandle<HubError>>>,
}

impl NotificationHub {
    /// `LISTEN booking_changed` on `engine` and start fanning out.
    pub fn listen(engine: &Engine) -> Result<Self, EngineError> {
        let listener = engine.listen(BOOKING_CHANGED)?;
        info!(channel = BOOKING_CHANGED, "notification hub listening");
        Ok(Self::spawn(listener))
    }

    /// Start the listener task over an arbitrary source.
    pub fn spawn<S: ChangeSource>(source: S) -> Self {
        let registry = Arc::new(Registry::default());
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(listen_loop(source, registry.clone(), shutdown.clone()));
        Self {
            registry,
            shutdown,
            listener: tokio::sync::Mutex::new(Some(handle)),
        }
    }

    /// Register a subscriber. The subscription closes when `signal` fires,
    /// when the returned handle is cancelled, or when the hub terminates.
    /// Subscribing to a terminated hub yields an already-closed subscription.
    pub fn subscribe(&self, signal: CancellationToken) -> (Subscription, CancelHandle) {
        let Some((id, rx, done)) = self.registry.register() else {
            debug!("subscribe after hub terminated");
            let (_, rx) = mpsc::channel(1);
            return (
                Subscription { rx },
                CancelHandle {
                    registry: self.registry.clone(),
                    id: None,
                },
            );
        };
        metrics::gauge!(HUB_SUBSCRIBERS).increment(1.0);

        let registry = self.registry.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = signal.cancelled() => {
                    if registry.remove(id) {
                        debug!(subscription = id, "subscription cancelled by signal");
                    }
                }
                _ = done.cancelled() => {}
            }
            metrics::gauge!(HUB_SUBSCRIBERS).decrement(1.0);
        });

        (
            Subscription { rx },
            CancelHandle {
                registry: self.registry.clone(),
                id: Some(id),
            },
        )
    }

    /// Stop the listener. Subscriptions close; `wait` returns `Cancelled`.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait for the listener to exit. The first caller gets the terminal
    /// error; later callers get `Ok(())`. Dropping this future early leaves
    /// the outcome for the next caller.
    pub async fn wait(&self) -> Result<(), HubError> {
        let mut slot = self.listener.lock().await;
        let Some(handle) = slot.as_mut() else {
            return Ok(());
        };
        let outcome = handle.await;
        *slot = None;
        match outcome {
            Ok(err) => Err(err),
            Err(e) => Err(HubError::ListenerPanicked(e.to_string())),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }

    pub fn is_terminated(&self) -> bool {
        self.registry.is_closed()
    }
}

impl Drop for NotificationHub {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn listen_loop<S: ChangeSource>(
    mut source: S,
    registry: Arc<Registry>,
    shutdown: CancellationToken,
) -> HubError {
    let terminal = loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break HubError::Cancelled,
            change = source.next_change() => match change {
                Ok(()) => {
                    let fan = registry.broadcast();
                    metrics::counter!(HUB_NOTIFICATIONS_TOTAL).increment(1);
                    metrics::counter!(HUB_SIGNALS_COALESCED_TOTAL).increment(fan.coalesced as u64);
                    metrics::counter!(HUB_SUBSCRIPTIONS_PRUNED_TOTAL).increment(fan.pruned as u64);
                    debug!(
                        delivered = fan.delivered,
                        coalesced = fan.coalesced,
                        pruned = fan.pruned,
                        "change fanned out"
                    );
                }
                Err(e) => break HubError::Upstream(e),
            },
        }
    };

    let closed = registry.close_all();
    match &terminal {
        HubError::Cancelled => info!(closed, "notification hub stopped"),
        e => warn!(closed, "notification hub terminated: {e}"),
    }
    terminal
}

/// Receiving side of one subscription. Yields `()` per (coalesced) change and
/// ends once the subscription is closed.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::Receiver<()>,
}

impl Subscription {
    /// Next signal, or `None` once closed.
    pub async fn recv(&mut self) -> Option<()> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Result<(), TryRecvError> {
        self.rx.try_recv()
    }
}

impl Stream for Subscription {
    type Item = ();

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<()>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

/// Closes its subscription. Cancelling more than once is harmless.
#[derive(Clone)]
pub struct CancelHandle {
    registry: Arc<Registry>,
    id: Option<u64>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let Some(id) = self.id else { return };
        if self.registry.remove(id) {
            debug!(subscription = id, "subscription cancelled");
        }
    }
}
