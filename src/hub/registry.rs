use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

struct Entry {
    tx: mpsc::Sender<()>,
    /// Cancelled when the subscription closes, releasing its watcher task.
    done: CancellationToken,
}

#[derive(Default)]
struct Inner {
    subs: HashMap<u64, Entry>,
    next_id: u64,
    closed: bool,
}

/// Outcome of one fan-out pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FanOut {
    pub delivered: usize,
    /// Subscriber already had a signal pending; this one merged into it.
    pub coalesced: usize,
    /// Receiver was gone; the subscription was closed and removed.
    pub pruned: usize,
}

/// Subscriber table. Every critical section is short and never awaits.
///
/// A subscription is closed by removing its entry: that drops the only
/// sender (the receiver drains, then sees `None`) and cancels `done`. Removal
/// from the map happens at most once, so closing happens at most once.
#[derive(Default)]
pub(crate) struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a capacity-1 subscription. `None` once the registry is closed.
    pub fn register(&self) -> Option<(u64, mpsc::Receiver<()>, CancellationToken)> {
        let mut inner = self.lock();
        if inner.closed {
            return None;
        }
        let (tx, rx) = mpsc::channel(1);
        let done = CancellationToken::new();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subs.insert(
            id,
            Entry {
                tx,
                done: done.clone(),
            },
        );
        Some((id, rx, done))
    }

    /// Close one subscription. Returns false if it was already closed.
    pub fn remove(&self, id: u64) -> bool {
        let entry = self.lock().subs.remove(&id);
        match entry {
            Some(entry) => {
                entry.done.cancel();
                true
            }
            None => false,
        }
    }

    /// Non-blocking send to every subscriber.
    pub fn broadcast(&self) -> FanOut {
        let mut inner = self.lock();
        let mut fan = FanOut::default();
        inner.subs.retain(|_, entry| match entry.tx.try_send(()) {
            Ok(()) => {
                fan.delivered += 1;
                true
            }
            Err(TrySendError::Full(())) => {
                fan.coalesced += 1;
                true
            }
            Err(TrySendError::Closed(())) => {
                entry.done.cancel();
                fan.pruned += 1;
                false
            }
        });
        fan
    }

    /// Close every subscription and refuse new ones. Returns how many were open.
    pub fn close_all(&self) -> usize {
        let drained: Vec<Entry> = {
            let mut inner = self.lock();
            inner.closed = true;
            inner.subs.drain().map(|(_, entry)| entry).collect()
        };
        for entry in &drained {
            entry.done.cancel();
        }
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.lock().subs.len()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
