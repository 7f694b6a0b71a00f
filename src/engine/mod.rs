//! Embedded single-node storage engine for bookings.
//!
//! The table lives in memory behind one `RwLock`; every committed transaction
//! is appended to a write-ahead log and fsynced before commit returns. Write
//! transactions hold the write guard from `begin` to commit/rollback, so
//! constraint checks and the writes they guard are serialized by the engine
//! itself. Successful mutating commits raise `NOTIFY booking_changed`.

mod constraint;
mod error;
mod notify;
mod queries;
mod table;
mod transaction;

pub use constraint::{BOOKING_OVERLAP, BOOKING_PKEY, BOOKING_RANGE_CHECK, BOOKING_TITLE_CHECK};
pub use error::EngineError;
pub use notify::{ChannelRegistry, Listener, Notification};
pub use queries::BookingScan;
pub use transaction::Transaction;

use table::BookingTable;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::limits::WAL_QUEUE_DEPTH;
use crate::model::{Commit, Mutation};
use crate::wal::Wal;

/// Channel notified after every commit that changed at least one booking row.
pub const BOOKING_CHANGED: &str = "booking_changed";

// ── WAL writer task ──────────────────────────────────────

pub(crate) enum WalCommand {
    Append {
        commit: Commit,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        snapshot: Commit,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL. Exits once every sender is gone.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { commit, response } => {
                let flush_start = std::time::Instant::now();
                let result = wal
                    .append_buffered(&commit)
                    .and_then(|()| wal.flush_sync());
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                if let Err(e) = &result {
                    warn!(path = %wal.path().display(), "WAL append failed: {e}");
                }
                let _ = response.send(result);
            }
            WalCommand::Compact { snapshot, response } => {
                let result = wal.compact(&snapshot);
                match &result {
                    Ok(()) => info!(
                        path = %wal.path().display(),
                        rows = snapshot.mutations.len(),
                        "WAL compacted"
                    ),
                    Err(e) => warn!(path = %wal.path().display(), "WAL compaction failed: {e}"),
                }
                let _ = response.send(result);
            }
            WalCommand::AppendsSinceCompact { response } => {
                let _ = response.send(wal.appends_since_compact());
            }
        }
    }
    debug!(path = %wal.path().display(), "WAL writer stopped");
}

/// Hand a commit to the writer task and wait until it is durable.
pub(crate) async fn wal_append(
    wal_tx: &mpsc::Sender<WalCommand>,
    commit: Commit,
) -> Result<(), EngineError> {
    let (tx, rx) = oneshot::channel();
    wal_tx
        .send(WalCommand::Append {
            commit,
            response: tx,
        })
        .await
        .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
    rx.await
        .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
        .map_err(|e| EngineError::WalError(e.to_string()))
}

pub struct Engine {
    table: Arc<RwLock<BookingTable>>,
    wal_tx: mpsc::Sender<WalCommand>,
    channels: Arc<ChannelRegistry>,
    closed: AtomicBool,
}

impl Engine {
    /// Open the engine on `wal_path`, replaying whatever was committed before.
    /// Must be called inside a Tokio runtime: the WAL writer is spawned here.
    pub fn open(wal_path: impl Into<PathBuf>) -> io::Result<Self> {
        let wal_path = wal_path.into();
        let commits = Wal::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;

        let mut table = BookingTable::default();
        for commit in &commits {
            for mutation in &commit.mutations {
                match mutation {
                    Mutation::Insert(row) => table.insert(row.clone()),
                    Mutation::Delete(id) => {
                        table.remove(id);
                    }
                }
            }
        }
        info!(
            path = %wal_path.display(),
            commits = commits.len(),
            rows = table.len(),
            "engine opened"
        );

        let (wal_tx, wal_rx) = mpsc::channel(WAL_QUEUE_DEPTH);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        Ok(Self {
            table: Arc::new(RwLock::new(table)),
            wal_tx,
            channels: Arc::new(ChannelRegistry::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub(crate) fn ensure_open(&self) -> Result<(), EngineError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Start a write transaction. Waits for any other writer to finish.
    pub async fn begin(&self) -> Result<Transaction, EngineError> {
        self.ensure_open()?;
        let guard = Arc::clone(&self.table).write_owned().await;
        self.ensure_open()?;
        Ok(Transaction::new(
            guard,
            self.wal_tx.clone(),
            Arc::clone(&self.channels),
        ))
    }

    /// `LISTEN channel`.
    pub fn listen(&self, channel: &str) -> Result<Listener, EngineError> {
        self.ensure_open()?;
        self.channels.listen(channel)
    }

    /// Refuse new work and disconnect every listener. Transactions already
    /// begun may still commit.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.channels.close();
            info!("engine closed");
        }
    }

    /// Rewrite the WAL as a single commit holding the live rows.
    ///
    /// Holds the read guard until the writer has swapped files, so no commit
    /// can land between the snapshot and the rewrite.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        self.ensure_open()?;
        let guard = self.table.read().await;
        let snapshot = Commit {
            mutations: guard.rows().iter().cloned().map(Mutation::Insert).collect(),
        };
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                snapshot,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()));
        drop(guard);
        result
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
