use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{OwnedRwLockWriteGuard, mpsc};
use tracing::{debug, warn};

use crate::id::BookingId;
use crate::model::{Booking, Commit, Mutation, NewBooking};

use super::constraint::check_insert;
use super::table::BookingTable;
use super::{BOOKING_CHANGED, ChannelRegistry, EngineError, WalCommand, wal_append};

enum Undo {
    Remove(BookingId),
    Restore(Booking),
}

/// A serialized write transaction.
///
/// Mutations are applied to the table immediately (readers are shut out by
/// the write guard) and recorded twice: as redo for the WAL and as undo for
/// rollback. Dropping a transaction without committing rolls it back.
pub struct Transaction {
    table: OwnedRwLockWriteGuard<BookingTable>,
    wal_tx: mpsc::Sender<WalCommand>,
    channels: Arc<ChannelRegistry>,
    redo: Vec<Mutation>,
    undo: Vec<Undo>,
    finished: bool,
}

impl Transaction {
    pub(super) fn new(
        table: OwnedRwLockWriteGuard<BookingTable>,
        wal_tx: mpsc::Sender<WalCommand>,
        channels: Arc<ChannelRegistry>,
    ) -> Self {
        Self {
            table,
            wal_tx,
            channels,
            redo: Vec::new(),
            undo: Vec::new(),
            finished: false,
        }
    }

    /// `INSERT INTO bookings ... RETURNING *`. The engine assigns `id` and `created_at`.
    pub fn insert_booking(&mut self, new: NewBooking) -> Result<Booking, EngineError> {
        let row = Booking {
            id: BookingId::generate(),
            title: new.title,
            scheduled_for: new.scheduled_for,
            ends_at: new.ends_at,
            created_at: Utc::now(),
        };
        check_insert(&self.table, &row)?;
        self.table.insert(row.clone());
        self.undo.push(Undo::Remove(row.id));
        self.redo.push(Mutation::Insert(row.clone()));
        Ok(row)
    }

    /// `DELETE FROM bookings WHERE id = $1`. Returns the affected row count.
    pub fn delete_booking(&mut self, id: &BookingId) -> u64 {
        match self.table.remove(id) {
            Some(row) => {
                self.undo.push(Undo::Restore(row));
                self.redo.push(Mutation::Delete(*id));
                1
            }
            None => 0,
        }
    }

    /// Reads see this transaction's own uncommitted writes.
    pub fn get_booking(&self, id: &BookingId) -> Option<&Booking> {
        self.table.get(id)
    }

    /// Make the transaction durable. Returns the number of rows changed.
    ///
    /// The WAL write runs on its own task, so a caller that stops waiting
    /// cannot leave memory and log disagreeing about the outcome.
    pub async fn commit(mut self) -> Result<usize, EngineError> {
        if self.redo.is_empty() {
            self.finished = true;
            return Ok(0);
        }
        tokio::spawn(self.persist())
            .await
            .map_err(|e| EngineError::WalError(format!("commit task failed: {e}")))?
    }

    async fn persist(mut self) -> Result<usize, EngineError> {
        let commit = Commit {
            mutations: std::mem::take(&mut self.redo),
        };
        let changed = commit.mutations.len();
        if let Err(e) = wal_append(&self.wal_tx, commit).await {
            warn!("commit failed, rolling back: {e}");
            self.undo_all();
            self.finished = true;
            return Err(e);
        }
        self.undo.clear();
        self.finished = true;

        // Release the write guard before waking listeners.
        let channels = Arc::clone(&self.channels);
        drop(self);
        let reached = channels.send(BOOKING_CHANGED);
        debug!(changed, listeners = reached, "commit");
        Ok(changed)
    }

    pub fn rollback(mut self) {
        self.undo_all();
        self.finished = true;
    }

    fn undo_all(&mut self) {
        while let Some(step) = self.undo.pop() {
            match step {
                Undo::Remove(id) => {
                    self.table.remove(&id);
                }
                Undo::Restore(row) => self.table.insert(row),
            }
        }
        self.redo.clear();
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            if !self.undo.is_empty() {
                debug!(steps = self.undo.len(), "transaction dropped without commit, rolling back");
            }
            self.undo_all();
        }
    }
}
