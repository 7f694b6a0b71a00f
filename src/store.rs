use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, warn};

use crate::cursor::{CursorError, PaginationCursor};
use crate::engine::{BOOKING_OVERLAP, BookingScan, Engine, EngineError, Transaction};
use crate::id::BookingId;
use crate::limits::MAX_PAGE_SIZE;
use crate::model::{Booking, NewBooking};
use crate::observability::{STORE_OPERATIONS_TOTAL, STORE_OPERATION_DURATION_SECONDS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The requested interval intersects an existing booking.
    Overlap,
    NotFound(BookingId),
    InvalidCursor(CursorError),
    /// `scheduled_for + duration` does not fit in a timestamp.
    DurationOutOfRange,
    Storage(EngineError),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Overlap => write!(f, "booking overlaps an existing booking"),
            StoreError::NotFound(id) => write!(f, "booking {id} not found"),
            StoreError::InvalidCursor(e) => write!(f, "invalid cursor: {e}"),
            StoreError::DurationOutOfRange => write!(f, "booking duration out of range"),
            StoreError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::InvalidCursor(e) => Some(e),
            StoreError::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<EngineError> for StoreError {
    fn from(e: EngineError) -> Self {
        match e.constraint() {
            Some(BOOKING_OVERLAP) => StoreError::Overlap,
            _ => StoreError::Storage(e),
        }
    }
}

impl From<CursorError> for StoreError {
    fn from(e: CursorError) -> Self {
        StoreError::InvalidCursor(e)
    }
}

/// One page of a listing. `next_cursor` is set only when more rows follow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub items: Vec<Booking>,
    pub next_cursor: Option<PaginationCursor>,
}

/// Booking persistence. Holds no locks of its own: the engine's exclusion
/// constraint is the only thing standing between two overlapping writers.
#[derive(Clone)]
pub struct BookingStore {
    engine: Arc<Engine>,
}

impl BookingStore {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Insert `[scheduled_for, scheduled_for + duration)`.
    pub async fn create_booking(
        &self,
        title: &str,
        scheduled_for: DateTime<Utc>,
        duration: Duration,
    ) -> Result<Booking, StoreError> {
        let start = std::time::Instant::now();
        let delta = TimeDelta::from_std(duration).map_err(|_| StoreError::DurationOutOfRange)?;
        let ends_at = scheduled_for
            .checked_add_signed(delta)
            .ok_or(StoreError::DurationOutOfRange)?;
        let new = NewBooking {
            title: title.to_string(),
            scheduled_for,
            ends_at,
        };

        let result = self
            .with_tx(move |tx| tx.insert_booking(new).map_err(StoreError::from))
            .await;
        record("create_booking", start, &result);
        match &result {
            Ok(row) => debug!(id = %row.id, %scheduled_for, %ends_at, "booking created"),
            Err(StoreError::Overlap) => debug!(%scheduled_for, %ends_at, "booking rejected: overlap"),
            Err(e) => warn!(%scheduled_for, "create_booking failed: {e}"),
        }
        result
    }

    pub async fn get_booking(&self, id: &BookingId) -> Result<Booking, StoreError> {
        let start = std::time::Instant::now();
        let result = match self.engine.get_booking(id).await {
            Ok(Some(row)) => Ok(row),
            Ok(None) => Err(StoreError::NotFound(*id)),
            Err(e) => Err(StoreError::Storage(e)),
        };
        record("get_booking", start, &result);
        result
    }

    /// Deleting a missing row succeeds.
    pub async fn delete_booking(&self, id: &BookingId) -> Result<(), StoreError> {
        let start = std::time::Instant::now();
        let id = *id;
        let result = self
            .with_tx(move |tx| {
                let removed = tx.delete_booking(&id);
                debug!(%id, removed, "delete_booking");
                Ok(())
            })
            .await;
        record("delete_booking", start, &result);
        result
    }

    /// Ascending by `scheduled_for`, resuming strictly after `cursor`.
    /// `before` is exclusive, `after` inclusive. `limit` is clamped to
    /// `1..=MAX_PAGE_SIZE`.
    pub async fn list_bookings(
        &self,
        cursor: Option<&str>,
        limit: usize,
        before: Option<DateTime<Utc>>,
        after: Option<DateTime<Utc>>,
    ) -> Result<Page, StoreError> {
        let start = std::time::Instant::now();
        let result = self.list_inner(cursor, limit, before, after).await;
        record("list_bookings", start, &result);
        result
    }

    async fn list_inner(
        &self,
        cursor: Option<&str>,
        limit: usize,
        before: Option<DateTime<Utc>>,
        after: Option<DateTime<Utc>>,
    ) -> Result<Page, StoreError> {
        let resume_after = cursor
            .map(PaginationCursor::decode)
            .transpose()?
            .map(|c| c.timestamp());
        let limit = limit.clamp(1, MAX_PAGE_SIZE);

        let scan = BookingScan {
            resume_after,
            starts_at_or_after: after,
            starts_before: before,
            limit: limit + 1,
        };
        let mut items = self.engine.scan(&scan).await.map_err(StoreError::Storage)?;

        let next_cursor = if items.len() > limit {
            items.truncate(limit);
            items.last().map(|row| PaginationCursor::new(row.scheduled_for))
        } else {
            None
        };
        Ok(Page { items, next_cursor })
    }

    /// Run `body` inside a transaction: commit on `Ok`, roll back on `Err`.
    async fn with_tx<T, F>(&self, body: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Transaction) -> Result<T, StoreError>,
    {
        let mut tx = self.engine.begin().await.map_err(StoreError::Storage)?;
        match body(&mut tx) {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                tx.rollback();
                Err(e)
            }
        }
    }
}

fn record<T>(op: &'static str, start: std::time::Instant, result: &Result<T, StoreError>) {
    let status = match result {
        Ok(_) => "ok",
        Err(StoreError::Overlap) => "overlap",
        Err(StoreError::NotFound(_)) => "not_found",
        Err(StoreError::InvalidCursor(_)) => "invalid_cursor",
        Err(StoreError::DurationOutOfRange) => "invalid_duration",
        Err(StoreError::Storage(_)) => "error",
    };
    metrics::counter!(STORE_OPERATIONS_TOTAL, "op" => op, "status" => status).increment(1);
    metrics::histogram!(STORE_OPERATION_DURATION_SECONDS, "op" => op)
        .record(start.elapsed().as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{BOOKING_RANGE_CHECK, BOOKING_TITLE_CHECK};
    use chrono::TimeZone;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("schedulr_test_store");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn store(name: &str) -> BookingStore {
        BookingStore::new(Arc::new(Engine::open(test_wal_path(name)).unwrap()))
    }

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 6, 1, h, 0, 0).unwrap()
    }

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn create_then_get() {
        let store = store("create_get.wal");
        let created = store.create_booking("standup", at(9), HOUR).await.unwrap();
        assert_eq!(created.title, "standup");
        assert_eq!(created.ends_at, at(10));
        assert_eq!(store.get_booking(&created.id).await.unwrap(), created);
    }

    #[tokio::test]
    async fn overlap_maps_to_overlap() {
        let store = store("overlap.wal");
        store.create_booking("a", at(9), HOUR * 2).await.unwrap();
        assert_eq!(
            store.create_booking("b", at(10), HOUR).await,
            Err(StoreError::Overlap)
        );
        store.create_booking("c", at(11), HOUR).await.unwrap();
    }

    #[tokio::test]
    async fn other_constraints_map_to_storage() {
        let store = store("other_constraints.wal");
        let err = store.create_booking("", at(9), HOUR).await.unwrap_err();
        assert!(matches!(&err, StoreError::Storage(e) if e.constraint() == Some(BOOKING_TITLE_CHECK)));

        let err = store.create_booking("x", at(9), Duration::ZERO).await.unwrap_err();
        assert!(matches!(&err, StoreError::Storage(e) if e.constraint() == Some(BOOKING_RANGE_CHECK)));
    }

    #[tokio::test]
    async fn huge_duration_out_of_range() {
        let store = store("huge_duration.wal");
        assert_eq!(
            store.create_booking("x", at(9), Duration::MAX).await,
            Err(StoreError::DurationOutOfRange)
        );
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = store("get_missing.wal");
        let id = BookingId::generate();
        assert_eq!(store.get_booking(&id).await, Err(StoreError::NotFound(id)));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = store("delete.wal");
        let row = store.create_booking("a", at(9), HOUR).await.unwrap();
        store.delete_booking(&row.id).await.unwrap();
        store.delete_booking(&row.id).await.unwrap();
        store.delete_booking(&BookingId::generate()).await.unwrap();
        assert_eq!(store.get_booking(&row.id).await, Err(StoreError::NotFound(row.id)));
        // The slot is free again.
        store.create_booking("b", at(9), HOUR).await.unwrap();
    }

    #[tokio::test]
    async fn list_pages_through_everything() {
        let store = store("list_pages.wal");
        for h in [5, 1, 3, 2, 4] {
            store.create_booking("x", at(h), HOUR).await.unwrap();
        }

        let page = store.list_bookings(None, 2, None, None).await.unwrap();
        let starts: Vec<_> = page.items.iter().map(|r| r.scheduled_for).collect();
        assert_eq!(starts, vec![at(1), at(2)]);
        let token = page.next_cursor.unwrap().encode();

        let page = store.list_bookings(Some(&token), 2, None, None).await.unwrap();
        let starts: Vec<_> = page.items.iter().map(|r| r.scheduled_for).collect();
        assert_eq!(starts, vec![at(3), at(4)]);
        let token = page.next_cursor.unwrap().encode();

        let page = store.list_bookings(Some(&token), 2, None, None).await.unwrap();
        let starts: Vec<_> = page.items.iter().map(|r| r.scheduled_for).collect();
        assert_eq!(starts, vec![at(5)]);
        assert_eq!(page.next_cursor, None);
    }

    #[tokio::test]
    async fn pages_past_year_9999() {
        let store = store("far_future.wal");
        let base = Utc.with_ymd_and_hms(9999, 12, 31, 22, 0, 0).unwrap();
        for i in 0..4 {
            store.create_booking("far", base + TimeDelta::hours(i), HOUR).await.unwrap();
        }

        let mut seen = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = store.list_bookings(cursor.as_deref(), 1, None, None).await.unwrap();
            seen.extend(page.items.iter().map(|r| r.scheduled_for));
            match page.next_cursor {
                Some(c) => cursor = Some(c.encode()),
                None => break,
            }
        }
        let expected: Vec<_> = (0..4).map(|i| base + TimeDelta::hours(i)).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn exact_fit_has_no_next_cursor() {
        let store = store("exact_fit.wal");
        for h in 1..=3 {
            store.create_booking("x", at(h), HOUR).await.unwrap();
        }
        let page = store.list_bookings(None, 3, None, None).await.unwrap();
        assert_eq!(page.items.len(), 3);
        assert_eq!(page.next_cursor, None);
    }

    #[tokio::test]
    async fn list_filters_before_and_after() {
        let store = store("list_filters.wal");
        for h in 1..=6 {
            store.create_booking("x", at(h), HOUR).await.unwrap();
        }
        let page = store
            .list_bookings(None, 10, Some(at(5)), Some(at(2)))
            .await
            .unwrap();
        let starts: Vec<_> = page.items.iter().map(|r| r.scheduled_for).collect();
        assert_eq!(starts, vec![at(2), at(3), at(4)]);
    }

    #[tokio::test]
    async fn limit_is_clamped() {
        let store = store("limit_clamp.wal");
        for h in 1..=3 {
            store.create_booking("x", at(h), HOUR).await.unwrap();
        }
        let page = store.list_bookings(None, 0, None, None).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert!(page.next_cursor.is_some());
    }

    #[tokio::test]
    async fn bad_cursor_rejected() {
        let store = store("bad_cursor.wal");
        let err = store
            .list_bookings(Some("not base64!"), 10, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidCursor(_)));
    }

    #[tokio::test]
    async fn closed_engine_is_storage_error() {
        let store = store("closed.wal");
        store.engine().close();
        assert_eq!(
            store.create_booking("x", at(1), HOUR).await,
            Err(StoreError::Storage(EngineError::Closed))
        );
        assert!(matches!(
            store.list_bookings(None, 10, None, None).await,
            Err(StoreError::Storage(EngineError::Closed))
        ));
    }
}
