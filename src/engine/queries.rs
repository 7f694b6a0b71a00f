use chrono::{DateTime, Utc};

use crate::id::BookingId;
use crate::model::Booking;

use super::{Engine, EngineError};

/// `SELECT * FROM bookings WHERE ... ORDER BY scheduled_for LIMIT n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingScan {
    /// `scheduled_for > resume_after`
    pub resume_after: Option<DateTime<Utc>>,
    /// `scheduled_for >= starts_at_or_after`
    pub starts_at_or_after: Option<DateTime<Utc>>,
    /// `scheduled_for < starts_before`
    pub starts_before: Option<DateTime<Utc>>,
    pub limit: usize,
}

impl BookingScan {
    pub fn new(limit: usize) -> Self {
        Self {
            resume_after: None,
            starts_at_or_after: None,
            starts_before: None,
            limit,
        }
    }
}

impl Engine {
    pub async fn get_booking(&self, id: &BookingId) -> Result<Option<Booking>, EngineError> {
        self.ensure_open()?;
        let guard = self.table.read().await;
        Ok(guard.get(id).cloned())
    }

    pub async fn scan(&self, scan: &BookingScan) -> Result<Vec<Booking>, EngineError> {
        self.ensure_open()?;
        let guard = self.table.read().await;

        // The tighter of the two lower bounds wins; on a tie the exclusive one.
        let lower = match (scan.resume_after, scan.starts_at_or_after) {
            (Some(c), Some(a)) if a > c => Some((a, false)),
            (Some(c), _) => Some((c, true)),
            (None, Some(a)) => Some((a, false)),
            (None, None) => None,
        };
        let rows = guard.starting_between(
            lower.map(|(t, _)| t),
            lower.is_some_and(|(_, exclusive)| exclusive),
            scan.starts_before,
        );
        Ok(rows.iter().take(scan.limit).cloned().collect())
    }

    pub async fn booking_count(&self) -> Result<usize, EngineError> {
        self.ensure_open()?;
        Ok(self.table.read().await.len())
    }
}
