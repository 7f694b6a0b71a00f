use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::BookingId;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        debug_assert!(start < end, "TimeRange start must be before end");
        Self { start, end }
    }

    /// Touching ranges (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// A reserved interval. Never updated in place: created, read, deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub title: String,
    pub scheduled_for: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Booking {
    pub fn range(&self) -> TimeRange {
        TimeRange::new(self.scheduled_for, self.ends_at)
    }
}

/// Column values supplied by the caller; `id` and `created_at` are filled in by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub title: String,
    pub scheduled_for: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

/// A single row change inside a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    Insert(Booking),
    Delete(BookingId),
}

/// The WAL record format: everything one transaction changed.
/// Replay applies a commit entirely or, if the frame is damaged, not at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub mutations: Vec<Mutation>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 1, h, m, 0).unwrap()
    }

    #[test]
    fn booking_range_is_half_open() {
        let booking = Booking {
            id: BookingId::generate(),
            title: "Dentist".into(),
            scheduled_for: at(10, 0),
            ends_at: at(10, 45),
            created_at: at(8, 0),
        };
        assert_eq!(booking.range(), TimeRange::new(at(10, 0), at(10, 45)));
        assert!(!booking.range().overlaps(&TimeRange::new(at(10, 45), at(11, 0))));
        assert!(booking.range().overlaps(&TimeRange::new(at(10, 44), at(11, 0))));
    }

    #[test]
    fn range_overlap() {
        let a = TimeRange::new(at(10, 0), at(11, 0));
        let b = TimeRange::new(at(10, 30), at(11, 30));
        let c = TimeRange::new(at(11, 0), at(12, 0));
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // touching, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn range_containment_overlaps() {
        let outer = TimeRange::new(at(9, 0), at(13, 0));
        let inner = TimeRange::new(at(10, 0), at(11, 0));
        assert!(outer.overlaps(&inner));
        assert!(inner.overlaps(&outer));
    }

    #[test]
    fn commit_survives_bincode() {
        let booking = Booking {
            id: BookingId::generate(),
            title: "Dentist".into(),
            scheduled_for: at(10, 0),
            ends_at: at(10, 45),
            created_at: at(8, 0),
        };
        let commit = Commit {
            mutations: vec![Mutation::Insert(booking.clone()), Mutation::Delete(booking.id)],
        };
        let bytes = bincode::serialize(&commit).unwrap();
        let back: Commit = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, commit);
    }
}
