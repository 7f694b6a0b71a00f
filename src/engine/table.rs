use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::id::BookingId;
use crate::model::{Booking, TimeRange};

/// The `bookings` table: rows sorted by `scheduled_for`, plus an id index.
///
/// The exclusion constraint keeps rows pairwise disjoint, so both
/// `scheduled_for` and `ends_at` are ascending along `rows`. Range lookups
/// rely on that and binary-search on either column.
#[derive(Debug, Default)]
pub struct BookingTable {
    rows: Vec<Booking>,
    by_id: HashMap<BookingId, DateTime<Utc>>,
}

impl BookingTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[Booking] {
        &self.rows
    }

    pub fn contains(&self, id: &BookingId) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn get(&self, id: &BookingId) -> Option<&Booking> {
        let pos = self.position(id)?;
        self.rows.get(pos)
    }

    /// Insert maintaining sort order. Constraint checks are the caller's job.
    pub fn insert(&mut self, row: Booking) {
        let pos = self
            .rows
            .partition_point(|r| r.scheduled_for < row.scheduled_for);
        self.by_id.insert(row.id, row.scheduled_for);
        self.rows.insert(pos, row);
    }

    pub fn remove(&mut self, id: &BookingId) -> Option<Booking> {
        let pos = self.position(id)?;
        self.by_id.remove(id);
        Some(self.rows.remove(pos))
    }

    /// Rows whose range intersects `query`.
    pub fn overlapping(&self, query: &TimeRange) -> &[Booking] {
        // Everything from `right` on starts at or after query.end.
        let right = self.rows.partition_point(|r| r.scheduled_for < query.end);
        // Everything before `left` ends at or before query.start.
        let left = self.rows.partition_point(|r| r.ends_at <= query.start);
        &self.rows[left.min(right)..right]
    }

    /// Rows with `lower <= scheduled_for < upper`, where `lower` is exclusive
    /// when `lower_exclusive` is set. `None` bounds are open.
    pub fn starting_between(
        &self,
        lower: Option<DateTime<Utc>>,
        lower_exclusive: bool,
        upper: Option<DateTime<Utc>>,
    ) -> &[Booking] {
        let from = match lower {
            Some(t) if lower_exclusive => self.rows.partition_point(|r| r.scheduled_for <= t),
            Some(t) => self.rows.partition_point(|r| r.scheduled_for < t),
            None => 0,
        };
        let to = match upper {
            Some(t) => self.rows.partition_point(|r| r.scheduled_for < t),
            None => self.rows.len(),
        };
        &self.rows[from.min(to)..to]
    }

    fn position(&self, id: &BookingId) -> Option<usize> {
        let start = self.by_id.get(id)?;
        let from = self.rows.partition_point(|r| r.scheduled_for < *start);
        self.rows[from..]
            .iter()
            .take_while(|r| r.scheduled_for == *start)
            .position(|r| r.id == *id)
            .map(|offset| from + offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 1, h, 0, 0).unwrap()
    }

    fn row(start: u32, end: u32) -> Booking {
        Booking {
            id: BookingId::generate(),
            title: format!("{start}-{end}"),
            scheduled_for: at(start),
            ends_at: at(end),
            created_at: at(0),
        }
    }

    fn table(rows: &[(u32, u32)]) -> BookingTable {
        let mut t = BookingTable::default();
        for &(s, e) in rows {
            t.insert(row(s, e));
        }
        t
    }

    fn starts(rows: &[Booking]) -> Vec<DateTime<Utc>> {
        rows.iter().map(|r| r.scheduled_for).collect()
    }

    #[test]
    fn insert_keeps_rows_sorted() {
        let t = table(&[(14, 15), (9, 10), (11, 12)]);
        assert_eq!(starts(t.rows()), vec![at(9), at(11), at(14)]);
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn get_and_remove_by_id() {
        let mut t = table(&[(9, 10)]);
        let r = row(11, 12);
        let id = r.id;
        t.insert(r.clone());
        assert_eq!(t.get(&id), Some(&r));
        assert_eq!(t.remove(&id), Some(r));
        assert!(t.get(&id).is_none());
        assert!(!t.contains(&id));
        assert!(t.remove(&id).is_none());
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn overlapping_finds_only_intersecting_rows() {
        let t = table(&[(8, 9), (10, 11), (12, 14), (15, 16)]);
        let hits = t.overlapping(&TimeRange::new(at(10) + TimeDelta::minutes(30), at(13)));
        assert_eq!(starts(hits), vec![at(10), at(12)]);
    }

    #[test]
    fn overlapping_ignores_touching_rows() {
        let t = table(&[(10, 11), (12, 13)]);
        assert!(t.overlapping(&TimeRange::new(at(11), at(12))).is_empty());
    }

    #[test]
    fn overlapping_on_empty_table() {
        let t = BookingTable::default();
        assert!(t.overlapping(&TimeRange::new(at(1), at(2))).is_empty());
    }

    #[test]
    fn starting_between_bounds() {
        let t = table(&[(8, 9), (10, 11), (12, 13), (14, 15)]);
        assert_eq!(starts(t.starting_between(None, false, None)).len(), 4);
        assert_eq!(
            starts(t.starting_between(Some(at(10)), false, Some(at(14)))),
            vec![at(10), at(12)]
        );
        assert_eq!(
            starts(t.starting_between(Some(at(10)), true, None)),
            vec![at(12), at(14)]
        );
        assert!(t.starting_between(Some(at(14)), false, Some(at(10))).is_empty());
    }
}
