use crate::model::Booking;

use super::EngineError;
use super::table::BookingTable;

pub const BOOKING_PKEY: &str = "booking_pkey";
pub const BOOKING_TITLE_CHECK: &str = "booking_title_check";
pub const BOOKING_RANGE_CHECK: &str = "booking_range_check";
/// Exclusion constraint over `[scheduled_for, ends_at)`.
pub const BOOKING_OVERLAP: &str = "booking_overlap";

fn violation(constraint: &'static str, detail: String) -> EngineError {
    EngineError::ConstraintViolation { constraint, detail }
}

/// Every constraint a new row must satisfy against the current table.
/// Runs under the table write lock, so the check and the insert are atomic.
pub(crate) fn check_insert(table: &BookingTable, row: &Booking) -> Result<(), EngineError> {
    if row.title.trim().is_empty() {
        return Err(violation(BOOKING_TITLE_CHECK, "title must not be blank".into()));
    }
    if row.ends_at <= row.scheduled_for {
        return Err(violation(
            BOOKING_RANGE_CHECK,
            format!("ends_at {} is not after scheduled_for {}", row.ends_at, row.scheduled_for),
        ));
    }
    if table.contains(&row.id) {
        return Err(violation(BOOKING_PKEY, format!("key {} already exists", row.id)));
    }
    let range = row.range();
    // `overlapping` narrows by binary search; `overlaps` decides.
    let conflict = table
        .overlapping(&range)
        .iter()
        .find(|existing| existing.range().overlaps(&range));
    if let Some(existing) = conflict {
        return Err(violation(
            BOOKING_OVERLAP,
            format!(
                "[{}, {}) conflicts with existing booking {} [{}, {})",
                range.start, range.end, existing.id, existing.scheduled_for, existing.ends_at
            ),
        ));
    }
    Ok(())
}
