use std::time::Duration;

/// Longest accepted booking title, in characters.
pub const MAX_TITLE_LEN: usize = 256;

/// Longest accepted booking, measured from `scheduled_for` to `ends_at`.
pub const MAX_BOOKING_DURATION: Duration = Duration::from_secs(31 * 24 * 60 * 60);

/// Largest page a single listing call returns.
pub const MAX_PAGE_SIZE: usize = 100;

/// Page size used when a listing request does not ask for one.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Pending WAL commands before `Engine::commit` callers start waiting on the writer.
pub const WAL_QUEUE_DEPTH: usize = 4096;

/// Buffered notifications per engine channel before slow listeners lag.
pub const NOTIFY_CHANNEL_CAPACITY: usize = 64;
