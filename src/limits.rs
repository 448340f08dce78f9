use crate::model::Ms;

/// Calendars a single scheduler will hold.
pub const MAX_CALENDARS: usize = 100_000;

/// Bookings on one calendar.
pub const MAX_BOOKINGS_PER_CALENDAR: usize = 100_000;

/// Entries in one `add_time_blocks` call.
pub const MAX_BATCH_SIZE: usize = 1_000;

/// Calendar display name length in bytes.
pub const MAX_NAME_LEN: usize = 256;

/// 2200-01-01T00:00:00Z.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

/// A single booking may not run longer than one year.
pub const MAX_SPAN_DURATION_MS: Ms = 366 * 24 * 3_600_000;

/// Widest window accepted by `free_slots`.
pub const MAX_QUERY_WINDOW_MS: Ms = 2 * 366 * 24 * 3_600_000;
