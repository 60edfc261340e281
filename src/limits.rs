use crate::model::Ms;

const DAY_MS: Ms = 86_400_000;

/// 1970-01-01T00:00:00Z.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 9999-12-31T00:00:00Z, comfortably inside chrono's representable range.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_214_400_000;

/// Longest single booking span; bounds the day walk in slot expansion.
pub const MAX_SPAN_DURATION_MS: Ms = 366 * DAY_MS;

/// Widest view window a calendar request may ask for.
pub const MAX_VIEW_WINDOW_MS: Ms = 400 * DAY_MS;

pub const MAX_BOOKINGS_PER_REQUEST: usize = 10_000;
pub const MAX_SPANS_PER_BOOKING: usize = 1_000;
/// Day slots one calendar pass may produce across all bookings.
pub const MAX_SLOTS_PER_REQUEST: usize = 50_000;
/// Cell occupancy entries (cell × booking) one calendar pass may produce.
pub const MAX_CELLS_PER_REQUEST: usize = 500_000;
/// Spans accepted by a standalone merge request.
pub const MAX_SPANS_PER_REQUEST: usize = 100_000;

/// Grid cells smaller than this blow up the cell index for no visual gain.
pub const MIN_GRANULARITY_MINUTES: u32 = 5;
pub const MINUTES_PER_DAY: u32 = 1_440;

/// Max bytes in a single newline-delimited request.
pub const MAX_LINE_BYTES: usize = 8 * 1024 * 1024;
