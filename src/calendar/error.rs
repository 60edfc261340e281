use chrono::NaiveDate;

use crate::model::Ms;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalendarError {
    InvalidInterval { start: Ms, end: Ms },
    TimestampOutOfRange(Ms),
    UnknownTimeZone(String),
    NoLocalMidnight(NaiveDate),
    InvalidGranularity(u32),
    LimitExceeded(&'static str),
}

impl CalendarError {
    /// Short label for skip reports and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            CalendarError::InvalidInterval { .. } => "invalid_interval",
            CalendarError::TimestampOutOfRange(_) => "timestamp_out_of_range",
            CalendarError::UnknownTimeZone(_) => "unknown_time_zone",
            CalendarError::NoLocalMidnight(_) => "no_local_midnight",
            CalendarError::InvalidGranularity(_) => "invalid_granularity",
            CalendarError::LimitExceeded(_) => "limit_exceeded",
        }
    }
}

impl std::fmt::Display for CalendarError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CalendarError::InvalidInterval { start, end } => {
                write!(f, "invalid interval [{start}, {end}): start must be before end")
            }
            CalendarError::TimestampOutOfRange(t) => write!(f, "timestamp out of range: {t}"),
            CalendarError::UnknownTimeZone(name) => write!(f, "unknown time zone: {name}"),
            CalendarError::NoLocalMidnight(date) => {
                write!(f, "no representable start of day for {date}")
            }
            CalendarError::InvalidGranularity(minutes) => write!(
                f,
                "invalid granularity: {minutes} minutes (must divide a day and be at least {} minutes)",
                crate::limits::MIN_GRANULARITY_MINUTES
            ),
            CalendarError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
        }
    }
}

impl std::error::Error for CalendarError {}
