use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::calendar::CalendarError;
use crate::limits::*;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

/// Time interval `[start, end)` with `start < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Checked constructor for untrusted input: rejects empty or inverted
    /// spans, instants outside the supported range and over-wide spans.
    pub fn try_new(start: Ms, end: Ms) -> Result<Self, CalendarError> {
        if start >= end {
            return Err(CalendarError::InvalidInterval { start, end });
        }
        if start < MIN_VALID_TIMESTAMP_MS {
            return Err(CalendarError::TimestampOutOfRange(start));
        }
        if end > MAX_VALID_TIMESTAMP_MS {
            return Err(CalendarError::TimestampOutOfRange(end));
        }
        if end - start > MAX_SPAN_DURATION_MS {
            return Err(CalendarError::LimitExceeded("span too wide"));
        }
        Ok(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Overlapping or sharing an endpoint; the merge criterion.
    pub fn touches(&self, other: &Span) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// The overlapping part of two spans, if non-empty.
    pub fn intersect(&self, other: &Span) -> Option<Span> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then(|| Span::new(start, end))
    }
}

/// Lifecycle state of a booking as reported by the backend.
///
/// Unknown values are preserved verbatim so the UI can still show them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BookingStatus {
    #[default]
    Pending,
    Confirmed,
    Cancelled,
    Rejected,
    Completed,
    Other(String),
}

impl BookingStatus {
    /// Case-insensitive; accepts the British and American spelling of cancelled.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "pending" => BookingStatus::Pending,
            "confirmed" | "approved" => BookingStatus::Confirmed,
            "cancelled" | "canceled" => BookingStatus::Cancelled,
            "rejected" => BookingStatus::Rejected,
            "completed" => BookingStatus::Completed,
            _ => BookingStatus::Other(label.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Rejected => "rejected",
            BookingStatus::Completed => "completed",
            BookingStatus::Other(raw) => raw,
        }
    }
}

impl From<String> for BookingStatus {
    fn from(label: String) -> Self {
        BookingStatus::from_label(&label)
    }
}

impl From<BookingStatus> for String {
    fn from(status: BookingStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Monetary amount in minor units (cents).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amount {
    pub minor: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

/// Which input shape a booking was adapted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Location,
    Venue,
    Canonical,
}

/// Canonical booking: a source of spans plus display payload carried through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    pub id: String,
    pub label: Option<String>,
    pub status: BookingStatus,
    pub amount: Option<Amount>,
    /// Customer or organizer display name.
    pub party: Option<String>,
    pub source: SourceKind,
    pub spans: Vec<Span>,
}

impl Booking {
    pub fn new(id: impl Into<String>, spans: Vec<Span>) -> Self {
        Self {
            id: id.into(),
            label: None,
            status: BookingStatus::default(),
            amount: None,
            party: None,
            source: SourceKind::Canonical,
            spans,
        }
    }
}

// ── Calendar pass types ──────────────────────────────────────────

/// A span clipped to one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaySlot {
    pub date: NaiveDate,
    pub span: Span,
    /// Index of the owning booking in the pass's booking list.
    pub booking: usize,
}

/// A maximal disjoint block of one day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedSlot {
    pub span: Span,
    /// Indices of the contributing day slots, ascending.
    pub members: Vec<usize>,
}

/// A grid cell: `index` counts granularity-sized cells from local midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellKey {
    pub date: NaiveDate,
    pub index: u32,
}

impl CellKey {
    pub fn new(date: NaiveDate, index: u32) -> Self {
        Self { date, index }
    }
}

/// `2024-05-06_09`: for hourly grids the index is the hour of day.
impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{:02}", self.date.format("%Y-%m-%d"), self.index)
    }
}
