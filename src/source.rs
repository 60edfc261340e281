//! Adapters from the booking shapes the backend serves to the canonical
//! [`Booking`]. Each record is adapted on its own so one bad record never
//! fails the batch.

use chrono::DateTime;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::calendar::{CalendarError, Skipped};
use crate::limits::MAX_SPANS_PER_BOOKING;
use crate::model::*;

#[derive(Debug, Clone, PartialEq)]
pub enum SourceError {
    Decode(String),
    MissingField(&'static str),
    BadTimestamp(String),
    Interval(CalendarError),
    NoValidSpans(String),
}

impl SourceError {
    pub fn reason(&self) -> &'static str {
        match self {
            SourceError::Decode(_) => "decode",
            SourceError::MissingField(_) => "missing_field",
            SourceError::BadTimestamp(_) => "bad_timestamp",
            SourceError::Interval(e) => e.reason(),
            SourceError::NoValidSpans(_) => "no_valid_spans",
        }
    }
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Decode(e) => write!(f, "undecodable record: {e}"),
            SourceError::MissingField(field) => write!(f, "missing field: {field}"),
            SourceError::BadTimestamp(raw) => write!(f, "bad timestamp: {raw:?}"),
            SourceError::Interval(e) => write!(f, "{e}"),
            SourceError::NoValidSpans(id) => write!(f, "booking {id} has no valid spans"),
        }
    }
}

impl std::error::Error for SourceError {}

impl From<CalendarError> for SourceError {
    fn from(e: CalendarError) -> Self {
        SourceError::Interval(e)
    }
}

/// Parse an RFC 3339 / ISO-8601 instant with offset into Unix ms.
pub fn parse_instant(raw: &str) -> Result<Ms, SourceError> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.timestamp_millis())
        .map_err(|_| SourceError::BadTimestamp(raw.to_string()))
}

/// A `[start, end)` pair from two optional timestamp strings.
pub fn parse_span(start: Option<&str>, end: Option<&str>) -> Result<Span, SourceError> {
    let start = parse_instant(start.ok_or(SourceError::MissingField("start"))?)?;
    let end = parse_instant(end.ok_or(SourceError::MissingField("end"))?)?;
    Ok(Span::try_new(start, end)?)
}

// ── Record shapes ────────────────────────────────────────────────

/// Every booking shape the calendars consume, tagged by `kind`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BookingRecord {
    /// Admin location booking: one booking, many date ranges.
    Location(LocationRecord),
    /// Creator venue booking: a single date range.
    Venue(VenueRecord),
    Canonical(CanonicalRecord),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRangeRecord {
    pub start_date_time: Option<String>,
    pub end_date_time: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartyRecord {
    pub name: Option<String>,
    pub email: Option<String>,
}

impl PartyRecord {
    fn display(self) -> Option<String> {
        self.name.or(self.email)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationRecord {
    #[serde(default)]
    pub id: Value,
    pub location_name: Option<String>,
    pub status: Option<String>,
    #[serde(default)]
    pub total_amount: Value,
    pub currency: Option<String>,
    pub customer: Option<PartyRecord>,
    #[serde(default)]
    pub dates: Vec<DateRangeRecord>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VenueRecord {
    #[serde(default)]
    pub id: Value,
    pub venue_name: Option<String>,
    pub event_title: Option<String>,
    pub status: Option<String>,
    #[serde(default)]
    pub amount: Value,
    pub currency: Option<String>,
    pub organizer: Option<PartyRecord>,
    pub start_date_time: Option<String>,
    pub end_date_time: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CanonicalSpanRecord {
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CanonicalRecord {
    #[serde(default)]
    pub id: Value,
    pub label: Option<String>,
    pub status: Option<String>,
    #[serde(default)]
    pub amount: Value,
    pub currency: Option<String>,
    pub party: Option<String>,
    #[serde(default)]
    pub spans: Vec<CanonicalSpanRecord>,
}

/// Backend ids arrive as strings or numbers.
fn id_string(id: &Value) -> Result<String, SourceError> {
    match id {
        Value::String(s) if !s.is_empty() => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(SourceError::MissingField("id")),
    }
}

/// Decimal amount (number or numeric string) to minor units.
fn amount(raw: &Value, currency: Option<String>) -> Option<Amount> {
    let major = match raw {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !major.is_finite() {
        return None;
    }
    Some(Amount {
        minor: (major * 100.0).round() as i64,
        currency,
    })
}

fn status(raw: Option<String>) -> BookingStatus {
    raw.map(BookingStatus::from).unwrap_or_default()
}

/// Keep the spans that parse; count the rest.
fn collect_spans<'a>(
    id: &str,
    ranges: impl Iterator<Item = (Option<&'a str>, Option<&'a str>)>,
    skipped: &mut Skipped,
) -> Result<Vec<Span>, SourceError> {
    let mut spans = Vec::new();
    let mut seen = 0usize;
    for (start, end) in ranges {
        seen += 1;
        if seen > MAX_SPANS_PER_BOOKING {
            return Err(SourceError::Interval(CalendarError::LimitExceeded("too many spans")));
        }
        match parse_span(start, end) {
            Ok(span) => spans.push(span),
            Err(e) => {
                warn!(booking = %id, "dropping span: {e}");
                skipped.spans += 1;
                skipped.record(e.reason());
            }
        }
    }
    if spans.is_empty() {
        return Err(SourceError::NoValidSpans(id.to_string()));
    }
    Ok(spans)
}

impl BookingRecord {
    /// Normalise to the canonical booking. Spans that fail to parse are
    /// dropped and counted in `skipped`; a record left with no span is an error.
    pub fn into_booking(self, skipped: &mut Skipped) -> Result<Booking, SourceError> {
        match self {
            BookingRecord::Location(r) => {
                let id = id_string(&r.id)?;
                let spans = collect_spans(
                    &id,
                    r.dates
                        .iter()
                        .map(|d| (d.start_date_time.as_deref(), d.end_date_time.as_deref())),
                    skipped,
                )?;
                Ok(Booking {
                    id,
                    label: r.location_name,
                    status: status(r.status),
                    amount: amount(&r.total_amount, r.currency),
                    party: r.customer.and_then(PartyRecord::display),
                    source: SourceKind::Location,
                    spans,
                })
            }
            BookingRecord::Venue(r) => {
                let id = id_string(&r.id)?;
                let spans = collect_spans(
                    &id,
                    std::iter::once((r.start_date_time.as_deref(), r.end_date_time.as_deref())),
                    skipped,
                )?;
                Ok(Booking {
                    id,
                    label: r.event_title.or(r.venue_name),
                    status: status(r.status),
                    amount: amount(&r.amount, r.currency),
                    party: r.organizer.and_then(PartyRecord::display),
                    source: SourceKind::Venue,
                    spans,
                })
            }
            BookingRecord::Canonical(r) => {
                let id = id_string(&r.id)?;
                let spans = collect_spans(
                    &id,
                    r.spans.iter().map(|s| (s.start.as_deref(), s.end.as_deref())),
                    skipped,
                )?;
                Ok(Booking {
                    id,
                    label: r.label,
                    status: status(r.status),
                    amount: amount(&r.amount, r.currency),
                    party: r.party,
                    source: SourceKind::Canonical,
                    spans,
                })
            }
        }
    }
}

/// Guess the shape of an untagged record from its fields.
fn detect_kind(obj: &serde_json::Map<String, Value>) -> Option<&'static str> {
    if obj.contains_key("dates") || obj.contains_key("locationName") {
        Some("location")
    } else if obj.contains_key("startDateTime") || obj.contains_key("venueName") {
        Some("venue")
    } else if obj.contains_key("spans") {
        Some("canonical")
    } else {
        None
    }
}

/// Decode one raw record, inferring `kind` when it is absent.
pub fn decode_record(mut raw: Value) -> Result<BookingRecord, SourceError> {
    let Some(obj) = raw.as_object_mut() else {
        return Err(SourceError::Decode("record is not an object".into()));
    };
    if !obj.contains_key("kind") {
        let kind = detect_kind(obj)
            .ok_or_else(|| SourceError::Decode("cannot infer booking kind".into()))?;
        obj.insert("kind".into(), Value::String(kind.into()));
    }
    serde_json::from_value(raw).map_err(|e| SourceError::Decode(e.to_string()))
}

/// Adapt a fetched batch. Never fails: bad records are logged, counted
/// and left out.
pub fn parse_batch(records: Vec<Value>) -> (Vec<Booking>, Skipped) {
    let mut skipped = Skipped::default();
    let mut bookings = Vec::with_capacity(records.len());
    for (i, raw) in records.into_iter().enumerate() {
        let adapted = decode_record(raw).and_then(|record| record.into_booking(&mut skipped));
        match adapted {
            Ok(booking) => bookings.push(booking),
            Err(e) => {
                warn!(index = i, "skipping booking record: {e}");
                skipped.records += 1;
                skipped.record(e.reason());
            }
        }
    }
    (bookings, skipped)
}
