use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::calendar::{
    build_calendar, expand, merge_spans, Calendar, CalendarError, CalendarOptions, DaySummary,
    Skipped,
};
use crate::limits::*;
use crate::model::*;
use crate::source::{parse_batch, parse_instant, parse_span, SourceError};
use crate::zone::{DayEnd, Zone};

/// A request line, tagged by `op`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    Ping,
    Merge {
        spans: Vec<RangeRequest>,
        #[serde(default)]
        timezone: Option<String>,
    },
    Expand {
        start: String,
        end: String,
        #[serde(default)]
        timezone: Option<String>,
        #[serde(default)]
        day_end: Option<DayEnd>,
    },
    Calendar(CalendarRequest),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RangeRequest {
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CalendarRequest {
    /// Raw booking records in any supported shape.
    #[serde(default)]
    pub bookings: Vec<Value>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub granularity_minutes: Option<u32>,
    #[serde(default)]
    pub day_end: Option<DayEnd>,
    #[serde(default)]
    pub window: Option<RangeRequest>,
    #[serde(default)]
    pub exclude_statuses: Vec<BookingStatus>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    Empty,
    Parse(String),
    TooLong(usize),
    BadSpan { index: usize, error: SourceError },
    Source(SourceError),
    Calendar(CalendarError),
    Encode(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::Empty => write!(f, "empty request"),
            ProtocolError::Parse(e) => write!(f, "parse error: {e}"),
            ProtocolError::TooLong(max) => write!(f, "request line exceeds {max} bytes"),
            ProtocolError::BadSpan { index, error } => write!(f, "spans[{index}]: {error}"),
            ProtocolError::Source(e) => write!(f, "{e}"),
            ProtocolError::Calendar(e) => write!(f, "{e}"),
            ProtocolError::Encode(e) => write!(f, "encode error: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<CalendarError> for ProtocolError {
    fn from(e: CalendarError) -> Self {
        ProtocolError::Calendar(e)
    }
}

impl From<SourceError> for ProtocolError {
    fn from(e: SourceError) -> Self {
        ProtocolError::Source(e)
    }
}

pub fn parse_request(line: &str) -> Result<Command, ProtocolError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(ProtocolError::Empty);
    }
    serde_json::from_str(trimmed).map_err(|e| ProtocolError::Parse(e.to_string()))
}

/// Server-wide settings a request may override.
#[derive(Debug, Clone)]
pub struct ServiceDefaults {
    pub zone: Zone,
    pub granularity_minutes: u32,
    pub max_line_bytes: usize,
}

impl Default for ServiceDefaults {
    fn default() -> Self {
        Self {
            zone: Zone::utc(),
            granularity_minutes: 60,
            max_line_bytes: MAX_LINE_BYTES,
        }
    }
}

impl ServiceDefaults {
    fn zone(&self, timezone: Option<&str>, day_end: Option<DayEnd>) -> Result<Zone, CalendarError> {
        let zone = match timezone {
            Some(name) => Zone::parse(name)?.with_day_end(self.zone.day_end()),
            None => self.zone,
        };
        Ok(match day_end {
            Some(day_end) => zone.with_day_end(day_end),
            None => zone,
        })
    }
}

// ── Response shapes ──────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct Reply {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Reply {
    pub fn ok(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(e: &ProtocolError) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(e.to_string()),
        }
    }

    /// One JSON line, without the trailing newline.
    pub fn to_line(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"ok":false,"error":"encode error: {e}"}}"#))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RangeView {
    pub start: String,
    pub end: String,
}

impl RangeView {
    fn render(span: &Span, zone: &Zone) -> Result<Self, CalendarError> {
        Ok(Self {
            start: zone.format(span.start)?,
            end: zone.format(span.end)?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotView {
    pub date: String,
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockView {
    pub start: String,
    pub end: String,
    /// Ids of the bookings merged into this block.
    pub bookings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DayView {
    pub date: String,
    pub blocks: Vec<BlockView>,
    pub free: Vec<RangeView>,
    pub summary: DaySummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookingView {
    pub label: Option<String>,
    pub status: BookingStatus,
    pub amount: Option<Amount>,
    pub party: Option<String>,
    pub source: SourceKind,
    pub spans: Vec<RangeView>,
}

/// Render-ready calendar: everything keyed by strings, instants in the
/// request's zone.
#[derive(Debug, Clone, Serialize)]
pub struct CalendarView {
    pub timezone: String,
    pub granularity_minutes: u32,
    pub days: Vec<DayView>,
    /// `"YYYY-MM-DD_HH"` → booking ids.
    pub cells: BTreeMap<String, Vec<String>>,
    /// Only bookings visible on some day. Keyed by id, or `source:id`
    /// when two sources share an id.
    pub bookings: BTreeMap<String, BookingView>,
    pub skipped: Skipped,
}

impl CalendarView {
    pub fn render(cal: &Calendar) -> Result<Self, CalendarError> {
        let zone = &cal.zone;
        let keys = cal.booking_keys();
        let id = |i: usize| keys[i].clone();

        let mut days = Vec::with_capacity(cal.days.len());
        let mut visible = BTreeSet::new();
        for (date, bucket) in &cal.days {
            let mut blocks = Vec::with_capacity(bucket.merged.len());
            for block in &bucket.merged {
                let members = bucket.booking_indices(block);
                visible.extend(members.iter().copied());
                blocks.push(BlockView {
                    start: zone.format(block.span.start)?,
                    end: zone.format(block.span.end)?,
                    bookings: members.into_iter().map(id).collect(),
                });
            }
            let free = cal
                .free_spans(*date)?
                .iter()
                .map(|s| RangeView::render(s, zone))
                .collect::<Result<_, _>>()?;
            days.push(DayView {
                date: date.format("%Y-%m-%d").to_string(),
                blocks,
                free,
                summary: bucket.summary.clone(),
            });
        }

        let cells = cal
            .cells
            .iter()
            .map(|(key, occupants)| (key.to_string(), occupants.iter().map(|&i| id(i)).collect()))
            .collect();

        let mut bookings = BTreeMap::new();
        for i in visible {
            let b = &cal.bookings[i];
            let spans = b
                .spans
                .iter()
                .map(|s| RangeView::render(s, zone))
                .collect::<Result<_, _>>()?;
            bookings.insert(
                keys[i].clone(),
                BookingView {
                    label: b.label.clone(),
                    status: b.status.clone(),
                    amount: b.amount.clone(),
                    party: b.party.clone(),
                    source: b.source,
                    spans,
                },
            );
        }

        Ok(Self {
            timezone: zone.name().to_string(),
            granularity_minutes: cal.granularity_minutes,
            days,
            cells,
            bookings,
            skipped: cal.skipped.clone(),
        })
    }
}

// ── Execution ────────────────────────────────────────────────────

fn encode<T: Serialize>(value: &T) -> Result<Value, ProtocolError> {
    serde_json::to_value(value).map_err(|e| ProtocolError::Encode(e.to_string()))
}

pub fn execute(cmd: Command, defaults: &ServiceDefaults) -> Result<Value, ProtocolError> {
    match cmd {
        Command::Ping => Ok(Value::String("pong".into())),
        Command::Merge { spans, timezone } => {
            let zone = defaults.zone(timezone.as_deref(), None)?;
            if spans.len() > MAX_SPANS_PER_REQUEST {
                return Err(CalendarError::LimitExceeded("too many spans").into());
            }
            let parsed = spans
                .iter()
                .enumerate()
                .map(|(index, r)| {
                    parse_span(r.start.as_deref(), r.end.as_deref())
                        .map_err(|error| ProtocolError::BadSpan { index, error })
                })
                .collect::<Result<Vec<_>, _>>()?;
            let merged = merge_spans(&parsed)
                .iter()
                .map(|s| RangeView::render(s, &zone))
                .collect::<Result<Vec<_>, _>>()?;
            encode(&merged)
        }
        Command::Expand {
            start,
            end,
            timezone,
            day_end,
        } => {
            let zone = defaults.zone(timezone.as_deref(), day_end)?;
            let span = parse_span(Some(start.as_str()), Some(end.as_str()))?;
            let slots = expand(span, &zone)?
                .into_iter()
                .map(|(date, s)| {
                    Ok(SlotView {
                        date: date.format("%Y-%m-%d").to_string(),
                        start: zone.format(s.start)?,
                        end: zone.format(s.end)?,
                    })
                })
                .collect::<Result<Vec<_>, CalendarError>>()?;
            encode(&slots)
        }
        Command::Calendar(req) => {
            if req.bookings.len() > MAX_BOOKINGS_PER_REQUEST {
                return Err(CalendarError::LimitExceeded("too many bookings").into());
            }
            let zone = defaults.zone(req.timezone.as_deref(), req.day_end)?;
            let window = match &req.window {
                Some(w) => {
                    let start = parse_instant(
                        w.start.as_deref().ok_or(SourceError::MissingField("window.start"))?,
                    )?;
                    let end = parse_instant(
                        w.end.as_deref().ok_or(SourceError::MissingField("window.end"))?,
                    )?;
                    Some(Span { start, end })
                }
                None => None,
            };
            let options = CalendarOptions {
                zone,
                granularity_minutes: req.granularity_minutes.unwrap_or(defaults.granularity_minutes),
                window,
                exclude_statuses: req.exclude_statuses,
            };
            // Reject bad options before adapting any record.
            options.validate()?;

            let (bookings, adapt_skipped) = parse_batch(req.bookings);
            let mut cal = build_calendar(bookings, &options)?;
            cal.skipped.absorb(adapt_skipped);
            encode(&CalendarView::render(&cal)?)
        }
    }
}
