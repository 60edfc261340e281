mod cells;
mod error;
mod expand;
mod merge;

pub use cells::{cells_per_day, cells_touched, validate_granularity};
pub use error::CalendarError;
pub use expand::expand;
pub use merge::{merge_overlapping, merge_slots, merge_spans, peak_concurrency, subtract_intervals};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::RangeInclusive;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, warn};

use crate::limits::*;
use crate::model::*;
use crate::zone::Zone;

/// Inputs of one calendar pass besides the bookings themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarOptions {
    pub zone: Zone,
    /// Grid cell size; must divide a day. 60 gives `date_hour` cells.
    pub granularity_minutes: u32,
    /// Visible range; spans are clipped to it and everything outside is ignored.
    pub window: Option<Span>,
    /// Bookings in these states are left off the calendar entirely.
    pub exclude_statuses: Vec<BookingStatus>,
}

impl Default for CalendarOptions {
    fn default() -> Self {
        Self {
            zone: Zone::utc(),
            granularity_minutes: 60,
            window: None,
            exclude_statuses: Vec::new(),
        }
    }
}

impl CalendarOptions {
    pub fn new(zone: Zone) -> Self {
        Self {
            zone,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), CalendarError> {
        validate_granularity(self.granularity_minutes)?;
        if let Some(w) = &self.window {
            if w.start >= w.end {
                return Err(CalendarError::InvalidInterval {
                    start: w.start,
                    end: w.end,
                });
            }
            if w.duration_ms() > MAX_VIEW_WINDOW_MS {
                return Err(CalendarError::LimitExceeded("view window too wide"));
            }
        }
        Ok(())
    }
}

/// Records and spans left out of a pass, by reason.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Skipped {
    /// Whole bookings dropped because none of their spans survived.
    pub records: usize,
    /// Individual spans dropped.
    pub spans: usize,
    /// Bookings left out by the status filter (not malformed).
    pub filtered: usize,
    pub reasons: BTreeMap<&'static str, usize>,
}

impl Skipped {
    pub fn record(&mut self, reason: &'static str) {
        *self.reasons.entry(reason).or_default() += 1;
        metrics::counter!(crate::observability::RECORDS_SKIPPED_TOTAL, "reason" => reason)
            .increment(1);
    }

    pub fn absorb(&mut self, other: Skipped) {
        self.records += other.records;
        self.spans += other.spans;
        self.filtered += other.filtered;
        for (reason, n) in other.reasons {
            *self.reasons.entry(reason).or_default() += n;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0 && self.spans == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DaySummary {
    /// Distinct bookings with at least one slot on the day.
    pub bookings: usize,
    /// Merged blocks.
    pub blocks: usize,
    pub occupied_ms: Ms,
    /// Most bookings overlapping at any instant.
    pub peak_concurrency: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayBucket {
    pub date: NaiveDate,
    /// Clipped slots ordered by start; `MergedSlot::members` index into this.
    pub slots: Vec<DaySlot>,
    /// Ascending, pairwise disjoint.
    pub merged: Vec<MergedSlot>,
    pub summary: DaySummary,
}

impl DayBucket {
    /// Booking indices behind a merged block, ascending and deduplicated.
    pub fn booking_indices(&self, block: &MergedSlot) -> Vec<usize> {
        let mut ids: Vec<usize> = block.members.iter().map(|&m| self.slots[m].booking).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

/// Result of one calendar pass. Owns every structure it references;
/// all back-references are indices into `bookings` or a bucket's `slots`.
#[derive(Debug, Clone)]
pub struct Calendar {
    pub zone: Zone,
    pub granularity_minutes: u32,
    pub bookings: Vec<Booking>,
    pub days: BTreeMap<NaiveDate, DayBucket>,
    /// Grid cell → booking indices occupying it.
    pub cells: BTreeMap<CellKey, Vec<usize>>,
    pub skipped: Skipped,
}

impl Calendar {
    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn day(&self, date: NaiveDate) -> Option<&DayBucket> {
        self.days.get(&date)
    }

    pub fn cell(&self, key: CellKey) -> &[usize] {
        self.cells.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn bookings_at(&self, date: NaiveDate, index: u32) -> impl Iterator<Item = &Booking> {
        self.cell(CellKey::new(date, index))
            .iter()
            .map(move |&i| &self.bookings[i])
    }

    pub fn bookings_in(&self, bucket: &DayBucket, block: &MergedSlot) -> Vec<&Booking> {
        bucket
            .booking_indices(block)
            .into_iter()
            .map(|i| &self.bookings[i])
            .collect()
    }

    /// Render keys for `bookings`, index-aligned. An id shared by bookings
    /// from different sources is prefixed with its source (`venue:1`).
    pub fn booking_keys(&self) -> Vec<String> {
        let mut uses: HashMap<&str, usize> = HashMap::new();
        for b in &self.bookings {
            *uses.entry(b.id.as_str()).or_default() += 1;
        }
        self.bookings
            .iter()
            .map(|b| {
                if uses[b.id.as_str()] > 1 {
                    format!("{}:{}", source_label(b.source), b.id)
                } else {
                    b.id.clone()
                }
            })
            .collect()
    }

    /// Unoccupied parts of a day. A day without bookings is entirely free.
    pub fn free_spans(&self, date: NaiveDate) -> Result<Vec<Span>, CalendarError> {
        let bounds = self.zone.day_bounds(date)?;
        let occupied: Vec<Span> = self
            .day(date)
            .map(|b| b.merged.iter().map(|m| m.span).collect())
            .unwrap_or_default();
        Ok(subtract_intervals(&[bounds], &occupied))
    }
}

/// Expand, bucket by day, merge per day and index grid cells.
///
/// Bad spans and records are counted in `Calendar::skipped` and never abort
/// the pass; only invalid options, oversized input or a pass that would
/// exceed the slot and cell budgets are errors.
pub fn build_calendar(
    bookings: Vec<Booking>,
    options: &CalendarOptions,
) -> Result<Calendar, CalendarError> {
    options.validate()?;
    if bookings.len() > MAX_BOOKINGS_PER_REQUEST {
        return Err(CalendarError::LimitExceeded("too many bookings"));
    }
    let started = std::time::Instant::now();
    let zone = &options.zone;
    let mut skipped = Skipped::default();

    let total = bookings.len();
    let bookings: Vec<Booking> = bookings
        .into_iter()
        .filter(|b| !options.exclude_statuses.contains(&b.status))
        .collect();
    skipped.filtered = total - bookings.len();

    // A repeated (source, id) pair is the same booking sent twice
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(bookings.len());
    for booking in bookings {
        if seen.insert((booking.source, booking.id.clone())) {
            unique.push(booking);
        } else {
            warn!(booking = %booking.id, "skipping booking: duplicate id");
            skipped.records += 1;
            skipped.record("duplicate_id");
        }
    }
    let bookings = unique;

    // Step 1: expand every span into day slots, grouped by date
    let mut by_day: BTreeMap<NaiveDate, Vec<DaySlot>> = BTreeMap::new();
    let mut total_slots = 0usize;
    for (bi, booking) in bookings.iter().enumerate() {
        if booking.spans.len() > MAX_SPANS_PER_BOOKING {
            warn!(booking = %booking.id, spans = booking.spans.len(), "skipping booking: too many spans");
            skipped.records += 1;
            skipped.record("too_many_spans");
            continue;
        }

        let mut valid = 0usize;
        let mut hidden = 0usize;
        let mut emitted = 0usize;
        for raw in &booking.spans {
            let span = match Span::try_new(raw.start, raw.end) {
                Ok(span) => span,
                Err(e) => {
                    warn!(booking = %booking.id, "skipping span: {e}");
                    skipped.spans += 1;
                    skipped.record(e.reason());
                    continue;
                }
            };
            valid += 1;
            let visible = match &options.window {
                Some(window) => match span.intersect(window) {
                    Some(clipped) => clipped,
                    None => {
                        hidden += 1;
                        continue;
                    }
                },
                None => span,
            };
            match expand(visible, zone) {
                Ok(pieces) => {
                    total_slots += pieces.len();
                    if total_slots > MAX_SLOTS_PER_REQUEST {
                        return Err(CalendarError::LimitExceeded("too many day slots"));
                    }
                    emitted += pieces.len();
                    for (date, piece) in pieces {
                        by_day.entry(date).or_default().push(DaySlot {
                            date,
                            span: piece,
                            booking: bi,
                        });
                    }
                }
                Err(e) => {
                    warn!(booking = %booking.id, "skipping span: {e}");
                    skipped.spans += 1;
                    skipped.record(e.reason());
                }
            }
        }

        if valid == 0 {
            if booking.spans.is_empty() {
                warn!(booking = %booking.id, "skipping booking: no spans");
                skipped.record("no_spans");
            }
            skipped.records += 1;
        } else if emitted == 0 && hidden < valid {
            // Valid spans that leave nothing to draw, such as the excluded last millisecond of a day
            warn!(booking = %booking.id, "skipping booking: no visible slots");
            skipped.records += 1;
            skipped.record("no_visible_slots");
        }
    }

    // Step 2: merge per day, then index cells from the merged blocks
    let mut days = BTreeMap::new();
    let mut cells: BTreeMap<CellKey, Vec<usize>> = BTreeMap::new();
    let mut cell_entries = 0usize;
    for (date, mut slots) in by_day {
        slots.sort_by_key(|s| (s.span.start, s.span.end, s.booking));
        let merged = merge_slots(&slots);

        let ranges: Vec<Option<RangeInclusive<u32>>> = slots
            .iter()
            .map(|s| match cells_touched(s.span, date, zone, options.granularity_minutes) {
                Ok(range) => Some(range),
                Err(e) => {
                    warn!(%date, "slot left out of grid: {e}");
                    skipped.record(e.reason());
                    None
                }
            })
            .collect();

        for block in &merged {
            let Some(block_range) = block
                .members
                .iter()
                .filter_map(|&m| ranges[m].clone())
                .reduce(|a, b| (*a.start()).min(*b.start())..=(*a.end()).max(*b.end()))
            else {
                continue;
            };
            for index in block_range {
                let mut occupants: Vec<usize> = block
                    .members
                    .iter()
                    .filter(|&&m| ranges[m].as_ref().is_some_and(|r| r.contains(&index)))
                    .map(|&m| slots[m].booking)
                    .collect();
                if occupants.is_empty() {
                    continue;
                }
                occupants.sort_unstable();
                occupants.dedup();
                cell_entries += occupants.len();
                if cell_entries > MAX_CELLS_PER_REQUEST {
                    return Err(CalendarError::LimitExceeded("too many grid cells"));
                }
                cells.insert(CellKey::new(date, index), occupants);
            }
        }

        let summary = summarize(&slots, &merged);
        days.insert(
            date,
            DayBucket {
                date,
                slots,
                merged,
                summary,
            },
        );
    }

    metrics::histogram!(crate::observability::CALENDAR_BUILD_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    debug!(
        bookings = bookings.len(),
        days = days.len(),
        cells = cells.len(),
        skipped_records = skipped.records,
        skipped_spans = skipped.spans,
        filtered = skipped.filtered,
        "calendar built"
    );

    Ok(Calendar {
        zone: *zone,
        granularity_minutes: options.granularity_minutes,
        bookings,
        days,
        cells,
        skipped,
    })
}

fn source_label(source: SourceKind) -> &'static str {
    match source {
        SourceKind::Location => "location",
        SourceKind::Venue => "venue",
        SourceKind::Canonical => "canonical",
    }
}

fn summarize(slots: &[DaySlot], merged: &[MergedSlot]) -> DaySummary {
    let mut distinct: Vec<usize> = slots.iter().map(|s| s.booking).collect();
    distinct.sort_unstable();
    distinct.dedup();
    let spans: Vec<Span> = slots.iter().map(|s| s.span).collect();
    DaySummary {
        bookings: distinct.len(),
        blocks: merged.len(),
        occupied_ms: merged.iter().map(|m| m.span.duration_ms()).sum(),
        peak_concurrency: peak_concurrency(&spans),
    }
}
