use std::ops::RangeInclusive;

use chrono::NaiveDate;

use crate::limits::*;
use crate::model::*;
use crate::zone::Zone;

use super::CalendarError;

/// Reject granularities that do not tile a day or are too fine.
pub fn validate_granularity(minutes: u32) -> Result<(), CalendarError> {
    if minutes < MIN_GRANULARITY_MINUTES
        || minutes > MINUTES_PER_DAY
        || MINUTES_PER_DAY % minutes != 0
    {
        return Err(CalendarError::InvalidGranularity(minutes));
    }
    Ok(())
}

pub fn cells_per_day(granularity_minutes: u32) -> u32 {
    MINUTES_PER_DAY / granularity_minutes
}

/// Indices of the grid cells a same-day span occupies.
///
/// Cells are half-open wall-clock ranges, so a span ending on a cell
/// boundary does not occupy the next cell. On DST fall-back days the
/// wall clock may run backwards inside a span; the range then covers
/// both readings.
pub fn cells_touched(
    span: Span,
    date: NaiveDate,
    zone: &Zone,
    granularity_minutes: u32,
) -> Result<RangeInclusive<u32>, CalendarError> {
    let cell_ms = granularity_minutes as Ms * 60_000;
    let max_index = cells_per_day(granularity_minutes) as Ms - 1;

    let from = zone.local_ms_of_day(date, span.start)?;
    let to = zone.local_ms_of_day(date, span.end)?;
    let (lo, hi) = (from.min(to).max(0), from.max(to));

    let first = (lo / cell_ms).min(max_index);
    let last = ((hi + cell_ms - 1) / cell_ms - 1).clamp(first, max_index);
    Ok(first as u32..=last as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zone::DayEnd;
    use chrono::{TimeZone, Utc};

    fn at(h: u32, mi: u32) -> Ms {
        Utc.with_ymd_and_hms(2024, 5, 6, h, mi, 0).unwrap().timestamp_millis()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 6).unwrap()
    }

    #[test]
    fn granularity_must_tile_the_day() {
        assert!(validate_granularity(60).is_ok());
        assert!(validate_granularity(15).is_ok());
        assert!(validate_granularity(1440).is_ok());
        assert!(validate_granularity(0).is_err());
        assert!(validate_granularity(1).is_err());
        assert!(validate_granularity(7).is_err());
        assert!(validate_granularity(2880).is_err());
    }

    #[test]
    fn hour_aligned_span_occupies_its_hours_only() {
        let cells = cells_touched(Span::new(at(10, 0), at(11, 0)), day(), &Zone::utc(), 60).unwrap();
        assert_eq!(cells, 10..=10);
    }

    #[test]
    fn partial_hours_round_outwards() {
        let cells = cells_touched(Span::new(at(9, 30), at(11, 15)), day(), &Zone::utc(), 60).unwrap();
        assert_eq!(cells, 9..=11);
    }

    #[test]
    fn quarter_hour_grid() {
        let cells = cells_touched(Span::new(at(9, 30), at(10, 0)), day(), &Zone::utc(), 15).unwrap();
        assert_eq!(cells, 38..=39);
    }

    #[test]
    fn day_end_conventions_both_stop_at_last_cell() {
        let inclusive = Zone::utc();
        let end = inclusive.end_of_day(day()).unwrap();
        let cells = cells_touched(Span::new(at(22, 0), end), day(), &inclusive, 60).unwrap();
        assert_eq!(cells, 22..=23);

        let exclusive = Zone::utc().with_day_end(DayEnd::Exclusive);
        let end = exclusive.end_of_day(day()).unwrap();
        let cells = cells_touched(Span::new(at(22, 0), end), day(), &exclusive, 60).unwrap();
        assert_eq!(cells, 22..=23);
    }

    #[test]
    fn cells_use_local_wall_clock() {
        let zone = Zone::parse("Europe/Berlin").unwrap();
        // 08:00Z-09:00Z is 10:00-11:00 in Berlin.
        let cells = cells_touched(Span::new(at(8, 0), at(9, 0)), day(), &zone, 60).unwrap();
        assert_eq!(cells, 10..=10);
    }
}
