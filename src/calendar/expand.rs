use chrono::NaiveDate;

use crate::model::*;
use crate::zone::Zone;

use super::CalendarError;

/// Split a span into one clipped sub-span per calendar day it touches.
///
/// Slots come out in date order and never cross a day boundary. A day whose
/// clipped part would be empty (span ending exactly at midnight) emits nothing.
pub fn expand(span: Span, zone: &Zone) -> Result<Vec<(NaiveDate, Span)>, CalendarError> {
    // Re-check: deserialized spans bypass `Span::new`.
    let span = Span::try_new(span.start, span.end)?;

    let last = zone.date_of(span.end)?;
    let mut cursor = zone.date_of(span.start)?;
    let mut slots = Vec::new();

    while cursor <= last {
        let day_start = zone.start_of_day(cursor)?;
        let day_end = zone.end_of_day(cursor)?;
        let slot_start = span.start.max(day_start);
        let slot_end = span.end.min(day_end);
        if slot_start < slot_end {
            slots.push((cursor, Span::new(slot_start, slot_end)));
        }
        cursor = match cursor.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }

    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zone::DayEnd;
    use chrono::{TimeZone, Utc};

    const H: Ms = 3_600_000;

    fn at(d: u32, h: u32, mi: u32) -> Ms {
        // May 2024: the 6th is a Monday.
        Utc.with_ymd_and_hms(2024, 5, d, h, mi, 0).unwrap().timestamp_millis()
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    #[test]
    fn single_day_is_a_no_op() {
        let span = Span::new(at(6, 9, 0), at(6, 17, 0));
        let slots = expand(span, &Zone::utc()).unwrap();
        assert_eq!(slots, vec![(date(6), span)]);
    }

    #[test]
    fn monday_night_to_wednesday_morning() {
        let span = Span::new(at(6, 22, 0), at(8, 2, 0));
        let slots = expand(span, &Zone::utc()).unwrap();
        assert_eq!(
            slots,
            vec![
                (date(6), Span::new(at(6, 22, 0), at(7, 0, 0) - 1)),
                (date(7), Span::new(at(7, 0, 0), at(8, 0, 0) - 1)),
                (date(8), Span::new(at(8, 0, 0), at(8, 2, 0))),
            ]
        );
    }

    #[test]
    fn exclusive_day_end_tiles_exactly() {
        let zone = Zone::utc().with_day_end(DayEnd::Exclusive);
        let span = Span::new(at(6, 22, 0), at(9, 5, 0));
        let slots = expand(span, &zone).unwrap();
        assert_eq!(slots.len(), 4);
        assert_eq!(slots[0].1.start, span.start);
        assert_eq!(slots.last().unwrap().1.end, span.end);
        for w in slots.windows(2) {
            assert_eq!(w[0].1.end, w[1].1.start, "no gap, no overlap");
        }
        let total: Ms = slots.iter().map(|(_, s)| s.duration_ms()).sum();
        assert_eq!(total, span.duration_ms());
    }

    #[test]
    fn inclusive_day_end_leaves_only_the_boundary_millisecond() {
        let span = Span::new(at(6, 12, 0), at(9, 12, 0));
        let slots = expand(span, &Zone::utc()).unwrap();
        let total: Ms = slots.iter().map(|(_, s)| s.duration_ms()).sum();
        // One millisecond per crossed midnight.
        assert_eq!(total, span.duration_ms() - 3);
        for (d, s) in &slots {
            assert_eq!(Zone::utc().date_of(s.start).unwrap(), *d);
            assert_eq!(Zone::utc().date_of(s.end).unwrap(), *d);
        }
    }

    #[test]
    fn ending_at_midnight_emits_no_empty_tail() {
        let span = Span::new(at(6, 20, 0), at(7, 0, 0));
        let slots = expand(span, &Zone::utc()).unwrap();
        assert_eq!(slots, vec![(date(6), Span::new(at(6, 20, 0), at(7, 0, 0) - 1))]);

        let exclusive = Zone::utc().with_day_end(DayEnd::Exclusive);
        let slots = expand(span, &exclusive).unwrap();
        assert_eq!(slots, vec![(date(6), span)]);
    }

    #[test]
    fn rejects_empty_and_inverted() {
        let bad = Span { start: at(6, 10, 0), end: at(6, 10, 0) };
        assert!(matches!(
            expand(bad, &Zone::utc()),
            Err(CalendarError::InvalidInterval { .. })
        ));
        let inverted = Span { start: at(6, 11, 0), end: at(6, 10, 0) };
        assert!(matches!(
            expand(inverted, &Zone::utc()),
            Err(CalendarError::InvalidInterval { .. })
        ));
    }

    #[test]
    fn rejects_spans_wider_than_a_year() {
        let span = Span { start: 0, end: 400 * 24 * H };
        assert!(matches!(
            expand(span, &Zone::utc()),
            Err(CalendarError::LimitExceeded(_))
        ));
    }

    #[test]
    fn day_keys_follow_the_zone() {
        // 23:00Z on the 6th is already the 7th in Berlin (UTC+2).
        let zone = Zone::parse("Europe/Berlin").unwrap();
        let span = Span::new(at(6, 23, 0), at(7, 1, 0));
        let slots = expand(span, &zone).unwrap();
        assert_eq!(slots, vec![(date(7), span)]);
    }

    #[test]
    fn spring_forward_day_is_one_slot() {
        let zone = Zone::parse("Europe/Berlin").unwrap().with_day_end(DayEnd::Exclusive);
        let d = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        let bounds = zone.day_bounds(d).unwrap();
        let slots = expand(bounds, &zone).unwrap();
        assert_eq!(slots, vec![(d, bounds)]);
        assert_eq!(bounds.duration_ms(), 23 * H);
    }
}
