use crate::model::*;

// ── Interval merge ────────────────────────────────────────────────

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
/// Touching spans (`next.start == last.end`) are merged.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

/// Merge an unordered set of same-day spans. Precondition: every span has
/// `start < end`; malformed spans must be dropped by the caller.
pub fn merge_spans(spans: &[Span]) -> Vec<Span> {
    let mut sorted = spans.to_vec();
    sorted.sort_by_key(|s| s.start);
    merge_overlapping(&sorted)
}

/// Merge the slots of one day, remembering which slots fed each block.
pub fn merge_slots(slots: &[DaySlot]) -> Vec<MergedSlot> {
    let mut order: Vec<usize> = (0..slots.len()).collect();
    order.sort_by_key(|&i| slots[i].span.start);

    let mut merged: Vec<MergedSlot> = Vec::new();
    for i in order {
        let span = slots[i].span;
        if let Some(last) = merged.last_mut()
            && span.start <= last.span.end {
                last.span.end = last.span.end.max(span.end);
                last.members.push(i);
                continue;
            }
        merged.push(MergedSlot {
            span,
            members: vec![i],
        });
    }
    for block in &mut merged {
        block.members.sort_unstable();
    }
    merged
}

/// Remove sorted disjoint `to_remove` spans from sorted disjoint `base` spans.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

/// Sweep-line: the largest number of spans covering one instant.
/// Half-open, so back-to-back spans never count as concurrent.
pub fn peak_concurrency(spans: &[Span]) -> u32 {
    let mut events: Vec<(Ms, i32)> = Vec::with_capacity(spans.len() * 2);
    for s in spans {
        events.push((s.start, 1));
        events.push((s.end, -1));
    }
    // Ends sort before starts at the same instant.
    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut count: i32 = 0;
    let mut peak: i32 = 0;
    for (_, delta) in &events {
        count += delta;
        peak = peak.max(count);
    }
    peak as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const H: Ms = 3_600_000;
    const M: Ms = 60_000;

    fn slot(start: Ms, end: Ms, booking: usize) -> DaySlot {
        DaySlot {
            date: NaiveDate::from_ymd_opt(2024, 5, 6).unwrap(),
            span: Span::new(start, end),
            booking,
        }
    }

    fn is_sorted_disjoint(spans: &[Span]) -> bool {
        spans.windows(2).all(|w| w[0].end < w[1].start)
    }

    // ── merge_overlapping / merge_spans ──────────────────

    #[test]
    fn merge_overlapping_basic() {
        let spans = vec![
            Span::new(100, 300),
            Span::new(200, 400),
            Span::new(500, 600),
        ];
        let merged = merge_overlapping(&spans);
        assert_eq!(merged, vec![Span::new(100, 400), Span::new(500, 600)]);
    }

    #[test]
    fn touching_spans_merge() {
        let merged = merge_spans(&[Span::new(11 * H, 12 * H), Span::new(10 * H, 11 * H)]);
        assert_eq!(merged, vec![Span::new(10 * H, 12 * H)]);
    }

    #[test]
    fn gap_keeps_spans_apart() {
        let merged = merge_spans(&[Span::new(10 * H, 11 * H), Span::new(11 * H + 30 * M, 12 * H)]);
        assert_eq!(
            merged,
            vec![Span::new(10 * H, 11 * H), Span::new(11 * H + 30 * M, 12 * H)]
        );
    }

    #[test]
    fn three_bookings_one_day() {
        let merged = merge_spans(&[
            Span::new(12 * H, 13 * H),
            Span::new(9 * H, 10 * H),
            Span::new(9 * H + 30 * M, 11 * H),
        ]);
        assert_eq!(merged, vec![Span::new(9 * H, 11 * H), Span::new(12 * H, 13 * H)]);
    }

    #[test]
    fn merge_edge_cases() {
        assert!(merge_spans(&[]).is_empty());
        assert_eq!(merge_spans(&[Span::new(5, 9)]), vec![Span::new(5, 9)]);
        let same = vec![Span::new(5, 9); 4];
        assert_eq!(merge_spans(&same), vec![Span::new(5, 9)]);
    }

    #[test]
    fn contained_span_does_not_shrink_block() {
        let merged = merge_spans(&[Span::new(0, 1000), Span::new(100, 200)]);
        assert_eq!(merged, vec![Span::new(0, 1000)]);
    }

    #[test]
    fn merge_is_idempotent() {
        let input = vec![
            Span::new(700, 900),
            Span::new(0, 100),
            Span::new(50, 300),
            Span::new(300, 310),
            Span::new(500, 600),
            Span::new(550, 560),
        ];
        let once = merge_spans(&input);
        assert_eq!(merge_spans(&once), once);
        assert!(is_sorted_disjoint(&once));
    }

    #[test]
    fn merge_preserves_covered_instants() {
        let input = vec![
            Span::new(30, 45),
            Span::new(0, 10),
            Span::new(5, 20),
            Span::new(40, 60),
            Span::new(70, 71),
        ];
        let merged = merge_spans(&input);
        for t in -5..80 {
            let before = input.iter().any(|s| s.contains_instant(t));
            let after = merged.iter().any(|s| s.contains_instant(t));
            assert_eq!(before, after, "instant {t}");
        }
    }

    // ── merge_slots ──────────────────────────────────────

    #[test]
    fn merge_slots_tracks_members() {
        let slots = vec![
            slot(12 * H, 13 * H, 2),
            slot(9 * H, 10 * H, 0),
            slot(9 * H + 30 * M, 11 * H, 1),
        ];
        let merged = merge_slots(&slots);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].span, Span::new(9 * H, 11 * H));
        assert_eq!(merged[0].members, vec![1, 2]);
        assert_eq!(merged[1].span, Span::new(12 * H, 13 * H));
        assert_eq!(merged[1].members, vec![0]);
    }

    #[test]
    fn every_slot_lands_in_exactly_one_block() {
        let slots = vec![
            slot(0, 10, 0),
            slot(10, 20, 1),
            slot(30, 40, 2),
            slot(35, 36, 3),
            slot(50, 51, 4),
        ];
        let merged = merge_slots(&slots);
        let mut seen = vec![0; slots.len()];
        for block in &merged {
            for &m in &block.members {
                seen[m] += 1;
                assert!(block.span.contains_span(&slots[m].span));
            }
        }
        assert!(seen.iter().all(|&n| n == 1));
    }

    #[test]
    fn merge_slots_empty() {
        assert!(merge_slots(&[]).is_empty());
    }

    // ── subtract_intervals ───────────────────────────────

    #[test]
    fn subtract_middle_punch() {
        let base = vec![Span::new(100, 300)];
        let remove = vec![Span::new(150, 200)];
        let result = subtract_intervals(&base, &remove);
        assert_eq!(result, vec![Span::new(100, 150), Span::new(200, 300)]);
    }

    #[test]
    fn subtract_multiple_punches() {
        let base = vec![Span::new(0, 1000)];
        let remove = vec![
            Span::new(100, 200),
            Span::new(400, 500),
            Span::new(800, 900),
        ];
        let result = subtract_intervals(&base, &remove);
        assert_eq!(
            result,
            vec![
                Span::new(0, 100),
                Span::new(200, 400),
                Span::new(500, 800),
                Span::new(900, 1000),
            ]
        );
    }

    #[test]
    fn subtract_full_overlap() {
        let result = subtract_intervals(&[Span::new(100, 200)], &[Span::new(50, 250)]);
        assert!(result.is_empty());
    }

    // ── peak_concurrency ─────────────────────────────────

    #[test]
    fn peak_counts_overlap_depth() {
        let spans = vec![Span::new(0, 100), Span::new(25, 75), Span::new(50, 150)];
        assert_eq!(peak_concurrency(&spans), 3);
    }

    #[test]
    fn peak_ignores_back_to_back() {
        let spans = vec![Span::new(0, 100), Span::new(100, 200)];
        assert_eq!(peak_concurrency(&spans), 1);
        assert_eq!(peak_concurrency(&[]), 0);
    }
}
