//! Property-based tests for the frame differs and the coalescer.
//! Checks coverage, span shape, and ordering for random frame pairs.
//!
//! Run with: cargo test -p framediff --test diff_properties

#![allow(clippy::arithmetic_side_effects)]
#![allow(clippy::indexing_slicing)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::cast_possible_truncation)]

use framediff::{
    coalesce, CoarseDiffer, ExactDiffer, FieldParity, FrameDiffer, FullFrame, Scan, Span, SpanList,
};
use platform::Framebuffer;
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Previous frame of `seed`-derived noise; current frame equals it except at
/// the `changes` positions (taken modulo the frame size).
fn pair(width: usize, height: usize, seed: u16, changes: &[(usize, usize)]) -> (Framebuffer, Framebuffer) {
    let mut prev = Framebuffer::new(width, height, width * 2).unwrap();
    for y in 0..height {
        for (x, px) in prev.row_mut(y).unwrap().iter_mut().enumerate() {
            *px = seed.wrapping_add((x * 31 + y * 7) as u16);
        }
    }
    let mut cur = prev.clone();
    for &(x, y) in changes {
        let (x, y) = (x % width, y % height);
        let px = &mut cur.row_mut(y).unwrap()[x];
        *px = !*px;
    }
    (cur, prev)
}

fn spans(differ: &dyn FrameDiffer, cur: &Framebuffer, prev: &Framebuffer, scan: Scan) -> SpanList {
    let mut list = SpanList::for_frame(cur.width(), cur.height());
    differ.diff(cur, prev, scan, &mut list).unwrap();
    list
}

fn changed(cur: &Framebuffer, prev: &Framebuffer, x: usize, y: usize) -> bool {
    cur.row(y).unwrap()[x] != prev.row(y).unwrap()[x]
}

fn covered(list: &SpanList, x: usize, y: usize) -> bool {
    list.iter().any(|s| s.contains(x as u16, y as u16))
}

fn in_order(list: &SpanList) -> bool {
    let all: Vec<Span> = list.iter().copied().collect();
    all.windows(2).all(|w| w[0].y <= w[1].y)
}

fn frame_strategy(width_step: usize) -> impl Strategy<Value = (usize, usize, u16, Vec<(usize, usize)>)> {
    (1usize..10, 1usize..8, any::<u16>(), proptest::collection::vec((0usize..64, 0usize..64), 0..40))
        .prop_map(move |(w, h, seed, changes)| (w * width_step, h, seed, changes))
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest::proptest! {
    /// Exact diff covers every changed pixel, each span starts and ends on a
    /// changed pixel, and unchanged runs inside a span stay within the gap
    /// budget (one pixel minimum from the pair compare).
    #[test]
    fn exact_diff_is_tight((width, height, seed, changes) in frame_strategy(3), threshold in 0usize..6) {
        let (cur, prev) = pair(width, height, seed, &changes);
        let list = spans(&ExactDiffer::new(threshold), &cur, &prev, Scan::Progressive);
        prop_assert!(in_order(&list));

        for y in 0..height {
            for x in 0..width {
                if changed(&cur, &prev, x, y) {
                    prop_assert!(covered(&list, x, y), "({}, {}) not covered", x, y);
                }
            }
        }
        let gap_budget = threshold.max(1);
        for span in &list {
            prop_assert!(span.is_well_formed());
            prop_assert!(!span.is_multiline());
            let y = usize::from(span.y);
            prop_assert!(changed(&cur, &prev, usize::from(span.x), y));
            prop_assert!(changed(&cur, &prev, usize::from(span.end_x) - 1, y));
            let mut gap = 0;
            for x in usize::from(span.x)..usize::from(span.end_x) {
                if changed(&cur, &prev, x, y) {
                    gap = 0;
                } else {
                    gap += 1;
                    prop_assert!(gap <= gap_budget);
                }
            }
        }
    }

    /// Coarse diff covers every changed pixel and trims both span ends to
    /// changed pixels.
    #[test]
    fn coarse_diff_covers_changes((width, height, seed, changes) in frame_strategy(4)) {
        let (cur, prev) = pair(width, height, seed, &changes);
        let list = spans(&CoarseDiffer, &cur, &prev, Scan::Progressive);
        prop_assert!(in_order(&list));

        for y in 0..height {
            for x in 0..width {
                if changed(&cur, &prev, x, y) {
                    prop_assert!(covered(&list, x, y));
                }
            }
        }
        for span in &list {
            prop_assert!(span.is_well_formed());
            let y = usize::from(span.y);
            prop_assert!(changed(&cur, &prev, usize::from(span.x), y));
            prop_assert!(changed(&cur, &prev, usize::from(span.end_x) - 1, y));
        }
    }

    /// Interlaced scans only touch rows of the selected field.
    #[test]
    fn interlaced_respects_parity((width, height, seed, changes) in frame_strategy(4), odd in any::<bool>()) {
        let (cur, prev) = pair(width, height, seed, &changes);
        let parity = if odd { FieldParity::Odd } else { FieldParity::Even };
        let want = usize::from(odd);
        for differ in [&ExactDiffer::new(4) as &dyn FrameDiffer, &CoarseDiffer] {
            let list = spans(differ, &cur, &prev, Scan::Interlaced(parity));
            for span in &list {
                prop_assert_eq!(usize::from(span.y) % 2, want);
            }
            for y in (want..height).step_by(2) {
                for x in 0..width {
                    if changed(&cur, &prev, x, y) {
                        prop_assert!(covered(&list, x, y));
                    }
                }
            }
        }
    }

    /// Diffing the same pair twice yields the same spans.
    #[test]
    fn diff_is_idempotent((width, height, seed, changes) in frame_strategy(4)) {
        let (cur, prev) = pair(width, height, seed, &changes);
        for differ in [&ExactDiffer::new(2) as &dyn FrameDiffer, &CoarseDiffer, &FullFrame] {
            let first: Vec<Span> = spans(differ, &cur, &prev, Scan::Progressive).iter().copied().collect();
            let second: Vec<Span> = spans(differ, &cur, &prev, Scan::Progressive).iter().copied().collect();
            prop_assert_eq!(first, second);
        }
    }

    /// Coalescing keeps every changed pixel covered, keeps y order, and never
    /// produces a merged span over the task cap.
    #[test]
    fn coalesce_stays_within_budget(
        (width, height, seed, changes) in frame_strategy(3),
        threshold in 0usize..12,
        cap_rows in 1usize..4,
    ) {
        let (cur, prev) = pair(width, height, seed, &changes);
        let mut list = spans(&ExactDiffer::new(4), &cur, &prev, Scan::Progressive);
        let before: Vec<Span> = list.iter().copied().collect();
        let max_task = width * 2 * cap_rows;
        let merges = coalesce(&mut list, threshold, max_task, 2);

        prop_assert_eq!(list.len() + merges, before.len());
        prop_assert!(in_order(&list));
        for span in &list {
            prop_assert!(span.is_well_formed());
            prop_assert!(before.contains(span) || span.size as usize * 2 <= max_task);
        }
        for original in &before {
            for y in original.y..original.end_y {
                for x in original.x..original.row_end(y) {
                    prop_assert!(covered(&list, usize::from(x), usize::from(y)));
                }
            }
        }
    }
}

#[test]
fn identical_frames_have_no_spans() {
    let (cur, prev) = pair(4, 4, 77, &[]);
    assert!(spans(&ExactDiffer::new(4), &cur, &prev, Scan::Progressive).is_empty());
    assert!(spans(&CoarseDiffer, &cur, &prev, Scan::Progressive).is_empty());
}

#[test]
fn single_changed_pixel_is_one_span() {
    let (cur, prev) = pair(4, 4, 0, &[(2, 1)]);
    let list = spans(&ExactDiffer::new(4), &cur, &prev, Scan::Progressive);
    let all: Vec<Span> = list.iter().copied().collect();
    assert_eq!(all.len(), 1);
    let span = all[0];
    assert_eq!((span.x, span.y, span.end_x, span.end_y, span.size), (2, 1, 3, 2, 1));
}

#[test]
fn adjacent_rows_coalesce_into_one_span() {
    let (cur, prev) = pair(16, 4, 5, &[(4, 1), (5, 1), (6, 1), (5, 2), (6, 2), (7, 2)]);
    let mut list = spans(&ExactDiffer::new(0), &cur, &prev, Scan::Progressive);
    assert_eq!(list.len(), 2);
    assert_eq!(coalesce(&mut list, 4, 65_528, 2), 1);
    let all: Vec<Span> = list.iter().copied().collect();
    assert_eq!(all, [Span::block(4, 1, 8, 3, 8)]);
    assert_eq!(all[0].size, 8);
}
