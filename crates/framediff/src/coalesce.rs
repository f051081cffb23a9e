//! Greedy span coalescing
//!
//! Merging two spans replaces them with their bounding span. The merge is
//! taken when the pixels it adds beyond the two originals stay within the
//! waste budget and the merged span still fits in one bus task. The pass is a
//! single greedy sweep: for each span, later spans are tried in order until
//! one starts below the current span's last row.

use crate::span::{Span, SpanList};

/// Bounding span of `a` and `b`, with the ragged last row taken from
/// whichever span reaches further down.
#[allow(clippy::cast_possible_truncation)] // Safety: all bounds come from u16 fields
fn merged_bounds(a: &Span, b: &Span) -> Span {
    let last_scan_end_x = if b.end_y > a.end_y {
        b.last_scan_end_x
    } else if a.end_y > b.end_y {
        a.last_scan_end_x
    } else {
        a.last_scan_end_x.max(b.last_scan_end_x)
    };
    Span::block(
        a.x.min(b.x),
        a.y.min(b.y),
        a.end_x.max(b.end_x),
        a.end_y.max(b.end_y),
        last_scan_end_x,
    )
}

/// Merge spans of `list` in place.
///
/// `waste_threshold` bounds the unchanged pixels a single merge may add;
/// `max_task_bytes` caps the payload of the merged span at
/// `size * bytes_per_pixel`. Returns the number of merges performed.
#[allow(clippy::arithmetic_side_effects)] // Safety: i64 arithmetic on u32 sizes cannot overflow
#[allow(clippy::cast_possible_wrap)] // usize thresholds are far below i64::MAX
pub fn coalesce(list: &mut SpanList, waste_threshold: usize, max_task_bytes: usize, bytes_per_pixel: usize) -> usize {
    let threshold = waste_threshold as i64;
    let max_bytes = max_task_bytes as i64;
    let bpp = bytes_per_pixel as i64;
    let mut merges = 0;

    let mut cursor = list.head();
    while let Some(i) = cursor {
        let mut prev = i;
        let mut candidate = list.next_of(i);
        while let Some(j) = candidate {
            let (Some(&a), Some(&b)) = (list.get(i), list.get(j)) else {
                break;
            };
            if b.y > a.end_y {
                break;
            }

            let merged = merged_bounds(&a, &b);
            let new_size = i64::from(merged.size);
            let waste = new_size - i64::from(a.size) - i64::from(b.size);
            if waste <= threshold && new_size * bpp <= max_bytes {
                list.replace_bounds(i, merged);
                list.unlink_after(prev);
                candidate = list.next_of(prev);
                merges += 1;
            } else {
                prev = j;
                candidate = list.next_of(j);
            }
        }
        cursor = list.next_of(i);
    }

    if merges > 0 {
        tracing::trace!(merges, remaining = list.len(), "coalesced spans");
    }
    merges
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn list_of(spans: &[Span]) -> SpanList {
        let mut list = SpanList::with_capacity(spans.len());
        for span in spans {
            list.push(*span);
        }
        list
    }

    fn collect(list: &SpanList) -> Vec<Span> {
        list.iter().copied().collect()
    }

    #[test]
    fn adjacent_rows_merge_into_block() {
        let mut list = list_of(&[Span::row(2, 6, 0), Span::row(3, 6, 1)]);
        assert_eq!(coalesce(&mut list, 4, 65_528, 2), 1);
        let spans = collect(&list);
        assert_eq!(spans, [Span::block(2, 0, 6, 2, 6)]);
        // one wasted pixel at (2, 1)
        assert_eq!(spans[0].size, 8);
    }

    #[test]
    fn same_row_gap_within_budget_merges() {
        let mut list = list_of(&[Span::row(0, 4, 3), Span::row(7, 9, 3)]);
        assert_eq!(coalesce(&mut list, 3, 1024, 2), 1);
        assert_eq!(collect(&list), [Span::row(0, 9, 3)]);
    }

    #[test]
    fn waste_over_budget_is_rejected() {
        let spans = [Span::row(0, 2, 0), Span::row(10, 12, 1)];
        let mut list = list_of(&spans);
        assert_eq!(coalesce(&mut list, 4, 65_528, 2), 0);
        assert_eq!(collect(&list), spans);
    }

    #[test]
    fn task_cap_is_respected() {
        let spans = [Span::row(0, 8, 0), Span::row(0, 8, 1)];
        let mut list = list_of(&spans);
        // merged span would need 32 bytes
        assert_eq!(coalesce(&mut list, 100, 31, 2), 0);
        assert_eq!(list.len(), 2);

        let mut list = list_of(&spans);
        assert_eq!(coalesce(&mut list, 100, 32, 2), 1);
        assert_eq!(collect(&list), [Span::block(0, 0, 8, 2, 8)]);
    }

    #[test]
    fn stops_scanning_below_current_span() {
        // the third span could merge for free but starts two rows down
        let spans = [Span::row(0, 4, 0), Span::row(20, 24, 0), Span::row(0, 4, 2)];
        let mut list = list_of(&spans);
        assert_eq!(coalesce(&mut list, 0, 65_528, 2), 0);
        assert_eq!(collect(&list), spans);
    }

    #[test]
    fn chained_merges_keep_y_order_and_tail() {
        let mut list = list_of(&[
            Span::row(0, 4, 0),
            Span::row(0, 4, 1),
            Span::row(0, 4, 2),
            Span::row(30, 32, 2),
        ]);
        assert_eq!(coalesce(&mut list, 0, 65_528, 2), 2);
        let spans = collect(&list);
        assert_eq!(spans, [Span::block(0, 0, 4, 3, 4), Span::row(30, 32, 2)]);
        assert!(spans.windows(2).all(|w| w[0].y <= w[1].y));
        // the tail survives and new pushes still link after it
        list.push(Span::row(1, 2, 5));
        assert_eq!(list.iter().count(), 3);
    }

    #[test]
    fn ragged_last_row_follows_lower_span() {
        let a = Span::block(0, 0, 10, 2, 10);
        let b = Span::row(0, 3, 2);
        let merged = merged_bounds(&a, &b);
        assert_eq!((merged.end_y, merged.last_scan_end_x, merged.size), (3, 3, 23));

        let taller = Span::block(0, 0, 10, 3, 5);
        let short = Span::row(2, 8, 1);
        let merged = merged_bounds(&taller, &short);
        assert_eq!((merged.end_y, merged.last_scan_end_x), (3, 5));
    }
}
