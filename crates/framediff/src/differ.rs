//! Frame differencing: current vs previous framebuffer to a span list
//!
//! Three interchangeable strategies sit behind [`FrameDiffer`]:
//!
//! - [`ExactDiffer`] compares pixel pairs, then single pixels, and keeps a
//!   run open across up to `merge_threshold` unchanged pixels.
//! - [`CoarseDiffer`] compares four pixels per 64-bit word and uses bit scans
//!   of the XOR to trim the run to its first and last differing pixel. It has
//!   no gap tolerance: a fully unchanged word always ends a run.
//! - [`FullFrame`] skips diffing and reports the whole frame as changed.
//!
//! All strategies emit spans in increasing `y`, then increasing `x`, and
//! visit every row or, for interlaced updates, every other row.

use alloc::boxed::Box;
use core::iter::StepBy;
use core::ops::Range;

use platform::{DiffMode, Framebuffer};

use crate::span::{Span, SpanList};

// ---------------------------------------------------------------------------
// Scan selection
// ---------------------------------------------------------------------------

/// Which field of an interlaced update to scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldParity {
    /// Rows 0, 2, 4, ...
    #[default]
    Even,
    /// Rows 1, 3, 5, ...
    Odd,
}

impl FieldParity {
    /// The other field.
    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            Self::Even => Self::Odd,
            Self::Odd => Self::Even,
        }
    }

    fn first_row(self) -> usize {
        match self {
            Self::Even => 0,
            Self::Odd => 1,
        }
    }
}

/// Progressive (all rows) or interlaced (one field) scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scan {
    /// Every row.
    #[default]
    Progressive,
    /// Every other row, starting at the field's first row.
    Interlaced(FieldParity),
}

impl Scan {
    /// Rows visited for a frame of `height` rows.
    pub fn rows(self, height: usize) -> StepBy<Range<usize>> {
        match self {
            Self::Progressive => (0..height).step_by(1),
            Self::Interlaced(parity) => (parity.first_row().min(height)..height).step_by(2),
        }
    }

    /// `true` for interlaced scanning.
    pub fn is_interlaced(self) -> bool {
        matches!(self, Self::Interlaced(_))
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Diff errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffError {
    /// The two framebuffers do not share one geometry.
    GeometryMismatch,
}

#[cfg(feature = "std")]
impl std::error::Error for DiffError {}

impl core::fmt::Display for DiffError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::GeometryMismatch => write!(f, "current and previous frames differ in geometry"),
        }
    }
}

/// Turns a (current, previous) framebuffer pair into changed spans.
pub trait FrameDiffer {
    /// Clear `spans` and fill it with the regions where `current` differs
    /// from `previous` on the rows selected by `scan`. Returns the span count.
    fn diff(
        &self,
        current: &Framebuffer,
        previous: &Framebuffer,
        scan: Scan,
        spans: &mut SpanList,
    ) -> Result<usize, DiffError>;

    /// Strategy name for logs.
    fn name(&self) -> &'static str;
}

fn check_geometry(current: &Framebuffer, previous: &Framebuffer) -> Result<(), DiffError> {
    if current.width() != previous.width()
        || current.height() != previous.height()
        || current.stride_pixels() != previous.stride_pixels()
    {
        return Err(DiffError::GeometryMismatch);
    }
    Ok(())
}

#[allow(clippy::cast_possible_truncation)] // Safety: geometry is validated to fit controller RAM (u16)
fn row_span(start: usize, end: usize, y: usize) -> Span {
    Span::row(start as u16, end as u16, y as u16)
}

// ---------------------------------------------------------------------------
// Exact
// ---------------------------------------------------------------------------

/// Pixel-exact differ with gap merging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExactDiffer {
    merge_threshold: usize,
}

impl ExactDiffer {
    /// A differ that keeps a run open across up to `merge_threshold`
    /// consecutive unchanged pixels.
    pub fn new(merge_threshold: usize) -> Self {
        Self { merge_threshold }
    }

    /// Emit the spans of one row.
    #[allow(clippy::arithmetic_side_effects)] // Safety: x < width <= row.len(), increments stay <= width + 1
    fn diff_row(&self, cur: &[u16], prev: &[u16], y: usize, spans: &mut SpanList) {
        let width = cur.len().min(prev.len());
        let changed = |x: usize| cur.get(x) != prev.get(x);
        let mut x = 0;
        while x < width {
            let start;
            let mut end;
            if x + 1 < width {
                // Both pixels of the pair at once.
                let pair = |row: &[u16]| -> u32 {
                    match row.get(x..x + 2) {
                        Some([a, b]) => u32::from(*a) | (u32::from(*b) << 16),
                        _ => 0,
                    }
                };
                let diff = pair(cur) ^ pair(prev);
                if diff == 0 {
                    x += 2;
                    continue;
                }

                let mut unchanged = 0;
                if diff & 0xFFFF == 0 {
                    start = x + 1;
                    end = x + 2;
                } else {
                    start = x;
                    if diff & 0xFFFF_0000 == 0 {
                        end = x + 1;
                        unchanged = 1;
                    } else {
                        end = x + 2;
                    }
                }
                x += 2;

                while x < width {
                    let differs = changed(x);
                    x += 1;
                    if differs {
                        end = x;
                        unchanged = 0;
                    } else {
                        unchanged += 1;
                        if unchanged > self.merge_threshold {
                            break;
                        }
                    }
                }
            } else {
                // Odd trailing pixel.
                let differs = changed(x);
                x += 1;
                if !differs {
                    continue;
                }
                start = x - 1;
                end = x;
            }
            spans.push(row_span(start, end, y));
        }
    }
}

impl FrameDiffer for ExactDiffer {
    fn diff(
        &self,
        current: &Framebuffer,
        previous: &Framebuffer,
        scan: Scan,
        spans: &mut SpanList,
    ) -> Result<usize, DiffError> {
        check_geometry(current, previous)?;
        spans.clear();
        for y in scan.rows(current.height()) {
            if let (Some(cur), Some(prev)) = (current.row(y), previous.row(y)) {
                self.diff_row(cur, prev, y, spans);
            }
        }
        Ok(spans.len())
    }

    fn name(&self) -> &'static str {
        "exact"
    }
}

// ---------------------------------------------------------------------------
// Coarse
// ---------------------------------------------------------------------------

/// Four-pixels-per-word differ.
///
/// Requires `width % 4 == 0` and a stride that is a multiple of 8 bytes; see
/// [`Framebuffer::supports_word_view`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoarseDiffer;

/// Bring pixel 0 of a native-endian word into the low 16-bit lane.
#[inline]
fn lanes(word: u64) -> u64 {
    u64::from_le(word)
}

impl CoarseDiffer {
    /// Emit the spans of one row given as words.
    #[allow(clippy::arithmetic_side_effects)] // Safety: x < words, pixel indices < 4 * words <= width
    fn diff_row(cur: &[u64], prev: &[u64], y: usize, spans: &mut SpanList) {
        let words = cur.len().min(prev.len());
        let xor = |x: usize| match (cur.get(x), prev.get(x)) {
            (Some(a), Some(b)) => lanes(a ^ b),
            _ => 0,
        };
        let mut x = 0;
        while x < words {
            let first = xor(x);
            if first == 0 {
                x += 1;
                continue;
            }
            let start = x * 4 + (first.trailing_zeros() / 16) as usize;
            x += 1;
            while x < words && xor(x) != 0 {
                x += 1;
            }
            // Word x - 1 is the last one that differs.
            let last = xor(x - 1);
            let end = x * 4 - (last.leading_zeros() / 16) as usize;
            // Word x (if any) is known equal.
            x += 1;
            spans.push(row_span(start, end, y));
        }
    }
}

impl FrameDiffer for CoarseDiffer {
    fn diff(
        &self,
        current: &Framebuffer,
        previous: &Framebuffer,
        scan: Scan,
        spans: &mut SpanList,
    ) -> Result<usize, DiffError> {
        check_geometry(current, previous)?;
        spans.clear();
        for y in scan.rows(current.height()) {
            if let (Some(cur), Some(prev)) = (current.row_words(y), previous.row_words(y)) {
                Self::diff_row(cur, prev, y, spans);
            }
        }
        Ok(spans.len())
    }

    fn name(&self) -> &'static str {
        "coarse"
    }
}

// ---------------------------------------------------------------------------
// No diff
// ---------------------------------------------------------------------------

/// Reports the whole frame as one changed span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FullFrame;

/// Replace the contents of `spans` with a single span covering the frame.
#[allow(clippy::cast_possible_truncation)] // Safety: geometry is validated to fit controller RAM (u16)
pub fn full_frame(width: usize, height: usize, spans: &mut SpanList) {
    spans.clear();
    spans.push(Span::block(0, 0, width as u16, height as u16, width as u16));
}

impl FrameDiffer for FullFrame {
    fn diff(
        &self,
        current: &Framebuffer,
        previous: &Framebuffer,
        _scan: Scan,
        spans: &mut SpanList,
    ) -> Result<usize, DiffError> {
        check_geometry(current, previous)?;
        full_frame(current.width(), current.height(), spans);
        Ok(1)
    }

    fn name(&self) -> &'static str {
        "full"
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Pick the strategy for `mode` and the frame geometry.
///
/// `Auto` prefers the coarse differ whenever the geometry supports the word
/// view. An explicit `Coarse` request on an unsuitable geometry falls back to
/// the exact differ.
pub fn select(mode: DiffMode, frame: &Framebuffer, merge_threshold: usize) -> Box<dyn FrameDiffer + Send + Sync> {
    match mode {
        DiffMode::Full => Box::new(FullFrame),
        DiffMode::Exact => Box::new(ExactDiffer::new(merge_threshold)),
        DiffMode::Auto if frame.supports_word_view() => Box::new(CoarseDiffer),
        DiffMode::Auto => Box::new(ExactDiffer::new(merge_threshold)),
        DiffMode::Coarse if frame.supports_word_view() => Box::new(CoarseDiffer),
        DiffMode::Coarse => {
            tracing::warn!(
                width = frame.width(),
                stride_bytes = frame.stride_bytes(),
                "coarse diff needs width % 4 == 0 and stride % 8 == 0, using exact"
            );
            Box::new(ExactDiffer::new(merge_threshold))
        }
    }
}

/// Number of visible pixels that differ between the two frames.
pub fn count_changed_pixels(current: &Framebuffer, previous: &Framebuffer) -> usize {
    (0..current.height())
        .filter_map(|y| Some((current.row(y)?, previous.row(y)?)))
        .map(|(cur, prev)| cur.iter().zip(prev).filter(|(a, b)| a != b).count())
        .sum()
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    fn frame(width: usize, height: usize) -> Framebuffer {
        Framebuffer::new(width, height, width * 2).unwrap()
    }

    fn set(fb: &mut Framebuffer, x: usize, y: usize, v: u16) {
        fb.row_mut(y).unwrap()[x] = v;
    }

    fn spans_of(d: &dyn FrameDiffer, cur: &Framebuffer, prev: &Framebuffer, scan: Scan) -> Vec<Span> {
        let mut list = SpanList::for_frame(cur.width(), cur.height());
        d.diff(cur, prev, scan, &mut list).unwrap();
        list.iter().copied().collect()
    }

    #[test]
    fn exact_single_pixel() {
        let prev = frame(4, 4);
        let mut cur = frame(4, 4);
        set(&mut cur, 2, 1, 0xFFFF);
        let spans = spans_of(&ExactDiffer::new(4), &cur, &prev, Scan::Progressive);
        assert_eq!(spans, [Span::row(2, 3, 1)]);
    }

    #[test]
    fn exact_second_pixel_of_pair() {
        let prev = frame(6, 1);
        let mut cur = frame(6, 1);
        set(&mut cur, 1, 0, 1);
        let spans = spans_of(&ExactDiffer::new(0), &cur, &prev, Scan::Progressive);
        assert_eq!(spans, [Span::row(1, 2, 0)]);
    }

    #[test]
    fn exact_bridges_small_gaps_only() {
        let prev = frame(16, 1);
        let mut cur = frame(16, 1);
        for x in [0, 3, 12] {
            set(&mut cur, x, 0, 7);
        }
        // gap of 2 bridged, gap of 8 not
        let spans = spans_of(&ExactDiffer::new(2), &cur, &prev, Scan::Progressive);
        assert_eq!(spans, [Span::row(0, 4, 0), Span::row(12, 13, 0)]);
    }

    #[test]
    fn exact_zero_threshold_bridges_only_the_pair_gap() {
        let prev = frame(10, 1);
        let mut cur = frame(10, 1);
        for x in [0, 2, 5, 7] {
            set(&mut cur, x, 0, 3);
        }
        // pixel 1 sits in the pair opened by pixel 0 and is carried over;
        // pixel 6 is a gap found while scanning and splits the run
        let spans = spans_of(&ExactDiffer::new(0), &cur, &prev, Scan::Progressive);
        assert_eq!(spans, [Span::row(0, 3, 0), Span::row(5, 6, 0), Span::row(7, 8, 0)]);
    }

    #[test]
    fn exact_odd_width_checks_last_pixel() {
        let prev = frame(5, 2);
        let mut cur = frame(5, 2);
        set(&mut cur, 4, 1, 9);
        let spans = spans_of(&ExactDiffer::new(4), &cur, &prev, Scan::Progressive);
        assert_eq!(spans, [Span::row(4, 5, 1)]);

        // unchanged trailing pixel produces nothing
        let spans = spans_of(&ExactDiffer::new(4), &prev, &prev, Scan::Progressive);
        assert!(spans.is_empty());
    }

    #[test]
    fn coarse_trims_to_changed_pixels() {
        let prev = frame(16, 1);
        let mut cur = frame(16, 1);
        set(&mut cur, 5, 0, 1);
        set(&mut cur, 10, 0, 1);
        let spans = spans_of(&CoarseDiffer, &cur, &prev, Scan::Progressive);
        assert_eq!(spans, [Span::row(5, 11, 0)]);
    }

    #[test]
    fn coarse_run_to_row_end() {
        let prev = frame(8, 1);
        let mut cur = frame(8, 1);
        set(&mut cur, 3, 0, 1);
        set(&mut cur, 6, 0, 1);
        let spans = spans_of(&CoarseDiffer, &cur, &prev, Scan::Progressive);
        assert_eq!(spans, [Span::row(3, 7, 0)]);
    }

    #[test]
    fn coarse_has_no_gap_tolerance() {
        let prev = frame(12, 1);
        let mut cur = frame(12, 1);
        set(&mut cur, 3, 0, 1);
        set(&mut cur, 8, 0, 1);
        let spans = spans_of(&CoarseDiffer, &cur, &prev, Scan::Progressive);
        assert_eq!(spans, [Span::row(3, 4, 0), Span::row(8, 9, 0)]);
    }

    #[test]
    fn interlaced_scans_one_field() {
        let prev = frame(4, 4);
        let mut cur = frame(4, 4);
        for y in 0..4 {
            set(&mut cur, 0, y, 1);
        }
        let even = spans_of(&ExactDiffer::new(4), &cur, &prev, Scan::Interlaced(FieldParity::Even));
        assert_eq!(even.iter().map(|s| s.y).collect::<Vec<_>>(), [0, 2]);
        let odd = spans_of(&CoarseDiffer, &cur, &prev, Scan::Interlaced(FieldParity::Odd));
        assert_eq!(odd.iter().map(|s| s.y).collect::<Vec<_>>(), [1, 3]);
    }

    #[test]
    fn full_frame_covers_everything() {
        let fb = frame(6, 3);
        let spans = spans_of(&FullFrame, &fb, &fb, Scan::Progressive);
        assert_eq!(spans, [Span::block(0, 0, 6, 3, 6)]);
        assert_eq!(spans[0].size, 18);
    }

    #[test]
    fn geometry_mismatch_is_an_error() {
        let a = frame(4, 4);
        let b = frame(4, 5);
        let mut list = SpanList::with_capacity(1);
        assert_eq!(
            ExactDiffer::new(0).diff(&a, &b, Scan::Progressive, &mut list),
            Err(DiffError::GeometryMismatch)
        );
    }

    #[test]
    fn select_follows_geometry() {
        assert_eq!(select(DiffMode::Auto, &frame(8, 2), 4).name(), "coarse");
        assert_eq!(select(DiffMode::Auto, &frame(6, 2), 4).name(), "exact");
        assert_eq!(select(DiffMode::Coarse, &frame(6, 2), 4).name(), "exact");
        assert_eq!(select(DiffMode::Exact, &frame(8, 2), 4).name(), "exact");
        assert_eq!(select(DiffMode::Full, &frame(8, 2), 4).name(), "full");
    }

    #[test]
    fn counts_changed_pixels_ignoring_padding() {
        let mut prev = Framebuffer::new(3, 2, 8).unwrap();
        let mut cur = prev.clone();
        set(&mut cur, 0, 0, 1);
        set(&mut cur, 2, 1, 1);
        // padding differences do not count
        cur.pixels_mut()[3] = 5;
        prev.pixels_mut()[7] = 6;
        assert_eq!(count_changed_pixels(&cur, &prev), 2);
    }

    #[test]
    fn field_parity_toggles() {
        assert_eq!(FieldParity::Even.toggled(), FieldParity::Odd);
        assert_eq!(FieldParity::Odd.toggled(), FieldParity::Even);
        assert_eq!(Scan::Interlaced(FieldParity::Odd).rows(5).collect::<Vec<_>>(), [1, 3]);
    }
}
