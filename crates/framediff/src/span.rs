//! Arena-backed list of changed screen regions
//!
//! A [`Span`] covers rows `[y, end_y)` and columns `[x, end_x)`, except the
//! last row which ends at `last_scan_end_x`. Spans live in a [`SpanList`]
//! arena allocated once for the worst case and reused every frame; the list
//! order is a chain of forward links through arena indices so the coalescer
//! can unlink merged spans in O(1).

use alloc::vec::Vec;

/// Index of a span inside its [`SpanList`] arena.
pub type SpanId = u32;

/// One rectangular (ragged last row) region of changed pixels.
///
/// Equality compares bounds and size only, never the list link.
#[derive(Debug, Clone, Copy)]
pub struct Span {
    /// First column.
    pub x: u16,
    /// First row.
    pub y: u16,
    /// One past the last column of every row but the last.
    pub end_x: u16,
    /// One past the last row.
    pub end_y: u16,
    /// One past the last column of the last row.
    pub last_scan_end_x: u16,
    /// Exact number of pixels covered.
    pub size: u32,
    next: Option<SpanId>,
}

impl Span {
    /// A span covering `[x, end_x)` of row `y`.
    pub fn row(x: u16, end_x: u16, y: u16) -> Self {
        Self {
            x,
            y,
            end_x,
            end_y: y.saturating_add(1),
            last_scan_end_x: end_x,
            size: u32::from(end_x.saturating_sub(x)),
            next: None,
        }
    }

    /// A span covering rows `[y, end_y)`; the last row ends at `last_scan_end_x`.
    pub fn block(x: u16, y: u16, end_x: u16, end_y: u16, last_scan_end_x: u16) -> Self {
        let mut span = Self {
            x,
            y,
            end_x,
            end_y,
            last_scan_end_x,
            size: 0,
            next: None,
        };
        span.size = span.computed_size();
        span
    }

    /// Pixel count derived from the bounds.
    #[allow(clippy::arithmetic_side_effects)] // Safety: saturating on u16 bounds, result fits u32
    pub fn computed_size(&self) -> u32 {
        let full_rows = u32::from(self.end_y.saturating_sub(self.y).saturating_sub(1));
        full_rows * u32::from(self.end_x.saturating_sub(self.x))
            + u32::from(self.last_scan_end_x.saturating_sub(self.x))
    }

    /// Number of rows covered.
    pub fn rows(&self) -> u16 {
        self.end_y.saturating_sub(self.y)
    }

    /// `true` when the span covers more than one row.
    pub fn is_multiline(&self) -> bool {
        self.rows() > 1
    }

    /// Column bound of row `y` (`last_scan_end_x` on the last row).
    pub fn row_end(&self, y: u16) -> u16 {
        if y.saturating_add(1) == self.end_y {
            self.last_scan_end_x
        } else {
            self.end_x
        }
    }

    /// `true` when pixel `(x, y)` is covered.
    pub fn contains(&self, x: u16, y: u16) -> bool {
        y >= self.y && y < self.end_y && x >= self.x && x < self.row_end(y)
    }

    /// Structural invariants every produced span upholds.
    pub fn is_well_formed(&self) -> bool {
        self.x < self.end_x
            && self.y < self.end_y
            && self.last_scan_end_x <= self.end_x
            && self.last_scan_end_x > self.x
            && self.size > 0
            && self.size == self.computed_size()
    }
}

impl PartialEq for Span {
    fn eq(&self, other: &Self) -> bool {
        (self.x, self.y, self.end_x, self.end_y, self.last_scan_end_x, self.size)
            == (other.x, other.y, other.end_x, other.end_y, other.last_scan_end_x, other.size)
    }
}

impl Eq for Span {}

/// Fixed-capacity arena of spans chained by forward links.
#[derive(Debug, Clone)]
pub struct SpanList {
    spans: Vec<Span>,
    head: Option<SpanId>,
    tail: Option<SpanId>,
    live: usize,
}

impl SpanList {
    /// An empty list with room for `capacity` spans.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            spans: Vec::with_capacity(capacity),
            head: None,
            tail: None,
            live: 0,
        }
    }

    /// Worst-case arena for a `width` x `height` frame: every other pixel
    /// of every row changed.
    #[allow(clippy::arithmetic_side_effects)] // Safety: frame geometry is bounded by controller RAM
    pub fn for_frame(width: usize, height: usize) -> Self {
        Self::with_capacity(width.div_ceil(2) * height)
    }

    /// Discard every span; the arena allocation is kept.
    pub fn clear(&mut self) {
        self.spans.clear();
        self.head = None;
        self.tail = None;
        self.live = 0;
    }

    /// Append `span` to the end of the chain.
    #[allow(clippy::cast_possible_truncation)] // arena is sized from u16 geometry, far below u32::MAX
    pub fn push(&mut self, mut span: Span) -> SpanId {
        span.next = None;
        let id = self.spans.len() as SpanId;
        self.spans.push(span);
        match self.tail.and_then(|t| self.slot_mut(t)) {
            Some(last) => last.next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.live = self.live.saturating_add(1);
        id
    }

    /// Number of linked spans.
    pub fn len(&self) -> usize {
        self.live
    }

    /// `true` when no span is linked.
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Spans the arena can hold without reallocating.
    pub fn capacity(&self) -> usize {
        self.spans.capacity()
    }

    /// First linked span.
    pub fn head(&self) -> Option<SpanId> {
        self.head
    }

    /// Span stored under `id`.
    pub fn get(&self, id: SpanId) -> Option<&Span> {
        self.spans.get(id as usize)
    }

    /// Successor of `id` in the chain.
    pub fn next_of(&self, id: SpanId) -> Option<SpanId> {
        self.get(id).and_then(|s| s.next)
    }

    /// Walk the chain in order.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            list: self,
            cursor: self.head,
        }
    }

    /// Total pixels covered by the linked spans.
    pub fn total_pixels(&self) -> u64 {
        self.iter().map(|s| u64::from(s.size)).sum()
    }

    /// Overwrite the bounds of `id`, keeping its link.
    pub(crate) fn replace_bounds(&mut self, id: SpanId, bounds: Span) {
        if let Some(slot) = self.slot_mut(id) {
            let next = slot.next;
            *slot = Span { next, ..bounds };
        }
    }

    /// Unlink the successor of `prev`; returns the new successor.
    pub(crate) fn unlink_after(&mut self, prev: SpanId) -> Option<SpanId> {
        let removed = self.next_of(prev)?;
        let after = self.next_of(removed);
        if let Some(slot) = self.slot_mut(prev) {
            slot.next = after;
        }
        if self.tail == Some(removed) {
            self.tail = Some(prev);
        }
        self.live = self.live.saturating_sub(1);
        after
    }

    fn slot_mut(&mut self, id: SpanId) -> Option<&mut Span> {
        self.spans.get_mut(id as usize)
    }
}

/// Iterator over the linked spans of a [`SpanList`].
#[derive(Clone)]
pub struct Iter<'a> {
    list: &'a SpanList,
    cursor: Option<SpanId>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Span;

    fn next(&mut self) -> Option<Self::Item> {
        let span = self.list.get(self.cursor?)?;
        self.cursor = span.next;
        Some(span)
    }
}

impl<'a> IntoIterator for &'a SpanList {
    type Item = &'a Span;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
