//! Span submission with write-cursor tracking
//!
//! The controller keeps a column window, a row start and a write cursor.
//! RAMWR restarts at (column start, row start) and wraps at the column end,
//! so a span only needs:
//!
//! - RASET (2 bytes) when its first row differs from the last row start,
//! - CASET (4 bytes) when a multi-row span needs a different window, or a
//!   single-row span runs past the current window end,
//! - CASET (2 bytes) when only the column start moves,
//!
//! followed by one RAMWR with the pixels in big-endian order. The previous
//! frame is updated to match each span as it is queued.

use framediff::SpanList;
use platform::display::{position_bytes, window_bytes, BYTES_PER_PIXEL};
use platform::{Command, Framebuffer};

use crate::queue::{Producer, QueueError};

/// Per-frame submission counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
    /// Spans submitted.
    pub spans: usize,
    /// Pixels submitted.
    pub pixels: usize,
    /// Bytes queued, command bytes included.
    pub bytes: usize,
    /// Cursor and window tasks queued.
    pub cursor_tasks: usize,
}

impl FrameStats {
    /// Accumulate another frame.
    pub fn add(&mut self, other: &Self) {
        self.spans = self.spans.saturating_add(other.spans);
        self.pixels = self.pixels.saturating_add(other.pixels);
        self.bytes = self.bytes.saturating_add(other.bytes);
        self.cursor_tasks = self.cursor_tasks.saturating_add(other.cursor_tasks);
    }
}

/// Last known controller addressing state, in frame coordinates.
#[derive(Debug, Clone)]
pub struct DisplayProtocol {
    row: Option<u16>,
    column: Option<u16>,
    window_end: u16,
    frame_width: u16,
    x_offset: u16,
    y_offset: u16,
}

impl DisplayProtocol {
    /// Protocol for a `frame_width` wide frame placed at `(x_offset, y_offset)`
    /// in controller RAM. Assumes the init script left the column window at
    /// the full frame width.
    pub fn new(frame_width: u16, x_offset: u16, y_offset: u16) -> Self {
        Self {
            row: None,
            column: None,
            window_end: frame_width,
            frame_width,
            x_offset,
            y_offset,
        }
    }

    /// Forget the cursor so the next span re-sends its position.
    pub fn reset(&mut self) {
        self.row = None;
        self.column = None;
        self.window_end = self.frame_width;
    }

    /// Queue every span of `spans`, copying pixels from `current` and
    /// updating `previous` to match.
    #[allow(clippy::arithmetic_side_effects)] // Safety: span bounds are within the validated frame geometry
    pub fn submit(
        &mut self,
        producer: &mut Producer,
        spans: &SpanList,
        current: &Framebuffer,
        previous: &mut Framebuffer,
    ) -> Result<FrameStats, QueueError> {
        let mut stats = FrameStats::default();
        let mut iter = spans.iter();
        while let Some(span) = iter.next() {
            if self.row != Some(span.y) {
                self.queue(producer, &mut stats, Command::RowAddressSet, &position_bytes(self.y_offset + span.y))?;
                self.row = Some(span.y);
            }

            if span.is_multiline() && (self.column != Some(span.x) || self.window_end != span.end_x) {
                self.set_window(producer, &mut stats, span.x, span.end_x)?;
            } else if self.window_end < span.end_x {
                // Widen the window; reuse the next multi-row span's end if it
                // covers this one so that span needs no window of its own.
                let end = iter
                    .clone()
                    .find(|next| next.is_multiline())
                    .map(|next| next.end_x)
                    .filter(|&end_x| end_x >= span.end_x)
                    .unwrap_or(self.frame_width);
                self.set_window(producer, &mut stats, span.x, end)?;
            } else if self.column != Some(span.x) {
                self.queue(producer, &mut stats, Command::ColumnAddressSet, &position_bytes(self.x_offset + span.x))?;
                self.column = Some(span.x);
            }

            let len = span.size as usize * BYTES_PER_PIXEL;
            let mut task = producer.allocate(Command::MemoryWrite.into(), len)?;
            let payload = task.payload_mut();
            let mut at = 0;
            for y in span.y..span.end_y {
                let (x, end) = (usize::from(span.x), usize::from(span.row_end(y)));
                let row = usize::from(y);
                if let Some(pixels) = current.row(row).and_then(|r| r.get(x..end)) {
                    let bytes = pixels.len() * BYTES_PER_PIXEL;
                    if let Some(dst) = payload.get_mut(at..at + bytes) {
                        put_be_pixels(pixels, dst);
                    }
                    at += bytes;
                    if let Some(baseline) = previous.row_mut(row).and_then(|r| r.get_mut(x..end)) {
                        baseline.copy_from_slice(pixels);
                    }
                }
            }
            task.commit();

            stats.spans += 1;
            stats.pixels += span.size as usize;
            stats.bytes += len + 1;
        }
        Ok(stats)
    }

    #[allow(clippy::arithmetic_side_effects)] // Safety: end > x within the frame
    fn set_window(&mut self, producer: &mut Producer, stats: &mut FrameStats, x: u16, end_x: u16) -> Result<(), QueueError> {
        let bytes = window_bytes(self.x_offset + x, self.x_offset + end_x - 1);
        self.queue(producer, stats, Command::ColumnAddressSet, &bytes)?;
        self.column = Some(x);
        self.window_end = end_x;
        Ok(())
    }

    #[allow(clippy::arithmetic_side_effects)] // Safety: counters
    fn queue(&self, producer: &mut Producer, stats: &mut FrameStats, command: Command, payload: &[u8]) -> Result<(), QueueError> {
        producer.push(command.into(), payload)?;
        stats.cursor_tasks += 1;
        stats.bytes += payload.len() + 1;
        Ok(())
    }
}

/// Store RGB565 pixels big-endian, two pixels per step with a single
/// trailing pixel on odd lengths. `dst` holds `2 * pixels.len()` bytes.
#[allow(clippy::arithmetic_side_effects)] // Safety: a u16 widened to u32 shifts by 16 without loss
fn put_be_pixels(pixels: &[u16], dst: &mut [u8]) {
    let mut pairs = pixels.chunks_exact(2);
    let mut words = dst.chunks_exact_mut(4);
    for (pair, word) in (&mut pairs).zip(&mut words) {
        if let [a, b] = *pair {
            let packed = (u32::from(a) << 16) | u32::from(b);
            word.copy_from_slice(&packed.to_be_bytes());
        }
    }
    if let ([last], [hi, lo]) = (pairs.remainder(), words.into_remainder()) {
        [*hi, *lo] = last.to_be_bytes();
    }
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
    use crate::queue::{Consumer, Poll, StopFlag, TaskQueue};
    use framediff::Span;

    fn drain(consumer: &mut Consumer) -> Vec<(u8, Vec<u8>)> {
        let mut out = Vec::new();
        while let Poll::Ready(task) = consumer.next_task() {
            out.push((task.command, consumer.payload(&task).to_vec()));
            consumer.retire(task);
        }
        out
    }

    fn list(spans: &[Span]) -> SpanList {
        let mut list = SpanList::with_capacity(spans.len());
        for span in spans {
            list.push(*span);
        }
        list
    }

    fn setup() -> (Producer, Consumer, Framebuffer, Framebuffer) {
        let (producer, consumer) = TaskQueue::new(4096, StopFlag::new()).unwrap().split();
        let previous = Framebuffer::new(8, 4, 16).unwrap();
        let mut current = previous.clone();
        for y in 0..4 {
            for (x, px) in current.row_mut(y).unwrap().iter_mut().enumerate() {
                *px = 0x0100 * y as u16 + x as u16 + 1;
            }
        }
        (producer, consumer, current, previous)
    }

    const RASET: u8 = 0x2B;
    const CASET: u8 = 0x2A;
    const RAMWR: u8 = 0x2C;

    #[test]
    fn first_span_moves_row_and_column() {
        let (mut producer, mut consumer, current, mut previous) = setup();
        let mut protocol = DisplayProtocol::new(8, 0, 0);
        let stats = protocol
            .submit(&mut producer, &list(&[Span::row(2, 4, 1)]), &current, &mut previous)
            .unwrap();

        let tasks = drain(&mut consumer);
        assert_eq!(
            tasks,
            vec![
                (RASET, vec![0, 1]),
                (CASET, vec![0, 2]),
                (RAMWR, vec![0x01, 0x03, 0x01, 0x04]),
            ]
        );
        assert_eq!(stats.spans, 1);
        assert_eq!(stats.cursor_tasks, 2);
        assert_eq!(stats.bytes, 3 + 3 + 5);
        assert_eq!(previous.row(1).unwrap()[2..4], current.row(1).unwrap()[2..4]);
        assert_eq!(previous.row(1).unwrap()[4], 0);
    }

    #[test]
    fn same_row_and_column_skip_cursor_tasks() {
        let (mut producer, mut consumer, current, mut previous) = setup();
        let mut protocol = DisplayProtocol::new(8, 0, 0);
        let spans = list(&[Span::row(1, 3, 2)]);
        protocol.submit(&mut producer, &spans, &current, &mut previous).unwrap();
        drain(&mut consumer);
        protocol.submit(&mut producer, &spans, &current, &mut previous).unwrap();
        let tasks = drain(&mut consumer);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].0, RAMWR);
    }

    #[test]
    fn multiline_span_sets_window_with_offsets() {
        let (mut producer, mut consumer, current, mut previous) = setup();
        let mut protocol = DisplayProtocol::new(8, 10, 20);
        let span = Span::block(1, 0, 4, 2, 3);
        protocol.submit(&mut producer, &list(&[span]), &current, &mut previous).unwrap();

        let tasks = drain(&mut consumer);
        assert_eq!(tasks[0], (RASET, vec![0, 20]));
        assert_eq!(tasks[1], (CASET, vec![0, 11, 0, 13]));
        // rows 0 and 1: x 1..4 then x 1..3
        let expected: Vec<u8> = [0x0002u16, 0x0003, 0x0004, 0x0102, 0x0103]
            .iter()
            .flat_map(|p| p.to_be_bytes())
            .collect();
        assert_eq!(tasks[2], (RAMWR, expected));
    }

    #[test]
    fn single_row_widening_peeks_at_next_block() {
        let (mut producer, mut consumer, current, mut previous) = setup();
        let mut protocol = DisplayProtocol::new(8, 0, 0);
        // narrow block first leaves the window ending at 3
        let spans = list(&[
            Span::block(0, 0, 3, 2, 3),
            Span::row(1, 5, 2),
            Span::block(1, 2, 6, 4, 6),
        ]);
        protocol.submit(&mut producer, &spans, &current, &mut previous).unwrap();

        let casets: Vec<Vec<u8>> = drain(&mut consumer)
            .into_iter()
            .filter(|(cmd, _)| *cmd == CASET)
            .map(|(_, payload)| payload)
            .collect();
        // the last block reuses the widened window
        assert_eq!(casets, vec![vec![0, 0, 0, 2], vec![0, 1, 0, 5]]);
    }

    #[test]
    fn widening_without_compatible_block_uses_frame_width() {
        let (mut producer, mut consumer, current, mut previous) = setup();
        let mut protocol = DisplayProtocol::new(8, 0, 0);
        let spans = list(&[Span::block(0, 0, 2, 2, 2), Span::row(0, 4, 2), Span::block(0, 2, 3, 4, 3)]);
        protocol.submit(&mut producer, &spans, &current, &mut previous).unwrap();
        let casets: Vec<Vec<u8>> = drain(&mut consumer)
            .into_iter()
            .filter(|(cmd, _)| *cmd == CASET)
            .map(|(_, payload)| payload)
            .collect();
        assert_eq!(casets, vec![vec![0, 0, 0, 1], vec![0, 0, 0, 7], vec![0, 0, 0, 2]]);
    }

    #[test]
    fn pixels_are_packed_big_endian_in_pairs() {
        let mut even = [0u8; 8];
        put_be_pixels(&[0x1234, 0xABCD, 0x0001, 0xF800], &mut even);
        assert_eq!(even, [0x12, 0x34, 0xAB, 0xCD, 0x00, 0x01, 0xF8, 0x00]);

        let mut odd = [0u8; 6];
        put_be_pixels(&[0x1234, 0xABCD, 0x07E0], &mut odd);
        assert_eq!(odd, [0x12, 0x34, 0xAB, 0xCD, 0x07, 0xE0]);

        let mut single = [0u8; 2];
        put_be_pixels(&[0x001F], &mut single);
        assert_eq!(single, [0x00, 0x1F]);
    }

    #[test]
    fn odd_start_and_width_span_keeps_pixel_order() {
        let (mut producer, mut consumer, current, mut previous) = setup();
        let mut protocol = DisplayProtocol::new(8, 0, 0);
        // x 1..4 on rows 2 and 3: three pixels per row, split across a pair
        let span = Span::block(1, 2, 4, 4, 4);
        protocol.submit(&mut producer, &list(&[span]), &current, &mut previous).unwrap();

        let (_, payload) = drain(&mut consumer).pop().unwrap();
        let expected: Vec<u8> = [0x0202u16, 0x0203, 0x0204, 0x0302, 0x0303, 0x0304]
            .iter()
            .flat_map(|p| p.to_be_bytes())
            .collect();
        assert_eq!(payload, expected);
        assert_eq!(previous.row(3).unwrap()[1..4], current.row(3).unwrap()[1..4]);
    }

    #[test]
    fn reset_forgets_cursor() {
        let (mut producer, mut consumer, current, mut previous) = setup();
        let mut protocol = DisplayProtocol::new(8, 0, 0);
        let spans = list(&[Span::row(0, 1, 0)]);
        protocol.submit(&mut producer, &spans, &current, &mut previous).unwrap();
        drain(&mut consumer);
        protocol.reset();
        protocol.submit(&mut producer, &spans, &current, &mut previous).unwrap();
        assert_eq!(drain(&mut consumer).len(), 3);
    }
}
