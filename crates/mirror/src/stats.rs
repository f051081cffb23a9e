//! Frame statistics
//!
//! A short history of frame completion times gives the update rate; a
//! window of counters is logged every `stats_interval_secs` and reset.

use std::time::{Duration, Instant};

use heapless::Deque;
use spibus::FrameStats;

/// Frames kept for the rate estimate.
pub const HISTORY_LEN: usize = 64;

/// Only frames this recent count toward the rate.
pub const RATE_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
struct FrameMark {
    at: Instant,
    interlaced: bool,
}

/// Counters for one logging interval.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// Frames that queued at least one span.
    pub frames: u64,
    /// Of those, frames sent as a single field.
    pub interlaced: u64,
    /// Source frames identical to what the panel already shows.
    pub unchanged: u64,
    /// Submission counters summed over the interval.
    pub sent: FrameStats,
    /// Time spent waiting for the bus to catch up.
    pub stalled: Duration,
}

/// Rolling frame history plus the current logging window.
#[derive(Debug)]
pub struct Statistics {
    history: Deque<FrameMark, HISTORY_LEN>,
    window: Window,
    total: Window,
    interval: Option<Duration>,
    window_start: Instant,
}

impl Statistics {
    /// Statistics logged every `interval_secs` (0 disables logging).
    pub fn new(interval_secs: u64, now: Instant) -> Self {
        Self {
            history: Deque::new(),
            window: Window::default(),
            total: Window::default(),
            interval: (interval_secs > 0).then(|| Duration::from_secs(interval_secs)),
            window_start: now,
        }
    }

    /// Account for one submitted frame.
    pub fn frame_sent(&mut self, now: Instant, sent: &FrameStats, interlaced: bool) {
        if self.history.is_full() {
            self.history.pop_front();
        }
        // cannot fail, a slot was freed above
        let _ = self.history.push_back(FrameMark { at: now, interlaced });
        for window in [&mut self.window, &mut self.total] {
            window.frames = window.frames.saturating_add(1);
            window.interlaced = window.interlaced.saturating_add(u64::from(interlaced));
            window.sent.add(sent);
        }
    }

    /// Account for a source frame that needed no update.
    pub fn frame_unchanged(&mut self) {
        self.window.unchanged = self.window.unchanged.saturating_add(1);
        self.total.unchanged = self.total.unchanged.saturating_add(1);
    }

    /// Account for time blocked on the bus.
    pub fn stalled(&mut self, waited: Duration) {
        self.window.stalled = self.window.stalled.saturating_add(waited);
        self.total.stalled = self.total.stalled.saturating_add(waited);
    }

    /// Frames completed during the last [`RATE_WINDOW`], and how many of
    /// them were interlaced.
    pub fn recent(&self, now: Instant) -> (usize, usize) {
        self.history
            .iter()
            .filter(|mark| now.saturating_duration_since(mark.at) <= RATE_WINDOW)
            .fold((0, 0), |(frames, interlaced), mark| {
                (frames.saturating_add(1), interlaced.saturating_add(usize::from(mark.interlaced)))
            })
    }

    /// Everything since startup.
    pub fn total(&self) -> Window {
        self.total
    }

    /// Log and reset the window once the interval has elapsed. Returns the
    /// logged window.
    pub fn maybe_log(&mut self, now: Instant) -> Option<Window> {
        let interval = self.interval?;
        if now.saturating_duration_since(self.window_start) < interval {
            return None;
        }
        let window = core::mem::take(&mut self.window);
        let (fps, interlaced_fps) = self.recent(now);
        tracing::info!(
            fps,
            interlaced_fps,
            frames = window.frames,
            unchanged = window.unchanged,
            spans = window.sent.spans,
            pixels = window.sent.pixels,
            bytes = window.sent.bytes,
            stalled_ms = window.stalled.as_millis(),
            "mirror statistics"
        );
        self.window_start = now;
        Some(window)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;

    fn sent(bytes: usize) -> FrameStats {
        FrameStats {
            spans: 1,
            pixels: bytes / 2,
            bytes,
            cursor_tasks: 2,
        }
    }

    #[test]
    fn rate_counts_only_the_last_second() {
        let start = Instant::now();
        let mut stats = Statistics::new(5, start);
        for i in 0..10u64 {
            stats.frame_sent(start + Duration::from_millis(200 * i), &sent(10), i % 2 == 0);
        }
        // frames at 1.0s ..= 1.8s plus the one at exactly 0.8s
        assert_eq!(stats.recent(start + Duration::from_millis(1800)), (6, 3));
    }

    #[test]
    fn history_keeps_the_newest_frames() {
        let start = Instant::now();
        let mut stats = Statistics::new(0, start);
        for _ in 0..(HISTORY_LEN + 10) {
            stats.frame_sent(start, &sent(4), false);
        }
        assert_eq!(stats.recent(start).0, HISTORY_LEN);
        assert_eq!(stats.total().frames, (HISTORY_LEN + 10) as u64);
    }

    #[test]
    fn window_resets_after_each_log() {
        let start = Instant::now();
        let mut stats = Statistics::new(1, start);
        stats.frame_sent(start, &sent(100), true);
        stats.frame_unchanged();
        assert_eq!(stats.maybe_log(start + Duration::from_millis(500)), None);

        let logged = stats.maybe_log(start + Duration::from_secs(1)).unwrap();
        assert_eq!(logged.frames, 1);
        assert_eq!(logged.interlaced, 1);
        assert_eq!(logged.unchanged, 1);
        assert_eq!(logged.sent.bytes, 100);

        stats.frame_sent(start + Duration::from_secs(1), &sent(8), false);
        let logged = stats.maybe_log(start + Duration::from_secs(2)).unwrap();
        assert_eq!(logged.frames, 1);
        assert_eq!(stats.total().sent.bytes, 108);
    }

    #[test]
    fn zero_interval_never_logs() {
        let start = Instant::now();
        let mut stats = Statistics::new(0, start);
        assert!(stats.maybe_log(start + Duration::from_secs(3600)).is_none());
    }
}
