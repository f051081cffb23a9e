//! Frame pacing and the interlace heuristic
//!
//! Three independent pieces:
//!
//! - [`FrameClock`] wakes the frame loop at the target rate.
//! - [`InFlight`] keeps at most two frames queued: before a new frame is
//!   produced it waits until the bus thread has retired the frame before the
//!   last one.
//! - [`Interlacer`] drops to half-field updates when the estimated transfer
//!   time of a frame would not fit its share of the frame budget.

use std::thread;
use std::time::{Duration, Instant};

use framediff::{FieldParity, Scan};
use spibus::{QueueMonitor, StopFlag};

/// Sleep slice while the queue still holds the frame before last.
pub const IN_FLIGHT_POLL: Duration = Duration::from_micros(500);

/// Microseconds of frame time the update of one frame may use, divided by
/// the frame rate.
pub const UPDATE_TIMESLICE_USECS: f64 = 1_500_000.0;

// ---------------------------------------------------------------------------
// Frame clock
// ---------------------------------------------------------------------------

/// Fixed-rate ticker. A late tick does not cause a burst of catch-up ticks.
#[derive(Debug)]
pub struct FrameClock {
    period: Duration,
    next: Instant,
}

impl FrameClock {
    /// A clock ticking `fps` times per second, first tick immediately.
    pub fn new(fps: u32) -> Self {
        let period = Duration::from_secs(1)
            .checked_div(fps.max(1))
            .unwrap_or(Duration::from_millis(16));
        Self {
            period,
            next: Instant::now(),
        }
    }

    /// Tick period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Sleep until the next tick. Returns `false` without sleeping the full
    /// period if `stop` is raised.
    pub fn wait(&mut self, stop: &StopFlag) -> bool {
        loop {
            if stop.is_raised() {
                return false;
            }
            let now = Instant::now();
            if now >= self.next {
                let after = self.next.checked_add(self.period).unwrap_or(now);
                self.next = if after <= now { now } else { after };
                return true;
            }
            thread::sleep(self.next.saturating_duration_since(now).min(Duration::from_millis(10)));
        }
    }
}

// ---------------------------------------------------------------------------
// Frames in flight
// ---------------------------------------------------------------------------

/// Queue tails at the end of the last two frames that queued anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct InFlight {
    previous_end: Option<u32>,
    current_end: Option<u32>,
}

impl InFlight {
    /// Nothing in flight.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the tail after a frame that queued bytes.
    pub fn frame_sent(&mut self, tail: u32) {
        self.previous_end = self.current_end;
        self.current_end = Some(tail);
    }

    /// `true` when the bus thread still holds tasks of the frame before last.
    pub fn is_backlogged(&self, monitor: &QueueMonitor) -> bool {
        self.previous_end
            .is_some_and(|mark| monitor.holds_tasks_before(mark))
    }

    /// Sleep in [`IN_FLIGHT_POLL`] slices while backlogged. Returns the time
    /// spent waiting.
    pub fn wait(&self, monitor: &QueueMonitor, stop: &StopFlag) -> Duration {
        let start = Instant::now();
        while self.is_backlogged(monitor) && monitor.is_running() && !stop.is_raised() {
            thread::sleep(IN_FLIGHT_POLL);
        }
        start.elapsed()
    }
}

// ---------------------------------------------------------------------------
// Interlacing
// ---------------------------------------------------------------------------

/// Chooses progressive or interlaced scanning per frame.
#[derive(Debug, Clone)]
pub struct Interlacer {
    enabled: bool,
    usecs_per_byte: f64,
    budget_usecs: f64,
    parity: FieldParity,
    previous: Scan,
}

impl Interlacer {
    /// Heuristic for a bus shifting a byte in `usecs_per_byte` and a frame
    /// rate of `target_fps`. Disabled interlacers always scan progressively.
    pub fn new(enabled: bool, usecs_per_byte: f64, target_fps: u32) -> Self {
        Self {
            enabled,
            usecs_per_byte,
            budget_usecs: UPDATE_TIMESLICE_USECS / f64::from(target_fps.max(1)),
            parity: FieldParity::Even,
            previous: Scan::Progressive,
        }
    }

    /// Scan for the next frame given its changed pixel count, the frame
    /// height and the bytes still queued. Successive interlaced frames
    /// alternate fields.
    pub fn plan(&mut self, changed_pixels: usize, height: usize, queued_bytes: usize) -> Scan {
        self.previous = self.decide(changed_pixels, height, queued_bytes);
        self.previous
    }

    #[allow(clippy::cast_precision_loss)] // byte counts far below 2^52
    #[allow(clippy::arithmetic_side_effects)] // Safety: f64 arithmetic
    fn decide(&mut self, changed_pixels: usize, height: usize, queued_bytes: usize) -> Scan {
        if !self.enabled {
            return Scan::Progressive;
        }
        let bytes = changed_pixels.saturating_mul(2).saturating_add(height.saturating_mul(2));
        let estimate = bytes.saturating_add(queued_bytes) as f64 * self.usecs_per_byte;
        if estimate > self.budget_usecs {
            self.parity = self.parity.toggled();
            Scan::Interlaced(self.parity)
        } else {
            Scan::Progressive
        }
    }

    /// Scan chosen for the last frame.
    pub fn previous(&self) -> Scan {
        self.previous
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;
    use platform::SpiConfig;
    use spibus::TaskQueue;

    #[test]
    fn slower_clock_tips_the_same_update_into_interlacing() {
        let spi = |clock_divider| SpiConfig {
            clock_divider,
            core_clock_hz: 400_000_000,
        };
        // 240x320 full update: 153_600 + 640 bytes against a 25_000us budget
        let mut fast = Interlacer::new(true, spi(8).usecs_per_byte(), 60);
        let mut slow = Interlacer::new(true, spi(16).usecs_per_byte(), 60);
        assert_eq!(fast.plan(240 * 320, 320, 0), Scan::Progressive);
        assert_eq!(slow.plan(240 * 320, 320, 0), Scan::Interlaced(FieldParity::Odd));
    }

    #[test]
    fn small_updates_stay_progressive() {
        let mut interlacer = Interlacer::new(true, 0.16, 60);
        assert_eq!(interlacer.plan(100, 320, 0), Scan::Progressive);
    }

    #[test]
    fn heavy_updates_alternate_fields() {
        // budget 25_000us at 60 fps; a full 240x320 frame takes ~24_700us
        // alone, queued bytes push it over
        let mut interlacer = Interlacer::new(true, 0.16, 60);
        let full = 240 * 320;
        assert_eq!(interlacer.plan(full, 320, 10_000), Scan::Interlaced(FieldParity::Odd));
        assert_eq!(interlacer.plan(full, 320, 10_000), Scan::Interlaced(FieldParity::Even));
        assert!(interlacer.previous().is_interlaced());
        assert_eq!(interlacer.plan(10, 320, 0), Scan::Progressive);
    }

    #[test]
    fn disabled_interlacer_never_interlaces() {
        let mut interlacer = Interlacer::new(false, 10.0, 60);
        assert_eq!(interlacer.plan(1_000_000, 320, 1_000_000), Scan::Progressive);
    }

    #[test]
    fn in_flight_waits_for_the_frame_before_last() {
        let (mut producer, mut consumer) = TaskQueue::new(1024, StopFlag::new()).unwrap().split();
        let monitor = producer.monitor();
        let mut in_flight = InFlight::new();

        producer.push(0x2C, &[0; 16]).unwrap();
        in_flight.frame_sent(producer.tail());
        // one frame queued: nothing to wait for yet
        assert!(!in_flight.is_backlogged(&monitor));

        producer.push(0x2C, &[0; 16]).unwrap();
        in_flight.frame_sent(producer.tail());
        assert!(in_flight.is_backlogged(&monitor));

        let spibus::Poll::Ready(task) = consumer.next_task() else {
            panic!("first frame is queued");
        };
        consumer.retire(task);
        assert!(!in_flight.is_backlogged(&monitor));
        assert!(in_flight.wait(&monitor, &StopFlag::new()) < Duration::from_secs(1));
    }

    #[test]
    fn raised_stop_ends_the_wait() {
        let stop = StopFlag::new();
        stop.raise();
        let mut clock = FrameClock::new(1);
        assert!(!clock.wait(&stop));
        assert_eq!(clock.period(), Duration::from_secs(1));
    }
}
