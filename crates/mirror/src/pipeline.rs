//! Per-frame update path
//!
//! ```text
//! current ─► count changed ─► Interlacer ─► FrameDiffer ─► coalesce ─► DisplayProtocol ─► BusSession
//!            (vs previous)    (scan)                       (progressive)
//! ```
//!
//! `previous` always holds what the panel shows: the protocol copies every
//! submitted row into it, so rows skipped by an interlaced field stay stale
//! and are picked up by the next diff.

use std::time::Duration;

use framediff::{coalesce, count_changed_pixels, select, DiffError, FrameDiffer, Scan, SpanList};
use platform::display::BYTES_PER_PIXEL;
use platform::{DiffMode, Framebuffer, FramebufferError, MirrorConfig};
use spibus::{BusSession, DisplayProtocol, FrameStats, QueueError, StopFlag};

use crate::pacing::{InFlight, Interlacer};

/// Frame update errors
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The previous-frame buffer could not be allocated.
    #[error("cannot allocate the previous frame")]
    Framebuffer(#[source] FramebufferError),
    /// The source frame has a different geometry.
    #[error(transparent)]
    Diff(#[from] DiffError),
    /// The task queue closed under the frame loop.
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// What happened to one source frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Spans were queued with this scan.
    Sent {
        /// Progressive or one interlaced field.
        scan: Scan,
        /// Submission counters.
        stats: FrameStats,
    },
    /// Nothing differed from the panel contents.
    Unchanged,
}

/// Frame-thread state: the panel's last known contents plus everything
/// needed to turn a new frame into bus tasks.
pub struct Mirror {
    differ: Box<dyn FrameDiffer + Send + Sync>,
    protocol: DisplayProtocol,
    previous: Framebuffer,
    spans: SpanList,
    interlacer: Interlacer,
    in_flight: InFlight,
    resend_all: bool,
    merge_threshold: usize,
    max_task_bytes: usize,
}

impl Mirror {
    /// State for a panel that was just cleared to black by the init script.
    pub fn new(config: &MirrorConfig) -> Result<Self, FrameError> {
        let display = &config.display;
        let (width, height) = (usize::from(display.width), usize::from(display.height));
        let previous = Framebuffer::new(width, height, config.stride_bytes()).map_err(FrameError::Framebuffer)?;
        let differ = select(config.diff.mode, &previous, config.diff.span_merge_threshold);
        tracing::info!(
            differ = differ.name(),
            width,
            height,
            interlace = config.diff.interlace,
            "frame pipeline ready"
        );
        Ok(Self {
            differ,
            protocol: DisplayProtocol::new(display.width, display.x_offset, display.y_offset),
            previous,
            spans: SpanList::for_frame(width, height),
            interlacer: Interlacer::new(
                config.diff.interlace,
                config.spi().usecs_per_byte(),
                config.pacing.target_fps,
            ),
            in_flight: InFlight::new(),
            resend_all: config.diff.mode == DiffMode::Full,
            merge_threshold: config.diff.span_merge_threshold,
            max_task_bytes: config.largest_task(),
        })
    }

    /// What the panel currently shows.
    pub fn previous(&self) -> &Framebuffer {
        &self.previous
    }

    /// A frame buffer with the panel's geometry, for sources to draw into.
    pub fn blank_frame(&self) -> Framebuffer {
        let mut frame = self.previous.clone();
        frame.fill(0);
        frame
    }

    /// Block while the bus still holds the frame before last. Returns the
    /// time spent waiting.
    pub fn wait_for_bus(&self, session: &BusSession, stop: &StopFlag) -> Duration {
        self.in_flight.wait(&session.monitor(), stop)
    }

    /// Diff `current` against the panel contents and queue the changes.
    pub fn post(&mut self, session: &mut BusSession, current: &Framebuffer) -> Result<Outcome, FrameError> {
        let was_interlaced = self.interlacer.previous().is_interlaced();
        let changed = count_changed_pixels(current, &self.previous);
        let scan = self
            .interlacer
            .plan(changed, current.height(), session.monitor().bytes_queued());

        if changed == 0 && !was_interlaced && !self.resend_all {
            self.spans.clear();
            return Ok(Outcome::Unchanged);
        }

        self.differ.diff(current, &self.previous, scan, &mut self.spans)?;
        if !scan.is_interlaced() {
            coalesce(&mut self.spans, self.merge_threshold, self.max_task_bytes, BYTES_PER_PIXEL);
        }

        let producer = session.producer();
        let stats = self.protocol.submit(producer, &self.spans, current, &mut self.previous)?;
        if stats.bytes == 0 {
            return Ok(Outcome::Unchanged);
        }
        self.in_flight.frame_sent(producer.tail());
        tracing::debug!(
            changed,
            interlaced = scan.is_interlaced(),
            spans = stats.spans,
            bytes = stats.bytes,
            cursor_tasks = stats.cursor_tasks,
            "frame queued"
        );
        Ok(Outcome::Sent { scan, stats })
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]
mod tests {
    use super::*;
    use platform::DisplayConfig;
    use spibus::{SimulatedPeripherals, SpiTransport};

    fn config(mode: DiffMode) -> MirrorConfig {
        let mut config = MirrorConfig {
            display: DisplayConfig {
                width: 16,
                height: 8,
                ..DisplayConfig::default()
            },
            ..MirrorConfig::default()
        };
        config.diff.mode = mode;
        config.diff.interlace = false;
        config
    }

    fn session(config: &MirrorConfig) -> BusSession {
        let sim = SimulatedPeripherals::new(config.display.dc_pin);
        let dc = platform::GpioBank::new(sim.clone()).output(config.display.dc_pin).unwrap();
        BusSession::start(config.queue_bytes(), SpiTransport::new(sim, dc), StopFlag::new()).unwrap()
    }

    #[test]
    fn unchanged_frames_queue_nothing() {
        let config = config(DiffMode::Exact);
        let mut session = session(&config);
        let mut mirror = Mirror::new(&config).unwrap();
        let frame = mirror.blank_frame();
        assert_eq!(mirror.post(&mut session, &frame).unwrap(), Outcome::Unchanged);
        assert_eq!(session.monitor().bytes_queued(), 0);
    }

    #[test]
    fn changed_pixels_update_the_baseline() {
        let config = config(DiffMode::Exact);
        let mut session = session(&config);
        let mut mirror = Mirror::new(&config).unwrap();
        let mut frame = mirror.blank_frame();
        frame.row_mut(3).unwrap()[5] = 0xF800;

        let Outcome::Sent { scan, stats } = mirror.post(&mut session, &frame).unwrap() else {
            panic!("a changed pixel must be sent");
        };
        assert_eq!(scan, Scan::Progressive);
        assert_eq!(stats.spans, 1);
        assert_eq!(stats.pixels, 1);
        assert_eq!(mirror.previous(), &frame);
        assert_eq!(mirror.post(&mut session, &frame).unwrap(), Outcome::Unchanged);
        session.shutdown().unwrap();
    }

    #[test]
    fn slow_configured_clock_sends_fields() {
        let mut config = config(DiffMode::Exact);
        config.diff.interlace = true;
        config.bus.clock_divider = 60_000;
        let mut session = session(&config);
        let mut mirror = Mirror::new(&config).unwrap();
        let mut frame = mirror.blank_frame();
        frame.fill(0x07E0);

        let Outcome::Sent { scan, .. } = mirror.post(&mut session, &frame).unwrap() else {
            panic!("a changed frame must be sent");
        };
        assert_eq!(scan, Scan::Interlaced(framediff::FieldParity::Odd));
        session.shutdown().unwrap();
    }

    #[test]
    fn full_mode_resends_identical_frames() {
        let config = config(DiffMode::Full);
        let mut session = session(&config);
        let mut mirror = Mirror::new(&config).unwrap();
        let frame = mirror.blank_frame();
        for _ in 0..2 {
            let Outcome::Sent { stats, .. } = mirror.post(&mut session, &frame).unwrap() else {
                panic!("full mode always sends");
            };
            assert_eq!(stats.pixels, 16 * 8);
        }
        session.shutdown().unwrap();
    }

    #[test]
    fn wrong_geometry_is_reported() {
        let config = config(DiffMode::Exact);
        let mut session = session(&config);
        let mut mirror = Mirror::new(&config).unwrap();
        let mut other = Framebuffer::new(8, 8, 16).unwrap();
        other.fill(1);
        assert!(matches!(
            mirror.post(&mut session, &other),
            Err(FrameError::Diff(DiffError::GeometryMismatch))
        ));
    }
}
