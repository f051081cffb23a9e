//! End-to-end tests against the simulated SPI0 and virtual panel.
//! Init, diff, coalesce, submit and drain on the bus thread, then compare
//! what the panel holds with the source frame.
//!
//! Run with: cargo test -p spibus --test simulated_panel

#![allow(clippy::arithmetic_side_effects)]
#![allow(clippy::indexing_slicing)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::cast_possible_truncation)]

use embedded_hal_mock::eh1::delay::NoopDelay;
use framediff::{coalesce, select, FieldParity, Scan, SpanList};
use platform::display::BYTES_PER_PIXEL;
use platform::{DiffMode, DisplayConfig, Framebuffer, MirrorConfig};
use spibus::{initialize, Board, BusSession, DisplayProtocol, InitParams, SimulatedPeripherals, StopFlag};

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Rig {
    sim: SimulatedPeripherals,
    config: MirrorConfig,
    session: BusSession,
    protocol: DisplayProtocol,
    previous: Framebuffer,
    spans: SpanList,
}

impl Rig {
    fn new(width: u16, height: u16, mode: DiffMode, x_offset: u16, y_offset: u16) -> Self {
        let mut config = MirrorConfig {
            display: DisplayConfig {
                width,
                height,
                x_offset,
                y_offset,
                row_order_swap: false,
                ..DisplayConfig::default()
            },
            ..MirrorConfig::default()
        };
        config.diff.mode = mode;
        config.validate().unwrap();

        let sim = SimulatedPeripherals::new(config.display.dc_pin);
        let board = Board::attach(sim.clone(), &config.display).unwrap();
        let mut transport = board.transport().unwrap();
        let mut reset = board.reset_line().unwrap();
        initialize(
            &mut transport,
            reset.as_mut(),
            &mut NoopDelay::new(),
            &InitParams::from_config(&config),
        )
        .unwrap();

        let session = BusSession::start(config.queue_bytes(), transport, StopFlag::new()).unwrap();
        let previous = Framebuffer::new(usize::from(width), usize::from(height), config.stride_bytes()).unwrap();
        Self {
            sim,
            protocol: DisplayProtocol::new(width, x_offset, y_offset),
            spans: SpanList::for_frame(usize::from(width), usize::from(height)),
            session,
            previous,
            config,
        }
    }

    fn send(&mut self, current: &Framebuffer, scan: Scan) {
        let differ = select(self.config.diff.mode, current, self.config.diff.span_merge_threshold);
        differ.diff(current, &self.previous, scan, &mut self.spans).unwrap();
        if !scan.is_interlaced() {
            coalesce(
                &mut self.spans,
                self.config.diff.span_merge_threshold,
                self.config.largest_task(),
                BYTES_PER_PIXEL,
            );
        }
        self.protocol
            .submit(self.session.producer(), &self.spans, current, &mut self.previous)
            .unwrap();
    }

    /// Stop the bus thread and return the panel contents of the visible area.
    fn finish(self) -> (Vec<u16>, Framebuffer) {
        self.session.shutdown().unwrap();
        let (w, h) = (self.config.display.width, self.config.display.height);
        let (xo, yo) = (self.config.display.x_offset, self.config.display.y_offset);
        let pixels: Vec<u16> = self.sim.with_panel(|panel| {
            (0..h)
                .flat_map(|y| (0..w).map(move |x| (x, y)))
                .map(|(x, y)| panel.pixel(x + xo, y + yo).unwrap())
                .collect()
        });
        (pixels, self.previous)
    }
}

fn visible(frame: &Framebuffer) -> Vec<u16> {
    (0..frame.height())
        .flat_map(|y| frame.row(y).unwrap().to_vec())
        .collect()
}

/// Deterministic picture with flat areas, edges and noise.
fn picture(width: usize, height: usize, phase: u16) -> Framebuffer {
    let mut frame = Framebuffer::new(width, height, width * 2).unwrap();
    for y in 0..height {
        for (x, px) in frame.row_mut(y).unwrap().iter_mut().enumerate() {
            *px = match (x / 8 + y / 8 + usize::from(phase)) % 3 {
                0 => 0xF800,
                1 => (x as u16).wrapping_mul(31) ^ (y as u16) ^ phase,
                _ => 0x001F,
            };
        }
    }
    frame
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn exact_pipeline_reproduces_every_frame() {
    let mut rig = Rig::new(48, 32, DiffMode::Exact, 0, 0);
    let mut last = None;
    for phase in 0..4 {
        let frame = picture(48, 32, phase);
        rig.send(&frame, Scan::Progressive);
        last = Some(frame);
    }
    let last = last.unwrap();
    let (panel, previous) = rig.finish();
    assert_eq!(panel, visible(&last));
    assert_eq!(visible(&previous), visible(&last));
}

#[test]
fn coarse_pipeline_with_offsets() {
    let mut rig = Rig::new(40, 24, DiffMode::Coarse, 20, 35);
    let first = picture(40, 24, 1);
    rig.send(&first, Scan::Progressive);
    let mut second = first.clone();
    for x in 5..17 {
        second.row_mut(9).unwrap()[x] = 0x07E0;
    }
    second.row_mut(23).unwrap()[39] = 0xFFFF;
    rig.send(&second, Scan::Progressive);

    let (panel, _) = rig.finish();
    assert_eq!(panel, visible(&second));
}

#[test]
fn full_frame_mode_sends_everything() {
    let mut rig = Rig::new(16, 8, DiffMode::Full, 0, 0);
    let frame = picture(16, 8, 2);
    rig.send(&frame, Scan::Progressive);
    let (panel, _) = rig.finish();
    assert_eq!(panel, visible(&frame));
}

#[test]
fn two_interlaced_fields_complete_a_frame() {
    let mut rig = Rig::new(32, 16, DiffMode::Exact, 0, 0);
    let frame = picture(32, 16, 0);
    rig.send(&frame, Scan::Interlaced(FieldParity::Even));
    rig.send(&frame, Scan::Interlaced(FieldParity::Odd));
    let (panel, _) = rig.finish();
    assert_eq!(panel, visible(&frame));
}

#[test]
fn unchanged_frame_queues_nothing() {
    let mut rig = Rig::new(16, 8, DiffMode::Exact, 0, 0);
    let frame = picture(16, 8, 0);
    rig.send(&frame, Scan::Progressive);
    let monitor = rig.session.monitor();
    while monitor.bytes_queued() > 0 {
        std::thread::yield_now();
    }
    let sent = rig.sim.fifo_bytes();

    rig.send(&frame, Scan::Progressive);
    assert!(rig.spans.is_empty());
    let sim = rig.sim.clone();
    let (panel, _) = rig.finish();
    assert_eq!(sim.fifo_bytes(), sent);
    assert_eq!(panel, visible(&frame));
}
