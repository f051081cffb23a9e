//! Startup, frame loop and teardown
//!
//! One run claims SPI0 on a register backend, runs the panel init script,
//! starts the bus thread and then feeds source frames through the
//! [`Mirror`] until the source ends, the frame limit is hit or a shutdown
//! signal arrives. Teardown always drains the queue and releases the pins,
//! also when the loop failed.

use std::time::Instant;

use anyhow::{Context, Result};
use platform::{Framebuffer, MirrorConfig, PixelSource, RegisterBlock};
use spibus::{initialize, Board, BusReport, BusSession, InitParams, QueueError, SimulatedPeripherals, StopFlag, ThreadDelay};

use crate::pacing::FrameClock;
use crate::pipeline::{FrameError, Mirror, Outcome};
use crate::stats::{Statistics, Window};

/// Where the register window comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// `/dev/mem` mapping of the peripheral block.
    Hardware,
    /// In-memory SPI0 and GPIO with a virtual panel.
    Simulated,
}

/// How a run ended.
#[derive(Debug)]
pub struct Summary {
    /// Source frames read.
    pub frames: u64,
    /// Counters over the whole run.
    pub total: Window,
    /// Bus thread counters.
    pub bus: BusReport,
    /// What the panel shows at exit.
    pub shown: Framebuffer,
}

/// Run on the selected backend.
pub fn run<S>(backend: Backend, config: &MirrorConfig, source: &mut S, limit: Option<u64>, stop: &StopFlag) -> Result<Summary>
where
    S: PixelSource,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    match backend {
        Backend::Simulated => run_on(SimulatedPeripherals::new(config.display.dc_pin), config, source, limit, stop),
        #[cfg(unix)]
        Backend::Hardware => {
            let window = spibus::DevMem::open(config.bus.peripheral_base, config.bus.peripheral_size)
                .context("peripheral registers unavailable (run as root on a Raspberry Pi, or pass --simulate)")?;
            run_on(window, config, source, limit, stop)
        }
        #[cfg(not(unix))]
        Backend::Hardware => anyhow::bail!("the hardware backend needs /dev/mem"),
    }
}

/// Run on an explicit register window.
pub fn run_on<R, S>(regs: R, config: &MirrorConfig, source: &mut S, limit: Option<u64>, stop: &StopFlag) -> Result<Summary>
where
    R: RegisterBlock + Clone + Send + 'static,
    S: PixelSource,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let board = Board::attach(regs, &config.display).context("failed to claim SPI0 and the display lines")?;
    let mut transport = board.transport()?;
    let mut reset = board.reset_line()?;
    initialize(
        &mut transport,
        reset.as_mut(),
        &mut ThreadDelay,
        &InitParams::from_config(config),
    )
    .context("panel init failed")?;

    let mut session = BusSession::start(config.queue_bytes(), transport, stop.clone())?;
    let mut mirror = Mirror::new(config)?;
    let mut stats = Statistics::new(config.pacing.stats_interval_secs, Instant::now());

    let looped = frame_loop(&mut session, &mut mirror, &mut stats, config, source, limit, stop);

    let bus = session.shutdown().context("bus thread failed");
    board.release().context("failed to release SPI0")?;
    let frames = looped?;
    let bus = bus?;

    let total = stats.total();
    tracing::info!(
        frames,
        sent = total.frames,
        interlaced = total.interlaced,
        unchanged = total.unchanged,
        bytes = total.sent.bytes,
        "mirror stopped"
    );
    Ok(Summary {
        frames,
        total,
        bus,
        shown: mirror.previous().clone(),
    })
}

/// Returns the number of source frames read.
fn frame_loop<S>(
    session: &mut BusSession,
    mirror: &mut Mirror,
    stats: &mut Statistics,
    config: &MirrorConfig,
    source: &mut S,
    limit: Option<u64>,
    stop: &StopFlag,
) -> Result<u64>
where
    S: PixelSource,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let mut clock = FrameClock::new(config.pacing.target_fps);
    let mut frame = mirror.blank_frame();
    let mut frames: u64 = 0;

    while limit.map_or(true, |limit| frames < limit) {
        if !clock.wait(stop) {
            break;
        }
        stats.stalled(mirror.wait_for_bus(session, stop));
        if stop.is_raised() {
            break;
        }
        if !source.provide_frame(&mut frame).context("frame source failed")? {
            tracing::info!(frames, "frame source ended");
            break;
        }
        frames = frames.saturating_add(1);

        match mirror.post(session, &frame) {
            Ok(Outcome::Sent { scan, stats: sent }) => stats.frame_sent(Instant::now(), &sent, scan.is_interlaced()),
            Ok(Outcome::Unchanged) => stats.frame_unchanged(),
            Err(FrameError::Queue(QueueError::Closed)) if stop.is_raised() => break,
            Err(err) => return Err(err.into()),
        }
        stats.maybe_log(Instant::now());
    }
    if stop.is_raised() {
        tracing::info!(frames, "shutdown requested");
    }
    Ok(frames)
}
