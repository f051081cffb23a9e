//! Whole-program runs against the simulated SPI0 and virtual panel.
//!
//! Run with: cargo test -p mirror --test simulated_run

#![allow(clippy::arithmetic_side_effects)]
#![allow(clippy::indexing_slicing)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::cast_possible_truncation)]

use std::io::Write;

use clap::Parser;
use mirror::source::{Source, TestPattern};
use mirror::{run_on, settings, Cli, Summary};
use platform::{DisplayConfig, Framebuffer, MirrorConfig, PixelSource};
use spibus::{SimulatedPeripherals, StopFlag};

fn config(width: u16, height: u16) -> MirrorConfig {
    let mut config = MirrorConfig {
        display: DisplayConfig {
            width,
            height,
            x_offset: 8,
            y_offset: 16,
            ..DisplayConfig::default()
        },
        ..MirrorConfig::default()
    };
    config.pacing.target_fps = 200;
    config.pacing.stats_interval_secs = 0;
    config.validate().unwrap();
    config
}

/// The visible area of the virtual panel, row by row.
fn panel(sim: &SimulatedPeripherals, config: &MirrorConfig) -> Vec<Vec<u16>> {
    let d = &config.display;
    sim.with_panel(|panel| {
        (0..d.height)
            .map(|y| {
                (0..d.width)
                    .map(|x| panel.pixel(x + d.x_offset, y + d.y_offset).unwrap())
                    .collect()
            })
            .collect()
    })
}

fn rows(frame: &Framebuffer) -> Vec<Vec<u16>> {
    (0..frame.height()).map(|y| frame.row(y).unwrap().to_vec()).collect()
}

fn pattern_frame(config: &MirrorConfig, frames: u64) -> Framebuffer {
    let mut frame = Framebuffer::new(
        usize::from(config.display.width),
        usize::from(config.display.height),
        config.stride_bytes(),
    )
    .unwrap();
    let mut pattern = TestPattern::new();
    for _ in 0..frames {
        pattern.provide_frame(&mut frame).unwrap();
    }
    frame
}

fn run(sim: &SimulatedPeripherals, config: &MirrorConfig, source: &mut impl PixelSource<Error = std::io::Error>, limit: Option<u64>) -> Summary {
    run_on(sim.clone(), config, source, limit, &StopFlag::new()).unwrap()
}

#[test]
fn pattern_run_leaves_the_last_frame_on_the_panel() {
    let config = config(64, 48);
    let sim = SimulatedPeripherals::new(config.display.dc_pin);
    let mut source = Source::Pattern(TestPattern::with_limit(6));

    let summary = run(&sim, &config, &mut source, None);
    assert_eq!(summary.frames, 6);
    assert_eq!(summary.total.interlaced, 0);
    assert_eq!(rows(&summary.shown), rows(&pattern_frame(&config, 6)));
    assert_eq!(panel(&sim, &config), rows(&summary.shown));
    assert!(summary.bus.tasks > 0);

    // pins are handed back
    assert_eq!(sim.control(), platform::peripheral::cs::CLEAR);
}

#[test]
fn frame_limit_stops_an_endless_source() {
    let config = config(32, 16);
    let sim = SimulatedPeripherals::new(config.display.dc_pin);
    let mut source = Source::Pattern(TestPattern::new());
    let summary = run(&sim, &config, &mut source, Some(3));
    assert_eq!(summary.frames, 3);
    assert_eq!(panel(&sim, &config), rows(&pattern_frame(&config, 3)));
}

#[test]
fn slow_bus_falls_back_to_interlacing_and_panel_matches_baseline() {
    let mut config = config(32, 24);
    config.bus.clock_divider = 60_000;
    let sim = SimulatedPeripherals::new(config.display.dc_pin);
    let mut source = Source::Pattern(TestPattern::with_limit(5));

    let summary = run(&sim, &config, &mut source, None);
    assert!(summary.total.interlaced > 0);
    assert_eq!(panel(&sim, &config), rows(&summary.shown));
}

#[test]
fn raw_frames_from_a_file() {
    let config = config(16, 8);
    let frame_bytes = config.stride_bytes() * 8;
    let mut file = tempfile::NamedTempFile::new().unwrap();
    let frames: Vec<Vec<u16>> = (0..4u16)
        .map(|n| (0..(16 * 8) as u16).map(|i| i.wrapping_mul(97) ^ (n << 11)).collect())
        .collect();
    for px in frames.iter().flatten() {
        file.write_all(&px.to_le_bytes()).unwrap();
    }
    file.flush().unwrap();

    let sim = SimulatedPeripherals::new(config.display.dc_pin);
    let mut source = Source::open(file.path().to_str().unwrap(), frame_bytes, None).unwrap();
    let summary = run(&sim, &config, &mut source, None);

    assert_eq!(summary.frames, 4);
    let expected: Vec<Vec<u16>> = frames[3].chunks(16).map(<[u16]>::to_vec).collect();
    assert_eq!(panel(&sim, &config), expected);
}

#[test]
fn raised_stop_ends_the_run_before_any_frame() {
    let config = config(16, 8);
    let sim = SimulatedPeripherals::new(config.display.dc_pin);
    let stop = StopFlag::new();
    stop.raise();
    let mut source = Source::Pattern(TestPattern::new());
    let summary = run_on(sim.clone(), &config, &mut source, None, &stop).unwrap();
    assert_eq!(summary.frames, 0);
    // the init script still cleared the panel
    assert!(panel(&sim, &config).iter().flatten().all(|&px| px == 0));
}

#[test]
fn config_file_drives_a_simulated_run() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "[display]\nwidth = 24\nheight = 12\nrow_order_swap = false\n\n[diff]\nmode = \"coarse\"\n\n[pacing]\ntarget_fps = 400\nstats_interval_secs = 0"
    )
    .unwrap();
    let cli = Cli::try_parse_from(["fbmirror", "--simulate", "--config", file.path().to_str().unwrap(), "--frames", "2"]).unwrap();
    let config = settings::resolve(&cli).unwrap();
    assert!(cli.simulate);

    let sim = SimulatedPeripherals::new(config.display.dc_pin);
    let mut source = Source::open(&cli.source, 0, cli.frames).unwrap();
    let summary = run(&sim, &config, &mut source, cli.frames);
    assert_eq!(summary.frames, 2);
    assert_eq!(panel(&sim, &config), rows(&pattern_frame(&config, 2)));
}
