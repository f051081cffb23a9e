// Application binary: errors end the process with a message and exit status 1.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use mirror::source::Source;
use mirror::{logging, settings, signals, Backend, Cli};
use spibus::StopFlag;

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = logging::init(cli.log_level.as_deref()) {
        eprintln!("fbmirror: {err:#}");
        return ExitCode::FAILURE;
    }
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "fbmirror failed");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = settings::resolve(cli)?;
    if cli.print_config {
        print!("{}", settings::render(&config)?);
        return Ok(());
    }

    let stop = StopFlag::new();
    signals::install(&stop).context("failed to install signal handlers")?;

    let backend = if cli.simulate { Backend::Simulated } else { Backend::Hardware };
    tracing::info!(
        version = platform::config::APP_VERSION,
        simulate = cli.simulate,
        width = config.display.width,
        height = config.display.height,
        diff = config.diff.mode.as_str(),
        fps = config.pacing.target_fps,
        "starting"
    );

    let frame_bytes = config.stride_bytes().saturating_mul(usize::from(config.display.height));
    let mut source = Source::open(&cli.source, frame_bytes, cli.frames)?;
    let summary = mirror::run(backend, &config, &mut source, cli.frames, &stop)?;
    tracing::info!(
        frames = summary.frames,
        bus_tasks = summary.bus.tasks,
        bus_bytes = summary.bus.bytes,
        signals = signals::received(),
        "done"
    );
    Ok(())
}
