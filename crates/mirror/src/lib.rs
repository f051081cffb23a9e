//! `fbmirror`: mirror an RGB565 framebuffer to an ST7789 panel over SPI0
//!
//! ```text
//! PixelSource ─► FrameClock ─► Mirror::post ─► BusSession ─► SPI0 ─► panel
//!                   ▲               │
//!                   └── InFlight ◄──┘  (at most two frames queued)
//! ```
//!
//! # Modules
//!
//! - [`cli`] - command line flags and config overrides
//! - [`settings`] - TOML loading, override merge and validation
//! - [`logging`] - `tracing` subscriber setup
//! - [`signals`] - shutdown signal handling
//! - [`source`] - test pattern and raw RGB565 frame sources
//! - [`pacing`] - frame clock, in-flight limit and the interlace heuristic
//! - [`pipeline`] - per-frame diff, coalesce and submit
//! - [`stats`] - frame rate history and periodic statistics
//! - [`app`] - startup, frame loop and teardown

// ── Lint policy ─────────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)] // no .unwrap() in production code
#![deny(clippy::expect_used)] // no .expect() in production code
#![deny(clippy::panic)] // no panic!() in production code
#![deny(unused_must_use)]
// all Results must be handled
// ────────────────────────────────────────────────────────────────────────────
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::print_stdout)] // prefer tracing over println! in lib code
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod app;
pub mod cli;
pub mod logging;
pub mod pacing;
pub mod pipeline;
pub mod signals;
pub mod settings;
pub mod source;
pub mod stats;

pub use app::{run, run_on, Backend, Summary};
pub use cli::Cli;
pub use pipeline::{FrameError, Mirror, Outcome};
