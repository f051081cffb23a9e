//! Hardware Abstraction Layer (HAL) for the SPI framebuffer mirror
//!
//! This crate provides the register-level and data-model building blocks the
//! rest of the workspace is written against, so the diff engine and the bus
//! driver can be developed and tested without a Raspberry Pi attached.
//!
//! # Architecture Layers
//!
//! ```text
//! Application Layer (mirror crate: frame loop, pacing, CLI)
//!         ↓
//! Feature Layers (framediff, spibus)
//!         ↓
//! Platform HAL (this crate - registers, pins, framebuffer, config)
//!         ↓
//! Hardware Layer (/dev/mem window or simulated peripherals)
//! ```
//!
//! # Modules
//!
//! - [`register`] - 32-bit register window trait and peripheral offsets
//! - [`gpio`] - function select and `embedded-hal` output lines (D/C, RESET)
//! - [`peripheral`] - SPI0 register map and bus clock configuration
//! - [`display`] - ST7789 command set and parameter encoding
//! - [`framebuffer`] - RGB565 storage and the [`PixelSource`] seam
//! - [`config`] - startup configuration and validation
//!
//! # Features
//!
//! - `std`: `std::error::Error` impls (enabled by default)

// ── Lint policy ─────────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)] // no .unwrap() in production code
#![deny(clippy::expect_used)] // no .expect() in production code
#![deny(clippy::panic)] // no panic!() in production code
#![deny(clippy::unreachable)] // no unreachable!() that isn't documented
#![deny(unused_must_use)]
// all Results must be handled
// ────────────────────────────────────────────────────────────────────────────
#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(unsafe_op_in_unsafe_fn)] // unsafe fn body is not implicitly unsafe block
#![warn(clippy::print_stdout)] // prefer tracing over println! in lib code
// Pedantic lints suppressed for this hardware HAL crate:
#![allow(clippy::doc_markdown)] // hex addresses and register names in doc comments
#![allow(clippy::must_use_candidate)] // hardware accessors
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

extern crate alloc;
#[cfg(all(feature = "std", not(test)))]
extern crate std;

pub mod config;
pub mod display;
pub mod framebuffer;
pub mod gpio;
pub mod peripheral;
pub mod register;

pub use config::{BusConfig, ConfigError, DiffConfig, DiffMode, DisplayConfig, MirrorConfig, PacingConfig};
pub use display::Command;
pub use framebuffer::{Framebuffer, FramebufferError, PixelSource};
pub use gpio::{Function, GpioBank, GpioError, OutputLine};
pub use peripheral::{SpiConfig, SpiRegisters};
pub use register::{RegisterBlock, RegisterError};
