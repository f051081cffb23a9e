//! SPI0 bus driver for an ST7789 panel
//!
//! Everything between a [`SpanList`](framediff::SpanList) and the wire:
//!
//! ```text
//! frame thread                          bus thread ("spi-bus")
//! ────────────                          ──────────────────────
//! DisplayProtocol::submit
//!   └─► Producer ──► TaskQueue (ring) ──► Consumer ──► SpiTransport ──► SPI0 FIFO
//!                         │                                 │
//!                    futex on tail                    D/C line (GPIO)
//! ```
//!
//! # Modules
//!
//! - [`queue`] - single-producer single-consumer byte ring of bus tasks
//! - [`transport`] - polled SPI0 master with D/C switching
//! - [`protocol`] - span to CASET/RASET/RAMWR translation with cursor tracking
//! - [`init`] - panel reset, init script and screen clear
//! - [`session`] - bus thread lifecycle
//! - [`board`] - pin muxing and SPI0 claim/release
//! - [`mmio`] - `/dev/mem` register window
//! - [`sim`] - simulated peripherals and a virtual panel

// ── Lint policy ─────────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)] // no .unwrap() in production code
#![deny(clippy::expect_used)] // no .expect() in production code
#![deny(clippy::panic)] // no panic!() in production code
#![deny(clippy::unreachable)] // no unreachable!() that isn't documented
#![deny(unused_must_use)]
// all Results must be handled
// ────────────────────────────────────────────────────────────────────────────
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(unsafe_op_in_unsafe_fn)] // unsafe fn body is not implicitly unsafe block
#![warn(clippy::print_stdout)] // prefer tracing over println! in lib code
#![allow(clippy::doc_markdown)] // register and command names in doc comments
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod board;
pub mod init;
#[cfg(unix)]
pub mod mmio;
pub mod protocol;
pub mod queue;
pub mod session;
pub mod sim;
pub mod transport;

pub use board::{Board, BoardError};
pub use init::{initialize, InitParams, ThreadDelay};
#[cfg(unix)]
pub use mmio::{DevMem, HardwareError};
pub use protocol::{DisplayProtocol, FrameStats};
pub use queue::{Consumer, Poll, Producer, QueueError, QueueMonitor, StopFlag, Task, TaskQueue, HEADER_BYTES};
pub use session::{BusReport, BusSession, SessionError};
pub use sim::{SimulatedPeripherals, VirtualPanel};
pub use transport::{SpiTransport, TransportError};
