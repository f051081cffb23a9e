//! Frame differencing and span coalescing
//!
//! Finds the regions of an RGB565 framebuffer that changed since the last
//! frame sent to the panel, then merges nearby regions so the bus sees fewer,
//! larger transfers.
//!
//! # Pipeline
//!
//! ```text
//! current + previous ──► FrameDiffer::diff ──► SpanList ──► coalesce ──► SpanList
//!                        (exact | coarse | full)             (progressive only)
//! ```
//!
//! # Modules
//!
//! - [`span`] - span type and the reusable span arena
//! - [`differ`] - the three diff strategies and strategy selection
//! - [`coalesce`] - greedy merging of spans under a waste and size budget

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
#![warn(clippy::print_stdout)] // prefer tracing over println! in lib code
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

extern crate alloc;
#[cfg(all(feature = "std", not(test)))]
extern crate std;

pub mod coalesce;
pub mod differ;
pub mod span;

pub use coalesce::coalesce;
pub use differ::{
    count_changed_pixels, full_frame, select, CoarseDiffer, DiffError, ExactDiffer, FieldParity, FrameDiffer,
    FullFrame, Scan,
};
pub use span::{Span, SpanId, SpanList};
