//! Window-aligned metric summaries.
//!
//! This library groups metric observations by name and tags, folds them into
//! running statistics and, once per window, hands one finalized summary per
//! group to any registered observer. Window boundaries are multiples of the
//! window length in epoch time so that independent processes summarizing the
//! same metrics agree on when a window begins and ends without talking to
//! one another.
//!
//! The caller drives the [`processor::Processor`]: `start` once, `process`
//! observations as they arrive, `ping` periodically and `stop` at the end.
//! Nothing in this library owns a timer; the `tally` binary is one such
//! caller.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

pub mod clock;
pub mod config;
pub mod merge;
pub mod observer;
pub mod processor;
pub mod registry;
pub mod window;

pub use tally_metric as metric;
