//! Metric observations consumed by tally
//!
//! A metric arrives in one of two shapes. A [`Single`] carries one scalar
//! observation, an [`Aggregate`] carries statistics that some upstream
//! component has already summarized. Both are identified by a name and a set
//! of [`Tags`]. The summary engine groups observations by that identity and
//! folds them together; this crate only defines the values, not what is done
//! with them.

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
#![allow(clippy::multiple_crate_versions)]

pub mod metric;
pub mod stats;

pub use metric::{Aggregate, Metric, Single, Tags};
pub use stats::{Statistic, Stats};
