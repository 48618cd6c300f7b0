//! Per-window summary accumulators
//!
//! The [`Registry`] owns one accumulator per distinct [`Key`] seen in the
//! current window. The first observation of a key creates its accumulator,
//! later observations fold into it and a flush hands every accumulator off
//! as a finalized [`Summary`] while installing an empty registry for the next
//! window. Accumulators are discarded at flush, never reset: the first
//! observation after a flush always creates a fresh one.
//!
//! Accumulators live in an arena in insertion order with a hash index from
//! key to arena slot. Flushing swaps both out under the same lock that guards
//! `record`, so an observation lands either in the window being flushed or in
//! the next one, never both and never neither.

use std::{
    mem,
    sync::{Mutex, MutexGuard, PoisonError},
};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tally_metric::{Metric, Statistic, Stats, Tags};
use tracing::trace;

use crate::{merge::Merges, window::Resolution};

/// Appended to output names when suffixing is enabled.
pub const SUFFIX: &str = ".summary";

/// Errors produced by [`Registry`]
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The metric's unit differs from the unit of the existing summary.
    #[error("Unit mismatch with previous metric {name}: expected {expected:?}, found {found:?}")]
    UnitConflict {
        /// Name of the metric
        name: String,
        /// Unit of the existing summary
        expected: String,
        /// Unit of the rejected metric
        found: String,
    },
    /// The metric's statistic differs from the statistic of the existing
    /// summary.
    #[error("Statistic mismatch with previous metric {name}: expected {expected}, found {found}")]
    StatisticConflict {
        /// Name of the metric
        name: String,
        /// Statistic of the existing summary
        expected: Statistic,
        /// Statistic of the rejected metric
        found: Statistic,
    },
    /// The registry is not accepting observations.
    #[error("Registry is closed, metric {name} rejected")]
    Closed {
        /// Name of the metric
        name: String,
    },
}

impl Error {
    /// Whether this error reports an observation that disagrees with the
    /// existing summary for its key.
    #[must_use]
    pub fn is_schema_conflict(&self) -> bool {
        matches!(
            self,
            Error::UnitConflict { .. } | Error::StatisticConflict { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// Identity of a summary: metric name plus its canonical tag set.
pub struct Key {
    /// Metric name
    pub name: String,
    /// Metric tags
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A finalized summary, one per key per window.
pub struct Summary {
    /// Output name, possibly suffixed
    pub name: String,
    /// Unit shared by every observation in the summary
    pub unit: String,
    /// Statistic kind shared by every observation in the summary
    pub statistic: Statistic,
    /// Resolution derived from the window length
    pub resolution: Resolution,
    /// Tags shared by every observation in the summary
    pub tags: Tags,
    /// Folded statistics
    pub stats: Stats,
    /// End of the window in epoch milliseconds
    pub timestamp: u64,
}

#[derive(Debug, Clone)]
/// Running summary for one key within the current window.
struct Accumulator {
    name: String,
    unit: String,
    statistic: Statistic,
    resolution: Resolution,
    tags: Tags,
    stats: Stats,
}

impl Accumulator {
    fn finalize(self, timestamp: u64) -> Summary {
        Summary {
            name: self.name,
            unit: self.unit,
            statistic: self.statistic,
            resolution: self.resolution,
            tags: self.tags,
            stats: self.stats,
            timestamp,
        }
    }
}

enum Observation {
    Value(f64),
    Stats(Stats),
}

#[derive(Debug, Default)]
struct Inner {
    index: FxHashMap<Key, usize>,
    arena: Vec<Accumulator>,
    open: bool,
}

impl Inner {
    fn take(&mut self) -> Vec<Accumulator> {
        self.index = FxHashMap::default();
        mem::take(&mut self.arena)
    }
}

#[derive(Debug)]
/// Keyed collection of the current window's accumulators.
///
/// A new registry is closed. Call [`Registry::open`] before recording.
pub struct Registry {
    inner: Mutex<Inner>,
    resolution: Resolution,
    suffix: bool,
    merges: Merges,
}

impl Registry {
    /// Create a new, closed, `Registry`.
    ///
    /// Every summary is stamped with `resolution`. When `suffix` is set
    /// output names receive [`SUFFIX`].
    #[must_use]
    pub fn new(resolution: Resolution, suffix: bool, merges: Merges) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            resolution,
            suffix,
            merges,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Every critical section leaves `Inner` consistent before it can
        // panic, so a poisoned lock still guards valid state.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Begin accepting observations.
    pub fn open(&self) {
        self.lock().open = true;
    }

    /// Whether observations are being accepted.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    /// Number of active accumulators
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().arena.len()
    }

    /// Whether no accumulators are active
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().arena.is_empty()
    }

    /// Fold `metric` into the accumulator for its key, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] if the registry is not open, and
    /// [`Error::UnitConflict`] or [`Error::StatisticConflict`] if the metric
    /// disagrees with the existing accumulator for its key. No state changes
    /// on error.
    pub fn record(&self, metric: Metric) -> Result<(), Error> {
        let (key, unit, statistic, observation) = match metric {
            Metric::Single(s) => (
                Key {
                    name: s.name,
                    tags: s.tags,
                },
                s.unit,
                s.statistic,
                Observation::Value(s.value),
            ),
            Metric::Summary(a) => (
                Key {
                    name: a.name,
                    tags: a.tags,
                },
                a.unit,
                a.statistic,
                Observation::Stats(a.stats),
            ),
        };

        let mut inner = self.lock();
        if !inner.open {
            return Err(Error::Closed { name: key.name });
        }

        let slot = if let Some(&slot) = inner.index.get(&key) {
            let existing = &inner.arena[slot];
            if existing.unit != unit {
                return Err(Error::UnitConflict {
                    name: key.name,
                    expected: existing.unit.clone(),
                    found: unit,
                });
            }
            if existing.statistic != statistic {
                return Err(Error::StatisticConflict {
                    name: key.name,
                    expected: existing.statistic,
                    found: statistic,
                });
            }
            slot
        } else {
            let name = if self.suffix {
                format!("{}{SUFFIX}", key.name)
            } else {
                key.name.clone()
            };
            trace!(metric = %key.name, output = %name, "Creating summary");
            let slot = inner.arena.len();
            inner.arena.push(Accumulator {
                name,
                unit,
                statistic,
                resolution: self.resolution,
                tags: key.tags.clone(),
                stats: Stats::empty(),
            });
            inner.index.insert(key, slot);
            slot
        };

        let strategy = self.merges.get(statistic);
        let stats = &mut inner.arena[slot].stats;
        match observation {
            Observation::Value(value) => strategy.record(stats, value),
            Observation::Stats(other) => strategy.merge(stats, &other),
        }
        Ok(())
    }

    /// Swap out every accumulator and return them as summaries stamped with
    /// `timestamp`, in the order their keys were first observed.
    ///
    /// The registry stays open.
    pub fn finalize_and_clear(&self, timestamp: u64) -> Vec<Summary> {
        let taken = self.lock().take();
        finalize(taken, timestamp)
    }

    /// As [`Registry::finalize_and_clear`], additionally closing the
    /// registry under the same lock. No observation is accepted afterward.
    pub fn close_and_finalize(&self, timestamp: u64) -> Vec<Summary> {
        let taken = {
            let mut inner = self.lock();
            inner.open = false;
            inner.take()
        };
        finalize(taken, timestamp)
    }
}

fn finalize(accumulators: Vec<Accumulator>, timestamp: u64) -> Vec<Summary> {
    accumulators
        .into_iter()
        .map(|acc| acc.finalize(timestamp))
        .collect()
}
