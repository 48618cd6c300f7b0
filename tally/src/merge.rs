//! Strategies for folding observations into running statistics
//!
//! Every summary has a [`Statistic`] kind and every kind has a [`Merge`]
//! strategy that says how a single value or a pre-aggregated [`Stats`] is
//! folded into the summary's running stats. The [`Merges`] table maps kinds
//! to strategies and falls back to [`FourField`] for any kind without an
//! explicit entry.
//!
//! # Laws
//!
//! Observations for one key arrive in no particular order and a window may
//! contain any mixture of single and pre-aggregated observations, so a
//! strategy must satisfy, for all stats `a`, `b`, `c` and value `v`:
//!
//!  * `merge` is commutative: `a ⊕ b == b ⊕ a`
//!  * `merge` is associative: `(a ⊕ b) ⊕ c == a ⊕ (b ⊕ c)`
//!  * `record(v)` agrees with merging one observation: `a ⊕ v == a ⊕ of(v)`
//!
//! Floating point sums are only associative up to rounding.

use std::{fmt, sync::Arc};

use rustc_hash::FxHashMap;
use tally_metric::{Statistic, Stats};

/// How observations are folded into running [`Stats`]
pub trait Merge: fmt::Debug + Send + Sync {
    /// Fold one scalar observation into `stats`.
    fn record(&self, stats: &mut Stats, value: f64);

    /// Fold pre-aggregated `other` into `stats`.
    fn merge(&self, stats: &mut Stats, other: &Stats);
}

#[derive(Debug, Clone, Copy, Default)]
/// Count, sum, min and max folded independently.
///
/// A single value adds one to count, adds itself to sum and competes for min
/// and max. Pre-aggregated stats add their count and sum and compete with
/// their min and max.
pub struct FourField;

impl Merge for FourField {
    fn record(&self, stats: &mut Stats, value: f64) {
        stats.count += 1;
        stats.sum += value;
        stats.min = stats.min.min(value);
        stats.max = stats.max.max(value);
    }

    fn merge(&self, stats: &mut Stats, other: &Stats) {
        stats.count += other.count;
        stats.sum += other.sum;
        stats.min = stats.min.min(other.min);
        stats.max = stats.max.max(other.max);
    }
}

#[derive(Debug, Clone)]
/// Table of [`Merge`] strategies keyed by [`Statistic`].
pub struct Merges {
    default: Arc<dyn Merge>,
    by_statistic: FxHashMap<Statistic, Arc<dyn Merge>>,
}

impl Default for Merges {
    fn default() -> Self {
        Self {
            default: Arc::new(FourField),
            by_statistic: FxHashMap::default(),
        }
    }
}

impl Merges {
    /// Use `strategy` for summaries of kind `statistic`.
    #[must_use]
    pub fn with<M>(mut self, statistic: Statistic, strategy: M) -> Self
    where
        M: Merge + 'static,
    {
        self.by_statistic.insert(statistic, Arc::new(strategy));
        self
    }

    /// The strategy for `statistic`.
    #[must_use]
    pub fn get(&self, statistic: Statistic) -> &dyn Merge {
        self.by_statistic
            .get(&statistic)
            .map_or(&*self.default, |strategy| &**strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn stats() -> impl Strategy<Value = Stats> {
        prop::collection::vec(-1_000i32..1_000, 1..16).prop_map(|values| {
            let mut s = Stats::empty();
            for v in values {
                FourField.record(&mut s, f64::from(v));
            }
            s
        })
    }

    fn merged(a: &Stats, b: &Stats) -> Stats {
        let mut out = *a;
        FourField.merge(&mut out, b);
        out
    }

    #[derive(Debug)]
    struct SumOnly;

    impl Merge for SumOnly {
        fn record(&self, stats: &mut Stats, value: f64) {
            stats.sum += value;
        }

        fn merge(&self, stats: &mut Stats, other: &Stats) {
            stats.sum += other.sum;
        }
    }

    #[test]
    fn four_field_record() {
        let mut s = Stats::empty();
        FourField.record(&mut s, 1.0);
        FourField.record(&mut s, 2.0);
        assert_eq!(
            s,
            Stats {
                sum: 3.0,
                min: 1.0,
                max: 2.0,
                count: 2
            }
        );
    }

    #[test]
    fn four_field_merge_into_empty_is_identity() {
        let other = Stats {
            sum: 10.0,
            min: -2.0,
            max: 7.0,
            count: 4,
        };
        assert_eq!(merged(&Stats::empty(), &other), other);
    }

    #[test]
    fn table_falls_back_to_default() {
        let merges = Merges::default().with(Statistic::Sum, SumOnly);

        let mut s = Stats::empty();
        merges.get(Statistic::Sum).record(&mut s, 5.0);
        assert_eq!(s.count, 0);
        assert!((s.sum - 5.0).abs() < f64::EPSILON);

        let mut s = Stats::empty();
        merges.get(Statistic::Summary).record(&mut s, 5.0);
        assert_eq!(s, Stats::of(5.0));
    }

    proptest! {
        // Integer-valued inputs keep the float sums exact.
        #[test]
        fn merge_commutes(a in stats(), b in stats()) {
            prop_assert_eq!(merged(&a, &b), merged(&b, &a));
        }

        #[test]
        fn merge_associates(a in stats(), b in stats(), c in stats()) {
            prop_assert_eq!(merged(&merged(&a, &b), &c), merged(&a, &merged(&b, &c)));
        }

        #[test]
        fn record_agrees_with_merge_of_one(a in stats(), v in -1_000i32..1_000) {
            let mut recorded = a;
            FourField.record(&mut recorded, f64::from(v));
            prop_assert_eq!(recorded, merged(&a, &Stats::of(f64::from(v))));
        }
    }
}
