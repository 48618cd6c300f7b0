//! Statistics carried by aggregated observations

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
/// The kind of statistic a metric represents.
///
/// Downstream consumers use this to decide which of the [`Stats`] fields are
/// meaningful. It is fixed for the lifetime of a summary.
pub enum Statistic {
    /// Count, sum, min and max are all meaningful.
    #[default]
    Summary,
    /// Only the sum is meaningful.
    Sum,
    /// Sum divided by count.
    Average,
    /// Only the minimum is meaningful.
    Min,
    /// Only the maximum is meaningful.
    Max,
    /// Only the count is meaningful.
    Count,
}

impl std::fmt::Display for Statistic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Statistic::Summary => "summary",
            Statistic::Sum => "sum",
            Statistic::Average => "average",
            Statistic::Min => "min",
            Statistic::Max => "max",
            Statistic::Count => "count",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
/// Running statistics of a metric.
///
/// An empty `Stats` has a count of zero, a sum of zero and min/max set to the
/// identities of their respective operations, positive and negative infinity.
pub struct Stats {
    /// Sum of all observed values
    pub sum: f64,
    /// Smallest observed value
    pub min: f64,
    /// Largest observed value
    pub max: f64,
    /// Number of observed values
    pub count: u64,
}

impl Stats {
    /// Create an empty `Stats`.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            count: 0,
        }
    }

    /// Create `Stats` describing exactly one observation of `value`.
    #[must_use]
    pub const fn of(value: f64) -> Self {
        Self {
            sum: value,
            min: value,
            max: value,
            count: 1,
        }
    }

    /// Whether any observation has contributed to these stats.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The arithmetic mean, if any observation was made.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum / self.count as f64)
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_has_identities() {
        let s = Stats::empty();
        assert!(s.is_empty());
        assert_eq!(s.mean(), None);
        assert!(s.min.is_infinite() && s.min.is_sign_positive());
        assert!(s.max.is_infinite() && s.max.is_sign_negative());
    }

    #[test]
    fn mean_of_observations() {
        let s = Stats {
            sum: 9.0,
            min: 1.0,
            max: 5.0,
            count: 3,
        };
        assert_eq!(s.mean(), Some(3.0));
    }

    #[test]
    fn statistic_serializes_snake_case() {
        let s = serde_json::to_string(&Statistic::Average).unwrap();
        assert_eq!(s, "\"average\"");
        let parsed: Statistic = serde_json::from_str("\"count\"").unwrap();
        assert_eq!(parsed, Statistic::Count);
        assert_eq!(Statistic::default().to_string(), "summary");
    }
}
