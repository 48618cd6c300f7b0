//! Single and pre-aggregated metric observations

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::stats::{Statistic, Stats};

/// The tags of a metric.
///
/// An ordered map is the canonical form: two tag sets with equal content are
/// equal and hash equally no matter the order their entries were inserted in.
pub type Tags = BTreeMap<String, String>;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
/// A single scalar observation.
pub struct Single {
    /// Name of the metric, e.g. `http.request.duration`
    pub name: String,
    /// Unit of `value`, e.g. `milliseconds`
    pub unit: String,
    /// The observed value
    pub value: f64,
    /// The statistic kind this observation contributes to
    #[serde(default)]
    pub statistic: Statistic,
    /// Tags identifying the metric alongside its name
    #[serde(default)]
    pub tags: Tags,
}

impl Single {
    /// Create a new observation with no tags and the default statistic.
    pub fn new<N, U>(name: N, unit: U, value: f64) -> Self
    where
        N: Into<String>,
        U: Into<String>,
    {
        Self {
            name: name.into(),
            unit: unit.into(),
            value,
            statistic: Statistic::default(),
            tags: Tags::new(),
        }
    }

    /// Add a tag to this observation.
    #[must_use]
    pub fn tag<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Set the statistic kind of this observation.
    #[must_use]
    pub fn statistic(mut self, statistic: Statistic) -> Self {
        self.statistic = statistic;
        self
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
/// Statistics summarized by some upstream component.
pub struct Aggregate {
    /// Name of the metric
    pub name: String,
    /// Unit of the summarized values
    pub unit: String,
    /// The statistic kind of `stats`
    #[serde(default)]
    pub statistic: Statistic,
    /// Tags identifying the metric alongside its name
    #[serde(default)]
    pub tags: Tags,
    /// The summarized values
    pub stats: Stats,
}

impl Aggregate {
    /// Create a new aggregate with no tags and the default statistic.
    pub fn new<N, U>(name: N, unit: U, stats: Stats) -> Self
    where
        N: Into<String>,
        U: Into<String>,
    {
        Self {
            name: name.into(),
            unit: unit.into(),
            statistic: Statistic::default(),
            tags: Tags::new(),
            stats,
        }
    }

    /// Add a tag to this aggregate.
    #[must_use]
    pub fn tag<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Set the statistic kind of this aggregate.
    #[must_use]
    pub fn statistic(mut self, statistic: Statistic) -> Self {
        self.statistic = statistic;
        self
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
/// A metric observation in either of its shapes.
pub enum Metric {
    /// A single scalar observation
    Single(Single),
    /// A pre-aggregated summary
    Summary(Aggregate),
}

impl Metric {
    /// Whether this metric carries a single scalar value.
    #[must_use]
    pub fn is_single(&self) -> bool {
        matches!(self, Metric::Single(_))
    }

    /// Whether this metric carries pre-aggregated statistics.
    #[must_use]
    pub fn is_summary(&self) -> bool {
        matches!(self, Metric::Summary(_))
    }

    /// Name of the metric.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Metric::Single(s) => &s.name,
            Metric::Summary(a) => &a.name,
        }
    }

    /// Unit of the metric.
    #[must_use]
    pub fn unit(&self) -> &str {
        match self {
            Metric::Single(s) => &s.unit,
            Metric::Summary(a) => &a.unit,
        }
    }

    /// Statistic kind of the metric.
    #[must_use]
    pub fn statistic(&self) -> Statistic {
        match self {
            Metric::Single(s) => s.statistic,
            Metric::Summary(a) => a.statistic,
        }
    }

    /// Tags of the metric.
    #[must_use]
    pub fn tags(&self) -> &Tags {
        match self {
            Metric::Single(s) => &s.tags,
            Metric::Summary(a) => &a.tags,
        }
    }
}

impl From<Single> for Metric {
    fn from(single: Single) -> Self {
        Metric::Single(single)
    }
}

impl From<Aggregate> for Metric {
    fn from(aggregate: Aggregate) -> Self {
        Metric::Summary(aggregate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn capabilities_distinguish_shapes() {
        let single: Metric = Single::new("a", "count", 1.0).into();
        let summary: Metric = Aggregate::new("a", "count", Stats::of(1.0)).into();

        assert!(single.is_single() && !single.is_summary());
        assert!(summary.is_summary() && !summary.is_single());
    }

    #[test]
    fn deserialize_single_line() {
        let line = r#"{"type":"single","name":"test.count","unit":"count","value":2}"#;
        let metric: Metric = serde_json::from_str(line).unwrap();

        assert_eq!(metric, Single::new("test.count", "count", 2.0).into());
        assert_eq!(metric.statistic(), Statistic::Summary);
        assert!(metric.tags().is_empty());
    }

    #[test]
    fn deserialize_summary_line() {
        let line = r#"{"type":"summary","name":"rtt","unit":"ms","statistic":"average",
            "tags":{"host":"a"},"stats":{"sum":10,"min":1,"max":9,"count":2}}"#;
        let metric: Metric = serde_json::from_str(line).unwrap();

        let expected = Aggregate::new(
            "rtt",
            "ms",
            Stats {
                sum: 10.0,
                min: 1.0,
                max: 9.0,
                count: 2,
            },
        )
        .tag("host", "a")
        .statistic(Statistic::Average);
        assert_eq!(metric, expected.into());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let line = r#"{"type":"single","name":"a","unit":"b","value":1,"colour":"red"}"#;
        assert!(serde_json::from_str::<Metric>(line).is_err());
    }

    proptest! {
        #[test]
        fn tag_insertion_order_does_not_matter(tags in prop::collection::btree_map("[a-z]{1,4}", "[a-z]{1,4}", 0..8)) {
            let forward = tags.iter().fold(Single::new("m", "u", 0.0), |s, (k, v)| s.tag(k.clone(), v.clone()));
            let backward = tags.iter().rev().fold(Single::new("m", "u", 0.0), |s, (k, v)| s.tag(k.clone(), v.clone()));

            prop_assert_eq!(forward, backward);
        }
    }
}
