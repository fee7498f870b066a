//! Label cardinality model.
//!
//! The [`LabelModel`] owns every label name the workload may emit together with
//! its value pool. A pool is either enumerated in the configuration or
//! generated from a cardinality as `"{name}-0" .. "{name}-{N-1}"`, so the same
//! configuration always yields the same value space.

use crate::errors::{ModelError, PickError};
use crate::generator::LogFormat;
use crate::weighted::WeightedSelector;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Label that selects the line format of a stream.
pub const FORMAT_LABEL: &str = "format";

/// Label identifying the virtual user that pushed a stream.
pub const INSTANCE_LABEL: &str = "instance";

/// Internal label name returned by label discovery that is never queried.
pub const NAME_LABEL: &str = "__name__";

/// Largest cardinality a generated label may declare.
pub const MAX_CARDINALITY: i64 = 1_000_000;

/// Value domain of one label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LabelDomain {
    /// Generate this many values named `"{label}-{i}"`.
    Generated(i64),
    /// Use exactly these values.
    Enumerated(Vec<String>),
}

impl LabelDomain {
    /// Materialize the value pool for the label `name`.
    pub fn values(&self, name: &str) -> Result<Vec<String>, ModelError> {
        match self {
            LabelDomain::Generated(n) if *n <= 0 => Err(ModelError::InvalidCardinality {
                label: name.to_string(),
                value: *n,
            }),
            LabelDomain::Generated(n) if *n > MAX_CARDINALITY => {
                Err(ModelError::CardinalityTooLarge {
                    label: name.to_string(),
                    value: *n,
                    max: MAX_CARDINALITY,
                })
            }
            LabelDomain::Generated(n) => Ok((0..*n).map(|i| format!("{name}-{i}")).collect()),
            LabelDomain::Enumerated(values) if values.is_empty() => {
                Err(ModelError::EmptyLabelDomain {
                    label: name.to_string(),
                })
            }
            LabelDomain::Enumerated(values) => Ok(values.clone()),
        }
    }
}

/// Mapping from label name to its value domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelConfig(BTreeMap<String, LabelDomain>);

impl LabelConfig {
    /// An empty configuration. Use [`LabelConfig::default`] for the stock
    /// `format` and `os` pools.
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    /// Stock pools plus one generated label per `(name, cardinality)` pair.
    pub fn with_cardinalities<S: Into<String>>(
        cardinalities: impl IntoIterator<Item = (S, i64)>,
    ) -> Self {
        cardinalities
            .into_iter()
            .fold(Self::default(), |config, (name, n)| config.cardinality(name, n))
    }

    pub fn cardinality(mut self, name: impl Into<String>, n: i64) -> Self {
        self.0.insert(name.into(), LabelDomain::Generated(n));
        self
    }

    pub fn enumerated<S: Into<String>>(
        mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = S>,
    ) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.0.insert(name.into(), LabelDomain::Enumerated(values));
        self
    }

    /// Override entries of `self` with those of `other`.
    pub fn merge(mut self, other: LabelConfig) -> Self {
        self.0.extend(other.0);
        self
    }

    pub fn get(&self, name: &str) -> Option<&LabelDomain> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &LabelDomain)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self::empty()
            .enumerated(FORMAT_LABEL, LogFormat::DEFAULT_POOL.iter().map(|f| f.as_str()))
            .enumerated("os", ["darwin", "linux", "windows"])
    }
}

/// How values are drawn from a label's pool.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum LabelSampling {
    /// Every value is equally likely.
    #[default]
    Uniform,
    /// With probability `top_label_probability` the value comes from the
    /// first tenth of the pool (at least one value); otherwise any value.
    TopWeighted { top_label_probability: f64 },
}

impl LabelSampling {
    fn weights(&self, n: usize) -> Vec<f64> {
        match *self {
            LabelSampling::Uniform => vec![1.0; n],
            LabelSampling::TopWeighted {
                top_label_probability: p,
            } => {
                let top = n.div_ceil(10).max(1);
                let base = (1.0 - p) / n as f64;
                (0..n)
                    .map(|i| if i < top { base + p / top as f64 } else { base })
                    .collect()
            }
        }
    }
}

#[derive(Debug, Clone)]
struct LabelPool {
    values: Vec<String>,
    selector: WeightedSelector<usize>,
}

/// Read-only universe of label names and values.
#[derive(Debug, Clone)]
pub struct LabelModel {
    pools: BTreeMap<String, LabelPool>,
    formats: Vec<LogFormat>,
    sampling: LabelSampling,
}

impl LabelModel {
    /// Validate `config` and precompute per-label selectors.
    pub fn new(config: &LabelConfig, sampling: LabelSampling) -> Result<Self, ModelError> {
        if let LabelSampling::TopWeighted {
            top_label_probability: p,
        } = sampling
        {
            if !(0.0..=1.0).contains(&p) {
                return Err(ModelError::InvalidProbability(p));
            }
        }

        let formats = match config.get(FORMAT_LABEL) {
            None => return Err(ModelError::MissingFormatLabel),
            Some(LabelDomain::Generated(_)) => return Err(ModelError::GeneratedFormatLabel),
            Some(domain) => domain
                .values(FORMAT_LABEL)?
                .iter()
                .map(|v| v.parse::<LogFormat>())
                .collect::<Result<Vec<_>, _>>()?,
        };

        let mut pools = BTreeMap::new();
        for (name, domain) in config.iter() {
            if !is_valid_label_name(name) {
                return Err(ModelError::InvalidLabelName(name.clone()));
            }
            let values = domain.values(name)?;
            let weighted = sampling
                .weights(values.len())
                .into_iter()
                .enumerate()
                // a zero weight can only come from p == 1 on a non-top value
                .filter(|(_, w)| *w > 0.0);
            let selector = WeightedSelector::new(weighted)?;
            pools.insert(name.clone(), LabelPool { values, selector });
        }

        Ok(Self {
            pools,
            formats,
            sampling,
        })
    }

    /// Shorthand for a uniform model over [`LabelConfig::with_cardinalities`].
    pub fn from_cardinalities<S: Into<String>>(
        cardinalities: impl IntoIterator<Item = (S, i64)>,
    ) -> Result<Self, ModelError> {
        Self::new(
            &LabelConfig::with_cardinalities(cardinalities),
            LabelSampling::Uniform,
        )
    }

    /// The ordered value pool of `name`.
    pub fn values(&self, name: &str) -> Option<&[String]> {
        self.pools.get(name).map(|pool| pool.values.as_slice())
    }

    /// Pick a value of `name` for a uniform `draw` in `[0, 1)`.
    pub fn pick_value(&self, name: &str, draw: f64) -> Result<&str, PickError> {
        let pool = self
            .pools
            .get(name)
            .ok_or_else(|| PickError::UnknownLabel(name.to_string()))?;
        let idx = *pool.selector.select(draw)?;
        Ok(&pool.values[idx])
    }

    /// Pick a value of `name` using `rng`. Returns `None` for unknown labels.
    pub fn sample_value<R: Rng + ?Sized>(&self, name: &str, rng: &mut R) -> Option<&str> {
        let pool = self.pools.get(name)?;
        let idx = *pool.selector.sample(rng);
        Some(&pool.values[idx])
    }

    /// All configured label names, in order.
    pub fn label_names(&self) -> impl Iterator<Item = &str> {
        self.pools.keys().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pools.contains_key(name)
    }

    pub fn contains_value(&self, name: &str, value: &str) -> bool {
        self.values(name)
            .is_some_and(|values| values.iter().any(|v| v == value))
    }

    /// Line formats the `format` label can take.
    pub fn formats(&self) -> &[LogFormat] {
        &self.formats
    }

    pub fn sampling(&self) -> LabelSampling {
        self.sampling
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Sample one value per label.
    pub fn sample_label_set<R: Rng + ?Sized>(&self, rng: &mut R) -> LabelSet {
        let labels = self
            .pools
            .iter()
            .map(|(name, pool)| {
                let idx = *pool.selector.sample(rng);
                (name.clone(), pool.values[idx].clone())
            })
            .collect();
        LabelSet(labels)
    }
}

/// Concrete labels of one stream, ordered by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct LabelSet(BTreeMap<String, String>);

impl LabelSet {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The stream's line format, if its `format` value is a known one.
    pub fn format(&self) -> Option<LogFormat> {
        self.get(FORMAT_LABEL)?.parse().ok()
    }

    /// A copy with `name` added, unless the set already defines it.
    pub fn with_default(&self, name: &str, value: impl Into<String>) -> Self {
        let mut labels = self.0.clone();
        labels
            .entry(name.to_string())
            .or_insert_with(|| value.into());
        Self(labels)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for LabelSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", name, quote(value))?;
        }
        f.write_str("}")
    }
}

/// Whether `name` is a valid LogQL label name: `[a-zA-Z_][a-zA-Z0-9_]*`.
pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Double-quote `value` as a LogQL string literal.
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
