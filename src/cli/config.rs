// Load Test Configuration Module
// Handles configuration from YAML files; command line flags override it.

use crate::driver::{default_query_mix, PushShape, Scenario, Workload};
use crate::errors::ModelError;
use crate::labels::{LabelConfig, LabelModel, LabelSampling};
use crate::pacing::PacingProfile;
use crate::query::{default_discovery_ranges, default_time_ranges, QueryBuilder, QueryKind, TimeRange};
use crate::stream::StreamSynthesizer;
use crate::transport::TransportConfig;
use crate::weighted::WeightedSelector;
use bytesize::ByteSize;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Load test configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub labels: LabelsConfig,
    #[serde(default)]
    pub queries: QueriesConfig,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default = "default_scenarios")]
    pub scenarios: Vec<ScenarioConfig>,
    /// Seed for the per-VU random generators; random when unset
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target: TargetConfig::default(),
            labels: LabelsConfig::default(),
            queries: QueriesConfig::default(),
            push: PushConfig::default(),
            scenarios: default_scenarios(),
            seed: None,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Check everything that does not need the label model
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "target.timeout_ms must be positive".to_string(),
            ));
        }
        let p = self.labels.top_label_probability;
        if !(0.0..=1.0).contains(&p) {
            return Err(ConfigError::Validation(format!(
                "labels.top_label_probability {} must lie within [0, 1]",
                p
            )));
        }
        if self.scenarios.is_empty() {
            return Err(ConfigError::Validation(
                "at least one scenario is required".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for scenario in &self.scenarios {
            if !names.insert(scenario.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate scenario name `{}`",
                    scenario.name
                )));
            }
            if scenario.vus == 0 {
                return Err(ConfigError::Validation(format!(
                    "scenario `{}` needs at least one VU",
                    scenario.name
                )));
            }
            if scenario.duration.is_none() && scenario.iterations.is_none() {
                return Err(ConfigError::Validation(format!(
                    "scenario `{}` needs a duration or an iteration count",
                    scenario.name
                )));
            }
        }
        Ok(())
    }

    /// Label pools: the stock `format` and `os` pools unless disabled, with
    /// configured entries taking precedence.
    pub fn label_config(&self) -> LabelConfig {
        let base = if self.labels.include_defaults {
            LabelConfig::default()
        } else {
            LabelConfig::empty()
        };
        base.merge(self.labels.pool.clone())
    }

    pub fn label_sampling(&self) -> LabelSampling {
        match self.labels.sampling {
            SamplingMode::Uniform => LabelSampling::Uniform,
            SamplingMode::TopWeighted => LabelSampling::TopWeighted {
                top_label_probability: self.labels.top_label_probability,
            },
        }
    }

    pub fn label_model(&self) -> Result<LabelModel, ConfigError> {
        Ok(LabelModel::new(&self.label_config(), self.label_sampling())?)
    }

    /// Build the shared, read-only workload
    pub fn workload(&self) -> Result<Workload, ConfigError> {
        self.validate()?;
        let model = Arc::new(self.label_model()?);

        let ranges = WeightedSelector::new(self.queries.ranges.iter().map(|r| (r.range, r.ratio)))?;
        let limit = Some(self.queries.limit).filter(|l| *l > 0);
        let push = PushShape::new(
            self.push.streams_min,
            self.push.streams_max,
            byte_count(self.push.min_bytes)?,
            byte_count(self.push.max_bytes)?,
        )?;

        Ok(Workload {
            synthesizer: StreamSynthesizer::new(Arc::clone(&model)),
            builder: QueryBuilder::new(model, ranges, limit),
            query_mix: WeightedSelector::new(self.queries.mix.ratios())?,
            discovery_ranges: WeightedSelector::uniform(self.queries.discovery_ranges.clone())?,
            push,
        })
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            url: self.target.url.clone(),
            tenant: self.target.tenant.clone(),
            timeout: Duration::from_millis(self.target.timeout_ms),
            user_agent: self.target.user_agent.clone(),
        }
    }
}

fn byte_count(size: ByteSize) -> Result<usize, ConfigError> {
    usize::try_from(size.as_u64())
        .map_err(|_| ConfigError::Validation(format!("byte size {} is too large", size)))
}

/// Backend endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Base URL; `user:password@` credentials are sent as basic auth
    #[serde(default = "default_url")]
    pub url: String,
    /// Tenant sent as `X-Scope-OrgID`
    #[serde(default)]
    pub tenant: Option<String>,
    /// Request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_url() -> String {
    "http://localhost:3100".to_string()
}

fn default_timeout_ms() -> u64 {
    10000
}

fn default_user_agent() -> String {
    format!("lokiload/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            tenant: None,
            timeout_ms: default_timeout_ms(),
            user_agent: default_user_agent(),
        }
    }
}

/// How label values are drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMode {
    #[default]
    Uniform,
    TopWeighted,
}

/// Label space configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelsConfig {
    #[serde(default)]
    pub sampling: SamplingMode,
    /// Weight of the top values under `top_weighted` sampling (0-1)
    #[serde(default = "default_top_label_probability")]
    pub top_label_probability: f64,
    /// Start from the stock `format` and `os` pools
    #[serde(default = "default_true")]
    pub include_defaults: bool,
    /// Label name to cardinality (`app: 5`) or value list (`os: [linux]`)
    #[serde(default = "LabelConfig::empty")]
    pub pool: LabelConfig,
}

fn default_top_label_probability() -> f64 {
    0.9
}

fn default_true() -> bool {
    true
}

impl Default for LabelsConfig {
    fn default() -> Self {
        Self {
            sampling: SamplingMode::default(),
            top_label_probability: default_top_label_probability(),
            include_defaults: true,
            pool: LabelConfig::empty(),
        }
    }
}

/// Ratios of the read query mix; a zero ratio disables a family
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryMixConfig {
    pub labels: f64,
    pub label_values: f64,
    pub series: f64,
    pub range: f64,
    pub instant: f64,
}

impl Default for QueryMixConfig {
    fn default() -> Self {
        let mix = default_query_mix();
        let ratio = |kind: QueryKind| {
            mix.iter()
                .find(|(k, _)| *k == kind)
                .map(|(_, r)| *r)
                .unwrap_or_default()
        };
        Self {
            labels: ratio(QueryKind::Labels),
            label_values: ratio(QueryKind::LabelValues),
            series: ratio(QueryKind::Series),
            range: ratio(QueryKind::Range),
            instant: ratio(QueryKind::Instant),
        }
    }
}

impl QueryMixConfig {
    /// Non-zero `(kind, ratio)` pairs in mix order
    pub fn ratios(&self) -> Vec<(QueryKind, f64)> {
        [
            (QueryKind::Labels, self.labels),
            (QueryKind::LabelValues, self.label_values),
            (QueryKind::Series, self.series),
            (QueryKind::Range, self.range),
            (QueryKind::Instant, self.instant),
        ]
        .into_iter()
        .filter(|(_, ratio)| *ratio != 0.0)
        .collect()
    }
}

/// One entry of the weighted time range pool
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeRatio {
    pub range: TimeRange,
    pub ratio: f64,
}

/// Query generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueriesConfig {
    /// Result limit of instant and range queries; 0 sends no limit
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub mix: QueryMixConfig,
    #[serde(default = "default_ranges")]
    pub ranges: Vec<RangeRatio>,
    /// Windows of the discovery flow, picked uniformly
    #[serde(default = "default_discovery_ranges")]
    pub discovery_ranges: Vec<TimeRange>,
}

fn default_limit() -> usize {
    crate::query::DEFAULT_LIMIT
}

fn default_ranges() -> Vec<RangeRatio> {
    default_time_ranges()
        .into_iter()
        .map(|(range, ratio)| RangeRatio { range, ratio })
        .collect()
}

impl Default for QueriesConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            mix: QueryMixConfig::default(),
            ranges: default_ranges(),
            discovery_ranges: default_discovery_ranges(),
        }
    }
}

/// Shape of push batches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    #[serde(default = "default_streams_min")]
    pub streams_min: usize,
    #[serde(default = "default_streams_max")]
    pub streams_max: usize,
    /// Lower bound of the line bytes of each stream
    #[serde(default = "default_min_bytes")]
    pub min_bytes: ByteSize,
    /// Upper bound of the line bytes of each stream
    #[serde(default = "default_max_bytes")]
    pub max_bytes: ByteSize,
}

fn default_streams_min() -> usize {
    PushShape::default().streams_min
}

fn default_streams_max() -> usize {
    PushShape::default().streams_max
}

fn default_min_bytes() -> ByteSize {
    ByteSize::b(PushShape::default().min_bytes as u64)
}

fn default_max_bytes() -> ByteSize {
    ByteSize::b(PushShape::default().max_bytes as u64)
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            streams_min: default_streams_min(),
            streams_max: default_streams_max(),
            min_bytes: default_min_bytes(),
            max_bytes: default_max_bytes(),
        }
    }
}

/// A group of virtual users running one scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub name: String,
    pub kind: Scenario,
    #[serde(default = "default_vus")]
    pub vus: usize,
    /// Stop scheduling iterations after this long
    #[serde(default, with = "humantime_serde")]
    pub duration: Option<Duration>,
    /// Stop after this many iterations per VU
    #[serde(default)]
    pub iterations: Option<u64>,
    #[serde(default)]
    pub pacing: PacingProfile,
}

fn default_vus() -> usize {
    1
}

fn default_scenarios() -> Vec<ScenarioConfig> {
    vec![ScenarioConfig {
        name: "write".to_string(),
        kind: Scenario::Write,
        vus: default_vus(),
        duration: Some(Duration::from_secs(30)),
        iterations: None,
        pacing: PacingProfile::fixed(1000),
    }]
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    Io(String),
    #[error("Failed to parse configuration: {0}")]
    Parse(String),
    #[error("Invalid configuration: {0}")]
    Validation(String),
    #[error("Invalid workload: {0}")]
    Model(#[from] ModelError),
}
