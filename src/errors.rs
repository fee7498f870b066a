// Error Types Module
// Configuration, sampling, synthesis and transport failures.

use std::time::Duration;

/// Errors raised while building the label model, selectors or workload.
///
/// These are configuration errors: they surface before any request is sent
/// and abort the run.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("label `{label}` has invalid cardinality {value}: must be a positive integer")]
    InvalidCardinality { label: String, value: i64 },
    #[error("label `{label}` has cardinality {value}, above the maximum of {max}")]
    CardinalityTooLarge { label: String, value: i64, max: i64 },
    #[error("invalid label name `{0}`: must match [a-zA-Z_][a-zA-Z0-9_]*")]
    InvalidLabelName(String),
    #[error("label `{label}` has an empty value domain")]
    EmptyLabelDomain { label: String },
    #[error("label configuration has no `format` label")]
    MissingFormatLabel,
    #[error("the `format` label must enumerate its values, not use a cardinality")]
    GeneratedFormatLabel,
    #[error("unsupported log format `{0}`")]
    UnsupportedFormat(String),
    #[error("weighted choice list is empty")]
    EmptyChoices,
    #[error("ratio {ratio} at index {index} must be positive and finite")]
    InvalidRatio { index: usize, ratio: f64 },
    #[error("top label probability {0} must lie within [0, 1]")]
    InvalidProbability(f64),
    #[error("unknown label `{0}`")]
    UnknownLabel(String),
    #[error("invalid time range `{0}`")]
    InvalidTimeRange(String),
    #[error("invalid byte window: min {min} exceeds max {max}")]
    InvalidByteWindow { min: usize, max: usize },
    #[error("invalid stream count range {min}..={max}")]
    InvalidStreamRange { min: usize, max: usize },
}

/// A random draw outside `[0, 1)` was handed to a selector.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum SamplingError {
    #[error("random draw {0} must be within [0, 1)")]
    DrawOutOfRange(f64),
}

/// Failure to pick a value for a label.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PickError {
    #[error("unknown label `{0}`")]
    UnknownLabel(String),
    #[error(transparent)]
    Sampling(#[from] SamplingError),
}

/// Errors raised by [`crate::StreamSynthesizer::build_batch`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SynthesisError {
    #[error("invalid byte window: min {min} exceeds max {max}")]
    InvalidByteWindow { min: usize, max: usize },
    #[error("stream count must be positive")]
    InvalidStreamCount,
}

/// Errors raised by the HTTP transport before a status code is available.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid base URL `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Fatal failures of a workload iteration.
///
/// Failed requests are not errors; they are recorded as failed checks.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DriverError {
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),
    #[error(transparent)]
    Pick(#[from] PickError),
}
