// Query Request Module
// Endpoint contracts of the five query families.

use super::templates::Selector;
use crate::errors::ModelError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// A relative look-back window such as `15m` or `12h`.
///
/// Resolved to absolute `start`/`end` timestamps only when a request is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeRange(Duration);

impl TimeRange {
    pub fn new(duration: Duration) -> Result<Self, ModelError> {
        if duration.is_zero() {
            return Err(ModelError::InvalidTimeRange(
                humantime::format_duration(duration).to_string(),
            ));
        }
        Ok(Self(duration))
    }

    pub const fn from_mins(mins: u64) -> Self {
        Self(Duration::from_secs(mins * 60))
    }

    pub const fn from_hours(hours: u64) -> Self {
        Self(Duration::from_secs(hours * 3600))
    }

    pub fn duration(&self) -> Duration {
        self.0
    }

    fn nanos(&self) -> i64 {
        i64::try_from(self.0.as_nanos()).unwrap_or(i64::MAX)
    }
}

impl FromStr for TimeRange {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let duration = humantime::parse_duration(s.trim())
            .map_err(|_| ModelError::InvalidTimeRange(s.to_string()))?;
        if duration.is_zero() {
            return Err(ModelError::InvalidTimeRange(s.to_string()));
        }
        Ok(Self(duration))
    }
}

impl TryFrom<String> for TimeRange {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeRange> for String {
    fn from(range: TimeRange) -> Self {
        range.to_string()
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", humantime::format_duration(self.0))
    }
}

/// Query family, used as the item type of the read query mix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Labels,
    LabelValues,
    Series,
    Range,
    Instant,
}

impl QueryKind {
    pub const ALL: [QueryKind; 5] = [
        QueryKind::Labels,
        QueryKind::LabelValues,
        QueryKind::Series,
        QueryKind::Range,
        QueryKind::Instant,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::Labels => "labels",
            QueryKind::LabelValues => "label_values",
            QueryKind::Series => "series",
            QueryKind::Range => "range",
            QueryKind::Instant => "instant",
        }
    }

    /// Name of the check recorded for responses of this kind.
    pub fn check_name(&self) -> &'static str {
        match self {
            QueryKind::Labels => "successful labels query",
            QueryKind::LabelValues => "successful label values query",
            QueryKind::Series => "successful series query",
            QueryKind::Range => "successful range query",
            QueryKind::Instant => "successful instant query",
        }
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully specified query, ready to hand to a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryRequest {
    Instant {
        query: String,
        limit: Option<usize>,
    },
    Range {
        query: String,
        range: TimeRange,
        limit: Option<usize>,
    },
    Series {
        selector: Selector,
        range: TimeRange,
    },
    Labels {
        range: TimeRange,
    },
    LabelValues {
        label: String,
        range: TimeRange,
    },
}

impl QueryRequest {
    pub fn kind(&self) -> QueryKind {
        match self {
            QueryRequest::Instant { .. } => QueryKind::Instant,
            QueryRequest::Range { .. } => QueryKind::Range,
            QueryRequest::Series { .. } => QueryKind::Series,
            QueryRequest::Labels { .. } => QueryKind::Labels,
            QueryRequest::LabelValues { .. } => QueryKind::LabelValues,
        }
    }

    /// Path of the endpoint, relative to the base URL.
    pub fn endpoint(&self) -> String {
        match self {
            QueryRequest::Instant { .. } => "/loki/api/v1/query".to_string(),
            QueryRequest::Range { .. } => "/loki/api/v1/query_range".to_string(),
            QueryRequest::Series { .. } => "/loki/api/v1/series".to_string(),
            QueryRequest::Labels { .. } => "/loki/api/v1/labels".to_string(),
            QueryRequest::LabelValues { label, .. } => {
                format!("/loki/api/v1/label/{}/values", label)
            }
        }
    }

    /// Query string parameters with time bounds resolved against `now`.
    ///
    /// Timestamps are unix nanoseconds.
    pub fn params(&self, now: DateTime<Utc>) -> Vec<(&'static str, String)> {
        let end = now.timestamp_nanos_opt().unwrap_or_default();
        let bounds = |range: &TimeRange| {
            [
                ("start", end.saturating_sub(range.nanos()).to_string()),
                ("end", end.to_string()),
            ]
        };

        let mut params = Vec::new();
        match self {
            QueryRequest::Instant { query, limit } => {
                params.push(("query", query.clone()));
                params.push(("time", end.to_string()));
                push_limit(&mut params, *limit);
            }
            QueryRequest::Range {
                query,
                range,
                limit,
            } => {
                params.push(("query", query.clone()));
                params.extend(bounds(range));
                push_limit(&mut params, *limit);
            }
            QueryRequest::Series { selector, range } => {
                params.push(("match[]", selector.to_string()));
                params.extend(bounds(range));
            }
            QueryRequest::Labels { range } | QueryRequest::LabelValues { range, .. } => {
                params.extend(bounds(range));
            }
        }
        params
    }
}

fn push_limit(params: &mut Vec<(&'static str, String)>, limit: Option<usize>) {
    if let Some(limit) = limit.filter(|l| *l > 0) {
        params.push(("limit", limit.to_string()));
    }
}
