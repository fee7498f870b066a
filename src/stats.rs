//! Statistics module for tracking load-test metrics.
//!
//! Thread-safe atomic counters shared by every virtual user: requests per
//! operation, check outcomes, pushed volume, iterations, request latency and
//! the processing summaries the backend reports for range and instant queries.

use crate::query::QueryKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Relaxed ordering for stats - we don't need strict ordering guarantees
const ORDERING: Ordering = Ordering::Relaxed;

/// Window used for the requests-per-second rate
const RPS_WINDOW: Duration = Duration::from_secs(60);

/// Operation a request was issued for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Push to /loki/api/v1/push
    Push,
    /// One of the read endpoints
    Query(QueryKind),
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Push => "push",
            Operation::Query(kind) => kind.as_str(),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Passed/failed tally of one named check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckCounts {
    pub passed: u64,
    pub failed: u64,
}

impl CheckCounts {
    pub fn total(&self) -> u64 {
        self.passed + self.failed
    }

    /// Fraction of passed evaluations, 1.0 when never evaluated.
    pub fn pass_rate(&self) -> f64 {
        match self.total() {
            0 => 1.0,
            total => self.passed as f64 / total as f64,
        }
    }
}

/// Execution summary reported in `data.stats.summary` of a range or instant
/// query response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuerySummary {
    pub total_bytes_processed: u64,
    pub bytes_processed_per_second: f64,
    pub total_lines_processed: u64,
    pub lines_processed_per_second: f64,
}

/// Processed volume of one query endpoint, summed over responses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessedCounts {
    /// Responses that carried a summary
    pub queries: u64,
    pub bytes: u64,
    pub lines: u64,
    /// Mean of the per-response bytes/s figures
    pub avg_bytes_per_second: f64,
    /// Mean of the per-response lines/s figures
    pub avg_lines_per_second: f64,
}

impl ProcessedCounts {
    fn add(&mut self, summary: &QuerySummary) {
        self.queries += 1;
        self.bytes += summary.total_bytes_processed;
        self.lines += summary.total_lines_processed;
        let n = self.queries as f64;
        self.avg_bytes_per_second +=
            (summary.bytes_processed_per_second - self.avg_bytes_per_second) / n;
        self.avg_lines_per_second +=
            (summary.lines_processed_per_second - self.avg_lines_per_second) / n;
    }
}

/// Run-wide statistics.
#[derive(Debug)]
pub struct Stats {
    start_time: Instant,

    // Request counters
    /// Requests handed to the transport
    pub total_requests: AtomicU64,
    /// Requests currently waiting for a response
    pub active_requests: AtomicU64,
    /// Requests answered with a non-success status
    pub failed_requests: AtomicU64,
    /// Requests that never produced a status (connect, timeout, ...)
    pub transport_errors: AtomicU64,
    /// Push requests
    pub push_requests: AtomicU64,
    /// Query requests of any kind
    pub query_requests: AtomicU64,

    // Pushed volume
    pub streams_pushed: AtomicU64,
    pub lines_pushed: AtomicU64,
    pub bytes_pushed: AtomicU64,

    // Iterations
    pub iterations: AtomicU64,
    /// Iterations that stopped early after an empty discovery step
    pub short_circuited: AtomicU64,

    // Volume processed by the backend for range and instant queries
    pub bytes_processed: AtomicU64,
    pub lines_processed: AtomicU64,

    operation_requests: RwLock<HashMap<String, u64>>,
    processed: RwLock<BTreeMap<String, ProcessedCounts>>,
    checks: RwLock<BTreeMap<String, CheckCounts>>,

    // Latency tracking (in microseconds)
    total_latency_us: AtomicU64,
    completed_requests: AtomicU64,
    min_latency_us: AtomicU64,
    max_latency_us: AtomicU64,

    // Rolling window for RPS calculation
    request_times: RwLock<Vec<Instant>>,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            total_requests: AtomicU64::new(0),
            active_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            transport_errors: AtomicU64::new(0),
            push_requests: AtomicU64::new(0),
            query_requests: AtomicU64::new(0),
            streams_pushed: AtomicU64::new(0),
            lines_pushed: AtomicU64::new(0),
            bytes_pushed: AtomicU64::new(0),
            iterations: AtomicU64::new(0),
            short_circuited: AtomicU64::new(0),
            bytes_processed: AtomicU64::new(0),
            lines_processed: AtomicU64::new(0),
            operation_requests: RwLock::new(HashMap::new()),
            processed: RwLock::new(BTreeMap::new()),
            checks: RwLock::new(BTreeMap::new()),
            total_latency_us: AtomicU64::new(0),
            completed_requests: AtomicU64::new(0),
            min_latency_us: AtomicU64::new(u64::MAX),
            max_latency_us: AtomicU64::new(0),
            request_times: RwLock::new(Vec::new()),
        }
    }

    /// Record a request being handed to the transport
    pub fn record_request_start(&self, operation: Operation) {
        self.total_requests.fetch_add(1, ORDERING);
        self.active_requests.fetch_add(1, ORDERING);

        match operation {
            Operation::Push => {
                self.push_requests.fetch_add(1, ORDERING);
            }
            Operation::Query(_) => {
                self.query_requests.fetch_add(1, ORDERING);
            }
        }

        if let Ok(mut map) = self.operation_requests.write() {
            *map.entry(operation.to_string()).or_insert(0) += 1;
        }

        if let Ok(mut times) = self.request_times.write() {
            let now = Instant::now();
            times.push(now);
            // Keep only the RPS window
            if let Some(cutoff) = now.checked_sub(RPS_WINDOW) {
                times.retain(|t| *t > cutoff);
            }
        }
    }

    /// Record a response, successful or not
    pub fn record_request_end(&self, latency: Duration, success: bool) {
        self.active_requests.fetch_sub(1, ORDERING);
        self.completed_requests.fetch_add(1, ORDERING);
        if !success {
            self.failed_requests.fetch_add(1, ORDERING);
        }
        self.record_latency(latency);
    }

    /// Record a request that failed before a status was received
    pub fn record_transport_error(&self) {
        self.active_requests.fetch_sub(1, ORDERING);
        self.failed_requests.fetch_add(1, ORDERING);
        self.transport_errors.fetch_add(1, ORDERING);
    }

    fn record_latency(&self, latency: Duration) {
        let latency_us = latency.as_micros() as u64;
        self.total_latency_us.fetch_add(latency_us, ORDERING);
        self.min_latency_us.fetch_min(latency_us, ORDERING);
        self.max_latency_us.fetch_max(latency_us, ORDERING);
    }

    /// Record one evaluation of a named check
    pub fn record_check(&self, name: &str, passed: bool) {
        if let Ok(mut checks) = self.checks.write() {
            let counts = checks.entry(name.to_string()).or_default();
            if passed {
                counts.passed += 1;
            } else {
                counts.failed += 1;
            }
        }
    }

    /// Record the volume of a push batch
    pub fn record_push(&self, streams: usize, lines: usize, bytes: usize) {
        self.streams_pushed.fetch_add(streams as u64, ORDERING);
        self.lines_pushed.fetch_add(lines as u64, ORDERING);
        self.bytes_pushed.fetch_add(bytes as u64, ORDERING);
    }

    /// Record the processing summary of a query response
    pub fn record_query_summary(&self, kind: QueryKind, summary: &QuerySummary) {
        self.bytes_processed.fetch_add(summary.total_bytes_processed, ORDERING);
        self.lines_processed.fetch_add(summary.total_lines_processed, ORDERING);
        if let Ok(mut processed) = self.processed.write() {
            processed
                .entry(kind.as_str().to_string())
                .or_default()
                .add(summary);
        }
    }

    /// Record a finished iteration
    pub fn record_iteration(&self, short_circuited: bool) {
        self.iterations.fetch_add(1, ORDERING);
        if short_circuited {
            self.short_circuited.fetch_add(1, ORDERING);
        }
    }

    /// Time since the stats were created
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Requests per second over the last 60 seconds
    pub fn requests_per_second(&self) -> f64 {
        if let Ok(times) = self.request_times.read() {
            let now = Instant::now();
            let recent: Vec<&Instant> = times
                .iter()
                .filter(|t| now.duration_since(**t) < RPS_WINDOW)
                .collect();

            if let Some(oldest) = recent.iter().min() {
                let window = now.duration_since(**oldest).as_secs_f64();
                if window > 0.0 {
                    return recent.len() as f64 / window;
                }
            }
        }
        0.0
    }

    /// Average latency in milliseconds
    pub fn avg_latency_ms(&self) -> f64 {
        let completed = self.completed_requests.load(ORDERING);
        if completed == 0 {
            return 0.0;
        }
        let total_us = self.total_latency_us.load(ORDERING);
        (total_us as f64 / completed as f64) / 1000.0
    }

    pub fn min_latency_ms(&self) -> Option<f64> {
        let min = self.min_latency_us.load(ORDERING);
        if min == u64::MAX {
            None
        } else {
            Some(min as f64 / 1000.0)
        }
    }

    pub fn max_latency_ms(&self) -> Option<f64> {
        if self.completed_requests.load(ORDERING) == 0 {
            None
        } else {
            Some(self.max_latency_us.load(ORDERING) as f64 / 1000.0)
        }
    }

    /// Share of requests that failed, 0.0 before the first request
    pub fn failure_rate(&self) -> f64 {
        let total = self.total_requests.load(ORDERING);
        if total == 0 {
            return 0.0;
        }
        self.failed_requests.load(ORDERING) as f64 / total as f64
    }

    /// Per-operation request counts
    pub fn operation_requests(&self) -> HashMap<String, u64> {
        self.operation_requests
            .read()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Processed volume by query kind
    pub fn processed(&self) -> BTreeMap<String, ProcessedCounts> {
        self.processed.read().map(|p| p.clone()).unwrap_or_default()
    }

    /// Check tallies by name
    pub fn checks(&self) -> BTreeMap<String, CheckCounts> {
        self.checks.read().map(|c| c.clone()).unwrap_or_default()
    }

    /// Get a snapshot of all stats for serialization
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            uptime_secs: self.uptime().as_secs(),
            total_requests: self.total_requests.load(ORDERING),
            active_requests: self.active_requests.load(ORDERING),
            failed_requests: self.failed_requests.load(ORDERING),
            transport_errors: self.transport_errors.load(ORDERING),
            push_requests: self.push_requests.load(ORDERING),
            query_requests: self.query_requests.load(ORDERING),
            streams_pushed: self.streams_pushed.load(ORDERING),
            lines_pushed: self.lines_pushed.load(ORDERING),
            bytes_pushed: self.bytes_pushed.load(ORDERING),
            iterations: self.iterations.load(ORDERING),
            short_circuited: self.short_circuited.load(ORDERING),
            failure_rate: self.failure_rate(),
            requests_per_second: self.requests_per_second(),
            avg_latency_ms: self.avg_latency_ms(),
            min_latency_ms: self.min_latency_ms(),
            max_latency_ms: self.max_latency_ms(),
            bytes_processed: self.bytes_processed.load(ORDERING),
            lines_processed: self.lines_processed.load(ORDERING),
            operation_requests: self.operation_requests(),
            processed: self.processed(),
            checks: self.checks(),
        }
    }
}

/// A serializable snapshot of statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub uptime_secs: u64,
    pub total_requests: u64,
    pub active_requests: u64,
    pub failed_requests: u64,
    pub transport_errors: u64,
    pub push_requests: u64,
    pub query_requests: u64,
    pub streams_pushed: u64,
    pub lines_pushed: u64,
    pub bytes_pushed: u64,
    pub iterations: u64,
    pub short_circuited: u64,
    pub failure_rate: f64,
    pub requests_per_second: f64,
    pub avg_latency_ms: f64,
    pub min_latency_ms: Option<f64>,
    pub max_latency_ms: Option<f64>,
    pub bytes_processed: u64,
    pub lines_processed: u64,
    pub operation_requests: HashMap<String, u64>,
    pub processed: BTreeMap<String, ProcessedCounts>,
    pub checks: BTreeMap<String, CheckCounts>,
}

/// Shared stats handle for use across tasks
pub type SharedStats = Arc<Stats>;

/// Create a new shared stats instance
pub fn new_shared_stats() -> SharedStats {
    Arc::new(Stats::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_basic() {
        let stats = Stats::new();

        stats.record_request_start(Operation::Push);
        assert_eq!(stats.total_requests.load(ORDERING), 1);
        assert_eq!(stats.active_requests.load(ORDERING), 1);
        assert_eq!(stats.push_requests.load(ORDERING), 1);

        stats.record_request_end(Duration::from_millis(100), true);
        assert_eq!(stats.active_requests.load(ORDERING), 0);
        assert_eq!(stats.failed_requests.load(ORDERING), 0);
    }

    #[test]
    fn test_stats_failures() {
        let stats = Stats::new();

        stats.record_request_start(Operation::Query(QueryKind::Range));
        stats.record_request_end(Duration::from_millis(5), false);
        stats.record_request_start(Operation::Query(QueryKind::Instant));
        stats.record_transport_error();

        assert_eq!(stats.query_requests.load(ORDERING), 2);
        assert_eq!(stats.failed_requests.load(ORDERING), 2);
        assert_eq!(stats.transport_errors.load(ORDERING), 1);
        assert_eq!(stats.active_requests.load(ORDERING), 0);
        assert_eq!(stats.failure_rate(), 1.0);
    }

    #[test]
    fn test_stats_latency() {
        let stats = Stats::new();
        assert_eq!(stats.min_latency_ms(), None);
        assert_eq!(stats.max_latency_ms(), None);

        stats.record_request_start(Operation::Push);
        stats.record_request_end(Duration::from_millis(100), true);

        stats.record_request_start(Operation::Push);
        stats.record_request_end(Duration::from_millis(200), true);

        assert_eq!(stats.avg_latency_ms(), 150.0);
        assert_eq!(stats.min_latency_ms(), Some(100.0));
        assert_eq!(stats.max_latency_ms(), Some(200.0));
    }

    #[test]
    fn test_checks() {
        let stats = Stats::new();
        stats.record_check("successful write", true);
        stats.record_check("successful write", true);
        stats.record_check("successful write", false);
        stats.record_check("successful labels query", true);

        let checks = stats.checks();
        let write = checks["successful write"];
        assert_eq!(write, CheckCounts { passed: 2, failed: 1 });
        assert!((write.pass_rate() - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(checks["successful labels query"].total(), 1);
        assert_eq!(CheckCounts::default().pass_rate(), 1.0);
    }

    #[test]
    fn test_operation_requests() {
        let stats = Stats::new();

        stats.record_request_start(Operation::Push);
        stats.record_request_start(Operation::Query(QueryKind::LabelValues));
        stats.record_request_start(Operation::Query(QueryKind::LabelValues));

        let ops = stats.operation_requests();
        assert_eq!(ops.get("push"), Some(&1));
        assert_eq!(ops.get("label_values"), Some(&2));
    }

    #[test]
    fn test_push_and_iterations() {
        let stats = Stats::new();
        stats.record_push(4, 1000, 3 * 1024 * 1024);
        stats.record_iteration(false);
        stats.record_iteration(true);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.streams_pushed, 4);
        assert_eq!(snapshot.lines_pushed, 1000);
        assert_eq!(snapshot.bytes_pushed, 3 * 1024 * 1024);
        assert_eq!(snapshot.iterations, 2);
        assert_eq!(snapshot.short_circuited, 1);
    }

    #[test]
    fn test_snapshot_serialization() {
        let stats = Stats::new();
        stats.record_request_start(Operation::Push);
        stats.record_request_end(Duration::from_millis(10), true);
        stats.record_check("successful write", true);

        let snapshot = stats.snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"total_requests\":1"));
        assert!(json.contains("successful write"));

        let parsed: StatsSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.push_requests, 1);
    }

    #[test]
    fn test_query_summaries() {
        let stats = Stats::new();
        let summary = |bytes, bps, lines, lps| QuerySummary {
            total_bytes_processed: bytes,
            bytes_processed_per_second: bps,
            total_lines_processed: lines,
            lines_processed_per_second: lps,
        };

        stats.record_query_summary(QueryKind::Range, &summary(1000, 100.0, 10, 1.0));
        stats.record_query_summary(QueryKind::Range, &summary(3000, 300.0, 30, 3.0));
        stats.record_query_summary(QueryKind::Instant, &summary(500, 50.0, 5, 0.5));

        assert_eq!(stats.bytes_processed.load(ORDERING), 4500);
        assert_eq!(stats.lines_processed.load(ORDERING), 45);

        let processed = stats.processed();
        let range = processed["range"];
        assert_eq!(range.queries, 2);
        assert_eq!(range.bytes, 4000);
        assert_eq!(range.lines, 40);
        assert!((range.avg_bytes_per_second - 200.0).abs() < 1e-9);
        assert!((range.avg_lines_per_second - 2.0).abs() < 1e-9);
        assert_eq!(processed["instant"].queries, 1);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.bytes_processed, 4500);
        assert_eq!(snapshot.processed.len(), 2);
    }

    #[test]
    fn test_query_summary_deserialize() {
        let summary: QuerySummary = serde_json::from_str(
            r#"{"bytesProcessedPerSecond": 2048, "linesProcessedPerSecond": 16,
                "totalBytesProcessed": 4096, "totalLinesProcessed": 32, "execTime": 2.0}"#,
        )
        .unwrap();
        assert_eq!(summary.total_bytes_processed, 4096);
        assert_eq!(summary.total_lines_processed, 32);
        assert_eq!(summary.bytes_processed_per_second, 2048.0);

        let empty: QuerySummary = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, QuerySummary::default());
    }

    #[test]
    fn test_rps_calculation() {
        let stats = Stats::new();
        assert_eq!(stats.requests_per_second(), 0.0);

        for _ in 0..10 {
            stats.record_request_start(Operation::Push);
        }
        std::thread::sleep(Duration::from_millis(10));
        assert!(stats.requests_per_second() > 0.0);
    }
}
