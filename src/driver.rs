//! Per-iteration workload orchestration.
//!
//! A [`WorkloadDriver`] belongs to one virtual user. Each call to
//! [`WorkloadDriver::run_iteration`] runs one iteration of its [`Scenario`]
//! against the transport and records every request and check in [`Stats`].
//!
//! [`Stats`]: crate::stats::Stats

use crate::errors::{DriverError, ModelError, TransportError};
use crate::labels::{LabelModel, NAME_LABEL};
use crate::query::{
    default_discovery_ranges, DiscoveredLabels, QueryBuilder, QueryKind, QueryRequest, TimeRange,
};
use crate::stats::{Operation, SharedStats};
use crate::stream::{PushRequest, StreamSynthesizer};
use crate::transport::{
    parse_discovery_body, parse_query_summary, Transport, TransportResponse, PUSH_SUCCESS,
    QUERY_SUCCESS,
};
use crate::weighted::WeightedSelector;
use rand::rngs::SmallRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Check recorded for every push.
pub const WRITE_CHECK: &str = "successful write";

/// What a virtual user does in one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    /// Push one batch of streams
    Write,
    /// Run one query picked from the query mix
    Read,
    /// Discover labels and values, then query with what was found
    ReadWrite,
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scenario::Write => f.write_str("write"),
            Scenario::Read => f.write_str("read"),
            Scenario::ReadWrite => f.write_str("read_write"),
        }
    }
}

/// Read query mix: 10% labels, 10% label values, 10% series, 50% range,
/// 20% instant.
pub fn default_query_mix() -> Vec<(QueryKind, f64)> {
    vec![
        (QueryKind::Labels, 0.1),
        (QueryKind::LabelValues, 0.1),
        (QueryKind::Series, 0.1),
        (QueryKind::Range, 0.5),
        (QueryKind::Instant, 0.2),
    ]
}

/// Stream count and byte window of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushShape {
    pub streams_min: usize,
    pub streams_max: usize,
    pub min_bytes: usize,
    pub max_bytes: usize,
}

impl PushShape {
    pub fn new(
        streams_min: usize,
        streams_max: usize,
        min_bytes: usize,
        max_bytes: usize,
    ) -> Result<Self, ModelError> {
        if streams_min == 0 || streams_min > streams_max {
            return Err(ModelError::InvalidStreamRange {
                min: streams_min,
                max: streams_max,
            });
        }
        if min_bytes > max_bytes {
            return Err(ModelError::InvalidByteWindow {
                min: min_bytes,
                max: max_bytes,
            });
        }
        Ok(Self {
            streams_min,
            streams_max,
            min_bytes,
            max_bytes,
        })
    }
}

impl Default for PushShape {
    /// 4 to 8 streams of 800KiB to 1MiB each
    fn default() -> Self {
        Self {
            streams_min: 4,
            streams_max: 8,
            min_bytes: 800 * 1024,
            max_bytes: 1024 * 1024,
        }
    }
}

/// Read-only configuration shared by every driver of a run.
#[derive(Debug)]
pub struct Workload {
    pub synthesizer: StreamSynthesizer,
    pub builder: QueryBuilder,
    pub query_mix: WeightedSelector<QueryKind>,
    pub discovery_ranges: WeightedSelector<TimeRange>,
    pub push: PushShape,
}

impl Workload {
    /// Workload over `model` with the default mix, ranges and push shape.
    pub fn with_defaults(model: Arc<LabelModel>) -> Result<Self, ModelError> {
        Ok(Self {
            synthesizer: StreamSynthesizer::new(Arc::clone(&model)),
            builder: QueryBuilder::with_defaults(model)?,
            query_mix: WeightedSelector::new(default_query_mix())?,
            discovery_ranges: WeightedSelector::uniform(default_discovery_ranges())?,
            push: PushShape::default(),
        })
    }

    pub fn model(&self) -> &LabelModel {
        self.builder.model()
    }
}

/// Result of one iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterationOutcome {
    /// Requests handed to the transport
    pub requests: usize,
    /// Requests that errored or returned an unexpected status
    pub failed: usize,
    /// The iteration stopped after an empty discovery step
    pub short_circuited: bool,
}

/// Runs iterations of one scenario for one virtual user.
pub struct WorkloadDriver<T: Transport> {
    workload: Arc<Workload>,
    scenario: Scenario,
    transport: T,
    stats: SharedStats,
    rng: SmallRng,
    vu: u64,
    instance: String,
}

impl<T: Transport> WorkloadDriver<T> {
    pub fn new(
        workload: Arc<Workload>,
        scenario: Scenario,
        transport: T,
        stats: SharedStats,
        vu: u64,
        rng: SmallRng,
    ) -> Self {
        Self {
            workload,
            scenario,
            transport,
            stats,
            rng,
            vu,
            instance: instance_name(vu),
        }
    }

    /// Override the `instance` label attached to pushed streams.
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = instance.into();
        self
    }

    pub fn scenario(&self) -> Scenario {
        self.scenario
    }

    pub fn vu(&self) -> u64 {
        self.vu
    }

    /// Run one iteration of the scenario.
    ///
    /// Failed requests are recorded and never abort the iteration early
    /// except during discovery. Only configuration and sampling faults are
    /// returned as errors.
    pub async fn run_iteration(&mut self) -> Result<IterationOutcome, DriverError> {
        let mut outcome = IterationOutcome::default();
        match self.scenario {
            Scenario::Write => self.write(&mut outcome).await?,
            Scenario::Read => self.read(&mut outcome).await?,
            Scenario::ReadWrite => self.read_write(&mut outcome).await,
        }
        self.stats.record_iteration(outcome.short_circuited);
        Ok(outcome)
    }

    async fn write(&mut self, outcome: &mut IterationOutcome) -> Result<(), DriverError> {
        let shape = self.workload.push;
        let count = self.rng.random_range(shape.streams_min..=shape.streams_max);
        let streams = self.workload.synthesizer.build_batch(
            &mut self.rng,
            count,
            shape.min_bytes,
            shape.max_bytes,
            Some(self.instance.as_str()),
        )?;

        let request = PushRequest::new(streams);
        let bytes = request.size_bytes();
        let lines = request.line_count();
        tracing::debug!(vu = self.vu, streams = count, lines, bytes, "Pushing batch");
        self.stats.record_push(count, lines, bytes);

        self.stats.record_request_start(Operation::Push);
        let started = Instant::now();
        let result = self.transport.push(&request).await;
        self.finish(Operation::Push, WRITE_CHECK, PUSH_SUCCESS, result, started, outcome);
        Ok(())
    }

    async fn read(&mut self, outcome: &mut IterationOutcome) -> Result<(), DriverError> {
        let kind = *self.workload.query_mix.sample(&mut self.rng);
        let request = self.workload.builder.random_query(kind, &mut self.rng)?;
        self.execute(&request, outcome).await;
        Ok(())
    }

    async fn read_write(&mut self, outcome: &mut IterationOutcome) {
        let workload = Arc::clone(&self.workload);
        let builder = &workload.builder;
        let range = *workload.discovery_ranges.sample(&mut self.rng);

        let names: Vec<String> = match self.execute(&builder.labels_query(range), outcome).await {
            Some(body) => parse_discovery_body(&body)
                .into_iter()
                .filter(|name| name != NAME_LABEL)
                .collect(),
            None => Vec::new(),
        };
        if names.is_empty() {
            return self.short_circuit(outcome, "labels");
        }

        let mut discovered = DiscoveredLabels::new();
        for name in names {
            let request = QueryRequest::LabelValues {
                label: name.clone(),
                range,
            };
            if let Some(body) = self.execute(&request, outcome).await {
                let values = parse_discovery_body(&body);
                if !values.is_empty() {
                    discovered.insert(name, values);
                }
            }
        }
        if discovered.is_empty() {
            return self.short_circuit(outcome, "label values");
        }

        let queries = builder.discovered_queries(&discovered, &mut self.rng);
        if queries.is_empty() {
            return self.short_circuit(outcome, "discovered queries");
        }

        let limit = builder.limit();
        for expression in &queries.expressions {
            let request = builder.range_query(expression.as_str(), range, limit);
            self.execute(&request, outcome).await;
        }
        for expression in &queries.expressions {
            let request = builder.instant_query(expression.as_str(), limit);
            self.execute(&request, outcome).await;
        }
        for selector in queries.selectors {
            let request = builder.series_query(selector, range);
            self.execute(&request, outcome).await;
        }
    }

    fn short_circuit(&self, outcome: &mut IterationOutcome, step: &str) {
        tracing::debug!(vu = self.vu, step, "Discovery returned nothing, ending iteration");
        outcome.short_circuited = true;
    }

    /// Send a query; returns the body when the status signals success.
    ///
    /// Range and instant responses feed their processing summary to stats.
    async fn execute(
        &self,
        request: &QueryRequest,
        outcome: &mut IterationOutcome,
    ) -> Option<String> {
        let kind = request.kind();
        let operation = Operation::Query(kind);
        self.stats.record_request_start(operation);
        let started = Instant::now();
        let result = self.transport.query(request).await;
        let response = self.finish(
            operation,
            kind.check_name(),
            QUERY_SUCCESS,
            result,
            started,
            outcome,
        )?;
        if matches!(kind, QueryKind::Range | QueryKind::Instant) {
            if let Some(summary) = parse_query_summary(&response.body) {
                self.stats.record_query_summary(kind, &summary);
            }
        }
        Some(response.body)
    }

    fn finish(
        &self,
        operation: Operation,
        check: &str,
        expected: u16,
        result: Result<TransportResponse, TransportError>,
        started: Instant,
        outcome: &mut IterationOutcome,
    ) -> Option<TransportResponse> {
        outcome.requests += 1;
        match result {
            Ok(response) => {
                let passed = response.status == expected;
                self.stats.record_request_end(started.elapsed(), passed);
                self.stats.record_check(check, passed);
                if passed {
                    return Some(response);
                }
                outcome.failed += 1;
                tracing::debug!(
                    vu = self.vu,
                    operation = %operation,
                    status = response.status,
                    body = %response.body.get(..256).unwrap_or(response.body.as_str()),
                    "Unexpected response status"
                );
                None
            }
            Err(e) => {
                self.stats.record_transport_error();
                self.stats.record_check(check, false);
                outcome.failed += 1;
                tracing::warn!(vu = self.vu, operation = %operation, error = %e, "Request failed");
                None
            }
        }
    }
}

/// `vu{N}.{host}`, the value of the `instance` label of a virtual user.
pub fn instance_name(vu: u64) -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string());
    format!("vu{}.{}", vu, host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::Stats;
    use futures::future::BoxFuture;
    use rand::SeedableRng;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Answers from canned bodies and records every endpoint hit.
    #[derive(Default)]
    struct FakeTransport {
        push_status: u16,
        labels: Option<(u16, String)>,
        values: HashMap<String, String>,
        calls: Mutex<Vec<String>>,
        pushed_streams: Mutex<usize>,
    }

    impl FakeTransport {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Transport for FakeTransport {
        fn push<'a>(
            &'a self,
            request: &'a PushRequest,
        ) -> BoxFuture<'a, Result<TransportResponse, TransportError>> {
            Box::pin(async move {
                self.calls.lock().unwrap().push("push".to_string());
                *self.pushed_streams.lock().unwrap() += request.streams.len();
                Ok(TransportResponse::new(self.push_status, ""))
            })
        }

        fn query<'a>(
            &'a self,
            request: &'a QueryRequest,
        ) -> BoxFuture<'a, Result<TransportResponse, TransportError>> {
            Box::pin(async move {
                self.calls.lock().unwrap().push(request.endpoint());
                let response = match request {
                    QueryRequest::Labels { .. } => match &self.labels {
                        Some((status, body)) => TransportResponse::new(*status, body.clone()),
                        None => TransportResponse::new(200, r#"{"data":[]}"#),
                    },
                    QueryRequest::LabelValues { label, .. } => TransportResponse::new(
                        200,
                        self.values
                            .get(label)
                            .cloned()
                            .unwrap_or_else(|| r#"{"data":[]}"#.to_string()),
                    ),
                    _ => TransportResponse::new(200, "{}"),
                };
                Ok(response)
            })
        }
    }

    fn model() -> Arc<LabelModel> {
        let model = LabelModel::from_cardinalities([("app", 5), ("namespace", 1), ("pod", 10)])
            .unwrap();
        Arc::new(model)
    }

    fn workload() -> Arc<Workload> {
        let mut workload = Workload::with_defaults(model()).unwrap();
        workload.push = PushShape::new(2, 3, 100, 200).unwrap();
        Arc::new(workload)
    }

    fn driver(
        workload: Arc<Workload>,
        scenario: Scenario,
        transport: FakeTransport,
    ) -> (WorkloadDriver<FakeTransport>, SharedStats) {
        let stats = Arc::new(Stats::new());
        let driver = WorkloadDriver::new(
            workload,
            scenario,
            transport,
            Arc::clone(&stats),
            1,
            SmallRng::seed_from_u64(42),
        )
        .with_instance("vu1.test");
        (driver, stats)
    }

    fn discovery_body(values: &[&str]) -> String {
        serde_json::json!({ "status": "success", "data": values }).to_string()
    }

    #[test]
    fn test_push_shape_validation() {
        assert_eq!(
            PushShape::new(0, 4, 0, 10).unwrap_err(),
            ModelError::InvalidStreamRange { min: 0, max: 4 }
        );
        assert_eq!(
            PushShape::new(5, 4, 0, 10).unwrap_err(),
            ModelError::InvalidStreamRange { min: 5, max: 4 }
        );
        assert_eq!(
            PushShape::new(1, 4, 11, 10).unwrap_err(),
            ModelError::InvalidByteWindow { min: 11, max: 10 }
        );
        assert!(PushShape::new(4, 8, 800 * 1024, 1024 * 1024).is_ok());
    }

    #[tokio::test]
    async fn test_write_iteration() {
        let transport = FakeTransport {
            push_status: 204,
            ..Default::default()
        };
        let (mut driver, stats) = driver(workload(), Scenario::Write, transport);

        let outcome = driver.run_iteration().await.unwrap();
        assert_eq!(outcome.requests, 1);
        assert_eq!(outcome.failed, 0);
        assert!(!outcome.short_circuited);

        assert_eq!(driver.transport.calls(), vec!["push"]);
        let streams = *driver.transport.pushed_streams.lock().unwrap();
        assert!((2..=3).contains(&streams));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.checks[WRITE_CHECK].passed, 1);
        assert_eq!(snapshot.streams_pushed, streams as u64);
        assert!(snapshot.bytes_pushed >= 100 * streams as u64);
        assert_eq!(snapshot.iterations, 1);
    }

    #[tokio::test]
    async fn test_write_failure_is_recorded() {
        let transport = FakeTransport {
            push_status: 500,
            ..Default::default()
        };
        let (mut driver, stats) = driver(workload(), Scenario::Write, transport);

        let outcome = driver.run_iteration().await.unwrap();
        assert_eq!(outcome.failed, 1);
        assert_eq!(stats.checks()[WRITE_CHECK].failed, 1);
        assert_eq!(stats.snapshot().failed_requests, 1);
    }

    #[tokio::test]
    async fn test_read_iteration_issues_one_query() {
        let (mut driver, stats) = driver(workload(), Scenario::Read, FakeTransport::default());

        for _ in 0..20 {
            let outcome = driver.run_iteration().await.unwrap();
            assert_eq!(outcome.requests, 1);
            assert!(!outcome.short_circuited);
        }
        assert_eq!(driver.transport.calls().len(), 20);
        assert_eq!(stats.snapshot().query_requests, 20);
    }

    #[tokio::test]
    async fn test_read_follows_query_mix() {
        let mut workload = Workload::with_defaults(model()).unwrap();
        workload.query_mix = WeightedSelector::new([(QueryKind::Instant, 1.0)]).unwrap();
        let (mut driver, _) = driver(Arc::new(workload), Scenario::Read, FakeTransport::default());

        driver.run_iteration().await.unwrap();
        assert_eq!(driver.transport.calls(), vec!["/loki/api/v1/query"]);
    }

    #[tokio::test]
    async fn test_empty_labels_short_circuits() {
        let transport = FakeTransport {
            labels: Some((200, discovery_body(&[]))),
            ..Default::default()
        };
        let (mut driver, stats) = driver(workload(), Scenario::ReadWrite, transport);

        let outcome = driver.run_iteration().await.unwrap();
        assert_eq!(outcome.requests, 1);
        assert_eq!(outcome.failed, 0);
        assert!(outcome.short_circuited);
        assert_eq!(driver.transport.calls(), vec!["/loki/api/v1/labels"]);
        assert_eq!(stats.snapshot().short_circuited, 1);
    }

    #[tokio::test]
    async fn test_failed_labels_short_circuits() {
        for labels in [
            (500, discovery_body(&["app"])),
            (200, "not json".to_string()),
            (200, discovery_body(&["__name__"])),
        ] {
            let transport = FakeTransport {
                labels: Some(labels),
                ..Default::default()
            };
            let (mut driver, _) = driver(workload(), Scenario::ReadWrite, transport);

            let outcome = driver.run_iteration().await.unwrap();
            assert!(outcome.short_circuited);
            assert_eq!(driver.transport.calls().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_empty_values_short_circuits() {
        let transport = FakeTransport {
            labels: Some((200, discovery_body(&["app", "pod"]))),
            ..Default::default()
        };
        let (mut driver, _) = driver(workload(), Scenario::ReadWrite, transport);

        let outcome = driver.run_iteration().await.unwrap();
        assert!(outcome.short_circuited);
        assert_eq!(outcome.requests, 3);
        assert_eq!(
            driver.transport.calls(),
            vec![
                "/loki/api/v1/labels",
                "/loki/api/v1/label/app/values",
                "/loki/api/v1/label/pod/values",
            ]
        );
    }

    #[tokio::test]
    async fn test_discovery_flow() {
        let values: HashMap<String, String> = [
            ("app", discovery_body(&["app-1", "app-2"])),
            ("format", discovery_body(&["json"])),
            ("namespace", discovery_body(&["namespace-0"])),
            ("pod", discovery_body(&["pod-3"])),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        let transport = FakeTransport {
            labels: Some((
                200,
                discovery_body(&["__name__", "app", "format", "namespace", "pod"]),
            )),
            values,
            ..Default::default()
        };
        let (mut driver, stats) = driver(workload(), Scenario::ReadWrite, transport);

        let outcome = driver.run_iteration().await.unwrap();
        assert!(!outcome.short_circuited);
        // labels + 4 label values + 4 range + 4 instant + 4 series
        assert_eq!(outcome.requests, 17);
        assert_eq!(outcome.failed, 0);

        let calls = driver.transport.calls();
        assert_eq!(calls[0], "/loki/api/v1/labels");
        assert!(!calls.iter().any(|c| c.contains("__name__")));
        let count = |endpoint: &str| calls.iter().filter(|c| *c == endpoint).count();
        assert_eq!(count("/loki/api/v1/query_range"), 4);
        assert_eq!(count("/loki/api/v1/query"), 4);
        assert_eq!(count("/loki/api/v1/series"), 4);

        let checks = stats.checks();
        assert_eq!(checks["successful label values query"].passed, 4);
        assert_eq!(checks["successful series query"].passed, 4);
    }
}
