//! CLI module for the `lokiload run` and `lokiload sample` commands.
//!
//! The runner spawns one task per virtual user. Each task owns a
//! [`WorkloadDriver`] and calls it until its scenario's deadline or iteration
//! budget is reached, or until Ctrl+C / SIGTERM.

mod config;

pub use config::{
    Config, ConfigError, LabelsConfig, PushConfig, QueriesConfig, QueryMixConfig, RangeRatio,
    SamplingMode, ScenarioConfig, TargetConfig,
};

use crate::driver::{Workload, WorkloadDriver};
use crate::errors::DriverError;
use crate::pacing::PacingProfile;
use crate::query::QueryKind;
use crate::stats::{new_shared_stats, SharedStats, StatsSnapshot};
use crate::stream::PushRequest;
use crate::transport::{HttpTransport, Transport};
use chrono::Utc;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tokio::time::Instant;

/// Run every configured scenario to completion
pub async fn run_load(config: Config) -> Result<StatsSnapshot, Box<dyn std::error::Error>> {
    run_load_with_stats(config, new_shared_stats()).await
}

/// Run every configured scenario, recording into `stats`
pub async fn run_load_with_stats(
    config: Config,
    stats: SharedStats,
) -> Result<StatsSnapshot, Box<dyn std::error::Error>> {
    let workload = Arc::new(config.workload()?);
    let transport_config = config.transport_config();
    let client = reqwest::Client::builder().build()?;

    tracing::info!(url = %transport_config.url, "Starting lokiload run");
    tracing::info!(
        "Labels: {}, formats: {:?}, query limit: {:?}",
        workload.model().len(),
        workload.model().formats(),
        workload.builder.limit()
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    let signal_task = tokio::spawn(async move {
        shutdown_signal().await;
        let _ = stop_tx.send(true);
    });

    let mut handles = Vec::new();
    let mut vu = 0u64;
    for scenario in &config.scenarios {
        tracing::info!(
            scenario = %scenario.name,
            kind = %scenario.kind,
            vus = scenario.vus,
            duration = ?scenario.duration,
            iterations = ?scenario.iterations,
            "Starting scenario"
        );

        let deadline = scenario.duration.map(|d| Instant::now() + d);
        for _ in 0..scenario.vus {
            vu += 1;
            let transport =
                HttpTransport::with_client(client.clone(), &transport_config, vu)?;
            let mut rng = vu_rng(config.seed, vu);
            let plan = VuPlan {
                deadline,
                iterations: scenario.iterations,
                pacing: scenario.pacing,
                pacing_rng: SmallRng::from_rng(&mut rng),
            };
            let driver = WorkloadDriver::new(
                Arc::clone(&workload),
                scenario.kind,
                transport,
                Arc::clone(&stats),
                vu,
                rng,
            );
            handles.push(tokio::spawn(run_vu(driver, plan, stop_rx.clone())));
        }
    }

    let results = futures::future::join_all(handles).await;
    signal_task.abort();

    let mut iterations = 0;
    for result in results {
        iterations += result??;
    }

    let snapshot = stats.snapshot();
    tracing::info!(
        iterations,
        requests = snapshot.total_requests,
        failed = snapshot.failed_requests,
        "Run complete"
    );
    Ok(snapshot)
}

/// Per-VU seed: the configured seed offset by the VU index, else entropy
pub fn vu_rng(seed: Option<u64>, vu: u64) -> SmallRng {
    match seed {
        Some(seed) => SmallRng::seed_from_u64(seed.wrapping_add(vu)),
        None => SmallRng::from_os_rng(),
    }
}

/// Schedule of one virtual user
struct VuPlan {
    deadline: Option<Instant>,
    iterations: Option<u64>,
    pacing: PacingProfile,
    pacing_rng: SmallRng,
}

impl VuPlan {
    fn done(&self, completed: u64) -> bool {
        self.iterations.is_some_and(|max| completed >= max)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

async fn run_vu<T: Transport>(
    mut driver: WorkloadDriver<T>,
    mut plan: VuPlan,
    mut stop: watch::Receiver<bool>,
) -> Result<u64, DriverError> {
    let mut completed = 0;
    while !*stop.borrow() && !plan.done(completed) {
        let outcome = driver.run_iteration().await?;
        completed += 1;
        tracing::debug!(
            vu = driver.vu(),
            scenario = %driver.scenario(),
            requests = outcome.requests,
            failed = outcome.failed,
            short_circuited = outcome.short_circuited,
            "Iteration finished"
        );

        let pause = plan.pacing.sample(&mut plan.pacing_rng);
        if pause.is_zero() {
            continue;
        }
        let mut wake = Instant::now() + pause;
        if let Some(deadline) = plan.deadline {
            wake = wake.min(deadline);
        }
        tokio::select! {
            _ = tokio::time::sleep_until(wake) => {},
            _ = stop.changed() => {},
        }
    }
    Ok(completed)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, finishing in-flight iterations");
}

/// Human-readable end-of-run report
pub fn format_summary(snapshot: &StatsSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "checks:");
    for (name, counts) in &snapshot.checks {
        let mark = if counts.failed == 0 { "ok  " } else { "FAIL" };
        let _ = writeln!(
            out,
            "  {} {:<32} {:>6.2}% ({}/{})",
            mark,
            name,
            counts.pass_rate() * 100.0,
            counts.passed,
            counts.total()
        );
    }

    let _ = writeln!(out, "requests:");
    let mut operations: Vec<_> = snapshot.operation_requests.iter().collect();
    operations.sort();
    for (operation, count) in operations {
        let _ = writeln!(out, "  {:<34} {}", operation, count);
    }

    let _ = writeln!(
        out,
        "total requests: {} ({:.1}/s), failed: {:.2}%, transport errors: {}",
        snapshot.total_requests,
        snapshot.requests_per_second,
        snapshot.failure_rate * 100.0,
        snapshot.transport_errors
    );
    let _ = writeln!(
        out,
        "latency ms: avg {:.2}, min {}, max {}",
        snapshot.avg_latency_ms,
        format_optional_ms(snapshot.min_latency_ms),
        format_optional_ms(snapshot.max_latency_ms)
    );
    let _ = writeln!(
        out,
        "pushed: {} streams, {} lines, {}",
        snapshot.streams_pushed,
        snapshot.lines_pushed,
        bytesize::ByteSize::b(snapshot.bytes_pushed)
    );
    if !snapshot.processed.is_empty() {
        let _ = writeln!(
            out,
            "processed by backend: {} lines, {}",
            snapshot.lines_processed,
            bytesize::ByteSize::b(snapshot.bytes_processed)
        );
        for (kind, counts) in &snapshot.processed {
            let _ = writeln!(
                out,
                "  {:<10} {} queries, {} lines ({:.1}/s avg), {} ({}/s avg)",
                kind,
                counts.queries,
                counts.lines,
                counts.avg_lines_per_second,
                bytesize::ByteSize::b(counts.bytes),
                bytesize::ByteSize::b(counts.avg_bytes_per_second as u64)
            );
        }
    }
    let _ = write!(
        out,
        "iterations: {} ({} ended after empty discovery) in {}s",
        snapshot.iterations, snapshot.short_circuited, snapshot.uptime_secs
    );
    out
}

fn format_optional_ms(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.2}", v))
}

/// Render one push batch and `queries` read requests without sending them.
///
/// With `body` set the full push JSON is included instead of a per-stream
/// outline.
pub fn render_sample<R: Rng>(
    workload: &Workload,
    rng: &mut R,
    queries: usize,
    body: bool,
) -> Result<String, DriverError> {
    let mut out = String::new();
    let shape = workload.push;
    let count = rng.random_range(shape.streams_min..=shape.streams_max);
    let streams = workload.synthesizer.build_batch(
        rng,
        count,
        shape.min_bytes,
        shape.max_bytes,
        Some("vu0.sample"),
    )?;
    let push = PushRequest::new(streams);

    let _ = writeln!(
        out,
        "push {} ({} streams, {} lines, {} bytes)",
        crate::transport::PUSH_ENDPOINT,
        push.streams.len(),
        push.line_count(),
        push.size_bytes()
    );
    if body {
        let json = serde_json::to_string_pretty(&push).unwrap_or_default();
        let _ = writeln!(out, "{}", json);
    } else {
        for stream in &push.streams {
            let _ = writeln!(
                out,
                "  {} {} lines, {} bytes",
                stream.labels,
                stream.entries.len(),
                stream.size_bytes()
            );
            if let Some(entry) = stream.entries.first() {
                let line: String = entry.line.chars().take(160).collect();
                let _ = writeln!(out, "    {}", line);
            }
        }
    }

    let now = Utc::now();
    for _ in 0..queries {
        let kind: QueryKind = *workload.query_mix.sample(rng);
        let request = workload.builder.random_query(kind, rng)?;
        let _ = writeln!(out, "{} {}", kind, request.endpoint());
        for (key, value) in request.params(now) {
            let _ = writeln!(out, "  {}={}", key, value);
        }
    }
    Ok(out)
}

/// Build the workload from `config` and render a sample of it
pub fn sample(
    config: &Config,
    queries: usize,
    body: bool,
) -> Result<String, Box<dyn std::error::Error>> {
    let workload = config.workload()?;
    let mut rng = vu_rng(config.seed, 0);
    Ok(render_sample(&workload, &mut rng, queries, body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Scenario;
    use crate::errors::TransportError;
    use crate::query::QueryRequest;
    use crate::stats::Stats;
    use crate::transport::TransportResponse;
    use futures::future::BoxFuture;

    /// Accepts every push
    struct AcceptAll;

    impl Transport for AcceptAll {
        fn push<'a>(
            &'a self,
            _request: &'a PushRequest,
        ) -> BoxFuture<'a, Result<TransportResponse, TransportError>> {
            Box::pin(async { Ok(TransportResponse::new(204, "")) })
        }

        fn query<'a>(
            &'a self,
            _request: &'a QueryRequest,
        ) -> BoxFuture<'a, Result<TransportResponse, TransportError>> {
            Box::pin(async { Ok(TransportResponse::new(200, "{}")) })
        }
    }

    fn write_driver(stats: SharedStats) -> WorkloadDriver<AcceptAll> {
        let workload = Arc::new(small_config().workload().unwrap());
        WorkloadDriver::new(
            workload,
            Scenario::Write,
            AcceptAll,
            stats,
            1,
            SmallRng::seed_from_u64(1),
        )
    }

    fn plan(iterations: Option<u64>, pacing: PacingProfile) -> VuPlan {
        VuPlan {
            deadline: None,
            iterations,
            pacing,
            pacing_rng: SmallRng::seed_from_u64(0),
        }
    }

    fn small_config() -> Config {
        Config::from_yaml(
            r#"
labels:
  pool:
    app: 2
push:
  streams_min: 1
  streams_max: 2
  min_bytes: 512 B
  max_bytes: 2 KiB
seed: 7
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_vu_rng_seeded() {
        let mut a = vu_rng(Some(1), 3);
        let mut b = vu_rng(Some(1), 3);
        let mut c = vu_rng(Some(1), 4);
        let (x, y, z): (u64, u64, u64) = (a.random(), b.random(), c.random());
        assert_eq!(x, y);
        assert_ne!(x, z);
    }

    #[test]
    fn test_plan_done() {
        let budget = plan(Some(2), PacingProfile::none());
        assert!(!budget.done(1));
        assert!(budget.done(2));

        let mut timed = plan(None, PacingProfile::none());
        assert!(!timed.done(100));
        timed.deadline = Some(Instant::now());
        assert!(timed.done(0));
    }

    #[test]
    fn test_run_vu_iteration_budget() {
        let stats = new_shared_stats();
        let (_tx, rx) = watch::channel(false);
        let completed = tokio_test::block_on(run_vu(
            write_driver(Arc::clone(&stats)),
            plan(Some(3), PacingProfile::fixed(1)),
            rx,
        ))
        .unwrap();

        assert_eq!(completed, 3);
        assert_eq!(stats.iterations.load(std::sync::atomic::Ordering::Relaxed), 3);
        assert_eq!(stats.checks()["successful write"].passed, 3);
    }

    #[test]
    fn test_run_vu_stops_on_signal() {
        let stats = new_shared_stats();
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let completed = tokio_test::block_on(run_vu(
            write_driver(Arc::clone(&stats)),
            plan(None, PacingProfile::none()),
            rx,
        ))
        .unwrap();
        assert_eq!(completed, 0);
    }

    #[test]
    fn test_render_sample() {
        let config = small_config();
        let workload = config.workload().unwrap();
        let mut rng = SmallRng::seed_from_u64(1);
        let text = render_sample(&workload, &mut rng, 3, false).unwrap();

        assert!(text.starts_with("push /loki/api/v1/push"));
        assert!(text.contains("instance=\"vu0.sample\""));
        assert_eq!(text.matches("/loki/api/v1/").count(), 4);

        let text = render_sample(&workload, &mut rng, 0, true).unwrap();
        assert!(text.contains("\"streams\""));
    }

    #[test]
    fn test_sample_is_deterministic_with_seed() {
        let config = small_config();
        let a = sample(&config, 2, false).unwrap();
        let b = sample(&config, 2, false).unwrap();
        // timestamps differ between runs, the label sets do not
        let outline = |s: &str| -> Vec<String> {
            s.lines()
                .filter(|l| l.starts_with("  {"))
                .filter_map(|l| l.trim_start().split('}').next())
                .map(str::to_string)
                .collect()
        };
        assert_eq!(outline(&a), outline(&b));
    }

    #[test]
    fn test_format_summary() {
        let stats = Stats::new();
        stats.record_check("successful write", true);
        stats.record_check("successful write", false);
        stats.record_check("successful labels query", true);
        stats.record_push(2, 10, 2048);
        stats.record_iteration(true);

        let text = format_summary(&stats.snapshot());
        assert!(!text.contains("processed by backend"));

        stats.record_query_summary(
            QueryKind::Range,
            &crate::stats::QuerySummary {
                total_bytes_processed: 0,
                bytes_processed_per_second: 0.0,
                total_lines_processed: 120,
                lines_processed_per_second: 40.0,
            },
        );
        let text = format_summary(&stats.snapshot());
        assert!(text.contains("processed by backend: 120 lines"));
        assert!(text.contains("range      1 queries, 120 lines (40.0/s avg)"));
        assert!(text.contains("FAIL successful write"));
        assert!(text.contains("50.00% (1/2)"));
        assert!(text.contains("ok   successful labels query"));
        assert!(text.contains("pushed: 2 streams, 10 lines"));
        assert!(text.contains("iterations: 1 (1 ended after empty discovery)"));
        assert!(text.contains("min -"));
    }
}
