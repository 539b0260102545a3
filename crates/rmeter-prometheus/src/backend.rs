use std::sync::Arc;

use prometheus::{CounterVec, HistogramOpts, HistogramVec, Opts, Registry, proto::MetricFamily};

use rmeter_core::{MetricsBackend, TaskOutcome};

/// Prometheus metrics for measurement worker pools.
///
/// ## Metrics
/// - `rmeter_measurements_started_total{pool}`
/// - `rmeter_measurements_completed_total{pool, outcome}`
/// - `rmeter_measurement_duration_seconds{pool}`
/// - `rmeter_worker_errors_total{pool, kind}`
///
/// ## Label cardinality
/// - `pool`: `"local"`, `"process"`
/// - `outcome`: `"success"`, `"failure"`, `"timeout"`
/// - `kind`: `"spawn"`, `"broken"`, `"crash"`, `"killed"`, `"abandoned"`
#[derive(Clone)]
pub struct PrometheusMetrics {
    started: CounterVec,
    completed: CounterVec,
    duration: HistogramVec,
    worker_errors: CounterVec,
    registry: Arc<Registry>,
}

impl PrometheusMetrics {
    /// Register the metrics on `registry`.
    ///
    /// Fails if the registry already holds metrics with the same names.
    pub fn new_with_registry(registry: Arc<Registry>) -> Result<Self, prometheus::Error> {
        let started = CounterVec::new(
            Opts::new(
                "rmeter_measurements_started_total",
                "Measurements handed to a worker",
            ),
            &["pool"],
        )?;
        registry.register(Box::new(started.clone()))?;

        let completed = CounterVec::new(
            Opts::new(
                "rmeter_measurements_completed_total",
                "Measurements that produced a result, by outcome",
            ),
            &["pool", "outcome"],
        )?;
        registry.register(Box::new(completed.clone()))?;

        let duration = HistogramVec::new(
            HistogramOpts::new(
                "rmeter_measurement_duration_seconds",
                "Wall time from hand-off to result",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0]),
            &["pool"],
        )?;
        registry.register(Box::new(duration.clone()))?;

        let worker_errors = CounterVec::new(
            Opts::new(
                "rmeter_worker_errors_total",
                "Workers that failed to spawn, crashed or were replaced",
            ),
            &["pool", "kind"],
        )?;
        registry.register(Box::new(worker_errors.clone()))?;

        Ok(Self {
            started,
            completed,
            duration,
            worker_errors,
            registry,
        })
    }

    /// Metrics on a fresh private registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::new_with_registry(Arc::new(Registry::new()))
    }

    pub fn gather(&self) -> Vec<MetricFamily> {
        self.registry.gather()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}

impl MetricsBackend for PrometheusMetrics {
    fn record_task_started(&self, pool: &str) {
        self.started.with_label_values(&[pool]).inc();
    }

    fn record_task_completed(&self, pool: &str, outcome: TaskOutcome, duration_ms: u64) {
        self.completed
            .with_label_values(&[pool, outcome.as_label()])
            .inc();
        self.duration
            .with_label_values(&[pool])
            .observe(duration_ms as f64 / 1000.0);
    }

    fn record_worker_error(&self, pool: &str, kind: &str) {
        self.worker_errors.with_label_values(&[pool, kind]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{Encoder, TextEncoder};

    fn exposition(metrics: &PrometheusMetrics) -> String {
        let mut out = Vec::new();
        TextEncoder::new().encode(&metrics.gather(), &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn family<'a>(families: &'a [MetricFamily], name: &str) -> &'a MetricFamily {
        families
            .iter()
            .find(|f| f.name() == name)
            .unwrap_or_else(|| panic!("metric {name} not found"))
    }

    #[test]
    fn started_is_labelled_by_pool() {
        let metrics = PrometheusMetrics::new().unwrap();

        metrics.record_task_started("local");
        metrics.record_task_started("local");
        metrics.record_task_started("process");

        let families = metrics.gather();
        let started = family(&families, "rmeter_measurements_started_total");
        assert_eq!(started.get_metric().len(), 2);
        let text = exposition(&metrics);
        assert!(text.contains(r#"rmeter_measurements_started_total{pool="local"} 2"#), "{text}");
        assert!(text.contains(r#"rmeter_measurements_started_total{pool="process"} 1"#), "{text}");
    }

    #[test]
    fn completion_feeds_counter_and_histogram() {
        let metrics = PrometheusMetrics::new().unwrap();

        metrics.record_task_completed("process", TaskOutcome::Success, 1500);
        metrics.record_task_completed("process", TaskOutcome::Timeout, 10_000);

        let families = metrics.gather();
        assert_eq!(
            family(&families, "rmeter_measurements_completed_total")
                .get_metric()
                .len(),
            2
        );
        let duration = family(&families, "rmeter_measurement_duration_seconds");
        assert_eq!(duration.get_metric().len(), 1);
        let text = exposition(&metrics);
        assert!(text.contains(r#"rmeter_measurement_duration_seconds_sum{pool="process"} 11.5"#), "{text}");
        assert!(text.contains(r#"rmeter_measurement_duration_seconds_count{pool="process"} 2"#), "{text}");
        assert!(text.contains(r#"outcome="timeout""#), "{text}");
    }

    #[test]
    fn worker_errors_by_kind() {
        let metrics = PrometheusMetrics::new().unwrap();

        metrics.record_worker_error("process", "crash");
        metrics.record_worker_error("process", "killed");
        metrics.record_worker_error("local", "abandoned");

        let families = metrics.gather();
        assert_eq!(
            family(&families, "rmeter_worker_errors_total")
                .get_metric()
                .len(),
            3
        );
    }

    #[test]
    fn double_registration_fails() {
        let registry = Arc::new(Registry::new());
        PrometheusMetrics::new_with_registry(Arc::clone(&registry)).unwrap();

        assert!(PrometheusMetrics::new_with_registry(registry).is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn runner_reports_through_the_backend() {
        use rmeter_core::{LifecycleRegistry, LocalWorkers, RpcRunner, Runner, remote::sim::SimConnector};
        use rmeter_model::{ArgInfo, RunnerInput};

        let metrics = PrometheusMetrics::new().unwrap();
        let registry = LifecycleRegistry::new(Arc::new(SimConnector::new()));
        let runner = RpcRunner::builder(Arc::new(LocalWorkers::new(Arc::new(registry))))
            .metrics(Arc::new(metrics.clone()))
            .build()
            .await
            .unwrap();

        let input = |device: &str| {
            RunnerInput::new("/tmp/mm.so", device, vec![ArgInfo::tensor("float32", vec![16, 16])])
        };
        for fut in runner.run(&[input("cpu"), input("cpu")]) {
            assert!(fut.result().await.is_success());
        }
        runner.shutdown().await;

        // the construction-time check runs through the pool as well
        let text = exposition(&metrics);
        assert!(text.contains(r#"rmeter_measurements_started_total{pool="local"} 3"#), "{text}");
        assert!(text.contains(r#"outcome="success""#), "{text}");
    }
}
