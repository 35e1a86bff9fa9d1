// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::apm::{ApmSource, NoApm};
use crate::errors::MonitorError;
use crate::hostname::get_hostname;
use crate::process::{ProcStatSampler, ProcessSampler};
use crate::runtime::{AllocatorStats, ExtraMetric, RuntimeStats, RuntimeStatsSource};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use tsdb::{DataPoint, PointSink, Tag, Tags};

pub const DEFAULT_NAMESPACE: &str = "scope";
pub const TYPE_RUNTIME: &str = "gomon";
pub const TYPE_CALLS: &str = "calls";

const SECS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub app_name: String,
    pub app_version: String,
    /// One `updays` sample per key, tagged `rk_<n>` starting at 1.
    pub routing_keys: Vec<String>,
    pub namespace: String,
    pub runtime_interval: Duration,
    pub info_interval: Duration,
    pub apm_interval: Duration,
    /// Delay before the first info and APM samples.
    pub initial_delay: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            app_name: String::new(),
            app_version: String::new(),
            routing_keys: Vec::new(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            runtime_interval: Duration::from_secs(60),
            info_interval: Duration::from_secs(6 * 60 * 60),
            apm_interval: Duration::from_secs(60),
            initial_delay: Duration::from_secs(5),
        }
    }
}

/// Periodic sampler reporting process and runtime health as data points.
pub struct Monitor {
    config: MonitorConfig,
    sink: Option<Arc<dyn PointSink>>,
    pid: u32,
    tags: Tags,
    routing_tags: Vec<Tags>,
    process: Arc<dyn ProcessSampler>,
    runtime: Arc<dyn RuntimeStatsSource>,
    apm: Arc<dyn ApmSource>,
    extras: Vec<ExtraMetric>,
    started: Instant,
}

/// Running monitor loops.
pub struct MonitorHandle {
    monitor: Arc<Monitor>,
    cancel_token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Emits an application sample as `<namespace>.gomon.<field>`, tagged
    /// with the monitor tags followed by `extra`.
    pub async fn record(&self, field: &str, value: f64, extra: Tags) {
        let mut tags = self.monitor.tags.clone();
        for tag in extra.iter() {
            tags.push(tag.clone());
        }
        self.monitor.emit(TYPE_RUNTIME, field, value, &tags).await;
    }

    pub async fn shutdown(self) {
        self.cancel_token.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("Monitor task failed: {e}");
            }
        }
    }
}

impl Monitor {
    /// Samples are dropped with an error log when `sink` is `None` or the
    /// application name is empty.
    pub fn new(
        config: MonitorConfig,
        sink: Option<Arc<dyn PointSink>>,
    ) -> Result<Self, MonitorError> {
        for (name, period) in [
            ("runtime", config.runtime_interval),
            ("info", config.info_interval),
            ("apm", config.apm_interval),
        ] {
            if period.is_zero() {
                return Err(MonitorError::Precondition(format!(
                    "{name} interval must be greater than zero"
                )));
            }
        }

        let pid = std::process::id();
        let tags: Tags = vec![
            Tag::new("app", config.app_name.clone())?,
            Tag::new("host", get_hostname())?,
            Tag::new("id", pid.to_string())?,
        ]
        .into();

        let version = Tag::new("version", config.app_version.clone())?;
        let routing_tags = config
            .routing_keys
            .iter()
            .enumerate()
            .map(|(index, key)| {
                let rk = Tag::new(format!("rk_{}", index + 1), key.clone())?;
                Ok(tags.with(version.clone()).with(rk))
            })
            .collect::<Result<Vec<_>, MonitorError>>()?;

        Ok(Self {
            config,
            sink,
            pid,
            tags,
            routing_tags,
            process: Arc::new(ProcStatSampler::new()),
            runtime: Arc::new(AllocatorStats::new()),
            apm: Arc::new(NoApm),
            extras: Vec::new(),
            started: Instant::now(),
        })
    }

    #[must_use]
    pub fn with_process_sampler(mut self, sampler: Arc<dyn ProcessSampler>) -> Self {
        self.process = sampler;
        self
    }

    #[must_use]
    pub fn with_runtime_stats(mut self, source: Arc<dyn RuntimeStatsSource>) -> Self {
        self.runtime = source;
        self
    }

    #[must_use]
    pub fn with_apm(mut self, apm: Arc<dyn ApmSource>) -> Self {
        self.apm = apm;
        self
    }

    #[must_use]
    pub fn with_extra_metric(mut self, metric: ExtraMetric) -> Self {
        self.extras.push(metric);
        self
    }

    /// Spawns the runtime, info and APM loops on the current tokio runtime.
    pub fn start(self) -> Result<MonitorHandle, MonitorError> {
        let handle = Handle::try_current()
            .map_err(|e| MonitorError::Precondition(format!("no tokio runtime available: {e}")))?;
        let cancel_token = CancellationToken::new();
        let monitor = Arc::new(self);

        let tasks = vec![
            handle.spawn(monitor.clone().run_runtime_loop(cancel_token.clone())),
            handle.spawn(monitor.clone().run_info_loop(cancel_token.clone())),
            handle.spawn(monitor.clone().run_apm_loop(cancel_token.clone())),
        ];
        Ok(MonitorHandle {
            monitor,
            cancel_token,
            tasks,
        })
    }

    async fn run_runtime_loop(self: Arc<Self>, cancel_token: CancellationToken) {
        let period = self.config.runtime_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut previous = RuntimeStats::default();

        loop {
            tokio::select! {
                biased;
                () = cancel_token.cancelled() => break,
                _ = ticker.tick() => {
                    previous = self.sample_runtime(&previous).await;
                }
            }
        }
        debug!("Runtime monitor stopped");
    }

    async fn run_info_loop(self: Arc<Self>, cancel_token: CancellationToken) {
        let period = self.config.info_interval;
        let mut ticker = interval_at(Instant::now() + self.config.initial_delay, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel_token.cancelled() => break,
                _ = ticker.tick() => self.sample_info().await,
            }
        }
        debug!("Info monitor stopped");
    }

    async fn run_apm_loop(self: Arc<Self>, cancel_token: CancellationToken) {
        let period = self.config.apm_interval;
        let mut ticker = interval_at(Instant::now() + self.config.initial_delay, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel_token.cancelled() => break,
                _ = ticker.tick() => self.sample_apm().await,
            }
        }
        debug!("APM monitor stopped");
    }

    /// Emits one round of runtime samples and returns the snapshot the next
    /// round diffs against.
    async fn sample_runtime(&self, previous: &RuntimeStats) -> RuntimeStats {
        let current = self.runtime.read();
        let process = self
            .process
            .sample(self.pid)
            .map_err(|e| debug!("Failed to sample process {}: {e}", self.pid))
            .ok();

        self.emit(TYPE_RUNTIME, "threads", current.threads as f64, &self.tags)
            .await;
        self.emit(TYPE_RUNTIME, "memAlloc", current.heap_alloc as f64, &self.tags)
            .await;
        if let Some(process) = process {
            self.emit(TYPE_RUNTIME, "rss", process.rss_bytes as f64, &self.tags)
                .await;
        }
        self.emit(
            TYPE_RUNTIME,
            "mallocs",
            current.mallocs.saturating_sub(previous.mallocs) as f64,
            &self.tags,
        )
        .await;
        self.emit(
            TYPE_RUNTIME,
            "frees",
            current.frees.saturating_sub(previous.frees) as f64,
            &self.tags,
        )
        .await;
        self.emit(
            TYPE_RUNTIME,
            "currAllocs",
            current.mallocs.saturating_sub(current.frees) as f64,
            &self.tags,
        )
        .await;
        self.emit(TYPE_RUNTIME, "memSys", current.heap_sys as f64, &self.tags)
            .await;
        self.emit(
            TYPE_RUNTIME,
            "msGcPause",
            current
                .gc_pause_total_ns
                .saturating_sub(previous.gc_pause_total_ns) as f64
                / 1_000_000.0,
            &self.tags,
        )
        .await;
        self.emit(
            TYPE_RUNTIME,
            "gcNum",
            current.num_gc.saturating_sub(previous.num_gc) as f64,
            &self.tags,
        )
        .await;
        if let Some(process) = process {
            self.emit(TYPE_RUNTIME, "percentCPU", process.cpu_percent, &self.tags)
                .await;
        }

        for extra in &self.extras {
            self.emit(
                TYPE_RUNTIME,
                &extra.name,
                extra.value(&current, previous),
                &self.tags,
            )
            .await;
        }

        current
    }

    async fn sample_info(&self) {
        let updays = self.started.elapsed().as_secs_f64() / SECS_PER_DAY;
        for tags in &self.routing_tags {
            self.emit(TYPE_RUNTIME, "updays", updays, tags).await;
        }
    }

    async fn sample_apm(&self) {
        let mut stats: Vec<(String, f64)> =
            self.apm.business_transaction_stats().into_iter().collect();
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, value) in stats {
            self.emit(TYPE_CALLS, &name, value, &self.tags).await;
        }
    }

    async fn emit(&self, metric_type: &str, field: &str, value: f64, tags: &Tags) {
        let sink = match &self.sink {
            Some(sink) if !self.config.app_name.is_empty() => sink,
            _ => {
                error!(
                    "Dropping {field} sample: client configured: {}, app name: '{}'",
                    self.sink.is_some(),
                    self.config.app_name
                );
                return;
            }
        };

        let metric = format!("{}.{metric_type}.{field}", self.config.namespace);
        let point = DataPoint::now(metric, value, tags.clone());
        debug!("Monitor sample: {point}");
        if let Err(e) = sink.put(point).await {
            error!("Failed to queue {field} sample: {e}");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::process::ProcessStat;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::io;
    use std::sync::Mutex;
    use tracing_test::traced_test;
    use tsdb::TsdbError;

    #[derive(Default)]
    struct RecordingSink {
        points: Mutex<Vec<DataPoint>>,
    }

    impl RecordingSink {
        fn take(&self) -> Vec<DataPoint> {
            std::mem::take(&mut *self.points.lock().unwrap())
        }
    }

    #[async_trait]
    impl PointSink for RecordingSink {
        async fn put(&self, point: DataPoint) -> Result<(), TsdbError> {
            self.points.lock().unwrap().push(point);
            Ok(())
        }
    }

    struct FixedProcess;

    impl ProcessSampler for FixedProcess {
        fn sample(&self, _pid: u32) -> io::Result<ProcessStat> {
            Ok(ProcessStat {
                cpu_percent: 12.5,
                rss_bytes: 4096,
            })
        }
    }

    struct BrokenProcess;

    impl ProcessSampler for BrokenProcess {
        fn sample(&self, _pid: u32) -> io::Result<ProcessStat> {
            Err(io::Error::new(io::ErrorKind::NotFound, "gone"))
        }
    }

    /// Hands out scripted snapshots, repeating the last one.
    struct ScriptedStats(Mutex<VecDeque<RuntimeStats>>);

    impl ScriptedStats {
        fn new(stats: Vec<RuntimeStats>) -> Self {
            Self(Mutex::new(stats.into()))
        }
    }

    impl RuntimeStatsSource for ScriptedStats {
        fn read(&self) -> RuntimeStats {
            let mut stats = self.0.lock().unwrap();
            if stats.len() > 1 {
                stats.pop_front().unwrap()
            } else {
                stats.front().copied().unwrap_or_default()
            }
        }
    }

    struct FixedApm;

    impl ApmSource for FixedApm {
        fn business_transaction_stats(&self) -> HashMap<String, f64> {
            HashMap::from([("checkout".to_string(), 7.0), ("login".to_string(), 3.0)])
        }
    }

    fn config() -> MonitorConfig {
        MonitorConfig {
            app_name: "billing".to_string(),
            app_version: "1.2.3".to_string(),
            ..Default::default()
        }
    }

    fn stats(mallocs: u64, frees: u64, gc_pause_total_ns: u64, num_gc: u64) -> RuntimeStats {
        RuntimeStats {
            threads: 8,
            heap_alloc: 1_000,
            heap_sys: 50_000,
            mallocs,
            frees,
            gc_pause_total_ns,
            num_gc,
        }
    }

    fn value_of(points: &[DataPoint], metric: &str) -> Option<f64> {
        points.iter().find(|p| p.metric == metric).map(|p| p.value)
    }

    fn monitor(config: MonitorConfig, sink: &Arc<RecordingSink>) -> Monitor {
        Monitor::new(config, Some(sink.clone() as Arc<dyn PointSink>))
            .unwrap()
            .with_process_sampler(Arc::new(FixedProcess))
    }

    #[tokio::test(start_paused = true)]
    async fn test_runtime_samples_after_one_period() {
        let sink = Arc::new(RecordingSink::default());
        let handle = monitor(config(), &sink)
            .with_runtime_stats(Arc::new(ScriptedStats::new(vec![stats(10, 4, 3_000_000, 2)])))
            .start()
            .unwrap();

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(sink.take().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let points = sink.take();
        let names: Vec<&str> = points.iter().map(|p| p.metric.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "scope.gomon.threads",
                "scope.gomon.memAlloc",
                "scope.gomon.rss",
                "scope.gomon.mallocs",
                "scope.gomon.frees",
                "scope.gomon.currAllocs",
                "scope.gomon.memSys",
                "scope.gomon.msGcPause",
                "scope.gomon.gcNum",
                "scope.gomon.percentCPU",
            ]
        );
        let tags = points[0].tags.to_map();
        assert_eq!(tags.get("app"), Some(&"billing"));
        assert_eq!(tags.get("id"), Some(&std::process::id().to_string().as_str()));
        assert!(tags.contains_key("host"));
        assert!(!tags.contains_key("version"));

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_deltas_against_zero_snapshot() {
        let sink = Arc::new(RecordingSink::default());
        let handle = monitor(config(), &sink)
            .with_runtime_stats(Arc::new(ScriptedStats::new(vec![
                stats(10, 4, 3_000_000, 2),
                stats(25, 9, 5_000_000, 3),
            ])))
            .start()
            .unwrap();

        tokio::time::sleep(Duration::from_secs(61)).await;
        let first = sink.take();
        assert_eq!(value_of(&first, "scope.gomon.mallocs"), Some(10.0));
        assert_eq!(value_of(&first, "scope.gomon.frees"), Some(4.0));
        assert_eq!(value_of(&first, "scope.gomon.msGcPause"), Some(3.0));
        assert_eq!(value_of(&first, "scope.gomon.gcNum"), Some(2.0));

        tokio::time::sleep(Duration::from_secs(60)).await;
        let second = sink.take();
        assert_eq!(value_of(&second, "scope.gomon.mallocs"), Some(15.0));
        assert_eq!(value_of(&second, "scope.gomon.frees"), Some(5.0));
        assert_eq!(value_of(&second, "scope.gomon.currAllocs"), Some(16.0));
        assert_eq!(value_of(&second, "scope.gomon.msGcPause"), Some(2.0));
        assert_eq!(value_of(&second, "scope.gomon.gcNum"), Some(1.0));
        assert_eq!(value_of(&second, "scope.gomon.percentCPU"), Some(12.5));

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_extra_metrics_follow_builtin_samples() {
        let sink = Arc::new(RecordingSink::default());
        let handle = monitor(config(), &sink)
            .with_runtime_stats(Arc::new(ScriptedStats::new(vec![
                stats(10, 4, 0, 0),
                stats(30, 4, 0, 0),
            ])))
            .with_extra_metric(ExtraMetric::new("heapSys", |s| s.heap_sys as f64))
            .with_extra_metric(
                ExtraMetric::new("mallocs", |s| s.mallocs as f64)
                    .named("allocRate")
                    .delta(),
            )
            .start()
            .unwrap();

        tokio::time::sleep(Duration::from_secs(121)).await;
        let points = sink.take();
        let rates: Vec<f64> = points
            .iter()
            .filter(|p| p.metric == "scope.gomon.allocRate")
            .map(|p| p.value)
            .collect();
        assert_eq!(rates, vec![10.0, 20.0]);
        assert_eq!(value_of(&points, "scope.gomon.heapSys"), Some(50_000.0));
        assert_eq!(points.last().unwrap().metric, "scope.gomon.allocRate");

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_process_failure_skips_process_samples() {
        let sink = Arc::new(RecordingSink::default());
        let handle = Monitor::new(config(), Some(sink.clone() as Arc<dyn PointSink>))
            .unwrap()
            .with_process_sampler(Arc::new(BrokenProcess))
            .with_runtime_stats(Arc::new(ScriptedStats::new(vec![stats(1, 1, 0, 0)])))
            .start()
            .unwrap();

        tokio::time::sleep(Duration::from_secs(61)).await;
        let points = sink.take();
        assert_eq!(points.len(), 8);
        assert_eq!(value_of(&points, "scope.gomon.rss"), None);
        assert_eq!(value_of(&points, "scope.gomon.percentCPU"), None);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_info_loop_tags_routing_keys() {
        let sink = Arc::new(RecordingSink::default());
        let config = MonitorConfig {
            routing_keys: vec!["team-a".to_string(), "team-b".to_string()],
            ..config()
        };
        let handle = monitor(config, &sink).start().unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;
        let points = sink.take();
        assert_eq!(points.len(), 2);
        for (index, point) in points.iter().enumerate() {
            assert_eq!(point.metric, "scope.gomon.updays");
            assert!(point.value >= 0.0 && point.value < 1.0);
            let tags = point.tags.to_map();
            assert_eq!(tags.get("version"), Some(&"1.2.3"));
            let key = format!("rk_{}", index + 1);
            let expected = if index == 0 { "team-a" } else { "team-b" };
            assert_eq!(tags.get(key.as_str()), Some(&expected));
        }

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_apm_loop_emits_calls() {
        let sink = Arc::new(RecordingSink::default());
        let handle = monitor(config(), &sink)
            .with_apm(Arc::new(FixedApm))
            .start()
            .unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;
        let points = sink.take();
        let calls: Vec<(&str, f64)> = points
            .iter()
            .map(|p| (p.metric.as_str(), p.value))
            .collect();
        assert_eq!(
            calls,
            vec![("scope.calls.checkout", 7.0), ("scope.calls.login", 3.0)]
        );

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_empty_app_name_drops_samples() {
        let sink = Arc::new(RecordingSink::default());
        let config = MonitorConfig {
            app_name: String::new(),
            ..config()
        };
        let handle = monitor(config, &sink)
            .with_apm(Arc::new(FixedApm))
            .start()
            .unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(sink.take().is_empty());
        assert!(logs_contain("Dropping checkout sample"));

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_missing_client_drops_samples_and_keeps_running() {
        let handle = Monitor::new(config(), None)
            .unwrap()
            .with_process_sampler(Arc::new(FixedProcess))
            .with_apm(Arc::new(FixedApm))
            .start()
            .unwrap();

        tokio::time::sleep(Duration::from_secs(70)).await;
        assert!(logs_contain("client configured: false"));
        assert!(logs_contain("Dropping threads sample"));

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_loops() {
        let sink = Arc::new(RecordingSink::default());
        let handle = monitor(config(), &sink)
            .with_apm(Arc::new(FixedApm))
            .start()
            .unwrap();

        handle.shutdown().await;
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(sink.take().is_empty());
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let result = Monitor::new(config(), None).unwrap().start();
        assert!(matches!(result, Err(MonitorError::Precondition(_))));
    }

    #[test]
    fn test_routing_key_with_space_is_rejected() {
        let config = MonitorConfig {
            routing_keys: vec!["team a".to_string()],
            ..config()
        };
        assert!(matches!(
            Monitor::new(config, None),
            Err(MonitorError::Tag(_))
        ));
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        for config in [
            MonitorConfig {
                runtime_interval: Duration::ZERO,
                ..config()
            },
            MonitorConfig {
                info_interval: Duration::ZERO,
                ..config()
            },
            MonitorConfig {
                apm_interval: Duration::ZERO,
                ..config()
            },
        ] {
            assert!(matches!(
                Monitor::new(config, None),
                Err(MonitorError::Precondition(_))
            ));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_merges_monitor_tags() {
        let sink = Arc::new(RecordingSink::default());
        let handle = monitor(config(), &sink).start().unwrap();

        let extra = tsdb::make_tags([("queue", "orders")]).unwrap();
        handle.record("backlog", 42.0, extra).await;

        let points = sink.take();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].metric, "scope.gomon.backlog");
        assert_eq!(points[0].value, 42.0);
        let tags = points[0].tags.to_map();
        assert_eq!(tags.get("app"), Some(&"billing"));
        assert_eq!(tags.get("queue"), Some(&"orders"));
        assert!(tags.contains_key("host"));
        assert!(tags.contains_key("id"));

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_record_without_app_name_is_dropped() {
        let sink = Arc::new(RecordingSink::default());
        let config = MonitorConfig {
            app_name: String::new(),
            ..config()
        };
        let handle = monitor(config, &sink).start().unwrap();

        handle.record("backlog", 1.0, Tags::new()).await;
        assert!(sink.take().is_empty());
        assert!(logs_contain("Dropping backlog sample"));

        handle.shutdown().await;
    }
}
