use crate::{
    collectors::{
        CollectStats,
        Collector,
    },
    error::{
        CollectError,
        RegistryError,
    },
    metrics::{
        MetricRegistry,
        Reconciliation,
        NO_LABELS,
    },
};
use chrono::{
    DateTime,
    Utc,
};
use futures::{
    future::join_all,
    FutureExt,
};
use serde::Serialize;
use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::Arc,
    time::{
        Duration,
        Instant,
    },
};
use strum::{
    Display,
    IntoStaticStr,
};
use tokio::{
    sync::watch,
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;

pub const COLLECTOR_RUNS: &str = "simplemdm_exporter_collector_runs_total";
pub const CYCLES: &str = "simplemdm_exporter_cycles_total";
pub const COLLECTOR_UP: &str = "simplemdm_exporter_collector_up";
pub const COLLECTOR_DURATION: &str = "simplemdm_exporter_collector_duration_seconds";
pub const LAST_CYCLE: &str = "simplemdm_exporter_last_cycle_timestamp_seconds";

/// Reconciliation scope of the exporter's own metrics.
pub const SCOPE: &str = "exporter";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr, Serialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectorReport {
    pub name: &'static str,
    pub outcome: Outcome,
    pub entities: usize,
    pub series: usize,
    pub duration_seconds: f64,
    pub error: Option<String>,
}

/// Summary of one collection cycle, published to [`Scheduler::subscribe`] receivers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub collectors: Vec<CollectorReport>,
    pub reconciliation: Reconciliation,
}

impl CycleReport {
    pub fn collector(&self, name: &str) -> Option<&CollectorReport> {
        self.collectors.iter().find(|report| report.name == name)
    }

    pub fn failures(&self) -> usize {
        self.collectors
            .iter()
            .filter(|report| report.outcome == Outcome::Failure)
            .count()
    }
}

/// Runs every collector once per interval, one cycle at a time.
///
/// The interval is measured start to start. A cycle that overruns it is followed immediately by the next one,
/// without catching up on the ticks it missed. The first cycle starts as soon as [`Scheduler::run`] is called.
pub struct Scheduler {
    registry: Arc<MetricRegistry>,
    collectors: Vec<Box<dyn Collector>>,
    interval: Duration,
    concurrent: bool,
    cycle: u64,
    reports: watch::Sender<Option<CycleReport>>,
}

impl Scheduler {
    /// Registers the families of every collector and of the scheduler itself.
    pub fn new(
        registry: Arc<MetricRegistry>,
        collectors: Vec<Box<dyn Collector>>,
        interval: Duration,
    ) -> Result<Self, RegistryError> {
        for collector in &collectors {
            collector.describe(&registry)?;
        }

        registry.register_counter(
            COLLECTOR_RUNS,
            "Collector runs by outcome",
            &["collector", "outcome"],
            SCOPE,
        )?;
        registry.register_counter(CYCLES, "Completed collection cycles", NO_LABELS, SCOPE)?;
        registry.register_gauge(
            COLLECTOR_UP,
            "Whether the last run of the collector succeeded",
            &["collector"],
            SCOPE,
        )?;
        registry.register_gauge(
            COLLECTOR_DURATION,
            "Duration of the last run of the collector",
            &["collector"],
            SCOPE,
        )?;
        registry.register_gauge(LAST_CYCLE, "Time the last collection cycle ended", NO_LABELS, SCOPE)?;

        let (reports, _) = watch::channel(None);
        Ok(Self {
            registry,
            collectors,
            interval,
            concurrent: false,
            cycle: 0,
            reports,
        })
    }

    /// Run the collectors of a cycle concurrently instead of one after the other.
    pub fn concurrent(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<CycleReport>> {
        self.reports.subscribe()
    }

    /// Loop until `shutdown` is cancelled. A cycle in flight is finished first. Collection errors never end the loop.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            interval = ?self.interval,
            collectors = self.collectors.len(),
            concurrent = self.concurrent,
            "scheduler started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(error) = self.run_cycle().await {
                error!(cycle = self.cycle, %error, "collection cycle could not be completed");
            }
        }

        info!(cycles = self.cycle, "scheduler stopped");
    }

    /// One full pass over all collectors, bracketed by a registry cycle.
    #[instrument(level = "debug", skip_all, fields(cycle = self.cycle + 1))]
    pub async fn run_cycle(&mut self) -> Result<CycleReport, RegistryError> {
        self.cycle += 1;
        let started_at = Utc::now();
        let clock = Instant::now();

        if self.registry.in_cycle() {
            warn!("previous cycle was left open, abandoning it");
            self.registry.abandon_cycle();
        }
        self.registry.begin_cycle()?;

        let collectors = if self.concurrent {
            join_all(
                self.collectors
                    .iter()
                    .map(|collector| run_collector(collector.as_ref(), &self.registry)),
            )
            .await
        } else {
            let mut reports = Vec::with_capacity(self.collectors.len());
            for collector in &self.collectors {
                reports.push(run_collector(collector.as_ref(), &self.registry).await);
            }
            reports
        };

        if let Err(error) = self.record_cycle(&collectors) {
            self.registry.abandon_cycle();
            return Err(error);
        }
        let reconciliation = self.registry.end_cycle()?;

        let report = CycleReport {
            cycle: self.cycle,
            started_at,
            duration_seconds: clock.elapsed().as_secs_f64(),
            collectors,
            reconciliation,
        };
        info!(
            failures = report.failures(),
            retired = report.reconciliation.retired,
            duration = ?clock.elapsed(),
            "collection cycle finished"
        );
        self.reports.send_replace(Some(report.clone()));
        Ok(report)
    }

    fn record_cycle(&self, collectors: &[CollectorReport]) -> Result<(), RegistryError> {
        for report in collectors {
            let up = if report.outcome == Outcome::Success { 1.0 } else { 0.0 };
            self.registry
                .increment(COLLECTOR_RUNS, &[report.name, report.outcome.into()])?;
            self.registry.upsert(COLLECTOR_UP, &[report.name], up)?;
            self.registry
                .upsert(COLLECTOR_DURATION, &[report.name], report.duration_seconds)?;
        }
        self.registry.increment(CYCLES, NO_LABELS)?;
        self.registry
            .upsert(LAST_CYCLE, NO_LABELS, Utc::now().timestamp_millis() as f64 / 1000.0)?;
        self.registry.complete_scope(SCOPE)
    }
}

/// Run one collector, containing its errors and panics. The collector's scope is completed only on success.
async fn run_collector(collector: &dyn Collector, registry: &MetricRegistry) -> CollectorReport {
    let name = collector.name();
    let clock = Instant::now();

    let result = AssertUnwindSafe(collector.collect(registry))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(CollectError::Panicked(panic_message(panic.as_ref()))))
        .and_then(|stats| {
            registry.complete_scope(name)?;
            Ok(stats)
        });
    let duration = clock.elapsed();

    let (outcome, stats, error) = match result {
        Ok(stats) => {
            debug!(collector = name, entities = stats.entities, series = stats.series, ?duration, "collector finished");
            (Outcome::Success, stats, None)
        }
        Err(error) => {
            error!(collector = name, %error, ?duration, "collector failed, keeping its previous series");
            (Outcome::Failure, CollectStats::default(), Some(error.to_string()))
        }
    };

    CollectorReport {
        name,
        outcome,
        entities: stats.entities,
        series: stats.series,
        duration_seconds: duration.as_secs_f64(),
        error,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
