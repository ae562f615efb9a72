//! # Metric Registry
//!
//! Owns every series the exporter serves. Gauges hold the last value set per label tuple, counters only ever grow.
//!
//! ## Cycles and reconciliation
//!
//! The scheduler brackets each collection pass with [`MetricRegistry::begin_cycle`] and
//! [`MetricRegistry::end_cycle`]. Every family belongs to a scope (the collector that fills it). When a scope is
//! marked complete during the cycle, `end_cycle` removes every gauge series of that scope that was not upserted again
//! in the cycle. Families of scopes that failed keep all their series until a later cycle of that scope succeeds.
//! Counter families are never retired.

mod snapshot;

use crate::error::RegistryError;
use parking_lot::Mutex;
use prometheus::{
    CounterVec,
    GaugeVec,
    Opts,
    Registry,
};
use serde::Serialize;
pub use snapshot::{
    Series,
    Snapshot,
    CONTENT_TYPE,
};
use std::collections::{
    HashMap,
    HashSet,
};
use strum::{
    Display,
    IntoStaticStr,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr, Serialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MetricKind {
    Gauge,
    Counter,
}

enum Handle {
    Gauge(GaugeVec),
    Counter(CounterVec),
}

impl Handle {
    fn kind(&self) -> MetricKind {
        match self {
            Handle::Gauge(_) => MetricKind::Gauge,
            Handle::Counter(_) => MetricKind::Counter,
        }
    }
}

/// Label values of a family declared without labels.
pub const NO_LABELS: &[&str] = &[];

type LabelTuple = Vec<String>;

struct Family {
    scope: String,
    label_count: usize,
    handle: Handle,
    /// Series currently exported.
    live: HashSet<LabelTuple>,
    /// Series upserted since the current cycle began.
    renewed: HashSet<LabelTuple>,
}

#[derive(Default)]
struct State {
    families: HashMap<String, Family>,
    in_cycle: bool,
    completed_scopes: HashSet<String>,
}

/// Outcome of [`MetricRegistry::end_cycle`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    /// Gauge series removed because they were not renewed.
    pub retired: usize,
    /// Gauge families whose scope completed and were reconciled.
    pub reconciled_families: usize,
    /// Gauge families whose scope did not complete and kept all their series.
    pub retained_families: usize,
}

/// Process-wide store of metric families. Cheap to share behind an `Arc`, safe for concurrent collectors.
pub struct MetricRegistry {
    registry: Registry,
    state: Mutex<State>,
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            state: Mutex::new(State::default()),
        }
    }

    pub fn register_gauge(&self, name: &str, help: &str, labels: &[&str], scope: &str) -> Result<(), RegistryError> {
        self.register(name, labels, scope, || {
            Ok(Handle::Gauge(GaugeVec::new(Opts::new(name, help), labels)?))
        })
    }

    pub fn register_counter(&self, name: &str, help: &str, labels: &[&str], scope: &str) -> Result<(), RegistryError> {
        self.register(name, labels, scope, || {
            Ok(Handle::Counter(CounterVec::new(Opts::new(name, help), labels)?))
        })
    }

    fn register(
        &self,
        name: &str,
        labels: &[&str],
        scope: &str,
        build: impl FnOnce() -> Result<Handle, prometheus::Error>,
    ) -> Result<(), RegistryError> {
        let mut state = self.state.lock();
        if state.families.contains_key(name) {
            return Err(RegistryError::DuplicateFamily(name.to_string()));
        }

        let handle = build()?;
        match &handle {
            Handle::Gauge(vec) => self.registry.register(Box::new(vec.clone()))?,
            Handle::Counter(vec) => self.registry.register(Box::new(vec.clone()))?,
        }

        debug!(family = name, kind = %handle.kind(), scope, "registered metric family");
        state.families.insert(
            name.to_string(),
            Family {
                scope: scope.to_string(),
                label_count: labels.len(),
                handle,
                live: HashSet::new(),
                renewed: HashSet::new(),
            },
        );
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.state.lock().families.contains_key(name)
    }

    /// Set a gauge series, creating it if needed.
    pub fn upsert(&self, family: &str, labels: &[impl AsRef<str>], value: f64) -> Result<(), RegistryError> {
        let mut state = self.state.lock();
        let in_cycle = state.in_cycle;
        let entry = lookup(&mut state, family, labels.len())?;
        let Handle::Gauge(vec) = &entry.handle else {
            return Err(kind_mismatch(family, MetricKind::Gauge, entry.handle.kind()));
        };

        let refs: Vec<&str> = labels.iter().map(AsRef::as_ref).collect();
        vec.get_metric_with_label_values(&refs)?.set(value);

        let tuple: LabelTuple = refs.iter().map(|label| label.to_string()).collect();
        if !entry.renewed.insert(tuple.clone()) && in_cycle {
            trace!(family, labels = ?tuple, "series upserted more than once in this cycle");
        }
        entry.live.insert(tuple);
        Ok(())
    }

    /// Add one to a counter series.
    pub fn increment(&self, family: &str, labels: &[impl AsRef<str>]) -> Result<(), RegistryError> {
        self.increment_by(family, labels, 1.0)
    }

    pub fn increment_by(&self, family: &str, labels: &[impl AsRef<str>], amount: f64) -> Result<(), RegistryError> {
        if !(amount >= 0.0 && amount.is_finite()) {
            return Err(RegistryError::InvalidIncrement {
                family: family.to_string(),
                amount,
            });
        }

        let mut state = self.state.lock();
        let entry = lookup(&mut state, family, labels.len())?;
        let Handle::Counter(vec) = &entry.handle else {
            return Err(kind_mismatch(family, MetricKind::Counter, entry.handle.kind()));
        };

        let refs: Vec<&str> = labels.iter().map(AsRef::as_ref).collect();
        vec.get_metric_with_label_values(&refs)?.inc_by(amount);
        Ok(())
    }

    /// Open a collection cycle. Cycles never overlap.
    pub fn begin_cycle(&self) -> Result<(), RegistryError> {
        let mut state = self.state.lock();
        if state.in_cycle {
            return Err(RegistryError::CycleInProgress);
        }
        state.in_cycle = true;
        state.completed_scopes.clear();
        for family in state.families.values_mut() {
            family.renewed.clear();
        }
        Ok(())
    }

    /// Record that the collector owning `scope` ran to completion in the current cycle.
    pub fn complete_scope(&self, scope: &str) -> Result<(), RegistryError> {
        let mut state = self.state.lock();
        if !state.in_cycle {
            return Err(RegistryError::NoCycle);
        }
        state.completed_scopes.insert(scope.to_string());
        Ok(())
    }

    /// Close the current cycle and retire the unrenewed gauge series of every completed scope.
    pub fn end_cycle(&self) -> Result<Reconciliation, RegistryError> {
        let mut state = self.state.lock();
        if !state.in_cycle {
            return Err(RegistryError::NoCycle);
        }

        let State {
            families,
            completed_scopes,
            ..
        } = &mut *state;

        let mut outcome = Reconciliation::default();
        for (name, family) in families.iter_mut() {
            let Handle::Gauge(vec) = &family.handle else {
                continue;
            };

            if !completed_scopes.contains(&family.scope) {
                outcome.retained_families += 1;
                continue;
            }

            let stale: Vec<LabelTuple> = family.live.difference(&family.renewed).cloned().collect();
            for tuple in &stale {
                let refs: Vec<&str> = tuple.iter().map(String::as_str).collect();
                if let Err(error) = vec.remove_label_values(&refs) {
                    debug!(family = %name, labels = ?tuple, %error, "stale series already gone");
                }
            }
            if !stale.is_empty() {
                debug!(family = %name, retired = stale.len(), "retired stale series");
            }

            outcome.retired += stale.len();
            outcome.reconciled_families += 1;
            family.live = std::mem::take(&mut family.renewed);
        }

        state.in_cycle = false;
        Ok(outcome)
    }

    /// Close the current cycle without reconciling anything.
    pub fn abandon_cycle(&self) {
        let mut state = self.state.lock();
        state.in_cycle = false;
        state.completed_scopes.clear();
    }

    pub fn in_cycle(&self) -> bool {
        self.state.lock().in_cycle
    }

    /// A consistent view of all series. Taken under the registry lock, so no half-written series is ever observed.
    pub fn snapshot(&self) -> Snapshot {
        let _state = self.state.lock();
        Snapshot::new(self.registry.gather())
    }
}

fn lookup<'a>(state: &'a mut State, family: &str, label_count: usize) -> Result<&'a mut Family, RegistryError> {
    let entry = state
        .families
        .get_mut(family)
        .ok_or_else(|| RegistryError::UnknownFamily(family.to_string()))?;
    if entry.label_count != label_count {
        return Err(RegistryError::LabelArity {
            family: family.to_string(),
            expected: entry.label_count,
            actual: label_count,
        });
    }
    Ok(entry)
}

fn kind_mismatch(family: &str, expected: MetricKind, actual: MetricKind) -> RegistryError {
    RegistryError::KindMismatch {
        family: family.to_string(),
        expected: expected.into(),
        actual: actual.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const GAUGE: &str = "simplemdm_test_gauge";
    const COUNTER: &str = "simplemdm_test_total";

    fn registry() -> MetricRegistry {
        let registry = MetricRegistry::new();
        registry
            .register_gauge(GAUGE, "test gauge", &["entity"], "devices")
            .unwrap();
        registry
            .register_counter(COUNTER, "test counter", &["entity"], "devices")
            .unwrap();
        registry
    }

    fn cycle(registry: &MetricRegistry, values: &[(&str, f64)], complete: bool) -> Reconciliation {
        registry.begin_cycle().unwrap();
        for (entity, value) in values {
            registry.upsert(GAUGE, &[entity], *value).unwrap();
        }
        if complete {
            registry.complete_scope("devices").unwrap();
        }
        registry.end_cycle().unwrap()
    }

    fn gauge(registry: &MetricRegistry, entity: &str) -> Option<f64> {
        registry.snapshot().value(GAUGE, &[("entity", entity)])
    }

    #[test]
    fn unrenewed_gauge_series_are_retired() {
        let registry = registry();
        cycle(&registry, &[("a", 1.0), ("b", 1.0), ("c", 1.0)], true);
        assert_eq!(registry.snapshot().series(GAUGE).len(), 3);

        let outcome = cycle(&registry, &[("a", 2.0), ("b", 3.0)], true);

        assert_eq!(outcome.retired, 1);
        assert_eq!(gauge(&registry, "a"), Some(2.0));
        assert_eq!(gauge(&registry, "b"), Some(3.0));
        assert_eq!(gauge(&registry, "c"), None);
        assert_eq!(registry.snapshot().series(GAUGE).len(), 2);
    }

    #[test]
    fn failed_scope_keeps_its_series() {
        let registry = registry();
        cycle(&registry, &[("a", 1.0), ("b", 1.0), ("c", 1.0)], true);

        let outcome = cycle(&registry, &[("a", 5.0), ("d", 1.0)], false);
        assert_eq!(outcome.retired, 0);
        assert_eq!(outcome.retained_families, 1);
        assert_eq!(gauge(&registry, "a"), Some(5.0));
        assert_eq!(gauge(&registry, "c"), Some(1.0));
        assert_eq!(gauge(&registry, "d"), Some(1.0));

        let outcome = cycle(&registry, &[("a", 6.0)], true);
        assert_eq!(outcome.retired, 3);
        assert_eq!(registry.snapshot().series(GAUGE).len(), 1);
    }

    #[test]
    fn reappearing_series_is_exported_again() {
        let registry = registry();
        cycle(&registry, &[("a", 1.0), ("b", 1.0)], true);
        cycle(&registry, &[("a", 1.0)], true);
        assert_eq!(gauge(&registry, "b"), None);

        cycle(&registry, &[("a", 1.0), ("b", 7.0)], true);
        assert_eq!(gauge(&registry, "b"), Some(7.0));
    }

    #[test]
    fn counters_are_monotonic_and_never_retired() {
        let registry = registry();
        let counter = |entity: &str| registry.snapshot().value(COUNTER, &[("entity", entity)]);

        registry.begin_cycle().unwrap();
        registry.increment(COUNTER, &["x"]).unwrap();
        registry.increment(COUNTER, &["x"]).unwrap();
        registry.complete_scope("devices").unwrap();
        registry.end_cycle().unwrap();
        assert_eq!(counter("x"), Some(2.0));

        registry.begin_cycle().unwrap();
        registry.increment(COUNTER, &["y"]).unwrap();
        registry.complete_scope("devices").unwrap();
        registry.end_cycle().unwrap();

        assert_eq!(counter("x"), Some(2.0));
        assert_eq!(counter("y"), Some(1.0));

        registry.begin_cycle().unwrap();
        registry.increment_by(COUNTER, &["x"], 3.0).unwrap();
        registry.complete_scope("devices").unwrap();
        registry.end_cycle().unwrap();
        assert_eq!(counter("x"), Some(5.0));
    }

    #[test]
    fn negative_increment_is_rejected() {
        let registry = registry();
        assert!(matches!(
            registry.increment_by(COUNTER, &["x"], -1.0),
            Err(RegistryError::InvalidIncrement { .. })
        ));
        assert!(matches!(
            registry.increment_by(COUNTER, &["x"], f64::NAN),
            Err(RegistryError::InvalidIncrement { .. })
        ));
    }

    #[test]
    fn upsert_twice_in_a_cycle_keeps_one_series() {
        let registry = registry();
        cycle(&registry, &[("a", 1.0), ("a", 4.0)], true);

        let series = registry.snapshot().series(GAUGE);
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].value, 4.0);
    }

    #[test]
    fn cycles_do_not_overlap() {
        let registry = registry();
        assert!(matches!(registry.end_cycle(), Err(RegistryError::NoCycle)));
        assert!(matches!(registry.complete_scope("devices"), Err(RegistryError::NoCycle)));

        registry.begin_cycle().unwrap();
        assert!(registry.in_cycle());
        assert!(matches!(registry.begin_cycle(), Err(RegistryError::CycleInProgress)));

        registry.abandon_cycle();
        assert!(!registry.in_cycle());
        registry.begin_cycle().unwrap();
    }

    #[test]
    fn abandoned_cycle_retires_nothing() {
        let registry = registry();
        cycle(&registry, &[("a", 1.0), ("b", 1.0)], true);

        registry.begin_cycle().unwrap();
        registry.upsert(GAUGE, &["a"], 2.0).unwrap();
        registry.complete_scope("devices").unwrap();
        registry.abandon_cycle();

        assert_eq!(gauge(&registry, "b"), Some(1.0));
    }

    #[test]
    fn misuse_is_reported() {
        let registry = registry();

        assert!(matches!(
            registry.upsert("simplemdm_missing", &["a"], 1.0),
            Err(RegistryError::UnknownFamily(_))
        ));
        assert!(matches!(
            registry.upsert(GAUGE, &["a", "b"], 1.0),
            Err(RegistryError::LabelArity {
                expected: 1,
                actual: 2,
                ..
            })
        ));
        assert!(matches!(
            registry.upsert(COUNTER, &["a"], 1.0),
            Err(RegistryError::KindMismatch { .. })
        ));
        assert!(matches!(
            registry.increment(GAUGE, &["a"]),
            Err(RegistryError::KindMismatch { .. })
        ));
        assert!(matches!(
            registry.register_gauge(GAUGE, "again", &["entity"], "devices"),
            Err(RegistryError::DuplicateFamily(_))
        ));
        assert!(matches!(
            registry.register_gauge("not a name", "bad", &[], "devices"),
            Err(RegistryError::Prometheus(_))
        ));
    }

    #[test]
    fn concurrent_upserts_are_all_visible() {
        let registry = registry();
        registry.begin_cycle().unwrap();

        std::thread::scope(|scope| {
            for worker in 0..4 {
                let registry = &registry;
                scope.spawn(move || {
                    for n in 0..50 {
                        registry
                            .upsert(GAUGE, &[format!("{worker}-{n}")], n as f64)
                            .unwrap();
                    }
                });
            }
        });

        registry.complete_scope("devices").unwrap();
        let outcome = registry.end_cycle().unwrap();
        assert_eq!(outcome.retired, 0);
        assert_eq!(registry.snapshot().series(GAUGE).len(), 200);
    }
}
