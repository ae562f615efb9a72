use crate::{
    error::{
        CollectError,
        RegistryError,
    },
    metrics::MetricRegistry,
};
use serde::Serialize;
use std::{
    future::Future,
    pin::Pin,
};

pub type CollectFuture<'a> = Pin<Box<dyn Future<Output = Result<CollectStats, CollectError>> + Send + 'a>>;

/// One resource type of the SimpleMDM API turned into metric families
pub trait Collector: Send + Sync {
    /// Name of this collector, also the reconciliation scope of every family it declares
    fn name(&self) -> &'static str;

    /// Register the metric families this collector fills
    fn describe(&self, registry: &MetricRegistry) -> Result<(), RegistryError>;

    /// Fetch the resource, map it and upsert the registry for the current cycle
    fn collect<'a>(&'a self, registry: &'a MetricRegistry) -> CollectFuture<'a>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CollectStats {
    /// Entities mapped and exported
    pub entities: usize,
    /// Series upserted
    pub series: usize,
}

/// Upserts gauges on behalf of one collector run and keeps count.
pub(crate) struct Emitter<'a> {
    registry: &'a MetricRegistry,
    stats: CollectStats,
}

impl<'a> Emitter<'a> {
    pub(crate) fn new(registry: &'a MetricRegistry) -> Self {
        Self {
            registry,
            stats: CollectStats::default(),
        }
    }

    pub(crate) fn gauge(&mut self, family: &str, labels: &[impl AsRef<str>], value: f64) -> Result<(), CollectError> {
        self.registry.upsert(family, labels, value)?;
        self.stats.series += 1;
        Ok(())
    }

    /// Upsert only when the value is known.
    pub(crate) fn gauge_if(
        &mut self,
        family: &str,
        labels: &[impl AsRef<str>],
        value: Option<f64>,
    ) -> Result<(), CollectError> {
        match value {
            Some(value) => self.gauge(family, labels, value),
            None => Ok(()),
        }
    }

    pub(crate) fn entity(&mut self) {
        self.stats.entities += 1;
    }

    pub(crate) fn finish(self) -> CollectStats {
        self.stats
    }
}
