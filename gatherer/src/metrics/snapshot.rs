use crate::error::RegistryError;
use prometheus::{
    proto::{
        Metric,
        MetricFamily,
        MetricType,
    },
    Encoder,
    TextEncoder,
};
use serde::Serialize;
use std::collections::BTreeMap;

/// Content type of [`Snapshot::encode`].
pub const CONTENT_TYPE: &str = prometheus::TEXT_FORMAT;

/// One exported series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub labels: BTreeMap<String, String>,
    pub value: f64,
}

/// Point-in-time copy of every non-empty metric family.
#[derive(Debug, Clone)]
pub struct Snapshot {
    families: Vec<MetricFamily>,
}

impl Snapshot {
    pub(super) fn new(families: Vec<MetricFamily>) -> Self {
        Self { families }
    }

    pub fn families(&self) -> &[MetricFamily] {
        &self.families
    }

    pub fn family_names(&self) -> Vec<&str> {
        self.families.iter().map(MetricFamily::get_name).collect()
    }

    /// Total number of series across all families.
    pub fn len(&self) -> usize {
        self.families.iter().map(|family| family.get_metric().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn series(&self, family: &str) -> Vec<Series> {
        let Some(family) = self.family(family) else {
            return Vec::new();
        };
        family
            .get_metric()
            .iter()
            .map(|metric| Series {
                labels: metric
                    .get_label()
                    .iter()
                    .map(|pair| (pair.get_name().to_string(), pair.get_value().to_string()))
                    .collect(),
                value: value_of(family.get_field_type(), metric),
            })
            .collect()
    }

    /// Value of the first series of `family` whose labels include every pair in `labels`.
    pub fn value(&self, family: &str, labels: &[(&str, &str)]) -> Option<f64> {
        let family = self.family(family)?;
        family
            .get_metric()
            .iter()
            .find(|metric| {
                labels.iter().all(|(name, value)| {
                    metric
                        .get_label()
                        .iter()
                        .any(|pair| pair.get_name() == *name && pair.get_value() == *value)
                })
            })
            .map(|metric| value_of(family.get_field_type(), metric))
    }

    /// Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, RegistryError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| RegistryError::Encode(e.to_string()))
    }

    fn family(&self, name: &str) -> Option<&MetricFamily> {
        self.families.iter().find(|family| family.get_name() == name)
    }
}

fn value_of(kind: MetricType, metric: &Metric) -> f64 {
    match kind {
        MetricType::COUNTER => metric.get_counter().get_value(),
        MetricType::GAUGE => metric.get_gauge().get_value(),
        _ => metric.get_untyped().get_value(),
    }
}
