use super::{
    collector::{
        CollectFuture,
        CollectStats,
        Collector,
        Emitter,
    },
    label_names,
};
use crate::{
    entity::{
        dedup_by_id,
        schema,
        EntityKind,
        Mapper,
        UNKNOWN,
    },
    error::{
        CollectError,
        MappingError,
        RegistryError,
    },
    metrics::{
        MetricRegistry,
        NO_LABELS,
    },
    paginate::{
        record_id,
        Paginator,
    },
};

pub const ENROLLMENT_INFO: &str = "simplemdm_enrollment_info";
pub const ENROLLMENT_COUNT: &str = "simplemdm_enrollment_count";

const SCOPE: &str = "enrollments";

pub struct EnrollmentsCollector {
    paginator: Paginator,
    enrollments: Mapper,
}

impl EnrollmentsCollector {
    pub fn new(paginator: Paginator) -> Result<Self, MappingError> {
        Ok(Self {
            paginator,
            enrollments: Mapper::new(&schema::ENROLLMENT)?,
        })
    }

    #[instrument(level = "debug", skip_all, fields(collector = SCOPE))]
    async fn run(&self, registry: &MetricRegistry) -> Result<CollectStats, CollectError> {
        let mut emit = Emitter::new(registry);
        let records = dedup_by_id(
            EntityKind::Enrollment,
            self.paginator.fetch_collection("enrollments").await?,
        );

        for raw in &records {
            let enrollment = self.enrollments.map(raw, None).map_err(|e| {
                let id = record_id(raw).unwrap_or_else(|| UNKNOWN.to_string());
                CollectError::from(e).for_entity(EntityKind::Enrollment, id)
            })?;
            emit.gauge(ENROLLMENT_INFO, &self.enrollments.label_values(&enrollment), 1.0)?;
            emit.entity();
        }
        emit.gauge(ENROLLMENT_COUNT, NO_LABELS, records.len() as f64)?;

        Ok(emit.finish())
    }
}

impl Collector for EnrollmentsCollector {
    fn name(&self) -> &'static str {
        SCOPE
    }

    fn describe(&self, registry: &MetricRegistry) -> Result<(), RegistryError> {
        registry.register_gauge(
            ENROLLMENT_INFO,
            "Enrollments, value is always 1",
            &label_names(&self.enrollments, &[]),
            SCOPE,
        )?;
        registry.register_gauge(ENROLLMENT_COUNT, "Number of enrollments", NO_LABELS, SCOPE)
    }

    fn collect<'a>(&'a self, registry: &'a MetricRegistry) -> CollectFuture<'a> {
        Box::pin(self.run(registry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::mock::{
        record,
        record_with,
        MockUpstream,
    };
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn exports_enrollments_and_their_count() {
        let mock = Arc::new(MockUpstream::new());
        mock.collection(
            "enrollments",
            vec![
                record_with(
                    1,
                    json!({ "url": "https://a.simplemdm.com/e/?c=63184624", "user_enrollment": false }),
                    json!({ "device_group": { "data": { "type": "device_group", "id": 37 } } }),
                ),
                record(2, json!({ "url": null, "user_enrollment": "true" })),
            ],
        );
        let collector = EnrollmentsCollector::new(Paginator::new(mock.clone())).unwrap();
        let registry = MetricRegistry::new();
        collector.describe(&registry).unwrap();

        collector.collect(&registry).await.unwrap();
        let snapshot = registry.snapshot();

        assert_eq!(snapshot.value(ENROLLMENT_COUNT, &[]), Some(2.0));
        assert_eq!(
            snapshot.value(
                ENROLLMENT_INFO,
                &[("enrollment_id", "1"), ("device_group_id", "37"), ("user_enrollment", "false")]
            ),
            Some(1.0)
        );
        assert_eq!(
            snapshot.value(
                ENROLLMENT_INFO,
                &[("enrollment_id", "2"), ("url", "unknown"), ("user_enrollment", "true")]
            ),
            Some(1.0)
        );
    }
}
