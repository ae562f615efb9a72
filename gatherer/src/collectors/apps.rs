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
    metrics::MetricRegistry,
    paginate::{
        record_id,
        Paginator,
    },
};

pub const APP_INFO: &str = "simplemdm_app_info";

const SCOPE: &str = "apps";

/// The app catalog (`apps`).
pub struct AppsCollector {
    paginator: Paginator,
    apps: Mapper,
}

impl AppsCollector {
    pub fn new(paginator: Paginator) -> Result<Self, MappingError> {
        Ok(Self {
            paginator,
            apps: Mapper::new(&schema::APP)?,
        })
    }

    #[instrument(level = "debug", skip_all, fields(collector = SCOPE))]
    async fn run(&self, registry: &MetricRegistry) -> Result<CollectStats, CollectError> {
        let mut emit = Emitter::new(registry);
        let records = dedup_by_id(EntityKind::App, self.paginator.fetch_collection("apps").await?);

        for raw in &records {
            let app = self.apps.map(raw, None).map_err(|e| {
                let id = record_id(raw).unwrap_or_else(|| UNKNOWN.to_string());
                CollectError::from(e).for_entity(EntityKind::App, id)
            })?;
            emit.gauge(APP_INFO, &self.apps.label_values(&app), 1.0)?;
            emit.entity();
        }

        Ok(emit.finish())
    }
}

impl Collector for AppsCollector {
    fn name(&self) -> &'static str {
        SCOPE
    }

    fn describe(&self, registry: &MetricRegistry) -> Result<(), RegistryError> {
        registry.register_gauge(
            APP_INFO,
            "Apps in the catalog, value is always 1",
            &label_names(&self.apps, &[]),
            SCOPE,
        )
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
        MockUpstream,
    };
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn exports_one_info_series_per_app() {
        let mock = Arc::new(MockUpstream::new());
        mock.collection(
            "apps",
            vec![
                record(
                    1,
                    json!({ "name": "Slack", "bundle_identifier": "com.tinyspeck.slackmacgap", "app_type": "app store" }),
                ),
                record(2, json!({ "name": "Zoom", "version": null })),
            ],
        );
        let collector = AppsCollector::new(Paginator::new(mock.clone())).unwrap();
        let registry = MetricRegistry::new();
        collector.describe(&registry).unwrap();

        let stats = collector.collect(&registry).await.unwrap();

        assert_eq!(stats, CollectStats { entities: 2, series: 2 });
        let series = registry.snapshot().series(APP_INFO);
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].labels["bundle_identifier"], "com.tinyspeck.slackmacgap");
        assert_eq!(series[1].labels["version"], "unknown");
    }
}
