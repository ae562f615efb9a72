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

pub const PROFILE_INFO: &str = "simplemdm_profile_info";
pub const PROFILE_DEVICE_COUNT: &str = "simplemdm_profile_device_count";
pub const PROFILE_GROUP_COUNT: &str = "simplemdm_profile_group_count";

const SCOPE: &str = "profiles";
const PROFILE_IDENTITY: [&str; 2] = ["profile_id", "name"];

/// Configuration profiles and how widely each is assigned.
pub struct ProfilesCollector {
    paginator: Paginator,
    profiles: Mapper,
}

impl ProfilesCollector {
    pub fn new(paginator: Paginator) -> Result<Self, MappingError> {
        Ok(Self {
            paginator,
            profiles: Mapper::new(&schema::PROFILE)?,
        })
    }

    #[instrument(level = "debug", skip_all, fields(collector = SCOPE))]
    async fn run(&self, registry: &MetricRegistry) -> Result<CollectStats, CollectError> {
        let mut emit = Emitter::new(registry);
        let records = dedup_by_id(EntityKind::Profile, self.paginator.fetch_collection("profiles").await?);

        for raw in &records {
            let profile = self.profiles.map(raw, None).map_err(|e| {
                let id = record_id(raw).unwrap_or_else(|| UNKNOWN.to_string());
                CollectError::from(e).for_entity(EntityKind::Profile, id)
            })?;

            let identity = [profile.id().to_string(), profile.label("name")];
            emit.gauge(PROFILE_INFO, &self.profiles.label_values(&profile), 1.0)?;
            emit.gauge_if(PROFILE_DEVICE_COUNT, &identity, profile.number("device_count"))?;
            emit.gauge_if(PROFILE_GROUP_COUNT, &identity, profile.number("group_count"))?;
            emit.entity();
        }

        Ok(emit.finish())
    }
}

impl Collector for ProfilesCollector {
    fn name(&self) -> &'static str {
        SCOPE
    }

    fn describe(&self, registry: &MetricRegistry) -> Result<(), RegistryError> {
        registry.register_gauge(
            PROFILE_INFO,
            "Configuration profiles, value is always 1",
            &label_names(&self.profiles, &[]),
            SCOPE,
        )?;
        registry.register_gauge(
            PROFILE_DEVICE_COUNT,
            "Number of devices each profile is assigned to",
            &PROFILE_IDENTITY,
            SCOPE,
        )?;
        registry.register_gauge(
            PROFILE_GROUP_COUNT,
            "Number of device groups each profile is assigned to",
            &PROFILE_IDENTITY,
            SCOPE,
        )
    }

    fn collect<'a>(&'a self, registry: &'a MetricRegistry) -> CollectFuture<'a> {
        Box::pin(self.run(registry))
    }
}
