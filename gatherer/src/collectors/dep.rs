use super::{
    collector::{
        CollectFuture,
        CollectStats,
        Collector,
        Emitter,
    },
    label_names,
    relationship_id,
};
use crate::{
    entity::{
        dedup_by_id,
        schema,
        Entity,
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
    upstream::fetch_detail,
};
use serde_json::Value;

pub const DEP_SERVER_INFO: &str = "simplemdm_dep_server_info";
pub const DEP_SERVER_TOKEN_EXPIRY: &str = "simplemdm_dep_server_token_expiry_timestamp_seconds";
pub const DEP_SERVER_LAST_SYNCED: &str = "simplemdm_dep_server_last_synced_timestamp_seconds";
pub const DEP_DEVICE_COUNT: &str = "simplemdm_dep_device_count";
pub const DEP_DEVICE_INFO: &str = "simplemdm_dep_device_info";

const SCOPE: &str = "dep";
const SERVER_IDENTITY: [&str; 2] = ["dep_server_id", "dep_server_name"];

/// DEP servers and the devices assigned to them.
///
/// A DEP device linked to an enrolled device is enriched with the `devices/{id}` detail, whose attributes take
/// precedence over the DEP record.
pub struct DepCollector {
    paginator: Paginator,
    servers: Mapper,
    devices: Mapper,
}

impl DepCollector {
    pub fn new(paginator: Paginator) -> Result<Self, MappingError> {
        Ok(Self {
            paginator,
            servers: Mapper::new(&schema::DEP_SERVER)?,
            devices: Mapper::new(&schema::DEP_DEVICE)?,
        })
    }

    #[instrument(level = "debug", skip_all, fields(collector = SCOPE))]
    async fn run(&self, registry: &MetricRegistry) -> Result<CollectStats, CollectError> {
        let mut emit = Emitter::new(registry);
        let servers = dedup_by_id(EntityKind::DepServer, self.paginator.fetch_collection("dep_servers").await?);

        for raw in &servers {
            let id = record_id(raw).unwrap_or_else(|| UNKNOWN.to_string());
            self.export_server(raw, &mut emit)
                .await
                .map_err(|e| e.for_entity(EntityKind::DepServer, id))?;
        }

        Ok(emit.finish())
    }

    /// All DEP devices of the server are fetched and mapped before its series are upserted.
    async fn export_server(&self, raw: &Value, emit: &mut Emitter<'_>) -> Result<(), CollectError> {
        let server = self.servers.map(raw, None)?;
        let path = format!("dep_servers/{}/dep_devices", server.id());
        let records = dedup_by_id(EntityKind::DepDevice, self.paginator.fetch_collection(&path).await?);

        let mut devices = Vec::with_capacity(records.len());
        for raw in &records {
            let id = record_id(raw).unwrap_or_else(|| UNKNOWN.to_string());
            let device = self
                .map_dep_device(raw)
                .await
                .map_err(|e| e.for_entity(EntityKind::DepDevice, id))?;
            devices.push(device);
        }

        let identity = [server.id().to_string(), server.label("dep_server_name")];
        emit.gauge(DEP_SERVER_INFO, &self.servers.label_values(&server), 1.0)?;
        emit.gauge_if(DEP_SERVER_TOKEN_EXPIRY, &identity, server.number("token_expires_at"))?;
        emit.gauge_if(DEP_SERVER_LAST_SYNCED, &identity, server.number("last_synced_at"))?;
        emit.gauge(DEP_DEVICE_COUNT, &identity, devices.len() as f64)?;
        emit.entity();

        for device in &devices {
            let mut labels = self.devices.label_values(device);
            labels.extend(identity.iter().cloned());
            emit.gauge(DEP_DEVICE_INFO, &labels, 1.0)?;
            emit.entity();
        }

        debug!(server = server.id(), devices = devices.len(), "collected dep server");
        Ok(())
    }

    async fn map_dep_device(&self, raw: &Value) -> Result<Entity, CollectError> {
        let detail = match relationship_id(raw, "device") {
            Some(device_id) => Some(fetch_detail(self.paginator.upstream(), &format!("devices/{device_id}")).await?),
            None => None,
        };
        Ok(self.devices.map(raw, detail.as_ref())?)
    }
}

impl Collector for DepCollector {
    fn name(&self) -> &'static str {
        SCOPE
    }

    fn describe(&self, registry: &MetricRegistry) -> Result<(), RegistryError> {
        registry.register_gauge(
            DEP_SERVER_INFO,
            "DEP servers, value is always 1",
            &label_names(&self.servers, &[]),
            SCOPE,
        )?;
        registry.register_gauge(
            DEP_SERVER_TOKEN_EXPIRY,
            "Expiry time of each DEP server token",
            &SERVER_IDENTITY,
            SCOPE,
        )?;
        registry.register_gauge(
            DEP_SERVER_LAST_SYNCED,
            "Time each DEP server last synced with Apple",
            &SERVER_IDENTITY,
            SCOPE,
        )?;
        registry.register_gauge(DEP_DEVICE_COUNT, "Number of DEP devices per server", &SERVER_IDENTITY, SCOPE)?;
        registry.register_gauge(
            DEP_DEVICE_INFO,
            "DEP devices with the detail of the enrolled device, value is always 1",
            &label_names(&self.devices, &SERVER_IDENTITY),
            SCOPE,
        )
    }

    fn collect<'a>(&'a self, registry: &'a MetricRegistry) -> CollectFuture<'a> {
        Box::pin(self.run(registry))
    }
}
