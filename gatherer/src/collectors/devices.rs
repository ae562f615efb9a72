use super::{
    collector::{
        CollectFuture,
        CollectStats,
        Collector,
        Emitter,
    },
    device_identity,
    label_names,
    DEVICE_IDENTITY,
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
};
use serde_json::Value;
use std::collections::BTreeMap;

pub const DEVICE_INFO: &str = "simplemdm_device_info";
pub const DEVICE_BATTERY: &str = "simplemdm_device_battery";
pub const LATITUDE: &str = "simplemdm_latitude";
pub const LONGITUDE: &str = "simplemdm_longitude";
pub const LAST_SEEN: &str = "simplemdm_device_last_seen_timestamp_seconds";
pub const ENROLLED: &str = "simplemdm_device_enrolled_timestamp_seconds";
pub const CUSTOM_ATTRIBUTES: &str = "simplemdm_custom_attributes";
pub const INSTALLED_APP_COUNT: &str = "simplemdm_device_installed_app_count";
pub const APP_INSTALL_COUNT: &str = "simplemdm_app_install_count";
pub const GROUP_DEVICE_COUNT: &str = "simplemdm_device_group_device_count";

const SCOPE: &str = "devices";

/// Custom attribute values beyond this many slots are dropped.
pub const CUSTOM_ATTRIBUTE_SLOTS: usize = 10;
const CUSTOM_ATTRIBUTE_LABELS: [&str; CUSTOM_ATTRIBUTE_SLOTS] = [
    "custom_attr_0",
    "custom_attr_1",
    "custom_attr_2",
    "custom_attr_3",
    "custom_attr_4",
    "custom_attr_5",
    "custom_attr_6",
    "custom_attr_7",
    "custom_attr_8",
    "custom_attr_9",
];

/// Devices, with their device group, custom attribute values and installed apps.
///
/// Requests per cycle: `device_groups`, `devices`, then `devices/{id}/installed_apps` for every device.
pub struct DevicesCollector {
    paginator: Paginator,
    devices: Mapper,
    groups: Mapper,
    installed_apps: Mapper,
}

/// What one device contributes to the aggregates.
struct DeviceTally {
    group_id: Option<String>,
    apps: Vec<(String, String)>,
}

impl DevicesCollector {
    pub fn new(paginator: Paginator) -> Result<Self, MappingError> {
        Ok(Self {
            paginator,
            devices: Mapper::new(&schema::DEVICE)?,
            groups: Mapper::new(&schema::DEVICE_GROUP)?,
            installed_apps: Mapper::new(&schema::INSTALLED_APP)?,
        })
    }

    #[instrument(level = "debug", skip_all, fields(collector = SCOPE))]
    async fn run(&self, registry: &MetricRegistry) -> Result<CollectStats, CollectError> {
        let mut emit = Emitter::new(registry);

        let groups = self.fetch_groups().await?;
        let mut group_counts: BTreeMap<String, (String, u32)> = groups
            .iter()
            .map(|(id, name)| (id.clone(), (name.clone(), 0)))
            .collect();
        let mut install_counts: BTreeMap<(String, String), u32> = BTreeMap::new();

        let records = dedup_by_id(EntityKind::Device, self.paginator.fetch_collection("devices").await?);
        for raw in &records {
            let id = record_id(raw).unwrap_or_else(|| UNKNOWN.to_string());
            let tally = self
                .export_device(raw, &groups, &mut emit)
                .await
                .map_err(|e| e.for_entity(EntityKind::Device, id))?;

            if let Some(group_id) = tally.group_id {
                group_counts
                    .entry(group_id)
                    .or_insert_with(|| (UNKNOWN.to_string(), 0))
                    .1 += 1;
            }
            for app in tally.apps {
                *install_counts.entry(app).or_default() += 1;
            }
        }

        for (group_id, (group_name, count)) in &group_counts {
            emit.gauge(GROUP_DEVICE_COUNT, &[group_id, group_name], f64::from(*count))?;
        }
        for ((identifier, name), count) in &install_counts {
            emit.gauge(APP_INSTALL_COUNT, &[identifier, name], f64::from(*count))?;
        }

        debug!(
            devices = records.len(),
            groups = group_counts.len(),
            apps = install_counts.len(),
            "collected devices"
        );
        Ok(emit.finish())
    }

    /// Device group id to name.
    async fn fetch_groups(&self) -> Result<BTreeMap<String, String>, CollectError> {
        let records = dedup_by_id(
            EntityKind::DeviceGroup,
            self.paginator.fetch_collection("device_groups").await?,
        );

        let mut groups = BTreeMap::new();
        for raw in &records {
            let group = self.groups.map(raw, None)?;
            groups.insert(group.id().to_string(), group.label("device_group_name"));
        }
        Ok(groups)
    }

    /// Export every family of one device. The installed apps are fetched before anything is upserted, so a device
    /// whose sub-collection fails leaves no series behind.
    async fn export_device(
        &self,
        raw: &Value,
        groups: &BTreeMap<String, String>,
        emit: &mut Emitter<'_>,
    ) -> Result<DeviceTally, CollectError> {
        let device = self.devices.map(raw, None)?;
        let apps = self.fetch_installed_apps(&device).await?;

        let group_id = device
            .is_known("device_group_id")
            .then(|| device.label("device_group_id"));
        let group_name = group_id
            .as_ref()
            .and_then(|id| groups.get(id))
            .cloned()
            .unwrap_or_else(|| UNKNOWN.to_string());

        let mut info = self.devices.label_values(&device);
        info.push(group_name);
        emit.gauge(DEVICE_INFO, &info, 1.0)?;

        let identity = device_identity(&device);
        emit.gauge_if(DEVICE_BATTERY, &identity, device.number("battery_level"))?;
        emit.gauge_if(LATITUDE, &identity, device.number("location_latitude"))?;
        emit.gauge_if(LONGITUDE, &identity, device.number("location_longitude"))?;
        emit.gauge_if(LAST_SEEN, &[device.id()], device.number("last_seen_at"))?;
        emit.gauge_if(ENROLLED, &[device.id()], device.number("enrolled_at"))?;
        emit.gauge(INSTALLED_APP_COUNT, &identity, apps.len() as f64)?;

        let mut custom = identity.to_vec();
        custom.extend(custom_attribute_slots(&device, raw));
        emit.gauge(CUSTOM_ATTRIBUTES, &custom, 1.0)?;

        emit.entity();
        Ok(DeviceTally {
            group_id,
            apps: apps
                .iter()
                .map(|app| (app.label("identifier"), app.label("name")))
                .collect(),
        })
    }

    async fn fetch_installed_apps(&self, device: &Entity) -> Result<Vec<Entity>, CollectError> {
        let path = format!("devices/{}/installed_apps", device.id());
        let records = dedup_by_id(EntityKind::InstalledApp, self.paginator.fetch_collection(&path).await?);

        records
            .iter()
            .map(|raw| {
                self.installed_apps.map(raw, None).map_err(|e| {
                    let id = record_id(raw).unwrap_or_else(|| UNKNOWN.to_string());
                    CollectError::from(e).for_entity(EntityKind::InstalledApp, id)
                })
            })
            .collect()
    }
}

/// Values of `relationships.custom_attribute_values`, padded with `unknown` to the fixed slot count.
fn custom_attribute_slots(device: &Entity, raw: &Value) -> Vec<String> {
    let mut values: Vec<String> = raw
        .pointer("/relationships/custom_attribute_values/data")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .map(|entry| match entry.pointer("/attributes/value") {
                    Some(Value::String(value)) => value.clone(),
                    None | Some(Value::Null) => UNKNOWN.to_string(),
                    Some(other) => other.to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    if values.len() > CUSTOM_ATTRIBUTE_SLOTS {
        debug!(
            id = device.id(),
            dropped = values.len() - CUSTOM_ATTRIBUTE_SLOTS,
            "too many custom attribute values"
        );
    }
    values.resize(CUSTOM_ATTRIBUTE_SLOTS, UNKNOWN.to_string());
    values
}

impl Collector for DevicesCollector {
    fn name(&self) -> &'static str {
        SCOPE
    }

    fn describe(&self, registry: &MetricRegistry) -> Result<(), RegistryError> {
        registry.register_gauge(
            DEVICE_INFO,
            "Device attributes and relationships, value is always 1",
            &label_names(&self.devices, &["device_group_name"]),
            SCOPE,
        )?;
        registry.register_gauge(DEVICE_BATTERY, "Battery level of each device in percent", &DEVICE_IDENTITY, SCOPE)?;
        registry.register_gauge(LATITUDE, "Latitude of each device", &DEVICE_IDENTITY, SCOPE)?;
        registry.register_gauge(LONGITUDE, "Longitude of each device", &DEVICE_IDENTITY, SCOPE)?;
        registry.register_gauge(LAST_SEEN, "Time the device was last seen", &["device_id"], SCOPE)?;
        registry.register_gauge(ENROLLED, "Time the device was enrolled", &["device_id"], SCOPE)?;

        let custom: Vec<&str> = DEVICE_IDENTITY.iter().chain(&CUSTOM_ATTRIBUTE_LABELS).copied().collect();
        registry.register_gauge(CUSTOM_ATTRIBUTES, "Custom attribute values of each device", &custom, SCOPE)?;

        registry.register_gauge(
            INSTALLED_APP_COUNT,
            "Number of apps installed on each device",
            &DEVICE_IDENTITY,
            SCOPE,
        )?;
        registry.register_gauge(
            APP_INSTALL_COUNT,
            "Number of devices each app is installed on",
            &["identifier", "name"],
            SCOPE,
        )?;
        registry.register_gauge(
            GROUP_DEVICE_COUNT,
            "Number of devices in each device group",
            &["device_group_id", "device_group_name"],
            SCOPE,
        )
    }

    fn collect<'a>(&'a self, registry: &'a MetricRegistry) -> CollectFuture<'a> {
        Box::pin(self.run(registry))
    }
}
