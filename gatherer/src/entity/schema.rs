//! Static per-resource schemas.
//!
//! Each schema is an ordered list of fields. Labelled fields become Prometheus labels in schema order, the others
//! are only available as values (battery level, counts). Nested objects are either flattened through a dotted path
//! (`firewall.enabled`) or folded into one composite `key=value` label (`os_update`). The composite encoding is
//! lossy: it cannot be parsed back and its label value changes whenever any nested key does.

use super::EntityKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Dotted path below the record's `attributes`.
    Attribute(&'static str),
    /// `relationships.<name>.data.id`
    Relationship(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Any scalar, rendered as-is.
    Text,
    /// A boolean, also accepted as `"true"` / `"false"`.
    Flag,
    /// A number, also accepted as a numeric string.
    Number,
    /// A `"NN%"` string.
    Percentage,
    /// An ISO-8601 / RFC 3339 timestamp.
    Timestamp,
    /// A flat object folded into `key=value` pairs joined by `,`.
    Composite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub source: Source,
    pub kind: FieldKind,
    pub label: bool,
}

impl FieldSpec {
    pub const fn attribute(name: &'static str, path: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            source: Source::Attribute(path),
            kind,
            label: true,
        }
    }

    pub const fn relationship(name: &'static str, relationship: &'static str) -> Self {
        Self {
            name,
            source: Source::Relationship(relationship),
            kind: FieldKind::Text,
            label: true,
        }
    }

    /// Keep the field as a value only.
    pub const fn hidden(self) -> Self {
        Self { label: false, ..self }
    }
}

#[derive(Debug)]
pub struct Schema {
    pub kind: EntityKind,
    /// Label carrying the entity id, if the entity is labelled by id at all.
    pub id_label: Option<&'static str>,
    pub fields: &'static [FieldSpec],
}

const fn text(name: &'static str) -> FieldSpec {
    FieldSpec::attribute(name, name, FieldKind::Text)
}

const fn flag(name: &'static str) -> FieldSpec {
    FieldSpec::attribute(name, name, FieldKind::Flag)
}

const fn number(name: &'static str) -> FieldSpec {
    FieldSpec::attribute(name, name, FieldKind::Number)
}

const fn timestamp(name: &'static str) -> FieldSpec {
    FieldSpec::attribute(name, name, FieldKind::Timestamp)
}

// Secret attributes (FileVault recovery key, firmware and recovery lock passwords) are never exported.
pub static DEVICE: Schema = Schema {
    kind: EntityKind::Device,
    id_label: Some("device_id"),
    fields: &[
        text("name"),
        FieldSpec::attribute("simplemdm_name", "device_name", FieldKind::Text),
        text("status"),
        text("os_version"),
        text("build_version"),
        text("model_name"),
        text("model"),
        text("product_name"),
        text("unique_identifier"),
        text("serial_number"),
        text("processor_architecture"),
        text("imei"),
        text("meid"),
        number("device_capacity"),
        number("available_device_capacity"),
        text("modem_firmware_version"),
        text("iccid"),
        text("bluetooth_mac"),
        text("wifi_mac"),
        text("current_carrier_network"),
        text("sim_carrier_network"),
        text("subscriber_carrier_network"),
        text("carrier_settings_version"),
        text("phone_number"),
        flag("voice_roaming_enabled"),
        flag("data_roaming_enabled"),
        flag("is_roaming"),
        text("subscriber_mcc"),
        text("subscriber_mnc"),
        text("simmnc"),
        text("current_mcc"),
        text("current_mnc"),
        text("hardware_encryption_caps"),
        flag("passcode_present"),
        flag("passcode_compliant"),
        flag("passcode_compliant_with_profiles"),
        flag("is_supervised"),
        flag("is_dep_enrollment"),
        flag("is_user_approved_enrollment"),
        flag("is_device_locator_service_enabled"),
        flag("is_do_not_disturb_in_effect"),
        flag("personal_hotspot_enabled"),
        flag("itunes_store_account_is_active"),
        text("cellular_technology"),
        timestamp("last_cloud_backup_date"),
        flag("is_activation_lock_enabled"),
        flag("is_cloud_backup_enabled"),
        flag("filevault_enabled"),
        flag("firmware_password_enabled"),
        flag("recovery_lock_password_enabled"),
        flag("remote_desktop_enabled"),
        text("managed_apple_id"),
        FieldSpec::attribute("firewall_enabled", "firewall.enabled", FieldKind::Flag),
        FieldSpec::attribute("firewall_block_all_incoming", "firewall.block_all_incoming", FieldKind::Flag),
        FieldSpec::attribute("firewall_stealth_mode", "firewall.stealth_mode", FieldKind::Flag),
        flag("system_integrity_protection_enabled"),
        FieldSpec::attribute("os_update_info", "os_update", FieldKind::Composite),
        number("location_latitude"),
        number("location_longitude"),
        number("location_accuracy"),
        timestamp("last_seen_at"),
        text("last_seen_ip"),
        timestamp("enrolled_at"),
        FieldSpec::relationship("device_group_id", "device_group"),
        FieldSpec::attribute("battery_level", "battery_level", FieldKind::Percentage).hidden(),
    ],
};

pub static DEVICE_GROUP: Schema = Schema {
    kind: EntityKind::DeviceGroup,
    id_label: Some("device_group_id"),
    fields: &[FieldSpec::attribute("device_group_name", "name", FieldKind::Text)],
};

pub static INSTALLED_APP: Schema = Schema {
    kind: EntityKind::InstalledApp,
    id_label: Some("installed_app_id"),
    fields: &[
        text("name"),
        text("identifier"),
        text("version"),
        flag("managed"),
    ],
};

pub static APP: Schema = Schema {
    kind: EntityKind::App,
    id_label: Some("app_id"),
    fields: &[
        text("name"),
        text("bundle_identifier"),
        text("app_type"),
        text("version"),
        text("platform_support"),
        text("processing_status"),
    ],
};

pub static ENROLLMENT: Schema = Schema {
    kind: EntityKind::Enrollment,
    id_label: Some("enrollment_id"),
    fields: &[
        text("url"),
        flag("user_enrollment"),
        flag("welcome_screen"),
        flag("authentication"),
        FieldSpec::relationship("device_group_id", "device_group"),
        FieldSpec::relationship("device_id", "device"),
    ],
};

pub static DEP_SERVER: Schema = Schema {
    kind: EntityKind::DepServer,
    id_label: Some("dep_server_id"),
    fields: &[
        FieldSpec::attribute("dep_server_name", "server_name", FieldKind::Text),
        text("organization_name"),
        timestamp("token_expires_at"),
        timestamp("last_synced_at").hidden(),
    ],
};

/// A DEP device record enriched with the detail of the enrolled device it is linked to.
pub static DEP_DEVICE: Schema = Schema {
    kind: EntityKind::DepDevice,
    id_label: Some("dep_device_id"),
    fields: &[
        FieldSpec::relationship("device_id", "device"),
        text("serial_number"),
        text("model"),
        text("description"),
        text("color"),
        text("asset_tag"),
        text("profile_status"),
        text("device_family"),
        text("os"),
        text("device_assigned_by"),
        timestamp("device_assigned_date").hidden(),
        text("name"),
        FieldSpec::attribute("simplemdm_name", "device_name", FieldKind::Text),
        text("status"),
        text("os_version"),
    ],
};

pub static PROFILE: Schema = Schema {
    kind: EntityKind::Profile,
    id_label: Some("profile_id"),
    fields: &[
        text("name"),
        text("profile_identifier"),
        flag("user_scope"),
        flag("attribute_support"),
        flag("escape_attributes"),
        flag("reinstall_after_os_update"),
        number("group_count").hidden(),
        number("device_count").hidden(),
    ],
};

pub static PUSH_CERTIFICATE: Schema = Schema {
    kind: EntityKind::PushCertificate,
    id_label: None,
    fields: &[text("apple_id"), timestamp("expires_at").hidden()],
};
