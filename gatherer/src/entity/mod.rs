//! Normalized entities built from raw SimpleMDM records.

mod mapper;
pub mod schema;

pub use mapper::{
    Entity,
    Mapper,
    Value,
    UNKNOWN,
};
pub use schema::{
    FieldKind,
    FieldSpec,
    Schema,
    Source,
};
use crate::paginate::record_id;
use serde::Serialize;
use std::collections::HashSet;
use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntityKind {
    Device,
    DeviceGroup,
    InstalledApp,
    App,
    Enrollment,
    DepServer,
    DepDevice,
    Profile,
    PushCertificate,
}

/// Drop repeated records (same `id`) so that every entity is processed once per cycle. The first occurrence wins.
pub fn dedup_by_id(kind: EntityKind, records: Vec<serde_json::Value>) -> Vec<serde_json::Value> {
    let total = records.len();
    let mut seen = HashSet::with_capacity(total);
    let unique: Vec<_> = records
        .into_iter()
        .filter(|record| match record_id(record) {
            Some(id) => seen.insert(id),
            None => true,
        })
        .collect();

    if unique.len() != total {
        debug!(%kind, duplicates = total - unique.len(), "dropped duplicate records");
    }
    unique
}
