//! # Collectors Module
//!
//! One collector per SimpleMDM resource type, plus the [`Scheduler`] that runs them once per interval.
//!
//! ## Architecture
//!
//! - **`Collector` trait**: Declares metric families and fills them for one cycle
//! - **`DevicesCollector`**: Devices, their group, custom attributes and installed apps
//! - **`AppsCollector`**: The app catalog
//! - **`EnrollmentsCollector`**: Enrollment links and their count
//! - **`DepCollector`**: DEP servers and their devices, enriched with the enrolled device detail
//! - **`ProfilesCollector`**: Configuration profiles and their assignment counts
//! - **`PushCertificateCollector`**: The APNs push certificate
//! - **`Scheduler`**: Brackets every pass in a registry cycle and isolates collector failures
//!
//! A collector stops at the first error and returns it. Series already upserted in that run stay, and since the
//! scope is not completed, nothing of that collector is retired in the cycle.

pub mod apps;
pub mod collector;
pub mod dep;
pub mod devices;
pub mod enrollments;
pub mod profiles;
pub mod push_certificate;
pub mod scheduler;

pub use apps::AppsCollector;
pub use collector::{
    CollectFuture,
    CollectStats,
    Collector,
};
pub use dep::DepCollector;
pub use devices::DevicesCollector;
pub use enrollments::EnrollmentsCollector;
pub use profiles::ProfilesCollector;
pub use push_certificate::PushCertificateCollector;
pub use scheduler::{
    CollectorReport,
    CycleReport,
    Outcome,
    Scheduler,
};

use crate::{
    entity::{
        Entity,
        Mapper,
    },
    paginate::record_id,
};
use serde_json::Value;

/// Labels identifying a device in the per-device gauges.
pub(crate) const DEVICE_IDENTITY: [&str; 3] = ["device_id", "name", "simplemdm_name"];

pub(crate) fn device_identity(entity: &Entity) -> [String; 3] {
    [
        entity.id().to_string(),
        entity.label("name"),
        entity.label("simplemdm_name"),
    ]
}

/// Mapper labels followed by `extra`.
pub(crate) fn label_names(mapper: &Mapper, extra: &[&'static str]) -> Vec<&'static str> {
    mapper.label_names().iter().chain(extra).copied().collect()
}

/// `relationships.<name>.data.id` of a raw record.
pub(crate) fn relationship_id(record: &Value, name: &str) -> Option<String> {
    record
        .get("relationships")
        .and_then(|relationships| relationships.get(name))
        .and_then(|relationship| relationship.get("data"))
        .and_then(record_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn relationship_id_reads_linked_record() {
        let record = json!({
            "id": 1,
            "relationships": {
                "device": { "data": { "type": "device", "id": 42 } },
                "device_group": { "data": null },
            },
        });

        assert_eq!(relationship_id(&record, "device"), Some("42".to_string()));
        assert_eq!(relationship_id(&record, "device_group"), None);
        assert_eq!(relationship_id(&record, "profile"), None);
    }
}
