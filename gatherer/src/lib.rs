//! # SimpleMDM Gatherer
//!
//! The collection engine of the exporter. It polls the SimpleMDM REST API on a fixed interval, normalizes the
//! paginated JSON collections into entities and keeps a Prometheus registry holding the latest observation of every
//! entity.
//!
//! ## Architecture
//!
//! - **`upstream`**: The `Upstream` seam and its `reqwest`-backed `ApiClient`
//! - **`paginate`**: Cursor pagination (`limit` / `starting_after` / `has_more`)
//! - **`entity`**: Static per-resource schemas and the `Mapper` turning raw records into `Entity` values
//! - **`metrics`**: The `MetricRegistry` with per-cycle reconciliation of stale gauge series
//! - **`collectors`**: One collector per resource type plus the `Scheduler` driving them
//!
//! ## Failure isolation
//!
//! Errors are contained at the collector boundary. A failing collector leaves its series untouched for the cycle
//! while every other collector still runs, and the scheduler loop never terminates on a collection error.

#[macro_use]
extern crate tracing;

pub mod collectors;
pub mod entity;
pub mod error;
pub mod metrics;
pub mod paginate;
pub mod upstream;

pub use collectors::*;
pub use entity::{
    Entity,
    EntityKind,
    Mapper,
    Value,
};
pub use error::{
    CollectError,
    FieldParseError,
    MappingError,
    RegistryError,
};
pub use metrics::{
    MetricRegistry,
    Snapshot,
};
pub use paginate::Paginator;
pub use upstream::{
    ApiClient,
    Upstream,
};
