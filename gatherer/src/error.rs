use crate::entity::EntityKind;

/// Errors that abort the collection of one resource type for the current cycle.
#[derive(thiserror::Error, Debug)]
pub enum CollectError {
    #[error("request to {path} failed: {source}")]
    Transport {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{path} answered with HTTP {status}: {body}")]
    Upstream { path: String, status: u16, body: String },
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error("{kind} {id}: {source}")]
    Entity {
        kind: EntityKind,
        id: String,
        #[source]
        source: Box<CollectError>,
    },
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("collector panicked: {0}")]
    Panicked(String),
}

impl CollectError {
    /// Attach the entity being processed so the failure can be traced back to one upstream record.
    pub fn for_entity(self, kind: EntityKind, id: impl Into<String>) -> Self {
        CollectError::Entity {
            kind,
            id: id.into(),
            source: Box::new(self),
        }
    }

    /// The HTTP status of an upstream rejection, looking through entity context.
    pub fn status(&self) -> Option<u16> {
        match self {
            CollectError::Upstream { status, .. } => Some(*status),
            CollectError::Entity { source, .. } => source.status(),
            _ => None,
        }
    }
}

/// A record (or response envelope) is missing a key or has a shape that prevents building an entity.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum MappingError {
    #[error("missing field `{0}`")]
    MissingField(String),
    #[error("malformed `{field}`: {reason}")]
    Malformed { field: String, reason: String },
    #[error("invalid {kind} schema: {reason}")]
    InvalidSchema { kind: EntityKind, reason: String },
}

/// A single field could not be parsed. Never fatal: the field is omitted from the entity.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("cannot parse `{field}` from {value}: {reason}")]
pub struct FieldParseError {
    pub field: &'static str,
    pub value: String,
    pub reason: String,
}

#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error("metric family `{0}` is not registered")]
    UnknownFamily(String),
    #[error("metric family `{0}` is already registered")]
    DuplicateFamily(String),
    #[error("metric family `{family}` is a {actual}, not a {expected}")]
    KindMismatch {
        family: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("metric family `{family}` expects {expected} label values, got {actual}")]
    LabelArity {
        family: String,
        expected: usize,
        actual: usize,
    },
    #[error("counter `{family}` cannot be increased by {amount}")]
    InvalidIncrement { family: String, amount: f64 },
    #[error("a collection cycle is already in progress")]
    CycleInProgress,
    #[error("no collection cycle is in progress")]
    NoCycle,
    #[error(transparent)]
    Prometheus(#[from] prometheus::Error),
    #[error("cannot encode metrics: {0}")]
    Encode(String),
}
