use super::{
    schema::{
        FieldKind,
        FieldSpec,
        Schema,
        Source,
    },
    EntityKind,
};
use crate::{
    error::{
        FieldParseError,
        MappingError,
    },
    paginate::record_id,
};
use chrono::{
    DateTime,
    FixedOffset,
    NaiveDateTime,
    SecondsFormat,
};
use serde_json::Value as Json;
use std::collections::{
    BTreeMap,
    HashSet,
};

/// Label value substituted for absent, null or unparseable fields.
pub const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Number(f64),
    Flag(bool),
    Time(DateTime<FixedOffset>),
    Unknown,
}

impl Value {
    /// Printable form used as a label value.
    pub fn label(&self) -> String {
        match self {
            Value::Text(text) => text.clone(),
            Value::Number(number) => number.to_string(),
            Value::Flag(flag) => flag.to_string(),
            Value::Time(time) => time.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            Value::Unknown => UNKNOWN.to_string(),
        }
    }

    /// Numeric form used as a sample value. Timestamps become epoch seconds.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(number) => Some(*number),
            Value::Time(time) => Some(time.timestamp_millis() as f64 / 1000.0),
            Value::Flag(flag) => Some(if *flag { 1.0 } else { 0.0 }),
            Value::Text(_) | Value::Unknown => None,
        }
    }
}

/// One monitored resource, recreated from the API response every cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    kind: EntityKind,
    id: String,
    fields: BTreeMap<&'static str, Value>,
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn label(&self, name: &str) -> String {
        self.get(name).map(Value::label).unwrap_or_else(|| UNKNOWN.to_string())
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Value::as_f64)
    }

    /// The field is present and carries a real value.
    pub fn is_known(&self, name: &str) -> bool {
        !matches!(self.get(name), None | Some(Value::Unknown))
    }
}

/// Turns raw records of one resource type into entities according to a static [`Schema`].
///
/// The schema is validated once, when the mapper is built. Mapping itself is a pure function of its inputs.
#[derive(Debug, Clone)]
pub struct Mapper {
    schema: &'static Schema,
    label_names: Vec<&'static str>,
}

impl Mapper {
    pub fn new(schema: &'static Schema) -> Result<Self, MappingError> {
        let invalid = |reason: String| MappingError::InvalidSchema {
            kind: schema.kind,
            reason,
        };

        let mut seen = HashSet::new();
        let names = schema
            .id_label
            .iter()
            .copied()
            .chain(schema.fields.iter().map(|field| field.name));
        for name in names {
            if !is_valid_label_name(name) {
                return Err(invalid(format!("`{name}` is not a valid label name")));
            }
            if !seen.insert(name) {
                return Err(invalid(format!("`{name}` is declared more than once")));
            }
        }

        for field in schema.fields {
            let (Source::Attribute(path) | Source::Relationship(path)) = field.source;
            if path.split('.').any(str::is_empty) {
                return Err(invalid(format!("`{}` has an empty source path", field.name)));
            }
        }

        let label_names = schema
            .id_label
            .into_iter()
            .chain(schema.fields.iter().filter(|field| field.label).map(|field| field.name))
            .collect();

        Ok(Self { schema, label_names })
    }

    pub fn kind(&self) -> EntityKind {
        self.schema.kind
    }

    /// Label names in the order [`Mapper::label_values`] produces values.
    pub fn label_names(&self) -> &[&'static str] {
        &self.label_names
    }

    pub fn label_values(&self, entity: &Entity) -> Vec<String> {
        self.schema
            .id_label
            .map(|_| entity.id.clone())
            .into_iter()
            .chain(
                self.schema
                    .fields
                    .iter()
                    .filter(|field| field.label)
                    .map(|field| entity.label(field.name)),
            )
            .collect()
    }

    /// Map a record carrying its own `id`. Fields are looked up in `detail` first, then in `raw`.
    pub fn map(&self, raw: &Json, detail: Option<&Json>) -> Result<Entity, MappingError> {
        let id = record_id(raw).ok_or_else(|| MappingError::MissingField("id".to_string()))?;
        self.map_with_id(id, raw, detail)
    }

    /// Map a record whose identity is known from elsewhere (single-object endpoints).
    pub fn map_with_id(&self, id: impl Into<String>, raw: &Json, detail: Option<&Json>) -> Result<Entity, MappingError> {
        let (entity, errors) = self.build(id.into(), raw, detail)?;
        for error in errors {
            warn!(kind = %entity.kind, id = %entity.id, %error, "field omitted");
        }
        Ok(entity)
    }

    pub(crate) fn build(
        &self,
        id: String,
        raw: &Json,
        detail: Option<&Json>,
    ) -> Result<(Entity, Vec<FieldParseError>), MappingError> {
        ensure_attributes(raw)?;
        if let Some(detail) = detail {
            ensure_attributes(detail)?;
        }

        let mut fields = BTreeMap::new();
        let mut errors = Vec::new();
        for spec in self.schema.fields {
            let json = detail
                .and_then(|detail| resolve(detail, spec.source))
                .filter(|value| !value.is_null())
                .or_else(|| resolve(raw, spec.source));

            match convert(spec, json) {
                Ok(value) => {
                    fields.insert(spec.name, value);
                }
                Err(error) => errors.push(error),
            }
        }

        Ok((
            Entity {
                kind: self.schema.kind,
                id,
                fields,
            },
            errors,
        ))
    }
}

fn ensure_attributes(record: &Json) -> Result<(), MappingError> {
    match record.get("attributes") {
        Some(Json::Object(_)) => Ok(()),
        Some(other) => Err(MappingError::Malformed {
            field: "attributes".to_string(),
            reason: format!("expected an object, got {other}"),
        }),
        None => Err(MappingError::MissingField("attributes".to_string())),
    }
}

fn resolve(record: &Json, source: Source) -> Option<&Json> {
    match source {
        Source::Attribute(path) => path
            .split('.')
            .try_fold(record.get("attributes")?, |value, key| value.get(key)),
        Source::Relationship(name) => record.get("relationships")?.get(name)?.get("data")?.get("id"),
    }
}

fn convert(spec: &FieldSpec, json: Option<&Json>) -> Result<Value, FieldParseError> {
    let Some(json) = json.filter(|value| !value.is_null()) else {
        return Ok(Value::Unknown);
    };
    let error = |reason: String| FieldParseError {
        field: spec.name,
        value: json.to_string(),
        reason,
    };

    match spec.kind {
        FieldKind::Text => match json {
            Json::String(text) => Ok(Value::Text(text.clone())),
            Json::Number(number) => Ok(Value::Text(number.to_string())),
            Json::Bool(flag) => Ok(Value::Text(flag.to_string())),
            _ => Err(error("nested values cannot be label values".to_string())),
        },
        FieldKind::Flag => match json {
            Json::Bool(flag) => Ok(Value::Flag(*flag)),
            Json::String(text) if text.eq_ignore_ascii_case("true") => Ok(Value::Flag(true)),
            Json::String(text) if text.eq_ignore_ascii_case("false") => Ok(Value::Flag(false)),
            _ => Err(error("expected a boolean".to_string())),
        },
        FieldKind::Number => match json {
            Json::Number(number) => number
                .as_f64()
                .map(Value::Number)
                .ok_or_else(|| error("not representable as a float".to_string())),
            Json::String(text) => parse_finite(text).map(Value::Number).map_err(error),
            _ => Err(error("expected a number".to_string())),
        },
        FieldKind::Percentage => match json {
            Json::String(text) if text.trim().is_empty() || text.trim().eq_ignore_ascii_case(UNKNOWN) => {
                Ok(Value::Unknown)
            }
            Json::String(text) => {
                let Some(number) = text.trim().strip_suffix('%') else {
                    return Err(error("missing `%` suffix".to_string()));
                };
                parse_finite(number).map(Value::Number).map_err(error)
            }
            _ => Err(error("expected a percentage string".to_string())),
        },
        FieldKind::Timestamp => match json {
            Json::String(text) => parse_timestamp(text.trim()).map(Value::Time).ok_or_else(|| {
                error("not an ISO-8601 timestamp".to_string())
            }),
            _ => Err(error("expected a timestamp string".to_string())),
        },
        FieldKind::Composite => match json {
            Json::Object(map) => {
                let mut pairs: Vec<_> = map.iter().filter(|(_, value)| !value.is_null()).collect();
                pairs.sort_by(|(a, _), (b, _)| a.cmp(b));
                let pairs: Vec<String> = pairs
                    .into_iter()
                    .map(|(key, value)| match value {
                        Json::String(text) => format!("{key}={text}"),
                        other => format!("{key}={other}"),
                    })
                    .collect();
                Ok(Value::Text(pairs.join(",")))
            }
            _ => Err(error("expected an object".to_string())),
        },
    }
}

/// `NaN` and infinities parse as floats but are not sample values.
fn parse_finite(text: &str) -> Result<f64, String> {
    match text.trim().parse::<f64>() {
        Ok(number) if number.is_finite() => Ok(number),
        Ok(number) => Err(format!("{number} is not a finite number")),
        Err(e) => Err(e.to_string()),
    }
}

/// RFC 3339 first, then offset-less ISO-8601 read as UTC.
fn parse_timestamp(text: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(text)
        .or_else(|_| DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S %z"))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
                .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
                .ok()
                .map(|naive| naive.and_utc().fixed_offset())
        })
}

fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_');
    valid_start && !name.starts_with("__") && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
