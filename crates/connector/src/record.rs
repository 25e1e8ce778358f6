//! Normalized measurement records and the logical topics they are published under.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};

/// Measurement families a platform can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeasurementKind {
    Location,
    Wind,
    Wave,
    System,
    Image,
}

impl MeasurementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeasurementKind::Location => "location",
            MeasurementKind::Wind => "wind",
            MeasurementKind::Wave => "wave",
            MeasurementKind::System => "system",
            MeasurementKind::Image => "image",
        }
    }
}

impl fmt::Display for MeasurementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical topic `platform/<platform id>/<kind>`.
///
/// The rendered string is the deduplication key; the transport maps it to a
/// broker subject separately.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    platform_id: String,
    kind: MeasurementKind,
}

impl Topic {
    pub fn new(platform_id: impl Into<String>, kind: MeasurementKind) -> Self {
        Self {
            platform_id: platform_id.into(),
            kind,
        }
    }

    pub fn location(platform_id: impl Into<String>) -> Self {
        Self::new(platform_id, MeasurementKind::Location)
    }

    pub fn platform_id(&self) -> &str {
        &self.platform_id
    }

    pub fn kind(&self) -> MeasurementKind {
        self.kind
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "platform/{}/{}", self.platform_id, self.kind)
    }
}

/// A single field value of a normalized record
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Number(f64),
    Text(String),
    Time(DateTime<Utc>),
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Number(n) => serializer.serialize_f64(*n),
            FieldValue::Text(s) => serializer.serialize_str(s),
            FieldValue::Time(t) => {
                serializer.serialize_str(&t.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
        }
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Number(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(v: DateTime<Utc>) -> Self {
        FieldValue::Time(v)
    }
}

/// Flat mapping from field name to value, serialized as a JSON object.
///
/// Fields with unknown values are absent rather than null, and non-finite
/// numbers are never stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct NormalizedRecord {
    fields: BTreeMap<String, FieldValue>,
}

impl NormalizedRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record with its `time` field set
    pub fn at(time: DateTime<Utc>) -> Self {
        Self::new().with("time", time)
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn with_opt<V: Into<FieldValue>>(self, name: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(v) => self.with(name, v),
            None => self,
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        let value = value.into();
        if let FieldValue::Number(n) = value {
            if !n.is_finite() {
                return;
            }
        }
        self.fields.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        match self.fields.get(name) {
            Some(FieldValue::Number(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn time(&self) -> Option<DateTime<Utc>> {
        match self.fields.get("time") {
            Some(FieldValue::Time(t)) => Some(*t),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// JSON payload as written to the transport
    pub fn to_payload(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}

/// One record destined for one topic
#[derive(Debug, Clone, PartialEq)]
pub struct Emission {
    pub topic: Topic,
    pub record: NormalizedRecord,
}

impl Emission {
    pub fn new(topic: Topic, record: NormalizedRecord) -> Self {
        Self { topic, record }
    }
}
