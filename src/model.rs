use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Default embedding dimensionality (128 is efficient for general purpose)
pub const DEFAULT_VECTOR_DIM: usize = 128;

/// Key assigned to pushes that do not name one
pub const DEFAULT_KEY: &str = "key";

/// Record identifier shared by the index, payload and vector stores
pub type Uid = String;

/// Dense embedding vector
pub type Embedding = Vec<f32>;

/// Free-form metadata attached to an index entry
pub type Metadata = BTreeMap<String, MetaValue>;

/// Generate a fresh time-ordered uid
pub fn new_uid() -> Uid {
    uuid::Uuid::now_v7().simple().to_string()
}

/// A logged value
///
/// The variant doubles as the default `data_type` tag of the index entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    /// Structured value (lists, objects)
    Json(JsonValue),
}

impl Payload {
    /// Tag recorded as `data_type` unless the caller overrides it
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Text(_) => "text",
            Payload::Integer(_) => "integer",
            Payload::Float(_) => "float",
            Payload::Boolean(_) => "boolean",
            Payload::Json(_) => "json",
        }
    }

    /// True for the "no data" values: empty text or null
    pub fn is_empty(&self) -> bool {
        match self {
            Payload::Text(s) => s.is_empty(),
            Payload::Json(JsonValue::Null) => true,
            Payload::Json(JsonValue::String(s)) => s.is_empty(),
            _ => false,
        }
    }

    /// Text form fed to embedding models
    pub fn to_text(&self) -> String {
        match self {
            Payload::Text(s) => s.clone(),
            Payload::Integer(n) => n.to_string(),
            Payload::Float(f) => f.to_string(),
            Payload::Boolean(b) => b.to_string(),
            Payload::Json(JsonValue::String(s)) => s.clone(),
            Payload::Json(v) => v.to_string(),
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Text(s.to_string())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Text(s)
    }
}

impl From<i64> for Payload {
    fn from(n: i64) -> Self {
        Payload::Integer(n)
    }
}

impl From<i32> for Payload {
    fn from(n: i32) -> Self {
        Payload::Integer(n as i64)
    }
}

impl From<f64> for Payload {
    fn from(f: f64) -> Self {
        Payload::Float(f)
    }
}

impl From<bool> for Payload {
    fn from(b: bool) -> Self {
        Payload::Boolean(b)
    }
}

impl From<JsonValue> for Payload {
    fn from(v: JsonValue) -> Self {
        Payload::Json(v)
    }
}

/// Scalar metadata value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl MetaValue {
    /// Equality used by filters: integers and floats compare by value.
    pub fn matches(&self, other: &MetaValue) -> bool {
        match (self, other) {
            (MetaValue::Integer(i), MetaValue::Float(f))
            | (MetaValue::Float(f), MetaValue::Integer(i)) => *i as f64 == *f,
            _ => self == other,
        }
    }
}

impl From<bool> for MetaValue {
    fn from(b: bool) -> Self {
        MetaValue::Boolean(b)
    }
}

impl From<i64> for MetaValue {
    fn from(n: i64) -> Self {
        MetaValue::Integer(n)
    }
}

impl From<i32> for MetaValue {
    fn from(n: i32) -> Self {
        MetaValue::Integer(n as i64)
    }
}

impl From<f64> for MetaValue {
    fn from(f: f64) -> Self {
        MetaValue::Float(f)
    }
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        MetaValue::String(s.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(s: String) -> Self {
        MetaValue::String(s)
    }
}

/// Index entry describing one push
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub uid: Uid,
    pub key: String,
    /// Owning document
    pub doc: String,
    /// Local wall clock, `HH:MM:SS`
    pub time: String,
    /// Local date, `DD-MM-YYYY`
    pub date: String,
    pub metadata: Option<Metadata>,
    pub data_type: String,
}

impl IndexEntry {
    pub fn new(
        uid: Uid,
        doc: &str,
        key: Option<String>,
        metadata: Option<Metadata>,
        data_type: String,
        at: DateTime<Local>,
    ) -> Self {
        Self {
            uid,
            key: key.unwrap_or_else(|| DEFAULT_KEY.to_string()),
            doc: doc.to_string(),
            time: at.format("%H:%M:%S").to_string(),
            date: at.format("%d-%m-%Y").to_string(),
            metadata,
            data_type,
        }
    }
}

/// Value stored in the payload store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadRecord {
    pub data: Payload,
    pub description: Option<String>,
}

/// Ranked similarity results as parallel arrays
///
/// `uid[i]`, `data[i]`, `description[i]` and `index[i]` describe the same
/// record, best match first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchHits {
    pub entries: usize,
    pub uid: Vec<Uid>,
    pub data: Vec<Payload>,
    pub description: Vec<Option<String>>,
    pub index: Vec<IndexEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embeddings: Option<Vec<Embedding>>,
}

impl SearchHits {
    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }
}
