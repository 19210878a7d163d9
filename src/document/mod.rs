//! Parsed configuration documents.
//!
//! # Data Flow
//! ```text
//! UTF-8 text (JSON, or TOML for `.toml` files)
//!     → serde_json (insertion-ordered) / toml
//!     → Document tree: Object / Sequence / Scalar
//!     → reconcile::Reconciler
//! ```
//!
//! # Design Decisions
//! - Documents are immutable once parsed; the reconciler only borrows them
//! - Object keys keep their source order and are unique (last one wins on parse)
//! - Scalars keep JSON number fidelity so serde can convert them into any numeric field

use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Errors raised while turning text into a [`Document`].
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Source syntax of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Toml,
}

impl Format {
    /// Pick the format from a file name; anything but `.toml` is JSON.
    pub fn from_path(path: &str) -> Self {
        if path.to_ascii_lowercase().ends_with(".toml") {
            Format::Toml
        } else {
            Format::Json
        }
    }
}

/// A leaf value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
}

/// Ordered key → document mapping with unique keys.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Fields {
    entries: Vec<(String, Document)>,
}

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace `key`, keeping the original position on replace.
    pub fn insert(&mut self, key: impl Into<String>, value: Document) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Document> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Document)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A copy of these fields without `key`.
    pub fn without(&self, key: &str) -> Fields {
        Fields {
            entries: self
                .entries
                .iter()
                .filter(|(k, _)| k != key)
                .cloned()
                .collect(),
        }
    }
}

impl FromIterator<(String, Document)> for Fields {
    fn from_iter<I: IntoIterator<Item = (String, Document)>>(iter: I) -> Self {
        let mut fields = Fields::new();
        for (k, v) in iter {
            fields.insert(k, v);
        }
        fields
    }
}

/// A parsed configuration tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    Object(Fields),
    Sequence(Vec<Document>),
    Scalar(Scalar),
}

impl Document {
    /// Parse UTF-8 text in the given format.
    pub fn parse(text: &str, format: Format) -> Result<Self, DocumentError> {
        match format {
            Format::Json => Self::from_json_str(text),
            Format::Toml => Self::from_toml_str(text),
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self, DocumentError> {
        let value: Value = serde_json::from_str(text)?;
        Ok(Document::from(value))
    }

    pub fn from_toml_str(text: &str) -> Result<Self, DocumentError> {
        let value: toml::Value = toml::from_str(text)?;
        Ok(Document::from(value))
    }

    pub fn null() -> Self {
        Document::Scalar(Scalar::Null)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Document::Scalar(Scalar::Null))
    }

    pub fn as_object(&self) -> Option<&Fields> {
        match self {
            Document::Object(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Document]> {
        match self {
            Document::Sequence(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Document::Scalar(Scalar::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Shape name used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Document::Object(_) => "object",
            Document::Sequence(_) => "sequence",
            Document::Scalar(Scalar::Null) => "null",
            Document::Scalar(_) => "scalar",
        }
    }

    /// Convert back into a JSON value, e.g. to hand it to serde.
    pub fn to_value(&self) -> Value {
        match self {
            Document::Object(fields) => {
                let mut map = Map::new();
                for (k, v) in fields.iter() {
                    map.insert(k.to_string(), v.to_value());
                }
                Value::Object(map)
            }
            Document::Sequence(items) => Value::Array(items.iter().map(Document::to_value).collect()),
            Document::Scalar(Scalar::Null) => Value::Null,
            Document::Scalar(Scalar::Bool(b)) => Value::Bool(*b),
            Document::Scalar(Scalar::Number(n)) => Value::Number(n.clone()),
            Document::Scalar(Scalar::String(s)) => Value::String(s.clone()),
        }
    }
}

impl From<Value> for Document {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Document::Scalar(Scalar::Null),
            Value::Bool(b) => Document::Scalar(Scalar::Bool(b)),
            Value::Number(n) => Document::Scalar(Scalar::Number(n)),
            Value::String(s) => Document::Scalar(Scalar::String(s)),
            Value::Array(items) => Document::Sequence(items.into_iter().map(Document::from).collect()),
            Value::Object(map) => Document::Object(
                map.into_iter().map(|(k, v)| (k, Document::from(v))).collect(),
            ),
        }
    }
}

impl From<toml::Value> for Document {
    fn from(value: toml::Value) -> Self {
        match value {
            toml::Value::String(s) => Document::Scalar(Scalar::String(s)),
            toml::Value::Integer(i) => Document::Scalar(Scalar::Number(Number::from(i))),
            toml::Value::Float(f) => Number::from_f64(f)
                .map(|n| Document::Scalar(Scalar::Number(n)))
                .unwrap_or_else(Document::null),
            toml::Value::Boolean(b) => Document::Scalar(Scalar::Bool(b)),
            toml::Value::Datetime(dt) => Document::Scalar(Scalar::String(dt.to_string())),
            toml::Value::Array(items) => Document::Sequence(items.into_iter().map(Document::from).collect()),
            toml::Value::Table(table) => Document::Object(
                table.into_iter().map(|(k, v)| (k, Document::from(v))).collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_keeps_key_order() {
        let doc = Document::from_json_str(r#"{"zeta": 1, "alpha": [true, null], "mid": {"x": "y"}}"#).unwrap();
        let fields = doc.as_object().unwrap();
        let keys: Vec<&str> = fields.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
        assert_eq!(fields.get("alpha").unwrap().kind(), "sequence");
        assert!(fields.get("alpha").unwrap().as_sequence().unwrap()[1].is_null());
    }

    #[test]
    fn test_toml_document() {
        let doc = Document::parse("ram = 512\n[server]\nname = \"a\"\n", Format::Toml).unwrap();
        let fields = doc.as_object().unwrap();
        assert_eq!(fields.get("ram").unwrap().to_value(), serde_json::json!(512));
        assert_eq!(fields.get("server").unwrap().as_object().unwrap().get("name").unwrap().as_str(), Some("a"));
    }

    #[test]
    fn test_without_strips_key() {
        let doc = Document::from(serde_json::json!({"type": "A", "x": 1}));
        let stripped = doc.as_object().unwrap().without("type");
        assert_eq!(stripped.len(), 1);
        assert!(stripped.get("type").is_none());
    }

    #[test]
    fn test_malformed_json_is_error() {
        assert!(matches!(Document::from_json_str("{\"a\":"), Err(DocumentError::Json(_))));
        assert_eq!(Format::from_path("/etc/x/service.TOML"), Format::Toml);
        assert_eq!(Format::from_path("node.json"), Format::Json);
    }
}
