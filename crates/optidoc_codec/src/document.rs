//! Documents, document keys and version tokens.

use crate::error::CodecResult;
use crate::patch::FieldOperation;
use crate::path::FieldPath;
use crate::value::{Fields, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a document: its id within a logical partition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentKey {
    /// Document id, unique within the partition.
    pub id: String,
    /// Partition key value.
    pub partition_key: String,
}

impl DocumentKey {
    /// Creates a new key.
    pub fn new(id: impl Into<String>, partition_key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            partition_key: partition_key.into(),
        }
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.partition_key)
    }
}

/// Opaque version token assigned by the store on every successful write.
///
/// Tokens are compared for equality only. A store never reuses a token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionToken(String);

impl VersionToken {
    /// Wraps a raw token value.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the raw token text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A schemaless document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Identity of the document.
    pub key: DocumentKey,
    /// Field map.
    pub fields: Fields,
}

impl Document {
    /// Creates an empty document.
    pub fn new(key: DocumentKey) -> Self {
        Self {
            key,
            fields: Fields::new(),
        }
    }

    /// Creates a document with the given fields.
    pub fn with_fields(key: DocumentKey, fields: Fields) -> Self {
        Self { key, fields }
    }

    /// Builder-style field setter for top-level fields.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Resolves a path inside the document.
    pub fn get(&self, path: &FieldPath) -> Option<&Value> {
        path.resolve(&self.fields)
    }

    /// Applies field operations in order, atomically.
    ///
    /// On error the document is left unchanged.
    pub fn apply(&mut self, ops: &[FieldOperation]) -> CodecResult<()> {
        let mut staged = self.fields.clone();
        for op in ops {
            op.apply_to(&mut staged)?;
        }
        self.fields = staged;
        Ok(())
    }

    /// Returns a copy with the operations applied.
    pub fn patched(&self, ops: &[FieldOperation]) -> CodecResult<Document> {
        let mut copy = self.clone();
        copy.apply(ops)?;
        Ok(copy)
    }
}

/// A document snapshot together with the token it was read at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedDocument {
    /// Document content.
    pub document: Document,
    /// Token of this snapshot.
    pub token: VersionToken,
}

impl VersionedDocument {
    /// Pairs a document with its token.
    pub fn new(document: Document, token: VersionToken) -> Self {
        Self { document, token }
    }

    /// Returns the document key.
    pub fn key(&self) -> &DocumentKey {
        &self.document.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_display() {
        assert_eq!(DocumentKey::new("x", "pk").to_string(), "x@pk");
    }

    #[test]
    fn failed_apply_leaves_document_untouched() {
        let mut doc = Document::new(DocumentKey::new("x", "pk")).field("counter", 1);
        let before = doc.clone();
        let ops = vec![
            FieldOperation::increment("/counter", 5).unwrap(),
            FieldOperation::replace("/missing", Value::Null).unwrap(),
        ];
        assert!(doc.apply(&ops).is_err());
        assert_eq!(doc, before);
    }

    #[test]
    fn apply_in_order() {
        let mut doc = Document::new(DocumentKey::new("x", "pk")).field("counter", 1);
        let ops = vec![
            FieldOperation::increment("/counter", 5).unwrap(),
            FieldOperation::set("/status", "updated").unwrap(),
        ];
        doc.apply(&ops).unwrap();
        assert_eq!(doc.fields.get("counter"), Some(&Value::Integer(6)));
        assert_eq!(doc.fields.get("status"), Some(&Value::from("updated")));
    }
}
