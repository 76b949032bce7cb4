//! Field-level patch operations.

use crate::error::{CodecError, CodecResult};
use crate::path::FieldPath;
use crate::value::{Fields, Number, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a field operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Insert a value (maps: add or overwrite key, arrays: insert).
    Add,
    /// Remove an existing value.
    Remove,
    /// Overwrite an existing value.
    Replace,
    /// Create or overwrite a value.
    Set,
    /// Add a numeric delta; creates the field if absent.
    Increment,
    /// Move a value from `from` to `path`.
    Move,
}

impl OperationKind {
    /// Returns true if operations of this kind carry a value.
    pub fn carries_value(&self) -> bool {
        !matches!(self, OperationKind::Remove | OperationKind::Move)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Add => "add",
            OperationKind::Remove => "remove",
            OperationKind::Replace => "replace",
            OperationKind::Set => "set",
            OperationKind::Increment => "incr",
            OperationKind::Move => "move",
        };
        f.write_str(name)
    }
}

/// A single field operation.
///
/// One type covers every kind; the payload is optional and checked by
/// [`FieldOperation::validate`]:
/// - `Remove` and `Move` carry no value
/// - `Increment` carries a numeric value
/// - only `Move` carries `from`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldOperation {
    /// Operation kind.
    pub kind: OperationKind,
    /// Target path.
    pub path: FieldPath,
    /// Payload for value-carrying kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Source path, for moves.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<FieldPath>,
}

impl FieldOperation {
    fn build(
        kind: OperationKind,
        path: &str,
        value: Option<Value>,
        from: Option<&str>,
    ) -> CodecResult<Self> {
        let op = Self {
            kind,
            path: FieldPath::parse(path)?,
            value,
            from: from.map(FieldPath::parse).transpose()?,
        };
        op.validate()?;
        Ok(op)
    }

    /// Creates an `Add` operation.
    pub fn add(path: &str, value: impl Into<Value>) -> CodecResult<Self> {
        Self::build(OperationKind::Add, path, Some(value.into()), None)
    }

    /// Creates a `Remove` operation.
    pub fn remove(path: &str) -> CodecResult<Self> {
        Self::build(OperationKind::Remove, path, None, None)
    }

    /// Creates a `Replace` operation.
    pub fn replace(path: &str, value: impl Into<Value>) -> CodecResult<Self> {
        Self::build(OperationKind::Replace, path, Some(value.into()), None)
    }

    /// Creates a `Set` operation.
    pub fn set(path: &str, value: impl Into<Value>) -> CodecResult<Self> {
        Self::build(OperationKind::Set, path, Some(value.into()), None)
    }

    /// Creates an `Increment` operation. The delta must be numeric.
    pub fn increment(path: &str, delta: impl Into<Value>) -> CodecResult<Self> {
        Self::build(OperationKind::Increment, path, Some(delta.into()), None)
    }

    /// Creates a `Move` operation.
    pub fn move_value(from: &str, path: &str) -> CodecResult<Self> {
        Self::build(OperationKind::Move, path, None, Some(from))
    }

    /// Checks the shape invariants of this operation.
    pub fn validate(&self) -> CodecResult<()> {
        match (self.kind.carries_value(), &self.value) {
            (true, None) => {
                return Err(CodecError::invalid_operation(format!(
                    "{} on {} requires a value",
                    self.kind, self.path
                )))
            }
            (false, Some(_)) => {
                return Err(CodecError::invalid_operation(format!(
                    "{} on {} must not carry a value",
                    self.kind, self.path
                )))
            }
            _ => {}
        }

        if self.kind == OperationKind::Increment && self.delta().is_none() {
            return Err(CodecError::invalid_operation(format!(
                "increment on {} requires a numeric value",
                self.path
            )));
        }

        match (self.kind, &self.from) {
            (OperationKind::Move, None) => Err(CodecError::invalid_operation(format!(
                "move to {} requires a source path",
                self.path
            ))),
            (OperationKind::Move, Some(from)) if from.is_prefix_of(&self.path) && from != &self.path => {
                Err(CodecError::invalid_operation(format!(
                    "cannot move {from} into its own child {}",
                    self.path
                )))
            }
            (OperationKind::Move, Some(_)) => Ok(()),
            (_, Some(_)) => Err(CodecError::invalid_operation(format!(
                "{} on {} must not carry a source path",
                self.kind, self.path
            ))),
            (_, None) => Ok(()),
        }
    }

    /// Returns the numeric delta of an increment.
    pub fn delta(&self) -> Option<Number> {
        match self.kind {
            OperationKind::Increment => self.value.as_ref().and_then(Value::as_number),
            _ => None,
        }
    }

    /// Applies this operation to a field map.
    ///
    /// The map may be partially modified on error; callers that need
    /// atomicity apply to a staged copy (see [`crate::Document::apply`]).
    pub fn apply_to(&self, root: &mut Fields) -> CodecResult<()> {
        self.validate()?;
        match self.kind {
            OperationKind::Add => self.path.insert(root, self.payload()?),
            OperationKind::Set => self.path.upsert(root, self.payload()?),
            OperationKind::Replace => self.path.replace(root, self.payload()?).map(|_| ()),
            OperationKind::Remove => self.path.remove(root).map(|_| ()),
            OperationKind::Increment => self.apply_increment(root),
            OperationKind::Move => {
                let from = self
                    .from
                    .as_ref()
                    .ok_or_else(|| CodecError::invalid_operation("move without source"))?;
                if from == &self.path {
                    return if from.exists(root) {
                        Ok(())
                    } else {
                        Err(CodecError::path_not_found(from.to_string()))
                    };
                }
                let moved = from.remove(root)?;
                self.path.insert(root, moved)
            }
        }
    }

    fn payload(&self) -> CodecResult<Value> {
        self.value.clone().ok_or_else(|| {
            CodecError::invalid_operation(format!("{} on {} has no value", self.kind, self.path))
        })
    }

    fn incremented(&self, current: Option<&Value>) -> CodecResult<Value> {
        let delta = self.delta().ok_or_else(|| {
            CodecError::invalid_operation(format!("increment on {} is not numeric", self.path))
        })?;
        let base = match current {
            None => return Ok(delta.into()),
            Some(value) => value
                .as_number()
                .ok_or_else(|| CodecError::type_mismatch(self.path.to_string(), "number"))?,
        };
        base.checked_add(delta)
            .map(Value::from)
            .ok_or_else(|| CodecError::IntegerOverflow {
                path: self.path.to_string(),
            })
    }

    fn apply_increment(&self, root: &mut Fields) -> CodecResult<()> {
        let next = self.incremented(self.path.resolve(root))?;
        self.path.upsert(root, next)
    }
}

impl fmt::Display for FieldOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.from, &self.value) {
            (Some(from), _) => write!(f, "{} {} -> {}", self.kind, from, self.path),
            (None, Some(value)) => write!(f, "{} {} = {}", self.kind, self.path, value),
            (None, None) => write!(f, "{} {}", self.kind, self.path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> Fields {
        let mut fields = Fields::new();
        fields.insert("counter".into(), Value::Integer(1));
        fields.insert("status".into(), Value::from("new"));
        fields.insert("items".into(), Value::Array(vec![1.into(), 2.into()]));
        fields
    }

    #[test]
    fn constructors_enforce_invariants() {
        assert!(FieldOperation::increment("/counter", "one").is_err());
        assert!(FieldOperation::increment("/counter", 2.5).is_ok());
        assert!(FieldOperation::move_value("/a", "/a/b").is_err());
        assert!(FieldOperation::set("counter", 1).is_err());
    }

    #[test]
    fn validate_catches_hand_built_violations() {
        let op = FieldOperation {
            kind: OperationKind::Remove,
            path: FieldPath::field("status"),
            value: Some(Value::Null),
            from: None,
        };
        assert!(matches!(op.validate(), Err(CodecError::InvalidOperation { .. })));

        let op = FieldOperation {
            kind: OperationKind::Set,
            path: FieldPath::field("status"),
            value: None,
            from: None,
        };
        assert!(op.validate().is_err());
    }

    #[test]
    fn increment_creates_and_adds() {
        let mut fields = root();
        FieldOperation::increment("/counter", 4).unwrap().apply_to(&mut fields).unwrap();
        FieldOperation::increment("/fresh", 2).unwrap().apply_to(&mut fields).unwrap();
        assert_eq!(fields.get("counter"), Some(&Value::Integer(5)));
        assert_eq!(fields.get("fresh"), Some(&Value::Integer(2)));
    }

    #[test]
    fn increment_non_numeric_is_type_mismatch() {
        let mut fields = root();
        let err = FieldOperation::increment("/status", 1)
            .unwrap()
            .apply_to(&mut fields)
            .unwrap_err();
        assert!(matches!(err, CodecError::TypeMismatch { .. }));
    }

    #[test]
    fn increment_overflow() {
        let mut fields = Fields::new();
        fields.insert("n".into(), Value::Integer(i64::MAX));
        let err = FieldOperation::increment("/n", 1)
            .unwrap()
            .apply_to(&mut fields)
            .unwrap_err();
        assert!(matches!(err, CodecError::IntegerOverflow { .. }));
    }

    #[test]
    fn remove_and_replace_require_existing() {
        let mut fields = root();
        assert!(FieldOperation::remove("/nope").unwrap().apply_to(&mut fields).is_err());
        assert!(FieldOperation::replace("/nope", 1).unwrap().apply_to(&mut fields).is_err());
        FieldOperation::remove("/status").unwrap().apply_to(&mut fields).unwrap();
        assert!(!fields.contains_key("status"));
    }

    #[test]
    fn move_relocates_value() {
        let mut fields = root();
        FieldOperation::move_value("/status", "/previous")
            .unwrap()
            .apply_to(&mut fields)
            .unwrap();
        assert!(!fields.contains_key("status"));
        assert_eq!(fields.get("previous"), Some(&Value::from("new")));
    }

    #[test]
    fn add_inserts_into_array() {
        let mut fields = root();
        FieldOperation::add("/items/1", 9).unwrap().apply_to(&mut fields).unwrap();
        assert_eq!(
            fields.get("items"),
            Some(&Value::Array(vec![1.into(), 9.into(), 2.into()]))
        );
    }

    #[test]
    fn display_forms() {
        let op = FieldOperation::set("/status", "done").unwrap();
        assert_eq!(op.to_string(), r#"set /status = "done""#);
        let op = FieldOperation::move_value("/a", "/b").unwrap();
        assert_eq!(op.to_string(), "move /a -> /b");
    }
}
