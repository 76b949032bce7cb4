//! Slash-delimited field paths.
//!
//! A path such as `/address/city` or `/tags/0` locates a field inside a
//! document. Segments use JSON-pointer escaping (`~1` for `/`, `~0` for
//! `~`). In arrays a segment is an index; `-` addresses the slot after the
//! last element.

use crate::error::{CodecError, CodecResult};
use crate::value::{Fields, Value};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A parsed field locator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: Vec<String>,
}

/// Mutable view of the container holding the last path segment.
enum Container<'v> {
    Map(&'v mut Fields),
    Array(&'v mut Vec<Value>),
}

impl FieldPath {
    /// Parses a path. The path must start with `/` and name at least one field.
    pub fn parse(text: &str) -> CodecResult<Self> {
        let rest = text
            .strip_prefix('/')
            .ok_or_else(|| CodecError::invalid_path(text, "path must start with '/'"))?;
        if rest.is_empty() {
            return Err(CodecError::invalid_path(text, "path must name a field"));
        }

        let mut segments = Vec::new();
        for raw in rest.split('/') {
            if raw.is_empty() {
                return Err(CodecError::invalid_path(text, "empty segment"));
            }
            segments.push(unescape(raw).ok_or_else(|| {
                CodecError::invalid_path(text, "invalid '~' escape")
            })?);
        }
        Ok(Self { segments })
    }

    /// Builds a single-segment path for a top-level field.
    pub fn field(name: impl Into<String>) -> Self {
        Self {
            segments: vec![name.into()],
        }
    }

    /// Returns the unescaped segments.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Returns the enclosing path, or `None` for a top-level field.
    pub fn parent(&self) -> Option<FieldPath> {
        match self.segments.len() {
            0 | 1 => None,
            n => Some(Self {
                segments: self.segments[..n - 1].to_vec(),
            }),
        }
    }

    /// Returns true if `other` is this path or lies beneath it.
    pub fn is_prefix_of(&self, other: &FieldPath) -> bool {
        other.segments.len() >= self.segments.len()
            && self.segments.iter().zip(&other.segments).all(|(a, b)| a == b)
    }

    /// Resolves the path against a field map.
    pub fn resolve<'v>(&self, root: &'v Fields) -> Option<&'v Value> {
        let (first, rest) = self.segments.split_first()?;
        let mut current = root.get(first)?;
        for segment in rest {
            current = match current {
                Value::Map(fields) => fields.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Returns true if the path resolves to a value.
    pub fn exists(&self, root: &Fields) -> bool {
        self.resolve(root).is_some()
    }

    /// Inserts a value: maps gain or overwrite the key, arrays shift
    /// elements right (`-` appends).
    pub fn insert(&self, root: &mut Fields, value: Value) -> CodecResult<()> {
        let last = self.last();
        match self.container_mut(root)? {
            Container::Map(fields) => {
                fields.insert(last.to_string(), value);
                Ok(())
            }
            Container::Array(items) => {
                let index = self.insertion_index(last, items.len())?;
                items.insert(index, value);
                Ok(())
            }
        }
    }

    /// Creates or overwrites the value at the path.
    pub fn upsert(&self, root: &mut Fields, value: Value) -> CodecResult<()> {
        let last = self.last();
        match self.container_mut(root)? {
            Container::Map(fields) => {
                fields.insert(last.to_string(), value);
                Ok(())
            }
            Container::Array(items) => {
                let index = self.insertion_index(last, items.len())?;
                if index == items.len() {
                    items.push(value);
                } else {
                    items[index] = value;
                }
                Ok(())
            }
        }
    }

    /// Overwrites an existing value, returning the previous one.
    pub fn replace(&self, root: &mut Fields, value: Value) -> CodecResult<Value> {
        let last = self.last();
        let slot = match self.container_mut(root)? {
            Container::Map(fields) => fields.get_mut(last),
            Container::Array(items) => match last.parse::<usize>() {
                Ok(index) => items.get_mut(index),
                Err(_) => None,
            },
        };
        match slot {
            Some(slot) => Ok(std::mem::replace(slot, value)),
            None => Err(CodecError::path_not_found(self.to_string())),
        }
    }

    /// Removes an existing value, returning it.
    pub fn remove(&self, root: &mut Fields) -> CodecResult<Value> {
        let last = self.last();
        let removed = match self.container_mut(root)? {
            Container::Map(fields) => fields.remove(last),
            Container::Array(items) => match last.parse::<usize>() {
                Ok(index) if index < items.len() => Some(items.remove(index)),
                _ => None,
            },
        };
        removed.ok_or_else(|| CodecError::path_not_found(self.to_string()))
    }

    fn last(&self) -> &str {
        // parse() guarantees at least one segment
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    fn insertion_index(&self, segment: &str, len: usize) -> CodecResult<usize> {
        if segment == "-" {
            return Ok(len);
        }
        match segment.parse::<usize>() {
            Ok(index) if index <= len => Ok(index),
            Ok(_) => Err(CodecError::path_not_found(self.to_string())),
            Err(_) => Err(CodecError::type_mismatch(self.to_string(), "array index")),
        }
    }

    fn container_mut<'v>(&self, root: &'v mut Fields) -> CodecResult<Container<'v>> {
        let parents = &self.segments[..self.segments.len().saturating_sub(1)];
        let mut current = Container::Map(root);
        for (depth, segment) in parents.iter().enumerate() {
            let next = match current {
                Container::Map(fields) => fields.get_mut(segment),
                Container::Array(items) => match segment.parse::<usize>() {
                    Ok(index) => items.get_mut(index),
                    Err(_) => None,
                },
            };
            let prefix = || render(&self.segments[..=depth]);
            current = match next {
                Some(Value::Map(fields)) => Container::Map(fields),
                Some(Value::Array(items)) => Container::Array(items),
                Some(_) => return Err(CodecError::type_mismatch(prefix(), "map or array")),
                None => return Err(CodecError::path_not_found(prefix())),
            };
        }
        Ok(current)
    }
}

fn unescape(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '~' {
            match chars.next() {
                Some('0') => out.push('~'),
                Some('1') => out.push('/'),
                _ => return None,
            }
        } else {
            out.push(c);
        }
    }
    Some(out)
}

fn render(segments: &[String]) -> String {
    let mut out = String::new();
    for segment in segments {
        out.push('/');
        out.push_str(&segment.replace('~', "~0").replace('/', "~1"));
    }
    out
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&render(&self.segments))
    }
}

impl FromStr for FieldPath {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for FieldPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for FieldPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Fields {
        let mut address = Fields::new();
        address.insert("city".into(), Value::from("Xi'an"));
        let mut root = Fields::new();
        root.insert("address".into(), Value::Map(address));
        root.insert("tags".into(), Value::Array(vec!["a".into(), "b".into()]));
        root.insert("counter".into(), Value::Integer(3));
        root
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!(FieldPath::parse("counter").is_err());
        assert!(FieldPath::parse("/").is_err());
        assert!(FieldPath::parse("/a//b").is_err());
        assert!(FieldPath::parse("/a~2").is_err());
    }

    #[test]
    fn escapes_roundtrip_through_display() {
        let path = FieldPath::parse("/a~1b/c~0d").unwrap();
        assert_eq!(path.segments(), &["a/b".to_string(), "c~d".to_string()]);
        assert_eq!(path.to_string(), "/a~1b/c~0d");
    }

    #[test]
    fn resolve_nested_and_indexed() {
        let root = sample();
        let city = FieldPath::parse("/address/city").unwrap();
        assert_eq!(city.resolve(&root), Some(&Value::from("Xi'an")));
        let tag = FieldPath::parse("/tags/1").unwrap();
        assert_eq!(tag.resolve(&root), Some(&Value::from("b")));
        assert!(FieldPath::parse("/tags/9").unwrap().resolve(&root).is_none());
        assert!(FieldPath::parse("/counter/x").unwrap().resolve(&root).is_none());
    }

    #[test]
    fn insert_appends_with_dash() {
        let mut root = sample();
        FieldPath::parse("/tags/-").unwrap().insert(&mut root, "c".into()).unwrap();
        FieldPath::parse("/tags/0").unwrap().insert(&mut root, "z".into()).unwrap();
        let tags = root.get("tags").and_then(Value::as_array).unwrap();
        assert_eq!(tags, &["z".into(), "a".into(), "b".into(), "c".into()]);
    }

    #[test]
    fn replace_requires_existing() {
        let mut root = sample();
        let missing = FieldPath::parse("/missing").unwrap();
        assert!(matches!(
            missing.replace(&mut root, Value::Null),
            Err(CodecError::PathNotFound { .. })
        ));
        let counter = FieldPath::parse("/counter").unwrap();
        assert_eq!(counter.replace(&mut root, 9.into()).unwrap(), Value::Integer(3));
    }

    #[test]
    fn missing_parent_is_reported() {
        let mut root = sample();
        let path = FieldPath::parse("/nope/child").unwrap();
        let err = path.upsert(&mut root, Value::Null).unwrap_err();
        assert_eq!(err, CodecError::path_not_found("/nope"));
    }

    #[test]
    fn scalar_parent_is_type_mismatch() {
        let mut root = sample();
        let path = FieldPath::parse("/counter/child").unwrap();
        assert!(matches!(
            path.insert(&mut root, Value::Null),
            Err(CodecError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn prefix_relation() {
        let parent = FieldPath::parse("/address").unwrap();
        let child = FieldPath::parse("/address/city").unwrap();
        assert!(parent.is_prefix_of(&child));
        assert!(!child.is_prefix_of(&parent));
        assert_eq!(child.parent(), Some(parent.clone()));
        assert_eq!(parent.parent(), None);
    }

    proptest::proptest! {
        #[test]
        fn any_segments_survive_display(segments in proptest::collection::vec("[a-z~/]{1,6}", 1..4)) {
            let path = FieldPath { segments: segments.clone() };
            let parsed = FieldPath::parse(&path.to_string()).unwrap();
            proptest::prop_assert_eq!(parsed.segments(), segments.as_slice());
        }
    }
}
