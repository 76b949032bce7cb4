//! # optidoc Codec
//!
//! Document model for optidoc.
//!
//! This crate defines the schemaless document tree and everything that
//! operates on it without I/O:
//! - [`Value`] trees and their ordered [`Fields`] maps
//! - slash-delimited [`FieldPath`] locators
//! - [`FieldOperation`] patches and their atomic application
//! - deterministic CBOR encoding
//!
//! ## Usage
//!
//! ```
//! use optidoc_codec::{Document, DocumentKey, FieldOperation, Value};
//!
//! let mut doc = Document::new(DocumentKey::new("order-1", "orders")).field("counter", 1);
//! doc.apply(&[FieldOperation::increment("/counter", 2).unwrap()]).unwrap();
//! assert_eq!(doc.fields.get("counter"), Some(&Value::Integer(3)));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod document;
mod encoder;
mod error;
mod patch;
mod path;
mod value;

pub use document::{Document, DocumentKey, VersionToken, VersionedDocument};
pub use encoder::{from_cbor, from_fields, from_value, to_cbor, to_fields, to_value};
pub use error::{CodecError, CodecResult};
pub use patch::{FieldOperation, OperationKind};
pub use path::FieldPath;
pub use value::{Fields, Number, Value};
