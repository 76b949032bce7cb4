//! CBOR encoding and conversion between typed records and [`Value`] trees.
//!
//! Field maps are ordered, so encoding the same document always produces
//! the same bytes. Content tags rely on this.

use crate::error::{CodecError, CodecResult};
use crate::value::{Fields, Value};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encode any serializable value to CBOR bytes.
///
/// # Errors
///
/// Returns [`CodecError::EncodingFailed`] if serialization fails.
pub fn to_cbor<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    let mut buffer = Vec::new();
    ciborium::ser::into_writer(value, &mut buffer)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(buffer)
}

/// Decode CBOR bytes.
///
/// # Errors
///
/// Returns [`CodecError::DecodingFailed`] on malformed input or a shape
/// that does not match `T`.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    ciborium::de::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
}

/// Convert a typed record into a dynamic value tree.
pub fn to_value<T: Serialize + ?Sized>(value: &T) -> CodecResult<Value> {
    from_cbor(&to_cbor(value)?)
}

/// Convert a typed record into a field map. The record must serialize as a map.
pub fn to_fields<T: Serialize + ?Sized>(value: &T) -> CodecResult<Fields> {
    match to_value(value)? {
        Value::Map(fields) => Ok(fields),
        other => Err(CodecError::encoding_failed(format!(
            "expected a map, got {}",
            other.type_name()
        ))),
    }
}

/// Convert a dynamic value tree back into a typed record.
pub fn from_value<T: DeserializeOwned>(value: &Value) -> CodecResult<T> {
    from_cbor(&to_cbor(value)?)
}

/// Convert a field map back into a typed record.
pub fn from_fields<T: DeserializeOwned>(fields: &Fields) -> CodecResult<T> {
    from_cbor(&to_cbor(fields)?)
}
