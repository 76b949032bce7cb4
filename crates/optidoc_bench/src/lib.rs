//! Benchmark utilities.

#![warn(missing_docs)]

use optidoc_codec::{Document, DocumentKey, FieldOperation, Fields, Value};
use rand::Rng;

/// Builds a document with `width` integer fields and one nested map.
pub fn wide_document(width: usize) -> Document {
    let mut rng = rand::thread_rng();
    let mut nested = Fields::new();
    nested.insert("city".to_string(), Value::from("Lisbon"));
    nested.insert("zip".to_string(), Value::from("1100-148"));

    let mut doc = Document::new(DocumentKey::new("bench", "bench")).field("address", nested);
    for i in 0..width {
        doc = doc.field(format!("field_{i}"), rng.gen_range(0i64..1_000));
    }
    doc
}

/// One increment per field of a [`wide_document`].
pub fn increments(width: usize) -> Vec<FieldOperation> {
    (0..width)
        .map(|i| FieldOperation::increment(&format!("/field_{i}"), 1).expect("valid increment"))
        .collect()
}

/// Sets every field of a [`wide_document`] to a fixed value.
///
/// About half of them will already hold it when `equal` is true.
pub fn sets(doc: &Document, width: usize, equal: bool) -> Vec<FieldOperation> {
    (0..width)
        .map(|i| {
            let name = format!("field_{i}");
            let value = match doc.fields.get(&name) {
                Some(current) if equal && i % 2 == 0 => current.clone(),
                _ => Value::Integer(-1),
            };
            FieldOperation::set(&format!("/{name}"), value).expect("valid set")
        })
        .collect()
}
