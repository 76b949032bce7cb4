//! Property-based test generators using proptest.
//!
//! Generated operations target top-level fields so that they always
//! resolve against generated documents.

use optidoc_codec::{Fields, FieldOperation, Value};
use proptest::prelude::*;

/// Strategy for generating field names.
pub fn field_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,7}").expect("Invalid regex")
}

/// Strategy for generating scalar values.
///
/// Floats are kept finite so that values compare equal to themselves.
pub fn scalar_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        (-1_000_000i64..1_000_000).prop_map(Value::Integer),
        (-1.0e6f64..1.0e6).prop_map(Value::Float),
        "[a-zA-Z0-9 ]{0,12}".prop_map(Value::Text),
    ]
}

/// Strategy for generating nested values.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    scalar_value_strategy().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map(field_name_strategy(), inner, 0..4).prop_map(Value::Map),
        ]
    })
}

/// Strategy for generating document bodies.
pub fn fields_strategy() -> impl Strategy<Value = Fields> {
    prop::collection::btree_map(field_name_strategy(), value_strategy(), 0..6)
}

/// Strategy for generating `Set` operations on top-level fields.
pub fn set_operation_strategy() -> impl Strategy<Value = FieldOperation> {
    (field_name_strategy(), value_strategy())
        .prop_map(|(name, value)| FieldOperation::set(&format!("/{name}"), value).expect("valid set"))
}

/// Strategy for generating integer deltas for increments.
pub fn delta_strategy() -> impl Strategy<Value = i64> {
    -1_000i64..1_000
}

/// Strategy for generating non-empty batches of `Set` operations.
pub fn set_batch_strategy() -> impl Strategy<Value = Vec<FieldOperation>> {
    prop::collection::vec(set_operation_strategy(), 1..6)
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_sets_are_valid(op in set_operation_strategy()) {
            prop_assert!(op.validate().is_ok());
        }

        #[test]
        fn generated_values_equal_themselves(value in value_strategy()) {
            prop_assert_eq!(value.clone(), value);
        }
    }
}
