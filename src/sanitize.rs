//! Replacement of non-finite floats before serialisation.
//!
//! JSON has no representation for NaN or infinity, so these become `null`.

use crate::models::{AttributeValue, Attributes};

/// Returns `None` for NaN and infinite values, otherwise the value.
pub fn sanitize_float(value: f64) -> Option<f64> {
    if value.is_finite() {
        Some(value)
    } else {
        None
    }
}

/// Sanitise each element of a sequence of optional floats.
pub fn sanitize_floats(values: &[Option<f64>]) -> Vec<Option<f64>> {
    values
        .iter()
        .map(|value| value.and_then(sanitize_float))
        .collect()
}

/// Sanitise every float in an attribute map, recursing into lists and maps.
pub fn sanitize_attributes(attributes: &Attributes) -> Attributes {
    attributes
        .iter()
        .map(|(key, value)| (key.clone(), value.sanitized()))
        .collect()
}

impl AttributeValue {
    /// Returns a copy with non-finite floats replaced by [AttributeValue::Null].
    pub fn sanitized(&self) -> AttributeValue {
        match self {
            AttributeValue::Float(value) => match sanitize_float(*value) {
                Some(value) => AttributeValue::Float(value),
                None => AttributeValue::Null,
            },
            AttributeValue::List(values) => {
                AttributeValue::List(values.iter().map(AttributeValue::sanitized).collect())
            }
            AttributeValue::Map(values) => AttributeValue::Map(sanitize_attributes(values)),
            other => other.clone(),
        }
    }
}
