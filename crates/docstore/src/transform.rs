//! Field-level update transforms and write preconditions.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::document::{Fields, timestamp_value};

/// A single field transform applied server-side.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldTransform {
    /// Replace the field value.
    Set(Value),
    /// Remove the field.
    Delete,
    /// Set the field to the commit time.
    ServerTimestamp,
    /// Append each value not already present in the array.
    ArrayUnion(Vec<Value>),
    /// Remove every element equal to one of the values.
    ArrayRemove(Vec<Value>),
}

/// Ordered set of field transforms for one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Updates {
    entries: Vec<(String, FieldTransform)>,
}

impl Updates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries
            .push((field.into(), FieldTransform::Set(value.into())));
        self
    }

    pub fn delete(mut self, field: impl Into<String>) -> Self {
        self.entries.push((field.into(), FieldTransform::Delete));
        self
    }

    pub fn server_timestamp(mut self, field: impl Into<String>) -> Self {
        self.entries
            .push((field.into(), FieldTransform::ServerTimestamp));
        self
    }

    pub fn array_union<I, V>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.entries
            .push((field.into(), FieldTransform::ArrayUnion(values)));
        self
    }

    pub fn array_remove<I, V>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.entries
            .push((field.into(), FieldTransform::ArrayRemove(values)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldTransform)> {
        self.entries.iter().map(|(f, t)| (f.as_str(), t))
    }

    /// Names of the fields this update touches.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(f, _)| f.as_str())
    }

    /// Apply all transforms to `fields` in order.
    pub fn apply_to(&self, fields: &mut Fields, now: DateTime<Utc>) {
        for (field, transform) in &self.entries {
            apply_transform(fields, field, transform, now);
        }
    }
}

fn apply_transform(fields: &mut Fields, field: &str, transform: &FieldTransform, now: DateTime<Utc>) {
    match transform {
        FieldTransform::Set(value) => {
            fields.insert(field.to_string(), value.clone());
        }
        FieldTransform::Delete => {
            fields.remove(field);
        }
        FieldTransform::ServerTimestamp => {
            fields.insert(field.to_string(), timestamp_value(now));
        }
        FieldTransform::ArrayUnion(values) => {
            let mut current = match fields.remove(field) {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            };
            for value in values {
                if !current.contains(value) {
                    current.push(value.clone());
                }
            }
            fields.insert(field.to_string(), Value::Array(current));
        }
        FieldTransform::ArrayRemove(values) => {
            let mut current = match fields.remove(field) {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            };
            current.retain(|item| !values.contains(item));
            fields.insert(field.to_string(), Value::Array(current));
        }
    }
}

/// Condition that must hold on the stored document for a write to apply.
#[derive(Debug, Clone, PartialEq)]
pub enum Precondition {
    /// The document must exist.
    Exists,
    /// The document must exist and `field` must equal `value`.
    FieldEquals { field: String, value: Value },
    /// The document must exist and must not have `field`.
    FieldMissing { field: String },
}

impl Precondition {
    pub fn field_equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::FieldEquals {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn field_missing(field: impl Into<String>) -> Self {
        Self::FieldMissing {
            field: field.into(),
        }
    }

    pub fn holds(&self, current: Option<&Fields>) -> bool {
        match (self, current) {
            (_, None) => false,
            (Self::Exists, Some(_)) => true,
            (Self::FieldEquals { field, value }, Some(fields)) => fields.get(field) == Some(value),
            (Self::FieldMissing { field }, Some(fields)) => !fields.contains_key(field),
        }
    }
}
