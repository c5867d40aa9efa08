//! Collection queries with conjunctive field filters.

use std::cmp::Ordering;

use serde_json::Value;

use crate::document::{Fields, parse_timestamp};
use crate::path::CollectionPath;

/// A single field filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    In(String, Vec<Value>),
    Lt(String, Value),
}

impl Filter {
    fn matches(&self, fields: &Fields) -> bool {
        match self {
            Self::Eq(field, value) => fields.get(field) == Some(value),
            Self::In(field, values) => fields.get(field).is_some_and(|v| values.contains(v)),
            Self::Lt(field, bound) => fields
                .get(field)
                .and_then(|v| compare_values(v, bound))
                .is_some_and(|ord| ord == Ordering::Less),
        }
    }
}

/// Order two values of the same kind. Strings that both parse as RFC 3339
/// timestamps compare chronologically.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => match (parse_timestamp(a), parse_timestamp(b)) {
            (Some(ta), Some(tb)) => Some(ta.cmp(&tb)),
            _ => Some(x.cmp(y)),
        },
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Query over the documents directly inside one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    collection: CollectionPath,
    filters: Vec<Filter>,
    limit: Option<usize>,
}

impl Query {
    pub fn new(collection: CollectionPath) -> Self {
        Self {
            collection,
            filters: Vec::new(),
            limit: None,
        }
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq(field.into(), value.into()));
        self
    }

    pub fn where_in<I, V>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.filters.push(Filter::In(field.into(), values));
        self
    }

    pub fn where_lt(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Lt(field.into(), value.into()));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn collection(&self) -> &CollectionPath {
        &self.collection
    }

    pub fn max_results(&self) -> Option<usize> {
        self.limit
    }

    pub fn matches(&self, fields: &Fields) -> bool {
        self.filters.iter().all(|f| f.matches(fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn combines_filters() {
        let query = Query::new(CollectionPath::root("violations"))
            .where_eq("status", "reported")
            .where_in("type", ["fire_lane", "parking"])
            .where_lt("createdAt", "2024-01-01T10:00:00.000Z");

        let hit = fields(json!({
            "status": "reported",
            "type": "parking",
            "createdAt": "2024-01-01T09:54:00.000Z"
        }));
        let too_new = fields(json!({
            "status": "reported",
            "type": "parking",
            "createdAt": "2024-01-01T10:01:00.000Z"
        }));
        let wrong_type = fields(json!({
            "status": "reported",
            "type": "noise",
            "createdAt": "2024-01-01T09:00:00.000Z"
        }));

        assert!(query.matches(&hit));
        assert!(!query.matches(&too_new));
        assert!(!query.matches(&wrong_type));
    }

    #[test]
    fn timestamps_compare_across_offsets() {
        let bound = json!("2024-01-01T10:00:00Z");
        let earlier_with_offset = json!("2024-01-01T11:30:00+02:00");
        assert_eq!(
            compare_values(&earlier_with_offset, &bound),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn missing_field_never_matches_lt() {
        let query = Query::new(CollectionPath::root("c")).where_lt("createdAt", 10);
        assert!(!query.matches(&Fields::new()));
    }
}
