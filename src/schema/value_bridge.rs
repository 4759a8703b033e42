//! Bidirectional conversion between [`crate::common::Value`] and
//! `async_graphql::Value` (spec §4.4/§4.5: the gateway converts row data to
//! GraphQL-shaped values on read and GraphQL input back to typed column
//! values on write). Kept as two small free functions rather than a
//! `serde_json` round-trip so integers and floats never get mixed up
//! crossing the boundary twice.

use async_graphql::{Name, Number, Value as GqlValue};

use crate::common::Value;

/// Converts a resolved row/scalar [`Value`] into the `async_graphql::Value`
/// handed back to the client.
pub fn to_gql(value: &Value) -> GqlValue {
    match value {
        Value::Null => GqlValue::Null,
        Value::Bool(b) => GqlValue::Boolean(*b),
        Value::Int(i) => GqlValue::Number(Number::from(*i)),
        Value::Float(f) => Number::from_f64(*f).map(GqlValue::Number).unwrap_or(GqlValue::Null),
        Value::Text(s) | Value::Bytes(s) => GqlValue::String(s.clone()),
        Value::Json(j) => GqlValue::from_json(j.clone()).unwrap_or(GqlValue::Null),
        Value::Array(items) => GqlValue::List(items.iter().map(to_gql).collect()),
        Value::Composite(fields) => {
            GqlValue::Object(fields.iter().map(|(k, v)| (Name::new(k), to_gql(v))).collect())
        }
    }
}

/// Converts a client-supplied `async_graphql::Value` into the gateway's
/// internal [`Value`], the inverse used by filter/mutation argument parsing
/// (spec §4.4/§4.5). GraphQL enums arrive as bare names and are treated as
/// text — the binder applies the `::type` cast when it knows the column is
/// an enum.
pub fn from_gql(value: &GqlValue) -> Value {
    match value {
        GqlValue::Null => Value::Null,
        GqlValue::Boolean(b) => Value::Bool(*b),
        GqlValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else if let Some(f) = n.as_f64() {
                Value::Float(f)
            } else {
                Value::Null
            }
        }
        GqlValue::String(s) => Value::Text(s.clone()),
        GqlValue::Enum(name) => Value::Text(name.to_string()),
        GqlValue::Binary(bytes) => Value::Bytes(hex::encode(bytes.as_ref())),
        GqlValue::List(items) => Value::Array(items.iter().map(from_gql).collect()),
        GqlValue::Object(map) => {
            Value::Composite(map.iter().map(|(k, v)| (k.to_string(), from_gql(v))).collect())
        }
        GqlValue::Upload(_) => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_round_trips_as_number() {
        let v = Value::Int(42);
        let gql = to_gql(&v);
        assert_eq!(from_gql(&gql), v);
    }

    #[test]
    fn composite_round_trips_as_object() {
        let v = Value::Composite(vec![("street".into(), Value::Text("Main".into()))]);
        let gql = to_gql(&v);
        match &gql {
            GqlValue::Object(map) => assert_eq!(map.get(&Name::new("street")), Some(&GqlValue::String("Main".into()))),
            other => panic!("expected object, got {other:?}"),
        }
        assert_eq!(from_gql(&gql), v);
    }

    #[test]
    fn array_round_trips_as_list() {
        let v = Value::Array(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(from_gql(&to_gql(&v)), v);
    }
}
