//! C5 — bidirectional value conversion between PostgreSQL's textual wire
//! representation and GraphQL-shaped [`Value`]s (spec §4.4 Row projection).
//!
//! The query executor always requests column values cast to `text` in the
//! `SELECT` list (see [`crate::query::executor`]) so this module has one
//! input shape to parse — PostgreSQL's canonical text format — rather than
//! a `FromSql` impl per possible driver representation. That keeps the
//! parsing pure and unit-testable without a live connection, the same way
//! the teacher keeps WAL record (de)serialization as plain functions over
//! bytes (`src/transaction/wal.rs`) instead of scattering it through the
//! storage engine.

use crate::common::{Catalog, ColumnType, Value};

/// Parses one column's raw text value (or `None` for SQL NULL) according
/// to its catalog type.
pub fn value_from_text(raw: Option<&str>, col_type: &ColumnType, catalog: &Catalog) -> Value {
    let Some(raw) = raw else {
        return Value::Null;
    };
    match col_type {
        ColumnType::Boolean => Value::Bool(raw == "t" || raw == "true"),
        ColumnType::Int2 | ColumnType::Int4 | ColumnType::Int8 | ColumnType::Serial => {
            raw.parse::<i64>().map(Value::Int).unwrap_or_else(|_| Value::Text(raw.to_string()))
        }
        ColumnType::Real | ColumnType::Double | ColumnType::Numeric => {
            raw.parse::<f64>().map(Value::Float).unwrap_or_else(|_| Value::Text(raw.to_string()))
        }
        ColumnType::Json | ColumnType::Jsonb => {
            serde_json::from_str(raw).map(Value::Json).unwrap_or_else(|_| Value::Text(raw.to_string()))
        }
        ColumnType::Bytea => Value::Bytes(raw.trim_start_matches("\\x").to_string()),
        ColumnType::Composite((schema, name)) => {
            match catalog.composite_by_name(&(schema.clone(), name.clone()), name) {
                Some(composite) => parse_composite_literal(raw, &composite.attributes, catalog),
                None => Value::Text(raw.to_string()),
            }
        }
        ColumnType::Array(inner) => {
            let elements = parse_array_literal(raw);
            Value::Array(
                elements
                    .into_iter()
                    .map(|el| match el {
                        Some(text) => value_from_text(Some(&text), inner, catalog),
                        None => Value::Null,
                    })
                    .collect(),
            )
        }
        // Enum labels, free text, and every canonical-string type (dates,
        // times, intervals, network addresses, xml, opaque/unknown) pass
        // through as-is (spec §4.4: "Intervals, timetz, timestamptz are
        // returned as strings in their canonical ISO/Postgres form").
        _ => Value::Text(raw.to_string()),
    }
}

/// Parses PostgreSQL's `(f1,f2,...)` composite text literal into a
/// [`Value::Composite`] keyed by attribute name in catalog attribute order
/// (spec §4.4). Embedded commas inside quotes or nested parens are
/// respected.
pub fn parse_composite_literal(
    text: &str,
    attrs: &[crate::common::CompositeAttribute],
    catalog: &Catalog,
) -> Value {
    let inner = strip_wrapper(text, '(', ')');
    let parts = split_top_level(inner, ',');
    let mut fields = Vec::with_capacity(attrs.len());
    for (i, attr) in attrs.iter().enumerate() {
        let raw = parts.get(i).cloned().unwrap_or(None);
        let value = match raw {
            Some(s) => value_from_text(Some(&s), &attr.col_type, catalog),
            None => Value::Null,
        };
        fields.push((attr.name.clone(), value));
    }
    Value::Composite(fields)
}

/// Parses PostgreSQL's `{e1,e2,...}` array text literal into raw
/// (unquoted, unescaped) element strings, `None` for the literal `NULL`.
pub fn parse_array_literal(text: &str) -> Vec<Option<String>> {
    let inner = strip_wrapper(text, '{', '}');
    if inner.is_empty() {
        return Vec::new();
    }
    split_top_level(inner, ',')
}

fn strip_wrapper(text: &str, open: char, close: char) -> &str {
    let text = text.trim();
    if text.starts_with(open) && text.ends_with(close) && text.len() >= 2 {
        &text[1..text.len() - 1]
    } else {
        text
    }
}

/// Splits on `delim` at nesting depth zero, respecting double-quoted
/// spans and nested `(...)`/`{...}` groups, then unescapes/unquotes each
/// part. An unquoted empty part is PostgreSQL's NULL marker.
fn split_top_level(s: &str, delim: char) -> Vec<Option<String>> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_quotes = false;
    let mut cur = String::new();
    let mut cur_was_quoted = false;
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '\\' {
                if let Some(&next) = chars.peek() {
                    cur.push(next);
                    chars.next();
                    continue;
                }
            }
            if c == '"' {
                in_quotes = false;
            } else {
                cur.push(c);
            }
            continue;
        }
        match c {
            '"' => {
                in_quotes = true;
                cur_was_quoted = true;
            }
            '(' | '{' => {
                depth += 1;
                cur.push(c);
            }
            ')' | '}' => {
                depth -= 1;
                cur.push(c);
            }
            c if c == delim && depth == 0 => {
                parts.push(finish_part(&cur, cur_was_quoted));
                cur.clear();
                cur_was_quoted = false;
            }
            _ => cur.push(c),
        }
    }
    parts.push(finish_part(&cur, cur_was_quoted));
    parts
}

fn finish_part(raw: &str, was_quoted: bool) -> Option<String> {
    if !was_quoted && (raw.is_empty() || raw.eq_ignore_ascii_case("null")) {
        None
    } else {
        Some(raw.to_string())
    }
}

/// Converts a [`Value`] into a `serde_json::Value` with proper JSON typing
/// (numbers as numbers, booleans as booleans, composites as objects) for
/// handing to `async_graphql::Value::from_json`.
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::Number((*i).into()),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Text(s) | Value::Bytes(s) => serde_json::Value::String(s.clone()),
        Value::Json(v) => v.clone(),
        Value::Array(items) => serde_json::Value::Array(items.iter().map(value_to_json).collect()),
        Value::Composite(fields) => {
            serde_json::Value::Object(fields.iter().map(|(k, v)| (k.clone(), value_to_json(v))).collect())
        }
    }
}

/// Converts a `serde_json::Value` into a [`Value`], the inverse of
/// [`value_to_json`]. Used by cursor decoding and by GraphQL argument
/// parsing, both of which land on a JSON tree before it can be typed
/// against a column (the binder does that typing at bind time).
pub fn json_to_value(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or_default())
            }
        }
        serde_json::Value::String(s) => Value::Text(s),
        serde_json::Value::Array(items) => Value::Array(items.into_iter().map(json_to_value).collect()),
        serde_json::Value::Object(map) => {
            Value::Composite(map.into_iter().map(|(k, v)| (k, json_to_value(v))).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::CompositeAttribute;

    #[test]
    fn parses_integer_text() {
        let catalog = Catalog::default();
        let v = value_from_text(Some("42"), &ColumnType::Int4, &catalog);
        assert_eq!(v, Value::Int(42));
    }

    #[test]
    fn null_raw_is_value_null() {
        let catalog = Catalog::default();
        let v = value_from_text(None, &ColumnType::Int4, &catalog);
        assert_eq!(v, Value::Null);
    }

    #[test]
    fn parses_int_array_literal() {
        let catalog = Catalog::default();
        let v = value_from_text(
            Some("{1,5,12}"),
            &ColumnType::Array(Box::new(ColumnType::Int4)),
            &catalog,
        );
        assert_eq!(v, Value::Array(vec![Value::Int(1), Value::Int(5), Value::Int(12)]));
    }

    #[test]
    fn parses_composite_literal_simple_fields() {
        let catalog = Catalog::default();
        let attrs = vec![
            CompositeAttribute { name: "street".into(), col_type: ColumnType::Text, nullable: true },
            CompositeAttribute { name: "city".into(), col_type: ColumnType::Text, nullable: true },
        ];
        let v = parse_composite_literal("(123 Main St,NYC)", &attrs, &catalog);
        match v {
            Value::Composite(fields) => {
                assert_eq!(fields[0], ("street".to_string(), Value::Text("123 Main St".to_string())));
                assert_eq!(fields[1], ("city".to_string(), Value::Text("NYC".to_string())));
            }
            other => panic!("expected composite, got {other:?}"),
        }
    }

    #[test]
    fn composite_field_with_embedded_comma_is_respected() {
        let catalog = Catalog::default();
        let attrs = vec![CompositeAttribute { name: "a".into(), col_type: ColumnType::Text, nullable: true }];
        let v = parse_composite_literal("(\"x,y\")", &attrs, &catalog);
        match v {
            Value::Composite(fields) => {
                assert_eq!(fields[0].1, Value::Text("x,y".to_string()));
            }
            other => panic!("expected composite, got {other:?}"),
        }
    }

    #[test]
    fn bytea_is_hex_without_backslash_x_prefix() {
        let catalog = Catalog::default();
        let v = value_from_text(Some("\\xdeadbeef"), &ColumnType::Bytea, &catalog);
        assert_eq!(v, Value::Bytes("deadbeef".to_string()));
    }

    #[test]
    fn json_parses_into_structured_value() {
        let catalog = Catalog::default();
        let v = value_from_text(Some("{\"a\":1}"), &ColumnType::Jsonb, &catalog);
        match v {
            Value::Json(j) => assert_eq!(j["a"], 1),
            other => panic!("expected json, got {other:?}"),
        }
    }

    #[test]
    fn value_to_json_turns_composite_into_object() {
        let value = Value::Composite(vec![("x".into(), Value::Int(1))]);
        assert_eq!(value_to_json(&value), serde_json::json!({"x": 1}));
    }
}
