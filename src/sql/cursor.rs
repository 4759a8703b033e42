//! Relay cursor encode/decode (spec §4.4 Pagination).
//!
//! A cursor is the base64 encoding of the JSON-encoded tuple of
//! ordering-key values for a row, keyed by column name and kept in
//! ordering-column order so the same cursor can be used to re-seek
//! regardless of which direction the page was read in. Property tested:
//! `decode(encode(orderingKey(r))) == orderingKey(r)`.

use crate::common::Value;
use crate::error::{GatewayError, Result};
use crate::sql::convert::json_to_value;
use base64::{engine::general_purpose::STANDARD, Engine as _};

/// One column's contribution to a row's ordering key, in ordering-column
/// order.
pub type OrderingKey = Vec<(String, Value)>;

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct CursorEntry {
    column: String,
    value: serde_json::Value,
}

/// Encodes an ordering key into an opaque cursor string.
pub fn encode_cursor(key: &OrderingKey) -> String {
    let entries: Vec<CursorEntry> = key
        .iter()
        .map(|(column, value)| CursorEntry { column: column.clone(), value: crate::sql::convert::value_to_json(value) })
        .collect();
    let json = serde_json::to_vec(&entries).expect("cursor entries always serialize");
    STANDARD.encode(json)
}

/// Decodes a cursor string back into its ordering key, preserving column
/// order. Fails with [`GatewayError::Argument`] on malformed input rather
/// than panicking, since cursors are client-supplied.
pub fn decode_cursor(cursor: &str) -> Result<OrderingKey> {
    let bytes = STANDARD
        .decode(cursor)
        .map_err(|_| GatewayError::argument("cursor is not valid base64"))?;
    let entries: Vec<CursorEntry> =
        serde_json::from_slice(&bytes).map_err(|_| GatewayError::argument("cursor payload is malformed"))?;
    Ok(entries
        .into_iter()
        .map(|entry| (entry.column, json_to_value(entry.value)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_single_column_key() {
        let key: OrderingKey = vec![("id".to_string(), Value::Int(42))];
        let cursor = encode_cursor(&key);
        let decoded = decode_cursor(&cursor).unwrap();
        assert_eq!(decoded, key);
    }

    #[test]
    fn round_trips_a_composite_ordering_key() {
        let key: OrderingKey =
            vec![("created_at".to_string(), Value::Text("2024-01-01T00:00:00Z".into())), ("id".to_string(), Value::Int(7))];
        let cursor = encode_cursor(&key);
        let decoded = decode_cursor(&cursor).unwrap();
        assert_eq!(decoded, key);
    }

    #[test]
    fn cursor_is_opaque_base64_not_plain_json() {
        let key: OrderingKey = vec![("id".to_string(), Value::Int(1))];
        let cursor = encode_cursor(&key);
        assert!(!cursor.contains('{'));
        assert!(STANDARD.decode(&cursor).is_ok());
    }

    #[test]
    fn malformed_cursor_is_an_argument_error() {
        let err = decode_cursor("not-base64!!").unwrap_err();
        assert_eq!(err.code(), "ARGUMENT_ERROR");
    }

    #[test]
    fn truncated_base64_payload_is_an_argument_error() {
        let err = decode_cursor(&STANDARD.encode(b"not json")).unwrap_err();
        assert_eq!(err.code(), "ARGUMENT_ERROR");
    }
}
