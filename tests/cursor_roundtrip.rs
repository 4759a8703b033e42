//! Cursor round trips through realistic ordering keys (spec §4.4
//! Pagination: `decode(encode(orderingKey(r))) == orderingKey(r)`), using
//! values shaped the way [`pg_graphkit::sql::convert::value_from_text`]
//! actually produces them off a live row rather than hand-built `Value`s.

mod support;

use pg_graphkit::common::Value;
use pg_graphkit::sql::convert::value_from_text;
use pg_graphkit::sql::{decode_cursor, encode_cursor, OrderingKey};
use support::customers_orders_catalog;

#[test]
fn round_trips_a_multi_column_ordering_key() {
    let catalog = customers_orders_catalog();
    let customers = catalog.table("customers").unwrap();

    let id = value_from_text(Some("42"), &customers.column("id").unwrap().col_type, &catalog);
    let created_at = value_from_text(
        Some("2026-07-28 10:15:00+00"),
        &customers.column("created_at").unwrap().col_type,
        &catalog,
    );
    let key: OrderingKey = vec![("created_at".to_string(), created_at), ("id".to_string(), id)];

    let cursor = encode_cursor(&key);
    let decoded = decode_cursor(&cursor).expect("decodes");
    assert_eq!(decoded, key);
}

#[test]
fn round_trips_a_null_ordering_component() {
    let catalog = customers_orders_catalog();
    let orders = catalog.table("orders").unwrap();
    let placed_at = value_from_text(None, &orders.column("placed_at").unwrap().col_type, &catalog);
    assert_eq!(placed_at, Value::Null);

    let key: OrderingKey = vec![("placed_at".to_string(), placed_at), ("id".to_string(), Value::Int(7))];
    let decoded = decode_cursor(&encode_cursor(&key)).expect("decodes");
    assert_eq!(decoded, key);
}

#[test]
fn two_rows_with_different_keys_never_encode_to_the_same_cursor() {
    let a: OrderingKey = vec![("id".to_string(), Value::Int(1))];
    let b: OrderingKey = vec![("id".to_string(), Value::Int(2))];
    assert_ne!(encode_cursor(&a), encode_cursor(&b));
}

#[test]
fn malformed_cursors_are_rejected_as_argument_errors_not_panics() {
    assert!(decode_cursor("not valid base64!!!").is_err());
    // "aGVsbG8=" is valid base64 ("hello") but not the JSON array shape
    // `encode_cursor` produces.
    assert!(decode_cursor("aGVsbG8=").is_err());
}
