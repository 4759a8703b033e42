//! Filter-tree-to-SQL lowering across conjunctions, disjunctions, and the
//! JSON operator family (spec §4.4). Inline unit tests in `sql::filter`
//! already cover single predicates; these exercise the full binder/filter
//! pairing the way `query::fetch_flat` actually calls it.

use pg_graphkit::common::{ColumnType, Value};
use pg_graphkit::sql::{FieldFilter, FilterOp, FilterTree, ParamBinder};

#[test]
fn conjunction_joins_predicates_with_and() {
    let mut binder = ParamBinder::new();
    let tree = FilterTree {
        predicates: vec![
            FieldFilter { column: "status".into(), op: FilterOp::Eq, value: Some(Value::Text("active".into())), col_type: ColumnType::Text },
            FieldFilter { column: "total_cents".into(), op: FilterOp::Gte, value: Some(Value::Int(1000)), col_type: ColumnType::Int8 },
        ],
        or: vec![],
    };
    let sql = tree.to_sql(&mut binder).expect("lowers");
    assert_eq!(sql, "\"status\" = $1 AND \"total_cents\" >= $2");
    assert_eq!(binder.len(), 2);
}

#[test]
fn or_branches_are_each_parenthesized_and_joined_by_or() {
    let mut binder = ParamBinder::new();
    let tree = FilterTree {
        predicates: vec![FieldFilter {
            column: "id".into(),
            op: FilterOp::Neq,
            value: Some(Value::Int(0)),
            col_type: ColumnType::Int4,
        }],
        or: vec![
            FilterTree {
                predicates: vec![FieldFilter {
                    column: "status".into(),
                    op: FilterOp::Eq,
                    value: Some(Value::Text("active".into())),
                    col_type: ColumnType::Text,
                }],
                or: vec![],
            },
            FilterTree {
                predicates: vec![FieldFilter {
                    column: "status".into(),
                    op: FilterOp::Eq,
                    value: Some(Value::Text("suspended".into())),
                    col_type: ColumnType::Text,
                }],
                or: vec![],
            },
        ],
    };
    let sql = tree.to_sql(&mut binder).expect("lowers");
    assert_eq!(sql, "(\"id\" <> $1) OR (\"status\" = $2) OR (\"status\" = $3)");
    assert_eq!(binder.len(), 3);
}

#[test]
fn is_null_and_is_not_null_take_no_bound_parameter() {
    let mut binder = ParamBinder::new();
    let tree = FilterTree {
        predicates: vec![FieldFilter {
            column: "placed_at".into(),
            op: FilterOp::IsNull,
            value: None,
            col_type: ColumnType::TimestampTz,
        }],
        or: vec![],
    };
    let sql = tree.to_sql(&mut binder).expect("lowers");
    assert_eq!(sql, "\"placed_at\" IS NULL");
    assert!(binder.is_empty());
}

#[test]
fn in_lowers_to_any_over_a_bound_array() {
    let mut binder = ParamBinder::new();
    let tree = FilterTree {
        predicates: vec![FieldFilter {
            column: "id".into(),
            op: FilterOp::In,
            value: Some(Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3)])),
            col_type: ColumnType::Int4,
        }],
        or: vec![],
    };
    let sql = tree.to_sql(&mut binder).expect("lowers");
    assert_eq!(sql, "\"id\" = ANY($1::int4[])");
}

#[test]
fn json_has_key_lowers_to_the_jsonb_operator() {
    let mut binder = ParamBinder::new();
    let tree = FilterTree {
        predicates: vec![FieldFilter {
            column: "attrs".into(),
            op: FilterOp::HasKey,
            value: Some(Value::Text("color".into())),
            col_type: ColumnType::Jsonb,
        }],
        or: vec![],
    };
    let sql = tree.to_sql(&mut binder).expect("lowers");
    assert_eq!(sql, "\"attrs\" ? $1");
}

#[test]
fn an_operator_missing_its_required_value_is_an_argument_error() {
    let mut binder = ParamBinder::new();
    let tree = FilterTree {
        predicates: vec![FieldFilter { column: "id".into(), op: FilterOp::Eq, value: None, col_type: ColumnType::Int4 }],
        or: vec![],
    };
    assert!(tree.to_sql(&mut binder).is_err());
}

#[test]
fn empty_tree_lowers_to_true() {
    let mut binder = ParamBinder::new();
    let tree = FilterTree::default();
    assert!(tree.is_empty());
    assert_eq!(tree.to_sql(&mut binder).expect("lowers"), "TRUE");
    assert!(binder.is_empty());
}
