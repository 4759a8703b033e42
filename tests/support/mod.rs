//! Shared fixtures for the integration tests — a small two-table catalog
//! (`customers` referenced by `orders`) standing in for a reflected
//! database without a live connection.

use pg_graphkit::common::{Catalog, Column, ColumnType, EnumType, ForeignKey, Table};

pub fn customers_orders_catalog() -> Catalog {
    let customers = Table {
        name: "customers".into(),
        schema: "public".into(),
        is_view: false,
        columns: vec![
            Column::new("id", ColumnType::Int4, false, 1).as_primary_key(),
            Column::new("name", ColumnType::Text, false, 2),
            Column::new("status", ColumnType::Enum(("public".into(), "customer_status".into())), false, 3),
            Column::new("created_at", ColumnType::TimestampTz, false, 4).with_default(true),
        ],
        foreign_keys: vec![],
    };

    let orders = Table {
        name: "orders".into(),
        schema: "public".into(),
        is_view: false,
        columns: vec![
            Column::new("id", ColumnType::Int4, false, 1).as_primary_key(),
            Column::new("customer_id", ColumnType::Int4, false, 2),
            Column::new("total_cents", ColumnType::Int8, false, 3),
            Column::new("placed_at", ColumnType::TimestampTz, true, 4),
        ],
        foreign_keys: vec![ForeignKey {
            column: "customer_id".into(),
            referenced_table: "customers".into(),
            referenced_column: "id".into(),
        }],
    };

    Catalog {
        schema: "public".into(),
        tables: vec![customers, orders],
        enums: vec![EnumType {
            schema: "public".into(),
            name: "customer_status".into(),
            labels: vec!["active".into(), "suspended".into()],
        }],
        composites: vec![],
        domains: vec![],
        snapshot_id: 1,
    }
}
