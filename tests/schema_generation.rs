//! Schema generation is a pure function of `(catalog, privileges)` (spec
//! §3 Lifecycle, §4.3 Generator rules): same inputs must produce the same
//! SDL, and write fields must only appear when the role holds the
//! matching grant (spec §4.2).

mod support;

use std::collections::HashSet;

use pg_graphkit::common::RolePrivileges;
use pg_graphkit::schema::build_schema;
use support::customers_orders_catalog;

#[test]
fn generation_is_deterministic_for_the_same_catalog_and_role() {
    let catalog = customers_orders_catalog();
    let first = build_schema(&catalog, None).expect("schema builds").sdl();
    let second = build_schema(&catalog, None).expect("schema builds").sdl();
    assert_eq!(first, second);
}

#[test]
fn every_table_gets_a_singular_and_connection_query_field() {
    let catalog = customers_orders_catalog();
    let sdl = build_schema(&catalog, None).expect("schema builds").sdl();
    assert!(sdl.contains("customers"));
    assert!(sdl.contains("orders"));
    assert!(sdl.contains("customers_Connection"));
    assert!(sdl.contains("orders_Connection"));
}

#[test]
fn mutation_fields_are_emitted_unconditionally_when_role_based_security_is_off() {
    let catalog = customers_orders_catalog();
    let sdl = build_schema(&catalog, None).expect("schema builds").sdl();
    assert!(sdl.contains("createCustomers"));
    assert!(sdl.contains("updateCustomers"));
    assert!(sdl.contains("deleteCustomers"));
}

#[test]
fn mutation_fields_are_gated_by_the_role_privileges_passed_in() {
    let catalog = customers_orders_catalog();

    let mut read_only = RolePrivileges::default();
    read_only.selectable_tables = HashSet::from(["customers".to_string(), "orders".to_string()]);
    let sdl = build_schema(&catalog, Some(&read_only)).expect("schema builds").sdl();
    assert!(!sdl.contains("createCustomers"));
    assert!(!sdl.contains("deleteCustomers"));

    let mut writer = read_only.clone();
    writer.insertable_tables = HashSet::from(["customers".to_string()]);
    let sdl = build_schema(&catalog, Some(&writer)).expect("schema builds").sdl();
    assert!(sdl.contains("createCustomers"));
    assert!(!sdl.contains("createOrders"));
}

#[test]
fn enum_columns_produce_a_named_enum_type() {
    let catalog = customers_orders_catalog();
    let sdl = build_schema(&catalog, None).expect("schema builds").sdl();
    assert!(sdl.contains("enum CustomerStatus") || sdl.contains("CustomerStatus"));
}

#[test]
fn a_table_named_after_a_custom_type_is_a_schema_error() {
    use pg_graphkit::common::Column as Col;
    use pg_graphkit::common::ColumnType as ColTy;
    use pg_graphkit::common::Table as Tbl;

    let mut catalog = customers_orders_catalog();
    // `enum_type_name("customer_status")` pascal-cases to `CustomerStatus`;
    // a table literally named that collides with the already-reflected
    // `customer_status` enum (spec §4.3 "name collisions ... must be
    // reported as an error").
    catalog.tables.push(Tbl {
        name: "CustomerStatus".into(),
        schema: "public".into(),
        is_view: false,
        columns: vec![Col::new("id", ColTy::Int4, false, 1).as_primary_key()],
        foreign_keys: vec![],
    });
    let result = build_schema(&catalog, None);
    assert!(result.is_err(), "colliding table/custom-type names must be rejected (spec §4.3)");
}
