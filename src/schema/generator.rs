//! C3 — Schema Generator orchestration (spec §4.3): walks a reflected
//! [`Catalog`] and assembles the three dynamic root types, the argument
//! parsers that turn `ctx.args` into the executors' typed inputs, and a
//! `(snapshot-id, role)`-keyed cache over the assembled [`Schema`] (SPEC_FULL
//! §B). [`crate::schema::types`] builds individual GraphQL types; this module
//! decides which tables get which fields and wires their resolvers to
//! [`crate::query`] and [`crate::mutation`].
//!
//! Argument parsing converts a `ValueAccessor` to `serde_json::Value` one
//! variant at a time rather than through a single combinator, the same
//! manual fallthrough the postrust example uses in its own handler
//! (`crates/postrust-graphql/src/handler.rs`) — dynamic-schema values have no
//! static type to pattern match on, so each accessor method is tried in turn
//! and the first one that succeeds wins.

use std::collections::HashMap;
use std::sync::Arc;

use async_graphql::dynamic::{
    Field, FieldFuture, FieldValue, InputValue, Object, Schema, Subscription, SubscriptionField,
    SubscriptionFieldFuture, TypeRef, ValueAccessor,
};
use dashmap::DashMap;

use crate::common::{Catalog, Column, ColumnType, RolePrivileges, Table, Value};
use crate::error::{GatewayError, Result};
use crate::mutation::{InputMap, RelationRef};
use crate::schema::naming;
use crate::schema::registry::TypeRegistry;
use crate::schema::state::{GatewayState, RequestRole};
use crate::schema::types;
use crate::sql::{FieldFilter, FilterOp, FilterTree, OrderByEntry, SortDirection};

const MAX_QUERY_DEPTH: usize = 12;
const MAX_QUERY_COMPLEXITY: usize = 1000;

/// Converts one GraphQL argument value into `serde_json::Value`, trying each
/// accessor method in turn since a dynamic-schema `ValueAccessor` carries no
/// static type information (spec §4.4 argument parsing).
fn accessor_to_json(accessor: &ValueAccessor<'_>) -> serde_json::Value {
    if accessor.is_null() {
        serde_json::Value::Null
    } else if let Ok(b) = accessor.boolean() {
        serde_json::Value::Bool(b)
    } else if let Ok(i) = accessor.i64() {
        serde_json::Value::Number(i.into())
    } else if let Ok(f) = accessor.f64() {
        serde_json::Number::from_f64(f).map(serde_json::Value::Number).unwrap_or(serde_json::Value::Null)
    } else if let Ok(s) = accessor.string() {
        serde_json::Value::String(s.to_string())
    } else if let Ok(list) = accessor.list() {
        serde_json::Value::Array(list.iter().map(|v| accessor_to_json(&v)).collect())
    } else if let Ok(obj) = accessor.object() {
        let map: serde_json::Map<String, serde_json::Value> =
            obj.iter().map(|(k, v)| (k.to_string(), accessor_to_json(&v))).collect();
        serde_json::Value::Object(map)
    } else {
        serde_json::Value::Null
    }
}

fn accessor_to_value(accessor: &ValueAccessor<'_>) -> Value {
    crate::sql::json_to_value(accessor_to_json(accessor))
}

/// Reorders a parsed composite's fields to catalog attribute order. A
/// GraphQL input object's fields arrive in client argument order, but
/// `sql::binder::serialize_composite` writes the `(v1,v2,...)` row literal
/// positionally — the two must agree, or values silently land in the wrong
/// column (spec §4.5 composite write contract).
fn normalize_value_order(value: Value, col_type: &ColumnType, catalog: &Catalog) -> Value {
    match (value, col_type) {
        (Value::Array(items), ColumnType::Array(elem)) => {
            Value::Array(items.into_iter().map(|v| normalize_value_order(v, elem, catalog)).collect())
        }
        (Value::Composite(fields), ColumnType::Composite(q)) => match catalog.composite_by_name(q, &q.1) {
            Some(composite) => {
                let mut by_name: HashMap<String, Value> = fields.into_iter().collect();
                let ordered = composite
                    .attributes
                    .iter()
                    .map(|attr| {
                        let v = by_name.remove(&attr.name).unwrap_or(Value::Null);
                        (attr.name.clone(), normalize_value_order(v, &attr.col_type, catalog))
                    })
                    .collect();
                Value::Composite(ordered)
            }
            None => Value::Composite(fields),
        },
        (other, _) => other,
    }
}

/// Builds an [`InputMap`] from an object-typed argument accessor, reordering
/// any composite-valued fields to catalog attribute order as it goes.
fn input_map_from_accessor(accessor: &ValueAccessor<'_>, table: &Table, catalog: &Catalog) -> Result<InputMap> {
    let obj = accessor.object().map_err(|e| GatewayError::argument(e.message))?;
    let mut map = InputMap::new();
    for (name, value_accessor) in obj.iter() {
        let key = name.to_string();
        let mut value = accessor_to_value(&value_accessor);
        if let Some(col) = table.column(&key) {
            value = normalize_value_order(value, &col.col_type, catalog);
        }
        map.insert(key, value);
    }
    Ok(map)
}

/// Parses a `T_RelationCreateInput` argument into the three pieces
/// [`crate::mutation::create_with_relations`] expects (spec §4.5 "create
/// with relationships"): the primary row's own fields, a connect-or-create
/// choice per outgoing FK, and a create-many batch per incoming FK.
fn parse_relation_create_input(
    accessor: &ValueAccessor<'_>,
    table: &Table,
    catalog: &Catalog,
) -> Result<(InputMap, HashMap<String, RelationRef>, HashMap<String, Vec<InputMap>>)> {
    let obj = accessor.object().map_err(|e| GatewayError::argument(e.message))?;
    let mut fields = InputMap::new();
    let mut relations = HashMap::new();
    let mut child_create_many = HashMap::new();

    for (name, value_accessor) in obj.iter() {
        let key = name.to_string();

        if let Some(fk) = table.foreign_keys.iter().find(|fk| key == format!("{}Connect", fk.column)) {
            let referenced = catalog
                .table(&fk.referenced_table)
                .ok_or_else(|| GatewayError::schema(format!("unknown table `{}`", fk.referenced_table)))?;
            let nested = input_map_from_accessor(&value_accessor, referenced, catalog)?;
            relations.insert(fk.column.clone(), RelationRef::Connect(nested));
            continue;
        }
        if let Some(fk) = table.foreign_keys.iter().find(|fk| key == format!("{}Create", fk.column)) {
            let referenced = catalog
                .table(&fk.referenced_table)
                .ok_or_else(|| GatewayError::schema(format!("unknown table `{}`", fk.referenced_table)))?;
            let nested = input_map_from_accessor(&value_accessor, referenced, catalog)?;
            relations.insert(fk.column.clone(), RelationRef::Create(nested));
            continue;
        }
        if let Some(referencing) =
            catalog.reverse_references(&table.name).into_iter().find(|r| key == format!("{}CreateMany", r.name))
        {
            let list = value_accessor.list().map_err(|e| GatewayError::argument(e.message))?;
            let mut children = Vec::with_capacity(list.len());
            for item in list.iter() {
                children.push(input_map_from_accessor(&item, referencing, catalog)?);
            }
            child_create_many.insert(referencing.name.clone(), children);
            continue;
        }

        let mut value = accessor_to_value(&value_accessor);
        if let Some(col) = table.column(&key) {
            value = normalize_value_order(value, &col.col_type, catalog);
        }
        fields.insert(key, value);
    }

    Ok((fields, relations, child_create_many))
}

/// Parses a `T_Filter` argument into a [`FilterTree`] (spec §4.4): one
/// predicate per populated operator on each column field, plus a recursive
/// `or` list.
fn parse_filter_tree(accessor: &ValueAccessor<'_>, table: &Table) -> Result<FilterTree> {
    let obj = accessor.object().map_err(|e| GatewayError::argument(e.message))?;
    let mut tree = FilterTree::default();

    for (name, value_accessor) in obj.iter() {
        let key = name.to_string();
        if key == "or" {
            let list = value_accessor.list().map_err(|e| GatewayError::argument(e.message))?;
            for item in list.iter() {
                tree.or.push(parse_filter_tree(&item, table)?);
            }
            continue;
        }
        let Some(col) = table.column(&key) else { continue };
        if value_accessor.is_null() {
            continue;
        }
        let filter_obj = value_accessor.object().map_err(|e| GatewayError::argument(e.message))?;
        for (op_name, op_value) in filter_obj.iter() {
            if op_value.is_null() {
                continue;
            }
            let op_name = op_name.to_string();
            if op_name == "isNull" {
                let flag = op_value.boolean().unwrap_or(true);
                tree.predicates.push(FieldFilter {
                    column: col.name.clone(),
                    op: if flag { FilterOp::IsNull } else { FilterOp::IsNotNull },
                    value: None,
                    col_type: col.col_type.clone(),
                });
                continue;
            }
            if op_name == "isNotNull" {
                let flag = op_value.boolean().unwrap_or(true);
                tree.predicates.push(FieldFilter {
                    column: col.name.clone(),
                    op: if flag { FilterOp::IsNotNull } else { FilterOp::IsNull },
                    value: None,
                    col_type: col.col_type.clone(),
                });
                continue;
            }
            let Some(mut op) = FilterOp::from_suffix(&op_name) else { continue };
            if op == FilterOp::Contains && col.col_type.element_type().is_json() {
                op = FilterOp::JsonContains;
            }
            tree.predicates.push(FieldFilter {
                column: col.name.clone(),
                op,
                value: Some(accessor_to_value(&op_value)),
                col_type: col.col_type.clone(),
            });
        }
    }

    Ok(tree)
}

/// Parses the `orderBy: [T_OrderByInput]` argument into an ordered sequence
/// of `(column, direction)` pairs (spec §4.4 Ordering): cross-object
/// precedence follows list position, and within one object, field
/// declaration order (the only orders a GraphQL input object can carry).
fn parse_order_by_arg(accessor: &ValueAccessor<'_>) -> Result<Vec<OrderByEntry>> {
    let list = accessor.list().map_err(|e| GatewayError::argument(e.message))?;
    let mut out = Vec::new();
    for item in list.iter() {
        let obj = item.object().map_err(|e| GatewayError::argument(e.message))?;
        for (name, value) in obj.iter() {
            if value.is_null() {
                continue;
            }
            let direction = match value.enum_name() {
                Ok("DESC") => SortDirection::Desc,
                _ => SortDirection::Asc,
            };
            out.push(OrderByEntry { column: name.to_string(), direction });
        }
    }
    Ok(out)
}

/// One legacy top-level operator argument for a column (spec §4.4 read
/// contract: "optional operator-suffixed arguments (`foo_contains`,
/// `foo_gt`, etc.)"). Mirrors the same per-type operator sets
/// [`types::register_builtin_filter_inputs`] gives each `T_Filter` field, so
/// the flat and nested argument forms never drift apart.
struct LegacyOpArg {
    suffix: &'static str,
    op: FilterOp,
    is_list: bool,
}

const NUMERIC_LIKE_OPS: &[LegacyOpArg] = &[
    LegacyOpArg { suffix: "neq", op: FilterOp::Neq, is_list: false },
    LegacyOpArg { suffix: "gt", op: FilterOp::Gt, is_list: false },
    LegacyOpArg { suffix: "gte", op: FilterOp::Gte, is_list: false },
    LegacyOpArg { suffix: "lt", op: FilterOp::Lt, is_list: false },
    LegacyOpArg { suffix: "lte", op: FilterOp::Lte, is_list: false },
    LegacyOpArg { suffix: "in", op: FilterOp::In, is_list: true },
    LegacyOpArg { suffix: "notIn", op: FilterOp::NotIn, is_list: true },
];

const STRING_OPS: &[LegacyOpArg] = &[
    LegacyOpArg { suffix: "neq", op: FilterOp::Neq, is_list: false },
    LegacyOpArg { suffix: "like", op: FilterOp::Like, is_list: false },
    LegacyOpArg { suffix: "ilike", op: FilterOp::ILike, is_list: false },
    LegacyOpArg { suffix: "contains", op: FilterOp::Contains, is_list: false },
    LegacyOpArg { suffix: "startsWith", op: FilterOp::StartsWith, is_list: false },
    LegacyOpArg { suffix: "endsWith", op: FilterOp::EndsWith, is_list: false },
    LegacyOpArg { suffix: "gt", op: FilterOp::Gt, is_list: false },
    LegacyOpArg { suffix: "gte", op: FilterOp::Gte, is_list: false },
    LegacyOpArg { suffix: "lt", op: FilterOp::Lt, is_list: false },
    LegacyOpArg { suffix: "lte", op: FilterOp::Lte, is_list: false },
    LegacyOpArg { suffix: "in", op: FilterOp::In, is_list: true },
    LegacyOpArg { suffix: "notIn", op: FilterOp::NotIn, is_list: true },
];

const JSON_OPS: &[LegacyOpArg] = &[
    LegacyOpArg { suffix: "hasKey", op: FilterOp::HasKey, is_list: false },
    LegacyOpArg { suffix: "hasKeys", op: FilterOp::HasKeys, is_list: true },
    LegacyOpArg { suffix: "hasAnyKeys", op: FilterOp::HasAnyKeys, is_list: true },
    LegacyOpArg { suffix: "contains", op: FilterOp::JsonContains, is_list: false },
    LegacyOpArg { suffix: "containedBy", op: FilterOp::ContainedBy, is_list: false },
    LegacyOpArg { suffix: "path", op: FilterOp::Path, is_list: true },
    LegacyOpArg { suffix: "pathText", op: FilterOp::PathText, is_list: true },
];

fn legacy_ops_for(col_type: &ColumnType) -> &'static [LegacyOpArg] {
    let t = col_type.element_type();
    if t.is_boolean() {
        &[]
    } else if t.is_json() {
        JSON_OPS
    } else if t.is_numeric() || t.is_temporal() {
        NUMERIC_LIKE_OPS
    } else {
        STRING_OPS
    }
}

/// The flat scalar-equality argument plus every applicable
/// `{column}_{op}`/`{column}_isNull` legacy argument for one column (spec
/// §4.4).
fn legacy_filter_args(col: &Column) -> Vec<(String, TypeRef)> {
    let scalar_name = types::scalar_type_name(&col.col_type);
    let mut out = vec![(col.name.clone(), TypeRef::named(scalar_name.clone()))];
    for entry in legacy_ops_for(&col.col_type) {
        let type_ref =
            if entry.is_list { TypeRef::named_list(scalar_name.clone()) } else { TypeRef::named(scalar_name.clone()) };
        out.push((format!("{}_{}", col.name, entry.suffix), type_ref));
    }
    out.push((format!("{}_isNull", col.name), TypeRef::named(TypeRef::BOOLEAN)));
    out
}

/// Rejects a catalog where a table name collides with a custom type's
/// PascalCased GraphQL name (spec §4.3: "name collisions between table and
/// custom-type are forbidden and must be reported as an error"). Table names
/// are used verbatim as GraphQL type names while enum/composite names are
/// PascalCased, so the only way to collide is for a table's literal name to
/// equal another type's derived name.
fn check_name_collisions(catalog: &Catalog) -> Result<()> {
    let mut table_names: std::collections::HashSet<&str> = catalog.tables.iter().map(|t| t.name.as_str()).collect();
    for table in &catalog.tables {
        if !table_names.insert(table.name.as_str()) {
            return Err(GatewayError::schema(format!("duplicate table name `{}`", table.name)));
        }
    }
    for e in &catalog.enums {
        let derived = naming::enum_type_name(&e.name);
        if table_names.contains(derived.as_str()) {
            return Err(GatewayError::schema(format!(
                "name collision: table `{derived}` collides with enum type `{}`",
                e.name
            )));
        }
    }
    for c in &catalog.composites {
        let derived = naming::composite_type_name(&c.name);
        if table_names.contains(derived.as_str()) {
            return Err(GatewayError::schema(format!(
                "name collision: table `{derived}` collides with composite type `{}`",
                c.name
            )));
        }
    }
    Ok(())
}

/// Downcast target for the `health` field on both the Query and Subscription
/// roots (SPEC_FULL §B: required unconditionally, even on an empty catalog).
#[derive(Clone)]
struct HealthStatus {
    snapshot_id: u64,
    cdc_status: Option<&'static str>,
}

impl HealthStatus {
    fn from_state(state: &GatewayState) -> Self {
        let cdc_status = state.listener.as_ref().map(|l| match l.state() {
            crate::cdc::listener::ListenerState::Stopped => "STOPPED",
            crate::cdc::listener::ListenerState::Starting => "STARTING",
            crate::cdc::listener::ListenerState::Running => "RUNNING",
            crate::cdc::listener::ListenerState::Reconnecting => "RECONNECTING",
        });
        Self { snapshot_id: state.catalog.snapshot_id, cdc_status }
    }
}

fn build_health_status_type() -> Object {
    Object::new("HealthStatus")
        .field(Field::new("status", TypeRef::named_nn(TypeRef::STRING), |_ctx| {
            FieldFuture::new(async move { Ok(Some(FieldValue::value("ok"))) })
        }))
        .field(Field::new("schemaSnapshotId", TypeRef::named_nn(TypeRef::STRING), |ctx| {
            FieldFuture::new(async move {
                let health = ctx.parent_value.try_downcast_ref::<HealthStatus>()?;
                Ok(Some(FieldValue::value(health.snapshot_id.to_string())))
            })
        }))
        .field(Field::new("cdcStatus", TypeRef::named(TypeRef::STRING), |ctx| {
            FieldFuture::new(async move {
                let health = ctx.parent_value.try_downcast_ref::<HealthStatus>()?;
                Ok(health.cdc_status.map(FieldValue::value))
            })
        }))
}

fn build_health_query_field() -> Field {
    Field::new("health", TypeRef::named_nn("HealthStatus"), |ctx| {
        FieldFuture::new(async move {
            let state = ctx.data::<GatewayState>()?;
            Ok(Some(FieldValue::owned_any(HealthStatus::from_state(state))))
        })
    })
}

/// The Subscription root's `health` field emits one `HealthStatus` and
/// closes, giving a client a liveness check without a dedicated HTTP health
/// route (SPEC_FULL §B).
fn build_health_subscription_field() -> SubscriptionField {
    SubscriptionField::new("health", TypeRef::named_nn("HealthStatus"), |ctx| {
        SubscriptionFieldFuture::new(async move {
            let state = ctx.data::<GatewayState>()?.clone();
            let stream = futures_util::stream::once(async move { Ok(FieldValue::owned_any(HealthStatus::from_state(&state))) });
            Ok(stream)
        })
    })
}

fn add_table_query_fields(mut query: Object, table: &Table, catalog: &Catalog) -> Object {
    let _ = catalog;
    let table_name = table.name.clone();

    let mut flat_field = Field::new(table.name.clone(), TypeRef::named_nn_list(table.name.clone()), {
        let table_name = table_name.clone();
        move |ctx| {
            let table_name = table_name.clone();
            FieldFuture::new(async move {
                let state = ctx.data::<GatewayState>()?;
                let role = ctx.data::<RequestRole>().ok().and_then(|r| r.as_deref()).map(|s| s.to_string());
                let table = state
                    .catalog
                    .table(&table_name)
                    .ok_or_else(|| GatewayError::schema(format!("unknown table `{table_name}`")))?;

                let mut filter = match ctx.args.try_get("where") {
                    Ok(accessor) if !accessor.is_null() => parse_filter_tree(&accessor, table)?,
                    _ => FilterTree::default(),
                };
                for col in &table.columns {
                    if let Ok(accessor) = ctx.args.try_get(col.name.as_str()) {
                        if !accessor.is_null() {
                            filter.predicates.push(FieldFilter {
                                column: col.name.clone(),
                                op: FilterOp::Eq,
                                value: Some(accessor_to_value(&accessor)),
                                col_type: col.col_type.clone(),
                            });
                        }
                    }
                    let is_null_arg = format!("{}_isNull", col.name);
                    if let Ok(accessor) = ctx.args.try_get(is_null_arg.as_str()) {
                        if !accessor.is_null() {
                            let flag = accessor.boolean().unwrap_or(true);
                            filter.predicates.push(FieldFilter {
                                column: col.name.clone(),
                                op: if flag { FilterOp::IsNull } else { FilterOp::IsNotNull },
                                value: None,
                                col_type: col.col_type.clone(),
                            });
                        }
                    }
                    for entry in legacy_ops_for(&col.col_type) {
                        let arg_name = format!("{}_{}", col.name, entry.suffix);
                        if let Ok(accessor) = ctx.args.try_get(arg_name.as_str()) {
                            if !accessor.is_null() {
                                filter.predicates.push(FieldFilter {
                                    column: col.name.clone(),
                                    op: entry.op,
                                    value: Some(accessor_to_value(&accessor)),
                                    col_type: col.col_type.clone(),
                                });
                            }
                        }
                    }
                }

                let order_by = match ctx.args.try_get("orderBy") {
                    Ok(accessor) if !accessor.is_null() => parse_order_by_arg(&accessor)?,
                    _ => Vec::new(),
                };
                let limit = ctx.args.try_get("limit").ok().and_then(|v| v.i64().ok());
                let offset = ctx.args.try_get("offset").ok().and_then(|v| v.i64().ok());

                let mut client = state.pool.get().await.map_err(GatewayError::from)?;
                let rows =
                    crate::query::fetch_flat(&mut client, &state.catalog, table, role.as_deref(), &filter, &order_by, limit, offset)
                        .await?;
                Ok(Some(FieldValue::list(rows.into_iter().map(FieldValue::owned_any))))
            })
        }
    })
    .argument(InputValue::new("where", TypeRef::named(naming::filter_type_name(&table.name))))
    .argument(InputValue::new("orderBy", TypeRef::named_list(naming::order_by_type_name(&table.name))))
    .argument(InputValue::new("limit", TypeRef::named(TypeRef::INT)))
    .argument(InputValue::new("offset", TypeRef::named(TypeRef::INT)));

    for col in &table.columns {
        for (name, type_ref) in legacy_filter_args(col) {
            flat_field = flat_field.argument(InputValue::new(name, type_ref));
        }
    }
    query = query.field(flat_field);

    let connection_type = naming::connection_type_name(&table.name);
    let connection_field = Field::new(format!("{}Connection", table.name), TypeRef::named_nn(connection_type), {
        let table_name = table_name.clone();
        move |ctx| {
            let table_name = table_name.clone();
            FieldFuture::new(async move {
                let state = ctx.data::<GatewayState>()?;
                let role = ctx.data::<RequestRole>().ok().and_then(|r| r.as_deref()).map(|s| s.to_string());
                let table = state
                    .catalog
                    .table(&table_name)
                    .ok_or_else(|| GatewayError::schema(format!("unknown table `{table_name}`")))?;

                let filter = match ctx.args.try_get("where") {
                    Ok(accessor) if !accessor.is_null() => parse_filter_tree(&accessor, table)?,
                    _ => FilterTree::default(),
                };
                let order_by = match ctx.args.try_get("orderBy") {
                    Ok(accessor) if !accessor.is_null() => parse_order_by_arg(&accessor)?,
                    _ => Vec::new(),
                };
                let args = crate::query::ConnectionArgs {
                    first: ctx.args.try_get("first").ok().and_then(|v| v.i64().ok()),
                    after: ctx.args.try_get("after").ok().and_then(|v| v.string().ok().map(|s| s.to_string())),
                    last: ctx.args.try_get("last").ok().and_then(|v| v.i64().ok()),
                    before: ctx.args.try_get("before").ok().and_then(|v| v.string().ok().map(|s| s.to_string())),
                };

                let mut client = state.pool.get().await.map_err(GatewayError::from)?;
                let result =
                    crate::query::fetch_connection(&mut client, &state.catalog, table, role.as_deref(), &filter, &order_by, &args)
                        .await?;
                Ok(Some(FieldValue::owned_any(result)))
            })
        }
    })
    .argument(InputValue::new("where", TypeRef::named(naming::filter_type_name(&table.name))))
    .argument(InputValue::new("orderBy", TypeRef::named_list(naming::order_by_type_name(&table.name))))
    .argument(InputValue::new("first", TypeRef::named(TypeRef::INT)))
    .argument(InputValue::new("after", TypeRef::named(TypeRef::STRING)))
    .argument(InputValue::new("last", TypeRef::named(TypeRef::INT)))
    .argument(InputValue::new("before", TypeRef::named(TypeRef::STRING)));

    query.field(connection_field)
}

/// Adds create/update/delete/bulk-create/create-with-relations fields for
/// `table`, gated per-kind on `privileges` (spec §4.2: "Mutation fields are
/// emitted by C3 only when the role holds the corresponding write grant").
/// `None` means role-based security is disabled — every field is emitted,
/// matching the default unfiltered catalog.
fn add_table_mutation_fields(mut mutation: Object, table: &Table, privileges: Option<&RolePrivileges>) -> Object {
    let pascal = naming::pascal_case(&table.name);
    let table_name = table.name.clone();
    let can_insert = privileges.map_or(true, |p| p.can_insert(&table.name));
    let can_update = privileges.map_or(true, |p| p.can_update(&table.name));
    let can_delete = privileges.map_or(true, |p| p.can_delete(&table.name));

    if can_insert {
    mutation = mutation.field(
        Field::new(format!("create{pascal}"), TypeRef::named_nn(table.name.clone()), {
            let table_name = table_name.clone();
            move |ctx| {
                let table_name = table_name.clone();
                FieldFuture::new(async move {
                    let state = ctx.data::<GatewayState>()?;
                    let role = ctx.data::<RequestRole>().ok().and_then(|r| r.as_deref()).map(|s| s.to_string());
                    let table = state
                        .catalog
                        .table(&table_name)
                        .ok_or_else(|| GatewayError::schema(format!("unknown table `{table_name}`")))?;
                    let input_accessor = ctx.args.try_get("input")?;
                    let input = input_map_from_accessor(&input_accessor, table, &state.catalog)?;
                    let mut client = state.pool.get().await.map_err(GatewayError::from)?;
                    let row = crate::mutation::create_row(&mut client, &state.catalog, table, role.as_deref(), &input).await?;
                    Ok(Some(FieldValue::owned_any(row)))
                })
            }
        })
        .argument(InputValue::new("input", TypeRef::named_nn(naming::create_input_type_name(&table.name)))),
    );
    }

    if can_update {
    mutation = mutation.field(
        Field::new(format!("update{pascal}"), TypeRef::named_nn(table.name.clone()), {
            let table_name = table_name.clone();
            move |ctx| {
                let table_name = table_name.clone();
                FieldFuture::new(async move {
                    let state = ctx.data::<GatewayState>()?;
                    let role = ctx.data::<RequestRole>().ok().and_then(|r| r.as_deref()).map(|s| s.to_string());
                    let table = state
                        .catalog
                        .table(&table_name)
                        .ok_or_else(|| GatewayError::schema(format!("unknown table `{table_name}`")))?;
                    let input_accessor = ctx.args.try_get("input")?;
                    let input = input_map_from_accessor(&input_accessor, table, &state.catalog)?;
                    let mut client = state.pool.get().await.map_err(GatewayError::from)?;
                    let row = crate::mutation::update_row(&mut client, &state.catalog, table, role.as_deref(), &input).await?;
                    Ok(Some(FieldValue::owned_any(row)))
                })
            }
        })
        .argument(InputValue::new("input", TypeRef::named_nn(naming::update_input_type_name(&table.name)))),
    );
    }

    if can_delete {
    mutation = mutation.field(
        Field::new(format!("delete{pascal}"), TypeRef::named_nn(table.name.clone()), {
            let table_name = table_name.clone();
            move |ctx| {
                let table_name = table_name.clone();
                FieldFuture::new(async move {
                    let state = ctx.data::<GatewayState>()?;
                    let role = ctx.data::<RequestRole>().ok().and_then(|r| r.as_deref()).map(|s| s.to_string());
                    let table = state
                        .catalog
                        .table(&table_name)
                        .ok_or_else(|| GatewayError::schema(format!("unknown table `{table_name}`")))?;
                    let input_accessor = ctx.args.try_get("input")?;
                    let input = input_map_from_accessor(&input_accessor, table, &state.catalog)?;
                    let mut client = state.pool.get().await.map_err(GatewayError::from)?;
                    let row = crate::mutation::delete_row(&mut client, &state.catalog, table, role.as_deref(), &input).await?;
                    Ok(Some(FieldValue::owned_any(row)))
                })
            }
        })
        .argument(InputValue::new("input", TypeRef::named_nn(naming::delete_input_type_name(&table.name)))),
    );
    }

    if can_insert {
    mutation = mutation.field(
        Field::new(format!("createMany{pascal}"), TypeRef::named_nn_list(table.name.clone()), {
            let table_name = table_name.clone();
            move |ctx| {
                let table_name = table_name.clone();
                FieldFuture::new(async move {
                    let state = ctx.data::<GatewayState>()?;
                    let role = ctx.data::<RequestRole>().ok().and_then(|r| r.as_deref()).map(|s| s.to_string());
                    let table = state
                        .catalog
                        .table(&table_name)
                        .ok_or_else(|| GatewayError::schema(format!("unknown table `{table_name}`")))?;
                    let input_accessor = ctx.args.try_get("input")?;
                    let list = input_accessor.list()?;
                    let mut inputs = Vec::with_capacity(list.len());
                    for item in list.iter() {
                        inputs.push(input_map_from_accessor(&item, table, &state.catalog)?);
                    }
                    let mut client = state.pool.get().await.map_err(GatewayError::from)?;
                    let rows = crate::mutation::bulk_create(&mut client, &state.catalog, table, role.as_deref(), &inputs).await?;
                    Ok(Some(FieldValue::list(rows.into_iter().map(FieldValue::owned_any))))
                })
            }
        })
        .argument(InputValue::new("input", TypeRef::named_nn_list(naming::create_input_type_name(&table.name)))),
    );
    }

    if can_insert {
    mutation = mutation.field(
        Field::new(format!("createWithRelations{pascal}"), TypeRef::named_nn(table.name.clone()), {
            let table_name = table_name.clone();
            move |ctx| {
                let table_name = table_name.clone();
                FieldFuture::new(async move {
                    let state = ctx.data::<GatewayState>()?;
                    let role = ctx.data::<RequestRole>().ok().and_then(|r| r.as_deref()).map(|s| s.to_string());
                    let table = state
                        .catalog
                        .table(&table_name)
                        .ok_or_else(|| GatewayError::schema(format!("unknown table `{table_name}`")))?;
                    let input_accessor = ctx.args.try_get("input")?;
                    let (fields, relations, child_create_many) =
                        parse_relation_create_input(&input_accessor, table, &state.catalog)?;
                    let mut client = state.pool.get().await.map_err(GatewayError::from)?;
                    let row = crate::mutation::create_with_relations(
                        &mut client,
                        &state.catalog,
                        table,
                        role.as_deref(),
                        fields,
                        relations,
                        child_create_many,
                    )
                    .await?;
                    Ok(Some(FieldValue::owned_any(row)))
                })
            }
        })
        .argument(InputValue::new("input", TypeRef::named_nn(naming::relation_create_input_type_name(&table.name)))),
    );
    }

    mutation
}

/// Builds the dynamic [`Schema`] for one `(catalog-snapshot, role)` view
/// (spec §4.3 Generator rules). Pure function of `catalog` and `privileges` —
/// the privilege filter has already trimmed `catalog` to whatever the role
/// may see by the time it reaches here; `privileges` additionally decides
/// which write fields get emitted (spec §4.2: "Mutation fields are emitted
/// by C3 only when the role holds the corresponding write grant"). `None`
/// means role-based security is disabled (spec §6 `security.roleBasedSchema`)
/// and every mutation field is emitted unconditionally.
pub fn build_schema(catalog: &Catalog, privileges: Option<&RolePrivileges>) -> Result<Schema> {
    check_name_collisions(catalog)?;

    let mut registry = TypeRegistry::new();
    registry.insert(types::ORDER_DIRECTION_ENUM, types::build_order_direction_enum());
    registry.insert("JSON", types::build_json_scalar());
    types::register_builtin_filter_inputs(&mut registry);
    registry.insert("PageInfo", types::build_page_info_type());
    registry.insert("HealthStatus", build_health_status_type());

    let mut query = Object::new("Query").field(build_health_query_field());
    let mut mutation = Object::new("Mutation");
    let mut has_mutation_fields = false;
    let mut subscription = Subscription::new("Subscription").field(build_health_subscription_field());

    for table in &catalog.tables {
        let table_obj = types::build_table_object(table, catalog, &mut registry);
        registry.insert(table.name.clone(), table_obj);

        registry.insert(naming::filter_type_name(&table.name), types::build_filter_input(table));
        registry.insert(naming::order_by_type_name(&table.name), types::build_order_by_input(table));
        registry.insert(naming::edge_type_name(&table.name), types::build_edge_type(table));
        registry.insert(naming::connection_type_name(&table.name), types::build_connection_type(table));

        query = add_table_query_fields(query, table, catalog);

        let can_write_anything = privileges.map_or(true, |p| {
            p.can_insert(&table.name) || p.can_update(&table.name) || p.can_delete(&table.name)
        });
        if !table.is_view && can_write_anything {
            registry.insert(naming::create_input_type_name(&table.name), types::build_create_input(table));
            registry.insert(naming::update_input_type_name(&table.name), types::build_update_input(table));
            registry.insert(naming::delete_input_type_name(&table.name), types::build_delete_input(table));
            let relation_input = types::build_relation_create_input(table, catalog, &mut registry);
            registry.insert(naming::relation_create_input_type_name(&table.name), relation_input);
            mutation = add_table_mutation_fields(mutation, table, privileges);
            has_mutation_fields = true;
        }

        registry.insert(naming::change_event_type_name(&table.name), types::build_change_event_type(table));
        let subscription_data = types::build_subscription_data_type(table, catalog, &mut registry);
        registry.insert(naming::subscription_data_type_name(&table.name), subscription_data);
        subscription = subscription.field(types::build_subscription_field(table));
    }

    let mutation_type_name: Option<&str> = if has_mutation_fields { Some("Mutation") } else { None };
    let mut builder = Schema::build("Query", mutation_type_name, Some("Subscription")).register(query);
    if has_mutation_fields {
        builder = builder.register(mutation);
    }
    builder = builder.register(subscription);
    for ty in registry.into_types() {
        builder = builder.register(ty);
    }

    builder
        .limit_depth(MAX_QUERY_DEPTH)
        .limit_complexity(MAX_QUERY_COMPLEXITY)
        .finish()
        .map_err(|e| GatewayError::schema(e.to_string()))
}

/// Generated-schema cache keyed by `(catalog-snapshot-id, role)` (SPEC_FULL
/// §B "Introspection caching key"): building a dynamic schema walks every
/// table and registers every type, which is too expensive to redo on each
/// request when the catalog and the requesting role haven't changed.
#[derive(Default)]
pub struct SchemaCache {
    cache: DashMap<(u64, Option<String>), Arc<Schema>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_build(
        &self,
        catalog: &Catalog,
        role: Option<&str>,
        privileges: Option<&RolePrivileges>,
    ) -> Result<Arc<Schema>> {
        let key = (catalog.snapshot_id, role.map(|r| r.to_string()));
        if let Some(schema) = self.cache.get(&key) {
            return Ok(schema.clone());
        }
        let schema = Arc::new(build_schema(catalog, privileges)?);
        self.cache.insert(key, schema.clone());
        Ok(schema)
    }

    /// Drops every cached entry for a snapshot id other than `snapshot_id`,
    /// called once a fresh catalog reflection lands so superseded schemas
    /// don't linger in memory for the lifetime of the process.
    pub fn retain_snapshot(&self, snapshot_id: u64) {
        self.cache.retain(|(id, _), _| *id == snapshot_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Column, ColumnType, EnumType, Table};

    fn empty_catalog() -> Catalog {
        Catalog { schema: "public".into(), tables: vec![], enums: vec![], composites: vec![], domains: vec![], snapshot_id: 1 }
    }

    fn one_table_catalog() -> Catalog {
        let mut cat = empty_catalog();
        cat.tables.push(Table {
            name: "orders".into(),
            schema: "public".into(),
            is_view: false,
            columns: vec![
                Column::new("id", ColumnType::Int4, false, 1).as_primary_key(),
                Column::new("status", ColumnType::Text, true, 2),
            ],
            foreign_keys: vec![],
        });
        cat
    }

    #[test]
    fn empty_catalog_still_builds_a_schema() {
        let cat = empty_catalog();
        assert!(build_schema(&cat, None).is_ok());
    }

    #[test]
    fn one_table_catalog_builds_with_mutation_root() {
        let cat = one_table_catalog();
        assert!(build_schema(&cat, None).is_ok());
    }

    #[test]
    fn colliding_enum_name_is_rejected() {
        let mut cat = one_table_catalog();
        cat.enums.push(EnumType { schema: "public".into(), name: "orders".into(), labels: vec!["A".into()] });
        assert!(check_name_collisions(&cat).is_err());
    }

    #[test]
    fn schema_cache_reuses_the_same_schema_for_the_same_key() {
        let cat = one_table_catalog();
        let cache = SchemaCache::new();
        let a = cache.get_or_build(&cat, None, None).unwrap();
        let b = cache.get_or_build(&cat, None, None).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn legacy_ops_skip_boolean_columns() {
        assert!(legacy_ops_for(&ColumnType::Boolean).is_empty());
    }
}
