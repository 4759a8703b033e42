//! C3 — GraphQL Schema Generator: per-table and global dynamic type
//! builders (spec §4.3).
//!
//! Every builder here is a pure function of the reflected [`Catalog`] (and,
//! for filtered generation, the already-trimmed per-role catalog) — none of
//! them touch the database. Resolver closures capture only owned `String`s,
//! never `&Table`/`&Catalog` references, since `Field::new`'s closures must
//! be `'static`; the live catalog is re-fetched from `GatewayState` at
//! resolve time instead, mirroring how the postrust example resolvers pull
//! `ctx.data::<PgPool>()` per call rather than capturing a borrowed pool.

use async_graphql::dynamic::{
    Enum, EnumItem, Field, FieldFuture, FieldValue, InputObject, InputValue, Object, Scalar,
    SubscriptionField, SubscriptionFieldFuture, TypeRef,
};
use futures_util::StreamExt;

use crate::common::{Catalog, Column, ColumnType, CompositeType, EnumType, Table};
use crate::query::RowMap;
use crate::schema::naming;
use crate::schema::registry::TypeRegistry;
use crate::schema::state::{GatewayState, RequestRole};
use crate::schema::value_bridge::to_gql;

/// `OrderDirection` (spec §4.3/§4.4), shared by every table's `orderBy`
/// input — registered once regardless of how many tables reference it.
pub const ORDER_DIRECTION_ENUM: &str = "OrderDirection";

pub fn build_order_direction_enum() -> Enum {
    Enum::new(ORDER_DIRECTION_ENUM).item(EnumItem::new("ASC")).item(EnumItem::new("DESC"))
}

/// Untyped JSON passthrough scalar used for `json`/`jsonb` columns and
/// opaque-type columns (spec §4.3 Scalar mapping).
pub fn build_json_scalar() -> Scalar {
    Scalar::new("JSON").description("Arbitrary JSON value, serialized as-is.")
}

/// The six built-in filter input types every table's `T_Filter` composes
/// from (spec §4.4 Filter operators).
pub fn register_builtin_filter_inputs(registry: &mut TypeRegistry) {
    let scalar_filter = |name: &'static str, value_type: &'static str| {
        InputObject::new(name)
            .field(InputValue::new("eq", TypeRef::named(value_type)))
            .field(InputValue::new("neq", TypeRef::named(value_type)))
            .field(InputValue::new("in", TypeRef::named_list(value_type)))
            .field(InputValue::new("notIn", TypeRef::named_list(value_type)))
            .field(InputValue::new("isNull", TypeRef::named(TypeRef::BOOLEAN)))
            .field(InputValue::new("isNotNull", TypeRef::named(TypeRef::BOOLEAN)))
    };

    registry.insert(
        "StringFilter",
        scalar_filter("StringFilter", TypeRef::STRING)
            .field(InputValue::new("like", TypeRef::named(TypeRef::STRING)))
            .field(InputValue::new("ilike", TypeRef::named(TypeRef::STRING)))
            .field(InputValue::new("contains", TypeRef::named(TypeRef::STRING)))
            .field(InputValue::new("startsWith", TypeRef::named(TypeRef::STRING)))
            .field(InputValue::new("endsWith", TypeRef::named(TypeRef::STRING)))
            .field(InputValue::new("gt", TypeRef::named(TypeRef::STRING)))
            .field(InputValue::new("gte", TypeRef::named(TypeRef::STRING)))
            .field(InputValue::new("lt", TypeRef::named(TypeRef::STRING)))
            .field(InputValue::new("lte", TypeRef::named(TypeRef::STRING))),
    );
    registry.insert(
        "IntFilter",
        scalar_filter("IntFilter", TypeRef::INT)
            .field(InputValue::new("gt", TypeRef::named(TypeRef::INT)))
            .field(InputValue::new("gte", TypeRef::named(TypeRef::INT)))
            .field(InputValue::new("lt", TypeRef::named(TypeRef::INT)))
            .field(InputValue::new("lte", TypeRef::named(TypeRef::INT))),
    );
    registry.insert(
        "FloatFilter",
        scalar_filter("FloatFilter", TypeRef::FLOAT)
            .field(InputValue::new("gt", TypeRef::named(TypeRef::FLOAT)))
            .field(InputValue::new("gte", TypeRef::named(TypeRef::FLOAT)))
            .field(InputValue::new("lt", TypeRef::named(TypeRef::FLOAT)))
            .field(InputValue::new("lte", TypeRef::named(TypeRef::FLOAT))),
    );
    registry.insert(
        "BooleanFilter",
        InputObject::new("BooleanFilter")
            .field(InputValue::new("eq", TypeRef::named(TypeRef::BOOLEAN)))
            .field(InputValue::new("isNull", TypeRef::named(TypeRef::BOOLEAN)))
            .field(InputValue::new("isNotNull", TypeRef::named(TypeRef::BOOLEAN))),
    );
    registry.insert(
        "DateTimeFilter",
        scalar_filter("DateTimeFilter", TypeRef::STRING)
            .field(InputValue::new("gt", TypeRef::named(TypeRef::STRING)))
            .field(InputValue::new("gte", TypeRef::named(TypeRef::STRING)))
            .field(InputValue::new("lt", TypeRef::named(TypeRef::STRING)))
            .field(InputValue::new("lte", TypeRef::named(TypeRef::STRING))),
    );
    registry.insert(
        "JSONFilter",
        InputObject::new("JSONFilter")
            .field(InputValue::new("hasKey", TypeRef::named(TypeRef::STRING)))
            .field(InputValue::new("hasKeys", TypeRef::named_list(TypeRef::STRING)))
            .field(InputValue::new("hasAnyKeys", TypeRef::named_list(TypeRef::STRING)))
            .field(InputValue::new("contains", TypeRef::named("JSON")))
            .field(InputValue::new("containedBy", TypeRef::named("JSON")))
            .field(InputValue::new("path", TypeRef::named_list(TypeRef::STRING)))
            .field(InputValue::new("pathText", TypeRef::named_list(TypeRef::STRING)))
            .field(InputValue::new("isNull", TypeRef::named(TypeRef::BOOLEAN)))
            .field(InputValue::new("isNotNull", TypeRef::named(TypeRef::BOOLEAN))),
    );
}

/// `PageInfo` (spec §4.4 Relay connection shape), identical for every table.
pub fn build_page_info_type() -> Object {
    Object::new("PageInfo")
        .field(Field::new("hasNextPage", TypeRef::named_nn(TypeRef::BOOLEAN), |ctx| {
            FieldFuture::new(async move {
                let info = ctx.parent_value.try_downcast_ref::<crate::query::PageInfo>()?;
                Ok(Some(FieldValue::value(info.has_next_page)))
            })
        }))
        .field(Field::new("hasPreviousPage", TypeRef::named_nn(TypeRef::BOOLEAN), |ctx| {
            FieldFuture::new(async move {
                let info = ctx.parent_value.try_downcast_ref::<crate::query::PageInfo>()?;
                Ok(Some(FieldValue::value(info.has_previous_page)))
            })
        }))
        .field(Field::new("startCursor", TypeRef::named(TypeRef::STRING), |ctx| {
            FieldFuture::new(async move {
                let info = ctx.parent_value.try_downcast_ref::<crate::query::PageInfo>()?;
                Ok(info.start_cursor.clone().map(FieldValue::value))
            })
        }))
        .field(Field::new("endCursor", TypeRef::named(TypeRef::STRING), |ctx| {
            FieldFuture::new(async move {
                let info = ctx.parent_value.try_downcast_ref::<crate::query::PageInfo>()?;
                Ok(info.end_cursor.clone().map(FieldValue::value))
            })
        }))
}

/// GraphQL output type reference for a column, in *read* contexts (table
/// rows, subscription payloads): composites resolve to their Object type.
pub fn column_type_ref(col_type: &ColumnType, nullable: bool) -> TypeRef {
    let base = scalar_type_name(col_type);
    if col_type.is_array() {
        if nullable {
            TypeRef::named_list(base)
        } else {
            TypeRef::named_nn_list(base)
        }
    } else if nullable {
        TypeRef::named(base)
    } else {
        TypeRef::named_nn(base)
    }
}

/// GraphQL input type reference for a column, in *write* contexts
/// (create/update/connect inputs): composites resolve to their paired Input
/// type instead of the Object type, since GraphQL forbids mixing the two.
pub fn column_input_type_ref(col_type: &ColumnType, nullable: bool) -> TypeRef {
    let base = scalar_input_type_name(col_type);
    if col_type.is_array() {
        if nullable {
            TypeRef::named_list(base)
        } else {
            TypeRef::named_nn_list(base)
        }
    } else if nullable {
        TypeRef::named(base)
    } else {
        TypeRef::named_nn(base)
    }
}

pub fn scalar_type_name(col_type: &ColumnType) -> String {
    match col_type.element_type() {
        ColumnType::Int2 | ColumnType::Int4 | ColumnType::Int8 | ColumnType::Serial => TypeRef::INT.to_string(),
        ColumnType::Real | ColumnType::Double | ColumnType::Numeric => TypeRef::FLOAT.to_string(),
        ColumnType::Boolean => TypeRef::BOOLEAN.to_string(),
        ColumnType::Json | ColumnType::Jsonb => "JSON".to_string(),
        ColumnType::Enum((_, name)) => naming::enum_type_name(name),
        ColumnType::Composite((_, name)) => naming::composite_type_name(name),
        _ => TypeRef::STRING.to_string(),
    }
}

fn scalar_input_type_name(col_type: &ColumnType) -> String {
    match col_type.element_type() {
        ColumnType::Composite((_, name)) => naming::composite_input_type_name(name),
        other => scalar_type_name(other),
    }
}

/// Builds the GraphQL Object type for one enum type (spec §4.3: enums map
/// 1:1 onto a GraphQL enum and are shared in both read and write contexts).
pub fn build_enum_type(enum_type: &EnumType) -> Enum {
    let mut e = Enum::new(naming::enum_type_name(&enum_type.name));
    for label in &enum_type.labels {
        e = e.item(EnumItem::new(label));
    }
    e
}

/// Builds the output Object type for one composite type, recursively
/// registering any nested composite/enum attribute types it references
/// (spec §4.3 Composite mapping).
pub fn build_composite_type(composite: &CompositeType, catalog: &Catalog, registry: &mut TypeRegistry) -> Object {
    let mut obj = Object::new(naming::composite_type_name(&composite.name));
    for attr in &composite.attributes {
        register_nested_type(&attr.col_type, catalog, registry);
        let type_ref = column_type_ref(&attr.col_type, attr.nullable);
        let field_name = attr.name.clone();
        obj = obj.field(Field::new(attr.name.clone(), type_ref, move |ctx| {
            let field_name = field_name.clone();
            FieldFuture::new(async move {
                let fields = ctx.parent_value.try_downcast_ref::<Vec<(String, crate::common::Value)>>()?;
                let value = fields.iter().find(|(k, _)| *k == field_name).map(|(_, v)| v);
                Ok(value.map(|v| FieldValue::value(to_gql(v))))
            })
        }));
    }
    obj
}

/// Builds the input Object type for one composite type (spec §4.3/§4.5:
/// composite columns accept a matching input shape on create/update).
pub fn build_composite_input_type(composite: &CompositeType, catalog: &Catalog, registry: &mut TypeRegistry) -> InputObject {
    let mut obj = InputObject::new(naming::composite_input_type_name(&composite.name));
    for attr in &composite.attributes {
        register_nested_type(&attr.col_type, catalog, registry);
        obj = obj.field(InputValue::new(attr.name.clone(), column_input_type_ref(&attr.col_type, attr.nullable)));
    }
    obj
}

/// Registers the enum/composite types an attribute or column references,
/// if not already present — recursing through nested composite attributes.
fn register_nested_type(col_type: &ColumnType, catalog: &Catalog, registry: &mut TypeRegistry) {
    match col_type.element_type() {
        ColumnType::Enum(q) => {
            if let Some(enum_type) = catalog.enum_by_name(q, &q.1) {
                let name = naming::enum_type_name(&enum_type.name);
                if !registry.contains(&name) {
                    registry.insert(name, build_enum_type(enum_type));
                }
            }
        }
        ColumnType::Composite(q) => {
            if let Some(composite) = catalog.composite_by_name(q, &q.1).cloned() {
                let out_name = naming::composite_type_name(&composite.name);
                if !registry.contains(&out_name) {
                    registry.insert(out_name, build_composite_type(&composite, catalog, registry));
                }
                let in_name = naming::composite_input_type_name(&composite.name);
                if !registry.contains(&in_name) {
                    registry.insert(in_name, build_composite_input_type(&composite, catalog, registry));
                }
            }
        }
        _ => {}
    }
}

fn field_value_from_row(row: RowMap) -> FieldValue<'static> {
    FieldValue::owned_any(row)
}

/// Builds a table's row Object type: scalar columns, forward (outgoing FK)
/// relations, and reverse (incoming FK) relations (spec §4.3 Generator
/// rules).
pub fn build_table_object(table: &Table, catalog: &Catalog, registry: &mut TypeRegistry) -> Object {
    let mut obj = Object::new(table.name.clone());

    for col in &table.columns {
        register_nested_type(&col.col_type, catalog, registry);
        let type_ref = column_type_ref(&col.col_type, col.nullable);
        let column_name = col.name.clone();
        obj = obj.field(Field::new(col.name.clone(), type_ref, move |ctx| {
            let column_name = column_name.clone();
            FieldFuture::new(async move {
                let row = ctx.parent_value.try_downcast_ref::<RowMap>()?;
                Ok(row.get(&column_name).map(|v| FieldValue::value(to_gql(v))))
            })
        }));
    }

    for fk in &table.foreign_keys {
        let Some(referenced) = catalog.table(&fk.referenced_table) else { continue };
        let fk_column = fk.column.clone();
        let referenced_table = referenced.name.clone();
        let referenced_column = fk.referenced_column.clone();
        obj = obj.field(Field::new(fk.referenced_table.clone(), TypeRef::named(referenced.name.clone()), move |ctx| {
            let fk_column = fk_column.clone();
            let referenced_table = referenced_table.clone();
            let referenced_column = referenced_column.clone();
            FieldFuture::new(async move {
                let row = ctx.parent_value.try_downcast_ref::<RowMap>()?;
                let Some(fk_value) = row.get(&fk_column) else { return Ok(None) };
                if fk_value.is_null() {
                    return Ok(None);
                }
                let state = ctx.data::<GatewayState>()?;
                let role = ctx.data::<RequestRole>().ok().and_then(|r| r.as_deref());
                let table = state
                    .catalog
                    .table(&referenced_table)
                    .ok_or_else(|| crate::error::GatewayError::schema(format!("unknown table `{referenced_table}`")))?;
                let mut client = state.pool.get().await.map_err(crate::error::GatewayError::from)?;
                let pk_values = vec![(referenced_column.clone(), fk_value.clone())];
                let row = crate::query::fetch_by_pk(&mut client, &state.catalog, table, role, &pk_values).await?;
                Ok(row.map(field_value_from_row))
            })
        }));
    }

    for referencing in catalog.reverse_references(&table.name) {
        let Some(fk) = referencing.foreign_keys.iter().find(|fk| fk.referenced_table == table.name) else { continue };
        let field_name = naming::pluralize(&referencing.name);
        let child_table = referencing.name.clone();
        let fk_column = fk.column.clone();
        let pk_column = fk.referenced_column.clone();
        obj = obj.field(Field::new(field_name, TypeRef::named_nn_list(referencing.name.clone()), move |ctx| {
            let child_table = child_table.clone();
            let fk_column = fk_column.clone();
            let pk_column = pk_column.clone();
            FieldFuture::new(async move {
                let row = ctx.parent_value.try_downcast_ref::<RowMap>()?;
                let Some(pk_value) = row.get(&pk_column) else { return Ok(Some(FieldValue::list(vec![]))) };
                let state = ctx.data::<GatewayState>()?;
                let role = ctx.data::<RequestRole>().ok().and_then(|r| r.as_deref());
                let table = state
                    .catalog
                    .table(&child_table)
                    .ok_or_else(|| crate::error::GatewayError::schema(format!("unknown table `{child_table}`")))?;
                let mut client = state.pool.get().await.map_err(crate::error::GatewayError::from)?;
                let rows =
                    crate::query::fetch_by_foreign_key(&mut client, &state.catalog, table, role, &fk_column, pk_value)
                        .await?;
                Ok(Some(FieldValue::list(rows.into_iter().map(field_value_from_row))))
            })
        }));
    }

    obj
}

/// Builds `T_Filter` for one table: one field per column (typed filter
/// input) plus a self-referential `or` list (spec §4.4).
pub fn build_filter_input(table: &Table) -> InputObject {
    let type_name = naming::filter_type_name(&table.name);
    let mut input = InputObject::new(type_name.clone());
    for col in &table.columns {
        let filter_type = naming::filter_input_for_column(&col.col_type);
        input = input.field(InputValue::new(col.name.clone(), TypeRef::named(filter_type)));
    }
    input.field(InputValue::new("or", TypeRef::named_list(type_name)))
}

/// Builds `T_OrderByInput` for one table: one optional `OrderDirection`
/// field per column (spec §4.4 Ordering).
pub fn build_order_by_input(table: &Table) -> InputObject {
    let mut input = InputObject::new(naming::order_by_type_name(&table.name));
    for col in &table.columns {
        input = input.field(InputValue::new(col.name.clone(), TypeRef::named(ORDER_DIRECTION_ENUM)));
    }
    input
}

/// Builds `T_Edge` (spec §4.4 Relay connection shape).
pub fn build_edge_type(table: &Table) -> Object {
    Object::new(naming::edge_type_name(&table.name))
        .field(Field::new("node", TypeRef::named_nn(table.name.clone()), |ctx| {
            FieldFuture::new(async move {
                let edge = ctx.parent_value.try_downcast_ref::<crate::query::Edge>()?;
                Ok(Some(field_value_from_row(edge.node.clone())))
            })
        }))
        .field(Field::new("cursor", TypeRef::named_nn(TypeRef::STRING), |ctx| {
            FieldFuture::new(async move {
                let edge = ctx.parent_value.try_downcast_ref::<crate::query::Edge>()?;
                Ok(Some(FieldValue::value(edge.cursor.clone())))
            })
        }))
}

/// Builds `T_Connection` (spec §4.4 Relay connection shape).
pub fn build_connection_type(table: &Table) -> Object {
    let edge_type = naming::edge_type_name(&table.name);
    Object::new(naming::connection_type_name(&table.name))
        .field(Field::new("edges", TypeRef::named_nn_list(edge_type), |ctx| {
            FieldFuture::new(async move {
                let conn = ctx.parent_value.try_downcast_ref::<crate::query::ConnectionResult>()?;
                Ok(Some(FieldValue::list(conn.edges.iter().cloned().map(FieldValue::owned_any))))
            })
        }))
        .field(Field::new("pageInfo", TypeRef::named_nn("PageInfo"), |ctx| {
            FieldFuture::new(async move {
                let conn = ctx.parent_value.try_downcast_ref::<crate::query::ConnectionResult>()?;
                Ok(Some(FieldValue::owned_any(conn.page_info.clone())))
            })
        }))
        .field(Field::new("totalCount", TypeRef::named_nn(TypeRef::INT), |ctx| {
            FieldFuture::new(async move {
                let conn = ctx.parent_value.try_downcast_ref::<crate::query::ConnectionResult>()?;
                Ok(Some(FieldValue::value(conn.total_count)))
            })
        }))
}

/// Builds `T_CreateInput` (spec §4.5 Create): every non-primary-key column,
/// required unless nullable or defaulted.
pub fn build_create_input(table: &Table) -> InputObject {
    let mut input = InputObject::new(naming::create_input_type_name(&table.name));
    for col in non_pk_columns(table) {
        let required = !col.nullable && !col.has_default;
        input = input.field(InputValue::new(col.name.clone(), create_field_type_ref(col, required)));
    }
    input
}

fn create_field_type_ref(col: &Column, required: bool) -> TypeRef {
    column_input_type_ref(&col.col_type, !required)
}

fn non_pk_columns(table: &Table) -> impl Iterator<Item = &Column> {
    table.columns.iter().filter(|c| !c.primary_key)
}

/// Builds `T_UpdateInput` (spec §4.5 Update): every primary-key column
/// required, every other column optional.
pub fn build_update_input(table: &Table) -> InputObject {
    let mut input = InputObject::new(naming::update_input_type_name(&table.name));
    for col in &table.columns {
        let type_ref = if col.primary_key {
            let base = scalar_input_type_name(&col.col_type);
            TypeRef::named_nn(base)
        } else {
            column_input_type_ref(&col.col_type, true)
        };
        input = input.field(InputValue::new(col.name.clone(), type_ref));
    }
    input
}

/// Builds `T_DeleteInput` (spec §4.5 Delete): just the key columns (primary
/// key, or a synthesized `id` for PK-less tables).
pub fn build_delete_input(table: &Table) -> InputObject {
    let mut input = InputObject::new(naming::delete_input_type_name(&table.name));
    let pk_cols = table.primary_key_columns();
    let key_cols: Vec<&Column> = if pk_cols.is_empty() {
        table.columns.iter().filter(|c| c.name == "id").collect()
    } else {
        pk_cols
    };
    for col in key_cols {
        let base = scalar_input_type_name(&col.col_type);
        input = input.field(InputValue::new(col.name.clone(), TypeRef::named_nn(base)));
    }
    input
}

/// Input carrying just a referenced row's primary key, used by a
/// relationship-create input's `<fk>Connect` field (spec §4.5).
fn build_connect_input(referenced: &Table) -> InputObject {
    let mut input = InputObject::new(naming::connect_input_type_name(&referenced.name));
    for pk in referenced.primary_key_columns() {
        let base = scalar_input_type_name(&pk.col_type);
        input = input.field(InputValue::new(pk.name.clone(), TypeRef::named_nn(base)));
    }
    input
}

/// Builds `T_RelationCreateInput` (spec §4.5 "create with relationships"):
/// the table's own create fields, plus a `<fk>Connect`/`<fk>Create` pair per
/// outgoing FK and a `<child>CreateMany` per incoming FK.
pub fn build_relation_create_input(table: &Table, catalog: &Catalog, registry: &mut TypeRegistry) -> InputObject {
    let mut input = InputObject::new(naming::relation_create_input_type_name(&table.name));
    for col in non_pk_columns(table) {
        if table.foreign_keys.iter().any(|fk| fk.column == col.name) {
            continue;
        }
        let required = !col.nullable && !col.has_default;
        input = input.field(InputValue::new(col.name.clone(), create_field_type_ref(col, required)));
    }

    for fk in &table.foreign_keys {
        let Some(referenced) = catalog.table(&fk.referenced_table) else { continue };
        let connect_name = naming::connect_input_type_name(&referenced.name);
        if !registry.contains(&connect_name) {
            registry.insert(connect_name.clone(), build_connect_input(referenced));
        }
        let create_name = naming::create_input_type_name(&referenced.name);
        input = input
            .field(InputValue::new(format!("{}Connect", fk.column), TypeRef::named(connect_name)))
            .field(InputValue::new(format!("{}Create", fk.column), TypeRef::named(create_name)));
    }

    for referencing in catalog.reverse_references(&table.name) {
        let create_many_name = naming::create_input_type_name(&referencing.name);
        input = input.field(InputValue::new(
            format!("{}CreateMany", referencing.name),
            TypeRef::named_list(create_many_name),
        ));
    }

    input
}

/// Builds `T_ChangeEvent` (spec §4.3/§4.8): `{operation, table, schema,
/// timestamp, lsn, data, error}`. A heartbeat tick reports `operation:
/// "HEARTBEAT"` with a null `data`, keeping the connection alive without a
/// distinct message shape (spec §4.8 bullet 4).
pub fn build_change_event_type(table: &Table) -> Object {
    let data_type = naming::subscription_data_type_name(&table.name);
    Object::new(naming::change_event_type_name(&table.name))
        .field(Field::new("operation", TypeRef::named_nn(TypeRef::STRING), |ctx| {
            FieldFuture::new(async move {
                let tick = ctx.parent_value.try_downcast_ref::<crate::ws::Tick>()?;
                let op = match tick {
                    crate::ws::Tick::Change(event) => event.operation(),
                    crate::ws::Tick::Heartbeat => "HEARTBEAT",
                };
                Ok(Some(FieldValue::value(op)))
            })
        }))
        .field(Field::new("table", TypeRef::named_nn(TypeRef::STRING), {
            let table_name = table.name.clone();
            move |_ctx| {
                let table_name = table_name.clone();
                FieldFuture::new(async move { Ok(Some(FieldValue::value(table_name))) })
            }
        }))
        .field(Field::new("schema", TypeRef::named(TypeRef::STRING), |ctx| {
            FieldFuture::new(async move {
                let tick = ctx.parent_value.try_downcast_ref::<crate::ws::Tick>()?;
                Ok(match tick {
                    crate::ws::Tick::Change(event) => event.schema().map(|s| FieldValue::value(s.to_string())),
                    crate::ws::Tick::Heartbeat => None,
                })
            })
        }))
        .field(Field::new("timestamp", TypeRef::named(TypeRef::STRING), |ctx| {
            FieldFuture::new(async move {
                let tick = ctx.parent_value.try_downcast_ref::<crate::ws::Tick>()?;
                Ok(match tick {
                    crate::ws::Tick::Change(event) => event.timestamp().map(|ts| FieldValue::value(ts.to_string())),
                    crate::ws::Tick::Heartbeat => None,
                })
            })
        }))
        .field(Field::new("lsn", TypeRef::named(TypeRef::STRING), |ctx| {
            FieldFuture::new(async move {
                let tick = ctx.parent_value.try_downcast_ref::<crate::ws::Tick>()?;
                Ok(match tick {
                    crate::ws::Tick::Change(event) => event.lsn().map(|lsn| FieldValue::value(lsn.to_string())),
                    crate::ws::Tick::Heartbeat => None,
                })
            })
        }))
        .field(Field::new("data", TypeRef::named(data_type), |ctx| {
            FieldFuture::new(async move {
                let tick = ctx.parent_value.try_downcast_ref::<crate::ws::Tick>()?;
                Ok(match tick {
                    crate::ws::Tick::Change(event) => event.row().map(|row| {
                        let old = match event {
                            crate::cdc::CdcEvent::Update { old, .. } => old.clone(),
                            _ => None,
                        };
                        FieldValue::owned_any(SubscriptionDataRow { current: row.to_vec(), old })
                    }),
                    crate::ws::Tick::Heartbeat => None,
                })
            })
        }))
        .field(Field::new("error", TypeRef::named(TypeRef::STRING), |_ctx| {
            // Decode failures are logged and skipped by the listener rather
            // than surfaced per-event (no per-event error channel exists
            // yet); always null until that plumbing is added.
            FieldFuture::new(async move { Ok(None::<FieldValue>) })
        }))
}

/// Downcast target for `T_SubscriptionData`'s resolvers: the row as it
/// stands after the change, plus its pre-change values for UPDATE payloads
/// (spec §4.6/§4.8: "mirrors the row plus optional old/new self-references
/// for UPDATE payloads"). `old` carries no further `old`/`new` of its own —
/// self-reference is one level deep, matching the spec's literal field set.
#[derive(Clone)]
struct SubscriptionDataRow {
    current: Vec<(String, crate::common::Value)>,
    old: Option<Vec<(String, crate::common::Value)>>,
}

/// Builds `T_SubscriptionData` (spec §4.6/§4.8): the row's columns as they
/// stand after the change, same shape as the table's own Object type, plus
/// self-referential `old`/`new` fields populated only for UPDATE payloads.
pub fn build_subscription_data_type(table: &Table, catalog: &Catalog, registry: &mut TypeRegistry) -> Object {
    let type_name = naming::subscription_data_type_name(&table.name);
    let mut obj = Object::new(type_name.clone());
    for col in &table.columns {
        register_nested_type(&col.col_type, catalog, registry);
        let type_ref = column_type_ref(&col.col_type, true);
        let column_name = col.name.clone();
        obj = obj.field(Field::new(col.name.clone(), type_ref, move |ctx| {
            let column_name = column_name.clone();
            FieldFuture::new(async move {
                let data = ctx.parent_value.try_downcast_ref::<SubscriptionDataRow>()?;
                let value = data.current.iter().find(|(k, _)| *k == column_name).map(|(_, v)| v);
                Ok(value.map(|v| FieldValue::value(to_gql(v))))
            })
        }));
    }
    obj = obj
        .field(Field::new("old", TypeRef::named(type_name.clone()), |ctx| {
            FieldFuture::new(async move {
                let data = ctx.parent_value.try_downcast_ref::<SubscriptionDataRow>()?;
                Ok(data.old.clone().map(|old| FieldValue::owned_any(SubscriptionDataRow { current: old, old: None })))
            })
        }))
        .field(Field::new("new", TypeRef::named(type_name), |ctx| {
            FieldFuture::new(async move {
                let data = ctx.parent_value.try_downcast_ref::<SubscriptionDataRow>()?;
                Ok(data.old.is_some().then(|| {
                    FieldValue::owned_any(SubscriptionDataRow { current: data.current.clone(), old: None })
                }))
            })
        }));
    obj
}

/// Wraps a table's heartbeat-merged tick stream into the `FieldValue` stream
/// `SubscriptionFieldFuture` expects; each tick resolves against
/// `T_ChangeEvent`'s fields directly rather than being unpacked here (spec
/// §4.8 bullet 4).
pub fn change_event_stream(
    stream: impl futures_util::Stream<Item = crate::ws::Tick> + Send + 'static,
) -> impl futures_util::Stream<Item = async_graphql::Result<FieldValue<'static>>> + Send + 'static {
    stream.map(|tick| Ok(FieldValue::owned_any(tick)))
}

/// Adds a table's `T_changes` subscription field to `subscription`, built
/// from its fan-out (spec §4.8).
pub fn build_subscription_field(table: &Table) -> SubscriptionField {
    let table_name = table.name.clone();
    let type_name = naming::change_event_type_name(&table.name);
    SubscriptionField::new(format!("{}_changes", table.name), TypeRef::named_nn(type_name), move |ctx| {
        let table_name = table_name.clone();
        SubscriptionFieldFuture::new(async move {
            let state = ctx.data::<GatewayState>()?;
            let stream = crate::ws::subscribe_with_heartbeat(state.fanout.clone(), table_name);
            Ok(change_event_stream(stream))
        })
    })
}
