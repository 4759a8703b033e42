//! C6 — Mutation Executor (spec §4.5).
//!
//! Every mutation kind runs inside one transaction: a single row write
//! commits or rolls back atomically, and a bulk/relationship write commits
//! or rolls back as a whole (spec §5 Ordering guarantees: "transactions
//! wrap multi-step mutations so partial effects are never visible").
//! Mirrors the teacher's transaction-scoped-function approach to rollback
//! (`src/transaction/mod.rs`) rather than exception-driven control flow
//! (spec §9 redesign flag).

use std::collections::HashMap;

use chrono::Utc;
use deadpool_postgres::{Client, Transaction};

use crate::common::{Catalog, Column, Table, Value};
use crate::error::{GatewayError, Result};
use crate::query::RowMap;
use crate::sql::filter::quote_ident;
use crate::sql::{begin_scoped, ParamBinder};

/// The field=value map a client submits for create/update, before
/// column-type coercion (that happens inside [`crate::sql::ParamBinder`]).
pub type InputMap = HashMap<String, Value>;

fn qualified_table(table: &Table) -> String {
    format!("{}.{}", quote_ident(&table.schema), quote_ident(&table.name))
}

/// Columns eligible for request-time auto-fill: NOT NULL, no catalog
/// default, temporal type, and absent from the input (spec §4.5 Create).
fn auto_fillable_timestamp_columns<'a>(table: &'a Table, input: &InputMap) -> Vec<&'a Column> {
    table
        .columns
        .iter()
        .filter(|c| !c.nullable && !c.has_default && !c.primary_key && c.col_type.is_temporal())
        .filter(|c| !input.contains_key(&c.name))
        .collect()
}

/// **Create** (spec §4.5): input must have at least one non-null,
/// non-primary-key field. Missing NOT-NULL timestamp columns with no
/// default are auto-filled with the request start time; missing nullable
/// columns are omitted rather than bound as NULL.
pub async fn create_row(
    client: &mut Client,
    catalog: &Catalog,
    table: &Table,
    role: Option<&str>,
    input: &InputMap,
) -> Result<RowMap> {
    let txn = begin_scoped(client, role).await?;
    let row = insert_one(&txn, catalog, table, input).await?;
    txn.commit().await.map_err(GatewayError::from_db_error)?;
    Ok(row)
}

/// Inserts one row within an already-open transaction, applying the create
/// contract (spec §4.5): at least one non-PK field set, missing nullable
/// columns omitted, missing NOT-NULL timestamp columns with no default
/// auto-filled with the request start time. Shared by [`create_row`],
/// [`bulk_create`], and the relationship-create path.
async fn insert_one(txn: &Transaction<'_>, catalog: &Catalog, table: &Table, input: &InputMap) -> Result<RowMap> {
    if input.values().all(|v| v.is_null()) {
        return Err(GatewayError::argument(format!(
            "create input for `{}` must set at least one field",
            table.name
        )));
    }

    let now = Utc::now();
    let mut columns = Vec::new();
    let mut values: Vec<Value> = Vec::new();
    for col in &table.columns {
        if col.primary_key && !input.contains_key(&col.name) {
            continue;
        }
        if let Some(v) = input.get(&col.name) {
            if v.is_null() && col.nullable {
                continue;
            }
            columns.push(col);
            values.push(v.clone());
        }
    }
    for col in auto_fillable_timestamp_columns(table, input) {
        columns.push(col);
        values.push(Value::Text(now.to_rfc3339()));
    }

    if columns.is_empty() {
        return Err(GatewayError::argument(format!(
            "create input for `{}` must set at least one field",
            table.name
        )));
    }

    let mut binder = ParamBinder::new();
    let mut placeholders = Vec::with_capacity(columns.len());
    for (col, value) in columns.iter().zip(values.iter()) {
        placeholders.push(binder.bind(value, &col.col_type)?);
    }
    let col_list = columns.iter().map(|c| quote_ident(&c.name)).collect::<Vec<_>>().join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
        qualified_table(table),
        col_list,
        placeholders.join(", "),
        select_list(table),
    );

    let row = txn.query_one(sql.as_str(), &binder.params()).await.map_err(GatewayError::from_db_error)?;
    Ok(row_to_map(&row, table, catalog))
}

/// **Update** (spec §4.5): every PK field must be present; at least one
/// non-PK field must be set; zero matched rows is a `NotFoundError`.
pub async fn update_row(
    client: &mut Client,
    catalog: &Catalog,
    table: &Table,
    role: Option<&str>,
    input: &InputMap,
) -> Result<RowMap> {
    let pk_cols = table.primary_key_columns();
    for pk in &pk_cols {
        if !input.contains_key(&pk.name) {
            return Err(GatewayError::argument(format!(
                "update input for `{}` is missing primary key field `{}`",
                table.name, pk.name
            )));
        }
    }

    let set_cols: Vec<&Column> = table
        .columns
        .iter()
        .filter(|c| !c.primary_key && input.contains_key(&c.name))
        .collect();
    if set_cols.is_empty() {
        return Err(GatewayError::argument(format!(
            "update input for `{}` has nothing to change",
            table.name
        )));
    }

    let mut binder = ParamBinder::new();
    let mut set_clauses = Vec::with_capacity(set_cols.len());
    for col in &set_cols {
        let value = input.get(&col.name).expect("checked above");
        let placeholder = binder.bind(value, &col.col_type)?;
        set_clauses.push(format!("{} = {}", quote_ident(&col.name), placeholder));
    }

    let mut where_clauses = Vec::with_capacity(pk_cols.len());
    for pk in &pk_cols {
        let value = input.get(&pk.name).expect("checked above");
        let placeholder = binder.bind(value, &pk.col_type)?;
        where_clauses.push(format!("{} = {}", quote_ident(&pk.name), placeholder));
    }

    let sql = format!(
        "UPDATE {} SET {} WHERE {} RETURNING {}",
        qualified_table(table),
        set_clauses.join(", "),
        where_clauses.join(" AND "),
        select_list(table),
    );

    let txn = begin_scoped(client, role).await?;
    let row = txn.query_opt(sql.as_str(), &binder.params()).await.map_err(GatewayError::from_db_error)?;
    match row {
        Some(row) => {
            txn.commit().await.map_err(GatewayError::from_db_error)?;
            Ok(row_to_map(&row, table, catalog))
        }
        None => {
            txn.rollback().await.map_err(GatewayError::from_db_error)?;
            Err(GatewayError::not_found(format!("no row in `{}` matches the given primary key", table.name)))
        }
    }
}

/// **Delete** (spec §4.5): the input carries all PK fields (or the
/// synthesized `id` for PK-less tables); returns the deleted row.
pub async fn delete_row(
    client: &mut Client,
    catalog: &Catalog,
    table: &Table,
    role: Option<&str>,
    input: &InputMap,
) -> Result<RowMap> {
    let pk_cols = table.primary_key_columns();
    let key_cols: Vec<&Column> = if pk_cols.is_empty() {
        table.columns.iter().filter(|c| c.name == "id").collect()
    } else {
        pk_cols
    };
    for key in &key_cols {
        if !input.contains_key(&key.name) {
            return Err(GatewayError::argument(format!(
                "delete input for `{}` is missing key field `{}`",
                table.name, key.name
            )));
        }
    }

    let mut binder = ParamBinder::new();
    let mut where_clauses = Vec::with_capacity(key_cols.len());
    for key in &key_cols {
        let value = input.get(&key.name).expect("checked above");
        let placeholder = binder.bind(value, &key.col_type)?;
        where_clauses.push(format!("{} = {}", quote_ident(&key.name), placeholder));
    }

    let sql = format!(
        "DELETE FROM {} WHERE {} RETURNING {}",
        qualified_table(table),
        where_clauses.join(" AND "),
        select_list(table),
    );

    let txn = begin_scoped(client, role).await?;
    let row = txn.query_opt(sql.as_str(), &binder.params()).await.map_err(GatewayError::from_db_error)?;
    match row {
        Some(row) => {
            txn.commit().await.map_err(GatewayError::from_db_error)?;
            Ok(row_to_map(&row, table, catalog))
        }
        None => {
            txn.rollback().await.map_err(GatewayError::from_db_error)?;
            Err(GatewayError::not_found(format!("no row in `{}` matches the given key", table.name)))
        }
    }
}

/// **Bulk create** (spec §4.5): the input list must be non-empty; the
/// whole batch runs as one transaction and rolls back together on any
/// failure.
pub async fn bulk_create(
    client: &mut Client,
    catalog: &Catalog,
    table: &Table,
    role: Option<&str>,
    inputs: &[InputMap],
) -> Result<Vec<RowMap>> {
    if inputs.is_empty() {
        return Err(GatewayError::argument(format!("bulk create for `{}` must include at least one row", table.name)));
    }

    let txn = begin_scoped(client, role).await?;
    let mut rows = Vec::with_capacity(inputs.len());
    for input in inputs {
        match insert_one(&txn, catalog, table, input).await {
            Ok(row) => rows.push(row),
            Err(e) => {
                txn.rollback().await.map_err(GatewayError::from_db_error)?;
                return Err(e);
            }
        }
    }
    txn.commit().await.map_err(GatewayError::from_db_error)?;
    Ok(rows)
}

/// Nested relationship-create payload for one outgoing FK: either connect
/// to an existing referenced row by its primary key, or create it first
/// (spec §4.5 "create with relationships").
#[derive(Debug, Clone)]
pub enum RelationRef {
    Connect(InputMap),
    Create(InputMap),
}

/// **Create with relationships** (spec §4.5): runs in one transaction. For
/// each outgoing FK with a `ref_connect`/`ref_create` entry, the FK's
/// target row is resolved (validated by PK lookup, or created first) and
/// its key spliced into the primary row's input. After the primary row is
/// inserted, `child_createMany` entries are created with the primary row's
/// PK(s) injected into the matching FK column.
pub async fn create_with_relations(
    client: &mut Client,
    catalog: &Catalog,
    table: &Table,
    role: Option<&str>,
    mut fields: InputMap,
    relations: HashMap<String, RelationRef>,
    child_create_many: HashMap<String, Vec<InputMap>>,
) -> Result<RowMap> {
    let txn = begin_scoped(client, role).await?;

    for fk in &table.foreign_keys {
        let Some(rel) = relations.get(&fk.column) else { continue };
        let referenced = catalog
            .table(&fk.referenced_table)
            .ok_or_else(|| GatewayError::schema(format!("unknown referenced table `{}`", fk.referenced_table)))?;

        let resolved_key = match rel {
            RelationRef::Connect(key) => {
                let Some(value) = key.get(&fk.referenced_column) else {
                    txn.rollback().await.map_err(GatewayError::from_db_error)?;
                    return Err(GatewayError::argument(format!(
                        "ref_connect on `{}` is missing `{}`",
                        fk.column, fk.referenced_column
                    )));
                };
                if !row_exists(&txn, referenced, &fk.referenced_column, value).await? {
                    txn.rollback().await.map_err(GatewayError::from_db_error)?;
                    return Err(GatewayError::not_found(format!(
                        "no row in `{}` matches `{}` = {:?}",
                        referenced.name, fk.referenced_column, value
                    )));
                }
                value.clone()
            }
            RelationRef::Create(nested) => match insert_one(&txn, catalog, referenced, nested).await {
                Ok(row) => row.get(&fk.referenced_column).cloned().ok_or_else(|| {
                    GatewayError::schema(format!("created `{}` row has no `{}`", referenced.name, fk.referenced_column))
                })?,
                Err(e) => {
                    txn.rollback().await.map_err(GatewayError::from_db_error)?;
                    return Err(e);
                }
            },
        };
        fields.insert(fk.column.clone(), resolved_key);
    }

    let primary = match insert_one(&txn, catalog, table, &fields).await {
        Ok(row) => row,
        Err(e) => {
            txn.rollback().await.map_err(GatewayError::from_db_error)?;
            return Err(e);
        }
    };

    for (child_table_name, children) in child_create_many {
        let child_table = match catalog.table(&child_table_name) {
            Some(t) => t,
            None => {
                txn.rollback().await.map_err(GatewayError::from_db_error)?;
                return Err(GatewayError::schema(format!("unknown child table `{child_table_name}`")));
            }
        };
        let fk = match child_table.foreign_keys.iter().find(|fk| fk.referenced_table == table.name) {
            Some(fk) => fk,
            None => {
                txn.rollback().await.map_err(GatewayError::from_db_error)?;
                return Err(GatewayError::schema(format!(
                    "`{child_table_name}` has no foreign key referencing `{}`",
                    table.name
                )));
            }
        };
        let Some(parent_key) = primary.get(&fk.referenced_column).cloned() else {
            txn.rollback().await.map_err(GatewayError::from_db_error)?;
            return Err(GatewayError::schema(format!("primary row has no `{}`", fk.referenced_column)));
        };
        for mut child_input in children {
            child_input.insert(fk.column.clone(), parent_key.clone());
            if let Err(e) = insert_one(&txn, catalog, child_table, &child_input).await {
                txn.rollback().await.map_err(GatewayError::from_db_error)?;
                return Err(e);
            }
        }
    }

    txn.commit().await.map_err(GatewayError::from_db_error)?;
    Ok(primary)
}

async fn row_exists(txn: &Transaction<'_>, table: &Table, column: &str, value: &Value) -> Result<bool> {
    let col_type = table
        .column(column)
        .map(|c| c.col_type.clone())
        .ok_or_else(|| GatewayError::argument(format!("unknown column `{column}` on `{}`", table.name)))?;
    let mut binder = ParamBinder::new();
    let placeholder = binder.bind(value, &col_type)?;
    let sql = format!(
        "SELECT 1 FROM {} WHERE {} = {} LIMIT 1",
        qualified_table(table),
        quote_ident(column),
        placeholder
    );
    Ok(txn.query_opt(sql.as_str(), &binder.params()).await.map_err(GatewayError::from_db_error)?.is_some())
}

fn select_list(table: &Table) -> String {
    table
        .columns
        .iter()
        .map(|c| format!("{}::text AS {}", quote_ident(&c.name), quote_ident(&c.name)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn row_to_map(row: &tokio_postgres::Row, table: &Table, catalog: &Catalog) -> RowMap {
    let mut out = HashMap::with_capacity(table.columns.len());
    for col in &table.columns {
        let raw: Option<String> = row.get(col.name.as_str());
        out.insert(col.name.clone(), crate::sql::convert::value_from_text(raw.as_deref(), &col.col_type, catalog));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ColumnType;

    fn orders_table() -> Table {
        Table {
            name: "orders".into(),
            schema: "public".into(),
            is_view: false,
            columns: vec![
                Column::new("id", ColumnType::Int4, false, 1).as_primary_key(),
                Column::new("status", ColumnType::Text, true, 2),
                Column::new("created_at", ColumnType::TimestampTz, false, 3),
            ],
            foreign_keys: vec![],
        }
    }

    #[test]
    fn auto_fills_missing_not_null_timestamp_without_default() {
        let table = orders_table();
        let input: InputMap = HashMap::from([("status".to_string(), Value::Text("pending".into()))]);
        let cols = auto_fillable_timestamp_columns(&table, &input);
        assert_eq!(cols.len(), 1);
        assert_eq!(cols[0].name, "created_at");
    }

    #[test]
    fn does_not_refill_explicitly_provided_timestamp() {
        let table = orders_table();
        let input: InputMap =
            HashMap::from([("created_at".to_string(), Value::Text("2024-01-01T00:00:00Z".into()))]);
        let cols = auto_fillable_timestamp_columns(&table, &input);
        assert!(cols.is_empty());
    }
}
