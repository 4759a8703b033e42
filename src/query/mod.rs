//! C5 — Query Executor (spec §4.4).
//!
//! Builds and runs flat and Relay-connection reads from a [`FilterTree`],
//! an ordering, and a pagination window, then converts rows back to
//! GraphQL-shaped values via [`crate::sql::convert`]. The generated SQL
//! always selects every column cast to `text` (`col::text AS "col"`) so
//! row conversion has exactly one input shape to parse, matching the
//! teacher's preference for one canonical on-wire representation over a
//! `FromSql` impl per possible driver type (`src/storage/page.rs`).

use std::collections::HashMap;

use deadpool_postgres::Client;

use crate::common::{Catalog, Table, Value};
use crate::error::{GatewayError, Result};
use crate::sql::{begin_scoped, decode_cursor, encode_cursor, FilterTree, OrderByEntry, OrderingKey, ParamBinder, SortDirection};
use crate::sql::convert::value_from_text;
use crate::sql::filter::quote_ident;

/// A single projected row, keyed by column name.
pub type RowMap = HashMap<String, Value>;

#[derive(Debug, Clone)]
pub struct PageInfo {
    pub has_next_page: bool,
    pub has_previous_page: bool,
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub node: RowMap,
    pub cursor: String,
}

#[derive(Debug, Clone)]
pub struct ConnectionResult {
    pub edges: Vec<Edge>,
    pub page_info: PageInfo,
    pub total_count: i64,
}

/// Relay pagination arguments for a connection field (spec §4.4).
#[derive(Debug, Clone, Default)]
pub struct ConnectionArgs {
    pub first: Option<i64>,
    pub after: Option<String>,
    pub last: Option<i64>,
    pub before: Option<String>,
}

fn select_list(table: &Table) -> String {
    table
        .columns
        .iter()
        .map(|c| format!("{}::text AS {}", quote_ident(&c.name), quote_ident(&c.name)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn qualified_table(table: &Table) -> String {
    format!("{}.{}", quote_ident(&table.schema), quote_ident(&table.name))
}

fn row_to_map(row: &tokio_postgres::Row, table: &Table, catalog: &Catalog) -> RowMap {
    let mut out = HashMap::with_capacity(table.columns.len());
    for col in &table.columns {
        let raw: Option<String> = row.get(col.name.as_str());
        out.insert(col.name.clone(), value_from_text(raw.as_deref(), &col.col_type, catalog));
    }
    out
}

/// Appends primary-key columns to `order_by` as a stable tiebreaker if none
/// of them are already present (spec §4.4 Ordering).
fn with_pk_tiebreaker(table: &Table, order_by: &[OrderByEntry]) -> Vec<OrderByEntry> {
    let mut out = order_by.to_vec();
    for pk in table.primary_key_columns() {
        if !out.iter().any(|o| o.column == pk.name) {
            out.push(OrderByEntry { column: pk.name.clone(), direction: SortDirection::Asc });
        }
    }
    out
}

fn order_by_sql(order_by: &[OrderByEntry]) -> String {
    if order_by.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = order_by
        .iter()
        .map(|o| format!("{} {}", quote_ident(&o.column), o.direction.as_sql()))
        .collect();
    format!(" ORDER BY {}", parts.join(", "))
}

fn ordering_key(row: &RowMap, order_by: &[OrderByEntry]) -> OrderingKey {
    order_by
        .iter()
        .map(|o| (o.column.clone(), row.get(&o.column).cloned().unwrap_or(Value::Null)))
        .collect()
}

/// Flat read: `where`/`or`, `orderBy`, `limit`/`offset` pass straight
/// through (spec §4.4 Pagination, offset form).
pub async fn fetch_flat(
    client: &mut Client,
    catalog: &Catalog,
    table: &Table,
    role: Option<&str>,
    filter: &FilterTree,
    order_by: &[OrderByEntry],
    limit: Option<i64>,
    offset: Option<i64>,
) -> Result<Vec<RowMap>> {
    let mut binder = ParamBinder::new();
    let predicate = filter.to_sql(&mut binder)?;
    let mut sql = format!("SELECT {} FROM {} WHERE {}", select_list(table), qualified_table(table), predicate);
    sql.push_str(&order_by_sql(order_by));
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    if let Some(offset) = offset {
        sql.push_str(&format!(" OFFSET {offset}"));
    }

    let txn = begin_scoped(client, role).await?;
    let rows = txn.query(sql.as_str(), &binder.params()).await.map_err(GatewayError::from_db_error)?;
    txn.commit().await.map_err(GatewayError::from_db_error)?;
    Ok(rows.iter().map(|r| row_to_map(r, table, catalog)).collect())
}

/// Looks a single row up by its primary-key values — used for forward FK
/// resolution and the create-return-read property (spec §8 property 4).
pub async fn fetch_by_pk(
    client: &mut Client,
    catalog: &Catalog,
    table: &Table,
    role: Option<&str>,
    pk_values: &[(String, Value)],
) -> Result<Option<RowMap>> {
    let mut binder = ParamBinder::new();
    let mut clauses = Vec::with_capacity(pk_values.len());
    for (col, value) in pk_values {
        let col_type = table
            .column(col)
            .map(|c| c.col_type.clone())
            .ok_or_else(|| GatewayError::argument(format!("unknown primary key column `{col}`")))?;
        let placeholder = binder.bind(value, &col_type)?;
        clauses.push(format!("{} = {}", quote_ident(col), placeholder));
    }
    let sql = format!(
        "SELECT {} FROM {} WHERE {} LIMIT 1",
        select_list(table),
        qualified_table(table),
        clauses.join(" AND ")
    );
    let txn = begin_scoped(client, role).await?;
    let row = txn.query_opt(sql.as_str(), &binder.params()).await.map_err(GatewayError::from_db_error)?;
    txn.commit().await.map_err(GatewayError::from_db_error)?;
    Ok(row.map(|r| row_to_map(&r, table, catalog)))
}

/// Rows of `table` whose foreign key `fk_column` equals `value` — the
/// reverse-relationship resolver (spec §4.3, §8 property 2).
pub async fn fetch_by_foreign_key(
    client: &mut Client,
    catalog: &Catalog,
    table: &Table,
    role: Option<&str>,
    fk_column: &str,
    value: &Value,
) -> Result<Vec<RowMap>> {
    let col_type = table
        .column(fk_column)
        .map(|c| c.col_type.clone())
        .ok_or_else(|| GatewayError::argument(format!("unknown foreign key column `{fk_column}`")))?;
    let mut binder = ParamBinder::new();
    let placeholder = binder.bind(value, &col_type)?;
    let sql = format!(
        "SELECT {} FROM {} WHERE {} = {}",
        select_list(table),
        qualified_table(table),
        quote_ident(fk_column),
        placeholder
    );
    let txn = begin_scoped(client, role).await?;
    let rows = txn.query(sql.as_str(), &binder.params()).await.map_err(GatewayError::from_db_error)?;
    txn.commit().await.map_err(GatewayError::from_db_error)?;
    Ok(rows.iter().map(|r| row_to_map(r, table, catalog)).collect())
}

pub async fn count_rows(client: &mut Client, table: &Table, role: Option<&str>, filter: &FilterTree) -> Result<i64> {
    let mut binder = ParamBinder::new();
    let predicate = filter.to_sql(&mut binder)?;
    let sql = format!("SELECT COUNT(*) FROM {} WHERE {}", qualified_table(table), predicate);
    let txn = begin_scoped(client, role).await?;
    let row = txn.query_one(sql.as_str(), &binder.params()).await.map_err(GatewayError::from_db_error)?;
    txn.commit().await.map_err(GatewayError::from_db_error)?;
    Ok(row.get::<_, i64>(0))
}

/// Relay-style connection read (spec §4.4 Pagination, cursor form).
///
/// Ordering columns are compared as a PostgreSQL row value
/// (`(a, b) > ($1, $2)`), which gives exactly the "strictly greater/less
/// than the decoded tuple" semantics the spec asks for when every ordering
/// column shares one direction — the common case once a primary-key
/// tiebreaker is appended. Mixed-direction multi-column orderings are a
/// spec open question (§9); see DESIGN.md.
pub async fn fetch_connection(
    client: &mut Client,
    catalog: &Catalog,
    table: &Table,
    role: Option<&str>,
    filter: &FilterTree,
    order_by: &[OrderByEntry],
    args: &ConnectionArgs,
) -> Result<ConnectionResult> {
    let order_by = with_pk_tiebreaker(table, order_by);
    let primary_direction = order_by.first().map(|o| o.direction).unwrap_or(SortDirection::Asc);

    let backward = args.last.is_some() || args.before.is_some();
    let page_size = if backward { args.last } else { args.first }.unwrap_or(100);
    let cursor = if backward { args.before.as_deref() } else { args.after.as_deref() };

    // Query in reverse order for backward pagination, then flip the
    // fetched page back into display order before returning it.
    let query_order: Vec<OrderByEntry> = if backward {
        order_by.iter().map(|o| OrderByEntry { column: o.column.clone(), direction: o.direction.reversed() }).collect()
    } else {
        order_by.clone()
    };

    let mut binder = ParamBinder::new();
    let predicate = filter.to_sql(&mut binder)?;

    let mut clauses = vec![format!("({predicate})")];
    if let Some(cursor) = cursor {
        let key = decode_cursor(cursor)?;
        let cmp = match (backward, primary_direction) {
            (false, SortDirection::Asc) | (true, SortDirection::Desc) => ">",
            (false, SortDirection::Desc) | (true, SortDirection::Asc) => "<",
        };
        clauses.push(format!("({})", cursor_predicate(table, &key, cmp, &mut binder)?));
    }

    let sql = format!(
        "SELECT {} FROM {} WHERE {}{} LIMIT {}",
        select_list(table),
        qualified_table(table),
        clauses.join(" AND "),
        order_by_sql(&query_order),
        page_size + 1,
    );

    let txn = begin_scoped(client, role).await?;
    let rows = txn.query(sql.as_str(), &binder.params()).await.map_err(GatewayError::from_db_error)?;
    txn.commit().await.map_err(GatewayError::from_db_error)?;

    let has_extra = rows.len() as i64 > page_size;
    let mut maps: Vec<RowMap> = rows.iter().take(page_size as usize).map(|r| row_to_map(r, table, catalog)).collect();
    if backward {
        maps.reverse();
    }

    let edges: Vec<Edge> = maps
        .into_iter()
        .map(|node| {
            let cursor = encode_cursor(&ordering_key(&node, &order_by));
            Edge { node, cursor }
        })
        .collect();

    let total_count = count_rows(client, table, role, filter).await?;

    let page_info = PageInfo {
        has_next_page: if backward { args.before.is_some() } else { has_extra },
        has_previous_page: if backward { has_extra } else { args.after.is_some() },
        start_cursor: edges.first().map(|e| e.cursor.clone()),
        end_cursor: edges.last().map(|e| e.cursor.clone()),
    };

    Ok(ConnectionResult { edges, page_info, total_count })
}

fn cursor_predicate(table: &Table, key: &OrderingKey, cmp: &str, binder: &mut ParamBinder) -> Result<String> {
    let mut cols = Vec::with_capacity(key.len());
    let mut placeholders = Vec::with_capacity(key.len());
    for (col, value) in key {
        let col_type = table
            .column(col)
            .map(|c| c.col_type.clone())
            .ok_or_else(|| GatewayError::argument(format!("unknown ordering column `{col}` in cursor")))?;
        cols.push(quote_ident(col));
        placeholders.push(binder.bind(value, &col_type)?);
    }
    Ok(format!("({}) {} ({})", cols.join(", "), cmp, placeholders.join(", ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Column, ColumnType};

    fn sample_table() -> Table {
        Table {
            name: "posts".into(),
            schema: "public".into(),
            is_view: false,
            columns: vec![Column::new("id", ColumnType::Int4, false, 1).as_primary_key()],
            foreign_keys: vec![],
        }
    }

    #[test]
    fn pk_tiebreaker_is_appended_when_absent() {
        let table = sample_table();
        let order_by = vec![];
        let result = with_pk_tiebreaker(&table, &order_by);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].column, "id");
    }

    #[test]
    fn pk_tiebreaker_is_not_duplicated() {
        let table = sample_table();
        let order_by = vec![OrderByEntry { column: "id".into(), direction: SortDirection::Desc }];
        let result = with_pk_tiebreaker(&table, &order_by);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].direction, SortDirection::Desc);
    }

    #[test]
    fn ordering_key_extracts_values_in_order() {
        let mut row = RowMap::new();
        row.insert("id".into(), Value::Int(7));
        let key = ordering_key(&row, &[OrderByEntry { column: "id".into(), direction: SortDirection::Asc }]);
        assert_eq!(key, vec![("id".to_string(), Value::Int(7))]);
    }
}
