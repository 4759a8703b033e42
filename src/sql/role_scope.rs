//! Role-scoped SQL execution (spec §4.2: "All SQL issued by C4/C6 must be
//! prefixed ... with a role-switch operation scoped to the request and
//! reset at request end to avoid role leakage across pooled connections").
//!
//! `SET LOCAL ROLE` only lives for the current transaction, so every
//! role-scoped statement — reads included — runs inside one. When the
//! transaction ends (commit or rollback) PostgreSQL resets the role by
//! itself; there is no separate "reset" step to forget to run before the
//! connection goes back to the pool.

use deadpool_postgres::{Client, Transaction};

use crate::error::{GatewayError, Result};
use crate::sql::filter::quote_ident;

/// Opens a transaction and, if `role` is set, switches into it for the
/// transaction's lifetime. Callers run their statements against the
/// returned [`Transaction`] and must `commit()`/`rollback()` it themselves.
pub async fn begin_scoped<'a>(client: &'a mut Client, role: Option<&str>) -> Result<Transaction<'a>> {
    let txn = client.transaction().await.map_err(GatewayError::from_db_error)?;
    if let Some(role) = role {
        let stmt = format!("SET LOCAL ROLE {}", quote_ident(role));
        txn.batch_execute(&stmt).await.map_err(GatewayError::from_db_error)?;
    }
    Ok(txn)
}
