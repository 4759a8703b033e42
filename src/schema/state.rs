//! Request-scoped and schema-scoped data injected into the dynamic schema
//! via `.data(...)` (spec §6 `X-Database-Role`, §5 pooled-connection role
//! scoping).

use std::sync::Arc;

use deadpool_postgres::Pool;

use crate::cdc::fanout::FanoutRegistry;
use crate::cdc::listener::Listener;
use crate::common::Catalog;
use crate::config::GatewayConfig;

/// Schema-wide dependencies, shared by every resolver for the lifetime of
/// one generated schema (one per (catalog-snapshot-id, role) pair, spec
/// §3 Lifecycle).
#[derive(Clone)]
pub struct GatewayState {
    pub pool: Pool,
    pub catalog: Arc<Catalog>,
    pub fanout: Arc<FanoutRegistry>,
    pub config: GatewayConfig,
    /// Present only when CDC is enabled (spec §4.6); lets the `health` root
    /// field report replication status without the resolver reaching past
    /// `GatewayState` for it.
    pub listener: Option<Arc<Listener>>,
}

/// The database role this request's session is scoped to (spec §4.2,
/// §6 `X-Database-Role`). Absent when role-based security is disabled or
/// the header was not sent.
#[derive(Clone, Default)]
pub struct RequestRole(pub Option<String>);

impl RequestRole {
    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }
}
