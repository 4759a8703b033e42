//! Error taxonomy for the gateway (see spec §7).
//!
//! A single flat `thiserror` enum, one variant per error *kind*, following
//! the shape of the teacher's `DbError` (`error.rs`) but restricted to the
//! kinds the specification actually names instead of the teacher's
//! accreted duplicate variants.

use thiserror::Error;

/// Top level error type returned by every gateway subsystem.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Malformed input, missing PK on update/delete, empty bulk create,
    /// invalid operator combination. Never retried.
    #[error("argument error: {0}")]
    Argument(String),

    /// The addressed row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Unique/PK/FK/check violation surfaced by the database.
    #[error("conflict on constraint `{constraint}`: {message}")]
    Conflict { constraint: String, message: String },

    /// Any other mutation failure; the owning transaction is rolled back.
    #[error("mutation failed: {0}")]
    DataMutation(String),

    /// Catalog reflection failed. A stale cache entry may continue serving
    /// while a fresh reflection is retried in the background.
    #[error("schema error: {0}")]
    Schema(String),

    /// Decoded-stream or WebSocket-protocol failure. Surfaced inline on the
    /// next subscription event rather than closing the stream, except for
    /// protocol-level failures which do close the socket.
    #[error("subscription error: {0}")]
    Subscription(String),

    /// Resource exhaustion or misconfiguration severe enough that the
    /// affected subsystem must be restarted by an external supervisor.
    #[error("fatal: {0}")]
    Fatal(String),

    #[error("database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    /// Machine readable code placed in `errors[].extensions.code` (§7).
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Argument(_) => "ARGUMENT_ERROR",
            GatewayError::NotFound(_) => "NOT_FOUND",
            GatewayError::Conflict { .. } => "CONFLICT",
            GatewayError::DataMutation(_) => "DATA_MUTATION_ERROR",
            GatewayError::Schema(_) => "SCHEMA_ERROR",
            GatewayError::Subscription(_) => "SUBSCRIPTION_ERROR",
            GatewayError::Fatal(_) => "FATAL",
            GatewayError::Database(_) => "DATABASE_ERROR",
            GatewayError::Pool(_) => "POOL_ERROR",
            GatewayError::Io(_) => "IO_ERROR",
            GatewayError::Json(_) => "JSON_ERROR",
        }
    }

    pub fn argument(msg: impl Into<String>) -> Self {
        GatewayError::Argument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        GatewayError::NotFound(msg.into())
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        GatewayError::Schema(msg.into())
    }

    /// Classify a raw driver error into a `Conflict`/`DataMutation` kind by
    /// inspecting the SQLSTATE code, the way a mutation executor must before
    /// it can report a constraint name back to the client (§7).
    pub fn from_db_error(err: tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let code = db_err.code().code();
            // 23xxx = integrity constraint violation family.
            if code.starts_with("23") {
                let constraint = db_err.constraint().unwrap_or("unknown").to_string();
                return GatewayError::Conflict {
                    constraint,
                    message: db_err.message().to_string(),
                };
            }
        }
        GatewayError::DataMutation(err.to_string())
    }
}

/// Converts a gateway error into an `async_graphql::Error` carrying the
/// machine readable code as a GraphQL error extension (§7 Propagation).
impl From<GatewayError> for async_graphql::Error {
    fn from(err: GatewayError) -> Self {
        let code = err.code();
        async_graphql::Error::new(err.to_string()).extend_with(|_, e| e.set("code", code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(GatewayError::argument("x").code(), "ARGUMENT_ERROR");
        assert_eq!(GatewayError::not_found("x").code(), "NOT_FOUND");
        assert_eq!(
            GatewayError::Conflict {
                constraint: "pk".into(),
                message: "dup".into()
            }
            .code(),
            "CONFLICT"
        );
    }

    #[test]
    fn converts_into_graphql_error() {
        let err: async_graphql::Error = GatewayError::not_found("orders/1").into();
        assert!(err.message.contains("orders/1"));
    }
}
