//! Recognized configuration surface (spec §6).
//!
//! Loading (env/file parsing, validation, CLI flags) is deliberately out of
//! scope (spec §1) — this is just the typed value the core subsystems read.
//! Mirrors the teacher's `Config` in `src/lib.rs`: a flat struct of
//! primitives with a hand-written `Default`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// The database schema to expose.
    pub allowed_schema: String,
    pub cache: CacheConfig,
    pub security: SecurityConfig,
    pub cdc: CdcConfig,
    /// Selects the back-end implementation family. The core ships one
    /// family (`"postgres"`); the field exists so an embedding binary can
    /// reject unsupported values at the boundary.
    pub database_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub schema_ttl_minutes: u64,
    pub role_privileges_ttl_minutes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub role_based_schema: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdcConfig {
    pub enabled: bool,
    pub slot_name: String,
    pub publication_name: String,
    pub heartbeat_seconds: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            allowed_schema: "public".to_string(),
            cache: CacheConfig {
                schema_ttl_minutes: 60,
                role_privileges_ttl_minutes: 60,
            },
            security: SecurityConfig {
                role_based_schema: false,
            },
            cdc: CdcConfig {
                enabled: false,
                slot_name: "cdc_slot".to_string(),
                publication_name: "cdc_publication".to_string(),
                heartbeat_seconds: 30,
            },
            database_type: "postgres".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.cache.schema_ttl_minutes, 60);
        assert_eq!(cfg.cdc.heartbeat_seconds, 30);
        assert!(!cfg.security.role_based_schema);
    }
}
