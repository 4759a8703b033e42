//! Process bootstrap for the GraphQL gateway server.
//!
//! Configuration loading, authentication, and logging *setup* are
//! deliberately out of scope for the core (spec §1) — this binary is the
//! external collaborator that owns them, reading a handful of environment
//! variables into a [`pg_graphkit::GatewayConfig`] and handing the rest to
//! [`pg_graphkit::server`]. Banner + structured-logging style follows the
//! teacher's `src/main.rs` (`tracing_subscriber::fmt()` init, a startup
//! banner, then a blocking serve call).

use std::env;
use std::time::Duration;

use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::NoTls;
use tracing::{error, info};

use pg_graphkit::cdc::fanout::FanoutRegistry;
use pg_graphkit::cdc::listener::{Listener, ListenerConfig};
use pg_graphkit::config::{CacheConfig, CdcConfig, GatewayConfig, SecurityConfig};
use pg_graphkit::server::{build_router, GraphQLGateway};

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_flag(key: &str, default: bool) -> bool {
    env::var(key).map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes")).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn config_from_env() -> GatewayConfig {
    GatewayConfig {
        allowed_schema: env_or("ALLOWED_SCHEMA", "public"),
        cache: CacheConfig {
            schema_ttl_minutes: env_u64("SCHEMA_TTL_MINUTES", 60),
            role_privileges_ttl_minutes: env_u64("ROLE_PRIVILEGES_TTL_MINUTES", 60),
        },
        security: SecurityConfig { role_based_schema: env_flag("ROLE_BASED_SCHEMA", false) },
        cdc: CdcConfig {
            enabled: env_flag("CDC_ENABLED", false),
            slot_name: env_or("CDC_SLOT_NAME", "cdc_slot"),
            publication_name: env_or("CDC_PUBLICATION_NAME", "cdc_publication"),
            heartbeat_seconds: env_u64("CDC_HEARTBEAT_SECONDS", 30),
        },
        database_type: env_or("DATABASE_TYPE", "postgres"),
    }
}

fn build_pool(database_url: &str) -> Result<Pool, Box<dyn std::error::Error>> {
    let pg_config: tokio_postgres::Config = database_url.parse()?;
    let manager = Manager::from_config(pg_config, NoTls, ManagerConfig { recycling_method: RecyclingMethod::Fast });
    Ok(Pool::builder(manager).max_size(16).build()?)
}

fn print_banner() {
    println!("╔══════════════════════════════════════════════════════╗");
    println!("║  pg-graphkit — automatic GraphQL gateway over Postgres  ║");
    println!("╚══════════════════════════════════════════════════════╝");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_target(false).with_level(true).init();
    print_banner();

    let database_url = env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set")?;
    let bind_addr = env_or("BIND_ADDR", "0.0.0.0:8080");
    let config = config_from_env();

    info!(schema = %config.allowed_schema, role_based = config.security.role_based_schema, "starting gateway");

    let pool = build_pool(&database_url)?;
    let fanout = FanoutRegistry::new();

    let (listener, shutdown_tx) = if config.cdc.enabled {
        let conninfo = env::var("REPLICATION_DATABASE_URL").unwrap_or_else(|_| database_url.clone());
        let listener_config = ListenerConfig {
            conninfo,
            slot_name: config.cdc.slot_name.clone(),
            publication_name: config.cdc.publication_name.clone(),
        };
        let listener = Listener::new(listener_config, fanout.clone());
        let (tx, rx) = tokio::sync::watch::channel(false);
        tokio::spawn({
            let listener = listener.clone();
            async move { listener.run(rx).await }
        });
        (Some(listener), Some(tx))
    } else {
        (None, None)
    };

    let gateway = GraphQLGateway::new(pool, config, fanout, listener);
    let app = build_router(gateway);

    info!(addr = %bind_addr, "listening");
    let tcp_listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    let serve_result = axum::serve(tcp_listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await;

    if let Some(tx) = shutdown_tx {
        let _ = tx.send(true);
        // Give the CDC listener a moment to observe the shutdown signal and
        // close its replication connection before the process exits.
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    if let Err(err) = serve_result {
        error!(error = %err, "server exited with error");
        return Err(Box::new(err));
    }

    info!("shutdown complete");
    Ok(())
}
