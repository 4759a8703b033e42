//! Interactive GraphQL client for the gateway core.
//!
//! Reflects a live database once, builds the dynamic schema in-process, and
//! evaluates operations typed at a prompt — no HTTP/WebSocket layer, no
//! pool. Grounded on the teacher's `src/cli.rs` REPL (buffered stdin loop,
//! `exit`/`quit` to leave, a banner on start), with the wire protocol
//! replaced end to end: this client talks to `async_graphql::dynamic::Schema`
//! directly instead of speaking the teacher's binary request/response frames.

use std::io::Write as _;

use tokio::io::{stdin, AsyncBufReadExt, BufReader};
use tokio_postgres::NoTls;

use pg_graphkit::catalog::{filter_for_role, load_role_privileges, Reflector};
use pg_graphkit::schema::generator::build_schema;
use pg_graphkit::{GatewayError, Result};

fn print_banner() {
    println!("╔══════════════════════════════════════════════════════════╗");
    println!("║        pg-graphkit CLI - interactive GraphQL client         ║");
    println!("╚══════════════════════════════════════════════════════════╝");
    println!();
}

#[tokio::main]
async fn main() -> Result<()> {
    print_banner();

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| {
        "host=localhost user=postgres dbname=postgres".to_string()
    });
    let schema_name = std::env::var("ALLOWED_SCHEMA").unwrap_or_else(|_| "public".to_string());
    let role = std::env::var("DATABASE_ROLE").ok();

    println!("Connecting to {database_url}...");
    let (client, connection) = tokio_postgres::connect(&database_url, NoTls).await.map_err(GatewayError::from)?;
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            eprintln!("connection closed: {err}");
        }
    });

    println!("Reflecting schema \"{schema_name}\"...");
    let mut catalog = Reflector::reflect(&client, &schema_name).await?;
    catalog.snapshot_id = 1;

    let privileges = match &role {
        Some(role) => Some(load_role_privileges(&client, role).await?),
        None => None,
    };
    let catalog = match &privileges {
        Some(privileges) => filter_for_role(&catalog, privileges),
        None => catalog,
    };

    let schema = build_schema(&catalog, privileges.as_ref())?;
    println!("Ready. {} tables exposed. Type a GraphQL operation or 'exit' to quit.", catalog.tables.len());
    println!("Multi-line input is read until a blank line.");
    println!();

    let mut reader = BufReader::new(stdin());
    loop {
        print!("graphql> ");
        std::io::stdout().flush().ok();

        let mut operation = String::new();
        loop {
            let mut line = String::new();
            let bytes_read = reader.read_line(&mut line).await?;
            if bytes_read == 0 {
                println!();
                return Ok(());
            }
            if line.trim().is_empty() {
                break;
            }
            operation.push_str(&line);
        }

        let operation = operation.trim();
        if operation.is_empty() {
            continue;
        }
        if operation.eq_ignore_ascii_case("exit") || operation.eq_ignore_ascii_case("quit") {
            println!("Goodbye!");
            break;
        }

        let response = schema.execute(operation).await;
        match serde_json::to_string_pretty(&response) {
            Ok(json) => println!("{json}"),
            Err(err) => println!("ERROR: failed to serialize response: {err}"),
        }
        println!();
    }

    Ok(())
}
