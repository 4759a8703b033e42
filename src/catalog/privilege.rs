//! C2 — Privilege Filter (spec §4.2).
//!
//! Queries role grants and RLS policies, then trims a [`Catalog`] to the
//! surface a role may see. This never bypasses database-enforced security —
//! it only decides which GraphQL fields get *generated*; the database still
//! enforces every grant and policy on the SQL the executors issue.

use tokio_postgres::Client;
use tracing::instrument;

use crate::common::{Catalog, Privilege, RolePrivileges, RlsPolicy, Table};
use crate::error::{GatewayError, Result};

/// Role name understood to mean "bypasses everything" for this gateway's
/// purposes (actual superuser-ness is still verified against
/// `pg_roles.rolsuper`).
#[instrument(skip(client))]
pub async fn load_role_privileges(client: &Client, role: &str) -> Result<RolePrivileges> {
    let is_superuser = role_is_superuser(client, role).await?;
    if is_superuser {
        return Ok(RolePrivileges {
            is_superuser: true,
            ..Default::default()
        });
    }

    if !role_exists(client, role).await? {
        // Unknown roles get an empty privilege set -> empty schema
        // (spec §4.2).
        return Ok(RolePrivileges::default());
    }

    let mut privileges = RolePrivileges::default();
    load_table_privileges(client, role, &mut privileges).await?;
    load_column_privileges(client, role, &mut privileges).await?;
    privileges.rls_policies = load_rls_policies(client, role).await?;
    Ok(privileges)
}

async fn role_is_superuser(client: &Client, role: &str) -> Result<bool> {
    const SQL: &str = "SELECT rolsuper FROM pg_roles WHERE rolname = $1";
    let row = client.query_opt(SQL, &[&role]).await.map_err(GatewayError::from_db_error)?;
    Ok(row.map(|r| r.get::<_, bool>(0)).unwrap_or(false))
}

async fn role_exists(client: &Client, role: &str) -> Result<bool> {
    const SQL: &str = "SELECT 1 FROM pg_roles WHERE rolname = $1";
    Ok(client
        .query_opt(SQL, &[&role])
        .await
        .map_err(GatewayError::from_db_error)?
        .is_some())
}

async fn load_table_privileges(client: &Client, role: &str, out: &mut RolePrivileges) -> Result<()> {
    const SQL: &str = r#"
        SELECT table_name, privilege_type
        FROM information_schema.role_table_grants
        WHERE grantee = $1
    "#;
    let rows = client.query(SQL, &[&role]).await.map_err(GatewayError::from_db_error)?;
    for row in rows {
        let table: String = row.get(0);
        let privilege: String = row.get(1);
        match privilege.as_str() {
            "SELECT" => {
                out.selectable_tables.insert(table);
            }
            "INSERT" => {
                out.insertable_tables.insert(table);
            }
            "UPDATE" => {
                out.updatable_tables.insert(table);
            }
            "DELETE" => {
                out.deletable_tables.insert(table);
            }
            _ => {}
        }
    }
    Ok(())
}

async fn load_column_privileges(client: &Client, role: &str, out: &mut RolePrivileges) -> Result<()> {
    const SQL: &str = r#"
        SELECT table_name, column_name, privilege_type
        FROM information_schema.role_column_grants
        WHERE grantee = $1
    "#;
    let rows = client.query(SQL, &[&role]).await.map_err(GatewayError::from_db_error)?;
    for row in rows {
        let table: String = row.get(0);
        let column: String = row.get(1);
        let privilege: String = row.get(2);
        let priv_tag = match privilege.as_str() {
            "SELECT" => Privilege::Select,
            "INSERT" => Privilege::Insert,
            "UPDATE" => Privilege::Update,
            "DELETE" => Privilege::Delete,
            _ => continue,
        };
        out.column_privileges
            .entry(table)
            .or_default()
            .entry(column)
            .or_default()
            .insert(priv_tag, true);
    }
    Ok(())
}

async fn load_rls_policies(client: &Client, role: &str) -> Result<Vec<RlsPolicy>> {
    const SQL: &str = r#"
        SELECT p.polname, c.relname, p.polpermissive, p.polcmd
        FROM pg_policy p
        JOIN pg_class c ON c.oid = p.polrelid
        WHERE $1 = ANY(SELECT rolname FROM pg_roles WHERE oid = ANY(p.polroles))
           OR 0 = ANY(p.polroles) -- polroles containing 0 means PUBLIC
    "#;
    let rows = client.query(SQL, &[&role]).await.map_err(GatewayError::from_db_error)?;
    Ok(rows
        .into_iter()
        .map(|row| {
            let cmd: i8 = row.get::<_, i8>(3);
            RlsPolicy {
                name: row.get(0),
                table: row.get(1),
                permissive: row.get(2),
                roles: vec![role.to_string()],
                command: (cmd as u8 as char).to_string(),
                using: None,
                with_check: None,
            }
        })
        .collect())
}

/// Produces a restricted view of `catalog` for `privileges` (spec §4.2):
/// superusers get the catalog unchanged; other roles lose tables/columns
/// they cannot `SELECT`. Write capability is not removed from the catalog
/// itself — the schema generator decides whether to emit mutation fields
/// by asking `privileges` directly.
pub fn filter_for_role(catalog: &Catalog, privileges: &RolePrivileges) -> Catalog {
    if privileges.is_superuser {
        return catalog.clone();
    }

    let tables: Vec<Table> = catalog
        .tables
        .iter()
        .filter(|t| privileges.can_select_table(&t.name))
        .map(|t| {
            let mut t = t.clone();
            t.columns.retain(|c| privileges.can_select_column(&t.name, &c.name));
            t
        })
        .collect();

    Catalog {
        schema: catalog.schema.clone(),
        tables,
        enums: catalog.enums.clone(),
        composites: catalog.composites.clone(),
        domains: catalog.domains.clone(),
        snapshot_id: catalog.snapshot_id,
    }
}

struct CachedPrivileges {
    privileges: RolePrivileges,
    fetched_at: std::time::Instant,
}

/// TTL-cached [`RolePrivileges`] per role name (spec §6
/// `cache.rolePrivilegesTtlMinutes`). One entry per role rather than one
/// shared snapshot, since privilege loading is already scoped to a single
/// role and different roles churn independently — mirrors
/// [`crate::catalog::cache::CatalogCache`]'s single-flight-per-key shape but
/// keyed by role instead of holding exactly one entry.
pub struct PrivilegeCache {
    ttl: std::time::Duration,
    entries: dashmap::DashMap<String, CachedPrivileges>,
    refresh_locks: dashmap::DashMap<String, std::sync::Arc<tokio::sync::Mutex<()>>>,
}

impl PrivilegeCache {
    pub fn new(ttl: std::time::Duration) -> Self {
        Self { ttl, entries: dashmap::DashMap::new(), refresh_locks: dashmap::DashMap::new() }
    }

    /// Returns `role`'s privileges, reloading from the database if the
    /// cached entry is missing or stale. Concurrent misses for the same role
    /// are serialized onto one reload via a per-role lock.
    pub async fn get(&self, client: &Client, role: &str) -> Result<RolePrivileges> {
        if let Some(fresh) = self.fresh_entry(role) {
            return Ok(fresh);
        }

        let lock = self
            .refresh_locks
            .entry(role.to_string())
            .or_insert_with(|| std::sync::Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _permit = lock.lock().await;

        if let Some(fresh) = self.fresh_entry(role) {
            return Ok(fresh);
        }

        let privileges = load_role_privileges(client, role).await?;
        self.entries.insert(
            role.to_string(),
            CachedPrivileges { privileges: privileges.clone(), fetched_at: std::time::Instant::now() },
        );
        Ok(privileges)
    }

    pub fn invalidate(&self, role: &str) {
        self.entries.remove(role);
    }

    fn fresh_entry(&self, role: &str) -> Option<RolePrivileges> {
        self.entries.get(role).and_then(|entry| {
            if entry.fetched_at.elapsed() < self.ttl {
                Some(entry.privileges.clone())
            } else {
                None
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Column, ColumnType};

    fn sample_catalog() -> Catalog {
        Catalog {
            schema: "public".into(),
            tables: vec![
                Table {
                    name: "public_table".into(),
                    schema: "public".into(),
                    is_view: false,
                    columns: vec![
                        Column::new("id", ColumnType::Int4, false, 1).as_primary_key(),
                        Column::new("secret", ColumnType::Text, true, 2),
                    ],
                    foreign_keys: vec![],
                },
                Table {
                    name: "hidden_table".into(),
                    schema: "public".into(),
                    is_view: false,
                    columns: vec![],
                    foreign_keys: vec![],
                },
            ],
            enums: vec![],
            composites: vec![],
            domains: vec![],
            snapshot_id: 1,
        }
    }

    #[test]
    fn superuser_sees_everything() {
        let catalog = sample_catalog();
        let privs = RolePrivileges { is_superuser: true, ..Default::default() };
        let filtered = filter_for_role(&catalog, &privs);
        assert_eq!(filtered.tables.len(), 2);
    }

    #[test]
    fn unknown_role_sees_nothing() {
        let catalog = sample_catalog();
        let privs = RolePrivileges::default();
        let filtered = filter_for_role(&catalog, &privs);
        assert!(filtered.tables.is_empty());
    }

    #[test]
    fn column_grant_trims_fields() {
        let catalog = sample_catalog();
        let mut privs = RolePrivileges::default();
        privs.selectable_tables.insert("public_table".into());
        privs
            .column_privileges
            .entry("public_table".into())
            .or_default()
            .entry("secret".into())
            .or_default()
            .insert(Privilege::Select, false);

        let filtered = filter_for_role(&catalog, &privs);
        let table = filtered.table("public_table").unwrap();
        assert!(table.has_column("id"));
        assert!(!table.has_column("secret"));
    }
}
