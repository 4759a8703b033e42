//! Catalog subsystem: C1 reflection, C2 privilege filtering, and the TTL
//! cache that fronts both. Re-exports the data model from [`crate::common`]
//! so callers only need `pg_graphkit::catalog::*`.

pub mod cache;
pub mod privilege;
pub mod reflector;

pub use crate::common::{
    Catalog, Column, ColumnType, CompositeAttribute, CompositeType, DomainType, EnumType,
    ForeignKey, OriginalTypeTag, Privilege, QualifiedName, RlsPolicy, RolePrivileges, Table, Value,
};
pub use cache::CatalogCache;
pub use privilege::{filter_for_role, load_role_privileges, PrivilegeCache};
pub use reflector::Reflector;
