//! Shared catalog data model (spec §3).
//!
//! All types here are plain values with no identity — they are rebuilt
//! wholesale on every reflection (spec §4.1). Modeled on the teacher's
//! `src/common/mod.rs` (shared identifiers + a `Value` tagged union) but
//! narrowed to what a relational catalog projection needs rather than the
//! teacher's storage-engine-wide vocabulary.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A dynamically typed, column-shaped value used throughout the row
/// projection and parameter binding pipeline (spec §4.4/§4.5). Polymorphic
/// columns (JSON, composite, array) need a tagged variant; everything else
/// maps onto a concrete Rust scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Hex-encoded `bytea` (spec §4.4 row projection rule).
    Bytes(String),
    Json(serde_json::Value),
    Array(Vec<Value>),
    /// Composite value keyed by attribute name, in catalog attribute order.
    Composite(Vec<(String, Value)>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// Schema-qualified name: `(schema, name)`.
pub type QualifiedName = (String, String);

/// Logical column type, resolved from the live catalog (spec §3 Type
/// system). Domains are resolved transparently to their base type before
/// reaching this enum; the domain name is preserved separately on `Column`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnType {
    Int2,
    Int4,
    Int8,
    Serial,
    Real,
    Double,
    Numeric,
    Boolean,
    Uuid,
    Text,
    Varchar,
    Char,
    Date,
    Time,
    TimeTz,
    Timestamp,
    TimestampTz,
    Interval,
    Json,
    Jsonb,
    Bytea,
    Xml,
    Inet,
    Cidr,
    MacAddr,
    MacAddr8,
    Bit,
    VarBit,
    Enum(QualifiedName),
    Composite(QualifiedName),
    /// `T[]` — array of any of the above, including nested composite/enum.
    Array(Box<ColumnType>),
    /// A type the reflector doesn't recognize — degrades to an opaque
    /// string end to end (spec §1 Non-goals).
    Opaque(String),
}

impl ColumnType {
    /// True for every array variant, including arrays of arrays.
    pub fn is_array(&self) -> bool {
        matches!(self, ColumnType::Array(_))
    }

    pub fn element_type(&self) -> &ColumnType {
        match self {
            ColumnType::Array(inner) => inner.element_type(),
            other => other,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ColumnType::Int2
                | ColumnType::Int4
                | ColumnType::Int8
                | ColumnType::Serial
                | ColumnType::Real
                | ColumnType::Double
                | ColumnType::Numeric
        )
    }

    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            ColumnType::Date
                | ColumnType::Time
                | ColumnType::TimeTz
                | ColumnType::Timestamp
                | ColumnType::TimestampTz
                | ColumnType::Interval
        )
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self, ColumnType::Boolean)
    }

    pub fn is_json(&self) -> bool {
        matches!(self, ColumnType::Json | ColumnType::Jsonb)
    }
}

/// Tag distinguishing where a column's type came from (spec §3 Column).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OriginalTypeTag {
    Plain,
    Enum,
    Composite,
    Domain,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub col_type: ColumnType,
    pub nullable: bool,
    pub primary_key: bool,
    pub original_type: OriginalTypeTag,
    /// Present when `original_type == Domain`: the user-defined domain name.
    pub domain_name: Option<String>,
    /// Ordinal position within the table, 1-based, as reported by the
    /// catalog (used to keep reflection deterministic under concurrent
    /// access and to map pgoutput tuple indices back to names).
    pub position: i32,
    /// True if the column has a catalog-declared default (including
    /// `serial`/identity). Drives the mutation executor's decision of
    /// which missing NOT NULL columns need auto-filling (spec §4.5).
    pub has_default: bool,
}

impl Column {
    /// Invariant from spec §3: a primary-key column is never nullable.
    pub fn new(name: impl Into<String>, col_type: ColumnType, nullable: bool, position: i32) -> Self {
        Self {
            name: name.into(),
            col_type,
            nullable,
            primary_key: false,
            original_type: OriginalTypeTag::Plain,
            domain_name: None,
            position,
            has_default: false,
        }
    }

    pub fn with_default(mut self, has_default: bool) -> Self {
        self.has_default = has_default;
        self
    }

    pub fn as_primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub schema: String,
    pub is_view: bool,
    pub columns: Vec<Column>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl Table {
    pub fn primary_key_columns(&self) -> Vec<&Column> {
        self.columns.iter().filter(|c| c.primary_key).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumType {
    pub schema: String,
    pub name: String,
    pub labels: Vec<String>,
}

impl EnumType {
    pub fn qualified(&self) -> QualifiedName {
        (self.schema.clone(), self.name.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeAttribute {
    pub name: String,
    pub col_type: ColumnType,
    pub nullable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeType {
    pub schema: String,
    pub name: String,
    pub attributes: Vec<CompositeAttribute>,
}

impl CompositeType {
    pub fn qualified(&self) -> QualifiedName {
        (self.schema.clone(), self.name.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainType {
    pub schema: String,
    pub name: String,
    pub base_type: ColumnType,
}

/// Per-role grants plus RLS policy metadata (spec §3 RolePrivileges).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RolePrivileges {
    pub is_superuser: bool,
    pub selectable_tables: std::collections::HashSet<String>,
    pub insertable_tables: std::collections::HashSet<String>,
    pub updatable_tables: std::collections::HashSet<String>,
    pub deletable_tables: std::collections::HashSet<String>,
    /// table -> column -> privilege -> granted
    pub column_privileges: HashMap<String, HashMap<String, HashMap<Privilege, bool>>>,
    pub rls_policies: Vec<RlsPolicy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Privilege {
    Select,
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RlsPolicy {
    pub name: String,
    pub table: String,
    pub permissive: bool,
    pub roles: Vec<String>,
    pub command: String,
    pub using: Option<String>,
    pub with_check: Option<String>,
}

impl RolePrivileges {
    pub fn can_select_table(&self, table: &str) -> bool {
        self.is_superuser || self.selectable_tables.contains(table)
    }

    pub fn can_select_column(&self, table: &str, column: &str) -> bool {
        if self.is_superuser {
            return true;
        }
        if !self.can_select_table(table) {
            return false;
        }
        self.column_privileges
            .get(table)
            .and_then(|cols| cols.get(column))
            .and_then(|privs| privs.get(&Privilege::Select))
            .copied()
            // Absence of an explicit column grant entry means the
            // table-level grant covers the column (the common case for
            // plain `GRANT SELECT ON table`).
            .unwrap_or(true)
    }

    pub fn can_insert(&self, table: &str) -> bool {
        self.is_superuser || self.insertable_tables.contains(table)
    }

    pub fn can_update(&self, table: &str) -> bool {
        self.is_superuser || self.updatable_tables.contains(table)
    }

    pub fn can_delete(&self, table: &str) -> bool {
        self.is_superuser || self.deletable_tables.contains(table)
    }
}

/// A fully reflected catalog snapshot (spec §3/§4.1 Reflector contract).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Catalog {
    pub schema: String,
    pub tables: Vec<Table>,
    pub enums: Vec<EnumType>,
    pub composites: Vec<CompositeType>,
    pub domains: Vec<DomainType>,
    /// Monotonic snapshot id, used as half of the generated-schema cache
    /// key `(catalog-snapshot-id, role)` (SPEC_FULL §B).
    pub snapshot_id: u64,
}

impl Catalog {
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Tables whose FK set references `table_name` (spec §4.3 reverse
    /// relationships / §8 property 2). Pure function of the FK set: result
    /// order is sorted by referencing table name so it never depends on
    /// the original table iteration order (spec §3 invariant).
    pub fn reverse_references(&self, table_name: &str) -> Vec<&Table> {
        let mut referencing: Vec<&Table> = self
            .tables
            .iter()
            .filter(|t| t.foreign_keys.iter().any(|fk| fk.referenced_table == table_name))
            .collect();
        referencing.sort_by(|a, b| a.name.cmp(&b.name));
        referencing
    }

    pub fn enum_by_name(&self, qualified: &QualifiedName, unqualified: &str) -> Option<&EnumType> {
        self.enums
            .iter()
            .find(|e| &e.qualified() == qualified)
            .or_else(|| self.enums.iter().find(|e| e.name == unqualified))
    }

    pub fn composite_by_name(&self, qualified: &QualifiedName, unqualified: &str) -> Option<&CompositeType> {
        self.composites
            .iter()
            .find(|c| &c.qualified() == qualified)
            .or_else(|| self.composites.iter().find(|c| c.name == unqualified))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fk_catalog() -> Catalog {
        Catalog {
            schema: "public".into(),
            tables: vec![
                Table {
                    name: "customers".into(),
                    schema: "public".into(),
                    is_view: false,
                    columns: vec![Column::new("id", ColumnType::Int4, false, 1).as_primary_key()],
                    foreign_keys: vec![],
                },
                Table {
                    name: "orders".into(),
                    schema: "public".into(),
                    is_view: false,
                    columns: vec![Column::new("id", ColumnType::Int4, false, 1).as_primary_key()],
                    foreign_keys: vec![ForeignKey {
                        column: "customer_id".into(),
                        referenced_table: "customers".into(),
                        referenced_column: "id".into(),
                    }],
                },
                Table {
                    name: "invoices".into(),
                    schema: "public".into(),
                    is_view: false,
                    columns: vec![],
                    foreign_keys: vec![ForeignKey {
                        column: "customer_id".into(),
                        referenced_table: "customers".into(),
                        referenced_column: "id".into(),
                    }],
                },
            ],
            enums: vec![],
            composites: vec![],
            domains: vec![],
            snapshot_id: 1,
        }
    }

    #[test]
    fn reverse_references_is_order_independent() {
        let cat = fk_catalog();
        let refs = cat.reverse_references("customers");
        let names: Vec<_> = refs.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["invoices", "orders"]);
    }

    #[test]
    fn primary_key_implies_not_nullable() {
        let col = Column::new("id", ColumnType::Int4, true, 1).as_primary_key();
        assert!(!col.nullable);
        assert!(col.primary_key);
    }
}
