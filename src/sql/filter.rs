//! Filter lowering — a `where`/`or` tree to a parameterized SQL boolean
//! expression (spec §4.4).

use crate::common::ColumnType;
use crate::error::{GatewayError, Result};
use crate::sql::binder::ParamBinder;
use crate::common::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    ILike,
    In,
    NotIn,
    IsNull,
    IsNotNull,
    Contains,
    StartsWith,
    EndsWith,
    // JSON-only operators (spec §4.4)
    HasKey,
    HasKeys,
    HasAnyKeys,
    JsonContains,
    ContainedBy,
    Path,
    PathText,
}

impl FilterOp {
    /// Parses the operator suffix used by legacy top-level arguments like
    /// `foo_contains`/`foo_gt` (spec §4.4 read contract).
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        Some(match suffix {
            "eq" => FilterOp::Eq,
            "neq" => FilterOp::Neq,
            "gt" => FilterOp::Gt,
            "gte" => FilterOp::Gte,
            "lt" => FilterOp::Lt,
            "lte" => FilterOp::Lte,
            "like" => FilterOp::Like,
            "ilike" => FilterOp::ILike,
            "in" => FilterOp::In,
            "notIn" => FilterOp::NotIn,
            "isNull" => FilterOp::IsNull,
            "isNotNull" => FilterOp::IsNotNull,
            "contains" => FilterOp::Contains,
            "startsWith" => FilterOp::StartsWith,
            "endsWith" => FilterOp::EndsWith,
            "hasKey" => FilterOp::HasKey,
            "hasKeys" => FilterOp::HasKeys,
            "hasAnyKeys" => FilterOp::HasAnyKeys,
            "containedBy" => FilterOp::ContainedBy,
            "path" => FilterOp::Path,
            "pathText" => FilterOp::PathText,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct FieldFilter {
    pub column: String,
    pub op: FilterOp,
    pub value: Option<Value>,
    pub col_type: ColumnType,
}

impl FieldFilter {
    fn to_sql(&self, binder: &mut ParamBinder) -> Result<String> {
        let col = quote_ident(&self.column);
        Ok(match self.op {
            FilterOp::IsNull => format!("{col} IS NULL"),
            FilterOp::IsNotNull => format!("{col} IS NOT NULL"),
            FilterOp::Eq => format!("{col} = {}", self.bind(binder)?),
            FilterOp::Neq => format!("{col} <> {}", self.bind(binder)?),
            FilterOp::Gt => format!("{col} > {}", self.bind(binder)?),
            FilterOp::Gte => format!("{col} >= {}", self.bind(binder)?),
            FilterOp::Lt => format!("{col} < {}", self.bind(binder)?),
            FilterOp::Lte => format!("{col} <= {}", self.bind(binder)?),
            FilterOp::Like => format!("{col} LIKE {}", self.bind(binder)?),
            FilterOp::ILike => format!("{col} ILIKE {}", self.bind(binder)?),
            FilterOp::In => format!("{col} = ANY({})", self.bind_array(binder)?),
            FilterOp::NotIn => format!("NOT ({col} = ANY({}))", self.bind_array(binder)?),
            FilterOp::Contains => format!("{col} ILIKE '%' || {} || '%'", self.bind(binder)?),
            FilterOp::StartsWith => format!("{col} LIKE {} || '%'", self.bind(binder)?),
            FilterOp::EndsWith => format!("{col} LIKE '%' || {}", self.bind(binder)?),
            FilterOp::HasKey => format!("{col} ? {}", self.bind(binder)?),
            FilterOp::HasKeys => format!("{col} ?& {}", self.bind_array(binder)?),
            FilterOp::HasAnyKeys => format!("{col} ?| {}", self.bind_array(binder)?),
            FilterOp::JsonContains => format!("{col} @> {}", self.bind(binder)?),
            FilterOp::ContainedBy => format!("{col} <@ {}", self.bind(binder)?),
            FilterOp::Path => format!("{col} #> {}", self.bind_array(binder)?),
            FilterOp::PathText => format!("{col} #>> {}", self.bind_array(binder)?),
        })
    }

    fn bind(&self, binder: &mut ParamBinder) -> Result<String> {
        let value = self
            .value
            .as_ref()
            .ok_or_else(|| GatewayError::argument(format!("operator on `{}` requires a value", self.column)))?;
        binder.bind(value, &self.col_type)
    }

    fn bind_array(&self, binder: &mut ParamBinder) -> Result<String> {
        let value = self
            .value
            .as_ref()
            .ok_or_else(|| GatewayError::argument(format!("operator on `{}` requires a value", self.column)))?;
        let arr_type = if self.col_type.is_array() {
            self.col_type.clone()
        } else {
            ColumnType::Array(Box::new(self.col_type.clone()))
        };
        binder.bind(value, &arr_type)
    }
}

/// A `T_Filter` (or nested `or`-child) node: a conjunction of per-column
/// predicates plus a disjunction list of further `FilterTree`s (spec §4.4).
#[derive(Debug, Clone, Default)]
pub struct FilterTree {
    pub predicates: Vec<FieldFilter>,
    pub or: Vec<FilterTree>,
}

impl FilterTree {
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty() && self.or.is_empty()
    }

    /// Lowers the tree to a SQL boolean expression, binding every value
    /// through `binder` (spec §4.4: "no value is ever concatenated
    /// textually").
    pub fn to_sql(&self, binder: &mut ParamBinder) -> Result<String> {
        if self.is_empty() {
            return Ok("TRUE".to_string());
        }
        let conj = if self.predicates.is_empty() {
            "TRUE".to_string()
        } else {
            let mut parts = Vec::with_capacity(self.predicates.len());
            for p in &self.predicates {
                parts.push(p.to_sql(binder)?);
            }
            parts.join(" AND ")
        };

        if self.or.is_empty() {
            Ok(conj)
        } else {
            let mut parts = vec![format!("({conj})")];
            for sub in &self.or {
                parts.push(format!("({})", sub.to_sql(binder)?));
            }
            Ok(parts.join(" OR "))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }

    pub fn reversed(&self) -> SortDirection {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrderByEntry {
    pub column: String,
    pub direction: SortDirection,
}

/// Quotes a plain identifier for inclusion in generated SQL. Identifiers
/// come from the reflected catalog, never directly from client input, but
/// quoting is still applied defensively and to tolerate mixed-case/reserved
/// names.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f(column: &str, op: FilterOp, value: Value) -> FieldFilter {
        FieldFilter { column: column.to_string(), op, value: Some(value), col_type: ColumnType::Text }
    }

    #[test]
    fn simple_eq_lowers_to_placeholder() {
        let tree = FilterTree {
            predicates: vec![f("status", FilterOp::Eq, Value::Text("shipped".into()))],
            or: vec![],
        };
        let mut binder = ParamBinder::new();
        let sql = tree.to_sql(&mut binder).unwrap();
        assert_eq!(sql, "\"status\" = $1");
        assert_eq!(binder.len(), 1);
    }

    #[test]
    fn conjunction_joins_with_and() {
        let tree = FilterTree {
            predicates: vec![
                f("status", FilterOp::Eq, Value::Text("shipped".into())),
                f("id", FilterOp::Gt, Value::Int(5)),
            ],
            or: vec![],
        };
        let mut binder = ParamBinder::new();
        let sql = tree.to_sql(&mut binder).unwrap();
        assert_eq!(sql, "\"status\" = $1 AND \"id\" > $2");
    }

    #[test]
    fn or_list_parenthesizes_each_branch() {
        let base = FilterTree {
            predicates: vec![f("status", FilterOp::Eq, Value::Text("shipped".into()))],
            or: vec![FilterTree {
                predicates: vec![f("status", FilterOp::Eq, Value::Text("pending".into()))],
                or: vec![],
            }],
        };
        let mut binder = ParamBinder::new();
        let sql = base.to_sql(&mut binder).unwrap();
        assert_eq!(sql, "(\"status\" = $1) OR (\"status\" = $2)");
    }

    #[test]
    fn is_null_requires_no_bound_value() {
        let tree = FilterTree {
            predicates: vec![FieldFilter {
                column: "deleted_at".into(),
                op: FilterOp::IsNull,
                value: None,
                col_type: ColumnType::TimestampTz,
            }],
            or: vec![],
        };
        let mut binder = ParamBinder::new();
        let sql = tree.to_sql(&mut binder).unwrap();
        assert_eq!(sql, "\"deleted_at\" IS NULL");
        assert_eq!(binder.len(), 0);
    }

    #[test]
    fn empty_tree_is_true() {
        let tree = FilterTree::default();
        let mut binder = ParamBinder::new();
        assert_eq!(tree.to_sql(&mut binder).unwrap(), "TRUE");
    }
}
