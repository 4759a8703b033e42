//! Pure naming helpers for the schema generator (spec §4.3 Generator rules).
//!
//! Table types use PostgreSQL identifiers verbatim; custom types are
//! PascalCased; derived types follow a fixed suffix scheme
//! (`_Filter`/`_Edge`/`_Connection`/...). Kept as free functions with no
//! state so [`crate::schema::generator`] can call them without threading a
//! registry through — pure name derivation never needs memoization.

use crate::common::ColumnType;

pub fn pascal_case(input: &str) -> String {
    input
        .split(|c: char| c == '_' || c == '-' || c == ' ')
        .filter(|s| !s.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

pub fn filter_type_name(table: &str) -> String {
    format!("{table}_Filter")
}

pub fn order_by_type_name(table: &str) -> String {
    format!("{table}_OrderByInput")
}

pub fn edge_type_name(table: &str) -> String {
    format!("{table}_Edge")
}

pub fn connection_type_name(table: &str) -> String {
    format!("{table}_Connection")
}

pub fn create_input_type_name(table: &str) -> String {
    format!("{table}_CreateInput")
}

pub fn update_input_type_name(table: &str) -> String {
    format!("{table}_UpdateInput")
}

pub fn delete_input_type_name(table: &str) -> String {
    format!("{table}_DeleteInput")
}

pub fn relation_create_input_type_name(table: &str) -> String {
    format!("{table}_RelationCreateInput")
}

/// Input type carrying just a referenced table's primary key, used by the
/// `<fk>Connect` field of a relationship-create input (spec §4.5 "connect
/// to an existing row").
pub fn connect_input_type_name(table: &str) -> String {
    format!("{table}_ConnectInput")
}

pub fn change_event_type_name(table: &str) -> String {
    format!("{table}_ChangeEvent")
}

pub fn subscription_data_type_name(table: &str) -> String {
    format!("{table}_SubscriptionData")
}

pub fn enum_type_name(custom_type_name: &str) -> String {
    pascal_case(custom_type_name)
}

pub fn composite_type_name(custom_type_name: &str) -> String {
    pascal_case(custom_type_name)
}

pub fn composite_input_type_name(custom_type_name: &str) -> String {
    format!("{}Input", pascal_case(custom_type_name))
}

/// Picks the concrete filter input type for a column, applied to the
/// element type for arrays (spec §4.3: "Array columns use the element-type
/// filter").
pub fn filter_input_for_column(col_type: &ColumnType) -> &'static str {
    let t = col_type.element_type();
    if t.is_boolean() {
        "BooleanFilter"
    } else if matches!(t, ColumnType::Int2 | ColumnType::Int4 | ColumnType::Int8 | ColumnType::Serial) {
        "IntFilter"
    } else if matches!(t, ColumnType::Real | ColumnType::Double | ColumnType::Numeric) {
        "FloatFilter"
    } else if t.is_temporal() {
        "DateTimeFilter"
    } else if t.is_json() {
        "JSONFilter"
    } else {
        "StringFilter"
    }
}

/// Naive English pluralization for reverse-relationship field names (spec
/// §4.3: "a plural-named field for each referencing table"). Good enough for
/// the regular nouns that table names usually are; irregular plurals are not
/// attempted.
pub fn pluralize(name: &str) -> String {
    if name.ends_with("s") || name.ends_with("x") || name.ends_with("ch") || name.ends_with("sh") {
        format!("{name}es")
    } else if let Some(stem) = name.strip_suffix('y') {
        let prev_is_vowel = stem.chars().last().map(|c| "aeiou".contains(c)).unwrap_or(false);
        if prev_is_vowel {
            format!("{name}s")
        } else {
            format!("{stem}ies")
        }
    } else {
        format!("{name}s")
    }
}

/// Maps a [`ColumnType`] to the PostgreSQL type name used for explicit
/// `::type` casts in bound parameters and array literals (spec §4.5).
pub fn pg_type_name(col_type: &ColumnType) -> Option<&'static str> {
    Some(match col_type {
        ColumnType::Int2 => "int2",
        ColumnType::Int4 | ColumnType::Serial => "int4",
        ColumnType::Int8 => "int8",
        ColumnType::Real => "float4",
        ColumnType::Double => "float8",
        ColumnType::Numeric => "numeric",
        ColumnType::Boolean => "bool",
        ColumnType::Uuid => "uuid",
        ColumnType::Text => "text",
        ColumnType::Varchar => "varchar",
        ColumnType::Char => "char",
        ColumnType::Date => "date",
        ColumnType::Time => "time",
        ColumnType::TimeTz => "timetz",
        ColumnType::Timestamp => "timestamp",
        ColumnType::TimestampTz => "timestamptz",
        ColumnType::Interval => "interval",
        ColumnType::Json => "json",
        ColumnType::Jsonb => "jsonb",
        ColumnType::Bytea => "bytea",
        ColumnType::Xml => "xml",
        ColumnType::Inet => "inet",
        ColumnType::Cidr => "cidr",
        ColumnType::MacAddr => "macaddr",
        ColumnType::MacAddr8 => "macaddr8",
        ColumnType::Bit => "bit",
        ColumnType::VarBit => "varbit",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pascal_cases_snake_case_names() {
        assert_eq!(pascal_case("order_status"), "OrderStatus");
        assert_eq!(pascal_case("address"), "Address");
    }

    #[test]
    fn suffix_scheme_matches_spec() {
        assert_eq!(filter_type_name("orders"), "orders_Filter");
        assert_eq!(connection_type_name("orders"), "orders_Connection");
        assert_eq!(create_input_type_name("orders"), "orders_CreateInput");
    }

    #[test]
    fn array_columns_use_element_type_filter() {
        let arr = ColumnType::Array(Box::new(ColumnType::Int4));
        assert_eq!(filter_input_for_column(&arr), "IntFilter");
    }

    #[test]
    fn pluralizes_regular_nouns() {
        assert_eq!(pluralize("order"), "orders");
        assert_eq!(pluralize("category"), "categories");
        assert_eq!(pluralize("address"), "addresses");
        assert_eq!(pluralize("box"), "boxes");
        assert_eq!(pluralize("day"), "days");
    }
}
