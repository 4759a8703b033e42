//! Memoized type registry for the schema generator (spec §4.3, §9 "Duplicate
//! type creation").
//!
//! `async_graphql::dynamic::Schema` rejects a type registered twice under
//! the same name, and several tables can reference the same composite or
//! enum type. Rather than threading a dedup check through every call site
//! that might encounter a custom type, the registry computes a type once —
//! at its first occurrence — and stores it by name, mirroring the teacher's
//! single-registration `TypeRegistry` pattern in `src/catalog/mod.rs` where
//! a catalog object is looked up once and cached rather than rebuilt per
//! reference.

use std::collections::HashSet;

use async_graphql::dynamic::Type;

/// Accumulates dynamic `Type`s for one schema build and tracks which type
/// names have already been emitted, so composite/enum types referenced by
/// more than one table are only built once.
#[derive(Default)]
pub struct TypeRegistry {
    names: HashSet<String>,
    types: Vec<Type>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Registers `ty` under `name` unless a type of that name already
    /// exists. Returns `false` (and drops `ty`) on a pre-existing name —
    /// callers that are about to build an expensive duplicate should check
    /// [`contains`] first rather than relying on this for control flow.
    pub fn insert(&mut self, name: impl Into<String>, ty: impl Into<Type>) -> bool {
        let name = name.into();
        if self.names.contains(&name) {
            return false;
        }
        self.names.insert(name);
        self.types.push(ty.into());
        true
    }

    pub fn into_types(self) -> Vec<Type> {
        self.types
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_graphql::dynamic::Enum;

    #[test]
    fn second_insert_under_same_name_is_ignored() {
        let mut reg = TypeRegistry::new();
        assert!(reg.insert("Color", Enum::new("Color").item("RED")));
        assert!(!reg.insert("Color", Enum::new("Color").item("BLUE")));
        assert_eq!(reg.into_types().len(), 1);
    }
}
