//! C4/C5 — Filter/SQL translation, typed parameter binding, and bidirectional
//! value conversion between GraphQL and PostgreSQL (spec §4.4/§4.5).

pub mod binder;
pub mod convert;
pub mod cursor;
pub mod filter;
pub mod role_scope;

pub use binder::{BoundParam, ParamBinder};
pub use convert::json_to_value;
pub use cursor::{decode_cursor, encode_cursor, OrderingKey};
pub use filter::{FieldFilter, FilterOp, FilterTree, OrderByEntry, SortDirection};
pub use role_scope::begin_scoped;
