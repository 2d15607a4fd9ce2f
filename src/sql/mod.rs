//! SQL text generation for the destination table.

mod dialect;
mod exists;
mod insert;

pub use dialect::Dialect;
pub use exists::{ExistenceFilter, ExistenceQuery};
pub use insert::{
    build_insert, create_insert, resolve_columns, GeneratedInsert, InsertOptions, InsertStatement,
};
