// src/query/mod.rs
//! Provider-neutral query: schema, relative-date placeholders, and the query-string builder.

pub mod builder;
pub mod placeholders;
pub mod schema;

pub use builder::{build_query, build_query_at};
pub use placeholders::PlaceholderError;
pub use schema::{BooleanOp, Filters, ProviderNeutralQuery, QueryError};
