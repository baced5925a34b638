// Common types and utilities shared across the ingestion pipeline

pub mod entity_ids;
pub mod id;
pub mod pagination;

pub use entity_ids::*;
pub use id::Id;
pub use pagination::{Connection, Cursor, PaginationArgs, ValidatedPagination};
