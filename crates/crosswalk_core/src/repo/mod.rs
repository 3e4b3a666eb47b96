//! Registry persistence.
//!
//! # Responsibility
//! - Define the whole-table load/save contract for registry tables.
//! - Provide the spreadsheet-compatible CSV store and a SQLite store.
//!
//! # Invariants
//! - Saves replace a whole table; callers guarantee a single writer per
//!   table for the duration of a sync pass.
//! - Loads reject malformed persisted state instead of masking it.

pub mod csv_store;
pub mod registry_repo;
pub mod sqlite_store;
