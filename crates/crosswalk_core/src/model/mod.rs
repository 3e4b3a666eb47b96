//! Registry domain model.
//!
//! # Responsibility
//! - Define canonical protocol/form/field rows and their per-environment
//!   mappings.
//! - Define the wire shapes read from environment listings.
//!
//! # Invariants
//! - Canonical keys are business keys, never environment-local ids.
//! - Environment-local ids and codes are volatile and stored per environment.

pub mod environment;
pub mod listing;
pub mod registry;
