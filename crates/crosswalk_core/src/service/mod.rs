//! Use-case facade over the registry.
//!
//! # Responsibility
//! - Load a fresh registry snapshot per call and hand it to codec/translator.
//! - Keep callers decoupled from the concrete store.

pub mod registry_service;
