//! Extension payload encoding.
//!
//! Pure functions over a read-only registry snapshot; callers take a fresh
//! snapshot per batch.

pub mod extension;
