//! Registry synchronization.
//!
//! # Responsibility
//! - Define the environment adapter SPI and its in-process registry.
//! - Run full and incremental passes that keep registry tables current.
//!
//! # Invariants
//! - A listing failure is isolated to its environment.
//! - An entity failure is isolated to its entity.

pub mod artifacts;
pub mod environment_registry;
pub mod environment_spi;
pub mod report;
pub mod synchronizer;
