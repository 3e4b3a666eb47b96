//! Workflow field-reference translation between environments.

pub mod diff;
pub mod reference;
pub mod sink;
pub mod translator;
