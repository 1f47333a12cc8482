//! Shared staging-sandbox domain primitives.
//!
//! This crate owns the deterministic parts of the sandbox workflow: the
//! tagged-envelope record model, key remapping rules, the cell-sets document
//! transform, pipeline parameter hashing, and sandbox naming. It
//! intentionally excludes AWS SDK and HTTP concerns.

pub mod cellsets;
pub mod naming;
pub mod params_hash;
pub mod record;
pub mod remap;
pub mod report;

pub use naming::{prefixed, BucketRole, Environment, ValidationError};
pub use record::{AttrValue, Item};
pub use remap::{RemapError, TableRole};
pub use report::{CopyFailure, CopyReport};
