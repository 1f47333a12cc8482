//! Sandbox copy and teardown orchestration.
//!
//! This crate owns the experiment-copy pipeline (list, remap, diff, copy,
//! rehash) and the prefix-match teardown pass. All I/O goes through the
//! adapter traits in [`adapters`]; concrete AWS and HTTP implementations
//! live in the CLI crate.

pub mod adapters;
pub mod config;
pub mod copy;
pub mod error;
pub mod teardown;

pub use config::SandboxConfig;
pub use copy::{copy_experiments, CopyEvent, CopyRequest};
pub use error::PipelineError;
pub use teardown::{remove_staged_resources, TeardownEvent, TeardownReport};
