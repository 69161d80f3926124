//! Darc Prune - archive retention for darc repositories
//!
//! Decides which archives of a repository survive a prune run and deletes
//! the rest:
//! - Prefix partitioning and checkpoint classification
//! - The bucketed retention engine (within, secondly through yearly)
//! - Deletion with chunk refcount release and a single commit
//! - Listing and statistics for reporting

pub mod classify;
pub mod decision;
pub mod engine;
pub mod error;
pub mod executor;
pub mod partition;
pub mod pipeline;
pub mod policy;
pub mod report;

// Re-exports
pub use decision::{Decision, DecisionEntry, KeepReason, Verdict};
pub use engine::{bucket_key, BucketKey, RetentionEngine};
pub use error::{ConfigError, PruneError};
pub use executor::{ArchiveOutcome, DeletionExecutor, ExecuteOptions, ExecutionReport};
pub use pipeline::{run, PruneObserver, PruneOutcome, PruneRequest};
pub use policy::{Granularity, KeepWithin, Limit, PruneOptions, RetentionPolicy};
pub use report::{format_size, format_time, listing, ListingLine, PruneStats};
