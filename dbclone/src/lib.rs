//! dbclone: clone/image lifecycle orchestration for database clones.
//!
//! Provisions lightweight, disposable copies of a database from a single
//! master snapshot. Many hosts each run an independent writable instance of
//! the same dataset; the storage cost is paid once, by the image, and each
//! clone only stores its deltas on a differencing disk.
//!
//! The crate is a library: the [`CloneOrchestrator`] is the entry point, the
//! [`binder::StorageBinder`] trait is the seam to the external
//! differencing-disk provider and database engine, and everything the
//! orchestrator does is recorded in an SQLite registry so that partial
//! failures are recoverable, never silent.

pub mod binder;
pub mod options;
pub mod orchestrator;
pub mod refs;
pub mod registry;

pub use binder::{BinderError, LocalDiskBinder, StorageBinder};
pub use options::{DbcloneOptions, OrchestratorOptions, RetryOptions};
pub use orchestrator::{CloneOrchestrator, CreateCloneRequest, ReconcileReport};
pub use registry::{CloneFilter, CloneRecord, CloneStatus, ImageRecord, NewImage};

pub use dbclone_shared::{CloneError, CloneResult, ErrorKind};
