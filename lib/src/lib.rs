//! quadlog: a versioned quad store engine.
//!
//! Each store is an append-only log of immutable generations. Mutations run
//! as jobs, one at a time per store; reads pin a commit and are isolated from
//! later writes and from consolidation.

pub mod api;
mod catalog;
pub mod codec;
pub mod commit_log;
pub mod config;
pub mod consts;
mod engine;
pub mod errors;
pub mod generation;
pub mod job;
pub mod options;
pub mod pattern;
pub mod query;
pub mod snapshot;
pub mod stats;
mod store;
pub mod transaction;
pub mod transfer;
pub mod util;

pub use api::{init_logging, QuadLog, StoreInfo};
pub use catalog::validate_store_name;
pub use commit_log::CommitPointInfo;
pub use config::Config;
pub use errors::{ArgumentError, ArgumentErrorKind, ClientError, ExceptionInfo, JobError, JobErrorKind};
pub use generation::CommitId;
pub use job::{JobHandle, JobId, JobInfo, JobKind, JobStatus};
pub use options::PersistenceMode;
pub use query::{QueryOutcome, QueryRequest, QueryResult};
pub use snapshot::SnapshotRequest;
pub use stats::StatisticsSnapshot;
pub use transaction::{TransactionUpdate, TransactionUpdateBuilder};
pub use transfer::{ExportRequest, ImportRequest, ImportSource};
