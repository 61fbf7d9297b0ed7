//! Error kinds surfaced by the engine.
//!
//! Argument and client errors are raised synchronously at the API boundary and
//! travel inside `anyhow::Error`; callers tell them apart with `downcast_ref`.
//! Job errors never reach the submitter directly: they are captured into the
//! job's terminal state.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentErrorKind {
    /// A required value was not supplied.
    Null,
    /// The value was supplied but empty.
    Empty,
    /// The value contains a character that is not allowed.
    InvalidCharacter(char),
    /// The value exceeds the maximum permitted length.
    TooLong { max: usize, actual: usize },
    /// A numeric parameter is outside its permitted range.
    OutOfRange(String),
}

/// A malformed argument, identified by the name of the offending parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentError {
    pub param: &'static str,
    pub kind: ArgumentErrorKind,
}

impl ArgumentError {
    pub fn new(param: &'static str, kind: ArgumentErrorKind) -> Self {
        Self { param, kind }
    }
}

impl fmt::Display for ArgumentError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.kind {
            ArgumentErrorKind::Null => write!(f, "Parameter '{}' must not be null", self.param),
            ArgumentErrorKind::Empty => write!(f, "Parameter '{}' must not be empty", self.param),
            ArgumentErrorKind::InvalidCharacter(c) => write!(
                f,
                "Parameter '{}' contains the invalid character {:?}",
                self.param, c
            ),
            ArgumentErrorKind::TooLong { max, actual } => write!(
                f,
                "Parameter '{}' is {} characters long; the maximum is {}",
                self.param, actual, max
            ),
            ArgumentErrorKind::OutOfRange(reason) => {
                write!(f, "Parameter '{}' is out of range: {}", self.param, reason)
            }
        }
    }
}

impl std::error::Error for ArgumentError {}

/// A request that is well formed but cannot be served in the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    StoreNotFound(String),
    StoreExists(String),
    NotModified,
    JobNotFound { store: String, job_id: u64 },
    CommitNotFound { store: String, commit_id: u64 },
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ClientError::StoreNotFound(name) => write!(f, "Store '{}' does not exist", name),
            ClientError::StoreExists(name) => write!(f, "Store '{}' already exists", name),
            ClientError::NotModified => write!(f, "Store not modified"),
            ClientError::JobNotFound { store, job_id } => {
                write!(f, "No job {} found for store '{}'", job_id, store)
            }
            ClientError::CommitNotFound { store, commit_id } => {
                write!(f, "Commit {} is not available in store '{}'", commit_id, store)
            }
        }
    }
}

impl std::error::Error for ClientError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobErrorKind {
    PreconditionFailed,
    InvalidData,
    NotFound,
    Storage,
    Internal,
}

impl fmt::Display for JobErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            JobErrorKind::PreconditionFailed => "PreconditionFailed",
            JobErrorKind::InvalidData => "InvalidData",
            JobErrorKind::NotFound => "NotFound",
            JobErrorKind::Storage => "Storage",
            JobErrorKind::Internal => "Internal",
        };
        f.write_str(name)
    }
}

/// Failure raised while a job executes.
#[derive(Debug, Clone)]
pub struct JobError {
    pub kind: JobErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: JobErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn precondition_failed(message: impl Into<String>) -> Self {
        Self::new(JobErrorKind::PreconditionFailed, message)
    }

    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::new(JobErrorKind::InvalidData, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(JobErrorKind::NotFound, message)
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for JobError {}

/// Structured description of a job failure, retained with the job record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionInfo {
    pub kind: JobErrorKind,
    pub message: String,
    pub causes: Vec<String>,
}

impl ExceptionInfo {
    /// Classify an error chain. An explicit [`JobError`] anywhere in the chain
    /// wins; otherwise I/O failures are reported as storage errors.
    pub fn from_error(err: &anyhow::Error) -> Self {
        let kind = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<JobError>().map(|e| e.kind))
            .unwrap_or_else(|| {
                if err
                    .chain()
                    .any(|cause| cause.downcast_ref::<std::io::Error>().is_some())
                {
                    JobErrorKind::Storage
                } else {
                    JobErrorKind::Internal
                }
            });
        Self {
            kind,
            message: err.to_string(),
            causes: err.chain().skip(1).map(|c| c.to_string()).collect(),
        }
    }
}

impl fmt::Display for ExceptionInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        for cause in &self.causes {
            write!(f, "\n  caused by: {}", cause)?;
        }
        Ok(())
    }
}
