//! Status taxonomy for vxrt.
//!
//! Every fallible entry point returns [`VxResult`]. Each [`VxError`] variant maps to the
//! stable negative status code of the OpenVX status enumeration, so callers that speak in
//! integer codes can convert in both directions. Errors are:
//! - Typed: verification reports exactly which check failed
//! - Serializable, so verify reports can be dumped alongside graph descriptions
//! - Copyable, so a graph can store the status of its last run

use crate::core::reference::Handle;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Runtime status error.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VxError {
    #[error("generic failure")]
    Failure,

    #[error("feature not implemented")]
    NotImplemented,

    #[error("operation not supported")]
    NotSupported,

    #[error("required parameters are missing")]
    NotSufficient,

    #[error("object has no backing allocation")]
    NotAllocated,

    #[error("objects are not compatible")]
    NotCompatible,

    #[error("no resources left")]
    NoResources,

    #[error("out of memory")]
    NoMemory,

    #[error("virtual object was optimized away")]
    OptimizedAway,

    #[error("invalid parameters")]
    InvalidParameters,

    #[error("invalid kernel module")]
    InvalidModule,

    #[error("invalid reference")]
    InvalidReference,

    #[error("invalid link")]
    InvalidLink,

    #[error("invalid format")]
    InvalidFormat,

    #[error("invalid dimension")]
    InvalidDimension,

    #[error("invalid value")]
    InvalidValue,

    #[error("invalid type")]
    InvalidType,

    #[error("invalid graph")]
    InvalidGraph,

    #[error("invalid node")]
    InvalidNode,

    #[error("invalid scope")]
    InvalidScope,

    #[error("graph is already scheduled")]
    GraphScheduled,

    #[error("graph run was abandoned")]
    GraphAbandoned,

    #[error("multiple writers to one object")]
    MultipleWriters,

    #[error("reference count is not zero")]
    ReferenceNonzero,
}

const CODES: &[(VxError, i32)] = &[
    (VxError::Failure, -1),
    (VxError::NotImplemented, -2),
    (VxError::NotSupported, -3),
    (VxError::NotSufficient, -4),
    (VxError::NotAllocated, -5),
    (VxError::NotCompatible, -6),
    (VxError::NoResources, -7),
    (VxError::NoMemory, -8),
    (VxError::OptimizedAway, -9),
    (VxError::InvalidParameters, -10),
    (VxError::InvalidModule, -11),
    (VxError::InvalidReference, -12),
    (VxError::InvalidLink, -13),
    (VxError::InvalidFormat, -14),
    (VxError::InvalidDimension, -15),
    (VxError::InvalidValue, -16),
    (VxError::InvalidType, -17),
    (VxError::InvalidGraph, -18),
    (VxError::InvalidNode, -19),
    (VxError::InvalidScope, -20),
    (VxError::GraphScheduled, -21),
    (VxError::GraphAbandoned, -22),
    (VxError::MultipleWriters, -23),
    (VxError::ReferenceNonzero, -24),
];

impl VxError {
    /// Integer status code of this error.
    pub fn code(self) -> i32 {
        CODES
            .iter()
            .find(|(e, _)| *e == self)
            .map(|(_, c)| *c)
            .unwrap_or(-1)
    }

    /// Look an error up by its integer status code. `0` (success) and unknown codes give `None`.
    pub fn from_code(code: i32) -> Option<Self> {
        CODES.iter().find(|(_, c)| *c == code).map(|(e, _)| *e)
    }

    /// Whether this error is raised by a validator or verification stage.
    pub fn is_verification_error(self) -> bool {
        matches!(
            self,
            VxError::InvalidFormat
                | VxError::InvalidDimension
                | VxError::InvalidType
                | VxError::InvalidValue
                | VxError::InvalidGraph
                | VxError::InvalidScope
                | VxError::NotSufficient
                | VxError::MultipleWriters
        )
    }

    /// Whether the caller can reasonably retry or work around this error.
    pub fn is_recoverable(self) -> bool {
        !matches!(self, VxError::InvalidReference | VxError::NoMemory)
    }
}

/// Result type alias for runtime operations.
pub type VxResult<T> = Result<T, VxError>;

/// Integer status code of a result, `0` on success.
pub fn status_code<T>(result: &VxResult<T>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => e.code(),
    }
}

/// "First error wins" accumulator for best-effort loops.
///
/// Used where every sub-step must run even after one of them fails (teardown, patch
/// commit). Everywhere else errors propagate with `?`.
#[derive(Debug, Default)]
pub struct StatusFold {
    first: Option<VxError>,
}

impl StatusFold {
    /// Create an empty fold.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a result, returning its value when it succeeded.
    pub fn push<T>(&mut self, result: VxResult<T>) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                if self.first.is_none() {
                    self.first = Some(e);
                }
                None
            }
        }
    }

    /// Whether any recorded step failed.
    pub fn failed(&self) -> bool {
        self.first.is_some()
    }

    /// Collapse into a single result.
    pub fn finish(self) -> VxResult<()> {
        match self.first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Verify Report
// ============================================================================

/// One failed check recorded while verifying a graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyIssue {
    /// Stage that raised the issue.
    pub stage: String,
    /// Node the issue belongs to, if any.
    pub node: Option<Handle>,
    /// Parameter index on that node, if any.
    pub parameter: Option<u32>,
    /// Status the check failed with.
    pub status: VxError,
    /// Human-readable detail.
    pub message: String,
}

/// Outcome of the last verification of a graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerifyReport {
    /// Whether verification passed.
    pub success: bool,
    /// Issues found; verification stops at the first one.
    pub issues: Vec<VerifyIssue>,
    /// Names of stages that ran, in order.
    pub stages_run: Vec<String>,
    /// Time taken in microseconds.
    pub duration_us: u64,
}

impl VerifyReport {
    /// Create an empty, successful report.
    pub fn new() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    /// Record an issue.
    pub fn add_issue(&mut self, issue: VerifyIssue) {
        self.success = false;
        self.issues.push(issue);
    }

    /// Status of the first issue, if any.
    pub fn status(&self) -> VxResult<()> {
        match self.issues.first() {
            Some(issue) => Err(issue.status),
            None => Ok(()),
        }
    }

    /// Get a human-readable summary.
    pub fn summary(&self) -> String {
        match self.issues.first() {
            None => format!("graph verified ({} stages)", self.stages_run.len()),
            Some(issue) => format!(
                "verification failed in '{}': {} ({})",
                issue.stage, issue.status, issue.message
            ),
        }
    }
}
