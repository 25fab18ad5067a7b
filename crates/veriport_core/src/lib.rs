#![forbid(unsafe_code)]

use std::fmt;
use std::sync::{Mutex, MutexGuard};

use veriport_contracts::ContractViolation;
use veriport_storage::{StorageError, VerifierDb};

pub mod authorizing;
pub mod credentials;
pub mod keystate;
pub mod presenting;
pub mod reporting;
pub mod verifying;

/// Failure of report-package or presentation validation. Never propagated
/// past a worker boundary; persisted as a failed status or returned to the
/// transport layer as a bad request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError(pub String);

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ValidationError {}

impl From<ContractViolation> for ValidationError {
    fn from(v: ContractViolation) -> Self {
        match v {
            ContractViolation::InvalidValue { field, reason } => {
                ValidationError(format!("invalid {field}: {reason}"))
            }
        }
    }
}

/// Sweep-level failure: the pass itself could not run. Per-entry failures
/// are logged and skipped inside the pass instead.
#[derive(Debug)]
pub enum SweepError {
    LockPoisoned,
    Storage(StorageError),
}

impl From<StorageError> for SweepError {
    fn from(e: StorageError) -> Self {
        SweepError::Storage(e)
    }
}

pub(crate) fn lock_db(db: &Mutex<VerifierDb>) -> Result<MutexGuard<'_, VerifierDb>, SweepError> {
    db.lock().map_err(|_| SweepError::LockPoisoned)
}
