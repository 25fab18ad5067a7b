#![forbid(unsafe_code)]

use std::fmt;

use crate::common::{validate_id_text, ContractViolation, Validate};
use crate::credential::{Aid, MAX_ID_LEN};

/// Content digest of an uploaded report package, the primary key for all
/// report state.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct Dig(String);

impl Dig {
    pub fn new(value: impl Into<String>) -> Result<Self, ContractViolation> {
        let value = value.into();
        validate_id_text("dig", &value, MAX_ID_LEN)?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Dig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Accepted,
    Verified,
    Failed,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Accepted => "accepted",
            ReportStatus::Verified => "verified",
            ReportStatus::Failed => "failed",
        }
    }

    /// Terminal statuses are never swept again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReportStatus::Verified | ReportStatus::Failed)
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upload bookkeeping for one submitted report package. Created on upload,
/// mutated only through status transitions, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ReportStats {
    pub submitter: Aid,
    pub filename: String,
    pub status: ReportStatus,
    #[serde(rename = "contentType")]
    pub content_type: String,
    pub size: u64,
    #[serde(default)]
    pub message: String,
}

impl ReportStats {
    pub fn accepted(submitter: Aid, filename: String, content_type: String) -> Self {
        Self {
            submitter,
            filename,
            status: ReportStatus::Accepted,
            content_type,
            size: 0,
            message: String::new(),
        }
    }
}

impl Validate for ReportStats {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.filename.is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "filename",
                reason: "must not be empty",
            });
        }
        if self.filename.len() > 512 {
            return Err(ContractViolation::InvalidValue {
                field: "filename",
                reason: "exceeds max length",
            });
        }
        Ok(())
    }
}
