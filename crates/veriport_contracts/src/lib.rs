#![forbid(unsafe_code)]

pub mod common;
pub mod credential;
pub mod report;

pub use common::{ContractViolation, UnixTimeMs, Validate};
pub use credential::{
    Aid, Credential, CredentialSubject, Lei, RegistryEventKind, Said, SchemaSaid,
};
pub use report::{Dig, ReportStats, ReportStatus};
