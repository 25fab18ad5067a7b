#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Mutex;

use veriport_contracts::{Credential, Lei, Said, UnixTimeMs};
use veriport_storage::VerifierDb;

use crate::credentials::CredentialSource;
use crate::keystate::KeyStateSource;
use crate::{lock_db, SweepError};

/// Credential JSON schema SAID for the engagement context role credential.
pub const ECR_SCHEMA_SAID: &str = "EEy9PkikFcANV1l7EHukCeXqrzT1hNZjGlUk7wuMO5jw";

/// Engagement context role accepted for report submission.
pub const EBA_DOCUMENT_SUBMITTER_ROLE: &str = "EBA Document Submitter";

/// Escrow entries older than this are dropped on the next sweep.
pub const TIMEOUT_AUTH_MS: u64 = 600_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError(pub String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone)]
pub struct AuthorizerConfig {
    pub leis: Vec<Lei>,
    pub submitter_role: String,
    pub timeout_auth_ms: u64,
}

impl AuthorizerConfig {
    /// An empty allow-list is a boot-fatal misconfiguration.
    pub fn new(leis: Vec<Lei>) -> Result<Self, ConfigError> {
        if leis.is_empty() {
            return Err(ConfigError(
                "invalid configuration, no LEIs available to accept".to_string(),
            ));
        }
        Ok(Self {
            leis,
            submitter_role: EBA_DOCUMENT_SUBMITTER_ROLE.to_string(),
            timeout_auth_ms: TIMEOUT_AUTH_MS,
        })
    }
}

/// Record an observed credential presentation into the escrow. Idempotent;
/// an already-pending SAID keeps its original receipt time.
pub fn record_presentation(db: &mut VerifierDb, said: &Said, now: UnixTimeMs) -> bool {
    db.presentation_escrow(said, now)
}

/// Record an observed credential revocation into the escrow.
pub fn record_revocation(db: &mut VerifierDb, said: &Said, now: UnixTimeMs) -> bool {
    db.revocation_escrow(said, now)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuthorizationSweepMetrics {
    pub presentations_expired: u32,
    pub presentations_pending: u32,
    pub authorized: u32,
    pub discarded: u32,
    pub revocations_expired: u32,
    pub revocations_pending: u32,
    pub revocations_confirmed: u32,
}

/// One escrow reconciliation pass: resolve or expire pending presentations,
/// then pending revocations. Entries are handled independently; a failing
/// entry is logged and skipped, never aborting the pass. The database lock
/// is taken per entry, never across the whole sweep.
pub fn run_authorization_sweep(
    db: &Mutex<VerifierDb>,
    creds: &dyn CredentialSource,
    keys: &dyn KeyStateSource,
    config: &AuthorizerConfig,
    now: UnixTimeMs,
) -> Result<AuthorizationSweepMetrics, SweepError> {
    let mut metrics = AuthorizationSweepMetrics::default();
    process_presentations(db, creds, keys, config, now, &mut metrics)?;
    process_revocations(db, creds, config, now, &mut metrics)?;
    Ok(metrics)
}

fn process_presentations(
    db: &Mutex<VerifierDb>,
    creds: &dyn CredentialSource,
    keys: &dyn KeyStateSource,
    config: &AuthorizerConfig,
    now: UnixTimeMs,
    metrics: &mut AuthorizationSweepMetrics,
) -> Result<(), SweepError> {
    let pending = lock_db(db)?.presentations()?;

    for (said, received_at) in pending {
        if now.saturating_elapsed_since(received_at) > config.timeout_auth_ms {
            lock_db(db)?.presentation_rem(&said);
            tracing::info!(said = %said, "removing presentation, it expired");
            metrics.presentations_expired = metrics.presentations_expired.saturating_add(1);
            continue;
        }

        let Some(credential) = creds.resolved(&said) else {
            // Credential not yet parsed; try again next recurrence.
            metrics.presentations_pending = metrics.presentations_pending.saturating_add(1);
            continue;
        };

        lock_db(db)?.presentation_rem(&said);
        if credential.schema.as_str() == ECR_SCHEMA_SAID {
            if process_ecr(db, keys, config, &credential)? {
                metrics.authorized = metrics.authorized.saturating_add(1);
            } else {
                metrics.discarded = metrics.discarded.saturating_add(1);
            }
        } else {
            tracing::warn!(
                said = %said,
                schema = %credential.schema.as_str(),
                "invalid credential presentation, unknown schema"
            );
            metrics.discarded = metrics.discarded.saturating_add(1);
        }
    }
    Ok(())
}

/// Business rules for a resolved engagement context role credential. Every
/// miss discards the presentation without retry; success pins the subject's
/// identifier into the authorization index with the credential SAID as
/// proof.
fn process_ecr(
    db: &Mutex<VerifierDb>,
    keys: &dyn KeyStateSource,
    config: &AuthorizerConfig,
    credential: &Credential,
) -> Result<bool, SweepError> {
    let subject = &credential.subject.id;
    if keys.key_state(subject).is_none() {
        tracing::warn!(subject = %subject, "unknown presenter");
        return Ok(false);
    }

    let Some(lei) = credential.lei() else {
        tracing::warn!(said = %credential.said, "credential missing LEI claim");
        return Ok(false);
    };
    if !config.leis.iter().any(|allowed| allowed.as_str() == lei) {
        tracing::warn!(lei = %lei, "LEI not allowed");
        return Ok(false);
    }

    let Some(role) = credential.engagement_context_role() else {
        tracing::warn!(said = %credential.said, "credential missing engagement context role claim");
        return Ok(false);
    };
    if role != config.submitter_role {
        tracing::warn!(role = %role, "not a valid submitter role");
        return Ok(false);
    }

    lock_db(db)?.authorize_commit(subject, &credential.said);
    tracing::info!(subject = %subject, said = %credential.said, "successful authentication, storing user");
    Ok(true)
}

fn process_revocations(
    db: &Mutex<VerifierDb>,
    creds: &dyn CredentialSource,
    config: &AuthorizerConfig,
    now: UnixTimeMs,
    metrics: &mut AuthorizationSweepMetrics,
) -> Result<(), SweepError> {
    let pending = lock_db(db)?.revocations()?;

    for (said, received_at) in pending {
        if now.saturating_elapsed_since(received_at) > config.timeout_auth_ms {
            lock_db(db)?.revocation_rem(&said);
            metrics.revocations_expired = metrics.revocations_expired.saturating_add(1);
            continue;
        }

        // Revocation may arrive before the credential record or its registry
        // state; both cases stay pending until resolution or timeout.
        let Some(credential) = creds.resolved(&said) else {
            metrics.revocations_pending = metrics.revocations_pending.saturating_add(1);
            continue;
        };
        let Some(state) = creds.registry_state(&said) else {
            metrics.revocations_pending = metrics.revocations_pending.saturating_add(1);
            continue;
        };

        if state.is_issuance() {
            // Ledger still shows issuance; the revocation event has not
            // landed yet.
            metrics.revocations_pending = metrics.revocations_pending.saturating_add(1);
            continue;
        }

        let mut guard = lock_db(db)?;
        guard.revocation_rem(&said);
        if let Err(e) = guard.revocation_audit_commit(&said, received_at, &credential) {
            tracing::warn!(said = %said, error = ?e, "failed to record revocation audit");
            continue;
        }
        drop(guard);
        tracing::info!(said = %said, "credential revocation confirmed");
        metrics.revocations_confirmed = metrics.revocations_confirmed.saturating_add(1);
    }
    Ok(())
}
