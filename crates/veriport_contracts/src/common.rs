#![forbid(unsafe_code)]

/// Wall-clock time in milliseconds since the Unix epoch. Always supplied by
/// the caller so escrow timeout checks stay deterministic under test.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct UnixTimeMs(pub u64);

impl UnixTimeMs {
    pub fn saturating_elapsed_since(&self, earlier: UnixTimeMs) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractViolation {
    InvalidValue {
        field: &'static str,
        reason: &'static str,
    },
}

pub trait Validate {
    fn validate(&self) -> Result<(), ContractViolation>;
}

/// Shared identifier charset rule: non-empty, bounded, and restricted to the
/// characters that keep identifiers safe as key-space components.
pub(crate) fn validate_id_text(
    field: &'static str,
    value: &str,
    max_len: usize,
) -> Result<(), ContractViolation> {
    if value.is_empty() {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must not be empty",
        });
    }
    if value.len() > max_len {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "exceeds max length",
        });
    }
    if !value
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must be ascii alphanumeric, '-' or '_'",
        });
    }
    Ok(())
}
