#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use crate::common::{validate_id_text, ContractViolation, Validate};

pub const MAX_ID_LEN: usize = 128;

/// Autonomic identifier prefix of a credential holder or signer.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct Aid(String);

impl Aid {
    pub fn new(value: impl Into<String>) -> Result<Self, ContractViolation> {
        let value = value.into();
        validate_id_text("aid", &value, MAX_ID_LEN)?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Aid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Self-addressing identifier of a credential.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct Said(String);

impl Said {
    pub fn new(value: impl Into<String>) -> Result<Self, ContractViolation> {
        let value = value.into();
        validate_id_text("said", &value, MAX_ID_LEN)?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Said {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Legal entity identifier claimed by a credential subject.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct Lei(String);

impl Lei {
    pub fn new(value: impl Into<String>) -> Result<Self, ContractViolation> {
        let value = value.into();
        validate_id_text("lei", &value, MAX_ID_LEN)?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// SAID of the JSON schema a credential was issued against.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct SchemaSaid(String);

impl SchemaSaid {
    pub fn new(value: impl Into<String>) -> Result<Self, ContractViolation> {
        let value = value.into();
        validate_id_text("schema", &value, MAX_ID_LEN)?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CredentialSubject {
    pub id: Aid,
    #[serde(default)]
    pub claims: BTreeMap<String, String>,
}

/// A resolved credential as handed over by the external parse pipeline.
/// Immutable once resolved; referenced everywhere else by its SAID.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Credential {
    pub said: Said,
    pub schema: SchemaSaid,
    pub issuer: Aid,
    pub subject: CredentialSubject,
}

impl Credential {
    pub fn lei(&self) -> Option<&str> {
        self.subject.claims.get("LEI").map(String::as_str)
    }

    pub fn engagement_context_role(&self) -> Option<&str> {
        self.subject
            .claims
            .get("engagementContextRole")
            .map(String::as_str)
    }
}

impl Validate for Credential {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_id_text("said", self.said.as_str(), MAX_ID_LEN)?;
        validate_id_text("schema", self.schema.as_str(), MAX_ID_LEN)?;
        validate_id_text("issuer", self.issuer.as_str(), MAX_ID_LEN)?;
        validate_id_text("subject.id", self.subject.id.as_str(), MAX_ID_LEN)?;
        Ok(())
    }
}

/// Latest transaction-event state known for a credential in its registry.
/// Issuance variants mean a revocation has not happened from the ledger's
/// perspective; revocation variants confirm it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryEventKind {
    Issuance,
    BackedIssuance,
    Revocation,
    BackedRevocation,
}

impl RegistryEventKind {
    pub fn is_issuance(&self) -> bool {
        matches!(self, Self::Issuance | Self::BackedIssuance)
    }

    pub fn is_revocation(&self) -> bool {
        matches!(self, Self::Revocation | Self::BackedRevocation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential() -> Credential {
        let mut claims = BTreeMap::new();
        claims.insert("LEI".to_string(), "254900OPPU84GM83MG36".to_string());
        claims.insert(
            "engagementContextRole".to_string(),
            "EBA Document Submitter".to_string(),
        );
        Credential {
            said: Said::new("EK7Zrw8JNTfg1QJX9LJm0Zz1cXa0yQwL5mP3nR6tU8vA").unwrap(),
            schema: SchemaSaid::new("EEy9PkikFcANV1l7EHukCeXqrzT1hNZjGlUk7wuMO5jw").unwrap(),
            issuer: Aid::new("EIssuerAid000000000000000000000000000000001").unwrap(),
            subject: CredentialSubject {
                id: Aid::new("EHolderAid000000000000000000000000000000001").unwrap(),
                claims,
            },
        }
    }

    #[test]
    fn claim_accessors() {
        let cred = credential();
        assert_eq!(cred.lei(), Some("254900OPPU84GM83MG36"));
        assert_eq!(
            cred.engagement_context_role(),
            Some("EBA Document Submitter")
        );
        assert!(cred.validate().is_ok());
    }

    #[test]
    fn registry_event_classes() {
        assert!(RegistryEventKind::Issuance.is_issuance());
        assert!(RegistryEventKind::BackedIssuance.is_issuance());
        assert!(RegistryEventKind::Revocation.is_revocation());
        assert!(RegistryEventKind::BackedRevocation.is_revocation());
        assert!(!RegistryEventKind::Issuance.is_revocation());
    }
}
