#![forbid(unsafe_code)]

use veriport_contracts::{Credential, RegistryEventKind, Said, Validate};

use crate::credentials::CredentialCache;
use crate::keystate::{IndexedSignature, KeyStateSource};
use crate::ValidationError;

/// The single accepted content type for credential presentation bodies.
pub const PRESENTATION_CONTENT_TYPE: &str = "application/credential+json";

#[derive(Debug, serde::Deserialize)]
struct SignedCredential {
    credential: Credential,
    /// Issuer signature over the credential's canonical JSON bytes, as
    /// `"{index}:{base64}"`.
    signature: String,
}

#[derive(Debug, serde::Deserialize)]
struct RegistryEventNotice {
    said: Said,
    event: RegistryEventKind,
}

#[derive(Debug, serde::Deserialize)]
struct PresentationEnvelope {
    #[serde(default)]
    credentials: Vec<SignedCredential>,
    #[serde(default, rename = "registryEvents")]
    registry_events: Vec<RegistryEventNotice>,
}

/// Outcome of parsing one presentation body: the credential SAIDs that were
/// actually processed, plus any SAIDs whose registry events confirmed a
/// revocation class.
#[derive(Debug, Default)]
pub struct ParsedPresentation {
    pub credential_saids: Vec<Said>,
    pub revoked_saids: Vec<Said>,
}

impl ParsedPresentation {
    pub fn processed(&self, said: &Said) -> bool {
        self.credential_saids.contains(said)
    }
}

/// Thin stand-in for the external message parse pipeline: decode the
/// envelope, verify each credential's issuer signature against current
/// key-state, and feed the cache. Nothing is cached for an envelope that
/// fails validation partway through a credential entry.
pub fn parse_presentation(
    body: &[u8],
    keys: &dyn KeyStateSource,
    cache: &CredentialCache,
) -> Result<ParsedPresentation, ValidationError> {
    let envelope: PresentationEnvelope = serde_json::from_slice(body)
        .map_err(|e| ValidationError(format!("invalid presentation body: {e}")))?;

    let mut verified = Vec::with_capacity(envelope.credentials.len());
    for signed in envelope.credentials {
        signed.credential.validate()?;
        let issuer = &signed.credential.issuer;
        let Some(state) = keys.key_state(issuer) else {
            return Err(ValidationError(format!("unknown issuer AID {issuer}")));
        };
        let signature = IndexedSignature::parse(&signed.signature)?;
        let message = canonical_bytes(&signed.credential)?;
        if !state.verify(signature.index, &signature.raw, &message) {
            return Err(ValidationError(format!(
                "issuer signature invalid for credential {}",
                signed.credential.said
            )));
        }
        verified.push(signed.credential);
    }

    let mut parsed = ParsedPresentation::default();
    for credential in verified {
        parsed.credential_saids.push(credential.said.clone());
        cache.insert_credential(credential);
    }
    for notice in envelope.registry_events {
        cache.record_registry_event(&notice.said, notice.event);
        if notice.event.is_revocation() {
            parsed.revoked_saids.push(notice.said);
        }
    }
    Ok(parsed)
}

/// Canonical signing bytes for a credential: its JSON serialization with
/// the fixed field order of the record type and sorted claim keys.
pub fn canonical_bytes(credential: &Credential) -> Result<Vec<u8>, ValidationError> {
    serde_json::to_vec(credential)
        .map_err(|e| ValidationError(format!("credential encoding failed: {e}")))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use ed25519_dalek::{Signer, SigningKey};
    use veriport_contracts::{Aid, CredentialSubject, SchemaSaid};

    use super::*;
    use crate::credentials::CredentialSource;
    use crate::keystate::KeyStateDirectory;

    fn aid(id: &str) -> Aid {
        Aid::new(id).unwrap()
    }

    fn said(id: &str) -> Said {
        Said::new(id).unwrap()
    }

    fn credential(said_id: &str, issuer: &Aid) -> Credential {
        let mut claims = BTreeMap::new();
        claims.insert("LEI".to_string(), "529900T8BM49AURSDO55".to_string());
        Credential {
            said: said(said_id),
            schema: SchemaSaid::new("EEy9PkikFcANV1l7EHukCeXqrzT1hNZjGlUk7wuMO5jw").unwrap(),
            issuer: issuer.clone(),
            subject: CredentialSubject {
                id: aid("EHolder0000000000000000000000000000000000001"),
                claims,
            },
        }
    }

    fn envelope_json(credential: &Credential, signature: &str, events: &str) -> Vec<u8> {
        let cred_json = serde_json::to_string(credential).unwrap();
        format!(
            "{{\"credentials\": [{{\"credential\": {cred_json}, \"signature\": \"{signature}\"}}], \"registryEvents\": {events}}}"
        )
        .into_bytes()
    }

    #[test]
    fn valid_envelope_caches_credential_and_reports_said() {
        let issuer_key = SigningKey::from_bytes(&[7; 32]);
        let issuer = aid("EIssuer0000000000000000000000000000000000001");
        let keys = KeyStateDirectory::new();
        keys.register(issuer.clone(), vec![issuer_key.verifying_key()]);

        let cred = credential("ECred0000000000000000000000000000000000000001", &issuer);
        let message = canonical_bytes(&cred).unwrap();
        let signature = IndexedSignature::encode(0, &issuer_key.sign(&message).to_bytes());

        let cache = CredentialCache::new();
        let body = envelope_json(&cred, &signature, "[]");
        let parsed = parse_presentation(&body, &keys, &cache).unwrap();

        assert!(parsed.processed(&cred.said));
        assert!(parsed.revoked_saids.is_empty());
        assert_eq!(cache.resolved(&cred.said).unwrap(), cred);
    }

    #[test]
    fn bad_issuer_signature_caches_nothing() {
        let issuer_key = SigningKey::from_bytes(&[7; 32]);
        let other_key = SigningKey::from_bytes(&[8; 32]);
        let issuer = aid("EIssuer0000000000000000000000000000000000001");
        let keys = KeyStateDirectory::new();
        keys.register(issuer.clone(), vec![issuer_key.verifying_key()]);

        let cred = credential("ECred0000000000000000000000000000000000000002", &issuer);
        let message = canonical_bytes(&cred).unwrap();
        let signature = IndexedSignature::encode(0, &other_key.sign(&message).to_bytes());

        let cache = CredentialCache::new();
        let body = envelope_json(&cred, &signature, "[]");
        assert!(parse_presentation(&body, &keys, &cache).is_err());
        assert!(cache.resolved(&cred.said).is_none());
    }

    #[test]
    fn unknown_issuer_is_rejected() {
        let issuer = aid("EIssuer0000000000000000000000000000000000009");
        let keys = KeyStateDirectory::new();
        let cred = credential("ECred0000000000000000000000000000000000000003", &issuer);
        let body = envelope_json(&cred, "0:AAAA", "[]");

        let cache = CredentialCache::new();
        let err = parse_presentation(&body, &keys, &cache).unwrap_err();
        assert!(err.0.contains("unknown issuer"));
    }

    #[test]
    fn revocation_events_are_recorded_and_surfaced() {
        let keys = KeyStateDirectory::new();
        let cache = CredentialCache::new();
        let body = br#"{
            "credentials": [],
            "registryEvents": [
                {"said": "ECredIss00000000000000000000000000000000001", "event": "issuance"},
                {"said": "ECredRev00000000000000000000000000000000001", "event": "backed_revocation"}
            ]
        }"#;

        let parsed = parse_presentation(body, &keys, &cache).unwrap();
        assert_eq!(parsed.revoked_saids.len(), 1);
        assert_eq!(
            parsed.revoked_saids[0],
            said("ECredRev00000000000000000000000000000000001")
        );
        assert_eq!(
            cache.registry_state(&said("ECredIss00000000000000000000000000000000001")),
            Some(RegistryEventKind::Issuance)
        );
    }

    #[test]
    fn malformed_body_is_a_bad_request() {
        let keys = KeyStateDirectory::new();
        let cache = CredentialCache::new();
        assert!(parse_presentation(b"not json", &keys, &cache).is_err());
    }
}
