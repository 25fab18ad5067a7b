#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::RwLock;

use veriport_contracts::{Credential, RegistryEventKind, Said};

/// Seam to the external credential store: resolved credential objects and
/// the latest registry transaction-event state per credential SAID.
pub trait CredentialSource {
    fn resolved(&self, said: &Said) -> Option<Credential>;
    fn registry_state(&self, said: &Said) -> Option<RegistryEventKind>;
}

#[derive(Debug, Default)]
struct CacheInner {
    credentials: BTreeMap<Said, Credential>,
    registry: BTreeMap<Said, RegistryEventKind>,
}

/// In-memory credential store fed by the presentation parse pipeline. A
/// credential is immutable once inserted; registry state tracks the latest
/// observed event for its SAID.
#[derive(Debug, Default)]
pub struct CredentialCache {
    inner: RwLock<CacheInner>,
}

impl CredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_credential(&self, credential: Credential) {
        if let Ok(mut inner) = self.inner.write() {
            inner
                .credentials
                .insert(credential.said.clone(), credential);
        }
    }

    pub fn record_registry_event(&self, said: &Said, event: RegistryEventKind) {
        if let Ok(mut inner) = self.inner.write() {
            inner.registry.insert(said.clone(), event);
        }
    }
}

impl CredentialSource for CredentialCache {
    fn resolved(&self, said: &Said) -> Option<Credential> {
        self.inner.read().ok()?.credentials.get(said).cloned()
    }

    fn registry_state(&self, said: &Said) -> Option<RegistryEventKind> {
        self.inner.read().ok()?.registry.get(said).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veriport_contracts::{Aid, CredentialSubject, SchemaSaid};

    fn said(id: &str) -> Said {
        Said::new(id).unwrap()
    }

    fn credential(said_id: &str) -> Credential {
        Credential {
            said: said(said_id),
            schema: SchemaSaid::new("EEy9PkikFcANV1l7EHukCeXqrzT1hNZjGlUk7wuMO5jw").unwrap(),
            issuer: Aid::new("EIssuer0000000000000000000000000000000000001").unwrap(),
            subject: CredentialSubject {
                id: Aid::new("EHolder0000000000000000000000000000000000001").unwrap(),
                claims: BTreeMap::new(),
            },
        }
    }

    #[test]
    fn cache_resolves_inserted_credentials() {
        let cache = CredentialCache::new();
        let s = said("ECred0000000000000000000000000000000000000001");
        assert!(cache.resolved(&s).is_none());

        cache.insert_credential(credential(s.as_str()));
        assert_eq!(cache.resolved(&s).unwrap().said, s);
    }

    #[test]
    fn registry_state_tracks_latest_event() {
        let cache = CredentialCache::new();
        let s = said("ECred0000000000000000000000000000000000000002");
        assert!(cache.registry_state(&s).is_none());

        cache.record_registry_event(&s, RegistryEventKind::Issuance);
        assert_eq!(cache.registry_state(&s), Some(RegistryEventKind::Issuance));

        cache.record_registry_event(&s, RegistryEventKind::Revocation);
        assert_eq!(cache.registry_state(&s), Some(RegistryEventKind::Revocation));
    }
}
