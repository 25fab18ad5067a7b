#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::RwLock;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use veriport_contracts::Aid;

use crate::ValidationError;

/// Current verification keys and sequence number known for an identifier at
/// a point in time. Lookups can return nothing, and the state behind an AID
/// can change between calls; callers hold a `KeyState` only for the duration
/// of one check.
#[derive(Debug, Clone)]
pub struct KeyState {
    pub sequence: u64,
    keys: Vec<VerifyingKey>,
}

impl KeyState {
    pub fn new(sequence: u64, keys: Vec<VerifyingKey>) -> Self {
        Self { sequence, keys }
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Verify a raw signature at a declared key index against a message.
    /// Unknown indices and malformed signatures verify false.
    pub fn verify(&self, index: usize, signature: &[u8], message: &[u8]) -> bool {
        let Some(key) = self.keys.get(index) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        key.verify(message, &signature).is_ok()
    }
}

/// Seam to the external key-state subsystem.
pub trait KeyStateSource {
    fn key_state(&self, aid: &Aid) -> Option<KeyState>;
}

/// In-memory AID directory backing the key-state seam for the service and
/// for tests. Registration replaces any prior state; rotation bumps the
/// sequence so watchers can compare against a remembered value.
#[derive(Debug, Default)]
pub struct KeyStateDirectory {
    states: RwLock<BTreeMap<Aid, KeyState>>,
}

impl KeyStateDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, aid: Aid, keys: Vec<VerifyingKey>) {
        if let Ok(mut states) = self.states.write() {
            states.insert(aid, KeyState::new(0, keys));
        }
    }

    /// Replace an identifier's keys, bumping its sequence. Returns false for
    /// an unregistered AID.
    pub fn rotate(&self, aid: &Aid, keys: Vec<VerifyingKey>) -> bool {
        let Ok(mut states) = self.states.write() else {
            return false;
        };
        match states.get_mut(aid) {
            Some(state) => {
                let next = state.sequence.saturating_add(1);
                *state = KeyState::new(next, keys);
                true
            }
            None => false,
        }
    }

    /// Build a directory from a JSON seed of `{"aid": ["base64 key", ...]}`.
    pub fn from_seed_json(bytes: &[u8]) -> Result<Self, ValidationError> {
        let seed: BTreeMap<String, Vec<String>> = serde_json::from_slice(bytes)
            .map_err(|e| ValidationError(format!("invalid key-state seed: {e}")))?;
        let directory = Self::new();
        for (aid_text, keys_text) in seed {
            let aid = Aid::new(aid_text)?;
            let mut keys = Vec::with_capacity(keys_text.len());
            for text in keys_text {
                let raw = BASE64
                    .decode(text.as_bytes())
                    .map_err(|e| ValidationError(format!("invalid key encoding for {aid}: {e}")))?;
                let raw: [u8; 32] = raw.try_into().map_err(|_| {
                    ValidationError(format!("invalid key length for {aid}, expected 32 bytes"))
                })?;
                let key = VerifyingKey::from_bytes(&raw)
                    .map_err(|e| ValidationError(format!("invalid key for {aid}: {e}")))?;
                keys.push(key);
            }
            directory.register(aid, keys);
        }
        Ok(directory)
    }
}

impl KeyStateSource for KeyStateDirectory {
    fn key_state(&self, aid: &Aid) -> Option<KeyState> {
        self.states.read().ok()?.get(aid).cloned()
    }
}

/// One signature from a manifest entry: a declared key index and the raw
/// signature bytes, carried as `"{index}:{base64}"` text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedSignature {
    pub index: usize,
    pub raw: Vec<u8>,
}

impl IndexedSignature {
    pub fn parse(text: &str) -> Result<Self, ValidationError> {
        let Some((index_text, sig_text)) = text.split_once(':') else {
            return Err(ValidationError(format!(
                "invalid signature encoding '{text}', expected 'index:base64'"
            )));
        };
        let index = index_text
            .parse::<usize>()
            .map_err(|_| ValidationError(format!("invalid signature index '{index_text}'")))?;
        let raw = BASE64
            .decode(sig_text.as_bytes())
            .map_err(|e| ValidationError(format!("invalid signature encoding: {e}")))?;
        Ok(Self { index, raw })
    }

    pub fn encode(index: usize, raw: &[u8]) -> String {
        format!("{}:{}", index, BASE64.encode(raw))
    }
}
