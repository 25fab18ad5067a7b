#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use veriport_contracts::{
    Aid, ContractViolation, Credential, Dig, ReportStats, ReportStatus, Said, UnixTimeMs,
};

/// Fixed chunk size for report payload storage.
pub const CHUNK_SIZE: usize = 4096;

// Sub-database key prefixes. Disjoint and independently iterable; no prefix
// is ever a prefix of another entry's full key.
const ISS: &str = "iss.";
const REV: &str = "rev.";
const ACCTS: &str = "accts.";
const REVK: &str = "revk.";
const RPTS: &str = "rpts.";
const STTS: &str = "stts.";
const IMGS: &str = "imgs.";
const STATS: &str = "stats.";

#[derive(Debug, Clone, PartialEq)]
pub enum StorageError {
    CorruptRecord { prefix: &'static str, key: String },
    Encode { prefix: &'static str },
    ContractViolation(ContractViolation),
}

impl From<ContractViolation> for StorageError {
    fn from(v: ContractViolation) -> Self {
        StorageError::ContractViolation(v)
    }
}

fn encode_time(at: UnixTimeMs) -> Vec<u8> {
    // Fixed-width decimal keeps timestamp cells ordered as raw bytes.
    format!("{:020}", at.0).into_bytes()
}

fn decode_time(prefix: &'static str, key: &str, val: &[u8]) -> Result<UnixTimeMs, StorageError> {
    let text = std::str::from_utf8(val).map_err(|_| StorageError::CorruptRecord {
        prefix,
        key: key.to_string(),
    })?;
    let ms = text.parse::<u64>().map_err(|_| StorageError::CorruptRecord {
        prefix,
        key: key.to_string(),
    })?;
    Ok(UnixTimeMs(ms))
}

/// Verifier database: one ordered byte keyspace carrying the presentation
/// and revocation escrows, the authorization index, the revocation audit
/// trail, the report stats cells, the status index sets and the chunked
/// report payloads, each under its own prefix.
///
/// All multi-step mutations (status moves, accept commits) run inside one
/// `&mut self` method so a reader behind the same lock can never observe a
/// digest in two status sets or in none.
#[derive(Debug, Default)]
pub struct VerifierDb {
    kv: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl VerifierDb {
    pub fn new_in_memory() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Ordered-keyspace primitives.
    // ------------------------------------------------------------------

    fn full_key(prefix: &str, id: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(prefix.len() + id.len());
        key.extend_from_slice(prefix.as_bytes());
        key.extend_from_slice(id.as_bytes());
        key
    }

    fn cell_put(&mut self, prefix: &str, id: &str, val: Vec<u8>) {
        self.kv.insert(Self::full_key(prefix, id), val);
    }

    fn cell_get(&self, prefix: &str, id: &str) -> Option<&Vec<u8>> {
        self.kv.get(&Self::full_key(prefix, id))
    }

    fn cell_rem(&mut self, prefix: &str, id: &str) -> bool {
        self.kv.remove(&Self::full_key(prefix, id)).is_some()
    }

    /// All `(suffix, value)` entries under a prefix, in byte order.
    fn prefix_items(&self, prefix: &str) -> Vec<(String, Vec<u8>)> {
        let start = prefix.as_bytes().to_vec();
        self.kv
            .range(start..)
            .take_while(|(k, _)| k.starts_with(prefix.as_bytes()))
            .map(|(k, v)| {
                let suffix = String::from_utf8_lossy(&k[prefix.len()..]).into_owned();
                (suffix, v.clone())
            })
            .collect()
    }

    fn prefix_clear(&mut self, prefix: &str, id_prefix: &str) -> usize {
        let full = Self::full_key(prefix, id_prefix);
        let doomed: Vec<Vec<u8>> = self
            .kv
            .range(full.clone()..)
            .take_while(|(k, _)| k.starts_with(full.as_slice()))
            .map(|(k, _)| k.clone())
            .collect();
        let count = doomed.len();
        for key in doomed {
            self.kv.remove(&key);
        }
        count
    }

    // Insertion-ordered multi-value sets: members live under
    // `prefix + key + '.' + %08x ordinal`, duplicate adds are no-ops.

    fn set_entries(&self, prefix: &str, key: &str) -> Vec<(Vec<u8>, Vec<u8>)> {
        let base = Self::full_key(prefix, key);
        let mut start = base.clone();
        start.push(b'.');
        self.kv
            .range(start.clone()..)
            .take_while(|(k, _)| k.starts_with(start.as_slice()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn set_add(&mut self, prefix: &str, key: &str, member: &str) -> bool {
        let entries = self.set_entries(prefix, key);
        if entries.iter().any(|(_, v)| v.as_slice() == member.as_bytes()) {
            return false;
        }
        let next = entries
            .last()
            .and_then(|(k, _)| {
                let tail = &k[k.len().saturating_sub(8)..];
                std::str::from_utf8(tail).ok().and_then(|s| u32::from_str_radix(s, 16).ok())
            })
            .map(|n| n.saturating_add(1))
            .unwrap_or(0);
        let mut full = Self::full_key(prefix, key);
        full.push(b'.');
        full.extend_from_slice(format!("{:08x}", next).as_bytes());
        self.kv.insert(full, member.as_bytes().to_vec());
        true
    }

    fn set_rem(&mut self, prefix: &str, key: &str, member: &str) -> bool {
        let entry = self
            .set_entries(prefix, key)
            .into_iter()
            .find(|(_, v)| v.as_slice() == member.as_bytes());
        match entry {
            Some((k, _)) => self.kv.remove(&k).is_some(),
            None => false,
        }
    }

    fn set_members(&self, prefix: &str, key: &str) -> Vec<String> {
        self.set_entries(prefix, key)
            .into_iter()
            .map(|(_, v)| String::from_utf8_lossy(&v).into_owned())
            .collect()
    }

    // ------------------------------------------------------------------
    // Presentation and revocation escrows.
    // ------------------------------------------------------------------

    /// Idempotent insert: a SAID already pending keeps its original receipt
    /// time. Returns false when the entry was already present.
    pub fn presentation_escrow(&mut self, said: &Said, now: UnixTimeMs) -> bool {
        if self.cell_get(ISS, said.as_str()).is_some() {
            return false;
        }
        self.cell_put(ISS, said.as_str(), encode_time(now));
        true
    }

    pub fn presentations(&self) -> Result<Vec<(Said, UnixTimeMs)>, StorageError> {
        let mut out = Vec::new();
        for (key, val) in self.prefix_items(ISS) {
            let said = Said::new(key.clone())?;
            let at = decode_time(ISS, &key, &val)?;
            out.push((said, at));
        }
        Ok(out)
    }

    pub fn presentation_rem(&mut self, said: &Said) -> bool {
        self.cell_rem(ISS, said.as_str())
    }

    pub fn revocation_escrow(&mut self, said: &Said, now: UnixTimeMs) -> bool {
        if self.cell_get(REV, said.as_str()).is_some() {
            return false;
        }
        self.cell_put(REV, said.as_str(), encode_time(now));
        true
    }

    pub fn revocations(&self) -> Result<Vec<(Said, UnixTimeMs)>, StorageError> {
        let mut out = Vec::new();
        for (key, val) in self.prefix_items(REV) {
            let said = Said::new(key.clone())?;
            let at = decode_time(REV, &key, &val)?;
            out.push((said, at));
        }
        Ok(out)
    }

    pub fn revocation_rem(&mut self, said: &Said) -> bool {
        self.cell_rem(REV, said.as_str())
    }

    // ------------------------------------------------------------------
    // Authorization index and revocation audit trail.
    // ------------------------------------------------------------------

    /// Pin the proof-of-authorization credential SAID for an identifier.
    /// Overwrites on re-authorization.
    pub fn authorize_commit(&mut self, aid: &Aid, said: &Said) {
        self.cell_put(ACCTS, aid.as_str(), said.as_str().as_bytes().to_vec());
    }

    pub fn authorization(&self, aid: &Aid) -> Result<Option<Said>, StorageError> {
        match self.cell_get(ACCTS, aid.as_str()) {
            None => Ok(None),
            Some(val) => {
                let text =
                    std::str::from_utf8(val).map_err(|_| StorageError::CorruptRecord {
                        prefix: ACCTS,
                        key: aid.as_str().to_string(),
                    })?;
                Ok(Some(Said::new(text)?))
            }
        }
    }

    /// Record a confirmed revocation for audit, keyed by SAID plus the
    /// escrow receipt time. The authorization index is left untouched here.
    pub fn revocation_audit_commit(
        &mut self,
        said: &Said,
        at: UnixTimeMs,
        credential: &Credential,
    ) -> Result<(), StorageError> {
        let val = serde_json::to_vec(credential).map_err(|_| StorageError::Encode {
            prefix: REVK,
        })?;
        let id = format!("{}.{}", said.as_str(), String::from_utf8_lossy(&encode_time(at)));
        self.cell_put(REVK, &id, val);
        Ok(())
    }

    pub fn revocation_audits(
        &self,
        said: &Said,
    ) -> Result<Vec<(UnixTimeMs, Credential)>, StorageError> {
        let id_prefix = format!("{}.", said.as_str());
        let mut out = Vec::new();
        for (key, val) in self.prefix_items(REVK) {
            let Some(stamp) = key.strip_prefix(&id_prefix) else {
                continue;
            };
            let at = decode_time(REVK, &key, stamp.as_bytes())?;
            let credential =
                serde_json::from_slice(&val).map_err(|_| StorageError::CorruptRecord {
                    prefix: REVK,
                    key: key.clone(),
                })?;
            out.push((at, credential));
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Report stats, status index and submitter index.
    // ------------------------------------------------------------------

    /// Commit a freshly accepted upload: stats cell, submitter index and
    /// status-set membership land together. A re-upload of a digest that
    /// already reached a status leaves the old status set first, keeping
    /// the one-set-per-digest invariant.
    pub fn report_accept_commit(
        &mut self,
        dig: &Dig,
        stats: &ReportStats,
    ) -> Result<(), StorageError> {
        let val = serde_json::to_vec(stats).map_err(|_| StorageError::Encode {
            prefix: STATS,
        })?;
        if let Some(previous) = self.report_stats(dig)? {
            self.set_rem(STTS, previous.status.as_str(), dig.as_str());
        }
        self.set_add(RPTS, stats.submitter.as_str(), dig.as_str());
        self.set_add(STTS, stats.status.as_str(), dig.as_str());
        self.cell_put(STATS, dig.as_str(), val);
        Ok(())
    }

    /// Move a report to a new status: remove from the current status set,
    /// rewrite the stats cell, add to the new status set. Returns false when
    /// no stats exist for the digest.
    pub fn report_status_commit(
        &mut self,
        dig: &Dig,
        status: ReportStatus,
        message: Option<&str>,
    ) -> Result<bool, StorageError> {
        let Some(mut stats) = self.report_stats(dig)? else {
            return Ok(false);
        };
        self.set_rem(STTS, stats.status.as_str(), dig.as_str());
        stats.status = status;
        if let Some(message) = message {
            stats.message = message.to_string();
        }
        let val = serde_json::to_vec(&stats).map_err(|_| StorageError::Encode {
            prefix: STATS,
        })?;
        self.set_add(STTS, status.as_str(), dig.as_str());
        self.cell_put(STATS, dig.as_str(), val);
        Ok(true)
    }

    pub fn report_stats(&self, dig: &Dig) -> Result<Option<ReportStats>, StorageError> {
        match self.cell_get(STATS, dig.as_str()) {
            None => Ok(None),
            Some(val) => {
                let stats =
                    serde_json::from_slice(val).map_err(|_| StorageError::CorruptRecord {
                        prefix: STATS,
                        key: dig.as_str().to_string(),
                    })?;
                Ok(Some(stats))
            }
        }
    }

    /// Point-in-time snapshot of the digests currently in a status set, in
    /// insertion order.
    pub fn status_digs(&self, status: ReportStatus) -> Result<Vec<Dig>, StorageError> {
        self.set_members(STTS, status.as_str())
            .into_iter()
            .map(|m| Dig::new(m).map_err(StorageError::from))
            .collect()
    }

    pub fn reports_for(&self, aid: &Aid) -> Result<Vec<Dig>, StorageError> {
        self.set_members(RPTS, aid.as_str())
            .into_iter()
            .map(|m| Dig::new(m).map_err(StorageError::from))
            .collect()
    }

    // ------------------------------------------------------------------
    // Chunked report payloads.
    // ------------------------------------------------------------------

    /// Drop every stored chunk for a digest. Required before a fresh write;
    /// partial chunk ranges are never left behind.
    pub fn chunks_clear(&mut self, dig: &Dig) -> usize {
        self.prefix_clear(IMGS, &format!("{}.", dig.as_str()))
    }

    pub fn chunk_put(&mut self, dig: &Dig, index: u32, data: &[u8]) {
        let id = format!("{}.{:08x}", dig.as_str(), index);
        self.cell_put(IMGS, &id, data.to_vec());
    }

    pub fn chunk(&self, dig: &Dig, index: u32) -> Option<Vec<u8>> {
        let id = format!("{}.{:08x}", dig.as_str(), index);
        self.cell_get(IMGS, &id).cloned()
    }

    /// Finite, restartable chunk sequence from index 0, terminating at the
    /// first missing index.
    pub fn chunks<'a>(&'a self, dig: &'a Dig) -> ChunkIter<'a> {
        ChunkIter {
            db: self,
            dig,
            index: 0,
        }
    }
}

pub struct ChunkIter<'a> {
    db: &'a VerifierDb,
    dig: &'a Dig,
    index: u32,
}

impl Iterator for ChunkIter<'_> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        let chunk = self.db.chunk(self.dig, self.index)?;
        self.index = self.index.saturating_add(1);
        Some(chunk)
    }
}
