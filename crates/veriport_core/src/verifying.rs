#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::io::{Cursor, Read, Seek};
use std::sync::Mutex;

use serde_json::Value;
use veriport_contracts::{ReportStats, ReportStatus};
use veriport_storage::VerifierDb;
use zip::ZipArchive;

use crate::keystate::{IndexedSignature, KeyStateSource};
use crate::reporting;
use crate::{lock_db, SweepError, ValidationError};

const NO_MANIFEST: &str = "no manifest in file, invalid signed report package";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VerificationSweepMetrics {
    pub processed: u32,
    pub verified: u32,
    pub failed: u32,
}

/// One verification pass over every report currently in accepted status.
///
/// Per report: reassemble the archive and load its stats under a short
/// lock, verify outside the lock, then re-lock for the terminal status
/// move. Every validation or decode failure is persisted as a failed
/// status with its message; nothing propagates past an entry.
pub fn run_verification_sweep(
    db: &Mutex<VerifierDb>,
    keys: &dyn KeyStateSource,
) -> Result<VerificationSweepMetrics, SweepError> {
    let accepted = {
        let guard = lock_db(db)?;
        reporting::accepted_digs(&guard)?
    };

    let mut metrics = VerificationSweepMetrics::default();
    for dig in accepted {
        let (stats, bytes) = {
            let guard = lock_db(db)?;
            let stats = match reporting::get(&guard, &dig) {
                Ok(Some(stats)) => stats,
                Ok(None) => {
                    tracing::warn!(dig = %dig, "accepted digest has no stats record");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(dig = %dig, error = ?e, "failed to load report stats");
                    continue;
                }
            };
            let bytes: Vec<u8> = reporting::data_chunks(&guard, &dig).flatten().collect();
            (stats, bytes)
        };

        tracing::info!(
            filename = %stats.filename,
            content_type = %stats.content_type,
            size = stats.size,
            "processing report"
        );
        metrics.processed = metrics.processed.saturating_add(1);

        let outcome = verify_package(&bytes, &stats, keys);
        let mut guard = lock_db(db)?;
        match outcome {
            Ok(message) => {
                if let Err(e) =
                    reporting::update(&mut guard, &dig, ReportStatus::Verified, Some(&message))
                {
                    tracing::warn!(dig = %dig, error = ?e, "failed to commit verified status");
                    continue;
                }
                tracing::info!(dig = %dig, %message, "report verified");
                metrics.verified = metrics.verified.saturating_add(1);
            }
            Err(err) => {
                if let Err(e) =
                    reporting::update(&mut guard, &dig, ReportStatus::Failed, Some(&err.0))
                {
                    tracing::warn!(dig = %dig, error = ?e, "failed to commit failed status");
                    continue;
                }
                tracing::info!(dig = %dig, message = %err.0, "report failed verification");
                metrics.failed = metrics.failed.saturating_add(1);
            }
        }
    }
    Ok(metrics)
}

/// Verify one report package against its submitter's signatures.
///
/// Ok carries the verified summary message; Err carries the failure
/// message destined for the failed status. The archive is decoded fully
/// in memory; nothing is extracted to disk.
pub fn verify_package(
    bytes: &[u8],
    stats: &ReportStats,
    keys: &dyn KeyStateSource,
) -> Result<String, ValidationError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ValidationError(format!("invalid report package zip: {e}")))?;
    let names: Vec<String> = archive.file_names().map(str::to_string).collect();

    // First root, in archive entry order, holding both a META-INF and a
    // reports directory. Additional candidate roots are unsupported; the
    // first one wins deterministically.
    let root = package_root(&names).ok_or_else(|| ValidationError(NO_MANIFEST.to_string()))?;

    let manifest_bytes = read_entry(&mut archive, &format!("{root}META-INF/reports.json"))
        .ok_or_else(|| ValidationError(NO_MANIFEST.to_string()))?;
    let manifest: Value = serde_json::from_slice(&manifest_bytes)
        .map_err(|e| ValidationError(format!("invalid manifest file in report package: {e}")))?;
    let doc_info = manifest.get("documentInfo").ok_or_else(|| {
        ValidationError("invalid manifest file in report package, missing 'documentInfo'".to_string())
    })?;
    let signatures = doc_info
        .get("signatures")
        .ok_or_else(|| ValidationError("no signatures found in manifest file".to_string()))?;
    let signatures = signatures.as_array().ok_or_else(|| {
        ValidationError("invalid manifest file in report package, 'signatures' is not a list".to_string())
    })?;

    let files = report_files(&names, &root);

    let mut signed: BTreeSet<String> = BTreeSet::new();
    for entry in signatures {
        let file = manifest_field(entry, "file")?;
        let full = resolve_manifest_path(&root, file).ok_or_else(|| {
            ValidationError(format!("signature element file {file} points to invalid file"))
        })?;
        let Some(ser) = read_entry(&mut archive, &full) else {
            return Err(ValidationError(format!(
                "signature element file {full} points to invalid file"
            )));
        };

        // Only the submitter's own signatures count toward completeness;
        // entries from other signers are ignored, not rejected.
        let aid = manifest_field(entry, "aid")?;
        if aid != stats.submitter.as_str() {
            continue;
        }

        let Some(state) = keys.key_state(&stats.submitter) else {
            return Err(ValidationError(format!("signature from unknown AID {aid}")));
        };

        let sigs = entry.get("sigs").and_then(Value::as_array).ok_or_else(|| {
            ValidationError(
                "invalid signature in manifest signature list, missing 'sigs'".to_string(),
            )
        })?;
        if sigs.is_empty() {
            return Err(ValidationError(format!("missing signatures on {file}")));
        }
        for sig in sigs {
            let text = sig.as_str().ok_or_else(|| {
                ValidationError(format!("invalid signature encoding on {file}"))
            })?;
            let parsed = IndexedSignature::parse(text)?;
            if !state.verify(parsed.index, &parsed.raw, &ser) {
                return Err(ValidationError(format!(
                    "signature {} invalid for {}",
                    parsed.index, file
                )));
            }
        }

        let base = full.rsplit('/').next().unwrap_or(full.as_str());
        signed.insert(base.to_string());
    }

    let unsigned: Vec<&String> = files.difference(&signed).collect();
    if unsigned.is_empty() {
        Ok(format!(
            "All {} files in report package have been signed by submitter ({}).",
            files.len(),
            stats.submitter
        ))
    } else {
        let signed: Vec<&String> = signed.iter().collect();
        Err(ValidationError(format!(
            "{} files from report package not signed {:?}, {:?}",
            unsigned.len(),
            unsigned,
            signed
        )))
    }
}

/// First root, in entry order, containing both marker directories.
fn package_root(names: &[String]) -> Option<String> {
    let mut roots: Vec<(String, bool, bool)> = Vec::new();
    for name in names {
        let norm = name.replace('\\', "/");
        mark_roots(&mut roots, &norm, "META-INF/", true);
        mark_roots(&mut roots, &norm, "reports/", false);
    }
    roots
        .into_iter()
        .find(|(_, meta, reports)| *meta && *reports)
        .map(|(root, _, _)| root)
}

fn mark_roots(roots: &mut Vec<(String, bool, bool)>, norm: &str, marker: &str, is_meta: bool) {
    let mut found: Vec<String> = Vec::new();
    if norm.starts_with(marker) {
        found.push(String::new());
    }
    let infix = format!("/{marker}");
    for (idx, _) in norm.match_indices(&infix) {
        found.push(norm[..idx + 1].to_string());
    }
    for root in found {
        match roots.iter_mut().find(|(r, _, _)| *r == root) {
            Some((_, meta, reports)) => {
                if is_meta {
                    *meta = true;
                } else {
                    *reports = true;
                }
            }
            None => roots.push((root, is_meta, !is_meta)),
        }
    }
}

/// Base names of the files physically present directly under the root's
/// reports directory.
fn report_files(names: &[String], root: &str) -> BTreeSet<String> {
    let prefix = format!("{root}reports/");
    names
        .iter()
        .filter_map(|name| {
            let norm = name.replace('\\', "/");
            let rest = norm.strip_prefix(&prefix)?.to_string();
            if rest.is_empty() || rest.contains('/') {
                None
            } else {
                Some(rest)
            }
        })
        .collect()
}

/// Resolve a manifest-relative path against the root's META-INF directory,
/// normalizing `.` and `..`. None when the path escapes the archive root.
fn resolve_manifest_path(root: &str, relative: &str) -> Option<String> {
    let mut segments: Vec<String> = root
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    segments.push("META-INF".to_string());
    let normalized = relative.replace('\\', "/");
    for segment in normalized.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other.to_string()),
        }
    }
    Some(segments.join("/"))
}

fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Option<Vec<u8>> {
    let mut file = archive.by_name(name).ok()?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).ok()?;
    Some(buf)
}

fn manifest_field<'a>(entry: &'a Value, key: &str) -> Result<&'a str, ValidationError> {
    entry.get(key).and_then(Value::as_str).ok_or_else(|| {
        ValidationError(format!(
            "invalid signature in manifest signature list, missing '{key}'"
        ))
    })
}
