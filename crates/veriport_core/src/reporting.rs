#![forbid(unsafe_code)]

use std::io::Read;

use sha2::{Digest, Sha256};
use veriport_contracts::{Aid, Dig, ReportStats, ReportStatus};
use veriport_storage::{ChunkIter, StorageError, VerifierDb, CHUNK_SIZE};

#[derive(Debug)]
pub enum IngestError {
    Io(std::io::Error),
    Storage(StorageError),
}

impl From<std::io::Error> for IngestError {
    fn from(e: std::io::Error) -> Self {
        IngestError::Io(e)
    }
}

impl From<StorageError> for IngestError {
    fn from(e: StorageError) -> Self {
        IngestError::Storage(e)
    }
}

/// Accept a new report upload: clear any prior chunk range for the digest,
/// stream the body into fixed-size chunks, then commit the accepted stats
/// record together with its index entries.
///
/// The caller must have already confirmed the submitter's authorization;
/// ingestion performs no authorization check of its own.
pub fn create<R: Read>(
    db: &mut VerifierDb,
    submitter: &Aid,
    dig: &Dig,
    filename: &str,
    content_type: &str,
    stream: &mut R,
) -> Result<ReportStats, IngestError> {
    db.chunks_clear(dig);

    let mut stats = ReportStats::accepted(
        submitter.clone(),
        filename.to_string(),
        content_type.to_string(),
    );

    let mut index: u32 = 0;
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let filled = fill_chunk(stream, &mut buf)?;
        if filled == 0 {
            break;
        }
        db.chunk_put(dig, index, &buf[..filled]);
        stats.size += filled as u64;
        index = index.saturating_add(1);
    }

    db.report_accept_commit(dig, &stats)?;
    Ok(stats)
}

/// Read until the buffer is full or the stream is exhausted, so stored
/// chunks are full-sized except possibly the last.
fn fill_chunk<R: Read>(stream: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = stream.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

pub fn get(db: &VerifierDb, dig: &Dig) -> Result<Option<ReportStats>, StorageError> {
    db.report_stats(dig)
}

/// Restartable chunk sequence for a stored report, from index zero until
/// the first missing index.
pub fn data_chunks<'a>(db: &'a VerifierDb, dig: &'a Dig) -> ChunkIter<'a> {
    db.chunks(dig)
}

/// Snapshot of the digests currently awaiting verification.
pub fn accepted_digs(db: &VerifierDb) -> Result<Vec<Dig>, StorageError> {
    db.status_digs(ReportStatus::Accepted)
}

pub fn update(
    db: &mut VerifierDb,
    dig: &Dig,
    status: ReportStatus,
    message: Option<&str>,
) -> Result<bool, StorageError> {
    db.report_status_commit(dig, status, message)
}

/// Content digest for report bytes, usable as an upload digest.
pub fn content_dig(bytes: &[u8]) -> Dig {
    let digest = Sha256::digest(bytes);
    let mut text = String::with_capacity(1 + digest.len() * 2);
    text.push('D');
    for byte in digest {
        text.push_str(&format!("{:02x}", byte));
    }
    Dig::new(text).expect("hex digest is always a valid dig")
}
