#![forbid(unsafe_code)]

pub mod vdb;

pub use vdb::{ChunkIter, StorageError, VerifierDb, CHUNK_SIZE};
