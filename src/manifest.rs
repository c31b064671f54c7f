//! Index manifest
//!
//! Written by the merger as a build receipt: term and posting counts plus
//! the size of the compressed index. Nothing on the query path reads it; it
//! exists for operators and the inspection tooling.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PassimError, Result};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexManifest {
    /// Manifest format version (for future upgrades).
    pub version: u32,
    /// Number of terms in the lexicon.
    pub term_count: u64,
    /// Total postings across all terms.
    pub posting_count: u64,
    /// Size of final_index.bin in bytes.
    pub index_bytes: u64,
    /// Unix timestamp of the build.
    pub built_unix_secs: u64,
}

impl IndexManifest {
    /// Current manifest format version.
    pub const VERSION: u32 = 1;

    pub fn new(term_count: u64, posting_count: u64, index_bytes: u64) -> Self {
        Self {
            version: Self::VERSION,
            term_count,
            posting_count,
            index_bytes,
            built_unix_secs: current_timestamp(),
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|e| PassimError::open(path, e))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .map_err(|e| PassimError::RecordParse(format!("manifest serialization: {}", e)))?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| PassimError::open(path, e))?;
        serde_json::from_reader(BufReader::new(file))
            .map_err(|e| PassimError::RecordParse(format!("manifest parse: {}", e)))
    }
}

fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
