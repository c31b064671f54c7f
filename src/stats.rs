//! Collection statistics: per-document token counts and average length
//!
//! The document count is always derived from the doc-lengths table itself,
//! never configured, so avgdl and BM25's N cannot drift apart.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use tracing::warn;

use crate::error::{PassimError, Result};

/// In-memory docID -> token count table.
#[derive(Debug, Default)]
pub struct DocLengths {
    lengths: HashMap<u32, u32>,
    total_tokens: u64,
}

impl DocLengths {
    /// Load doc_lengths.txt. Malformed lines are warned and skipped.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| PassimError::open(path, e))?;
        let reader = BufReader::new(file);

        let mut lengths = HashMap::new();
        let mut total_tokens = 0u64;
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let mut fields = line.split_whitespace();
            let parsed = fields
                .next()
                .and_then(|f| f.parse::<u32>().ok())
                .zip(fields.next().and_then(|f| f.parse::<u32>().ok()));
            match parsed {
                Some((doc_id, len)) => {
                    lengths.insert(doc_id, len);
                    total_tokens += len as u64;
                }
                None => warn!("skipping doc length line: {}", line),
            }
        }

        Ok(Self {
            lengths,
            total_tokens,
        })
    }

    pub fn get(&self, doc_id: u32) -> Option<u32> {
        self.lengths.get(&doc_id).copied()
    }

    /// Total number of documents in the collection (BM25's N).
    pub fn total_docs(&self) -> u64 {
        self.lengths.len() as u64
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }

    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    /// Mean document length over the collection.
    pub fn avgdl(&self) -> Result<f64> {
        if self.lengths.is_empty() {
            return Err(PassimError::Precondition(
                "cannot compute avgdl: total_docs == 0".to_string(),
            ));
        }
        Ok(self.total_tokens as f64 / self.lengths.len() as f64)
    }
}

/// Compute avgdl from a doc-lengths file and write it to `out_path` as a
/// single line. Returns the computed value.
pub fn compute_avgdl(doc_lengths_path: &Path, out_path: &Path) -> Result<f64> {
    let lengths = DocLengths::load(doc_lengths_path)?;
    let avgdl = lengths.avgdl()?;

    let file = File::create(out_path).map_err(|e| PassimError::open(out_path, e))?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "{}", avgdl)?;
    writer.flush()?;

    Ok(avgdl)
}

/// Read avgdl.txt, validating the value is finite and positive.
pub fn read_avgdl(path: &Path) -> Result<f64> {
    let file = File::open(path).map_err(|e| PassimError::open(path, e))?;
    let mut reader = BufReader::new(file);
    let mut line = String::new();
    reader.read_line(&mut line)?;

    let avgdl: f64 = line
        .trim()
        .parse()
        .map_err(|_| PassimError::RecordParse(format!("bad avgdl value: {}", line.trim())))?;

    if !avgdl.is_finite() || avgdl <= 0.0 {
        return Err(PassimError::Precondition(format!(
            "avgdl must be positive, got {}",
            avgdl
        )));
    }

    Ok(avgdl)
}
