//! Lexicon: term -> byte range of that term's postings in the final index
//!
//! Text format, one line per term in index order:
//! `term docid_offset docid_length freq_offset freq_length doc_freq`.
//! Offsets are absolute into final_index.bin; doc_freq is the posting count
//! and drives count-bounded VarByte decoding on the query side.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::warn;

use crate::error::{PassimError, Result};

/// Byte ranges and document frequency for one term's postings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LexiconEntry {
    /// Offset of the gap-coded docID block in final_index.bin.
    pub docid_offset: u64,
    /// Byte length of the docID block.
    pub docid_length: u64,
    /// Offset of the tf block; always docid_offset + docid_length.
    pub freq_offset: u64,
    /// Byte length of the tf block.
    pub freq_length: u64,
    /// Number of postings (documents containing the term).
    pub doc_freq: u64,
}

impl LexiconEntry {
    /// Render the 6-field lexicon line for this entry.
    pub fn to_line(&self, term: &str) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}",
            term,
            self.docid_offset,
            self.docid_length,
            self.freq_offset,
            self.freq_length,
            self.doc_freq
        )
    }

    /// Parse a lexicon line. Fields may be tab- or space-separated.
    pub fn parse_line(line: &str) -> Result<(String, LexiconEntry)> {
        let mut fields = line.split_whitespace();
        let term = fields
            .next()
            .ok_or_else(|| PassimError::RecordParse("empty lexicon line".to_string()))?
            .to_string();

        let mut next_u64 = |name: &str| -> Result<u64> {
            fields
                .next()
                .ok_or_else(|| {
                    PassimError::RecordParse(format!("lexicon line missing {}: {}", name, line))
                })?
                .parse::<u64>()
                .map_err(|_| {
                    PassimError::RecordParse(format!("non-integer {} in lexicon line: {}", name, line))
                })
        };

        let entry = LexiconEntry {
            docid_offset: next_u64("docid_offset")?,
            docid_length: next_u64("docid_length")?,
            freq_offset: next_u64("freq_offset")?,
            freq_length: next_u64("freq_length")?,
            doc_freq: next_u64("doc_freq")?,
        };

        Ok((term, entry))
    }
}

/// In-memory lexicon, fully loaded at query-processor startup.
#[derive(Debug, Default)]
pub struct Lexicon {
    terms: HashMap<String, LexiconEntry>,
}

impl Lexicon {
    /// Load a lexicon file. Malformed lines are warned and skipped.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| PassimError::open(path, e))?;
        let reader = BufReader::new(file);

        let mut terms = HashMap::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match LexiconEntry::parse_line(&line) {
                Ok((term, entry)) => {
                    terms.insert(term, entry);
                }
                Err(e) => warn!("skipping lexicon line: {}", e),
            }
        }

        Ok(Self { terms })
    }

    pub fn get(&self, term: &str) -> Option<&LexiconEntry> {
        self.terms.get(term)
    }

    pub fn contains(&self, term: &str) -> bool {
        self.terms.contains_key(term)
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &LexiconEntry)> {
        self.terms.iter()
    }
}
