//! Passage store and page table
//!
//! The store is a headerless concatenation of `[u32 LE length][raw bytes]`
//! records, one per document in ingest order. The page table maps each docID
//! to the absolute offset of its record and the byte length of the passage,
//! so retrieval is a single seek plus a validated prefix read.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use thiserror::Error;
use tracing::warn;

use crate::error::{PassimError, Result};

/// Location of one passage inside the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageTableEntry {
    /// Absolute offset of the record (its length prefix) in passages.bin.
    pub offset: u64,
    /// Passage length in bytes as recorded at ingest time.
    pub length: u64,
}

/// Append-side handle for passages.bin. Tracks the running offset so the
/// parser can record page-table entries without calling seek.
pub struct PassageStoreWriter {
    writer: BufWriter<File>,
    offset: u64,
}

impl PassageStoreWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|e| PassimError::open(path, e))?;
        Ok(Self {
            writer: BufWriter::new(file),
            offset: 0,
        })
    }

    /// Append one passage record and return its page-table entry.
    pub fn append(&mut self, passage: &[u8]) -> Result<PageTableEntry> {
        let entry = PageTableEntry {
            offset: self.offset,
            length: passage.len() as u64,
        };

        let len = passage.len() as u32;
        self.writer.write_all(&len.to_le_bytes())?;
        self.writer.write_all(passage)?;
        self.offset += 4 + passage.len() as u64;

        Ok(entry)
    }

    pub fn finish(mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Failure of one passage read, tagged with the stage that failed so the
/// caller can report which step broke.
#[derive(Debug, Error)]
pub enum PassageReadError {
    #[error("seek to offset {offset} failed: {source}")]
    Seek { offset: u64, source: io::Error },

    #[error("length prefix read failed: {source}")]
    LengthPrefix { source: io::Error },

    #[error("length prefix {found} outside (0, {expected}]")]
    InvalidLength { found: u64, expected: u64 },

    #[error("payload read failed: {source}")]
    Content { source: io::Error },
}

/// Read-side handle for passages.bin, owned for the session lifetime.
#[derive(Debug)]
pub struct PassageStoreReader {
    file: File,
}

impl PassageStoreReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| PassimError::open(path, e))?;
        Ok(Self { file })
    }

    /// Retrieve the passage bytes for a page-table entry.
    ///
    /// Reads the u32 length prefix at `entry.offset` and validates
    /// `0 < prefix <= entry.length` before reading the payload. Each stage
    /// fails with its own [`PassageReadError`] variant.
    pub fn read(
        &mut self,
        entry: PageTableEntry,
    ) -> std::result::Result<Vec<u8>, PassageReadError> {
        self.file
            .seek(SeekFrom::Start(entry.offset))
            .map_err(|source| PassageReadError::Seek {
                offset: entry.offset,
                source,
            })?;

        let mut len_buf = [0u8; 4];
        self.file
            .read_exact(&mut len_buf)
            .map_err(|source| PassageReadError::LengthPrefix { source })?;
        let len_prefix = u32::from_le_bytes(len_buf) as u64;

        if len_prefix == 0 || len_prefix > entry.length {
            return Err(PassageReadError::InvalidLength {
                found: len_prefix,
                expected: entry.length,
            });
        }

        let mut passage = vec![0u8; len_prefix as usize];
        self.file
            .read_exact(&mut passage)
            .map_err(|source| PassageReadError::Content { source })?;
        Ok(passage)
    }
}

/// Streaming writer for page_table.txt.
pub struct PageTableWriter {
    writer: BufWriter<File>,
}

impl PageTableWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|e| PassimError::open(path, e))?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    pub fn write_entry(&mut self, doc_id: u32, entry: PageTableEntry) -> Result<()> {
        writeln!(self.writer, "{}\t{}\t{}", doc_id, entry.offset, entry.length)?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// In-memory page table, fully loaded at query-processor startup.
#[derive(Debug, Default)]
pub struct PageTable {
    docs: HashMap<u32, PageTableEntry>,
}

impl PageTable {
    /// Load page_table.txt. Malformed lines are warned and skipped.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| PassimError::open(path, e))?;
        let reader = BufReader::new(file);

        let mut docs = HashMap::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match Self::parse_line(&line) {
                Ok((doc_id, entry)) => {
                    docs.insert(doc_id, entry);
                }
                Err(e) => warn!("skipping page table line: {}", e),
            }
        }

        Ok(Self { docs })
    }

    fn parse_line(line: &str) -> Result<(u32, PageTableEntry)> {
        let mut fields = line.split_whitespace();
        let doc_id = fields
            .next()
            .and_then(|f| f.parse::<u32>().ok())
            .ok_or_else(|| PassimError::RecordParse(format!("bad docID in page table: {}", line)))?;
        let offset = fields
            .next()
            .and_then(|f| f.parse::<u64>().ok())
            .ok_or_else(|| PassimError::RecordParse(format!("bad offset in page table: {}", line)))?;
        let length = fields
            .next()
            .and_then(|f| f.parse::<u64>().ok())
            .ok_or_else(|| PassimError::RecordParse(format!("bad length in page table: {}", line)))?;

        Ok((doc_id, PageTableEntry { offset, length }))
    }

    pub fn get(&self, doc_id: u32) -> Option<PageTableEntry> {
        self.docs.get(&doc_id).copied()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}
