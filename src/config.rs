use std::path::{Path, PathBuf};

/// Default flush threshold for the parser: 1 GiB of summed input-line bytes.
pub const DEFAULT_FLUSH_THRESHOLD_BYTES: u64 = 1024 * 1024 * 1024;

/// Default number of results for an interactive query.
pub const DEFAULT_TOP_K: usize = 10;

/// Default number of results per query in batch (TREC) mode.
pub const DEFAULT_BATCH_TOP_K: usize = 1000;

/// Locations of every artifact produced and consumed by the pipeline,
/// derived from a single index directory.
#[derive(Clone, Debug)]
pub struct IndexPaths {
    pub dir: PathBuf,
}

impl IndexPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn passages(&self) -> PathBuf {
        self.dir.join("passages.bin")
    }

    pub fn page_table(&self) -> PathBuf {
        self.dir.join("page_table.txt")
    }

    pub fn doc_lengths(&self) -> PathBuf {
        self.dir.join("doc_lengths.txt")
    }

    pub fn total_tokens(&self) -> PathBuf {
        self.dir.join("total_tokens.txt")
    }

    /// Partition files are numbered from 1 in flush order.
    pub fn partition(&self, k: usize) -> PathBuf {
        self.dir.join(format!("intermediate_{}.txt", k))
    }

    pub fn final_index(&self) -> PathBuf {
        self.dir.join("final_index.bin")
    }

    pub fn lexicon(&self) -> PathBuf {
        self.dir.join("lexicon.txt")
    }

    pub fn avgdl(&self) -> PathBuf {
        self.dir.join("avgdl.txt")
    }

    pub fn manifest(&self) -> PathBuf {
        self.dir.join("manifest.json")
    }

    pub fn as_dir(&self) -> &Path {
        &self.dir
    }
}

/// Configuration for the parser / partitioner.
#[derive(Clone, Debug)]
pub struct ParserConfig {
    /// Flush the in-memory postings map once this many input-line bytes have
    /// been processed since the last flush. A byte count over the source
    /// stream is a proxy for map size; the knob exists so a memory-based
    /// policy can be substituted without touching the parser.
    pub flush_threshold_bytes: u64,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            flush_threshold_bytes: DEFAULT_FLUSH_THRESHOLD_BYTES,
        }
    }
}

impl ParserConfig {
    pub fn with_flush_threshold(mut self, bytes: u64) -> Self {
        self.flush_threshold_bytes = bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_derive_from_dir() {
        let paths = IndexPaths::new("/tmp/idx");
        assert_eq!(paths.passages(), PathBuf::from("/tmp/idx/passages.bin"));
        assert_eq!(paths.partition(3), PathBuf::from("/tmp/idx/intermediate_3.txt"));
        assert_eq!(paths.lexicon(), PathBuf::from("/tmp/idx/lexicon.txt"));
    }

    #[test]
    fn test_default_parser_config() {
        let config = ParserConfig::default();
        assert_eq!(config.flush_threshold_bytes, 1024 * 1024 * 1024);

        let small = ParserConfig::default().with_flush_threshold(64);
        assert_eq!(small.flush_threshold_bytes, 64);
    }
}
