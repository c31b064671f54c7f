//! Streaming parser / partitioner
//!
//! Ingests a `docID\tpassage` TSV stream with bounded memory. Each accepted
//! document feeds four outputs at once: the passage store, the page table,
//! the doc-lengths table, and an in-memory term -> postings map that is
//! flushed to a term-sorted partition file whenever the flush threshold is
//! reached. Partitions are merged into the final index by `merge`.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use tracing::{info, warn};

use crate::config::{IndexPaths, ParserConfig};
use crate::error::{PassimError, Result};
use crate::store::{PageTableWriter, PassageStoreWriter};
use crate::tokenizer;

/// Counters produced by a parse run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ParseStats {
    /// Documents accepted and written to every table.
    pub docs_indexed: u64,
    /// Input lines skipped as malformed.
    pub lines_skipped: u64,
    /// Tokens across all accepted documents.
    pub total_tokens: u64,
    /// Partition files written.
    pub partitions: usize,
}

/// Parse a TSV file into partition files plus the passage store, page table,
/// doc-lengths table, and total-token count under `paths`.
pub fn parse_file(input: &Path, paths: &IndexPaths, config: &ParserConfig) -> Result<ParseStats> {
    let file = File::open(input).map_err(|e| PassimError::open(input, e))?;
    parse_stream(BufReader::new(file), paths, config)
}

/// Parse an already-open TSV stream. See [`parse_file`].
pub fn parse_stream(
    input: impl BufRead,
    paths: &IndexPaths,
    config: &ParserConfig,
) -> Result<ParseStats> {
    std::fs::create_dir_all(paths.as_dir())
        .map_err(|e| PassimError::open(paths.as_dir(), e))?;

    let mut partitioner = Partitioner::create(paths, config)?;

    for (line_no, line) in input.lines().enumerate() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        partitioner.process_line(&line, line_no as u64 + 1)?;
    }

    partitioner.finish()
}

struct Partitioner<'a> {
    paths: &'a IndexPaths,
    flush_threshold_bytes: u64,

    /// Term -> (docID, tf) pairs accumulated since the last flush. Postings
    /// stay in append order; the merger sorts after concatenation.
    postings: HashMap<String, Vec<(u32, u32)>>,
    bytes_since_flush: u64,
    partition_count: usize,

    passages: PassageStoreWriter,
    page_table: PageTableWriter,
    doc_lengths: BufWriter<File>,

    stats: ParseStats,
}

impl<'a> Partitioner<'a> {
    fn create(paths: &'a IndexPaths, config: &ParserConfig) -> Result<Self> {
        let passages = PassageStoreWriter::create(&paths.passages())?;
        let page_table = PageTableWriter::create(&paths.page_table())?;
        let doc_lengths_file = File::create(paths.doc_lengths())
            .map_err(|e| PassimError::open(paths.doc_lengths(), e))?;

        Ok(Self {
            paths,
            flush_threshold_bytes: config.flush_threshold_bytes,
            postings: HashMap::new(),
            bytes_since_flush: 0,
            partition_count: 0,
            passages,
            page_table,
            doc_lengths: BufWriter::new(doc_lengths_file),
            stats: ParseStats::default(),
        })
    }

    fn process_line(&mut self, line: &str, line_no: u64) -> Result<()> {
        let Some((doc_id_text, passage)) = line.split_once('\t') else {
            warn!("line {}: no tab separator, skipping", line_no);
            self.stats.lines_skipped += 1;
            return Ok(());
        };

        let doc_id: u32 = match doc_id_text.parse() {
            Ok(id) => id,
            Err(_) => {
                warn!("line {}: unparseable docID {:?}, skipping", line_no, doc_id_text);
                self.stats.lines_skipped += 1;
                return Ok(());
            }
        };

        let tokens = tokenizer::tokenize(passage);
        self.stats.total_tokens += tokens.len() as u64;

        writeln!(self.doc_lengths, "{}\t{}", doc_id, tokens.len())?;

        let entry = self.passages.append(passage.as_bytes())?;
        self.page_table.write_entry(doc_id, entry)?;

        let mut term_freq: HashMap<&str, u32> = HashMap::new();
        for token in &tokens {
            *term_freq.entry(token.as_str()).or_insert(0) += 1;
        }
        for (term, freq) in term_freq {
            self.postings
                .entry(term.to_string())
                .or_default()
                .push((doc_id, freq));
        }

        self.stats.docs_indexed += 1;

        self.bytes_since_flush += line.len() as u64;
        if self.bytes_since_flush >= self.flush_threshold_bytes {
            self.flush_partition()?;
        }

        Ok(())
    }

    /// Write the accumulated map as one term-sorted partition file and clear
    /// it. Record format: `term\td1\tf1\td2\tf2...`.
    fn flush_partition(&mut self) -> Result<()> {
        if self.postings.is_empty() {
            return Ok(());
        }

        self.partition_count += 1;
        let path = self.paths.partition(self.partition_count);
        let file = File::create(&path).map_err(|e| PassimError::open(&path, e))?;
        let mut writer = BufWriter::new(file);

        let mut terms: Vec<&String> = self.postings.keys().collect();
        terms.sort_unstable();

        for term in terms {
            write!(writer, "{}", term)?;
            for &(doc_id, freq) in &self.postings[term] {
                write!(writer, "\t{}\t{}", doc_id, freq)?;
            }
            writeln!(writer)?;
        }
        writer.flush()?;

        info!(
            "wrote partition {} ({} terms)",
            path.display(),
            self.postings.len()
        );

        self.postings.clear();
        self.bytes_since_flush = 0;
        self.stats.partitions = self.partition_count;
        Ok(())
    }

    fn finish(mut self) -> Result<ParseStats> {
        self.flush_partition()?;

        self.passages.finish()?;
        self.page_table.finish()?;
        self.doc_lengths.flush()?;

        let total_tokens_path = self.paths.total_tokens();
        let file = File::create(&total_tokens_path)
            .map_err(|e| PassimError::open(&total_tokens_path, e))?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{}", self.stats.total_tokens)?;
        writer.flush()?;

        info!(
            "parsed {} docs ({} tokens) into {} partitions, {} lines skipped",
            self.stats.docs_indexed,
            self.stats.total_tokens,
            self.stats.partitions,
            self.stats.lines_skipped
        );

        Ok(self.stats)
    }
}
