//! Batch query evaluation with TREC run output
//!
//! Reads a `qid\ttext` TSV (one header line skipped), evaluates every query
//! disjunctively, and emits standard TREC run lines:
//! `qid Q0 docID rank score BM25`, score formatted to 6 decimals.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use tracing::{info, warn};

use crate::error::{PassimError, Result};

use super::{QueryIndex, QueryMode, RankedDoc};

/// Name stamped into the last TREC field.
pub const RUN_NAME: &str = "BM25";

/// One query from a batch file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchQuery {
    pub qid: String,
    pub text: String,
}

/// Read queries.tsv. The first line is a header and is skipped; lines
/// without a tab are warned and skipped.
pub fn read_queries(path: &Path) -> Result<Vec<BatchQuery>> {
    let file = File::open(path).map_err(|e| PassimError::open(path, e))?;
    let reader = BufReader::new(file);

    let mut queries = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line_no == 0 || line.trim().is_empty() {
            continue;
        }
        match line.split_once('\t') {
            Some((qid, text)) => queries.push(BatchQuery {
                qid: qid.to_string(),
                text: text.to_string(),
            }),
            None => warn!("queries line {}: no tab separator, skipping", line_no + 1),
        }
    }

    Ok(queries)
}

/// Render one result as a TREC run line. Ranks start at 1.
pub fn trec_line(qid: &str, doc: &RankedDoc, rank: usize) -> String {
    format!(
        "{} Q0 {} {} {:.6} {}",
        qid, doc.doc_id, rank, doc.score, RUN_NAME
    )
}

/// Evaluate every query in `queries_path` against `index` and write TREC
/// run lines to `output_path`. Returns the number of queries processed.
pub fn run_batch(
    index: &mut QueryIndex,
    queries_path: &Path,
    output_path: &Path,
    k: usize,
) -> Result<usize> {
    let queries = read_queries(queries_path)?;
    info!("loaded {} queries from {}", queries.len(), queries_path.display());

    let out_file = File::create(output_path).map_err(|e| PassimError::open(output_path, e))?;
    let mut out = BufWriter::new(out_file);

    for query in &queries {
        let ranked = index.evaluate(&query.text, QueryMode::Disjunctive, k);
        for (i, doc) in ranked.iter().enumerate() {
            writeln!(out, "{}", trec_line(&query.qid, doc, i + 1))?;
        }
    }
    out.flush()?;

    info!("batch run complete: {} queries", queries.len());
    Ok(queries.len())
}
