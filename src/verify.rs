//! Index verification
//!
//! Walks a built index and checks the structural invariants that query
//! correctness depends on: contiguous lexicon byte ranges, count-exact
//! VarByte blocks, strictly increasing docIDs, positive term frequencies,
//! postings that resolve to known documents, agreement between the page
//! table and the doc-length table, and token-count conservation.
//!
//! Violations are collected, not thrown: a verification run always reports
//! everything it finds.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use tracing::info;

use crate::config::IndexPaths;
use crate::error::{PassimError, Result};
use crate::lexicon::Lexicon;
use crate::stats::DocLengths;
use crate::store::PageTable;
use crate::varbyte;

/// One failed check.
#[derive(Clone, Debug)]
pub struct Violation {
    /// Name of the check that failed.
    pub check: String,
    /// What was found.
    pub description: String,
}

impl Violation {
    fn new(check: &str, description: String) -> Self {
        Self {
            check: check.to_string(),
            description,
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.check, self.description)
    }
}

/// Outcome of a verification run.
#[derive(Clone, Debug, Default)]
pub struct VerifyReport {
    /// Terms examined.
    pub terms_checked: u64,
    /// Postings decoded.
    pub postings_checked: u64,
    /// Every violation found.
    pub violations: Vec<Violation>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Verify every structural invariant of the index under `paths`.
pub fn verify_index(paths: &IndexPaths) -> Result<VerifyReport> {
    let lexicon = Lexicon::load(&paths.lexicon())?;
    let doc_lengths = DocLengths::load(&paths.doc_lengths())?;
    let page_table = PageTable::load(&paths.page_table())?;
    let index = read_index(&paths.final_index())?;

    let mut report = VerifyReport::default();

    check_tables_agree(&doc_lengths, &page_table, &mut report);
    check_token_conservation(paths, &doc_lengths, &mut report);

    let mut tf_sum = 0u64;
    let mut covered_bytes = 0u64;
    for (term, entry) in lexicon.iter() {
        report.terms_checked += 1;
        covered_bytes += entry.docid_length + entry.freq_length;

        if entry.freq_offset != entry.docid_offset + entry.docid_length {
            report.violations.push(Violation::new(
                "contiguous_blocks",
                format!(
                    "term '{}': freq_offset {} != docid_offset {} + docid_length {}",
                    term, entry.freq_offset, entry.docid_offset, entry.docid_length
                ),
            ));
            continue;
        }

        let end = entry.freq_offset + entry.freq_length;
        if end > index.len() as u64 {
            report.violations.push(Violation::new(
                "block_in_bounds",
                format!(
                    "term '{}': blocks end at {} but the index is {} bytes",
                    term,
                    end,
                    index.len()
                ),
            ));
            continue;
        }

        let docid_block =
            &index[entry.docid_offset as usize..(entry.docid_offset + entry.docid_length) as usize];
        let freq_block =
            &index[entry.freq_offset as usize..(entry.freq_offset + entry.freq_length) as usize];

        let gaps = match varbyte::decode_list(docid_block, entry.doc_freq as usize) {
            Ok(gaps) => gaps,
            Err(e) => {
                report.violations.push(Violation::new(
                    "docid_block_decodes",
                    format!("term '{}': {}", term, e),
                ));
                continue;
            }
        };
        let freqs = match varbyte::decode_list(freq_block, entry.doc_freq as usize) {
            Ok(freqs) => freqs,
            Err(e) => {
                report.violations.push(Violation::new(
                    "freq_block_decodes",
                    format!("term '{}': {}", term, e),
                ));
                continue;
            }
        };

        report.postings_checked += entry.doc_freq;
        tf_sum += freqs.iter().map(|&f| f as u64).sum::<u64>();

        if let Some(position) = gaps.iter().position(|&g| g == 0) {
            report.violations.push(Violation::new(
                "gaps_strictly_positive",
                format!("term '{}': zero gap at posting {}", term, position),
            ));
        }
        if let Some(position) = freqs.iter().position(|&f| f == 0) {
            report.violations.push(Violation::new(
                "frequencies_positive",
                format!("term '{}': zero frequency at posting {}", term, position),
            ));
        }

        let mut doc_id = 0u32;
        for gap in &gaps {
            doc_id = doc_id.wrapping_add(*gap);
            if doc_lengths.get(doc_id).is_none() {
                report.violations.push(Violation::new(
                    "posting_doc_known",
                    format!("term '{}': posting for unknown docID {}", term, doc_id),
                ));
            }
        }
    }

    if covered_bytes != index.len() as u64 {
        report.violations.push(Violation::new(
            "index_fully_covered",
            format!(
                "lexicon covers {} bytes but the index is {} bytes",
                covered_bytes,
                index.len()
            ),
        ));
    }

    check_tf_total(tf_sum, &doc_lengths, &mut report);

    info!(
        "verified {} terms / {} postings: {} violations",
        report.terms_checked,
        report.postings_checked,
        report.violations.len()
    );

    Ok(report)
}

fn read_index(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| PassimError::open(path, e))
}

/// The page table and the doc-length table describe the same documents.
fn check_tables_agree(doc_lengths: &DocLengths, page_table: &PageTable, report: &mut VerifyReport) {
    if doc_lengths.total_docs() != page_table.len() as u64 {
        report.violations.push(Violation::new(
            "tables_agree",
            format!(
                "doc_lengths has {} documents, page_table has {}",
                doc_lengths.total_docs(),
                page_table.len()
            ),
        ));
    }
}

/// total_tokens.txt agrees with the sum over the doc-length table.
fn check_token_conservation(
    paths: &IndexPaths,
    doc_lengths: &DocLengths,
    report: &mut VerifyReport,
) {
    let recorded = std::fs::read_to_string(paths.total_tokens())
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok());
    match recorded {
        Some(total) if total == doc_lengths.total_tokens() => {}
        Some(total) => report.violations.push(Violation::new(
            "token_conservation",
            format!(
                "total_tokens.txt says {} but doc lengths sum to {}",
                total,
                doc_lengths.total_tokens()
            ),
        )),
        None => report.violations.push(Violation::new(
            "token_conservation",
            "total_tokens.txt is missing or unparseable".to_string(),
        )),
    }
}

/// The sum of all stored term frequencies equals the total token count.
fn check_tf_total(tf_sum: u64, doc_lengths: &DocLengths, report: &mut VerifyReport) {
    if tf_sum != doc_lengths.total_tokens() {
        report.violations.push(Violation::new(
            "tf_conservation",
            format!(
                "index term frequencies sum to {} but doc lengths sum to {}",
                tf_sum,
                doc_lengths.total_tokens()
            ),
        ));
    }
}

/// Distinct check names that failed, for compact reporting.
pub fn failed_checks(report: &VerifyReport) -> BTreeSet<String> {
    report
        .violations
        .iter()
        .map(|v| v.check.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::config::ParserConfig;
    use crate::{merge, parser, stats};

    fn build(input: &str, dir: &Path) -> IndexPaths {
        let paths = IndexPaths::new(dir);
        parser::parse_stream(
            Cursor::new(input.to_string()),
            &paths,
            &ParserConfig::default(),
        )
        .unwrap();
        merge::merge_index(&paths).unwrap();
        stats::compute_avgdl(&paths.doc_lengths(), &paths.avgdl()).unwrap();
        paths
    }

    #[test]
    fn test_clean_build_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let paths = build("1\tthe quick brown fox\n2\tthe lazy dog\n", dir.path());

        let report = verify_index(&paths).unwrap();
        assert!(report.is_clean(), "violations: {:?}", report.violations);
        assert_eq!(report.terms_checked, 6);
        assert_eq!(report.postings_checked, 7);
    }

    #[test]
    fn test_truncated_index_is_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let paths = build("1\talpha beta\n2\tbeta gamma\n", dir.path());

        let index = std::fs::read(paths.final_index()).unwrap();
        std::fs::write(paths.final_index(), &index[..index.len() - 2]).unwrap();

        let report = verify_index(&paths).unwrap();
        assert!(!report.is_clean());
        let checks = failed_checks(&report);
        assert!(
            checks.contains("block_in_bounds") || checks.contains("docid_block_decodes"),
            "failed checks: {:?}",
            checks
        );
    }

    #[test]
    fn test_tampered_doc_lengths_is_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let paths = build("1\talpha beta\n2\tbeta gamma\n", dir.path());

        // Drop document 2 from the table; its postings become orphans.
        std::fs::write(paths.doc_lengths(), "1\t2\n").unwrap();

        let report = verify_index(&paths).unwrap();
        let checks = failed_checks(&report);
        assert!(checks.contains("posting_doc_known"), "failed checks: {:?}", checks);
        assert!(checks.contains("tables_agree"));
        assert!(checks.contains("token_conservation"));
    }

    #[test]
    fn test_trailing_garbage_in_index_is_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let paths = build("1\talpha\n", dir.path());

        let mut index = std::fs::read(paths.final_index()).unwrap();
        index.extend_from_slice(&[0x01, 0x02]);
        std::fs::write(paths.final_index(), &index).unwrap();

        let report = verify_index(&paths).unwrap();
        let checks = failed_checks(&report);
        assert!(checks.contains("index_fully_covered"), "failed checks: {:?}", checks);
    }
}
