//! Query execution against an opened index
//!
//! `QueryIndex` owns the in-memory tables (lexicon, page table, doc lengths)
//! and the seekable handles on the index and passage files for the session
//! lifetime. `evaluate` is the pure core: query text and mode in, ranked
//! list out. Per-term failures demote the term to absent; they never fail
//! the query or the session.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use tracing::{info, warn};

use crate::config::IndexPaths;
use crate::error::{PassimError, Result};
use crate::lexicon::Lexicon;
use crate::scoring::{bm25_term_score, Bm25Params};
use crate::stats::{read_avgdl, DocLengths};
use crate::store::{PageTable, PassageReadError, PassageStoreReader};
use crate::tokenizer;
use crate::varbyte;

use super::{QueryMode, RankedDoc};

/// Decoded postings for one query term, with a DAAT cursor.
struct TermPostings {
    doc_ids: Vec<u32>,
    freqs: Vec<u32>,
    doc_freq: u64,
    cursor: usize,
}

/// An opened, immutable index ready to answer queries.
#[derive(Debug)]
pub struct QueryIndex {
    lexicon: Lexicon,
    page_table: PageTable,
    doc_lengths: DocLengths,
    avgdl: f64,
    params: Bm25Params,
    index: File,
    passages: PassageStoreReader,
}

impl QueryIndex {
    /// Load the tables and open the byte stores under `paths`.
    ///
    /// Fails with a precondition error if the collection is empty or avgdl
    /// is not positive; a query session cannot score against either.
    pub fn open(paths: &IndexPaths) -> Result<Self> {
        let lexicon = Lexicon::load(&paths.lexicon())?;
        let page_table = PageTable::load(&paths.page_table())?;
        let doc_lengths = DocLengths::load(&paths.doc_lengths())?;
        let avgdl = read_avgdl(&paths.avgdl())?;

        if doc_lengths.is_empty() {
            return Err(PassimError::Precondition(
                "cannot open index: total_docs == 0".to_string(),
            ));
        }

        let index_path = paths.final_index();
        let index = File::open(&index_path).map_err(|e| PassimError::open(&index_path, e))?;
        let passages = PassageStoreReader::open(&paths.passages())?;

        info!(
            "index opened: {} terms, {} documents, avgdl {:.2}",
            lexicon.len(),
            doc_lengths.total_docs(),
            avgdl
        );

        Ok(Self {
            lexicon,
            page_table,
            doc_lengths,
            avgdl,
            params: Bm25Params::default(),
            index,
            passages,
        })
    }

    pub fn total_docs(&self) -> u64 {
        self.doc_lengths.total_docs()
    }

    pub fn term_count(&self) -> usize {
        self.lexicon.len()
    }

    pub fn avgdl(&self) -> f64 {
        self.avgdl
    }

    /// Evaluate a query and return the top `k` documents, ranked by BM25
    /// score descending with ties broken by ascending docID.
    pub fn evaluate(&mut self, query: &str, mode: QueryMode, k: usize) -> Vec<RankedDoc> {
        // The tokenizer already lowercases, so re-tokenizing a query is
        // idempotent. Duplicate terms are evaluated once.
        let terms = unique_terms(query);
        if terms.is_empty() {
            return Vec::new();
        }

        let mut lists: Vec<TermPostings> = Vec::new();
        for term in &terms {
            match self.fetch_postings(term) {
                Ok(Some(postings)) => lists.push(postings),
                Ok(None) => warn!("term '{}' not found in lexicon", term),
                Err(e) => warn!("term '{}' skipped: {}", term, e),
            }
        }

        if lists.is_empty() {
            return Vec::new();
        }

        // Candidates are the ascending union of every retained term's
        // docIDs; each list is already sorted.
        let mut candidates = BTreeSet::new();
        for list in &lists {
            candidates.extend(list.doc_ids.iter().copied());
        }

        let total_docs = self.doc_lengths.total_docs();
        let required = lists.len();
        let mut scored: Vec<RankedDoc> = Vec::new();

        for doc_id in candidates {
            let mut score = 0.0;
            let mut hits = 0;

            for list in &mut lists {
                while list.cursor < list.doc_ids.len() && list.doc_ids[list.cursor] < doc_id {
                    list.cursor += 1;
                }
                if list.cursor >= list.doc_ids.len() || list.doc_ids[list.cursor] != doc_id {
                    continue;
                }

                hits += 1;
                let tf = list.freqs[list.cursor];
                let Some(doc_len) = self.doc_lengths.get(doc_id) else {
                    warn!("no document length for docID {}", doc_id);
                    continue;
                };
                score += bm25_term_score(
                    tf,
                    list.doc_freq,
                    total_docs,
                    doc_len,
                    self.avgdl,
                    &self.params,
                );
            }

            let accept = match mode {
                QueryMode::Conjunctive => hits == required,
                QueryMode::Disjunctive => hits > 0,
            };
            if accept {
                scored.push(RankedDoc { doc_id, score });
            }
        }

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });
        scored.truncate(k);
        scored
    }

    /// Seek-and-decode the postings for one term. `Ok(None)` means the term
    /// is not in the lexicon.
    fn fetch_postings(&mut self, term: &str) -> Result<Option<TermPostings>> {
        let Some(entry) = self.lexicon.get(term).copied() else {
            return Ok(None);
        };

        let encoded_docids = self.read_block(entry.docid_offset, entry.docid_length)?;
        let encoded_freqs = self.read_block(entry.freq_offset, entry.freq_length)?;

        let gaps = varbyte::decode_list(&encoded_docids, entry.doc_freq as usize)?;
        let freqs = varbyte::decode_list(&encoded_freqs, entry.doc_freq as usize)?;

        if gaps.len() != freqs.len() {
            return Err(PassimError::Consistency(format!(
                "docID/frequency count mismatch for term '{}'",
                term
            )));
        }

        // Prefix-sum the gaps back into absolute docIDs.
        let mut doc_ids = Vec::with_capacity(gaps.len());
        let mut prev = 0u32;
        for gap in gaps {
            prev += gap;
            doc_ids.push(prev);
        }

        Ok(Some(TermPostings {
            doc_ids,
            freqs,
            doc_freq: entry.doc_freq,
            cursor: 0,
        }))
    }

    fn read_block(&mut self, offset: u64, length: u64) -> Result<Vec<u8>> {
        self.index.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; length as usize];
        self.index.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Decoded (docID, tf) postings for one term, for index inspection.
    pub fn postings(&mut self, term: &str) -> Result<Option<Vec<(u32, u32)>>> {
        Ok(self
            .fetch_postings(term)?
            .map(|p| p.doc_ids.into_iter().zip(p.freqs).collect()))
    }

    /// Retrieve the passage text for a ranked document. Failures yield a
    /// marker string naming the retrieval step that broke; they never abort
    /// the query.
    pub fn passage(&mut self, doc_id: u32) -> String {
        let Some(entry) = self.page_table.get(doc_id) else {
            return "[Not Found]".to_string();
        };

        match self.passages.read(entry) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                warn!("docID {}: {}", doc_id, e);
                let marker = match e {
                    PassageReadError::Seek { .. } => "[Seek Failed]",
                    PassageReadError::LengthPrefix { .. } => "[Read Failed]",
                    PassageReadError::InvalidLength { .. } => "[Invalid Length]",
                    PassageReadError::Content { .. } => "[Content Read Failed]",
                };
                marker.to_string()
            }
        }
    }
}

/// Tokenize a query and drop repeated terms, keeping first occurrences.
fn unique_terms(query: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    tokenizer::tokenize(query)
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::config::ParserConfig;
    use crate::{merge, parser, stats};

    /// Build a complete index from TSV text under a temp dir.
    fn build_index(input: &str, dir: &std::path::Path) -> IndexPaths {
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

    fn two_doc_index(dir: &std::path::Path) -> QueryIndex {
        let paths = build_index("1\tthe quick brown fox\n2\tthe lazy dog\n", dir);
        QueryIndex::open(&paths).unwrap()
    }

    #[test]
    fn test_disjunctive_ranks_both_term_doc_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = two_doc_index(dir.path());

        let results = index.evaluate("the fox", QueryMode::Disjunctive, 10);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].doc_id, 1);
        assert_eq!(results[1].doc_id, 2);
        assert!(results[0].score > results[1].score);
    }

    #[test]
    fn test_conjunctive_requires_all_terms() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = two_doc_index(dir.path());

        let results = index.evaluate("the fox", QueryMode::Conjunctive, 10);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].doc_id, 1);
    }

    #[test]
    fn test_conjunctive_is_subset_of_disjunctive() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = two_doc_index(dir.path());

        for query in ["the", "the fox", "quick lazy", "fox dog the"] {
            let conj: BTreeSet<u32> = index
                .evaluate(query, QueryMode::Conjunctive, 100)
                .iter()
                .map(|r| r.doc_id)
                .collect();
            let disj: BTreeSet<u32> = index
                .evaluate(query, QueryMode::Disjunctive, 100)
                .iter()
                .map(|r| r.doc_id)
                .collect();
            assert!(conj.is_subset(&disj), "query {:?}", query);
        }
    }

    #[test]
    fn test_empty_query_and_unknown_terms() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = two_doc_index(dir.path());

        assert!(index.evaluate("", QueryMode::Disjunctive, 10).is_empty());
        assert!(index.evaluate("...", QueryMode::Disjunctive, 10).is_empty());
        assert!(index
            .evaluate("unicorn zeppelin", QueryMode::Disjunctive, 10)
            .is_empty());
    }

    #[test]
    fn test_unknown_terms_do_not_block_conjunctive_match() {
        // "unicorn" is absent from the lexicon; conjunctive semantics apply
        // to the terms that resolved.
        let dir = tempfile::tempdir().unwrap();
        let mut index = two_doc_index(dir.path());

        let results = index.evaluate("fox unicorn", QueryMode::Conjunctive, 10);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].doc_id, 1);
    }

    #[test]
    fn test_duplicate_query_terms_score_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = two_doc_index(dir.path());

        let once = index.evaluate("fox", QueryMode::Disjunctive, 10);
        let twice = index.evaluate("fox fox fox", QueryMode::Disjunctive, 10);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_top_k_truncation_and_tie_break() {
        let dir = tempfile::tempdir().unwrap();
        let input: String = (1..=20).map(|i| format!("{}\tcommon word\n", i)).collect();
        let paths = build_index(&input, dir.path());
        let mut index = QueryIndex::open(&paths).unwrap();

        let results = index.evaluate("common", QueryMode::Disjunctive, 5);
        assert_eq!(results.len(), 5);
        // Equal scores: ties resolve by ascending docID.
        let ids: Vec<u32> = results.iter().map(|r| r.doc_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_passage_retrieval() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = two_doc_index(dir.path());

        assert_eq!(index.passage(1), "the quick brown fox");
        assert_eq!(index.passage(2), "the lazy dog");
        assert_eq!(index.passage(99), "[Not Found]");
    }

    #[test]
    fn test_passage_markers_name_the_failing_step() {
        let dir = tempfile::tempdir().unwrap();
        let paths = build_index("1\tthe quick brown fox\n2\tthe lazy dog\n", dir.path());

        // Tamper with the page table: docID 98 claims a shorter passage
        // than the stored prefix, docID 97 points past the end of the store.
        let mut table = std::fs::read_to_string(paths.page_table()).unwrap();
        table.push_str("98\t0\t2\n97\t100000\t10\n");
        std::fs::write(paths.page_table(), table).unwrap();

        // Cut the store off inside doc 2's payload ([u32 19][19 bytes]
        // [u32 12][12 bytes]): its prefix still reads, the content does not.
        let store = std::fs::read(paths.passages()).unwrap();
        std::fs::write(paths.passages(), &store[..30]).unwrap();

        let mut index = QueryIndex::open(&paths).unwrap();
        assert_eq!(index.passage(1), "the quick brown fox");
        assert_eq!(index.passage(98), "[Invalid Length]");
        assert_eq!(index.passage(97), "[Read Failed]");
        assert_eq!(index.passage(2), "[Content Read Failed]");
    }

    #[test]
    fn test_postings_inspection() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = two_doc_index(dir.path());

        let the = index.postings("the").unwrap().unwrap();
        assert_eq!(the, vec![(1, 1), (2, 1)]);
        assert!(index.postings("unicorn").unwrap().is_none());
    }

    #[test]
    fn test_open_fails_on_empty_collection() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        std::fs::create_dir_all(paths.as_dir()).unwrap();
        std::fs::write(paths.lexicon(), "").unwrap();
        std::fs::write(paths.page_table(), "").unwrap();
        std::fs::write(paths.doc_lengths(), "").unwrap();
        std::fs::write(paths.avgdl(), "3.5\n").unwrap();
        std::fs::write(paths.final_index(), "").unwrap();
        std::fs::write(paths.passages(), "").unwrap();

        let err = QueryIndex::open(&paths).unwrap_err();
        assert!(err.is_fatal());
    }
}
