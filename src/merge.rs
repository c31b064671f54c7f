//! k-way merge of term-sorted partitions into the final compressed index
//!
//! Each partition is streamed one record at a time through a min-heap keyed
//! by term. All equal-term heads are drained before a term is emitted, so a
//! term's postings are complete when they are encoded: sorted by docID,
//! docIDs gap-coded and VarByte-compressed, term frequencies VarByte-coded
//! raw. The lexicon records the byte range of both blocks per term.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::IndexPaths;
use crate::error::{PassimError, Result};
use crate::lexicon::LexiconEntry;
use crate::manifest::IndexManifest;
use crate::varbyte;

/// Counters produced by a merge run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Terms written to the lexicon.
    pub terms: u64,
    /// Total postings across all terms.
    pub postings: u64,
    /// Size of the final index in bytes.
    pub index_bytes: u64,
    /// Partition records skipped as corrupt.
    pub records_skipped: u64,
}

/// Find the partition files under `paths`, numbered from 1 in flush order.
pub fn discover_partitions(paths: &IndexPaths) -> Vec<PathBuf> {
    let mut partitions = Vec::new();
    for k in 1.. {
        let path = paths.partition(k);
        if !path.exists() {
            break;
        }
        partitions.push(path);
    }
    partitions
}

/// Merge the partitions under `paths` into final_index.bin and lexicon.txt,
/// then write the build manifest.
pub fn merge_index(paths: &IndexPaths) -> Result<MergeStats> {
    let partitions = discover_partitions(paths);
    if partitions.is_empty() {
        return Err(PassimError::Precondition(format!(
            "no partition files found under {}",
            paths.as_dir().display()
        )));
    }

    let stats = merge_partitions(&partitions, &paths.final_index(), &paths.lexicon())?;

    IndexManifest::new(stats.terms, stats.postings, stats.index_bytes)
        .write(&paths.manifest())?;

    Ok(stats)
}

/// Merge explicit partition files into `index_path` + `lexicon_path`.
pub fn merge_partitions(
    partitions: &[PathBuf],
    index_path: &Path,
    lexicon_path: &Path,
) -> Result<MergeStats> {
    let mut readers = partitions
        .iter()
        .map(|p| PartitionReader::open(p))
        .collect::<Result<Vec<_>>>()?;

    let index_file = File::create(index_path).map_err(|e| PassimError::open(index_path, e))?;
    let mut index = BufWriter::new(index_file);
    let lexicon_file =
        File::create(lexicon_path).map_err(|e| PassimError::open(lexicon_path, e))?;
    let mut lexicon = BufWriter::new(lexicon_file);

    // Heap of (term, source) with one pending record per source; the slot
    // holds that record's postings.
    let mut heap: BinaryHeap<Reverse<(String, usize)>> = BinaryHeap::new();
    let mut slots: Vec<Vec<(u32, u32)>> = vec![Vec::new(); readers.len()];
    let mut stats = MergeStats::default();

    for (i, reader) in readers.iter_mut().enumerate() {
        if let Some((term, postings)) = reader.next_record(&mut stats)? {
            slots[i] = postings;
            heap.push(Reverse((term, i)));
        }
    }

    let mut offset = 0u64;
    while let Some(Reverse((term, source))) = heap.pop() {
        let mut merged = std::mem::take(&mut slots[source]);
        advance(&mut readers, &mut slots, &mut heap, source, &mut stats)?;

        // Drain every source whose head carries the same term.
        while heap.peek().map_or(false, |r| (r.0).0 == term) {
            let Some(Reverse((_, other))) = heap.pop() else {
                break;
            };
            merged.append(&mut slots[other]);
            advance(&mut readers, &mut slots, &mut heap, other, &mut stats)?;
        }

        offset += emit_term(&term, merged, &mut index, &mut lexicon, offset, &mut stats)?;
    }

    index.flush()?;
    lexicon.flush()?;

    stats.index_bytes = offset;
    info!(
        "merge complete: {} terms, {} postings, {} index bytes, {} records skipped",
        stats.terms, stats.postings, stats.index_bytes, stats.records_skipped
    );

    Ok(stats)
}

fn advance(
    readers: &mut [PartitionReader],
    slots: &mut [Vec<(u32, u32)>],
    heap: &mut BinaryHeap<Reverse<(String, usize)>>,
    source: usize,
    stats: &mut MergeStats,
) -> Result<()> {
    if let Some((term, postings)) = readers[source].next_record(stats)? {
        slots[source] = postings;
        heap.push(Reverse((term, source)));
    }
    Ok(())
}

/// Encode and append one term's postings; returns the bytes written.
fn emit_term(
    term: &str,
    mut postings: Vec<(u32, u32)>,
    index: &mut BufWriter<File>,
    lexicon: &mut BufWriter<File>,
    offset: u64,
    stats: &mut MergeStats,
) -> Result<u64> {
    postings.sort_unstable_by_key(|&(doc_id, _)| doc_id);

    // A (term, docID) pair is produced by exactly one partition, so
    // duplicates cannot occur by construction; if the input violates that,
    // sum the frequencies rather than corrupt the gap sequence.
    let mut deduped: Vec<(u32, u32)> = Vec::with_capacity(postings.len());
    for (doc_id, freq) in postings {
        match deduped.last_mut() {
            Some((last_id, last_freq)) if *last_id == doc_id => *last_freq += freq,
            _ => deduped.push((doc_id, freq)),
        }
    }

    let mut gaps = Vec::with_capacity(deduped.len());
    let mut freqs = Vec::with_capacity(deduped.len());
    let mut prev = 0u32;
    for &(doc_id, freq) in &deduped {
        gaps.push(doc_id - prev);
        freqs.push(freq);
        prev = doc_id;
    }

    let mut encoded_docids = Vec::new();
    varbyte::encode_list(&gaps, &mut encoded_docids);
    let mut encoded_freqs = Vec::new();
    varbyte::encode_list(&freqs, &mut encoded_freqs);

    index.write_all(&encoded_docids)?;
    index.write_all(&encoded_freqs)?;

    let entry = LexiconEntry {
        docid_offset: offset,
        docid_length: encoded_docids.len() as u64,
        freq_offset: offset + encoded_docids.len() as u64,
        freq_length: encoded_freqs.len() as u64,
        doc_freq: deduped.len() as u64,
    };
    writeln!(lexicon, "{}", entry.to_line(term))?;

    stats.terms += 1;
    stats.postings += deduped.len() as u64;

    Ok((encoded_docids.len() + encoded_freqs.len()) as u64)
}

/// Streams records out of one term-sorted partition file.
struct PartitionReader {
    reader: BufReader<File>,
    path: PathBuf,
    line_no: u64,
}

impl PartitionReader {
    fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| PassimError::open(path, e))?;
        Ok(Self {
            reader: BufReader::new(file),
            path: path.to_path_buf(),
            line_no: 0,
        })
    }

    /// Read the next well-formed record, skipping empty and corrupt lines
    /// with a diagnostic. Returns `None` at end of file.
    fn next_record(&mut self, stats: &mut MergeStats) -> Result<Option<(String, Vec<(u32, u32)>)>> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            self.line_no += 1;

            let trimmed = line.trim_end_matches(|c| c == '\n' || c == '\r');
            if trimmed.is_empty() {
                continue;
            }

            match parse_record(trimmed) {
                Ok(record) => return Ok(Some(record)),
                Err(e) => {
                    warn!("{}:{}: {}", self.path.display(), self.line_no, e);
                    stats.records_skipped += 1;
                }
            }
        }
    }
}

/// Parse `term\td1\tf1\td2\tf2...`. The docID/tf tail must alternate cleanly
/// and be non-empty.
fn parse_record(line: &str) -> Result<(String, Vec<(u32, u32)>)> {
    let mut fields = line.split('\t');
    let term = fields
        .next()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| PassimError::RecordParse("record without a term".to_string()))?
        .to_string();

    let mut postings = Vec::new();
    loop {
        let Some(doc_id_text) = fields.next() else {
            break;
        };
        let freq_text = fields.next().ok_or_else(|| {
            PassimError::RecordParse(format!("dangling docID for term '{}'", term))
        })?;

        let doc_id: u32 = doc_id_text.parse().map_err(|_| {
            PassimError::RecordParse(format!("non-integer docID '{}' for term '{}'", doc_id_text, term))
        })?;
        let freq: u32 = freq_text.parse().map_err(|_| {
            PassimError::RecordParse(format!("non-integer freq '{}' for term '{}'", freq_text, term))
        })?;
        postings.push((doc_id, freq));
    }

    if postings.is_empty() {
        return Err(PassimError::RecordParse(format!(
            "no postings for term '{}'",
            term
        )));
    }

    Ok((term, postings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexicon::Lexicon;
    use crate::varbyte;

    fn write_partition(dir: &Path, k: usize, content: &str) -> PathBuf {
        let path = dir.join(format!("intermediate_{}.txt", k));
        std::fs::write(&path, content).unwrap();
        path
    }

    fn decode_term(index: &[u8], entry: &LexiconEntry) -> (Vec<u32>, Vec<u32>) {
        let docid_block =
            &index[entry.docid_offset as usize..(entry.docid_offset + entry.docid_length) as usize];
        let freq_block =
            &index[entry.freq_offset as usize..(entry.freq_offset + entry.freq_length) as usize];
        let gaps = varbyte::decode_list(docid_block, entry.doc_freq as usize).unwrap();
        let freqs = varbyte::decode_list(freq_block, entry.doc_freq as usize).unwrap();

        let mut doc_ids = Vec::with_capacity(gaps.len());
        let mut prev = 0u32;
        for gap in gaps {
            prev += gap;
            doc_ids.push(prev);
        }
        (doc_ids, freqs)
    }

    #[test]
    fn test_merge_term_split_across_partitions() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_partition(dir.path(), 1, "alpha\t1\t3\n");
        let b = write_partition(dir.path(), 2, "alpha\t5\t2\n");

        let index_path = dir.path().join("final_index.bin");
        let lexicon_path = dir.path().join("lexicon.txt");
        let stats = merge_partitions(&[a, b], &index_path, &lexicon_path).unwrap();

        assert_eq!(stats.terms, 1);
        assert_eq!(stats.postings, 2);

        let lexicon = Lexicon::load(&lexicon_path).unwrap();
        let entry = lexicon.get("alpha").unwrap();
        assert_eq!(entry.doc_freq, 2);

        let index = std::fs::read(&index_path).unwrap();
        let (doc_ids, freqs) = decode_term(&index, entry);
        assert_eq!(doc_ids, vec![1, 5]);
        assert_eq!(freqs, vec![3, 2]);

        // Gap bytes on disk are [1, 4].
        let gaps = varbyte::decode_list(&index[..entry.docid_length as usize], 2).unwrap();
        assert_eq!(gaps, vec![1, 4]);
    }

    #[test]
    fn test_merge_emits_terms_in_lexicographic_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_partition(dir.path(), 1, "bravo\t2\t1\ndelta\t2\t1\n");
        let b = write_partition(dir.path(), 2, "alpha\t1\t1\ncharlie\t1\t1\n");

        let index_path = dir.path().join("final_index.bin");
        let lexicon_path = dir.path().join("lexicon.txt");
        merge_partitions(&[a, b], &index_path, &lexicon_path).unwrap();

        let lines = std::fs::read_to_string(&lexicon_path).unwrap();
        let terms: Vec<&str> = lines
            .lines()
            .map(|l| l.split('\t').next().unwrap())
            .collect();
        assert_eq!(terms, vec!["alpha", "bravo", "charlie", "delta"]);

        // Offsets are contiguous: each term starts where the previous ended.
        let lexicon = Lexicon::load(&lexicon_path).unwrap();
        let mut entries: Vec<_> = lexicon.iter().map(|(_, e)| *e).collect();
        entries.sort_by_key(|e| e.docid_offset);
        let mut expected = 0;
        for entry in entries {
            assert_eq!(entry.docid_offset, expected);
            assert_eq!(entry.freq_offset, entry.docid_offset + entry.docid_length);
            expected = entry.freq_offset + entry.freq_length;
        }
    }

    #[test]
    fn test_duplicate_doc_ids_sum_frequencies() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_partition(dir.path(), 1, "alpha\t4\t3\n");
        let b = write_partition(dir.path(), 2, "alpha\t4\t2\t9\t1\n");

        let index_path = dir.path().join("final_index.bin");
        let lexicon_path = dir.path().join("lexicon.txt");
        let stats = merge_partitions(&[a, b], &index_path, &lexicon_path).unwrap();

        assert_eq!(stats.postings, 2);

        let lexicon = Lexicon::load(&lexicon_path).unwrap();
        let entry = lexicon.get("alpha").unwrap();
        assert_eq!(entry.doc_freq, 2);

        let index = std::fs::read(&index_path).unwrap();
        let (doc_ids, freqs) = decode_term(&index, entry);
        assert_eq!(doc_ids, vec![4, 9]);
        assert_eq!(freqs, vec![5, 1]);
    }

    #[test]
    fn test_corrupt_records_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_partition(
            dir.path(),
            1,
            "alpha\t1\t2\nbad\tnotanumber\t2\nlonely\ncharlie\t3\n\nzulu\t7\t1\n",
        );

        let index_path = dir.path().join("final_index.bin");
        let lexicon_path = dir.path().join("lexicon.txt");
        let stats = merge_partitions(&[a], &index_path, &lexicon_path).unwrap();

        // "bad" has a non-integer docID, "lonely" has no postings, and
        // "charlie" has a dangling docID without a frequency.
        assert_eq!(stats.records_skipped, 3);
        assert_eq!(stats.terms, 2);

        let lexicon = Lexicon::load(&lexicon_path).unwrap();
        assert!(lexicon.contains("alpha"));
        assert!(lexicon.contains("zulu"));
        assert!(!lexicon.contains("charlie"));
    }

    #[test]
    fn test_unsorted_postings_within_record_are_sorted_on_emit() {
        // The parser writes postings in append order; the merger sorts.
        let dir = tempfile::tempdir().unwrap();
        let a = write_partition(dir.path(), 1, "apple\t5\t1\t3\t2\n");

        let index_path = dir.path().join("final_index.bin");
        let lexicon_path = dir.path().join("lexicon.txt");
        merge_partitions(&[a], &index_path, &lexicon_path).unwrap();

        let lexicon = Lexicon::load(&lexicon_path).unwrap();
        let entry = lexicon.get("apple").unwrap();
        let index = std::fs::read(&index_path).unwrap();
        let (doc_ids, freqs) = decode_term(&index, entry);
        assert_eq!(doc_ids, vec![3, 5]);
        assert_eq!(freqs, vec![2, 1]);
    }

    #[test]
    fn test_discover_partitions_stops_at_gap() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        write_partition(dir.path(), 1, "a\t1\t1\n");
        write_partition(dir.path(), 2, "b\t1\t1\n");
        write_partition(dir.path(), 4, "d\t1\t1\n");

        let found = discover_partitions(&paths);
        assert_eq!(found.len(), 2);
        assert_eq!(found[1], paths.partition(2));
    }
}
