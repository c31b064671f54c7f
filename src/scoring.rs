//! BM25 scoring

/// BM25 parameters. k1 saturates term frequency; b controls document-length
/// normalization.
#[derive(Clone, Copy, Debug)]
pub struct Bm25Params {
    pub k1: f64,
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

/// Robertson-Sparck-Jones inverse document frequency, shifted so the value
/// stays positive for common terms.
pub fn idf(total_docs: u64, doc_freq: u64) -> f64 {
    let n = total_docs as f64;
    let df = doc_freq as f64;
    ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
}

/// BM25 contribution of one term hitting one document.
///
/// `doc_len` is the token count of the document; `avgdl` must be positive
/// (enforced at index-open time).
pub fn bm25_term_score(
    tf: u32,
    doc_freq: u64,
    total_docs: u64,
    doc_len: u32,
    avgdl: f64,
    params: &Bm25Params,
) -> f64 {
    let tf = tf as f64;
    let norm = 1.0 - params.b + params.b * (doc_len as f64 / avgdl);
    idf(total_docs, doc_freq) * (tf * (params.k1 + 1.0)) / (tf + params.k1 * norm)
}
