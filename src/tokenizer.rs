//! ASCII text tokenizer
//!
//! Deterministic byte-level pipeline: lowercase, strip ASCII punctuation,
//! drop non-ASCII bytes, split on ASCII whitespace. No stemming, no
//! stop-word removal; both would change what the index can answer.

use std::collections::HashMap;

/// Tokenize text into a vector of terms.
///
/// Bytes >= 0x80 are discarded rather than decoded, so any UTF-8 input is
/// accepted and only its ASCII content survives.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();

    for &byte in text.as_bytes() {
        let b = byte.to_ascii_lowercase();
        if b >= 0x80 || b.is_ascii_punctuation() {
            continue;
        }
        if b.is_ascii_whitespace() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
        } else {
            current.push(b as char);
        }
    }

    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}

/// Compute term frequencies for a tokenized document in one pass.
pub fn term_frequencies(text: &str) -> HashMap<String, u32> {
    let mut freq = HashMap::new();
    for token in tokenize(text) {
        *freq.entry(token).or_insert(0) += 1;
    }
    freq
}
