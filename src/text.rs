// Text normalization and tokenization
// Turns raw transcript text into the terms and trigrams both indexes operate on

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

/// Matches everything that is neither a letter nor whitespace.
static NON_LETTER: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\p{L}\s]").expect("valid regex"));

/// Minimum word length for trigram extraction
pub const TRIGRAM_LEN: usize = 3;

/// Normalize text into searchable words: lowercase, letters and whitespace
/// only, split on whitespace, empty tokens dropped.
pub fn normalize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let stripped = NON_LETTER.replace_all(&lowered, "");
    stripped.split_whitespace().map(String::from).collect()
}

/// All length-3 character windows of a single word. Words shorter than 3
/// characters yield nothing.
pub fn word_trigrams(word: &str) -> Vec<String> {
    let chars: Vec<char> = word.chars().collect();
    if chars.len() < TRIGRAM_LEN {
        return Vec::new();
    }
    chars
        .windows(TRIGRAM_LEN)
        .map(|w| w.iter().collect())
        .collect()
}

/// The deduplicated trigram set of a whole text. Trigrams are taken per
/// normalized word and never span a word boundary.
pub fn trigrams(text: &str) -> BTreeSet<String> {
    let mut set = BTreeSet::new();
    for word in normalize(text) {
        for tri in word_trigrams(&word) {
            set.insert(tri);
        }
    }
    set
}
