// Soundex phonetic encoding
// Stored per segment as a coarse phonetic signal; not currently part of ranking

use crate::text::normalize;

/// Number of words of a text that contribute to its stored code
const ENCODED_WORDS: usize = 3;

/// Encoded length of a single word
const CODE_LEN: usize = 4;

fn consonant_code(c: char) -> Option<char> {
    match c.to_ascii_lowercase() {
        'b' | 'f' | 'p' | 'v' => Some('1'),
        'c' | 'g' | 'j' | 'k' | 'q' | 's' | 'x' | 'z' => Some('2'),
        'd' | 't' => Some('3'),
        'l' => Some('4'),
        'm' | 'n' => Some('5'),
        'r' => Some('6'),
        _ => None,
    }
}

/// Classic Soundex code of a single word: first letter kept verbatim
/// (uppercased), consonants mapped into the 7-bucket grouping, consecutive
/// identical codes collapsed, vowels and H/W/Y skipped but resetting the
/// duplicate check, padded or truncated to exactly 4 characters.
pub fn encode_word(word: &str) -> String {
    let mut letters = word.chars().filter(|c| c.is_ascii_alphabetic());

    let first = match letters.next() {
        Some(c) => c,
        None => return String::new(),
    };

    let mut code = String::with_capacity(CODE_LEN);
    code.push(first.to_ascii_uppercase());

    let mut prev = consonant_code(first);
    for c in letters {
        if code.len() == CODE_LEN {
            break;
        }
        match consonant_code(c) {
            Some(digit) => {
                if prev != Some(digit) {
                    code.push(digit);
                }
                prev = Some(digit);
            }
            None => {
                prev = None;
            }
        }
    }

    while code.len() < CODE_LEN {
        code.push('0');
    }
    code
}

/// Soundex code of a text: the codes of its first 3 normalized words,
/// space-joined.
pub fn encode_text(text: &str) -> String {
    normalize(text)
        .iter()
        .take(ENCODED_WORDS)
        .map(|w| encode_word(w))
        .collect::<Vec<_>>()
        .join(" ")
}
