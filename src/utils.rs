use lazy_static::lazy_static;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s+").expect("valid whitespace pattern");
}

/// Canonical form of a user question: NFC, trimmed, whitespace runs collapsed.
///
/// Returns `None` when nothing is left.
pub fn normalize_query(query: &str) -> Option<String> {
    let text = query.nfc().collect::<String>();
    let text = WHITESPACE.replace_all(text.trim(), " ");

    if text.is_empty() {
        None
    } else {
        Some(text.into_owned())
    }
}
