//! Text Tokenization
//!
//! One tokenizer for documents and queries: lowercase, strip everything
//! that is not a word character, drop short tokens, drop stop-words.
//! Stop-word sets are closed per language; English is the fallback for
//! anything unrecognized.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;

pub const SUPPORTED_LANGUAGES: [&str; 4] = ["en", "es", "fr", "de"];

/// Tokens this short carry no signal and are dropped before stop-word
/// filtering.
const MIN_TOKEN_LEN: usize = 3;

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w]+").expect("static pattern"));

static STOP_EN: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "has",
        "have", "was", "were", "will", "with", "this", "that", "these", "those", "from",
        "they", "them", "their", "there", "here", "what", "which", "who", "whom", "been",
        "being", "does", "doing", "did", "about", "into", "over", "under", "then", "than",
        "when", "where", "why", "how", "our", "your", "its", "his", "her", "she", "him",
        "out", "off", "too", "very", "just", "only", "own", "same", "such", "more", "most",
        "some", "other",
    ]
    .into_iter()
    .collect()
});

static STOP_ES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "que", "los", "las", "una", "uno", "unos", "unas", "del", "por", "con", "para",
        "como", "pero", "sus", "les", "este", "esta", "estos", "estas", "ese", "esa", "muy",
        "sin", "sobre", "hasta", "hay", "donde", "quien", "desde", "todo", "todos", "nos",
        "entre", "era", "son", "ser", "estar", "fue", "tiene", "tienen", "porque",
    ]
    .into_iter()
    .collect()
});

static STOP_FR: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "les", "des", "une", "dans", "pour", "par", "sur", "avec", "son", "ses", "aux",
        "ces", "cette", "mais", "comme", "tout", "tous", "toute", "toutes", "nous", "vous",
        "ils", "elles", "leur", "leurs", "est", "sont", "être", "avoir", "fait", "plus",
        "pas", "que", "qui", "quoi", "dont", "donc", "ainsi", "entre", "sans",
    ]
    .into_iter()
    .collect()
});

static STOP_DE: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "der", "die", "das", "und", "oder", "aber", "wenn", "dann", "als", "auch", "auf",
        "aus", "bei", "bis", "durch", "für", "gegen", "mit", "nach", "ohne", "seit", "über",
        "unter", "vom", "von", "vor", "zum", "zur", "dass", "ein", "eine", "einer", "eines",
        "einem", "einen", "nicht", "nur", "noch", "schon", "sich", "sie", "wir", "ihr",
        "ist", "sind", "war", "waren", "sein", "haben", "hat", "hatte", "werden", "wird",
        "wurde",
    ]
    .into_iter()
    .collect()
});

pub fn is_supported_language(lang: &str) -> bool {
    SUPPORTED_LANGUAGES.contains(&lang)
}

fn stop_words(lang: &str) -> &'static HashSet<&'static str> {
    match lang {
        "es" => &STOP_ES,
        "fr" => &STOP_FR,
        "de" => &STOP_DE,
        _ => &STOP_EN,
    }
}

/// Lowercase, replace non-word characters with spaces, collapse runs of
/// whitespace. Idempotent: normalizing normalized text is a no-op, so
/// tokenization of raw and normalized content agrees.
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let spaced = NON_WORD.replace_all(&lowered, " ");
    spaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Order-preserving token stream after normalization, length, and
/// stop-word filtering.
pub fn tokenize(text: &str, lang: &str) -> Vec<String> {
    let stops = stop_words(lang);
    normalize(text)
        .split_whitespace()
        .filter(|token| token.chars().count() >= MIN_TOKEN_LEN)
        .filter(|token| !stops.contains(token))
        .map(|token| token.to_string())
        .collect()
}

/// Term -> occurrence count over the tokenized content.
pub fn term_frequencies(text: &str, lang: &str) -> HashMap<String, usize> {
    let mut frequencies = HashMap::new();
    for token in tokenize(text, lang) {
        *frequencies.entry(token).or_insert(0) += 1;
    }
    frequencies
}

/// The distinct terms of a document, used when tearing postings down.
pub fn unique_terms(text: &str, lang: &str) -> HashSet<String> {
    tokenize(text, lang).into_iter().collect()
}
