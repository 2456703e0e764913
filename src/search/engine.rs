//! Query Engine
//!
//! Read-only over the index structures the indexer maintains.
//!
//! 1. **Tokenize** the query with the document tokenizer.
//! 2. **Lookup** every posting list, optionally expanded with fuzzy
//!    matches (edit distance <= 2, half weight) against a cached
//!    vocabulary.
//! 3. **Score** by summing per-term scores per document.
//! 4. **Filter** candidates against exact metadata matches.
//! 5. **Hydrate** survivors with their stored documents, paginate, and
//!    optionally attach a snippet highlight.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::executor::types::TaskError;
use crate::storage::store::KvStore;

use super::indexer::{doc_key, meta_key, posting_key};
use super::tokenizer::tokenize;
use super::types::{SearchHit, SearchOptions, SearchResults, StoredDocument};

const FUZZY_WEIGHT: f64 = 0.5;
const MAX_EDIT_DISTANCE: usize = 2;
/// The vocabulary scan is bounded and cached so fuzzy expansion does not
/// pay O(vocabulary) key enumeration per query.
const VOCAB_TTL: Duration = Duration::from_secs(60);
const VOCAB_SCAN_LIMIT: usize = 50_000;
const SNIPPET_CONTEXT: usize = 80;

struct VocabCache {
    terms: Vec<String>,
    fetched_at: Instant,
}

pub struct QueryEngine {
    kv: Arc<dyn KvStore>,
    vocab: RwLock<Option<VocabCache>>,
}

impl QueryEngine {
    pub fn new(kv: Arc<dyn KvStore>) -> Arc<Self> {
        Arc::new(Self {
            kv,
            vocab: RwLock::new(None),
        })
    }

    pub async fn search(
        &self,
        query: &str,
        opts: &SearchOptions,
    ) -> Result<SearchResults, TaskError> {
        let tokens = tokenize(query, "en");
        if tokens.is_empty() {
            return Ok(SearchResults {
                total: 0,
                hits: Vec::new(),
            });
        }

        // Sum scores per posting member across all query terms.
        let mut scores: HashMap<String, f64> = HashMap::new();
        for token in &tokens {
            let postings = self.kv.zrange(&posting_key(token), 0, -1, false).await?;
            for entry in postings {
                *scores.entry(entry.member).or_insert(0.0) += entry.score;
            }
        }

        if opts.fuzzy {
            for term in self.fuzzy_candidates(&tokens).await? {
                let postings = self.kv.zrange(&posting_key(&term), 0, -1, false).await?;
                for entry in postings {
                    *scores.entry(entry.member).or_insert(0.0) += entry.score * FUZZY_WEIGHT;
                }
            }
        }

        // Resolve members and apply metadata filters.
        let mut candidates: Vec<(String, String, f64)> = Vec::new();
        for (member, score) in scores {
            let Some((doc_type, doc_id)) = member.split_once(':') else {
                tracing::error!("Dropping malformed posting member {:?}", member);
                continue;
            };
            let doc_type = doc_type.to_string();
            let doc_id = doc_id.to_string();

            if !opts.filters.is_empty()
                && !self.matches_filters(&doc_type, &doc_id, opts).await?
            {
                continue;
            }
            candidates.push((doc_type, doc_id, score));
        }

        candidates.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.cmp(&b.1))
        });
        let total = candidates.len();

        let mut hits = Vec::new();
        for (doc_type, doc_id, score) in candidates.into_iter().skip(opts.from).take(opts.size) {
            let document = match self.kv.hget(&doc_key(&doc_type), &doc_id).await? {
                Some(raw) => match serde_json::from_str::<StoredDocument>(&raw) {
                    Ok(doc) => Some(doc),
                    Err(err) => {
                        tracing::error!("Dropping {} {} with malformed body: {}", doc_type, doc_id, err);
                        continue;
                    }
                },
                None => {
                    tracing::error!("Posting refers to missing document {}:{}", doc_type, doc_id);
                    continue;
                }
            };

            let highlight = if opts.highlight {
                document
                    .as_ref()
                    .and_then(|doc| snippet(&doc.content, &tokens))
            } else {
                None
            };

            hits.push(SearchHit {
                doc_id,
                doc_type,
                score,
                document,
                highlight,
            });
        }

        Ok(SearchResults { total, hits })
    }

    /// A candidate passes only when every filter field matches its
    /// metadata exactly. Missing or malformed metadata fails every filter.
    async fn matches_filters(
        &self,
        doc_type: &str,
        doc_id: &str,
        opts: &SearchOptions,
    ) -> Result<bool, TaskError> {
        let Some(raw) = self.kv.hget(&meta_key(doc_type), doc_id).await? else {
            return Ok(false);
        };
        let meta: serde_json::Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(err) => {
                tracing::error!(
                    "Dropping {} {} with malformed metadata: {}",
                    doc_type,
                    doc_id,
                    err
                );
                return Ok(false);
            }
        };

        Ok(opts.filters.iter().all(|(field, expected)| {
            meta.get(field)
                .map(|value| value_matches(value, expected))
                .unwrap_or(false)
        }))
    }

    /// Vocabulary terms within edit distance of any query token, excluding
    /// exact tokens (already scored at full weight).
    async fn fuzzy_candidates(&self, tokens: &[String]) -> Result<Vec<String>, TaskError> {
        let vocabulary = self.vocabulary().await?;
        Ok(vocabulary
            .into_iter()
            .filter(|term| !tokens.contains(term))
            .filter(|term| {
                tokens
                    .iter()
                    .any(|token| levenshtein(term, token, MAX_EDIT_DISTANCE) <= MAX_EDIT_DISTANCE)
            })
            .collect())
    }

    async fn vocabulary(&self) -> Result<Vec<String>, TaskError> {
        {
            let cache = self.vocab.read().await;
            if let Some(entry) = cache.as_ref() {
                if entry.fetched_at.elapsed() < VOCAB_TTL {
                    return Ok(entry.terms.clone());
                }
            }
        }

        let keys = self.kv.scan("posting:*", VOCAB_SCAN_LIMIT).await?;
        let terms: Vec<String> = keys
            .into_iter()
            .filter_map(|key| key.strip_prefix("posting:").map(|t| t.to_string()))
            .collect();

        let mut cache = self.vocab.write().await;
        *cache = Some(VocabCache {
            terms: terms.clone(),
            fetched_at: Instant::now(),
        });
        Ok(terms)
    }
}

fn value_matches(value: &serde_json::Value, expected: &str) -> bool {
    match value {
        serde_json::Value::String(s) => s == expected,
        other => other.to_string() == expected,
    }
}

/// Bounded Levenshtein distance. Bails out with `max + 1` as soon as no
/// cell in the current row can stay within `max`.
pub fn levenshtein(a: &str, b: &str, max: usize) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.len().abs_diff(b.len()) > max {
        return max + 1;
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.iter().enumerate() {
        let mut current = vec![i + 1];
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current.push(substitution.min(previous[j + 1] + 1).min(current[j] + 1));
        }
        if current.iter().min().copied().unwrap_or(0) > max {
            return max + 1;
        }
        previous = current;
    }
    previous[b.len()]
}

/// A truncated context window around the first matched term, on char
/// boundaries. Falls back to the content prefix when no term occurs
/// literally (e.g. fuzzy-only matches).
fn snippet(content: &str, terms: &[String]) -> Option<String> {
    if content.is_empty() {
        return None;
    }
    let chars: Vec<char> = content.chars().collect();
    let lowered: Vec<char> = content.to_lowercase().chars().collect();

    let mut match_at = 0;
    'outer: for i in 0..lowered.len() {
        for term in terms {
            let term_chars: Vec<char> = term.chars().collect();
            if i + term_chars.len() <= lowered.len()
                && lowered[i..i + term_chars.len()] == term_chars[..]
            {
                match_at = i;
                break 'outer;
            }
        }
    }

    // Lowercasing can change char counts for a few scripts; clamp so the
    // window always lies inside the original content.
    let match_at = match_at.min(chars.len().saturating_sub(1));
    let start = match_at.saturating_sub(SNIPPET_CONTEXT / 2);
    let end = (match_at + SNIPPET_CONTEXT).min(chars.len());
    let mut text: String = chars[start..end].iter().collect();
    if start > 0 {
        text = format!("...{}", text);
    }
    if end < chars.len() {
        text = format!("{}...", text);
    }
    Some(text)
}
