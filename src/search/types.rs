use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A document submitted for indexing.
#[derive(Debug, Clone)]
pub struct IndexDocument {
    pub id: String,
    pub doc_type: String,
    pub content: String,
    pub language: String,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// What actually lands in the `doc:{type}` hash. Chunked documents carry
/// their bag-of-words embedding alongside the content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: String,
    pub doc_type: String,
    pub content: String,
    pub language: String,
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub embedding: Option<Vec<f32>>,
    pub indexed_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOptions {
    pub from: usize,
    pub size: usize,
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
    #[serde(default)]
    pub highlight: bool,
    #[serde(default)]
    pub fuzzy: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            from: 0,
            size: 10,
            filters: BTreeMap::new(),
            highlight: false,
            fuzzy: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub doc_id: String,
    pub doc_type: String,
    pub score: f64,
    pub document: Option<StoredDocument>,
    pub highlight: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResults {
    /// Matches after filtering, before pagination.
    pub total: usize,
    pub hits: Vec<SearchHit>,
}

/// Payload of the `index_search` task kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexTaskPayload {
    pub doc_id: String,
    pub doc_type: String,
    pub content: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub options: IndexTaskOptions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexTaskOptions {
    /// Stop-word language; unsupported values fail validation.
    pub language: Option<String>,
    /// Chunk length in characters for long documents.
    pub chunk_size: Option<usize>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IndexHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageEstimate {
    pub sampled_keys: usize,
    pub postings_bytes: u64,
    pub metadata_bytes: u64,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub total_terms: usize,
    pub total_documents: i64,
    pub avg_term_frequency: f64,
    pub high_frequency_terms: usize,
    pub medium_frequency_terms: usize,
    pub low_frequency_terms: usize,
    pub storage: StorageEstimate,
    pub issues: Vec<String>,
    pub status: IndexHealth,
    pub generated_at: u64,
}

/// Outcome of one optimization run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub skipped: bool,
    pub postings_removed: usize,
    pub postings_rescored: usize,
    pub metadata_compacted: usize,
}
