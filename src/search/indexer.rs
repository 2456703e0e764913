//! Inverted Index Writer
//!
//! Maintains the three index structures in the substrate: postings
//! (`posting:{term}` sorted sets scored per document), document bodies
//! (`doc:{type}` hashes), and metadata (`meta:{type}` hashes). All
//! mutation of a document happens under its `lock:doc:{id}` lease so
//! concurrent indexers never interleave partial writes.
//!
//! Long documents are indexed in fixed-size chunks: each chunk becomes a
//! synthetic `document_chunk` document carrying a normalized bag-of-words
//! vector next to its content.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use crate::executor::types::{now_ms, TaskError};
use crate::storage::lock::LockManager;
use crate::storage::store::KvStore;
use crate::storage::types::KvOp;

use super::tokenizer::{term_frequencies, unique_terms};
use super::types::{IndexDocument, StoredDocument};

pub const DOC_LOCK_TTL: Duration = Duration::from_secs(30);
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const VECTOR_DIMS: usize = 1536;
pub const CHUNK_DOC_TYPE: &str = "document_chunk";

const COUNTERS_KEY: &str = "search:counters";

pub fn doc_key(doc_type: &str) -> String {
    format!("doc:{}", doc_type)
}

pub fn meta_key(doc_type: &str) -> String {
    format!("meta:{}", doc_type)
}

pub fn posting_key(term: &str) -> String {
    format!("posting:{}", term)
}

/// Posting member format: `"type:id"`.
pub fn posting_member(doc_type: &str, id: &str) -> String {
    format!("{}:{}", doc_type, id)
}

/// TF saturation with length normalization: `ln(1 + f) / sqrt(len)`.
/// Stable across re-indexing of unchanged content.
pub fn term_score(frequency: usize, content_len: usize) -> f64 {
    (1.0 + frequency as f64).ln() / (content_len.max(1) as f64).sqrt()
}

/// Split on char boundaries into fixed-size chunks.
pub fn chunk_content(content: &str, chunk_size: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut count = 0;
    for ch in content.chars() {
        current.push(ch);
        count += 1;
        if count == chunk_size {
            chunks.push(std::mem::take(&mut current));
            count = 0;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Bag-of-words frequency vector folded into a fixed dimensionality and
/// L2-normalized. Deterministic for identical content.
pub fn embed(content: &str, language: &str) -> Vec<f32> {
    let mut vector = vec![0f32; VECTOR_DIMS];
    for (term, freq) in term_frequencies(content, language) {
        let mut hasher = DefaultHasher::new();
        term.hash(&mut hasher);
        let dim = (hasher.finish() % VECTOR_DIMS as u64) as usize;
        vector[dim] += freq as f32;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

pub struct Indexer {
    kv: Arc<dyn KvStore>,
    locks: LockManager,
}

impl Indexer {
    pub fn new(kv: Arc<dyn KvStore>) -> Arc<Self> {
        let locks = LockManager::new(Arc::clone(&kv));
        Arc::new(Self { kv, locks })
    }

    fn lock_name(doc_id: &str) -> String {
        format!("doc:{}", doc_id)
    }

    /// Index one document under its lock. Returns the number of distinct
    /// terms written. Lock contention propagates as retryable so callers
    /// come back later.
    pub async fn index_document(&self, doc: &IndexDocument) -> Result<usize, TaskError> {
        let lock_name = Self::lock_name(&doc.id);
        let token = self
            .locks
            .acquire(&lock_name, DOC_LOCK_TTL)
            .await?
            .ok_or_else(|| {
                TaskError::LockContention(format!("document {} is being indexed", doc.id))
            })?;

        let result = self.index_locked(doc, None).await;
        self.release_quiet(&lock_name, &token).await;
        result
    }

    /// Index a chunk of a long parent document as a synthetic document of
    /// type `document_chunk`, with its embedding stored alongside.
    pub async fn index_chunk(
        &self,
        parent: &IndexDocument,
        position: usize,
        chunk: &str,
    ) -> Result<String, TaskError> {
        let chunk_id = format!("{}_chunk_{}", parent.id, position);
        let mut metadata = parent.metadata.clone();
        metadata.insert(
            "parent_id".to_string(),
            serde_json::Value::String(parent.id.clone()),
        );
        metadata.insert("chunk_position".to_string(), serde_json::json!(position));

        let chunk_doc = IndexDocument {
            id: chunk_id.clone(),
            doc_type: CHUNK_DOC_TYPE.to_string(),
            content: chunk.to_string(),
            language: parent.language.clone(),
            metadata,
        };
        let embedding = embed(chunk, &parent.language);

        let lock_name = Self::lock_name(&chunk_id);
        let token = self
            .locks
            .acquire(&lock_name, DOC_LOCK_TTL)
            .await?
            .ok_or_else(|| {
                TaskError::LockContention(format!("chunk {} is being indexed", chunk_id))
            })?;

        let result = self.index_locked(&chunk_doc, Some(embedding)).await;
        self.release_quiet(&lock_name, &token).await;
        result.map(|_| chunk_id)
    }

    /// Remove a document from every posting of its tokens and drop both
    /// hash entries in one pipelined write.
    pub async fn delete_document(&self, doc_type: &str, id: &str) -> Result<bool, TaskError> {
        let lock_name = Self::lock_name(id);
        let token = self
            .locks
            .acquire(&lock_name, DOC_LOCK_TTL)
            .await?
            .ok_or_else(|| {
                TaskError::LockContention(format!("document {} is being indexed", id))
            })?;

        let result = self.delete_locked(doc_type, id).await;
        self.release_quiet(&lock_name, &token).await;
        result
    }

    /// Content changed: tear down the old postings and rebuild, all under
    /// one lock acquisition.
    pub async fn reindex_document(&self, doc: &IndexDocument) -> Result<usize, TaskError> {
        let lock_name = Self::lock_name(&doc.id);
        let token = self
            .locks
            .acquire(&lock_name, DOC_LOCK_TTL)
            .await?
            .ok_or_else(|| {
                TaskError::LockContention(format!("document {} is being indexed", doc.id))
            })?;

        let result = async {
            self.delete_locked(&doc.doc_type, &doc.id).await?;
            self.index_locked(doc, None).await
        }
        .await;
        self.release_quiet(&lock_name, &token).await;
        result
    }

    async fn index_locked(
        &self,
        doc: &IndexDocument,
        embedding: Option<Vec<f32>>,
    ) -> Result<usize, TaskError> {
        let now = now_ms();
        let existed = self
            .kv
            .hget(&doc_key(&doc.doc_type), &doc.id)
            .await?
            .is_some();

        let frequencies = term_frequencies(&doc.content, &doc.language);
        let content_len = doc.content.len();
        let member = posting_member(&doc.doc_type, &doc.id);

        let stored = StoredDocument {
            id: doc.id.clone(),
            doc_type: doc.doc_type.clone(),
            content: doc.content.clone(),
            language: doc.language.clone(),
            metadata: doc.metadata.clone(),
            embedding,
            indexed_at: now,
        };

        let mut meta: BTreeMap<String, serde_json::Value> = doc.metadata.clone();
        meta.insert("last_indexed".to_string(), serde_json::json!(now));
        meta.insert("content_length".to_string(), serde_json::json!(content_len));
        meta.insert(
            "term_count".to_string(),
            serde_json::json!(frequencies.len()),
        );

        let mut ops = vec![
            KvOp::HSet {
                key: doc_key(&doc.doc_type),
                field: doc.id.clone(),
                value: serde_json::to_string(&stored)
                    .map_err(|e| TaskError::Transient(format!("document encode failed: {}", e)))?,
            },
            KvOp::HSet {
                key: meta_key(&doc.doc_type),
                field: doc.id.clone(),
                value: serde_json::to_string(&meta)
                    .map_err(|e| TaskError::Transient(format!("metadata encode failed: {}", e)))?,
            },
        ];
        for (term, frequency) in &frequencies {
            ops.push(KvOp::ZAdd {
                key: posting_key(term),
                member: member.clone(),
                score: term_score(*frequency, content_len),
            });
        }
        self.kv.pipeline(ops).await?;

        if !existed {
            self.kv.hincr(COUNTERS_KEY, &doc.doc_type, 1).await?;
        }

        tracing::debug!(
            "Indexed {} {} ({} terms, {} chars)",
            doc.doc_type,
            doc.id,
            frequencies.len(),
            content_len
        );
        Ok(frequencies.len())
    }

    async fn delete_locked(&self, doc_type: &str, id: &str) -> Result<bool, TaskError> {
        let Some(raw) = self.kv.hget(&doc_key(doc_type), id).await? else {
            return Ok(false);
        };
        let stored: StoredDocument = serde_json::from_str(&raw)
            .map_err(|e| TaskError::Integrity(format!("malformed stored document {}: {}", id, e)))?;

        let member = posting_member(doc_type, id);
        let mut ops: Vec<KvOp> = unique_terms(&stored.content, &stored.language)
            .into_iter()
            .map(|term| KvOp::ZRem {
                key: posting_key(&term),
                member: member.clone(),
            })
            .collect();
        ops.push(KvOp::HDel {
            key: doc_key(doc_type),
            field: id.to_string(),
        });
        ops.push(KvOp::HDel {
            key: meta_key(doc_type),
            field: id.to_string(),
        });
        self.kv.pipeline(ops).await?;
        self.kv.hincr(COUNTERS_KEY, doc_type, -1).await?;

        tracing::debug!("Deleted {} {} from the index", doc_type, id);
        Ok(true)
    }

    async fn release_quiet(&self, name: &str, token: &str) {
        if let Err(err) = self.locks.release(name, token).await {
            tracing::warn!("Failed to release lock {}: {}", name, err);
        }
    }
}
