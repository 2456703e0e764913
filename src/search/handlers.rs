//! Indexing Task Handler
//!
//! The `index_search` task kind: validates the payload, picks the plain or
//! chunked path by content length, and reports progress per chunk so
//! observers can follow long documents.

use std::sync::Arc;

use async_trait::async_trait;

use crate::executor::registry::{decode_payload, TaskContext, TaskHandler};
use crate::executor::types::{Task, TaskError};

use super::indexer::{chunk_content, Indexer, DEFAULT_CHUNK_SIZE};
use super::tokenizer::is_supported_language;
use super::types::{IndexDocument, IndexTaskPayload};

pub struct IndexContentHandler {
    indexer: Arc<Indexer>,
}

impl IndexContentHandler {
    pub fn new(indexer: Arc<Indexer>) -> Arc<Self> {
        Arc::new(Self { indexer })
    }
}

#[async_trait]
impl TaskHandler for IndexContentHandler {
    async fn run(&self, task: &Task, ctx: &TaskContext) -> Result<(), TaskError> {
        let payload: IndexTaskPayload = decode_payload(task)?;
        if payload.doc_id.is_empty() || payload.doc_type.is_empty() {
            return Err(TaskError::Validation(
                "doc_id and doc_type must be non-empty".into(),
            ));
        }

        let language = payload
            .options
            .language
            .clone()
            .unwrap_or_else(|| "en".to_string());
        if !is_supported_language(&language) {
            return Err(TaskError::Validation(format!(
                "unsupported language: {}",
                language
            )));
        }

        let doc = IndexDocument {
            id: payload.doc_id.clone(),
            doc_type: payload.doc_type.clone(),
            content: payload.content.clone(),
            language,
            metadata: payload.metadata.clone(),
        };

        let chunk_size = payload.options.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE);
        if doc.content.chars().count() <= chunk_size {
            self.indexer.reindex_document(&doc).await?;
            ctx.report_progress(task, 100).await;
            return Ok(());
        }

        let chunks = chunk_content(&doc.content, chunk_size);
        let total = chunks.len();
        for (position, chunk) in chunks.iter().enumerate() {
            if ctx.is_cancelled() {
                return Err(TaskError::Transient(format!(
                    "indexing cancelled after {}/{} chunks",
                    position, total
                )));
            }
            self.indexer.index_chunk(&doc, position, chunk).await?;
            let percent = ((position + 1) * 100 / total) as u8;
            ctx.report_progress(task, percent).await;
        }

        tracing::debug!(
            "Indexed {} {} as {} chunks",
            doc.doc_type,
            doc.id,
            total
        );
        Ok(())
    }
}
