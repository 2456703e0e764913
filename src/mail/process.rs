//! Inbound Mail Processing
//!
//! `process_email` normalizes one inbound message: dedupe on Message-ID,
//! thread detection along the reference chain, classification, and the
//! follow-up tasks that store attachments and index the content.
//! `update_thread` applies partial mutations to a thread record under its
//! lock.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::executor::registry::{decode_payload, TaskContext, TaskHandler};
use crate::executor::types::{now_ms, EnqueueOptions, Task, TaskError, TaskKind};
use crate::external::documents::{DocumentStore, EmailRecord, ThreadRecord};
use crate::search::indexer::DOC_LOCK_TTL;
use crate::storage::lock::LockManager;

use super::classify::classify;
use super::types::{AttachmentsPayload, ProcessEmailPayload, UpdateThreadPayload};

/// Strip reply/forward prefixes so subject-based thread lookup converges
/// on one key per conversation.
pub fn normalize_subject(subject: &str) -> String {
    let mut normalized = subject.trim();
    loop {
        let lower = normalized.to_lowercase();
        let stripped = ["re:", "fwd:", "fw:"]
            .iter()
            .find(|prefix| lower.starts_with(**prefix))
            .map(|prefix| normalized[prefix.len()..].trim_start());
        match stripped {
            Some(rest) => normalized = rest,
            None => break,
        }
    }
    normalized.to_lowercase()
}

pub struct ProcessEmailHandler;

impl ProcessEmailHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }

    /// Walk the reference chain (most recent first), then fall back to the
    /// normalized subject. Returns the thread to attach to, creating a
    /// fresh one when nothing matches.
    async fn resolve_thread(
        &self,
        payload: &ProcessEmailPayload,
        ctx: &TaskContext,
        received_at: u64,
    ) -> Result<ThreadRecord, TaskError> {
        let mut chain: Vec<&String> = payload.in_reply_to.iter().collect();
        chain.extend(payload.references.iter().rev());

        for reference in chain {
            if let Some(thread) = ctx
                .documents
                .find_thread_by_message_id(reference)
                .await
                .map_err(|e| TaskError::Transient(e.to_string()))?
            {
                return Ok(thread);
            }
        }

        let subject_key = normalize_subject(&payload.subject);
        if !subject_key.is_empty() {
            if let Some(thread) = ctx
                .documents
                .find_thread_by_subject(&subject_key)
                .await
                .map_err(|e| TaskError::Transient(e.to_string()))?
            {
                return Ok(thread);
            }
        }

        Ok(ThreadRecord {
            id: uuid::Uuid::new_v4().to_string(),
            subject: subject_key,
            message_ids: Vec::new(),
            participants: Vec::new(),
            status: "open".to_string(),
            labels: Vec::new(),
            last_message_at: received_at,
            created_at: received_at,
            updated_at: received_at,
        })
    }
}

#[async_trait]
impl TaskHandler for ProcessEmailHandler {
    async fn run(&self, task: &Task, ctx: &TaskContext) -> Result<(), TaskError> {
        let payload: ProcessEmailPayload = decode_payload(task)?;
        if payload.message_id.is_empty() {
            return Err(TaskError::Validation("message_id must be non-empty".into()));
        }
        if payload.from.is_empty() {
            return Err(TaskError::Validation("from must be non-empty".into()));
        }

        // Replays are successes: the first run already did the work.
        if let Some(existing) = ctx
            .documents
            .find_email_by_message_id(&payload.message_id)
            .await
            .map_err(|e| TaskError::Transient(e.to_string()))?
        {
            tracing::info!(
                "Email {} already processed as {}, skipping",
                payload.message_id,
                existing.id
            );
            return Ok(());
        }

        let received_at = payload.received_at.unwrap_or_else(now_ms);
        let classification = classify(&payload.subject, &payload.text_content);

        let mut thread = self.resolve_thread(&payload, ctx, received_at).await?;
        let is_new_thread = thread.message_ids.is_empty();
        if !thread.message_ids.contains(&payload.message_id) {
            thread.message_ids.push(payload.message_id.clone());
        }
        if !thread.participants.contains(&payload.from) {
            thread.participants.push(payload.from.clone());
        }
        thread.last_message_at = thread.last_message_at.max(received_at);
        thread.updated_at = now_ms();

        let store_result = if is_new_thread {
            ctx.documents.insert_thread(thread.clone()).await
        } else {
            ctx.documents.update_thread(thread.clone()).await
        };
        store_result.map_err(|e| TaskError::Transient(e.to_string()))?;

        let email_id = uuid::Uuid::new_v4().to_string();
        let email = EmailRecord {
            id: email_id.clone(),
            message_id: payload.message_id.clone(),
            thread_id: Some(thread.id.clone()),
            from: payload.from.clone(),
            to: payload.to.clone(),
            subject: payload.subject.clone(),
            text_content: payload.text_content.clone(),
            html_content: payload.html_content.clone(),
            categories: classification.categories.clone(),
            priority: format!("{:?}", classification.priority).to_lowercase(),
            spam_score: classification.spam_score,
            has_attachments: !payload.attachments.is_empty(),
            attachment_keys: Vec::new(),
            received_at,
            created_at: now_ms(),
        };
        ctx.documents
            .insert_email(email)
            .await
            .map_err(|e| TaskError::Transient(e.to_string()))?;

        if !payload.attachments.is_empty() {
            let attachments_payload = AttachmentsPayload {
                email_id: email_id.clone(),
                attachments: payload.attachments.clone(),
            };
            ctx.queue
                .enqueue(
                    TaskKind::ProcessAttachments,
                    serde_json::to_value(&attachments_payload)
                        .map_err(|e| TaskError::Transient(e.to_string()))?,
                    EnqueueOptions::default(),
                )
                .await?;
        }

        let mut index_metadata = BTreeMap::new();
        index_metadata.insert(
            "category".to_string(),
            serde_json::json!(classification.categories[0]),
        );
        index_metadata.insert("from".to_string(), serde_json::json!(payload.from));
        index_metadata.insert("thread_id".to_string(), serde_json::json!(thread.id));
        let index_payload = serde_json::json!({
            "doc_id": email_id,
            "doc_type": "email",
            "content": format!("{}\n{}", payload.subject, payload.text_content),
            "metadata": index_metadata,
        });
        ctx.queue
            .enqueue(TaskKind::IndexSearch, index_payload, EnqueueOptions::default())
            .await?;

        tracing::info!(
            "Processed email {} into thread {} ({:?}, spam {:.2})",
            payload.message_id,
            thread.id,
            classification.priority,
            classification.spam_score
        );
        Ok(())
    }
}

pub struct UpdateThreadHandler;

impl UpdateThreadHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl TaskHandler for UpdateThreadHandler {
    async fn run(&self, task: &Task, ctx: &TaskContext) -> Result<(), TaskError> {
        let payload: UpdateThreadPayload = decode_payload(task)?;
        if payload.thread_id.is_empty() {
            return Err(TaskError::Validation("thread_id must be non-empty".into()));
        }

        let locks = LockManager::new(Arc::clone(&ctx.kv));
        let lock_name = format!("thread:{}", payload.thread_id);
        let token = locks
            .acquire(&lock_name, DOC_LOCK_TTL)
            .await?
            .ok_or_else(|| {
                TaskError::LockContention(format!(
                    "thread {} is being mutated elsewhere",
                    payload.thread_id
                ))
            })?;

        let result = async {
            let mut thread = ctx
                .documents
                .get_thread(&payload.thread_id)
                .await
                .map_err(|e| TaskError::Transient(e.to_string()))?
                .ok_or_else(|| {
                    TaskError::Validation(format!("unknown thread: {}", payload.thread_id))
                })?;

            if let Some(subject) = &payload.changes.subject {
                thread.subject = normalize_subject(subject);
            }
            if let Some(status) = &payload.changes.status {
                thread.status = status.clone();
            }
            for label in &payload.changes.add_labels {
                if !thread.labels.contains(label) {
                    thread.labels.push(label.clone());
                }
            }
            thread
                .labels
                .retain(|label| !payload.changes.remove_labels.contains(label));
            thread.updated_at = now_ms();

            ctx.documents
                .update_thread(thread.clone())
                .await
                .map_err(|e| TaskError::Transient(e.to_string()))?;
            Ok::<ThreadRecord, TaskError>(thread)
        }
        .await;

        if let Err(err) = locks.release(&lock_name, &token).await {
            tracing::warn!("Failed to release {}: {}", lock_name, err);
        }
        let thread = result?;

        if payload.reindex {
            let index_payload = serde_json::json!({
                "doc_id": thread.id,
                "doc_type": "thread",
                "content": format!("{}\n{}", thread.subject, thread.labels.join(" ")),
                "metadata": {
                    "status": thread.status,
                },
            });
            ctx.queue
                .enqueue(TaskKind::IndexSearch, index_payload, EnqueueOptions::default())
                .await?;
        }

        tracing::debug!("Updated thread {}", payload.thread_id);
        Ok(())
    }
}
