//! Attachment Processing
//!
//! Validates incoming attachments against the MIME whitelist and size
//! limit, sanitizes filenames, computes SHA-256 checksums, and stores the
//! bytes in the blob store under `attachments/{uuid}/{sanitized_name}`.
//! The email record is then updated with the blob keys. Validation
//! failures are fatal: re-running cannot make a bad payload good.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::executor::registry::{decode_payload, TaskContext, TaskHandler};
use crate::executor::types::{Task, TaskError};
use crate::external::blobs::{BlobMetadata, BlobStore};
use crate::external::documents::DocumentStore;

use super::types::{AttachmentsPayload, IncomingAttachment};

const ALLOWED_MIME_TYPES: [&str; 10] = [
    "text/plain",
    "text/csv",
    "text/html",
    "application/pdf",
    "application/zip",
    "application/json",
    "image/png",
    "image/jpeg",
    "image/gif",
    "image/webp",
];

/// Keep only the final path segment, replace anything outside
/// `[A-Za-z0-9._-]`, strip leading dots, and cap the length so blob keys
/// stay path-safe.
pub fn sanitize_filename(filename: &str) -> String {
    let basename = filename
        .rsplit(['/', '\\'])
        .find(|segment| !segment.is_empty())
        .unwrap_or("");
    let mut sanitized: String = basename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    while sanitized.starts_with('.') {
        sanitized.remove(0);
    }
    if sanitized.len() > 128 {
        sanitized.truncate(128);
    }
    if sanitized.is_empty() {
        sanitized = "attachment".to_string();
    }
    sanitized
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

pub struct ProcessAttachmentsHandler;

impl ProcessAttachmentsHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }

    fn validate(
        attachment: &IncomingAttachment,
        size_limit: u64,
    ) -> Result<Vec<u8>, TaskError> {
        if !ALLOWED_MIME_TYPES.contains(&attachment.content_type.as_str()) {
            return Err(TaskError::Validation(format!(
                "attachment {} has disallowed content type {}",
                attachment.filename, attachment.content_type
            )));
        }

        let bytes = BASE64.decode(&attachment.data_base64).map_err(|e| {
            TaskError::Validation(format!(
                "attachment {} is not valid base64: {}",
                attachment.filename, e
            ))
        })?;

        if let Some(declared) = attachment.size {
            if declared != bytes.len() as u64 {
                return Err(TaskError::Integrity(format!(
                    "attachment {} declared {} bytes but carries {}",
                    attachment.filename,
                    declared,
                    bytes.len()
                )));
            }
        }
        if bytes.len() as u64 > size_limit {
            return Err(TaskError::Validation(format!(
                "attachment {} exceeds the {} byte limit",
                attachment.filename, size_limit
            )));
        }
        Ok(bytes)
    }
}

#[async_trait]
impl TaskHandler for ProcessAttachmentsHandler {
    async fn run(&self, task: &Task, ctx: &TaskContext) -> Result<(), TaskError> {
        let payload: AttachmentsPayload = decode_payload(task)?;
        if payload.attachments.is_empty() {
            return Ok(());
        }

        // The parent email was written before this task was enqueued;
        // absence is a lagging read, not a bad payload.
        let mut email = ctx
            .documents
            .get_email(&payload.email_id)
            .await
            .map_err(|e| TaskError::Transient(e.to_string()))?
            .ok_or_else(|| {
                TaskError::Transient(format!("email {} not visible yet", payload.email_id))
            })?;

        let total = payload.attachments.len();
        // Replay guard: a previous run that completed already recorded one
        // blob key per attachment.
        if email.has_attachments && email.attachment_keys.len() >= total {
            tracing::info!(
                "Attachments for email {} already stored, skipping",
                payload.email_id
            );
            return Ok(());
        }
        email.attachment_keys.clear();

        for (i, attachment) in payload.attachments.iter().enumerate() {
            let bytes = Self::validate(attachment, ctx.config.attachment_size_limit)?;
            let checksum = sha256_hex(&bytes);
            let sanitized = sanitize_filename(&attachment.filename);
            let key = format!("attachments/{}/{}", uuid::Uuid::new_v4(), sanitized);

            let mut metadata = BlobMetadata {
                content_type: Some(attachment.content_type.clone()),
                ..Default::default()
            };
            metadata
                .custom
                .insert("sha256".to_string(), checksum.clone());
            metadata
                .custom
                .insert("original_filename".to_string(), attachment.filename.clone());
            metadata
                .custom
                .insert("email_id".to_string(), payload.email_id.clone());

            ctx.blobs
                .put(&key, bytes, metadata)
                .await
                .map_err(|e| TaskError::Transient(format!("blob store: {}", e)))?;
            email.attachment_keys.push(key.clone());

            tracing::debug!(
                "Stored attachment {} as {} (sha256 {})",
                attachment.filename,
                key,
                checksum
            );
            ctx.report_progress(task, ((i + 1) * 100 / total) as u8).await;
        }

        email.has_attachments = true;
        ctx.documents
            .update_email(email)
            .await
            .map_err(|e| TaskError::Transient(e.to_string()))?;

        tracing::info!(
            "Processed {} attachment(s) for email {}",
            total,
            payload.email_id
        );
        Ok(())
    }
}
