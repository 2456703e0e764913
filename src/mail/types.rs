use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::external::notify::NotificationChannel;

/// Payload of `process_email`: one inbound message as received from the
/// ingress edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessEmailPayload {
    pub message_id: String,
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub text_content: String,
    pub html_content: Option<String>,
    /// Message-ID chain from the References header, oldest first.
    #[serde(default)]
    pub references: Vec<String>,
    pub in_reply_to: Option<String>,
    #[serde(default)]
    pub attachments: Vec<IncomingAttachment>,
    pub received_at: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingAttachment {
    pub filename: String,
    pub content_type: String,
    /// Base64-encoded bytes.
    #[serde(default)]
    pub data_base64: String,
    pub size: Option<u64>,
}

/// Payload of `send_email`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendEmailPayload {
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    pub subject: String,
    pub text_body: String,
    pub html_body: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Supplied by callers that already allocated a Message-ID; otherwise
    /// the handler mints one so the sink can collapse duplicates.
    pub message_id: Option<String>,
}

/// Payload of `process_attachments`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentsPayload {
    pub email_id: String,
    pub attachments: Vec<IncomingAttachment>,
}

/// Payload of `generate_analytics`: aggregate over `[start, end)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsPayload {
    pub period_start: u64,
    pub period_end: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CleanupTarget {
    Blobs,
    Cache,
    Emails,
}

/// Payload of `cleanup_storage`. Entries matching any exclude pattern are
/// never deleted, even when their target class is selected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupPayload {
    /// Age threshold; anything newer than `now - older_than_ms` survives.
    pub older_than_ms: u64,
    #[serde(default)]
    pub targets: Vec<CleanupTarget>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanupStats {
    pub dry_run: bool,
    pub blobs_deleted: usize,
    pub blob_bytes: u64,
    pub cache_keys_deleted: usize,
    pub emails_deleted: usize,
}

/// Payload of `update_thread`: a partial mutation applied under the
/// thread's lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateThreadPayload {
    pub thread_id: String,
    pub changes: ThreadChanges,
    /// Re-enqueue `index_search` for the thread after the mutation.
    #[serde(default)]
    pub reindex: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreadChanges {
    pub subject: Option<String>,
    pub status: Option<String>,
    #[serde(default)]
    pub add_labels: Vec<String>,
    #[serde(default)]
    pub remove_labels: Vec<String>,
}

/// Payload of `send_notification`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub user_id: String,
    pub channel: NotificationChannel,
    pub title: String,
    pub body: String,
    pub preferences: Option<NotificationPreferences>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPreferences {
    #[serde(default = "all_channels")]
    pub enabled_channels: Vec<NotificationChannel>,
    /// UTC hours `[start, end)`; wrapping ranges (22 -> 7) are supported.
    pub quiet_hours: Option<QuietHours>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QuietHours {
    pub start_hour: u8,
    pub end_hour: u8,
}

impl QuietHours {
    pub fn contains(&self, hour: u8) -> bool {
        if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

fn all_channels() -> Vec<NotificationChannel> {
    vec![
        NotificationChannel::Email,
        NotificationChannel::Push,
        NotificationChannel::Sms,
        NotificationChannel::InApp,
    ]
}
