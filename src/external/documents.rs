//! Document Store Interface
//!
//! CRUD over email, thread, and analytics records keyed by opaque ids,
//! with a unique `message_id` index on emails. The in-memory
//! implementation backs the tests and local runs.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailRecord {
    pub id: String,
    pub message_id: String,
    pub thread_id: Option<String>,
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub text_content: String,
    pub html_content: Option<String>,
    pub categories: Vec<String>,
    pub priority: String,
    pub spam_score: f32,
    pub has_attachments: bool,
    pub attachment_keys: Vec<String>,
    pub received_at: u64,
    pub created_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadRecord {
    pub id: String,
    pub subject: String,
    pub message_ids: Vec<String>,
    pub participants: Vec<String>,
    pub status: String,
    pub labels: Vec<String>,
    pub last_message_at: u64,
    pub created_at: u64,
    pub updated_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsRecord {
    pub id: String,
    pub period_start: u64,
    pub period_end: u64,
    pub total_emails: u64,
    pub by_category: BTreeMap<String, u64>,
    pub by_priority: BTreeMap<String, u64>,
    pub spam_count: u64,
    pub generated_at: u64,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn ping(&self) -> Result<()>;

    async fn insert_email(&self, email: EmailRecord) -> Result<()>;
    async fn update_email(&self, email: EmailRecord) -> Result<()>;
    async fn get_email(&self, id: &str) -> Result<Option<EmailRecord>>;
    async fn find_email_by_message_id(&self, message_id: &str) -> Result<Option<EmailRecord>>;
    /// Emails with `received_at` in `[start, end)`.
    async fn emails_between(&self, start: u64, end: u64) -> Result<Vec<EmailRecord>>;
    async fn delete_emails_older_than(&self, cutoff: u64) -> Result<usize>;

    async fn insert_thread(&self, thread: ThreadRecord) -> Result<()>;
    async fn update_thread(&self, thread: ThreadRecord) -> Result<()>;
    async fn get_thread(&self, id: &str) -> Result<Option<ThreadRecord>>;
    /// The thread containing a message id from a reference chain.
    async fn find_thread_by_message_id(&self, message_id: &str) -> Result<Option<ThreadRecord>>;
    /// Lookup by normalized subject, for mails without usable references.
    async fn find_thread_by_subject(&self, subject: &str) -> Result<Option<ThreadRecord>>;

    async fn insert_analytics(&self, record: AnalyticsRecord) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryDocumentStore {
    emails: DashMap<String, EmailRecord>,
    threads: DashMap<String, ThreadRecord>,
    analytics: DashMap<String, AnalyticsRecord>,
}

impl MemoryDocumentStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn email_count(&self) -> usize {
        self.emails.len()
    }

    pub fn analytics_records(&self) -> Vec<AnalyticsRecord> {
        self.analytics.iter().map(|e| e.value().clone()).collect()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn insert_email(&self, email: EmailRecord) -> Result<()> {
        self.emails.insert(email.id.clone(), email);
        Ok(())
    }

    async fn update_email(&self, email: EmailRecord) -> Result<()> {
        self.emails.insert(email.id.clone(), email);
        Ok(())
    }

    async fn get_email(&self, id: &str) -> Result<Option<EmailRecord>> {
        Ok(self.emails.get(id).map(|e| e.value().clone()))
    }

    async fn find_email_by_message_id(&self, message_id: &str) -> Result<Option<EmailRecord>> {
        Ok(self
            .emails
            .iter()
            .find(|e| e.value().message_id == message_id)
            .map(|e| e.value().clone()))
    }

    async fn emails_between(&self, start: u64, end: u64) -> Result<Vec<EmailRecord>> {
        Ok(self
            .emails
            .iter()
            .filter(|e| e.value().received_at >= start && e.value().received_at < end)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn delete_emails_older_than(&self, cutoff: u64) -> Result<usize> {
        let stale: Vec<String> = self
            .emails
            .iter()
            .filter(|e| e.value().received_at < cutoff)
            .map(|e| e.key().clone())
            .collect();
        let count = stale.len();
        for id in stale {
            self.emails.remove(&id);
        }
        Ok(count)
    }

    async fn insert_thread(&self, thread: ThreadRecord) -> Result<()> {
        self.threads.insert(thread.id.clone(), thread);
        Ok(())
    }

    async fn update_thread(&self, thread: ThreadRecord) -> Result<()> {
        self.threads.insert(thread.id.clone(), thread);
        Ok(())
    }

    async fn get_thread(&self, id: &str) -> Result<Option<ThreadRecord>> {
        Ok(self.threads.get(id).map(|t| t.value().clone()))
    }

    async fn find_thread_by_message_id(&self, message_id: &str) -> Result<Option<ThreadRecord>> {
        Ok(self
            .threads
            .iter()
            .find(|t| t.value().message_ids.iter().any(|m| m == message_id))
            .map(|t| t.value().clone()))
    }

    async fn find_thread_by_subject(&self, subject: &str) -> Result<Option<ThreadRecord>> {
        Ok(self
            .threads
            .iter()
            .find(|t| t.value().subject == subject)
            .map(|t| t.value().clone()))
    }

    async fn insert_analytics(&self, record: AnalyticsRecord) -> Result<()> {
        self.analytics.insert(record.id.clone(), record);
        Ok(())
    }
}
