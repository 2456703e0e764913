//! Outbound Mail Transport Interface
//!
//! The wire shape mirrors transactional mail APIs: personalizations with
//! recipient groups, a list of typed content parts, and optional raw
//! headers. The memory transport records every send for assertions and can
//! simulate transient failures.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailAddress {
    pub email: String,
    pub name: Option<String>,
}

impl EmailAddress {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Personalization {
    pub to: Vec<EmailAddress>,
    #[serde(default)]
    pub cc: Vec<EmailAddress>,
    #[serde(default)]
    pub bcc: Vec<EmailAddress>,
    pub dkim_domain: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentPart {
    /// MIME type, e.g. "text/plain" or "text/html".
    pub content_type: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundAttachment {
    pub filename: String,
    pub content_type: String,
    /// Base64-encoded bytes.
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub personalizations: Vec<Personalization>,
    pub from: EmailAddress,
    pub subject: String,
    pub content: Vec<ContentPart>,
    #[serde(default)]
    pub attachments: Vec<OutboundAttachment>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: OutboundMessage) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryMailTransport {
    sent: Mutex<Vec<OutboundMessage>>,
    failures_remaining: AtomicU32,
}

impl MemoryMailTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().expect("transport mutex poisoned").clone()
    }

    /// Fail the next `n` sends with a transport error.
    pub fn fail_next(&self, n: u32) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl MailTransport for MemoryMailTransport {
    async fn send(&self, message: OutboundMessage) -> Result<()> {
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            anyhow::bail!("simulated transport failure ({} left)", remaining - 1);
        }
        self.sent
            .lock()
            .expect("transport mutex poisoned")
            .push(message);
        Ok(())
    }
}
