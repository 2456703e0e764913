//! Outbound Delivery Handlers
//!
//! `send_email` renders the transport message and hands it to the mail
//! transport; delivery is at-least-once, so every message carries a
//! unique Message-ID header the sink can collapse duplicates on.
//! `send_notification` consults user preferences first; a skipped
//! delivery counts as success.

use std::sync::Arc;

use async_trait::async_trait;

use crate::executor::registry::{decode_payload, TaskContext, TaskHandler};
use crate::executor::types::{now_ms, Task, TaskError};
use crate::external::mailer::{
    ContentPart, EmailAddress, MailTransport, OutboundMessage, Personalization,
};
use crate::external::notify::{Notification, NotificationSink};

use super::types::{NotificationPayload, SendEmailPayload};

pub struct SendEmailHandler;

impl SendEmailHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl TaskHandler for SendEmailHandler {
    async fn run(&self, task: &Task, ctx: &TaskContext) -> Result<(), TaskError> {
        let payload: SendEmailPayload = decode_payload(task)?;
        if payload.to.is_empty() {
            return Err(TaskError::Validation(
                "send_email requires at least one recipient".into(),
            ));
        }
        if payload.subject.is_empty() {
            return Err(TaskError::Validation("subject must be non-empty".into()));
        }

        let mut content = vec![ContentPart {
            content_type: "text/plain".to_string(),
            value: payload.text_body.clone(),
        }];
        if let Some(html) = &payload.html_body {
            content.push(ContentPart {
                content_type: "text/html".to_string(),
                value: html.clone(),
            });
        }

        let mut headers = payload.headers.clone();
        let message_id = payload.message_id.clone().unwrap_or_else(|| {
            format!("<{}@{}>", uuid::Uuid::new_v4(), ctx.config.email_domain)
        });
        headers.insert("Message-ID".to_string(), message_id.clone());

        let message = OutboundMessage {
            personalizations: vec![Personalization {
                to: payload.to.iter().map(EmailAddress::new).collect(),
                cc: payload.cc.iter().map(EmailAddress::new).collect(),
                bcc: payload.bcc.iter().map(EmailAddress::new).collect(),
                dkim_domain: Some(ctx.config.email_domain.clone()),
            }],
            from: EmailAddress::new(&ctx.config.default_from),
            subject: payload.subject.clone(),
            content,
            attachments: Vec::new(),
            headers,
        };

        ctx.mailer
            .send(message)
            .await
            .map_err(|e| TaskError::Transient(format!("mail transport: {}", e)))?;

        tracing::info!(
            "Sent email {} to {} recipient(s)",
            message_id,
            payload.to.len()
        );
        Ok(())
    }
}

pub struct SendNotificationHandler;

impl SendNotificationHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl TaskHandler for SendNotificationHandler {
    async fn run(&self, task: &Task, ctx: &TaskContext) -> Result<(), TaskError> {
        let payload: NotificationPayload = decode_payload(task)?;
        if payload.user_id.is_empty() {
            return Err(TaskError::Validation("user_id must be non-empty".into()));
        }

        if let Some(prefs) = &payload.preferences {
            if !prefs.enabled_channels.contains(&payload.channel) {
                tracing::info!(
                    "Skipping {} notification for {}: channel disabled",
                    payload.channel,
                    payload.user_id
                );
                return Ok(());
            }
            if let Some(quiet) = &prefs.quiet_hours {
                let hour = ((now_ms() / 3_600_000) % 24) as u8;
                if quiet.contains(hour) {
                    tracing::info!(
                        "Skipping {} notification for {}: quiet hours",
                        payload.channel,
                        payload.user_id
                    );
                    return Ok(());
                }
            }
        }

        let notification = Notification {
            user_id: payload.user_id.clone(),
            channel: payload.channel,
            title: payload.title.clone(),
            body: payload.body.clone(),
        };
        ctx.notifier
            .deliver(&notification)
            .await
            .map_err(|e| TaskError::Transient(format!("notification sink: {}", e)))?;

        tracing::info!(
            "Delivered {} notification to {}",
            payload.channel,
            payload.user_id
        );
        Ok(())
    }
}
