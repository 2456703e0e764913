//! Durable Alert Log
//!
//! Alerts live in the substrate: the `alerts` sorted set orders ids by
//! raise time, and `alert:{id}` hashes hold the detail fields. Writes go
//! through one pipeline so readers never see an id without its detail
//! hash for longer than a batch window.

use std::sync::Arc;

use crate::executor::types::now_ms;
use crate::storage::store::{KvError, KvStore};
use crate::storage::types::KvOp;

use super::types::{Alert, AlertSeverity, AlertState};

pub const ALERTS_KEY: &str = "alerts";

fn alert_key(id: &str) -> String {
    format!("alert:{}", id)
}

#[derive(Clone)]
pub struct AlertStore {
    kv: Arc<dyn KvStore>,
}

impl AlertStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Persist a new active alert and return its id.
    pub async fn raise(
        &self,
        severity: AlertSeverity,
        source: &str,
        message: &str,
    ) -> Result<String, KvError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_ms();
        let key = alert_key(&id);

        let mut ops = vec![KvOp::ZAdd {
            key: ALERTS_KEY.to_string(),
            member: id.clone(),
            score: now as f64,
        }];
        for (field, value) in [
            ("severity", severity.as_str().to_string()),
            ("source", source.to_string()),
            ("message", message.to_string()),
            ("state", AlertState::Active.as_str().to_string()),
            ("raised_at", now.to_string()),
        ] {
            ops.push(KvOp::HSet {
                key: key.clone(),
                field: field.to_string(),
                value,
            });
        }
        self.kv.pipeline(ops).await?;

        tracing::warn!("Raised {} alert from {}: {}", severity.as_str(), source, message);
        Ok(id)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Alert>, KvError> {
        let fields = self.kv.hgetall(&alert_key(id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }

        let parse_u64 = |name: &str| fields.get(name).and_then(|v| v.parse::<u64>().ok());
        Ok(Some(Alert {
            id: id.to_string(),
            severity: fields
                .get("severity")
                .and_then(|v| AlertSeverity::parse(v))
                .unwrap_or(AlertSeverity::Low),
            source: fields.get("source").cloned().unwrap_or_default(),
            message: fields.get("message").cloned().unwrap_or_default(),
            state: fields
                .get("state")
                .and_then(|v| AlertState::parse(v))
                .unwrap_or(AlertState::Active),
            raised_at: parse_u64("raised_at").unwrap_or(0),
            acknowledged_by: fields.get("acknowledged_by").cloned(),
            acknowledged_at: parse_u64("acknowledged_at"),
            resolved_at: parse_u64("resolved_at"),
        }))
    }

    /// Newest alerts first.
    pub async fn list_recent(&self, limit: usize) -> Result<Vec<Alert>, KvError> {
        let ids = self
            .kv
            .zrange(ALERTS_KEY, 0, limit.saturating_sub(1) as isize, true)
            .await?;
        let mut alerts = Vec::with_capacity(ids.len());
        for entry in ids {
            if let Some(alert) = self.get(&entry.member).await? {
                alerts.push(alert);
            }
        }
        Ok(alerts)
    }

    /// Whether an unresolved alert from `source` already exists among the
    /// most recent entries. Used to suppress duplicate raises.
    pub async fn has_unresolved(&self, source: &str) -> Result<bool, KvError> {
        Ok(self
            .list_recent(50)
            .await?
            .iter()
            .any(|a| a.source == source && a.state != AlertState::Resolved))
    }

    pub async fn acknowledge(&self, id: &str, who: &str) -> Result<bool, KvError> {
        let Some(alert) = self.get(id).await? else {
            return Ok(false);
        };
        if alert.state == AlertState::Resolved {
            return Ok(false);
        }

        let key = alert_key(id);
        self.kv
            .pipeline(vec![
                KvOp::HSet {
                    key: key.clone(),
                    field: "state".to_string(),
                    value: AlertState::Acknowledged.as_str().to_string(),
                },
                KvOp::HSet {
                    key: key.clone(),
                    field: "acknowledged_by".to_string(),
                    value: who.to_string(),
                },
                KvOp::HSet {
                    key,
                    field: "acknowledged_at".to_string(),
                    value: now_ms().to_string(),
                },
            ])
            .await?;
        Ok(true)
    }

    /// Terminal: a resolved alert never transitions again.
    pub async fn resolve(&self, id: &str) -> Result<bool, KvError> {
        let Some(alert) = self.get(id).await? else {
            return Ok(false);
        };
        if alert.state == AlertState::Resolved {
            return Ok(false);
        }

        let key = alert_key(id);
        self.kv
            .pipeline(vec![
                KvOp::HSet {
                    key: key.clone(),
                    field: "state".to_string(),
                    value: AlertState::Resolved.as_str().to_string(),
                },
                KvOp::HSet {
                    key,
                    field: "resolved_at".to_string(),
                    value: now_ms().to_string(),
                },
            ])
            .await?;
        Ok(true)
    }
}
