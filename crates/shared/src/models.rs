//! Event payloads and REST envelopes exchanged with the dashboard backend.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Backend identifiers arrive either as numbers or as strings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum ResourceId {
    Number(i64),
    Text(String),
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceId::Number(n) => write!(f, "{n}"),
            ResourceId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for ResourceId {
    fn from(value: i64) -> Self {
        ResourceId::Number(value)
    }
}

impl From<&str> for ResourceId {
    fn from(value: &str) -> Self {
        ResourceId::Text(value.to_string())
    }
}

// --- Realtime payloads ---

/// `notification.sent`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    #[serde(default)]
    pub id: Option<ResourceId>,
    #[serde(default)]
    pub title: Option<String>,
    pub message: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// `<resource>.updated`. Fields beyond `id`/`status` depend on the resource
/// and are kept as-is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountUpdate {
    pub id: ResourceId,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// `transaction.status-changed`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionStatusChanged {
    pub id: ResourceId,
    pub status: String,
    /// Number or decimal string, as the backend sends it.
    #[serde(default)]
    pub amount: Option<Value>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// `<resource>.reload`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TableReload {
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

// --- REST ---

/// Response envelope used by every dashboard endpoint.
///
/// Collection endpoints put their rows under `list` instead of `data`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiEnvelope<T> {
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(alias = "list")]
    pub data: Option<T>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub message: Option<String>,
}

fn default_success() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_accepts_numeric_ids_and_missing_fields() {
        let n: Notification =
            serde_json::from_str(r#"{"id": 7, "message": "Payout sent", "type": "billing"}"#)
                .unwrap();
        assert_eq!(n.id, Some(ResourceId::Number(7)));
        assert_eq!(n.kind.as_deref(), Some("billing"));
        assert!(n.title.is_none());
        assert_eq!(n.data, Value::Null);
    }

    #[test]
    fn account_update_keeps_resource_specific_fields() {
        let u: AccountUpdate = serde_json::from_str(
            r#"{"id": "acc-1", "status": "running", "followers": 1200}"#,
        )
        .unwrap();
        assert_eq!(u.id.to_string(), "acc-1");
        assert_eq!(u.fields["followers"], 1200);
    }

    #[test]
    fn envelope_reads_list_responses() {
        let env: ApiEnvelope<Vec<u32>> =
            serde_json::from_str(r#"{"list": [1, 2], "total": 2}"#).unwrap();
        assert!(env.success);
        assert_eq!(env.data, Some(vec![1, 2]));
        assert_eq!(env.total, Some(2));
    }
}
