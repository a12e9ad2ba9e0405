use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::error::{RelayError, Result};

pub const DEFAULT_TITLE: &str = "My PWA";
pub const DEFAULT_BODY: &str = "Message from the server";
const ENDPOINT_PREVIEW_LEN: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSubscription {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_time: Option<u64>, // nullable in JSON
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys: Option<PushSubscriptionKeys>,
}

impl PushSubscription {
    pub fn new(endpoint: impl Into<String>, p256dh: impl Into<String>, auth: impl Into<String>) -> Self {
        PushSubscription {
            endpoint: endpoint.into(),
            expiration_time: None,
            keys: Some(PushSubscriptionKeys {
                p256dh: p256dh.into(),
                auth: auth.into(),
            }),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(RelayError::Validation(
                "Subscription must have an endpoint".into(),
            ));
        }
        Ok(())
    }

    /// Checks the subscription can actually be pushed to.
    pub fn deliverable(&self) -> Result<&PushSubscriptionKeys> {
        let url = Url::parse(&self.endpoint)
            .map_err(|e| RelayError::Delivery(format!("invalid endpoint: {e}")))?;
        if url.scheme() != "https" && url.scheme() != "http" {
            return Err(RelayError::Delivery(format!(
                "unsupported endpoint scheme: {}",
                url.scheme()
            )));
        }
        self.keys
            .as_ref()
            .ok_or_else(|| RelayError::Delivery("subscription has no encryption keys".into()))
    }

    pub fn endpoint_preview(&self) -> String {
        if self.endpoint.is_empty() {
            return "N/A".to_string();
        }
        let head: String = self.endpoint.chars().take(ENDPOINT_PREVIEW_LEN).collect();
        format!("{head}...")
    }
}

/// What the page posts to `/subscribe`.
#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub subscription: Option<PushSubscription>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SendRequest {
    pub subscription: Option<PushSubscription>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    pub data: Value,
}

impl NotificationPayload {
    pub fn new(title: Option<String>, body: Option<String>, data: Option<Value>) -> Self {
        NotificationPayload {
            title: title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            body: body.unwrap_or_else(|| DEFAULT_BODY.to_string()),
            data: data.unwrap_or_else(|| Value::Object(Default::default())),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| RelayError::Validation(format!("payload is not serializable: {e}")))
    }
}

impl Default for NotificationPayload {
    fn default() -> Self {
        NotificationPayload::new(None, None, None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionSummary {
    pub id: usize,
    pub endpoint: String,
    pub keys: &'static str,
}

impl SubscriptionSummary {
    pub fn of(id: usize, sub: &PushSubscription) -> Self {
        SubscriptionSummary {
            id,
            endpoint: sub.endpoint_preview(),
            keys: if sub.keys.is_some() { "present" } else { "missing" },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionListing {
    pub count: usize,
    pub subscriptions: Vec<SubscriptionSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryOutcome {
    pub idx: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub status: DeliveryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeliveryOutcome {
    pub fn ok(idx: usize, sub: &PushSubscription) -> Self {
        DeliveryOutcome {
            idx,
            endpoint: Some(sub.endpoint_preview()),
            status: DeliveryStatus::Ok,
            error: None,
        }
    }

    pub fn failed(idx: usize, err: &RelayError) -> Self {
        DeliveryOutcome {
            idx,
            endpoint: None,
            status: DeliveryStatus::Error,
            error: Some(err.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == DeliveryStatus::Ok
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub success: bool,
    pub message: String,
    pub results: Vec<DeliveryOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_browser_subscription_json() {
        let sub: PushSubscription = serde_json::from_value(json!({
            "endpoint": "https://fcm.googleapis.com/fcm/send/abc",
            "expirationTime": null,
            "keys": { "p256dh": "BFFG", "auth": "gN0P" }
        }))
        .unwrap();
        assert_eq!(sub.endpoint, "https://fcm.googleapis.com/fcm/send/abc");
        assert_eq!(sub.keys.unwrap().auth, "gN0P");
    }

    #[test]
    fn missing_endpoint_is_a_validation_error() {
        let sub: PushSubscription = serde_json::from_value(json!({ "keys": null })).unwrap();
        assert!(matches!(sub.validate(), Err(RelayError::Validation(_))));
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        let sub = PushSubscription::new(format!("https://push.example/{}", "é".repeat(60)), "p", "a");
        let preview = sub.endpoint_preview();
        assert!(preview.ends_with("..."));
        assert_eq!(preview.chars().count(), ENDPOINT_PREVIEW_LEN + 3);
    }

    #[test]
    fn summary_flags_missing_keys() {
        let sub = PushSubscription {
            endpoint: "https://push.example/1".into(),
            expiration_time: None,
            keys: None,
        };
        assert_eq!(SubscriptionSummary::of(3, &sub).keys, "missing");
    }

    #[test]
    fn payload_defaults() {
        let payload = NotificationPayload::default();
        assert_eq!(payload.title, DEFAULT_TITLE);
        assert_eq!(payload.body, DEFAULT_BODY);
        assert_eq!(payload.data, json!({}));
    }

    #[test]
    fn outcome_serializes_status_lowercase() {
        let err = RelayError::Delivery("410 Gone".into());
        let value = serde_json::to_value(DeliveryOutcome::failed(2, &err)).unwrap();
        assert_eq!(value, json!({ "idx": 2, "status": "error", "error": "Delivery failed: 410 Gone" }));
    }

    #[test]
    fn non_http_endpoint_is_not_deliverable() {
        let sub = PushSubscription::new("not a url", "p", "a");
        assert!(matches!(sub.deliverable(), Err(RelayError::Delivery(_))));
    }
}
