use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{error::Result, notification::model::PushSubscription};

pub const DEFAULT_TITLE: &str = "Notification";
pub const DEFAULT_BODY: &str = "New message";
pub const ICON: &str = "/icons/icon-192x192.png";
pub const BADGE: &str = "/icons/icon-72x72.png";
pub const ACTION_OPEN: &str = "open";
pub const ACTION_CLOSE: &str = "close";
const DEFAULT_TARGET: &str = "/";

#[derive(Debug, Default, Deserialize)]
struct PushPayload {
    title: Option<String>,
    body: Option<String>,
    data: Option<Value>,
    tag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationOptions {
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub actions: Vec<NotificationAction>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayNotification {
    pub title: String,
    pub options: NotificationOptions,
}

impl DisplayNotification {
    /// Where a click should take the user.
    pub fn target_url(&self) -> &str {
        self.options
            .data
            .get("url")
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
            .unwrap_or(DEFAULT_TARGET)
    }
}

/// Turns raw push data into something displayable. Missing, non-JSON or
/// non-object data falls back to the default title and body.
pub fn decode_push(data: Option<&[u8]>) -> DisplayNotification {
    let payload = match data.map(serde_json::from_slice::<PushPayload>) {
        Some(Ok(payload)) => payload,
        Some(Err(e)) => {
            warn!(error = %e, "Push without valid JSON");
            PushPayload::default()
        }
        None => PushPayload::default(),
    };

    let non_empty = |s: Option<String>| s.filter(|s| !s.is_empty());
    DisplayNotification {
        title: non_empty(payload.title).unwrap_or_else(|| DEFAULT_TITLE.to_string()),
        options: NotificationOptions {
            body: non_empty(payload.body).unwrap_or_else(|| DEFAULT_BODY.to_string()),
            icon: ICON.to_string(),
            badge: BADGE.to_string(),
            data: payload
                .data
                .filter(|d| !d.is_null())
                .unwrap_or_else(|| Value::Object(Default::default())),
            tag: non_empty(payload.tag),
            actions: vec![
                NotificationAction {
                    action: ACTION_OPEN.into(),
                    title: "Open".into(),
                },
                NotificationAction {
                    action: ACTION_CLOSE.into(),
                    title: "Close".into(),
                },
            ],
        },
    }
}

/// The platform's notification tray.
#[async_trait]
pub trait NotificationHost: Send + Sync {
    async fn show_notification(&self, notification: &DisplayNotification) -> Result<()>;
    async fn close_notification(&self, notification: &DisplayNotification);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowClient {
    pub id: String,
    pub url: String,
    pub focusable: bool,
}

/// Open windows controlled by the worker.
#[async_trait]
pub trait WindowClients: Send + Sync {
    async fn match_windows(&self) -> Vec<WindowClient>;
    async fn focus(&self, id: &str) -> Result<()>;
    async fn open_window(&self, url: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionOptions {
    pub user_visible_only: bool,
    pub application_server_key: String,
}

#[async_trait]
pub trait PushManager: Send + Sync {
    async fn subscribe(&self, options: &SubscriptionOptions) -> Result<PushSubscription>;
}

/// Hands a fresh subscription back to the relay.
#[async_trait]
pub trait SubscriptionForwarder: Send + Sync {
    async fn forward(&self, subscription: &PushSubscription) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct NotificationClick {
    pub notification: DisplayNotification,
    pub action: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    Dismissed,
    Focused(String),
    Opened(String),
}

pub struct PushReceiver {
    host: Arc<dyn NotificationHost>,
    clients: Arc<dyn WindowClients>,
    push_manager: Arc<dyn PushManager>,
    forwarder: Arc<dyn SubscriptionForwarder>,
    application_server_key: Option<String>,
}

impl PushReceiver {
    pub fn new(
        host: Arc<dyn NotificationHost>,
        clients: Arc<dyn WindowClients>,
        push_manager: Arc<dyn PushManager>,
        forwarder: Arc<dyn SubscriptionForwarder>,
    ) -> Self {
        PushReceiver {
            host,
            clients,
            push_manager,
            forwarder,
            application_server_key: None,
        }
    }

    /// Relay public key used when the platform gives no previous options.
    pub fn with_application_server_key(mut self, key: impl Into<String>) -> Self {
        self.application_server_key = Some(key.into());
        self
    }

    pub async fn on_push(&self, data: Option<&[u8]>) -> Result<DisplayNotification> {
        debug!(bytes = data.map_or(0, <[u8]>::len), "Push received");
        let notification = decode_push(data);
        self.host.show_notification(&notification).await?;
        Ok(notification)
    }

    pub async fn on_notification_click(&self, click: NotificationClick) -> Result<ClickOutcome> {
        self.host.close_notification(&click.notification).await;
        if click.action.as_deref() == Some(ACTION_CLOSE) {
            return Ok(ClickOutcome::Dismissed);
        }

        let target = click.notification.target_url();
        let windows = self.clients.match_windows().await;
        if let Some(window) = windows
            .iter()
            .find(|w| w.focusable && w.url.contains(target))
        {
            self.clients.focus(&window.id).await?;
            return Ok(ClickOutcome::Focused(window.id.clone()));
        }

        self.clients.open_window(target).await?;
        Ok(ClickOutcome::Opened(target.to_string()))
    }

    /// Re-subscribes after the platform invalidated the subscription and
    /// forwards the new one to the relay. Failures are only logged.
    pub async fn on_subscription_change(
        &self,
        previous: Option<SubscriptionOptions>,
    ) -> Option<PushSubscription> {
        let options = match previous.or_else(|| {
            self.application_server_key
                .clone()
                .map(|key| SubscriptionOptions {
                    user_visible_only: true,
                    application_server_key: key,
                })
        }) {
            Some(options) => options,
            None => {
                warn!("Subscription changed but no options to re-subscribe with");
                return None;
            }
        };

        let subscription = match self.push_manager.subscribe(&options).await {
            Ok(sub) => sub,
            Err(e) => {
                warn!(error = %e, "Re-subscribe failed");
                return None;
            }
        };

        match self.forwarder.forward(&subscription).await {
            Ok(()) => info!("Renewed subscription forwarded to relay"),
            Err(e) => warn!(error = %e, "Could not forward renewed subscription"),
        }
        Some(subscription)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::RelayError;
    use serde_json::json;
    use tokio::sync::Mutex;

    #[derive(Default)]
    pub struct FakeHost {
        pub shown: Mutex<Vec<DisplayNotification>>,
        pub closed: Mutex<usize>,
    }

    #[async_trait]
    impl NotificationHost for FakeHost {
        async fn show_notification(&self, notification: &DisplayNotification) -> Result<()> {
            self.shown.lock().await.push(notification.clone());
            Ok(())
        }

        async fn close_notification(&self, _notification: &DisplayNotification) {
            *self.closed.lock().await += 1;
        }
    }

    #[derive(Default)]
    pub struct FakeClients {
        pub windows: Vec<WindowClient>,
        pub focused: Mutex<Vec<String>>,
        pub opened: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl WindowClients for FakeClients {
        async fn match_windows(&self) -> Vec<WindowClient> {
            self.windows.clone()
        }

        async fn focus(&self, id: &str) -> Result<()> {
            self.focused.lock().await.push(id.to_string());
            Ok(())
        }

        async fn open_window(&self, url: &str) -> Result<()> {
            self.opened.lock().await.push(url.to_string());
            Ok(())
        }
    }

    pub struct FakePushManager {
        pub fail: bool,
        pub seen: Mutex<Vec<SubscriptionOptions>>,
    }

    #[async_trait]
    impl PushManager for FakePushManager {
        async fn subscribe(&self, options: &SubscriptionOptions) -> Result<PushSubscription> {
            self.seen.lock().await.push(options.clone());
            if self.fail {
                return Err(RelayError::Network("push service unavailable".into()));
            }
            Ok(PushSubscription::new("https://push.example/renewed", "p", "a"))
        }
    }

    #[derive(Default)]
    pub struct FakeForwarder {
        pub forwarded: Mutex<Vec<PushSubscription>>,
    }

    #[async_trait]
    impl SubscriptionForwarder for FakeForwarder {
        async fn forward(&self, subscription: &PushSubscription) -> Result<()> {
            self.forwarded.lock().await.push(subscription.clone());
            Ok(())
        }
    }

    struct Rig {
        host: Arc<FakeHost>,
        clients: Arc<FakeClients>,
        manager: Arc<FakePushManager>,
        forwarder: Arc<FakeForwarder>,
        receiver: PushReceiver,
    }

    fn rig(windows: Vec<WindowClient>, manager_fails: bool) -> Rig {
        let host = Arc::new(FakeHost::default());
        let clients = Arc::new(FakeClients {
            windows,
            ..Default::default()
        });
        let manager = Arc::new(FakePushManager {
            fail: manager_fails,
            seen: Mutex::new(Vec::new()),
        });
        let forwarder = Arc::new(FakeForwarder::default());
        let receiver = PushReceiver::new(
            host.clone(),
            clients.clone(),
            manager.clone(),
            forwarder.clone(),
        );
        Rig {
            host,
            clients,
            manager,
            forwarder,
            receiver,
        }
    }

    fn window(id: &str, url: &str) -> WindowClient {
        WindowClient {
            id: id.into(),
            url: url.into(),
            focusable: true,
        }
    }

    #[test]
    fn decodes_full_payload() {
        let raw = json!({
            "title": "Deploy finished",
            "body": "v2 is live",
            "data": { "url": "/releases" },
            "tag": "deploy"
        })
        .to_string();
        let n = decode_push(Some(raw.as_bytes()));
        assert_eq!(n.title, "Deploy finished");
        assert_eq!(n.options.body, "v2 is live");
        assert_eq!(n.options.tag.as_deref(), Some("deploy"));
        assert_eq!(n.target_url(), "/releases");
        assert_eq!(n.options.icon, ICON);
    }

    #[test]
    fn malformed_payload_uses_defaults() {
        for raw in [&b"plain text"[..], b"[1,2]", b"null", b""] {
            let n = decode_push(Some(raw));
            assert_eq!(n.title, DEFAULT_TITLE);
            assert_eq!(n.options.body, DEFAULT_BODY);
            assert_eq!(n.options.data, json!({}));
        }
        assert_eq!(decode_push(None).title, DEFAULT_TITLE);
    }

    #[test]
    fn empty_strings_fall_back() {
        let n = decode_push(Some(br#"{"title":"","body":""}"#.as_slice()));
        assert_eq!(n.title, DEFAULT_TITLE);
        assert_eq!(n.options.body, DEFAULT_BODY);
        assert_eq!(n.target_url(), "/");
    }

    #[tokio::test]
    async fn garbage_push_still_displays() {
        let rig = rig(vec![], false);
        let shown = rig.receiver.on_push(Some(b"\xff\xfe".as_slice())).await.unwrap();
        assert_eq!(shown.title, DEFAULT_TITLE);
        assert_eq!(rig.host.shown.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn click_focuses_matching_window() {
        let rig = rig(
            vec![
                window("a", "https://app.example/"),
                window("b", "https://app.example/releases"),
            ],
            false,
        );
        let notification = decode_push(Some(br#"{"data":{"url":"/releases"}}"#.as_slice()));
        let outcome = rig
            .receiver
            .on_notification_click(NotificationClick {
                notification,
                action: None,
            })
            .await
            .unwrap();
        assert_eq!(outcome, ClickOutcome::Focused("b".into()));
        assert_eq!(*rig.host.closed.lock().await, 1);
        assert!(rig.clients.opened.lock().await.is_empty());
    }

    #[tokio::test]
    async fn click_opens_window_when_none_match() {
        let rig = rig(vec![window("a", "https://app.example/")], false);
        let notification = decode_push(Some(br#"{"data":{"url":"/posts/7"}}"#.as_slice()));
        let outcome = rig
            .receiver
            .on_notification_click(NotificationClick {
                notification,
                action: Some(ACTION_OPEN.into()),
            })
            .await
            .unwrap();
        assert_eq!(outcome, ClickOutcome::Opened("/posts/7".into()));
        assert_eq!(*rig.clients.opened.lock().await, ["/posts/7"]);
    }

    #[tokio::test]
    async fn close_action_only_dismisses() {
        let rig = rig(vec![window("a", "https://app.example/")], false);
        let outcome = rig
            .receiver
            .on_notification_click(NotificationClick {
                notification: decode_push(None),
                action: Some(ACTION_CLOSE.into()),
            })
            .await
            .unwrap();
        assert_eq!(outcome, ClickOutcome::Dismissed);
        assert_eq!(*rig.host.closed.lock().await, 1);
        assert!(rig.clients.focused.lock().await.is_empty());
    }

    #[tokio::test]
    async fn subscription_change_resubscribes_and_forwards() {
        let rig = rig(vec![], false);
        let previous = SubscriptionOptions {
            user_visible_only: true,
            application_server_key: "BKey".into(),
        };
        let renewed = rig
            .receiver
            .on_subscription_change(Some(previous.clone()))
            .await
            .unwrap();
        assert_eq!(renewed.endpoint, "https://push.example/renewed");
        assert_eq!(*rig.manager.seen.lock().await, [previous]);
        assert_eq!(rig.forwarder.forwarded.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn subscription_change_failure_is_logged_only() {
        let rig = rig(vec![], true);
        let receiver = rig.receiver.with_application_server_key("BRelayKey");
        assert!(receiver.on_subscription_change(None).await.is_none());
        assert_eq!(
            rig.manager.seen.lock().await[0].application_server_key,
            "BRelayKey"
        );
        assert!(rig.forwarder.forwarded.lock().await.is_empty());
    }

    #[tokio::test]
    async fn subscription_change_without_any_options_gives_up() {
        let rig = rig(vec![], false);
        assert!(rig.receiver.on_subscription_change(None).await.is_none());
        assert!(rig.manager.seen.lock().await.is_empty());
    }
}
