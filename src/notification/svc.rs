use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, info, warn};
use web_push::{
    ContentEncoding, IsahcWebPushClient, SubscriptionInfo, SubscriptionKeys, VapidSignatureBuilder,
    WebPushClient, WebPushMessageBuilder,
};

use super::{
    keys::{KeyProvider, VapidKeys},
    model::{
        DeliveryOutcome, DispatchReport, NotificationPayload, PushSubscription,
        SubscriptionListing, SubscriptionSummary,
    },
    store::SubscriptionStore,
};
use crate::error::{RelayError, Result};

/// One push attempt to one subscription.
#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &[u8],
        keys: &VapidKeys,
        subject: &str,
    ) -> Result<()>;
}

/// Delivers through the push service named by the subscription endpoint,
/// encrypted with aes128gcm and signed with the VAPID private key.
pub struct WebPushSender {
    client: IsahcWebPushClient,
    ttl: u32,
}

impl WebPushSender {
    pub fn new(ttl: u32) -> Result<Self> {
        let client = IsahcWebPushClient::new()
            .map_err(|e| RelayError::Configuration(format!("push client: {e}")))?;
        Ok(WebPushSender { client, ttl })
    }
}

#[async_trait]
impl PushSender for WebPushSender {
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &[u8],
        keys: &VapidKeys,
        subject: &str,
    ) -> Result<()> {
        let sub_keys = subscription.deliverable()?;
        let sub = SubscriptionInfo {
            endpoint: subscription.endpoint.clone(),
            keys: SubscriptionKeys {
                p256dh: sub_keys.p256dh.clone(),
                auth: sub_keys.auth.clone(),
            },
        };

        let mut signature = VapidSignatureBuilder::from_base64(&keys.private_key, &sub)
            .map_err(|e| RelayError::Configuration(format!("VAPID private key: {e}")))?;
        signature.add_claim("sub", subject.to_string());
        let signature = signature
            .build()
            .map_err(|e| RelayError::Delivery(e.to_string()))?;

        let mut msg = WebPushMessageBuilder::new(&sub);
        msg.set_payload(ContentEncoding::Aes128Gcm, payload);
        msg.set_vapid_signature(signature);
        msg.set_ttl(self.ttl);
        let msg = msg.build().map_err(|e| RelayError::Delivery(e.to_string()))?;

        self.client
            .send(msg)
            .await
            .map_err(|e| RelayError::Delivery(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub created: bool,
    pub total: usize,
}

/// Fans a notification out to stored subscriptions. Store, keys and sender
/// are injected so any of them can be swapped without touching dispatch.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn SubscriptionStore>,
    keys: Arc<KeyProvider>,
    sender: Arc<dyn PushSender>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        keys: Arc<KeyProvider>,
        sender: Arc<dyn PushSender>,
    ) -> Self {
        Dispatcher { store, keys, sender }
    }

    pub fn keys(&self) -> &KeyProvider {
        &self.keys
    }

    pub async fn register(&self, subscription: PushSubscription) -> Result<Registration> {
        subscription.validate()?;
        let endpoint = subscription.endpoint.clone();
        let created = self.store.add(subscription).await;
        let total = self.store.len().await;
        if created {
            info!(total, "New subscription saved");
        } else {
            debug!(%endpoint, total, "Subscription already known, refreshed");
        }
        Ok(Registration { created, total })
    }

    pub async fn list_subscriptions(&self) -> SubscriptionListing {
        let subs = self.store.list().await;
        SubscriptionListing {
            count: subs.len(),
            subscriptions: subs
                .iter()
                .enumerate()
                .map(|(id, sub)| SubscriptionSummary::of(id, sub))
                .collect(),
        }
    }

    /// Sends to every stored subscription at once. A failing subscriber only
    /// marks its own entry; results are in store order.
    pub async fn dispatch(&self, payload: &NotificationPayload) -> Result<DispatchReport> {
        let keys = self.keys.keys()?;
        let body = payload.to_bytes()?;
        let subs = self.store.list().await;

        let results = join_all(
            subs.iter()
                .enumerate()
                .map(|(idx, sub)| self.deliver(idx, sub, &body, keys)),
        )
        .await;

        let delivered = results.iter().filter(|r| r.is_ok()).count();
        info!(total = subs.len(), delivered, "Notification dispatched");

        Ok(DispatchReport {
            success: true,
            message: format!("Sent to {} subscribers", subs.len()),
            results,
        })
    }

    pub async fn dispatch_to_one(
        &self,
        subscription: &PushSubscription,
        payload: &NotificationPayload,
    ) -> Result<DeliveryOutcome> {
        subscription.validate()?;
        let keys = self.keys.keys()?;
        let body = payload.to_bytes()?;
        Ok(self.deliver(0, subscription, &body, keys).await)
    }

    async fn deliver(
        &self,
        idx: usize,
        sub: &PushSubscription,
        body: &[u8],
        keys: &VapidKeys,
    ) -> DeliveryOutcome {
        let sent = match sub.deliverable() {
            Ok(_) => {
                self.sender
                    .send(sub, body, keys, self.keys.subject())
                    .await
            }
            Err(e) => Err(e),
        };
        match sent {
            Ok(()) => {
                debug!(idx, "Notification sent");
                DeliveryOutcome::ok(idx, sub)
            }
            Err(e) => {
                warn!(idx, error = %e, "Error sending notification");
                DeliveryOutcome::failed(idx, &e)
            }
        }
    }
}
