use async_trait::async_trait;
use tokio::sync::RwLock;

use super::model::PushSubscription;

/// Where the relay keeps subscriptions. Endpoints are unique within a store.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Inserts the subscription, or refreshes the stored one with the same
    /// endpoint. Returns `true` when a new entry was created.
    async fn add(&self, subscription: PushSubscription) -> bool;

    async fn list(&self) -> Vec<PushSubscription>;

    async fn remove_by_endpoint(&self, endpoint: &str) -> bool;

    async fn len(&self) -> usize {
        self.list().await.len()
    }
}

/// Process-lifetime store, lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    subscriptions: RwLock<Vec<PushSubscription>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn add(&self, subscription: PushSubscription) -> bool {
        let mut subs = self.subscriptions.write().await;
        match subs.iter_mut().find(|s| s.endpoint == subscription.endpoint) {
            Some(existing) => {
                *existing = subscription;
                false
            }
            None => {
                subs.push(subscription);
                true
            }
        }
    }

    async fn list(&self) -> Vec<PushSubscription> {
        self.subscriptions.read().await.clone()
    }

    async fn remove_by_endpoint(&self, endpoint: &str) -> bool {
        let mut subs = self.subscriptions.write().await;
        let before = subs.len();
        subs.retain(|s| s.endpoint != endpoint);
        subs.len() != before
    }

    async fn len(&self) -> usize {
        self.subscriptions.read().await.len()
    }
}
