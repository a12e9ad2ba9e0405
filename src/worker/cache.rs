use std::{collections::HashMap, sync::Arc};

use tokio::sync::RwLock;

use super::model::{FetchRequest, FetchResponse, cache_key};

/// One named cache generation: request URL to response snapshot.
#[derive(Debug, Default)]
pub struct Cache {
    entries: RwLock<HashMap<String, FetchResponse>>,
}

impl Cache {
    pub async fn match_request(&self, request: &FetchRequest) -> Option<FetchResponse> {
        self.match_key(&request.cache_key()).await
    }

    pub async fn match_key(&self, key: &str) -> Option<FetchResponse> {
        self.entries.read().await.get(key).cloned()
    }

    pub async fn put(&self, request: &FetchRequest, response: FetchResponse) {
        self.entries
            .write()
            .await
            .insert(request.cache_key(), response);
    }

    pub async fn delete(&self, request: &FetchRequest) -> bool {
        self.entries
            .write()
            .await
            .remove(&request.cache_key())
            .is_some()
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// All cache generations of one origin, in creation order.
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: RwLock<Vec<(String, Arc<Cache>)>>,
}

impl CacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the named cache, creating it when absent.
    pub async fn open(&self, name: &str) -> Arc<Cache> {
        let mut caches = self.caches.write().await;
        if let Some((_, cache)) = caches.iter().find(|(n, _)| n == name) {
            return cache.clone();
        }
        let cache = Arc::new(Cache::default());
        caches.push((name.to_string(), cache.clone()));
        cache
    }

    pub async fn has(&self, name: &str) -> bool {
        self.caches.read().await.iter().any(|(n, _)| n == name)
    }

    pub async fn delete(&self, name: &str) -> bool {
        let mut caches = self.caches.write().await;
        let before = caches.len();
        caches.retain(|(n, _)| n != name);
        caches.len() != before
    }

    pub async fn keys(&self) -> Vec<String> {
        self.caches
            .read()
            .await
            .iter()
            .map(|(n, _)| n.clone())
            .collect()
    }

    /// First match across every cache, oldest cache first.
    pub async fn match_request(&self, request: &FetchRequest) -> Option<FetchResponse> {
        self.match_key(&request.cache_key()).await
    }

    pub async fn match_url(&self, url: &url::Url) -> Option<FetchResponse> {
        self.match_key(&cache_key(url)).await
    }

    async fn match_key(&self, key: &str) -> Option<FetchResponse> {
        let caches: Vec<Arc<Cache>> = self
            .caches
            .read()
            .await
            .iter()
            .map(|(_, c)| c.clone())
            .collect();
        for cache in caches {
            if let Some(hit) = cache.match_key(key).await {
                return Some(hit);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn req(path: &str) -> FetchRequest {
        FetchRequest::get(Url::parse("https://app.example/").unwrap().join(path).unwrap())
    }

    #[tokio::test]
    async fn open_is_idempotent() {
        let storage = CacheStorage::new();
        let a = storage.open("v1").await;
        a.put(&req("/a"), FetchResponse::new(200, "a")).await;
        let again = storage.open("v1").await;
        assert_eq!(again.len().await, 1);
        assert_eq!(storage.keys().await, ["v1"]);
    }

    #[tokio::test]
    async fn match_searches_in_creation_order() {
        let storage = CacheStorage::new();
        storage
            .open("old")
            .await
            .put(&req("/x"), FetchResponse::new(200, "old"))
            .await;
        storage
            .open("new")
            .await
            .put(&req("/x"), FetchResponse::new(200, "new"))
            .await;
        let hit = storage.match_request(&req("/x")).await.unwrap();
        assert_eq!(hit.body, b"old");
        assert!(storage.match_request(&req("/y")).await.is_none());
    }

    #[tokio::test]
    async fn delete_drops_whole_generation() {
        let storage = CacheStorage::new();
        storage.open("v1").await;
        assert!(storage.delete("v1").await);
        assert!(!storage.has("v1").await);
        assert!(!storage.delete("v1").await);
    }

    #[tokio::test]
    async fn entry_delete() {
        let cache = Cache::default();
        cache.put(&req("/a"), FetchResponse::new(200, "a")).await;
        assert!(cache.delete(&req("/a")).await);
        assert!(cache.is_empty().await);
    }
}
