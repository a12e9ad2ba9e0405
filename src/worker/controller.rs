use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, info, warn};
use url::Url;

use super::{
    cache::CacheStorage,
    model::{FetchRequest, FetchResponse, Method},
};
use crate::error::{RelayError, Result};

pub const PRECACHE_PREFIX: &str = "pwa-cache";
pub const RUNTIME_PREFIX: &str = "pwa-runtime-cache";
pub const OFFLINE_PATH: &str = "/offline.html";
pub const API_PREFIX: &str = "/api/";
pub const DATA_ORIGIN: &str = "https://jsonplaceholder.typicode.com";

pub const APP_SHELL: &[&str] = &[
    "/",
    "/index.html",
    "/styles.css",
    "/app.js",
    "/manifest.json",
    OFFLINE_PATH,
];

pub const OFFLINE_PAGE: &str = "<!DOCTYPE html>\
<html lang=\"en\"><head><meta charset=\"utf-8\">\
<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
<title>Offline</title></head>\
<body><h1>You are offline</h1>\
<p>This content is not available without a connection. Try again once you are back online.</p>\
</body></html>";

/// Performs real network fetches for the worker.
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse>;
}

#[derive(Debug, Clone)]
pub struct CachePolicy {
    pub precache_name: String,
    pub runtime_name: String,
    /// App-shell entries, resolved against `scope`.
    pub manifest: Vec<String>,
    pub scope: Url,
    /// Served network-first; `None` disables the rule.
    pub data_origin: Option<Url>,
    pub api_prefix: String,
    pub offline_path: String,
}

impl CachePolicy {
    pub fn new(scope: Url) -> Self {
        Self::versioned(scope, 1)
    }

    pub fn versioned(scope: Url, version: u32) -> Self {
        CachePolicy {
            precache_name: format!("{PRECACHE_PREFIX}-v{version}"),
            runtime_name: format!("{RUNTIME_PREFIX}-v{version}"),
            manifest: APP_SHELL.iter().map(|s| s.to_string()).collect(),
            scope,
            data_origin: Url::parse(DATA_ORIGIN).ok(),
            api_prefix: API_PREFIX.to_string(),
            offline_path: OFFLINE_PATH.to_string(),
        }
    }

    pub fn with_manifest<I, S>(mut self, manifest: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.manifest = manifest.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_data_origin(mut self, origin: Option<Url>) -> Self {
        self.data_origin = origin;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Passthrough,
    NetworkFirst,
    CacheFirst,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interception {
    /// Not handled; the runtime performs its default fetch.
    Passthrough,
    Respond(FetchResponse),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub cached: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub skipped: Vec<String>,
}

pub struct CacheController {
    policy: CachePolicy,
    caches: Arc<CacheStorage>,
    network: Arc<dyn Network>,
}

impl CacheController {
    pub fn new(policy: CachePolicy, caches: Arc<CacheStorage>, network: Arc<dyn Network>) -> Self {
        CacheController {
            policy,
            caches,
            network,
        }
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    pub fn caches(&self) -> &Arc<CacheStorage> {
        &self.caches
    }

    /// Precaches the manifest. Every asset is fetched independently and a
    /// failed asset never fails the install.
    pub async fn install(&self) -> InstallReport {
        let cache = self.caches.open(&self.policy.precache_name).await;
        let mut report = InstallReport::default();

        let mut targets = Vec::new();
        for entry in &self.policy.manifest {
            match self.policy.scope.join(entry) {
                Ok(url) if is_http(&url) => targets.push((entry.clone(), url)),
                _ => {
                    debug!(%entry, "Skipping manifest entry, not http(s)");
                    report.skipped.push(entry.clone());
                }
            }
        }

        let results = join_all(targets.into_iter().map(|(entry, url)| {
            let cache = cache.clone();
            async move {
                let request = FetchRequest::get(url).with_header("Cache-Control", "no-cache");
                let fetched = match self.network.fetch(&request).await {
                    Ok(res) if res.ok() => Ok(res),
                    Ok(res) => Err(RelayError::Network(format!("Bad response {}", res.status))),
                    Err(e) => Err(e),
                };
                match fetched {
                    Ok(res) => {
                        cache.put(&request, res).await;
                        (entry, Ok(()))
                    }
                    Err(e) => (entry, Err(e)),
                }
            }
        }))
        .await;

        for (entry, result) in results {
            match result {
                Ok(()) => report.cached.push(entry),
                Err(e) => {
                    warn!(url = %entry, error = %e, "Service Worker precache failed");
                    report.failed.push((entry, e.to_string()));
                }
            }
        }

        info!(
            cache = %self.policy.precache_name,
            cached = report.cached.len(),
            failed = report.failed.len(),
            "Precache finished"
        );
        report
    }

    /// Deletes every generation except the current precache and runtime
    /// caches. Returns the deleted names.
    pub async fn activate(&self) -> Vec<String> {
        let stale: Vec<String> = self
            .caches
            .keys()
            .await
            .into_iter()
            .filter(|name| *name != self.policy.precache_name && *name != self.policy.runtime_name)
            .collect();
        for name in &stale {
            self.caches.delete(name).await;
            info!(cache = %name, "Deleted stale cache");
        }
        stale
    }

    pub fn strategy_for(&self, request: &FetchRequest) -> Strategy {
        if request.method != Method::Get || !is_http(&request.url) {
            return Strategy::Passthrough;
        }
        if request.url.path().starts_with(&self.policy.api_prefix) {
            return Strategy::Passthrough;
        }
        let origin = request.url.origin();
        if self
            .policy
            .data_origin
            .as_ref()
            .is_some_and(|data| data.origin() == origin)
        {
            return Strategy::NetworkFirst;
        }
        if self.policy.scope.origin() == origin {
            return Strategy::CacheFirst;
        }
        Strategy::Passthrough
    }

    pub async fn handle_fetch(&self, request: &FetchRequest) -> Interception {
        match self.strategy_for(request) {
            Strategy::Passthrough => Interception::Passthrough,
            Strategy::NetworkFirst => Interception::Respond(self.network_first(request).await),
            Strategy::CacheFirst => Interception::Respond(self.cache_first(request).await),
        }
    }

    async fn network_first(&self, request: &FetchRequest) -> FetchResponse {
        match self.network.fetch(request).await {
            Ok(res) => {
                if res.ok() {
                    self.store_runtime(request, res.clone()).await;
                }
                res
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Network failed, trying cache");
                match self.caches.match_request(request).await {
                    Some(cached) => cached,
                    None => self.offline_fallback().await,
                }
            }
        }
    }

    async fn cache_first(&self, request: &FetchRequest) -> FetchResponse {
        if let Some(cached) = self.caches.match_request(request).await {
            return cached;
        }
        match self.network.fetch(request).await {
            Ok(res) => {
                if res.ok() {
                    self.store_runtime(request, res.clone()).await;
                }
                res
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Network failed with no cached copy");
                self.offline_fallback().await
            }
        }
    }

    async fn store_runtime(&self, request: &FetchRequest, response: FetchResponse) {
        self.caches
            .open(&self.policy.runtime_name)
            .await
            .put(request, response)
            .await;
    }

    /// Cached offline page if precached, otherwise the built-in one.
    pub async fn offline_fallback(&self) -> FetchResponse {
        match self.cached_offline_page().await {
            Ok(page) => page,
            Err(e) => {
                debug!(error = %e, "Serving built-in offline page");
                FetchResponse::html(200, OFFLINE_PAGE)
            }
        }
    }

    async fn cached_offline_page(&self) -> Result<FetchResponse> {
        let url = self
            .policy
            .scope
            .join(&self.policy.offline_path)
            .map_err(|e| RelayError::NotFound(format!("offline page url: {e}")))?;
        self.caches
            .match_url(&url)
            .await
            .ok_or_else(|| RelayError::NotFound(url.to_string()))
    }
}

fn is_http(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}
