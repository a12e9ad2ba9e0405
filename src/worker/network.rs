use async_trait::async_trait;
use serde_json::json;
use url::Url;

use super::{
    controller::Network,
    model::{FetchRequest, FetchResponse},
    push::SubscriptionForwarder,
};
use crate::{
    error::{RelayError, Result},
    http_client::HttpClient,
    notification::model::PushSubscription,
};

/// `Network` over the crate's HTTP/1.1 client.
#[derive(Clone)]
pub struct HttpNetwork {
    client: HttpClient,
}

impl HttpNetwork {
    pub fn new(client: HttpClient) -> Self {
        HttpNetwork { client }
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
        let res = self
            .client
            .fetch(request.method.as_str(), &request.url, &request.headers, None)
            .await?;
        Ok(res.into())
    }
}

/// Posts renewed subscriptions to the relay's `/subscribe` endpoint.
#[derive(Clone)]
pub struct HttpForwarder {
    client: HttpClient,
    subscribe_url: Url,
}

impl HttpForwarder {
    pub fn new(client: HttpClient, relay: &Url) -> Result<Self> {
        let subscribe_url = relay
            .join("subscribe")
            .map_err(|e| RelayError::Configuration(format!("relay url: {e}")))?;
        Ok(HttpForwarder {
            client,
            subscribe_url,
        })
    }

    pub fn subscribe_url(&self) -> &Url {
        &self.subscribe_url
    }
}

#[async_trait]
impl SubscriptionForwarder for HttpForwarder {
    async fn forward(&self, subscription: &PushSubscription) -> Result<()> {
        let res = self
            .client
            .post_json(&self.subscribe_url, &json!({ "subscription": subscription }))
            .await?;
        if !res.ok() {
            return Err(RelayError::Delivery(format!(
                "relay answered {} to subscribe",
                res.status
            )));
        }
        Ok(())
    }
}
