use std::collections::HashMap;

use url::Url;

use crate::http_client;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HashMap<String, String>,
}

impl FetchRequest {
    pub fn new(method: Method, url: Url) -> Self {
        FetchRequest {
            method,
            url,
            headers: HashMap::new(),
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Entries are keyed by URL without fragment.
    pub fn cache_key(&self) -> String {
        cache_key(&self.url)
    }
}

pub fn cache_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.to_string()
}

/// Snapshot of a response. Storing one in a cache takes a clone, the caller
/// keeps the original.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        FetchResponse {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn html(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self::new(status, body).with_header("content-type", "text/html; charset=utf-8")
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_lowercase(), value.into());
        self
    }

    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(String::as_str)
    }
}

impl From<http_client::Response> for FetchResponse {
    fn from(res: http_client::Response) -> Self {
        FetchResponse {
            status: res.status,
            headers: res.headers,
            body: res.body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_drops_fragment() {
        let req = FetchRequest::get(Url::parse("https://app.example/index.html#top").unwrap());
        assert_eq!(req.cache_key(), "https://app.example/index.html");
    }

    #[test]
    fn html_response_is_typed() {
        let res = FetchResponse::html(200, "<p>hi</p>");
        assert!(res.ok());
        assert_eq!(res.content_type(), Some("text/html; charset=utf-8"));
    }
}
