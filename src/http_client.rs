use std::collections::HashMap;

use serde::Serialize;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
};
use tracing::debug;
use url::Url;

use crate::error::{RelayError, Result};

/// Minimal HTTP/1.1 client: one request per connection, TLS for https.
#[derive(Clone)]
pub struct HttpClient {
    tls: tokio_native_tls::TlsConnector,
}

impl HttpClient {
    pub fn new() -> Result<Self> {
        let tls_connector = native_tls::TlsConnector::new()
            .map_err(|e| RelayError::Configuration(format!("error init tls: {e}")))?;
        Ok(HttpClient {
            tls: tokio_native_tls::TlsConnector::from(tls_connector),
        })
    }

    pub async fn fetch(
        &self,
        method: &str,
        url: &Url,
        headers: &HashMap<String, String>,
        body: Option<&[u8]>,
    ) -> Result<Response> {
        let host = url
            .host_str()
            .ok_or_else(|| RelayError::Network(format!("error url host: {url}")))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| RelayError::Network(format!("error url port: {url}")))?;
        let request = build_request(method, url, headers, body);

        let conn = TcpStream::connect((host, port))
            .await
            .map_err(|e| RelayError::Network(format!("Failed to connect to {url}: {e}")))?;

        let raw = match url.scheme() {
            "https" => {
                let stream = self
                    .tls
                    .connect(host, conn)
                    .await
                    .map_err(|e| RelayError::Network(format!("TLS Handshake failed: {e}")))?;
                exchange(stream, &request).await?
            }
            "http" => exchange(conn, &request).await?,
            other => {
                return Err(RelayError::Network(format!("unsupported scheme {other}")));
            }
        };

        let response = Response::parse(&raw)?;
        debug!(%url, method, status = response.status, "fetched");
        Ok(response)
    }

    pub async fn post_json<T: Serialize>(&self, url: &Url, body: &T) -> Result<Response> {
        let body = serde_json::to_vec(body)
            .map_err(|e| RelayError::Validation(format!("error serialize: {e}")))?;
        let headers = HashMap::from([(
            "Content-Type".to_string(),
            "application/json".to_string(),
        )]);
        self.fetch("POST", url, &headers, Some(&body)).await
    }
}

fn build_request(
    method: &str,
    url: &Url,
    headers: &HashMap<String, String>,
    body: Option<&[u8]>,
) -> Vec<u8> {
    let full_path = match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    };
    let host = match url.port() {
        Some(port) => format!("{}:{}", url.host_str().unwrap_or_default(), port),
        None => url.host_str().unwrap_or_default().to_string(),
    };

    let mut head = format!("{method} {full_path} HTTP/1.1\r\nHost: {host}\r\n");
    for (name, value) in headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    if let Some(body) = body {
        head.push_str(&format!("Content-Length: {}\r\n", body.len()));
    }
    head.push_str("Connection: close\r\n\r\n");

    let mut request = head.into_bytes();
    if let Some(body) = body {
        request.extend_from_slice(body);
    }
    request
}

async fn exchange<S>(mut stream: S, request: &[u8]) -> Result<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(request).await?;
    stream.flush().await?;
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await?;
    Ok(response)
}

#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let split = raw
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .ok_or_else(|| RelayError::Network("Headline Error".into()))?;
        let head = String::from_utf8_lossy(&raw[..split]);
        let rest = &raw[split + 4..];

        let mut head_line = head.lines();
        let first = head_line
            .next()
            .ok_or_else(|| RelayError::Network("Empty Response".into()))?;
        let mut parts = first.split_whitespace();
        let _http = parts
            .next()
            .ok_or_else(|| RelayError::Network("Missing Http".into()))?;
        let status = parts
            .next()
            .and_then(|s| s.parse::<u16>().ok())
            .ok_or_else(|| RelayError::Network(format!("No Status Code in {first:?}")))?;

        let mut headers = HashMap::new();
        for line in head_line {
            if let Some((k, v)) = line.split_once(':') {
                headers.insert(k.trim().to_lowercase(), v.trim().to_string());
            }
        }

        let chunked = headers
            .get("transfer-encoding")
            .is_some_and(|te| te.eq_ignore_ascii_case("chunked"));
        let body = if chunked {
            decode_chunked(rest)?
        } else {
            rest.to_vec()
        };

        Ok(Response {
            status,
            headers,
            body,
        })
    }

    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

fn decode_chunked(mut data: &[u8]) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    loop {
        let line_end = data
            .windows(2)
            .position(|w| w == b"\r\n")
            .ok_or_else(|| RelayError::Network("truncated chunk header".into()))?;
        let size_line = String::from_utf8_lossy(&data[..line_end]);
        let size_hex = size_line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_hex, 16)
            .map_err(|_| RelayError::Network(format!("bad chunk size {size_hex:?}")))?;
        data = &data[line_end + 2..];
        if size == 0 {
            return Ok(body);
        }
        if data.len() < size {
            return Err(RelayError::Network("truncated chunk".into()));
        }
        body.extend_from_slice(&data[..size]);
        data = data.get(size + 2..).unwrap_or_default();
    }
}
