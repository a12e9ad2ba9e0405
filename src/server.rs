use std::sync::Arc;

use anyhow::{Context, Result};
use request_http_parser::parser::{Method, Request};
use serde::Serialize;
use serde_json::json;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpListener,
    sync::oneshot::Receiver,
};
use tracing::{debug, error, info, warn};

use crate::{
    error::RelayError,
    notification::{
        model::{NotificationPayload, SendRequest, SubscribeRequest},
        svc::Dispatcher,
    },
};

pub const MAX_REQUEST_SIZE: usize = 16 * 1024;
const READ_CHUNK: usize = 4096;

pub const CORS_HEADERS: &str = "Access-Control-Allow-Origin: *\r\n\
            Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
            Access-Control-Allow-Headers: Content-Type, Authorization\r\n\
            Access-Control-Max-Age: 86400\r\n";

/// Everything the handlers share for the life of the process.
pub struct AppState {
    pub dispatcher: Dispatcher,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn json<T: Serialize>(status: u16, body: &T) -> Self {
        match serde_json::to_string(body) {
            Ok(body) => HttpResponse { status, body },
            Err(e) => {
                error!(error = %e, "Failed to serialize response");
                Self::error(500, "Internal server error")
            }
        }
    }

    pub fn error(status: u16, message: &str) -> Self {
        HttpResponse {
            status,
            body: json!({ "error": message }).to_string(),
        }
    }

    pub fn from_error(err: &RelayError) -> Self {
        Self::error(err.status(), &err.to_string())
    }

    pub fn no_content() -> Self {
        HttpResponse {
            status: 204,
            body: String::new(),
        }
    }

    pub fn to_http(&self) -> String {
        let content_type = if self.body.is_empty() {
            ""
        } else {
            "Content-Type: application/json\r\n"
        };
        format!(
            "HTTP/1.1 {} {}\r\n{}{}Content-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.status,
            reason(self.status),
            CORS_HEADERS,
            content_type,
            self.body.len(),
            self.body
        )
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        _ => "Unknown",
    }
}

pub struct Server {}

impl Server {
    pub async fn start(addr: &str, state: Arc<AppState>, mut shutdown_rx: Receiver<()>) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("bind {addr}"))?;
        info!("Push server running on http://{}", listener.local_addr()?);

        loop {
            tokio::select! {
                conn = listener.accept() => {
                    let (mut stream, peer) = match conn {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let state = state.clone();
                    tokio::spawn(async move {
                        let (reader, writer) = stream.split();
                        if let Err(e) = Self::handle_client(reader, writer, &state).await {
                            warn!(%peer, error = %format!("{e:#}"), "connection error");
                        }
                    });
                }
                _ = &mut shutdown_rx => {
                    info!("Shutting down server...");
                    break;
                }
            }
        }

        Ok(())
    }

    pub async fn handle_client<Reader, Writer>(
        mut reader: Reader,
        mut writer: Writer,
        state: &AppState,
    ) -> Result<()>
    where
        Reader: AsyncRead + Unpin,
        Writer: AsyncWrite + Unpin,
    {
        let response = match read_request(&mut reader).await? {
            RawRequest::TooLarge => {
                warn!("Request too large");
                HttpResponse::error(413, "Request too large")
            }
            RawRequest::Complete(raw) => match Request::new(&raw) {
                Ok(request) => route(&request, state).await,
                Err(e) => {
                    debug!(error = %e, "unparseable request");
                    HttpResponse::error(400, &e.to_string())
                }
            },
        };

        writer
            .write_all(response.to_http().as_bytes())
            .await
            .context("Failed to write")?;
        writer.flush().await.context("Failed to flush")?;
        Ok(())
    }
}

enum RawRequest {
    Complete(String),
    TooLarge,
}

/// Reads the header block plus `Content-Length` bytes of body.
async fn read_request<R: AsyncRead + Unpin>(reader: &mut R) -> Result<RawRequest> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let size = reader
            .read(&mut chunk)
            .await
            .context("Failed to read stream")?;
        if size == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..size]);
        if buffer.len() > MAX_REQUEST_SIZE {
            return Ok(RawRequest::TooLarge);
        }
        if let Some(head_end) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buffer[..head_end]);
            if buffer.len() >= head_end + 4 + content_length(&head) {
                break;
            }
        }
    }
    Ok(RawRequest::Complete(
        String::from_utf8_lossy(&buffer).into_owned(),
    ))
}

fn content_length(head: &str) -> usize {
    head.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}

/// Strips query, trailing slash and the serverless `/api` prefix.
fn normalize_path(path: &str) -> &str {
    let path = path.split('?').next().unwrap_or(path);
    let path = match path.strip_prefix("/api") {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => path,
    };
    let path = path.trim_end_matches('/');
    if path.is_empty() { "/" } else { path }
}

pub async fn route(request: &Request, state: &AppState) -> HttpResponse {
    let path = normalize_path(&request.path);
    debug!(path, "request");
    let dispatcher = &state.dispatcher;

    match (&request.method, path) {
        (Method::OPTIONS, _) => HttpResponse::no_content(),
        (Method::GET, "/") => health(),
        (Method::GET, "/vapidPublicKey") => vapid_public_key(dispatcher),
        (Method::POST, "/subscribe") => subscribe(dispatcher, request.body.as_deref()).await,
        (Method::GET, "/subscriptions") => {
            HttpResponse::json(200, &dispatcher.list_subscriptions().await)
        }
        (Method::POST, "/sendNotification") => {
            send_notification(dispatcher, request.body.as_deref()).await
        }
        (_, "/" | "/vapidPublicKey" | "/subscribe" | "/subscriptions" | "/sendNotification") => {
            HttpResponse::error(405, "Method not allowed")
        }
        _ => HttpResponse::error(404, "Not found"),
    }
}

fn health() -> HttpResponse {
    HttpResponse::json(
        200,
        &json!({
            "status": "ok",
            "message": "Push notification server running",
            "endpoints": {
                "GET /vapidPublicKey": "Get VAPID public key",
                "POST /subscribe": "Register push subscription",
                "POST /sendNotification": "Send notification to subscribers",
                "GET /subscriptions": "List subscriptions (debug)"
            }
        }),
    )
}

fn vapid_public_key(dispatcher: &Dispatcher) -> HttpResponse {
    match dispatcher.keys().public_key() {
        Ok(public_key) => HttpResponse::json(200, &json!({ "publicKey": public_key })),
        Err(e) => HttpResponse::from_error(&e),
    }
}

async fn subscribe(dispatcher: &Dispatcher, body: Option<&str>) -> HttpResponse {
    let request = match body.map(serde_json::from_str::<SubscribeRequest>) {
        Some(Ok(request)) => request,
        Some(Err(_)) | None => return HttpResponse::error(400, "Invalid JSON body"),
    };
    let Some(subscription) = request.subscription else {
        return HttpResponse::error(400, "Subscription object required in request body");
    };
    match dispatcher.register(subscription).await {
        Ok(registration) => HttpResponse::json(
            201,
            &json!({
                "success": true,
                "message": "Subscription registered",
                "total": registration.total,
            }),
        ),
        Err(e) => HttpResponse::from_error(&e),
    }
}

async fn send_notification(dispatcher: &Dispatcher, body: Option<&str>) -> HttpResponse {
    let request = match body.map(str::trim).filter(|b| !b.is_empty()) {
        None => SendRequest::default(),
        Some(raw) => match serde_json::from_str::<SendRequest>(raw) {
            Ok(request) => request,
            Err(_) => return HttpResponse::error(400, "Invalid JSON body"),
        },
    };
    let payload = NotificationPayload::new(request.title, request.body, request.data);

    match request.subscription {
        Some(subscription) => match dispatcher.dispatch_to_one(&subscription, &payload).await {
            Ok(outcome) => HttpResponse::json(
                200,
                &json!({ "success": outcome.is_ok(), "result": outcome }),
            ),
            Err(e) => HttpResponse::from_error(&e),
        },
        None => match dispatcher.dispatch(&payload).await {
            Ok(report) => HttpResponse::json(200, &report),
            Err(e) => HttpResponse::from_error(&e),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_paths() {
        assert_eq!(normalize_path("/api/subscribe"), "/subscribe");
        assert_eq!(normalize_path("/subscribe/"), "/subscribe");
        assert_eq!(normalize_path("/subscriptions?debug=1"), "/subscriptions");
        assert_eq!(normalize_path("/api"), "/");
        assert_eq!(normalize_path("/apiary"), "/apiary");
        assert_eq!(normalize_path("/"), "/");
    }

    #[test]
    fn reads_content_length_case_insensitively() {
        assert_eq!(content_length("POST / HTTP/1.1\r\ncontent-length: 12"), 12);
        assert_eq!(content_length("GET / HTTP/1.1\r\nHost: x"), 0);
    }

    #[test]
    fn response_carries_cors_and_length() {
        let raw = HttpResponse::json(201, &json!({ "success": true })).to_http();
        assert!(raw.starts_with("HTTP/1.1 201 Created\r\n"));
        assert!(raw.contains("Access-Control-Allow-Origin: *\r\n"));
        assert!(raw.contains("Content-Length: 16\r\n"));
        assert!(raw.ends_with("\r\n\r\n{\"success\":true}"));
    }

    #[tokio::test]
    async fn reads_body_split_across_reads() {
        let body = r#"{"subscription":{}}"#;
        let raw = format!(
            "POST /subscribe HTTP/1.1\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        let (head, tail) = raw.split_at(20);
        let parts = [head.as_bytes(), tail.as_bytes()];
        let mut reader = chunked_reader(&parts);
        let RawRequest::Complete(read) = read_request(&mut reader).await.unwrap() else {
            panic!("expected a complete request");
        };
        assert_eq!(read, raw);
    }

    #[tokio::test]
    async fn oversized_request_is_refused() {
        let body = "x".repeat(MAX_REQUEST_SIZE);
        let raw = format!(
            "POST /subscribe HTTP/1.1\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        let mut reader = raw.as_bytes();
        assert!(matches!(
            read_request(&mut reader).await.unwrap(),
            RawRequest::TooLarge
        ));
    }

    /// Reader that hands out one slice per `read` call.
    fn chunked_reader(parts: &[&[u8]]) -> impl AsyncRead + Unpin + use<> {
        let (mut tx, rx) = tokio::io::duplex(MAX_REQUEST_SIZE);
        let parts: Vec<Vec<u8>> = parts.iter().map(|p| p.to_vec()).collect();
        tokio::spawn(async move {
            for part in parts {
                tx.write_all(&part).await.unwrap();
                tokio::task::yield_now().await;
            }
        });
        rx
    }
}
