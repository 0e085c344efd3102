//! Streaming-HTTP transport (MCP SSE binding) with automatic reconnect.
//!
//! The client holds a long-lived `GET` event stream. The server's first
//! `endpoint` event names the URL that client messages are `POST`ed to;
//! `message` events carry server-to-client JSON-RPC. When the stream drops
//! it is reopened with capped exponential backoff.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, oneshot};
use tokio_util::sync::CancellationToken;
use toolhub_core::SseConfig;
use url::Url;

use super::{EventSink, Transport, TransportError, TransportEvent};

const INITIAL_RETRY_MS: u64 = 1000;

/// Upper bound on the reconnect interval.
pub const MAX_RETRY_MS: u64 = 5000;

/// Delay before reconnect attempt `attempt` (zero-based).
pub fn reconnect_delay(attempt: u32) -> Duration {
    let exp = attempt.min(30);
    let candidate = INITIAL_RETRY_MS.saturating_mul(1u64 << exp);
    Duration::from_millis(candidate.min(MAX_RETRY_MS))
}

pub struct SseTransport {
    shared: Arc<Shared>,
    opened: AtomicBool,
    shutdown: CancellationToken,
}

struct Shared {
    name: String,
    config: SseConfig,
    http: reqwest::Client,
    endpoint: RwLock<Option<Url>>,
}

/// Why a single stream attempt ended.
enum StreamEnd {
    /// Network drop or server hang-up; worth reconnecting.
    Dropped(String),
    /// The server rejected the stream; reconnecting would not help.
    Fatal(String),
}

impl SseTransport {
    pub fn new(name: impl Into<String>, config: SseConfig, http: reqwest::Client) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                config,
                http,
                endpoint: RwLock::new(None),
            }),
            opened: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }
}

impl Shared {
    fn stream_request(&self, reconnect: bool) -> reqwest::RequestBuilder {
        let with_credentials = self.config.with_credentials();
        let mut request = self
            .http
            .get(self.config.url.clone())
            .header(ACCEPT, "text/event-stream");
        for (key, value) in &self.config.headers {
            if reconnect && !with_credentials && key.eq_ignore_ascii_case("authorization") {
                continue;
            }
            request = request.header(key.as_str(), value.as_str());
        }
        request
    }

    /// Run one stream attempt until it ends.
    ///
    /// `ready` is consumed when the endpoint event arrives on the first
    /// attempt; `attempt` resets once the server accepts the stream.
    async fn stream_once(
        &self,
        events: &EventSink,
        ready: &mut Option<oneshot::Sender<Result<(), TransportError>>>,
        attempt: &mut u32,
        reconnect: bool,
    ) -> StreamEnd {
        let response = match self.stream_request(reconnect).send().await {
            Ok(response) => response,
            Err(e) => return StreamEnd::Dropped(e.to_string()),
        };

        let status = response.status();
        if !status.is_success() {
            return StreamEnd::Fatal(format!("SSE error: Non-200 status code ({status})"));
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !is_event_stream_content_type(content_type) {
            return StreamEnd::Fatal(format!(
                "SSE error: Unexpected content type '{content_type}'"
            ));
        }

        *attempt = 0;
        let mut parser = SseEventParser::default();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => return StreamEnd::Dropped(e.to_string()),
            };
            for event in parser.push(&chunk) {
                match event.event.as_str() {
                    "endpoint" => {
                        let endpoint = match self.config.url.join(event.data.trim()) {
                            Ok(url) => url,
                            Err(e) => {
                                return StreamEnd::Fatal(format!(
                                    "Invalid endpoint URL '{}': {e}",
                                    event.data
                                ));
                            }
                        };
                        tracing::debug!(server_name = %self.name, %endpoint, "SSE endpoint received");
                        *self.endpoint.write().await = Some(endpoint);
                        if let Some(tx) = ready.take() {
                            let _ = tx.send(Ok(()));
                        }
                    }
                    "message" => match serde_json::from_str::<Value>(&event.data) {
                        Ok(message) => {
                            let _ = events.send(TransportEvent::Message(message));
                        }
                        Err(e) => {
                            tracing::debug!(server_name = %self.name, error = %e, "Ignoring malformed SSE message");
                        }
                    },
                    other => {
                        tracing::trace!(server_name = %self.name, event = other, "Ignoring SSE event");
                    }
                }
            }
        }

        StreamEnd::Dropped("Event stream ended".to_string())
    }

    async fn run(
        self: Arc<Self>,
        events: EventSink,
        ready: oneshot::Sender<Result<(), TransportError>>,
        shutdown: CancellationToken,
    ) {
        let mut ready = Some(ready);
        let mut attempt = 0u32;
        let mut reconnect = false;

        loop {
            let end = tokio::select! {
                () = shutdown.cancelled() => return,
                end = self.stream_once(&events, &mut ready, &mut attempt, reconnect) => end,
            };
            // Nothing reopens after close, and a failed first attempt fails `open`.
            *self.endpoint.write().await = None;

            match end {
                StreamEnd::Fatal(message) | StreamEnd::Dropped(message) if ready.is_some() => {
                    if let Some(tx) = ready.take() {
                        let _ = tx.send(Err(TransportError::Connect(message)));
                    }
                    return;
                }
                StreamEnd::Fatal(message) => {
                    tracing::warn!(server_name = %self.name, error = %message, "SSE stream failed");
                    let _ = events.send(TransportEvent::Error(message));
                    return;
                }
                StreamEnd::Dropped(message) => {
                    let delay = reconnect_delay(attempt);
                    attempt = attempt.saturating_add(1);
                    tracing::warn!(
                        server_name = %self.name,
                        error = %message,
                        retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(MAX_RETRY_MS),
                        "SSE stream dropped, reconnecting"
                    );
                    let _ = events.send(TransportEvent::Reconnecting(message));
                    tokio::select! {
                        () = shutdown.cancelled() => return,
                        () = tokio::time::sleep(delay) => {}
                    }
                    reconnect = true;
                }
            }
        }
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl Transport for SseTransport {
    fn kind(&self) -> &'static str {
        "sse"
    }

    async fn open(&self, events: EventSink) -> Result<(), TransportError> {
        if self.opened.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        tracing::debug!(
            server_name = %self.shared.name,
            url = %self.shared.config.url,
            with_credentials = self.shared.config.with_credentials(),
            "Opening MCP event stream"
        );

        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(
            Arc::clone(&self.shared).run(events, ready_tx, self.shutdown.clone()),
        );

        match ready_rx.await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Connect(
                "Event stream closed before an endpoint was received".to_string(),
            )),
        }
    }

    async fn send(&self, message: Value) -> Result<(), TransportError> {
        let endpoint = self
            .shared
            .endpoint
            .read()
            .await
            .clone()
            .ok_or(TransportError::NotOpen)?;

        let mut request = self.shared.http.post(endpoint).json(&message);
        for (key, value) in &self.shared.config.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        request
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map(|_| ())
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.shutdown.cancel();
        *self.shared.endpoint.write().await = None;
        Ok(())
    }
}

pub fn is_event_stream_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(str::trim)
        .is_some_and(|value| value.eq_ignore_ascii_case("text/event-stream"))
}

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental `text/event-stream` decoder.
///
/// Bytes may arrive split anywhere; events are dispatched on blank lines.
#[derive(Debug, Default)]
pub struct SseEventParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseEventParser {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut dispatched = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line).into_owned();
            self.process_line(&line, &mut dispatched);
        }

        dispatched
    }

    fn process_line(&mut self, line: &str, dispatched: &mut Vec<SseEvent>) {
        if line.is_empty() {
            let event = self.event.take();
            if !self.data.is_empty() {
                dispatched.push(SseEvent {
                    event: event.unwrap_or_else(|| "message".to_string()),
                    data: self.data.join("\n"),
                });
                self.data.clear();
            }
            return;
        }
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            // `id` and `retry` are not used by the MCP binding.
            _ => {}
        }
    }
}
