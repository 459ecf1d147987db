//! Server-Sent Events transport for the live channel
//!
//! Implements [`LiveSource`] over a streaming reqwest response. Reconnects
//! after a fixed delay whenever the stream drops, resuming with
//! `Last-Event-ID`. An HTTP error status ends the source.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::{Map, Value};
use tracing::{debug, trace, warn};

use qadash_common::{Error, Result};

use crate::channel::live::{LiveEvent, LiveSource};
use crate::config::EngineConfig;
use crate::normalizer::InboundItem;

/// One dispatched SSE frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

impl SseFrame {
    /// Convert the frame payload into an inbound item.
    ///
    /// The event name doubles as the payload `type` when the payload has none.
    pub fn into_item(self) -> Option<InboundItem> {
        let name = self.event.filter(|e| !e.is_empty() && e != "message");

        match (serde_json::from_str::<Value>(&self.data), name) {
            (Ok(Value::Object(mut map)), Some(name)) => {
                let untyped = map
                    .get("type")
                    .and_then(Value::as_str)
                    .map_or(true, |t| t.trim().is_empty());
                if untyped {
                    map.insert("type".to_string(), Value::String(name));
                }
                Some(InboundItem::Object(map))
            }
            (Ok(Value::Object(map)), None) => Some(InboundItem::Object(map)),
            (_, Some(name)) => {
                let mut map = Map::new();
                map.insert("type".to_string(), Value::String(name));
                if !self.data.is_empty() {
                    map.insert("msg".to_string(), Value::String(self.data));
                }
                Some(InboundItem::Object(map))
            }
            (_, None) if self.data.is_empty() => None,
            (_, None) => Some(InboundItem::Text(self.data)),
        }
    }
}

/// Longest line kept while waiting for its terminating newline
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Incremental `text/event-stream` parser
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    /// Bytes of `buffer` already known to hold no newline
    scanned: usize,
    /// Set while skipping the remainder of an over-long line
    discarding: bool,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
    retry: Option<u64>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every frame it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + offset;
            let raw = &self.buffer[start..end];
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            let line = String::from_utf8_lossy(raw).into_owned();
            start = end + 1;
            self.scanned = start;

            if std::mem::take(&mut self.discarding) {
                continue;
            }
            if let Some(frame) = self.line(&line) {
                frames.push(frame);
            }
        }

        self.buffer.drain(..start);
        self.scanned = self.buffer.len();
        if self.buffer.len() > MAX_LINE_BYTES {
            warn!(bytes = self.buffer.len(), "discarding over-long SSE line");
            self.buffer.clear();
            self.scanned = 0;
            self.discarding = true;
        }
        frames
    }

    /// Server-requested reconnect delay, if any was sent
    pub fn retry(&self) -> Option<Duration> {
        self.retry.map(Duration::from_millis)
    }

    /// Drop a partially received frame after the connection is lost.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
        self.discarding = false;
        self.event = None;
        self.data.clear();
    }

    fn line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" if !value.contains('\0') => self.id = Some(value.to_string()),
            "retry" => {
                if let Ok(ms) = value.trim().parse() {
                    self.retry = Some(ms);
                }
            }
            _ => trace!(field, "ignoring unknown SSE field"),
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() && event.is_none() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame {
            event,
            data,
            id: self.id.clone(),
        })
    }
}

/// Live source reading a Server-Sent Events endpoint
pub struct SseLiveSource {
    client: reqwest::Client,
    url: String,
    retry: Duration,
    last_event_id: Option<String>,
    stream: Option<BoxStream<'static, reqwest::Result<Bytes>>>,
    parser: SseParser,
    pending: VecDeque<LiveEvent>,
    attempts: u32,
    finished: bool,
}

impl SseLiveSource {
    pub fn new(client: reqwest::Client, url: impl Into<String>, retry: Duration) -> Self {
        Self {
            client,
            url: url.into(),
            retry,
            last_event_id: None,
            stream: None,
            parser: SseParser::new(),
            pending: VecDeque::new(),
            attempts: 0,
            finished: false,
        }
    }

    pub fn from_config(config: &EngineConfig, run_id: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.live.connect_timeout_secs))
            .build()?;
        Ok(Self::new(
            client,
            config.live_url(run_id),
            Duration::from_millis(config.live.retry_ms),
        ))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    async fn connect(&mut self) -> LiveEvent {
        if self.attempts > 0 {
            let delay = self.parser.retry().unwrap_or(self.retry);
            debug!(url = %self.url, ?delay, "reconnecting event stream");
            tokio::time::sleep(delay).await;
        }
        self.attempts += 1;

        let mut request = self
            .client
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .header(reqwest::header::CACHE_CONTROL, "no-cache");
        if let Some(id) = &self.last_event_id {
            request = request.header("Last-Event-ID", id.as_str());
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                debug!(url = %self.url, attempt = self.attempts, "event stream open");
                self.parser.reset();
                self.stream = Some(response.bytes_stream().boxed());
                LiveEvent::Open
            }
            Ok(response) => {
                let status = response.status();
                warn!(url = %self.url, %status, "event stream rejected");
                self.finished = true;
                let error = Error::Transport(format!("HTTP {} from {}", status.as_u16(), self.url));
                LiveEvent::Error(error.to_string())
            }
            Err(e) => {
                warn!(url = %self.url, error = %e, "event stream connect failed");
                LiveEvent::Error(e.to_string())
            }
        }
    }

    fn accept(&mut self, chunk: &[u8]) {
        for frame in self.parser.feed(chunk) {
            if frame.id.is_some() {
                self.last_event_id = frame.id.clone();
            }
            trace!(event = ?frame.event, bytes = frame.data.len(), "sse frame");
            if let Some(item) = frame.into_item() {
                self.pending.push_back(LiveEvent::Message(item));
            }
        }
    }
}

#[async_trait]
impl LiveSource for SseLiveSource {
    async fn next_event(&mut self) -> Option<LiveEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            if self.finished {
                return None;
            }

            let next = match self.stream.as_mut() {
                Some(stream) => stream.next().await,
                None => return Some(self.connect().await),
            };

            match next {
                Some(Ok(chunk)) => self.accept(&chunk),
                Some(Err(e)) => {
                    self.stream = None;
                    return Some(LiveEvent::Error(e.to_string()));
                }
                None => {
                    self.stream = None;
                    let error = Error::Transport("event stream closed by server".to_string());
                    return Some(LiveEvent::Error(error.to_string()));
                }
            }
        }
    }

    async fn close(&mut self) {
        self.stream = None;
        self.pending.clear();
        self.finished = true;
    }
}
