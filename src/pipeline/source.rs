//! Transports that deliver job channel messages.
//!
//! Every source yields the same [`ChannelMessage`] stream, so the consumer
//! never knows whether it is reading server-sent events or polled snapshots.
//! Streams are lazy; dropping one closes its connection, and subscribing
//! again starts a fresh one. Poll and fallback streams end after the job
//! reaches a terminal status.

use super::{ChannelMessage, PipelineApi, decode_message};
use crate::http::{HttpTimeouts, build_streaming_client};
use async_stream::stream;
use futures::{StreamExt, stream::BoxStream};
use rand::Rng;
use reqwest::{Client, header};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

pub type EventStream = BoxStream<'static, Result<ChannelMessage, SourceError>>;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("HTTP {0}")]
    Status(u16),
    #[error("stream interrupted: {0}")]
    Stream(String),
    #[error("invalid payload: {0}")]
    Payload(String),
}

pub trait JobEventSource: Send + Sync {
    fn subscribe(&self, job_id: &str) -> EventStream;
}

/// Largest frame the decoder buffers before giving up on the stream.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Incremental decoder for `text/event-stream` bodies.
///
/// Frames end at a blank line. Multiple `data:` lines in one frame are joined
/// with `\n`; comments and other fields are ignored.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    // Bytes of `buffer` already searched for a frame end.
    scanned: usize,
}

impl SseDecoder {
    /// Feeds raw bytes and returns the data payload of every completed frame.
    /// Fails once a frame grows past [`MAX_FRAME_BYTES`]; the partial frame
    /// is discarded.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, SourceError> {
        self.buffer
            .extend(chunk.iter().copied().filter(|byte| *byte != b'\r'));
        let mut payloads = Vec::new();
        loop {
            // Step back one byte: the first `\n` of a separator may be the
            // last byte of the previous chunk.
            let from = self.scanned.saturating_sub(1);
            let Some(offset) = find_frame_end(&self.buffer[from..]) else {
                self.scanned = self.buffer.len();
                break;
            };
            let end = from + offset;
            let frame: Vec<u8> = self.buffer.drain(..end + 2).collect();
            self.scanned = 0;
            if let Some(data) = frame_data(&frame[..end]) {
                payloads.push(data);
            }
        }
        if self.buffer.len() > MAX_FRAME_BYTES {
            self.buffer.clear();
            self.scanned = 0;
            return Err(SourceError::Payload(format!(
                "event frame exceeds {MAX_FRAME_BYTES} bytes"
            )));
        }
        Ok(payloads)
    }
}

fn find_frame_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|pair| pair == b"\n\n")
}

fn frame_data(frame: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(frame);
    let lines: Vec<&str> = text
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

/// Push delivery over the backend's per-job SSE endpoint.
#[derive(Debug, Clone)]
pub struct SseSource {
    api: PipelineApi,
    http: Client,
}

impl SseSource {
    pub fn new(api: PipelineApi, timeouts: HttpTimeouts) -> Self {
        Self {
            api,
            http: build_streaming_client(timeouts),
        }
    }

    /// Resolves once the server accepted the subscription.
    pub async fn connect(&self, job_id: &str) -> Result<EventStream, SourceError> {
        let response = self
            .http
            .get(self.api.events_url(job_id))
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|err| SourceError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(SourceError::Status(response.status().as_u16()));
        }
        debug!(target = "storeops.events", job_id, "event stream connected");

        Ok(Box::pin(stream! {
            let mut decoder = SseDecoder::default();
            let mut body = Box::pin(response.bytes_stream());
            while let Some(chunk) = body.next().await {
                match chunk {
                    Ok(bytes) => match decoder.push(&bytes) {
                        Ok(payloads) => {
                            for payload in payloads {
                                if let Some(message) = decode_message(&payload) {
                                    yield Ok(message);
                                }
                            }
                        }
                        Err(err) => {
                            yield Err(err);
                            break;
                        }
                    },
                    Err(err) => {
                        yield Err(SourceError::Stream(err.to_string()));
                        break;
                    }
                }
            }
        }))
    }
}

impl JobEventSource for SseSource {
    fn subscribe(&self, job_id: &str) -> EventStream {
        let source = self.clone();
        let job_id = job_id.to_string();
        Box::pin(stream! {
            match source.connect(&job_id).await {
                Ok(mut events) => {
                    while let Some(item) = events.next().await {
                        yield item;
                    }
                }
                Err(err) => {
                    yield Err(err);
                }
            }
        })
    }
}

/// Periodic full snapshots from the job status endpoint. Ends after the
/// first terminal snapshot.
#[derive(Debug, Clone)]
pub struct PollSource {
    api: PipelineApi,
    interval: Duration,
}

impl PollSource {
    pub fn new(api: PipelineApi, interval: Duration) -> Self {
        Self { api, interval }
    }
}

impl JobEventSource for PollSource {
    fn subscribe(&self, job_id: &str) -> EventStream {
        let api = self.api.clone();
        let interval = self.interval;
        let job_id = job_id.to_string();
        Box::pin(stream! {
            loop {
                match api.fetch_job(&job_id).await {
                    Ok(job) => {
                        let finished = job.status.is_terminal();
                        yield Ok(ChannelMessage::snapshot(job));
                        if finished {
                            break;
                        }
                    }
                    Err(err) => {
                        yield Err(SourceError::Request(err.to_string()));
                    }
                }
                sleep(interval).await;
            }
        })
    }
}

/// Push first; poll while push is down; go back to push once it reconnects.
///
/// A push channel that closes right after a terminal message is done, not
/// down, so the stream ends there. Polling also stops at the first terminal
/// snapshot.
#[derive(Clone)]
pub struct FallbackSource {
    push: Arc<dyn JobEventSource>,
    poll: Arc<dyn JobEventSource>,
    push_retry: Duration,
}

enum Turn {
    Probe(Option<Result<ChannelMessage, SourceError>>),
    Poll(Option<Result<ChannelMessage, SourceError>>),
}

impl FallbackSource {
    pub fn new(
        push: Arc<dyn JobEventSource>,
        poll: Arc<dyn JobEventSource>,
        push_retry: Duration,
    ) -> Self {
        Self {
            push,
            poll,
            push_retry,
        }
    }
}

impl JobEventSource for FallbackSource {
    fn subscribe(&self, job_id: &str) -> EventStream {
        let push = self.push.clone();
        let poll = self.poll.clone();
        let retry = self.push_retry;
        let job_id = job_id.to_string();

        Box::pin(stream! {
            let mut active: Option<EventStream> = Some(push.subscribe(&job_id));
            let mut polling: Option<EventStream> = None;
            let mut probe: Option<EventStream> = None;
            let mut next_probe = Instant::now();
            let mut finished = false;

            loop {
                if let Some(events) = active.as_mut() {
                    match events.next().await {
                        Some(Ok(message)) => {
                            finished = message.is_terminal();
                            yield Ok(message);
                            continue;
                        }
                        None if finished => {
                            debug!(
                                target = "storeops.events",
                                job_id = %job_id,
                                "push channel closed after terminal status"
                            );
                            break;
                        }
                        Some(Err(err)) => warn!(
                            target = "storeops.events",
                            job_id = %job_id,
                            error = %err,
                            "push channel failed; falling back to polling"
                        ),
                        None => debug!(
                            target = "storeops.events",
                            job_id = %job_id,
                            "push channel closed; falling back to polling"
                        ),
                    }
                    active = None;
                    next_probe = Instant::now() + with_jitter(retry);
                }

                if probe.is_none() && Instant::now() >= next_probe {
                    probe = Some(push.subscribe(&job_id));
                }
                let snapshots = polling.get_or_insert_with(|| poll.subscribe(&job_id));

                let turn = tokio::select! {
                    biased;
                    item = next_or_pending(&mut probe) => Turn::Probe(item),
                    item = snapshots.next() => Turn::Poll(item),
                };

                match turn {
                    Turn::Probe(Some(Ok(message))) => {
                        info!(target = "storeops.events", job_id = %job_id, "push channel recovered");
                        active = probe.take();
                        polling = None;
                        finished = message.is_terminal();
                        yield Ok(message);
                    }
                    Turn::Probe(_) => {
                        probe = None;
                        next_probe = Instant::now() + with_jitter(retry);
                    }
                    Turn::Poll(Some(Ok(message))) => {
                        let done = message.is_terminal();
                        yield Ok(message);
                        if done {
                            break;
                        }
                    }
                    Turn::Poll(Some(Err(err))) => {
                        yield Err(err);
                    }
                    Turn::Poll(None) => break,
                }
            }
        })
    }
}

async fn next_or_pending(
    stream: &mut Option<EventStream>,
) -> Option<Result<ChannelMessage, SourceError>> {
    match stream {
        Some(events) => events.next().await,
        None => std::future::pending().await,
    }
}

// Spreads reconnect attempts of many watched jobs.
fn with_jitter(base: Duration) -> Duration {
    let spread = (base.as_millis() / 10) as u64;
    let extra = rand::rng().random_range(0..=spread);
    base + Duration::from_millis(extra)
}
