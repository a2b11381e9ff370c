//! Server-sent-event decoding for streamed chat completions.
//!
//! The endpoint sends one `data: {json}` line per content delta and finishes
//! with `data: [DONE]`. Anything else on the wire (comments, `event:` lines,
//! keep-alives injected by proxies, half-written frames) is skipped.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::{CompletionChunk, ProviderError};

pub const DATA_PREFIX: &str = "data:";
pub const DONE_SENTINEL: &str = "[DONE]";

/// What a single line of the event stream means to the reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Delta(String),
    Done,
    Skip,
}

#[derive(Debug, Deserialize)]
struct StreamFrame {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<StreamDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

/// Classify one line of the event stream.
pub fn parse_line(line: &str) -> Frame {
    let line = line.trim();
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return Frame::Skip;
    };
    let payload = payload.strip_prefix(' ').unwrap_or(payload);

    if payload == DONE_SENTINEL {
        return Frame::Done;
    }

    match serde_json::from_str::<StreamFrame>(payload) {
        Ok(frame) => frame
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta)
            .and_then(|delta| delta.content)
            .filter(|content| !content.is_empty())
            .map(Frame::Delta)
            .unwrap_or(Frame::Skip),
        Err(e) => {
            debug!("Skipping malformed SSE frame: {} - Line: {}", e, payload);
            Frame::Skip
        }
    }
}

/// Splits a byte stream into complete lines.
///
/// Bytes are buffered until a `\n` arrives, so multi-byte characters and
/// frames split across network reads come out whole.
#[derive(Debug, Default)]
pub struct SseDecoder {
    byte_buffer: Vec<u8>,
    lines_read: usize,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.byte_buffer.extend_from_slice(bytes);
    }

    /// Next complete line, without its terminator.
    pub fn next_line(&mut self) -> Option<String> {
        let line_end = self.byte_buffer.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.byte_buffer.drain(..=line_end).collect();
        self.lines_read += 1;
        Some(String::from_utf8_lossy(&line[..line_end]).into_owned())
    }

    /// Whatever is left once the body ends without a trailing newline.
    pub fn finish(&mut self) -> Option<String> {
        if self.byte_buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.byte_buffer);
        self.lines_read += 1;
        Some(String::from_utf8_lossy(&rest).into_owned())
    }

    pub fn lines_read(&self) -> usize {
        self.lines_read
    }
}

/// Outcome of handing one line to the receiver.
enum Forward {
    Continue,
    Stop,
}

async fn forward_line(
    line: &str,
    tx: &mpsc::Sender<anyhow::Result<CompletionChunk>>,
) -> Forward {
    match parse_line(line) {
        Frame::Delta(content) => {
            if tx.send(Ok(CompletionChunk::delta(content))).await.is_err() {
                debug!("Receiver dropped, stopping stream");
                return Forward::Stop;
            }
            Forward::Continue
        }
        Frame::Done => {
            debug!("Received {} sentinel", DONE_SENTINEL);
            let _ = tx.send(Ok(CompletionChunk::done())).await;
            Forward::Stop
        }
        Frame::Skip => Forward::Continue,
    }
}

/// Drive a response body into `tx` until `[DONE]`, EOF, an error or cancellation.
///
/// The token is checked after every line and raced against every network
/// read. On cancellation the channel is closed without a finishing chunk.
/// `read_timeout` bounds each wait for the next read, so a slow but steady
/// reply may take as long as it needs.
pub async fn pump<S, E>(
    mut body: S,
    tx: mpsc::Sender<anyhow::Result<CompletionChunk>>,
    cancel: CancellationToken,
    read_timeout: Duration,
) where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut decoder = SseDecoder::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Stream cancelled after {} lines", decoder.lines_read());
                return;
            }
            next = tokio::time::timeout(read_timeout, body.next()) => match next {
                Ok(next) => next,
                Err(_) => {
                    error!("No data from chat endpoint for {:?}", read_timeout);
                    let _ = tx
                        .send(Err(ProviderError::Stream(format!(
                            "no data received for {:?}",
                            read_timeout
                        ))
                        .into()))
                        .await;
                    return;
                }
            },
        };

        match next {
            Some(Ok(bytes)) => {
                decoder.push(&bytes);
                while let Some(line) = decoder.next_line() {
                    if cancel.is_cancelled() {
                        debug!("Stream cancelled after {} lines", decoder.lines_read());
                        return;
                    }
                    if let Forward::Stop = forward_line(&line, &tx).await {
                        return;
                    }
                }
            }
            Some(Err(e)) => {
                error!("Stream error: {}", e);
                let _ = tx
                    .send(Err(ProviderError::Stream(e.to_string()).into()))
                    .await;
                return;
            }
            None => {
                if let Some(line) = decoder.finish() {
                    if !cancel.is_cancelled() {
                        if let Forward::Stop = forward_line(&line, &tx).await {
                            return;
                        }
                    }
                }
                debug!(
                    "Stream ended without {} after {} lines",
                    DONE_SENTINEL,
                    decoder.lines_read()
                );
                let _ = tx.send(Ok(CompletionChunk::done())).await;
                return;
            }
        }
    }
}
