//! Line-Oriented Stream Decoding
//!
//! Ollama (NDJSON) and the SSE-speaking providers all deliver their streams as
//! newline-separated records. [`spawn_line_stream`] owns the HTTP body, splits
//! it into lines and hands each one to a provider-specific [`LineDecoder`],
//! forwarding the results on a [`StreamEvent`] channel.

use futures::StreamExt;
use tokio::sync::mpsc;

use super::traits::{StreamEvent, StreamReceiver, STREAM_CHANNEL_CAPACITY};
use crate::types::StreamChunk;

/// What a decoder made of one line
#[derive(Debug, PartialEq, Eq)]
pub enum LineAction {
    /// Nothing to forward (blank line, comment, unparseable fragment)
    Skip,
    /// Forward a chunk and keep reading
    Emit(StreamChunk),
    /// Forward a chunk, then end the stream
    EmitAndFinish(StreamChunk),
    /// End the stream
    Finish,
}

/// Provider-specific line parser
pub trait LineDecoder: Send + 'static {
    /// Decode one trimmed, non-empty line
    fn decode(&mut self, line: &str) -> LineAction;

    /// Chunk to send when the body ends without an explicit finish
    fn finish(&mut self) -> Option<StreamChunk> {
        None
    }
}

/// Splits a byte stream into lines without breaking UTF-8 sequences
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    /// Append raw bytes
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Next complete line, trimmed; blank lines are skipped
    pub fn next_line(&mut self) -> Option<String> {
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if !line.is_empty() {
                return Some(line);
            }
        }
        None
    }

    /// Whatever is left once the body ended
    pub fn remainder(&mut self) -> Option<String> {
        let raw = std::mem::take(&mut self.buffer);
        let line = String::from_utf8_lossy(&raw).trim().to_string();
        (!line.is_empty()).then_some(line)
    }
}

/// Outcome of feeding one line to the decoder
enum Flow {
    Continue,
    Stop,
}

async fn dispatch(
    decoder: &mut impl LineDecoder,
    line: &str,
    tx: &mpsc::Sender<StreamEvent>,
) -> Flow {
    match decoder.decode(line) {
        LineAction::Skip => Flow::Continue,
        LineAction::Emit(chunk) => {
            if tx.send(StreamEvent::Chunk(chunk)).await.is_err() {
                // Receiver dropped, stop streaming
                return Flow::Stop;
            }
            Flow::Continue
        }
        LineAction::EmitAndFinish(chunk) => {
            if tx.send(StreamEvent::Chunk(chunk)).await.is_ok() {
                let _ = tx.send(StreamEvent::Done).await;
            }
            Flow::Stop
        }
        LineAction::Finish => {
            if let Some(chunk) = decoder.finish() {
                if tx.send(StreamEvent::Chunk(chunk)).await.is_err() {
                    return Flow::Stop;
                }
            }
            let _ = tx.send(StreamEvent::Done).await;
            Flow::Stop
        }
    }
}

/// Spawn a task that decodes `response`'s body into stream events
pub fn spawn_line_stream<D: LineDecoder>(
    response: reqwest::Response,
    mut decoder: D,
) -> StreamReceiver {
    let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
    let mut body = response.bytes_stream();

    tokio::spawn(async move {
        let mut lines = LineBuffer::default();

        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    lines.push(&bytes);
                    while let Some(line) = lines.next_line() {
                        if let Flow::Stop = dispatch(&mut decoder, &line, &tx).await {
                            return;
                        }
                    }
                }
                Err(e) => {
                    let _ = tx.send(StreamEvent::Error(e.to_string())).await;
                    return;
                }
            }
        }

        if let Some(line) = lines.remainder() {
            if let Flow::Stop = dispatch(&mut decoder, &line, &tx).await {
                return;
            }
        }

        // Body ended without an explicit finish marker
        if let Some(chunk) = decoder.finish() {
            if tx.send(StreamEvent::Chunk(chunk)).await.is_err() {
                return;
            }
        }
        let _ = tx.send(StreamEvent::Done).await;
    });

    rx
}
