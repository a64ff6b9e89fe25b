//! Presentation of a generation: drained into one reply, or forwarded live per token.

use std::convert::Infallible;

use async_stream::stream;
use axum::response::sse::Event;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;

use crate::relay::{FrameStream, RelayError};

/// Marker closing a successful live stream.
pub const END_MARKER: &str = "[END]";
/// Prefix of the marker carrying a failure detail.
pub const ERROR_PREFIX: &str = "[Backend error]";

/// Concatenates every token in arrival order. Stops at the terminal frame or end of stream and
/// propagates the first failure.
pub async fn collect_reply(mut frames: FrameStream) -> Result<String, RelayError> {
    let mut reply = String::new();
    while let Some(frame) = frames.next().await {
        let frame = frame?;
        if frame.is_final {
            break;
        }
        reply.push_str(&frame.token_text);
    }
    Ok(reply)
}

/// Transport-neutral unit of a live reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveUnit {
    /// One token, forwarded as soon as it arrived.
    Token(String),
    /// Generation finished cleanly.
    End,
    /// Generation failed; carries the failure detail.
    Error(String),
}

/// Forwards tokens as they arrive, then exactly one `End` or `Error` unit.
///
/// `generation` is the outcome of starting the relay, so a handshake failure turns into a single
/// `Error` unit with no tokens. Mid-stream failures keep already forwarded tokens and close with
/// `Error`.
pub fn live_units(generation: Result<FrameStream, RelayError>) -> BoxStream<'static, LiveUnit> {
    Box::pin(stream! {
        let mut frames = match generation {
            Ok(frames) => frames,
            Err(err) => {
                yield LiveUnit::Error(err.to_string());
                return;
            }
        };
        while let Some(item) = frames.next().await {
            match item {
                Ok(frame) if frame.is_final => break,
                Ok(frame) => yield LiveUnit::Token(frame.token_text),
                Err(err) => {
                    yield LiveUnit::Error(err.to_string());
                    return;
                }
            }
        }
        yield LiveUnit::End;
    })
}

impl LiveUnit {
    /// Plain-text chunk: tokens verbatim, markers on their own line.
    pub fn to_plain_chunk(&self) -> Bytes {
        match self {
            Self::Token(text) => Bytes::from(text.clone()),
            Self::End => Bytes::from(format!("\n{END_MARKER}\n")),
            Self::Error(detail) => Bytes::from(format!("\n{ERROR_PREFIX} {detail}\n")),
        }
    }

    /// Server-Sent Event: one event per unit, failures as an `error` event.
    pub fn to_sse_event(&self) -> Event {
        match self {
            Self::Token(text) => Event::default().data(sse_safe(text)),
            Self::End => Event::default().data(END_MARKER),
            Self::Error(detail) => Event::default()
                .event("error")
                .data(sse_safe(&format!("{ERROR_PREFIX} {detail}"))),
        }
    }
}

/// Plain-chunk body stream for a live reply.
pub fn plain_body(
    units: BoxStream<'static, LiveUnit>,
) -> BoxStream<'static, Result<Bytes, Infallible>> {
    units.map(|unit| Ok(unit.to_plain_chunk())).boxed()
}

/// SSE event stream for a live reply.
pub fn sse_events(
    units: BoxStream<'static, LiveUnit>,
) -> BoxStream<'static, Result<Event, Infallible>> {
    units.map(|unit| Ok(unit.to_sse_event())).boxed()
}

// SSE fields cannot carry carriage returns; the data field splits on '\n' itself.
fn sse_safe(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}
