//! Streams incremental tokens from an Ollama-style `/api/generate` backend.

pub mod framing;

use std::error::Error;
use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use anyhow::Context;
use async_stream::stream;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::prompt::Prompt;
use framing::{decode_line, BackendLine, NdjsonFramer};

/// Default generation endpoint of a local Ollama daemon.
pub const DEFAULT_GENERATE_URL: &str = "http://localhost:11434/api/generate";

type BoxError = Box<dyn Error + Send + Sync>;

/// Lazy, non-replayable sequence of frames for one generation request.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<GenerationFrame, RelayError>> + Send>>;

/// Model parameters sent with every generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    /// Backend model identifier.
    pub model: String,
    /// Context window size in tokens.
    pub num_ctx: u32,
    /// Maximum tokens to generate.
    pub num_predict: i32,
    /// Sampling temperature.
    pub temperature: f32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: "llama3".to_string(),
            num_ctx: 4096,
            num_predict: 512,
            temperature: 0.2,
        }
    }
}

/// Backend location, model parameters and HTTP timeouts.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Full URL of the generate endpoint.
    pub endpoint: String,
    /// Model parameters.
    pub options: GenerationOptions,
    /// Time allowed to establish the connection.
    pub connect_timeout: Duration,
    /// Longest silence tolerated between two reads of the response.
    pub read_timeout: Duration,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_GENERATE_URL.to_string(),
            options: GenerationOptions::default(),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(120),
        }
    }
}

/// One decoded unit of backend output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationFrame {
    /// Incremental text; empty on the final frame.
    pub token_text: String,
    /// Set on the single terminal frame.
    pub is_final: bool,
}

impl GenerationFrame {
    /// Frame carrying one token.
    pub fn token(text: impl Into<String>) -> Self {
        Self {
            token_text: text.into(),
            is_final: false,
        }
    }

    /// Terminal frame emitted when the backend signals completion.
    pub fn final_frame() -> Self {
        Self {
            token_text: String::new(),
            is_final: true,
        }
    }
}

/// Sends prompts to the generation backend with streaming enabled.
#[derive(Debug, Clone)]
pub struct GenerationRelay {
    client: Client,
    endpoint: String,
    options: GenerationOptions,
}

impl GenerationRelay {
    /// Builds the relay and its HTTP client. Only connect and per-read timeouts are set so long
    /// generations are never cut off while tokens keep flowing.
    pub fn new(settings: RelaySettings) -> anyhow::Result<Self> {
        anyhow::ensure!(
            settings.endpoint.starts_with("http://") || settings.endpoint.starts_with("https://"),
            "generation endpoint must be an http(s) URL"
        );
        anyhow::ensure!(
            !settings.options.model.trim().is_empty(),
            "missing generation model name"
        );
        let client = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .read_timeout(settings.read_timeout)
            .build()
            .context("failed to build generation HTTP client")?;
        Ok(Self {
            client,
            endpoint: settings.endpoint,
            options: settings.options,
        })
    }

    /// Endpoint requests are posted to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Model parameters in use.
    pub fn options(&self) -> &GenerationOptions {
        &self.options
    }

    /// Starts one generation. A non-success status fails here, with the full error body, before
    /// any frame exists; afterwards failures arrive as the stream's last item.
    pub async fn generate(&self, prompt: &Prompt) -> Result<FrameStream, RelayError> {
        let body = GenerateRequest {
            model: &self.options.model,
            prompt: prompt.as_str(),
            stream: true,
            options: ModelOptions {
                num_ctx: self.options.num_ctx,
                num_predict: self.options.num_predict,
                temperature: self.options.temperature,
            },
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                error!(endpoint = %self.endpoint, error = %err, "generation backend unreachable");
                RelayError::Request(err)
            })?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            error!(%status, body = %body, "generation backend rejected request");
            return Err(RelayError::Backend { status, body });
        }
        Ok(frames_from_bytes(resp.bytes_stream()))
    }
}

/// Turns a raw byte stream of NDJSON into generation frames.
///
/// Ends right after the first `done:true` frame, ignoring anything buffered or still in flight.
/// A read error ends the stream with [`RelayError::Stream`]; end of body without a terminal
/// frame ends it silently after flushing any unterminated tail.
pub fn frames_from_bytes<S, E>(bytes: S) -> FrameStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<BoxError> + Send + 'static,
{
    Box::pin(stream! {
        let mut framer = NdjsonFramer::new();
        let mut bytes = Box::pin(bytes);
        loop {
            let (lines, eof) = match bytes.next().await {
                Some(Ok(chunk)) => (framer.push(&chunk), false),
                Some(Err(err)) => {
                    let err: BoxError = err.into();
                    warn!(error = %err, "generation stream interrupted");
                    yield Err(RelayError::Stream(err));
                    return;
                }
                None => (framer.finish().into_iter().collect::<Vec<_>>(), true),
            };
            for line in lines {
                match decode_line(&line) {
                    BackendLine::Token(text) => yield Ok(GenerationFrame::token(text)),
                    BackendLine::Done(stats) => {
                        debug!(
                            eval_count = ?stats.eval_count,
                            total_duration_ns = ?stats.total_duration,
                            "generation complete"
                        );
                        yield Ok(GenerationFrame::final_frame());
                        return;
                    }
                    BackendLine::Error(message) => {
                        warn!(error = %message, "generation backend reported an error mid-stream");
                        yield Err(RelayError::BackendReported(message));
                        return;
                    }
                    BackendLine::Empty => {}
                }
            }
            if eof {
                debug!("generation stream ended without a done frame");
                return;
            }
        }
    })
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: ModelOptions,
}

#[derive(Serialize)]
struct ModelOptions {
    num_ctx: u32,
    num_predict: i32,
    temperature: f32,
}

/// Failures of a generation request.
#[derive(Debug)]
pub enum RelayError {
    /// The request never got a response (connect failure, timeout before headers).
    Request(reqwest::Error),
    /// The backend answered with a non-success status before streaming began.
    Backend {
        /// Response status.
        status: StatusCode,
        /// Full error body.
        body: String,
    },
    /// Reading the streamed body failed after streaming began.
    Stream(BoxError),
    /// The backend sent an in-band error frame after streaming began.
    BackendReported(String),
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request(err) => write!(f, "failed to reach generation backend: {err}"),
            Self::Backend { status, body } => {
                write!(f, "generation backend returned {status}: {body}")
            }
            Self::Stream(err) => write!(f, "generation stream interrupted: {err}"),
            Self::BackendReported(message) => {
                write!(f, "generation backend reported an error: {message}")
            }
        }
    }
}

impl Error for RelayError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Request(err) => Some(err),
            Self::Stream(err) => Some(err.as_ref()),
            Self::Backend { .. } | Self::BackendReported(_) => None,
        }
    }
}
