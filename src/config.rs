//! Command-line/env configuration shared by the binaries.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use tracing_subscriber::EnvFilter;

use crate::corpus::CorpusFormat;
use crate::relay::{GenerationOptions, RelaySettings, DEFAULT_GENERATE_URL};
use crate::retriever::{RetrievalSettings, DEFAULT_CONTEXT_LIMIT, DEFAULT_TOP_K};

/// Origins allowed by CORS when none are configured.
pub const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:3000,http://127.0.0.1:3000";

/// Corpus location and retrieval knobs.
#[derive(Args, Debug, Clone)]
pub struct CorpusArgs {
    /// JSONL file of historical tickets, one object per line
    #[arg(long, env = "HELPDESK_CORPUS", default_value = "tickets.jsonl")]
    pub corpus: PathBuf,

    /// Corpus file layout; `auto` picks CSV for `.csv` files and JSONL otherwise
    #[arg(
        long,
        env = "HELPDESK_CORPUS_FORMAT",
        value_enum,
        default_value_t = CorpusFormat::Auto
    )]
    pub corpus_format: CorpusFormat,

    /// Key (JSONL) or column (CSV) holding the ticket text
    #[arg(long, env = "HELPDESK_TEXT_FIELD", default_value = "text")]
    pub text_field: String,

    /// Neighbours requested from the index (only the nearest is used)
    #[arg(long, env = "HELPDESK_TOP_K", default_value_t = DEFAULT_TOP_K)]
    pub top_k: usize,

    /// Characters of retrieved history fed to the model (0 = unlimited)
    #[arg(long, env = "HELPDESK_CONTEXT_LIMIT", default_value_t = DEFAULT_CONTEXT_LIMIT)]
    pub context_limit: usize,

    /// Optional JSONL cache of corpus embeddings, reused across restarts
    #[arg(long, env = "HELPDESK_EMBED_CACHE")]
    pub embedding_cache: Option<PathBuf>,
}

impl CorpusArgs {
    /// Converts the parsed flags into retrieval settings.
    pub fn retrieval_settings(&self) -> RetrievalSettings {
        RetrievalSettings {
            top_k: self.top_k.max(1),
            context_limit: self.context_limit,
        }
    }
}

/// Embedding gateway connection.
#[derive(Args, Debug, Clone)]
pub struct EmbeddingArgs {
    /// Base URL of the OpenAI-compatible embeddings API
    #[arg(
        long,
        env = "HELPDESK_EMBED_BASE",
        default_value = "http://localhost:11434/v1"
    )]
    pub embed_base_url: String,

    /// Embedding model identifier
    #[arg(long, env = "HELPDESK_EMBED_MODEL", default_value = "all-minilm")]
    pub embed_model: String,

    /// API key for the embeddings API (not needed for local servers)
    #[arg(long, env = "HELPDESK_EMBED_API_KEY")]
    pub embed_api_key: Option<String>,

    /// Optional embedding dimension override
    #[arg(long, env = "HELPDESK_EMBED_DIMENSIONS")]
    pub embed_dimensions: Option<usize>,

    /// Max texts per embedding request
    #[arg(long, env = "HELPDESK_EMBED_BATCH", default_value_t = 32)]
    pub embed_batch_size: usize,

    /// Seconds before an embedding request times out
    #[arg(long, env = "HELPDESK_EMBED_TIMEOUT_SECS", default_value_t = 30)]
    pub embed_timeout_secs: u64,
}

impl EmbeddingArgs {
    /// Request timeout for the embedding client.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.embed_timeout_secs.max(1))
    }
}

/// Generation backend connection and model parameters.
#[derive(Args, Debug, Clone)]
pub struct GenerationArgs {
    /// Streaming generate endpoint
    #[arg(long, env = "HELPDESK_OLLAMA_URL", default_value = DEFAULT_GENERATE_URL)]
    pub ollama_url: String,

    /// Model served by the backend
    #[arg(long, env = "HELPDESK_OLLAMA_MODEL", default_value = "llama3")]
    pub model: String,

    /// Context window size in tokens
    #[arg(long, env = "HELPDESK_NUM_CTX", default_value_t = 4096)]
    pub num_ctx: u32,

    /// Maximum tokens generated per reply
    #[arg(long, env = "HELPDESK_NUM_PREDICT", default_value_t = 512)]
    pub num_predict: i32,

    /// Sampling temperature
    #[arg(long, env = "HELPDESK_TEMPERATURE", default_value_t = 0.2)]
    pub temperature: f32,

    /// Seconds allowed to connect to the backend
    #[arg(long, env = "HELPDESK_CONNECT_TIMEOUT_SECS", default_value_t = 10)]
    pub connect_timeout_secs: u64,

    /// Seconds of backend silence tolerated mid-stream
    #[arg(long, env = "HELPDESK_READ_TIMEOUT_SECS", default_value_t = 120)]
    pub read_timeout_secs: u64,
}

impl GenerationArgs {
    /// Converts the parsed flags into relay settings.
    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            endpoint: self.ollama_url.clone(),
            options: GenerationOptions {
                model: self.model.clone(),
                num_ctx: self.num_ctx.max(1),
                num_predict: self.num_predict,
                temperature: self.temperature.max(0.0),
            },
            connect_timeout: Duration::from_secs(self.connect_timeout_secs.max(1)),
            read_timeout: Duration::from_secs(self.read_timeout_secs.max(1)),
        }
    }
}

/// Splits a comma-separated origin list, dropping blanks.
pub fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Installs the global `tracing` subscriber, honouring `RUST_LOG` (default `info`).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // a second install (tests, embedding in another binary) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
