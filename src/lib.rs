#![warn(missing_docs)]
//! Retrieval-augmented IT helpdesk: finds the closest historical ticket for a question and
//! streams a locally generated answer grounded on it.

pub mod adapters;
pub mod config;
pub mod corpus;
pub mod embedder;
pub mod index;
pub mod pipeline;
pub mod prompt;
pub mod relay;
pub mod retriever;
pub mod service;

pub use adapters::{collect_reply, live_units, LiveUnit, END_MARKER, ERROR_PREFIX};
pub use corpus::{Corpus, CorpusEntry, CorpusFormat};
pub use embedder::Embedder;
pub use index::{FlatL2Index, IndexError, SearchHits, SimilarityIndex};
pub use pipeline::HelpdeskPipeline;
pub use prompt::{build_prompt, Prompt};
pub use relay::{
    FrameStream, GenerationFrame, GenerationOptions, GenerationRelay, RelayError, RelaySettings,
};
pub use retriever::{RetrievalResult, RetrievalSettings, Retriever};
