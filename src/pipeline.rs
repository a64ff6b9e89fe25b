//! Process-wide helpdesk context: corpus, index, embedder and relay wired together once.

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use futures_util::stream::BoxStream;
use tracing::{info, warn};

use crate::adapters::{collect_reply, live_units, LiveUnit};
use crate::config::{CorpusArgs, EmbeddingArgs, GenerationArgs};
use crate::corpus::Corpus;
use crate::embedder::openai::OpenAiEmbedder;
use crate::embedder::{embed_corpus, read_cache, write_cache, CacheHeader, Embedder};
use crate::index::{FlatL2Index, SimilarityIndex};
use crate::prompt::{build_prompt, Prompt};
use crate::relay::{GenerationRelay, RelayError};
use crate::retriever::Retriever;

/// Read-only state shared by every request. Built at startup, never mutated afterwards.
pub struct HelpdeskPipeline {
    retriever: Retriever,
    relay: GenerationRelay,
}

impl HelpdeskPipeline {
    /// Wires already-built collaborators.
    pub fn new(retriever: Retriever, relay: GenerationRelay) -> Self {
        Self { retriever, relay }
    }

    /// Loads the corpus, embeds it (or reuses the cache), builds the index and the relay.
    pub async fn bootstrap(
        corpus_args: &CorpusArgs,
        embedding_args: &EmbeddingArgs,
        generation_args: &GenerationArgs,
    ) -> Result<Self> {
        let corpus_args = corpus_args.clone();
        let embedding_args = embedding_args.clone();
        // the embedding client is blocking; keep it off the async workers
        let retriever =
            tokio::task::spawn_blocking(move || build_retriever(&corpus_args, &embedding_args))
                .await
                .map_err(|err| anyhow!("startup task join error: {err}"))??;
        let relay = GenerationRelay::new(generation_args.relay_settings())?;
        info!(
            endpoint = relay.endpoint(),
            model = %relay.options().model,
            "generation relay ready"
        );
        Ok(Self::new(retriever, relay))
    }

    /// Retriever in use.
    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Retrieves history for `query` and renders the prompt. Never fails.
    pub async fn prepare(&self, query: &str) -> Prompt {
        let history = self.retriever.retrieve(query).await;
        build_prompt(&history.text, query)
    }

    /// Full-text reply for an already validated query.
    pub async fn reply(&self, query: &str) -> Result<String, RelayError> {
        let prompt = self.prepare(query).await;
        let frames = self.relay.generate(&prompt).await?;
        collect_reply(frames).await
    }

    /// Live reply for an already validated query. Handshake failures become a single error unit.
    pub async fn stream_reply(&self, query: &str) -> BoxStream<'static, LiveUnit> {
        let prompt = self.prepare(query).await;
        live_units(self.relay.generate(&prompt).await)
    }
}

fn build_retriever(corpus_args: &CorpusArgs, embedding_args: &EmbeddingArgs) -> Result<Retriever> {
    let corpus = Corpus::load(
        &corpus_args.corpus,
        corpus_args.corpus_format,
        &corpus_args.text_field,
    )?;
    anyhow::ensure!(!corpus.is_empty(), "corpus {:?} is empty", corpus_args.corpus);
    info!(entries = corpus.len(), path = ?corpus_args.corpus, "loaded ticket corpus");

    let embedder = OpenAiEmbedder::new(
        embedding_args.embed_api_key.clone(),
        embedding_args.embed_base_url.clone(),
        embedding_args.embed_model.clone(),
        embedding_args.embed_dimensions,
        embedding_args.timeout(),
        embedding_args.embed_batch_size,
    )?;
    info!(endpoint = embedder.endpoint(), "embedding gateway configured");
    let embedder: Arc<dyn Embedder> = Arc::new(embedder);

    let vectors = corpus_vectors(
        embedder.as_ref(),
        &embedding_args.embed_model,
        &corpus,
        corpus_args.embedding_cache.as_deref(),
    )?;
    let index = FlatL2Index::build(vectors).context("failed to build similarity index")?;
    info!(
        vectors = index.len(),
        dimension = ?index.dimension(),
        "similarity index ready"
    );
    Ok(Retriever::new(
        embedder,
        Arc::new(index),
        corpus,
        corpus_args.retrieval_settings(),
    ))
}

/// Reuses cached corpus embeddings when they were produced by `model` for this exact corpus,
/// otherwise embeds the corpus and refreshes the cache.
///
/// A cache hit costs one live embedding of the first ticket: its length must match the cached
/// dimension, which catches a model swapped behind an unchanged name.
pub fn corpus_vectors(
    embedder: &dyn Embedder,
    model: &str,
    corpus: &Corpus,
    cache: Option<&Path>,
) -> Result<Vec<Vec<f32>>> {
    if let (Some(path), Some(first)) = (cache.filter(|path| path.exists()), corpus.texts().next())
    {
        let dimension = embedder
            .embed_batch(&[first])
            .context("failed to embed first ticket for cache validation")?
            .first()
            .map_or(0, Vec::len);
        let expected = CacheHeader::new(model, dimension, corpus);
        match read_cache(path, &expected) {
            Ok(Some(vectors)) => {
                info!(path = ?path, dimension, "loaded corpus embeddings from cache");
                return Ok(vectors);
            }
            Ok(None) => warn!(
                path = ?path,
                "embedding cache was built for another model or corpus; rebuilding"
            ),
            Err(err) => warn!(
                path = ?path,
                error = %format!("{err:#}"),
                "unreadable embedding cache; rebuilding"
            ),
        }
    }
    let vectors = embed_corpus(embedder, corpus)?;
    if let Some(path) = cache {
        let dimension = vectors.first().map_or(0, Vec::len);
        write_cache(path, &CacheHeader::new(model, dimension, corpus), &vectors)
            .with_context(|| format!("failed to write embedding cache {:?}", path))?;
        info!(path = ?path, "wrote corpus embedding cache");
    }
    Ok(vectors)
}
