//! Turns a user query into the single best-matching historical ticket text.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use tracing::{debug, warn};

use crate::corpus::Corpus;
use crate::embedder::Embedder;
use crate::index::SimilarityIndex;

/// Default neighbour count requested from the index.
pub const DEFAULT_TOP_K: usize = 3;
/// Default cap, in characters, on retrieved history fed to the model.
pub const DEFAULT_CONTEXT_LIMIT: usize = 2000;

/// Retrieval knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalSettings {
    /// Neighbours requested from the index. Only the nearest one is used.
    pub top_k: usize,
    /// Maximum characters of history kept; `0` disables truncation.
    pub context_limit: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            context_limit: DEFAULT_CONTEXT_LIMIT,
        }
    }
}

/// Best-matching ticket text, possibly clipped to the context limit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetrievalResult {
    /// Retrieved text; empty when retrieval failed.
    pub text: String,
    /// Whether `text` was cut at the context limit.
    pub truncated: bool,
}

/// Embeds queries and looks up the nearest corpus entry.
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn SimilarityIndex>,
    corpus: Corpus,
    settings: RetrievalSettings,
}

impl Retriever {
    /// Wires a retriever over shared, read-only collaborators.
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn SimilarityIndex>,
        corpus: Corpus,
        settings: RetrievalSettings,
    ) -> Self {
        let settings = RetrievalSettings {
            top_k: settings.top_k.max(1),
            ..settings
        };
        Self {
            embedder,
            index,
            corpus,
            settings,
        }
    }

    /// Active settings.
    pub fn settings(&self) -> RetrievalSettings {
        self.settings
    }

    /// Retrieves history for `query`. Never fails: any embedding or index error is logged and
    /// yields an empty result so generation can still answer generically.
    pub async fn retrieve(&self, query: &str) -> RetrievalResult {
        let this = self.clone();
        let query = query.to_string();
        let outcome = tokio::task::spawn_blocking(move || this.nearest_text(&query))
            .await
            .map_err(|err| anyhow!("retrieval task join error: {err}"))
            .and_then(|inner| inner);
        match outcome {
            Ok(text) => self.clip(text),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "retrieval failed; continuing without history");
                RetrievalResult::default()
            }
        }
    }

    /// Blocking variant of [`Retriever::retrieve`] for callers outside an async runtime.
    pub fn retrieve_blocking(&self, query: &str) -> RetrievalResult {
        match self.nearest_text(query) {
            Ok(text) => self.clip(text),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "retrieval failed; continuing without history");
                RetrievalResult::default()
            }
        }
    }

    fn nearest_text(&self, query: &str) -> Result<String> {
        let mut vectors = self.embedder.embed_batch(&[query])?;
        let vector = vectors
            .pop()
            .ok_or_else(|| anyhow!("embedder returned no vector for the query"))?;
        let hits = self.index.search(&vector, self.settings.top_k)?;
        let best = hits
            .nearest()
            .ok_or_else(|| anyhow!("similarity index returned no neighbours"))?;
        let entry = self
            .corpus
            .get(best)
            .ok_or_else(|| anyhow!("neighbour id {best} outside corpus of {}", self.corpus.len()))?;
        debug!(id = entry.id, distance = ?hits.distances.first(), "retrieved ticket");
        Ok(entry.text.clone())
    }

    fn clip(&self, text: String) -> RetrievalResult {
        let (text, truncated) = truncate_chars(text, self.settings.context_limit);
        if truncated {
            debug!(limit = self.settings.context_limit, "truncated retrieved history");
        }
        RetrievalResult { text, truncated }
    }
}

/// Keeps the first `limit` characters of `text`; `limit == 0` keeps everything.
pub fn truncate_chars(mut text: String, limit: usize) -> (String, bool) {
    if limit == 0 {
        return (text, false);
    }
    match text.char_indices().nth(limit) {
        Some((byte_offset, _)) => {
            text.truncate(byte_offset);
            (text, true)
        }
        None => (text, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{FlatL2Index, IndexError, SearchHits};

    struct KeywordEmbedder;

    impl Embedder for KeywordEmbedder {
        fn batch_size(&self) -> usize {
            8
        }

        fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
            Ok(inputs
                .iter()
                .map(|text| {
                    let text = text.to_lowercase();
                    vec![
                        text.contains("password") as u8 as f32,
                        text.contains("printer") as u8 as f32,
                    ]
                })
                .collect())
        }
    }

    struct FailingEmbedder;

    impl Embedder for FailingEmbedder {
        fn batch_size(&self) -> usize {
            1
        }

        fn embed_batch(&self, _inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
            Err(anyhow!("embedding model offline"))
        }
    }

    struct StrayIndex;

    impl SimilarityIndex for StrayIndex {
        fn search(&self, _query: &[f32], _k: usize) -> Result<SearchHits, IndexError> {
            Ok(SearchHits {
                distances: vec![0.0],
                ids: vec![42],
            })
        }

        fn len(&self) -> usize {
            1
        }
    }

    fn retriever_over(
        texts: &[&str],
        embedder: Arc<dyn Embedder>,
        settings: RetrievalSettings,
    ) -> Retriever {
        let corpus = Corpus::from_texts(texts.iter().copied());
        let vectors = KeywordEmbedder.embed_batch(texts).expect("embed corpus");
        let index = FlatL2Index::build(vectors).expect("index");
        Retriever::new(embedder, Arc::new(index), corpus, settings)
    }

    #[tokio::test]
    async fn picks_nearest_entry_unmodified() {
        let retriever = retriever_over(
            &["Printer jammed, cleared tray.", "Reset your password via the portal."],
            Arc::new(KeywordEmbedder),
            RetrievalSettings {
                top_k: 3,
                context_limit: 1000,
            },
        );
        let result = retriever.retrieve("I forgot my password").await;
        assert_eq!(result.text, "Reset your password via the portal.");
        assert!(!result.truncated);
    }

    #[tokio::test]
    async fn truncates_to_context_limit() {
        let retriever = retriever_over(
            &["password reset steps: open portal, click forgot"],
            Arc::new(KeywordEmbedder),
            RetrievalSettings {
                top_k: 1,
                context_limit: 8,
            },
        );
        let result = retriever.retrieve("password").await;
        assert_eq!(result.text, "password");
        assert!(result.truncated);
        assert!(result.text.chars().count() <= 8);
    }

    #[tokio::test]
    async fn embedding_failure_degrades_to_empty_history() {
        let retriever = retriever_over(
            &["Reset your password via the portal."],
            Arc::new(FailingEmbedder),
            RetrievalSettings::default(),
        );
        assert_eq!(retriever.retrieve("password").await, RetrievalResult::default());
    }

    #[test]
    fn out_of_range_neighbour_degrades_to_empty_history() {
        let retriever = Retriever::new(
            Arc::new(KeywordEmbedder),
            Arc::new(StrayIndex),
            Corpus::from_texts(["only entry"]),
            RetrievalSettings::default(),
        );
        assert_eq!(retriever.retrieve_blocking("anything"), RetrievalResult::default());
    }

    #[test]
    fn dimension_mismatch_degrades_to_empty_history() {
        let corpus = Corpus::from_texts(["a"]);
        let index = FlatL2Index::build(vec![vec![1.0, 2.0, 3.0]]).expect("index");
        let retriever = Retriever::new(
            Arc::new(KeywordEmbedder),
            Arc::new(index),
            corpus,
            RetrievalSettings::default(),
        );
        assert_eq!(retriever.retrieve_blocking("printer"), RetrievalResult::default());
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let (text, truncated) = truncate_chars("héllo wörld".to_string(), 4);
        assert_eq!(text, "héll");
        assert!(truncated);
        assert_eq!(truncate_chars("short".to_string(), 0), ("short".to_string(), false));
        assert_eq!(truncate_chars("exact".to_string(), 5), ("exact".to_string(), false));
    }

    #[test]
    fn top_k_is_at_least_one() {
        let retriever = Retriever::new(
            Arc::new(KeywordEmbedder),
            Arc::new(FlatL2Index::new()),
            Corpus::default(),
            RetrievalSettings {
                top_k: 0,
                context_limit: 10,
            },
        );
        assert_eq!(retriever.settings().top_k, 1);
    }
}
