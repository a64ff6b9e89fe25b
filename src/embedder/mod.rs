//! Embedding gateway: text in, fixed-length vectors out.

pub mod openai;

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use crc32fast::Hasher as Crc32;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::corpus::Corpus;

/// Maps batches of texts to embedding vectors. Implementations must be deterministic for a fixed
/// model and return one vector per input, in input order.
pub trait Embedder: Send + Sync {
    /// Maximum number of inputs accepted by a single [`Embedder::embed_batch`] call.
    fn batch_size(&self) -> usize;

    /// Embeds every input; fails if the batch exceeds [`Embedder::batch_size`].
    fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>>;
}

/// Embeds all corpus texts, splitting them into batches the embedder accepts.
pub fn embed_corpus(embedder: &dyn Embedder, corpus: &Corpus) -> Result<Vec<Vec<f32>>> {
    let texts: Vec<&str> = corpus.texts().collect();
    let mut vectors = Vec::with_capacity(texts.len());
    for (batch_no, batch) in texts.chunks(embedder.batch_size().max(1)).enumerate() {
        let mut embedded = embedder
            .embed_batch(batch)
            .with_context(|| format!("failed to embed corpus batch {}", batch_no + 1))?;
        anyhow::ensure!(
            embedded.len() == batch.len(),
            "embedder returned {} vectors for {} texts",
            embedded.len(),
            batch.len()
        );
        vectors.append(&mut embedded);
    }
    info!(entries = vectors.len(), "embedded corpus");
    Ok(vectors)
}

/// First line of the on-disk embedding cache: what produced the vectors below it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheHeader {
    /// Embedding model identifier.
    pub model: String,
    /// Length of every cached vector.
    pub dimension: usize,
    /// Number of corpus entries.
    pub entries: usize,
    /// CRC32 over every corpus text, in identifier order.
    pub corpus_digest: u32,
}

impl CacheHeader {
    /// Header describing `corpus` embedded by `model` into `dimension`-long vectors.
    pub fn new(model: &str, dimension: usize, corpus: &Corpus) -> Self {
        Self {
            model: model.to_string(),
            dimension,
            entries: corpus.len(),
            corpus_digest: corpus_digest(corpus),
        }
    }
}

/// Checksum of the corpus texts; any edit, insertion or reordering changes it.
pub fn corpus_digest(corpus: &Corpus) -> u32 {
    let mut hasher = Crc32::new();
    for text in corpus.texts() {
        // length prefix keeps ["ab", "c"] and ["a", "bc"] apart
        hasher.update(&(text.len() as u64).to_le_bytes());
        hasher.update(text.as_bytes());
    }
    hasher.finalize()
}

/// One line of the on-disk embedding cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// Corpus entry identifier.
    pub id: usize,
    /// Embedding of the entry text.
    pub embedding: Vec<f32>,
}

/// Reads cached corpus embeddings. Returns `None` when the cache was produced for another
/// model, dimension or corpus (or predates the header line), so callers can rebuild it.
pub fn read_cache(path: &Path, expected: &CacheHeader) -> Result<Option<Vec<Vec<f32>>>> {
    let file = File::open(path).with_context(|| format!("failed to open {:?}", path))?;
    let mut lines = BufReader::new(file).lines().enumerate();
    let header = match lines.next() {
        Some((_, line)) => line.context("failed to read cache header")?,
        None => return Ok(None),
    };
    match serde_json::from_str::<CacheHeader>(&header) {
        Ok(header) if header == *expected => {}
        _ => return Ok(None),
    }
    let mut vectors = Vec::with_capacity(expected.entries);
    for (line_no, line) in lines {
        let line = line.with_context(|| format!("failed to read line {}", line_no + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: EmbeddingRecord = serde_json::from_str(&line)
            .with_context(|| format!("invalid embedding record at line {}", line_no + 1))?;
        if record.id != vectors.len() || record.embedding.len() != expected.dimension {
            return Ok(None);
        }
        vectors.push(record.embedding);
    }
    if vectors.len() != expected.entries {
        return Ok(None);
    }
    Ok(Some(vectors))
}

/// Writes `header` then one [`EmbeddingRecord`] per vector, as JSONL.
pub fn write_cache(path: &Path, header: &CacheHeader, vectors: &[Vec<f32>]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {:?}", path))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, header)?;
    writer.write_all(b"\n")?;
    for (id, embedding) in vectors.iter().enumerate() {
        let record = EmbeddingRecord {
            id,
            embedding: embedding.clone(),
        };
        serde_json::to_writer(&mut writer, &record)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}
