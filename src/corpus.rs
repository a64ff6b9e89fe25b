//! Historical ticket corpus loaded once at startup.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// On-disk layout of the ticket file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum CorpusFormat {
    /// `.csv` files are CSV, anything else JSONL.
    #[default]
    Auto,
    /// One JSON object per line.
    Jsonl,
    /// Comma-separated values with a header row.
    Csv,
}

impl CorpusFormat {
    /// Resolves [`CorpusFormat::Auto`] from the file extension.
    pub fn resolve(self, path: &Path) -> Self {
        match self {
            Self::Auto => {
                let is_csv = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
                if is_csv {
                    Self::Csv
                } else {
                    Self::Jsonl
                }
            }
            explicit => explicit,
        }
    }
}

/// One historical support ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusEntry {
    /// Positional identifier (row index in the source file).
    pub id: usize,
    /// Ticket conversation text.
    pub text: String,
}

/// Immutable, cheaply cloneable list of tickets. Entry `i` always has `id == i`.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    entries: Arc<[CorpusEntry]>,
}

impl Corpus {
    /// Builds a corpus from texts, assigning positional identifiers.
    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entries: Vec<CorpusEntry> = texts
            .into_iter()
            .enumerate()
            .map(|(id, text)| CorpusEntry {
                id,
                text: text.into(),
            })
            .collect();
        Self {
            entries: entries.into(),
        }
    }

    /// Reads the ticket file, taking each ticket's text from the `text_field` key or column.
    pub fn load(path: &Path, format: CorpusFormat, text_field: &str) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("failed to open {:?}", path))?;
        let loaded = match format.resolve(path) {
            CorpusFormat::Csv => Self::from_csv(file, text_field),
            _ => Self::from_jsonl(BufReader::new(file), text_field),
        };
        loaded.with_context(|| format!("failed to load corpus from {:?}", path))
    }

    /// Parses JSONL where every non-blank line is an object holding `text_field`.
    pub fn from_jsonl<R: BufRead>(reader: R, text_field: &str) -> Result<Self> {
        let mut texts = Vec::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line.with_context(|| format!("failed to read line {}", line_no + 1))?;
            if line.trim().is_empty() {
                continue;
            }
            let row: serde_json::Value = serde_json::from_str(&line)
                .with_context(|| format!("invalid JSON at line {}", line_no + 1))?;
            let text = row
                .get(text_field)
                .and_then(|value| value.as_str())
                .ok_or_else(|| {
                    anyhow!(
                        "line {} has no string field '{}'",
                        line_no + 1,
                        text_field
                    )
                })?;
            texts.push(text.to_string());
        }
        Ok(Self::from_texts(texts))
    }

    /// Parses CSV with a header row; `text_field` names the column holding ticket text.
    pub fn from_csv<R: Read>(reader: R, text_field: &str) -> Result<Self> {
        let mut reader = csv::Reader::from_reader(reader);
        let column = reader
            .headers()
            .context("failed to read CSV header")?
            .iter()
            .position(|name| name.trim() == text_field)
            .ok_or_else(|| anyhow!("CSV header has no column '{}'", text_field))?;
        let mut texts = Vec::new();
        for record in reader.records() {
            let record = record.context("invalid CSV record")?;
            let line = record.position().map_or(0, |pos| pos.line());
            let text = record
                .get(column)
                .ok_or_else(|| anyhow!("line {} has no '{}' column", line, text_field))?;
            texts.push(text.to_string());
        }
        Ok(Self::from_texts(texts))
    }

    /// Looks up an entry by identifier.
    pub fn get(&self, id: usize) -> Option<&CorpusEntry> {
        self.entries.get(id)
    }

    /// Iterator over entry texts in identifier order.
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.text.as_str())
    }
}

impl Deref for Corpus {
    type Target = [CorpusEntry];

    fn deref(&self) -> &Self::Target {
        &self.entries
    }
}
