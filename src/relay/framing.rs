//! Reassembles newline-delimited JSON frames split arbitrarily across network reads.

use serde::Deserialize;

/// Accumulates raw bytes and hands back complete lines.
///
/// After every [`NdjsonFramer::push`] the internal buffer holds no newline: it is either empty
/// or a fragment of a frame whose terminator has not arrived yet. `scanned` bytes of that
/// fragment are already known to be newline-free, so a long frame arriving in many small reads
/// is searched once.
#[derive(Debug, Default)]
pub struct NdjsonFramer {
    buffer: Vec<u8>,
    scanned: usize,
}

impl NdjsonFramer {
    /// Creates an empty framer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `bytes` and returns every line completed by them, in order. Line terminators
    /// (`\n`, optionally preceded by `\r`) are stripped and blank lines skipped.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut lines = Vec::new();
        let mut start = 0;
        let mut from = self.scanned;
        while let Some(offset) = self.buffer[from..].iter().position(|b| *b == b'\n') {
            let end = from + offset;
            let mut line = &self.buffer[start..end];
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }
            if !line.iter().all(u8::is_ascii_whitespace) {
                lines.push(String::from_utf8_lossy(line).into_owned());
            }
            start = end + 1;
            from = start;
        }
        self.buffer.drain(..start);
        self.scanned = self.buffer.len();
        lines
    }

    /// Drains whatever unterminated fragment is left once the body has ended.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        if rest.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// Meaning of one backend line.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendLine {
    /// Incremental text to forward.
    Token(String),
    /// Terminal frame; generation is complete.
    Done(DoneStats),
    /// The backend reported a failure in-band.
    Error(String),
    /// Well-formed frame carrying no text.
    Empty,
}

/// Counters reported on the terminal frame, when the backend includes them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DoneStats {
    /// Tokens generated.
    #[serde(default)]
    pub eval_count: Option<u64>,
    /// Wall time in nanoseconds.
    #[serde(default)]
    pub total_duration: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    stats: DoneStats,
}

/// Classifies one line. Lines that are not a JSON frame are passed through verbatim as tokens.
pub fn decode_line(line: &str) -> BackendLine {
    let frame: RawFrame = match serde_json::from_str(line) {
        Ok(frame) => frame,
        Err(_) => return BackendLine::Token(line.to_string()),
    };
    if let Some(message) = frame.error {
        return BackendLine::Error(message);
    }
    if frame.done {
        return BackendLine::Done(frame.stats);
    }
    if frame.response.is_empty() {
        BackendLine::Empty
    } else {
        BackendLine::Token(frame.response)
    }
}
