//! Sentence boundary detection for incremental synthesis.
//!
//! A sentence ends at `.`, `!` or `?` followed by whitespace. Text after the
//! last boundary is held back until more fragments arrive or the stream ends.

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

/// Split `text` into complete sentences and the trailing remainder.
///
/// Sentences are trimmed and empty ones are skipped. The remainder keeps its
/// leading whitespace trimmed but is otherwise untouched.
pub fn split_buffered_text(text: &str) -> (Vec<String>, String) {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if !is_terminator(c) {
            continue;
        }
        // runs like "?!" or "..." end together
        while let Some(&(_, next)) = chars.peek() {
            if is_terminator(next) {
                chars.next();
            } else {
                break;
            }
        }
        if let Some(&(end, next)) = chars.peek()
            && next.is_whitespace()
        {
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            start = end;
        }
    }

    (sentences, text[start..].trim_start().to_string())
}

/// Accumulates streamed fragments and yields whole sentences.
#[derive(Debug, Default, Clone)]
pub struct SentenceBuffer {
    pending: String,
}

impl SentenceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fragment and return any sentences it completed.
    pub fn push(&mut self, fragment: &str) -> Vec<String> {
        self.pending.push_str(fragment);
        let (sentences, rest) = split_buffered_text(&self.pending);
        self.pending = rest;
        sentences
    }

    /// Text not yet terminated by a boundary.
    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Flush whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        let rest = rest.trim();
        if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        }
    }
}
