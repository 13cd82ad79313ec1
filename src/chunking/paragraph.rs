//! Paragraph-first chunking.

use super::{Chunker, ChunkingConfig, ContentChunk};
use regex::Regex;
use tracing::debug;

/// Packs whole paragraphs into chunks of roughly `chunk_words` words.
pub struct ParagraphChunker {
    sentence_end: Regex,
}

impl ParagraphChunker {
    pub fn new() -> Self {
        Self {
            sentence_end: Regex::new(r"[.!?]\s+").expect("Invalid regex"),
        }
    }

    fn sentences<'a>(&self, paragraph: &'a str) -> Vec<&'a str> {
        let mut out = Vec::new();
        let mut last = 0;
        for m in self.sentence_end.find_iter(paragraph) {
            out.push(paragraph[last..m.start() + 1].trim());
            last = m.end();
        }
        if last < paragraph.len() {
            out.push(paragraph[last..].trim());
        }
        out.retain(|s| !s.is_empty());
        out
    }
}

impl Default for ParagraphChunker {
    fn default() -> Self {
        Self::new()
    }
}

/// Running chunk under construction.
struct Builder<'c> {
    config: &'c ChunkingConfig,
    current: String,
    words: usize,
    /// Whether `current` holds anything beyond carried-over overlap.
    fresh: bool,
    chunks: Vec<ContentChunk>,
}

impl<'c> Builder<'c> {
    fn new(config: &'c ChunkingConfig) -> Self {
        Self {
            config,
            current: String::new(),
            words: 0,
            fresh: false,
            chunks: Vec::new(),
        }
    }

    fn push(&mut self, piece: &str, separator: &str) {
        let words = piece.split_whitespace().count();
        if self.fresh && self.words + words > self.config.chunk_words {
            self.flush();
        }
        if !self.current.is_empty() {
            self.current.push_str(separator);
        }
        self.current.push_str(piece);
        self.words += words;
        self.fresh = true;
    }

    fn flush(&mut self) {
        let text = std::mem::take(&mut self.current).trim().to_string();
        self.words = 0;
        self.fresh = false;
        if text.is_empty() {
            return;
        }

        self.current = overlap_tail(&text, self.config.overlap_words);
        self.words = self.current.split_whitespace().count();
        self.chunks.push(ContentChunk::new(text, self.chunks.len()));
    }

    fn finish(mut self) -> Vec<ContentChunk> {
        if self.fresh {
            self.flush();
        }
        self.chunks
    }
}

/// Last `n` words of `text`.
fn overlap_tail(text: &str, n: usize) -> String {
    if n == 0 {
        return String::new();
    }
    let words: Vec<&str> = text.split_whitespace().collect();
    if n >= words.len() {
        return String::new();
    }
    words[words.len() - n..].join(" ")
}

impl Chunker for ParagraphChunker {
    fn chunk(&self, text: &str, config: &ChunkingConfig) -> Vec<ContentChunk> {
        let mut builder = Builder::new(config);

        for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
            let words = paragraph.split_whitespace().count();
            if words > config.chunk_words {
                for sentence in self.sentences(paragraph) {
                    builder.push(sentence, " ");
                }
            } else {
                builder.push(paragraph, "\n\n");
            }
        }

        let chunks = builder.finish();
        debug!("Created {} chunks", chunks.len());
        chunks
    }
}
