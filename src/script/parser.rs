//! Dialogue text parser.
//!
//! Accepts `Name: text`, `**Name:** text` and legacy `HOST_A:` markers. Unknown
//! speakers are dropped, `[cue]` markers are lifted out of the spoken text and
//! over-long turns are split at sentence boundaries.

use super::{DialogueTurn, ScriptDocument, VoiceId};
use regex::Regex;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Turns longer than this are split before synthesis.
const MAX_TURN_CHARS: usize = 500;

/// Parses LLM dialogue output into a [`ScriptDocument`].
pub struct DialogueParser {
    names: HashMap<String, VoiceId>,
    marker: Regex,
    cue: Regex,
    sentence_end: Regex,
    spaces: Regex,
    max_turn_chars: usize,
}

impl DialogueParser {
    /// Create a parser that recognizes the given speakers.
    ///
    /// Each speaker is also reachable through the `HOST_A`/`HOST_B` aliases,
    /// by position.
    pub fn new(speakers: &[VoiceId]) -> Self {
        let mut names = HashMap::new();
        for (i, speaker) in speakers.iter().enumerate() {
            names.insert(speaker.as_str().to_lowercase(), speaker.clone());
            let alias = format!("host_{}", (b'a' + i as u8) as char);
            names.entry(alias).or_insert_with(|| speaker.clone());
        }

        Self {
            names,
            marker: Regex::new(r"(?m)^[ \t]*\*{0,2}([A-Za-z][\w]*)\*{0,2}[ \t]*:[ \t]*")
                .expect("Invalid regex"),
            cue: Regex::new(r"\[(\w+(?:\s+\w+)?)\]").expect("Invalid regex"),
            sentence_end: Regex::new(r"[.!?]\s+").expect("Invalid regex"),
            spaces: Regex::new(r"\s{2,}").expect("Invalid regex"),
            max_turn_chars: MAX_TURN_CHARS,
        }
    }

    /// Override the split threshold for long turns.
    pub fn with_max_turn_chars(mut self, max: usize) -> Self {
        self.max_turn_chars = max.max(1);
        self
    }

    /// Parse a full script. Returns an empty document when no turn is recognized.
    pub fn parse(&self, script: &str) -> ScriptDocument {
        let mut turns = Vec::new();

        for (name, body) in self.split_turns(script) {
            let Some(speaker) = self.names.get(&name.to_lowercase()) else {
                warn!("Unknown speaker '{}', skipping turn", name);
                continue;
            };

            let cues: Vec<String> = self
                .cue
                .captures_iter(&body)
                .map(|c| c[1].to_lowercase())
                .collect();
            let stripped = self.cue.replace_all(&body, "");
            let clean = self.spaces.replace_all(stripped.trim(), " ").to_string();

            if clean.is_empty() {
                continue;
            }

            if clean.len() > self.max_turn_chars {
                for (j, part) in self.split_long(&clean).into_iter().enumerate() {
                    let cues = if j == 0 { cues.clone() } else { Vec::new() };
                    turns.push(DialogueTurn::new(speaker.clone(), part, 0).with_cues(cues));
                }
            } else {
                turns.push(DialogueTurn::new(speaker.clone(), clean, 0).with_cues(cues));
            }
        }

        debug!("Parsed {} dialogue turns", turns.len());
        ScriptDocument::from_turns(turns)
    }

    /// Split script text into (speaker, body) pairs.
    fn split_turns(&self, script: &str) -> Vec<(String, String)> {
        let markers: Vec<_> = self.marker.captures_iter(script).collect();
        let mut out = Vec::with_capacity(markers.len());

        for (i, caps) in markers.iter().enumerate() {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let end = markers
                .get(i + 1)
                .and_then(|next| next.get(0))
                .map(|m| m.start())
                .unwrap_or(script.len());
            let body = script[whole.end()..end]
                .trim()
                .trim_start_matches('*')
                .trim()
                .to_string();
            if !body.is_empty() {
                out.push((name.as_str().to_string(), body));
            }
        }

        out
    }

    /// Split a long turn at sentence boundaries.
    fn split_long(&self, text: &str) -> Vec<String> {
        let mut sentences = Vec::new();
        let mut last = 0;
        for m in self.sentence_end.find_iter(text) {
            // Keep the punctuation, drop the whitespace.
            sentences.push(text[last..m.start() + 1].trim());
            last = m.end();
        }
        if last < text.len() {
            sentences.push(text[last..].trim());
        }

        let mut parts = Vec::new();
        let mut current = String::new();
        for sentence in sentences.into_iter().filter(|s| !s.is_empty()) {
            if !current.is_empty() && current.len() + sentence.len() > self.max_turn_chars {
                parts.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(sentence);
        }
        if !current.is_empty() {
            parts.push(current);
        }
        parts
    }
}
