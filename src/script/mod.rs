//! Two-host script documents.
//!
//! A [`ScriptDocument`] is replaced wholesale by each editorial pass; the
//! audit trail of verdicts travels with it in [`PassResult`] records.

mod parser;

pub use parser::DialogueParser;

use crate::error::{BlogcastError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Speaker identity, matched against the configured voice profiles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoiceId(pub String);

impl VoiceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VoiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One speaker's utterance at a fixed position in the script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueTurn {
    pub speaker: VoiceId,
    pub text: String,
    pub turn_index: usize,
    /// Delivery cues such as `pause` or `excited`, stripped from `text`.
    #[serde(default)]
    pub cues: Vec<String>,
}

impl DialogueTurn {
    pub fn new(speaker: VoiceId, text: impl Into<String>, turn_index: usize) -> Self {
        Self {
            speaker,
            text: text.into(),
            turn_index,
            cues: Vec::new(),
        }
    }

    pub fn with_cues(mut self, cues: Vec<String>) -> Self {
        self.cues = cues;
        self
    }

    pub fn has_cue(&self, cue: &str) -> bool {
        self.cues.iter().any(|c| c.eq_ignore_ascii_case(cue))
    }
}

/// Outcome of one pass invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Verdict {
    Approved,
    RevisionRequested,
    RegressionRequested { target: String },
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Approved => write!(f, "approved"),
            Verdict::RevisionRequested => write!(f, "revision requested"),
            Verdict::RegressionRequested { target } => write!(f, "regression to '{}'", target),
        }
    }
}

/// Audit record for one pass invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassResult {
    pub pass: String,
    pub verdict: Verdict,
    pub reason: Option<String>,
    /// Script revision the verdict was given on.
    pub revision: u32,
    pub decided_at: DateTime<Utc>,
}

impl PassResult {
    pub fn new(pass: &str, verdict: Verdict, reason: Option<String>, revision: u32) -> Self {
        Self {
            pass: pass.to_string(),
            verdict,
            reason,
            revision,
            decided_at: Utc::now(),
        }
    }
}

/// Ordered two-voice dialogue plus its revision history.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScriptDocument {
    pub turns: Vec<DialogueTurn>,
    pub revision: u32,
    #[serde(default)]
    pub history: Vec<PassResult>,
}

impl ScriptDocument {
    /// Build a document from turns, renumbering them from zero.
    pub fn from_turns(turns: Vec<DialogueTurn>) -> Self {
        let turns = turns
            .into_iter()
            .enumerate()
            .map(|(i, mut t)| {
                t.turn_index = i;
                t
            })
            .collect();
        Self {
            turns,
            revision: 0,
            history: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Replace the dialogue with a new draft, keeping the audit trail.
    pub fn replace_with(&mut self, draft: ScriptDocument) {
        self.turns = ScriptDocument::from_turns(draft.turns).turns;
        self.revision += 1;
    }

    pub fn record(&mut self, result: PassResult) {
        self.history.push(result);
    }

    /// Verdicts recorded for a given pass, in order.
    pub fn results_for<'a>(&'a self, pass: &'a str) -> impl Iterator<Item = &'a PassResult> + 'a {
        self.history.iter().filter(move |r| r.pass == pass)
    }

    /// Distinct speakers in order of first appearance.
    pub fn speakers(&self) -> Vec<VoiceId> {
        let mut seen = HashSet::new();
        self.turns
            .iter()
            .filter(|t| seen.insert(t.speaker.clone()))
            .map(|t| t.speaker.clone())
            .collect()
    }

    /// Check that turn indices form a contiguous zero-based sequence.
    pub fn validate(&self) -> Result<()> {
        for (expected, turn) in self.turns.iter().enumerate() {
            if turn.turn_index != expected {
                return Err(BlogcastError::Fatal(format!(
                    "script turn indices are not contiguous: expected {}, found {}",
                    expected, turn.turn_index
                )));
            }
            if turn.text.trim().is_empty() {
                return Err(BlogcastError::Fatal(format!("turn {} has no text", expected)));
            }
        }
        Ok(())
    }

    /// Render the dialogue back to `Name: [cue] text` lines.
    pub fn to_text(&self) -> String {
        self.turns
            .iter()
            .map(|t| {
                let cues: String = t.cues.iter().map(|c| format!("[{}] ", c)).collect();
                format!("{}: {}{}", t.speaker, cues, t.text)
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Total spoken characters, used to size prompts and progress.
    pub fn char_count(&self) -> usize {
        self.turns.iter().map(|t| t.text.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(speaker: &str, text: &str, idx: usize) -> DialogueTurn {
        DialogueTurn::new(VoiceId::new(speaker), text, idx)
    }

    #[test]
    fn test_from_turns_renumbers() {
        let doc = ScriptDocument::from_turns(vec![turn("Mike", "Hi", 7), turn("Sarah", "Hey", 3)]);
        assert_eq!(doc.turns[0].turn_index, 0);
        assert_eq!(doc.turns[1].turn_index, 1);
        assert!(doc.validate().is_ok());
    }

    #[test]
    fn test_validate_detects_gaps() {
        let doc = ScriptDocument {
            turns: vec![turn("Mike", "Hi", 0), turn("Sarah", "Hey", 2)],
            revision: 0,
            history: Vec::new(),
        };
        assert!(doc.validate().is_err());
    }

    #[test]
    fn test_replace_keeps_history_and_bumps_revision() {
        let mut doc = ScriptDocument::from_turns(vec![turn("Mike", "Hi", 0)]);
        doc.record(PassResult::new("draft", Verdict::RevisionRequested, None, 0));
        doc.replace_with(ScriptDocument::from_turns(vec![
            turn("Mike", "Hello", 0),
            turn("Sarah", "Welcome", 1),
        ]));

        assert_eq!(doc.revision, 1);
        assert_eq!(doc.len(), 2);
        assert_eq!(doc.history.len(), 1);
        assert_eq!(doc.speakers(), vec![VoiceId::new("Mike"), VoiceId::new("Sarah")]);
    }

    #[test]
    fn test_to_text_includes_cues() {
        let doc = ScriptDocument::from_turns(vec![
            turn("Mike", "Welcome back.", 0).with_cues(vec!["excited".to_string()]),
            turn("Sarah", "Glad to be here.", 1),
        ]);
        assert_eq!(
            doc.to_text(),
            "Mike: [excited] Welcome back.\n\nSarah: Glad to be here."
        );
    }
}
