//! Prompt templates for Blogcast.
//!
//! Prompts can be customized by placing a `refinement.toml` file in the custom prompts directory.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Collection of all prompt templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Prompts {
    pub refinement: RefinementPrompts,
    /// Custom variables from config, available in all prompts.
    #[serde(skip)]
    pub variables: HashMap<String, String>,
}

/// System and user template for one editorial pass.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PassPrompt {
    pub system: String,
    pub user: String,
}

/// Prompts for the editorial passes of the refinement loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinementPrompts {
    pub draft: PassPrompt,
    pub accuracy: PassPrompt,
    pub storytelling: PassPrompt,
    pub engagement: PassPrompt,
    /// Appended to every system prompt; describes the JSON verdict contract.
    pub verdict_format: String,
}

impl RefinementPrompts {
    /// Look up the prompt for a named pass.
    pub fn for_pass(&self, pass: &str) -> Option<&PassPrompt> {
        match pass {
            "draft" => Some(&self.draft),
            "accuracy-check" | "accuracy" => Some(&self.accuracy),
            "storytelling" | "storytelling-pass" => Some(&self.storytelling),
            "engagement" | "engagement-pass" => Some(&self.engagement),
            _ => None,
        }
    }
}

impl Default for RefinementPrompts {
    fn default() -> Self {
        Self {
            draft: PassPrompt {
                system: r#"You are a professional podcast script writer. Convert blog article content into a natural, engaging two-host podcast dialogue.

FORMAT RULES:
- Write dialogue between {{host_a}} and {{host_b}}.
- {{host_a}} is the main presenter who drives the conversation.
- {{host_b}} is the curious co-host who asks clarifying questions, reacts, and adds color.
- Each line MUST start with "{{host_a}}:" or "{{host_b}}:" followed by the dialogue.
- Keep each speaking turn to 1-4 sentences.
- Alternate speakers frequently and avoid monologues.

CONTENT RULES:
- Preserve all key facts, data, and insights from the original article.
- Convert formal written language into casual spoken language.
- Open with a greeting that teases the topic, close with a summary and a call to action.
- Do NOT invent facts or statistics not in the source material.

If a draft is provided and it already follows these rules, approve it."#
                    .to_string(),
                user: r#"ARTICLE TITLE: {{title}}

ARTICLE CONTENT:
{{content}}

ADDITIONAL CONTEXT (from related sections):
{{context}}

CURRENT DRAFT (may be empty):
{{script}}"#
                    .to_string(),
            },
            accuracy: PassPrompt {
                system: r#"You are a fact-checking editor for podcast scripts. Compare the script against the original source material.

1. Verify every claim, statistic, and fact against the source.
2. Correct misrepresentations, exaggerations, or invented facts.
3. Make sure no important point from the source was dropped.
4. Keep the "{{host_a}}:" / "{{host_b}}:" dialogue format and the tone.

If the script is accurate, approve it. If an error was introduced by a later editorial pass, you may request a regression to that pass."#
                    .to_string(),
                user: r#"ORIGINAL SOURCE MATERIAL:
{{context}}

PODCAST SCRIPT TO FACT-CHECK:
{{script}}"#
                    .to_string(),
            },
            storytelling: PassPrompt {
                system: r#"You are a storytelling coach for podcast scripts. Improve narrative quality and pacing without changing facts.

- Insert [pause] where a moment of reflection would land.
- Insert [emphasis] before words or phrases to stress.
- Insert tone cues such as [excited], [thoughtful], [serious], [laughing] sparingly.
- Use analogies for complex concepts and give the episode a clear arc.
- Keep the "{{host_a}}:" / "{{host_b}}:" format. Cues go in square brackets.

Approve the script if it already reads well aloud."#
                    .to_string(),
                user: "Review this podcast script for storytelling and pacing:\n\n{{script}}".to_string(),
            },
            engagement: PassPrompt {
                system: r#"You are a listener engagement specialist for podcast scripts.

- Add rhetorical questions and direct listener address where natural.
- Open with a hook in the first 30 seconds and end with a clear call to action.
- Smooth the transitions between topics.
- Keep the "{{host_a}}:" / "{{host_b}}:" format and every [cue] marker.
- Do NOT change facts. Do NOT grow the script past 120% of its input length.

Approve the script if it is already engaging."#
                    .to_string(),
                user: "Review this podcast script for listener engagement:\n\n{{script}}".to_string(),
            },
            verdict_format: r#"
Respond with a JSON object only:
{"verdict": "approve" | "revise" | "regress", "reason": "...", "script": "full revised script when revising", "target": "pass name when regressing"}
Passes in order: {{passes}}."#
                .to_string(),
        }
    }
}

impl Prompts {
    /// Load prompts from the default location, with optional custom directory and variables.
    pub fn load(
        custom_dir: Option<&str>,
        custom_variables: Option<&HashMap<String, String>>,
    ) -> crate::error::Result<Self> {
        let mut prompts = Prompts::default();

        if let Some(vars) = custom_variables {
            prompts.variables = vars.clone();
        }

        if let Some(dir) = custom_dir {
            let custom_path = PathBuf::from(shellexpand::tilde(dir).to_string());

            let refinement_path = custom_path.join("refinement.toml");
            if refinement_path.exists() {
                let content = std::fs::read_to_string(&refinement_path)?;
                prompts.refinement = toml::from_str(&content)?;
            }
        }

        Ok(prompts)
    }

    /// Render a prompt template with the given variables.
    pub fn render(template: &str, vars: &HashMap<String, String>) -> String {
        let mut result = template.to_string();
        for (key, value) in vars {
            result = result.replace(&format!("{{{{{}}}}}", key), value);
        }
        result
    }

    /// Render a prompt template with both provided variables and custom config variables.
    /// Provided variables take precedence over custom config variables.
    pub fn render_with_custom(&self, template: &str, vars: &HashMap<String, String>) -> String {
        let mut merged = self.variables.clone();
        for (key, value) in vars {
            merged.insert(key.clone(), value.clone());
        }
        Self::render(template, &merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_prompts() {
        let prompts = Prompts::default();
        assert!(!prompts.refinement.draft.system.is_empty());
        assert!(prompts.refinement.for_pass("accuracy-check").is_some());
        assert!(prompts.refinement.for_pass("outro").is_none());
    }

    #[test]
    fn test_render_template() {
        let template = "{{host_a}} and {{host_b}} talk about {{title}}.";
        let mut vars = HashMap::new();
        vars.insert("host_a".to_string(), "Mike".to_string());
        vars.insert("host_b".to_string(), "Sarah".to_string());
        vars.insert("title".to_string(), "Rust".to_string());

        let result = Prompts::render(template, &vars);
        assert_eq!(result, "Mike and Sarah talk about Rust.");
    }

    #[test]
    fn test_custom_variables_are_overridden_by_call_site() {
        let mut prompts = Prompts::default();
        prompts.variables.insert("show".to_string(), "Default Show".to_string());
        prompts.variables.insert("title".to_string(), "ignored".to_string());

        let mut vars = HashMap::new();
        vars.insert("title".to_string(), "Ownership".to_string());

        let out = prompts.render_with_custom("{{show}}: {{title}}", &vars);
        assert_eq!(out, "Default Show: Ownership");
    }
}
