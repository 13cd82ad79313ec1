//! Pass evaluator backed by OpenAI chat completions.
//!
//! Each pass renders its prompt pair, asks for a JSON verdict and maps it to a
//! [`PassOutcome`]. Scripts travel as `Name: text` dialogue and are parsed back
//! with [`DialogueParser`].

use super::{PassContext, PassEvaluator, PassOutcome};
use crate::config::{PassPrompt, Prompts, Settings};
use crate::error::{BlogcastError, Result};
use crate::knowledge::KnowledgeChunk;
use crate::openai::create_client_with_timeout;
use crate::script::{DialogueParser, ScriptDocument, VoiceId};
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs, ResponseFormat,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Grounding text is capped at this many characters per prompt.
const MAX_CONTEXT_CHARS: usize = 4000;

/// A revision from this pass may not grow the script by more than this factor.
const ENGAGEMENT_GROWTH_CAP: f64 = 1.2;

/// JSON body the model is asked to return.
#[derive(Debug, Deserialize)]
struct LlmVerdict {
    verdict: String,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    script: Option<String>,
    #[serde(default)]
    target: Option<String>,
}

/// LLM-backed drafting and critique passes.
pub struct LlmPassEvaluator {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    draft_model: String,
    critique_model: String,
    draft_temperature: f32,
    critique_temperature: f32,
    max_source_chars: usize,
    prompts: Prompts,
    parser: DialogueParser,
    hosts: (VoiceId, VoiceId),
}

impl LlmPassEvaluator {
    pub fn from_settings(settings: &Settings, prompts: Prompts) -> Result<Self> {
        let hosts = (
            VoiceId::new(settings.voices.host_a.name.clone()),
            VoiceId::new(settings.voices.host_b.name.clone()),
        );
        Ok(Self {
            client: create_client_with_timeout(Duration::from_secs(settings.llm.timeout_seconds))?,
            draft_model: settings.llm.draft_model.clone(),
            critique_model: settings.llm.critique_model.clone(),
            draft_temperature: settings.llm.draft_temperature,
            critique_temperature: settings.llm.critique_temperature,
            max_source_chars: settings.llm.max_source_chars,
            prompts,
            parser: DialogueParser::new(&[hosts.0.clone(), hosts.1.clone()]),
            hosts,
        })
    }

    fn is_drafting(pass: &str) -> bool {
        pass == "draft"
    }

    fn prompt_for(&self, pass: &str) -> Result<&PassPrompt> {
        self.prompts
            .refinement
            .for_pass(pass)
            .ok_or_else(|| BlogcastError::Config(format!("no prompt configured for pass '{}'", pass)))
    }

    /// A non-empty draft with both hosts speaking needs no new generation.
    fn is_well_formed(&self, script: &ScriptDocument) -> bool {
        let speakers = script.speakers();
        !script.is_empty() && speakers.contains(&self.hosts.0) && speakers.contains(&self.hosts.1)
    }

    fn variables(&self, ctx: &PassContext<'_>, script: &ScriptDocument) -> HashMap<String, String> {
        let content: String = ctx.source.text.chars().take(self.max_source_chars).collect();

        let mut vars = HashMap::new();
        vars.insert("host_a".to_string(), self.hosts.0.to_string());
        vars.insert("host_b".to_string(), self.hosts.1.to_string());
        vars.insert("title".to_string(), ctx.source.title.clone());
        vars.insert("content".to_string(), content);
        vars.insert("context".to_string(), format_grounding(ctx.grounding));
        vars.insert("script".to_string(), script.to_text());
        vars.insert("passes".to_string(), ctx.passes.join(", "));
        vars
    }

    async fn complete(&self, pass: &str, system: String, user: String) -> Result<String> {
        let (model, temperature) = if Self::is_drafting(pass) {
            (&self.draft_model, self.draft_temperature)
        } else {
            (&self.critique_model, self.critique_temperature)
        };

        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system)
                .build()
                .map_err(|e| BlogcastError::OpenAI(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(user)
                .build()
                .map_err(|e| BlogcastError::OpenAI(e.to_string()))?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages(messages)
            .temperature(temperature)
            .response_format(ResponseFormat::JsonObject)
            .build()
            .map_err(|e| BlogcastError::OpenAI(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| BlogcastError::OpenAI(format!("Pass '{}' failed: {}", pass, e)))?;

        response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| BlogcastError::Transient(format!("empty response for pass '{}'", pass)))
    }

    /// Map a raw model response to an outcome.
    fn interpret(&self, pass: &str, current: &ScriptDocument, raw: &str) -> Result<PassOutcome> {
        let verdict: LlmVerdict = serde_json::from_str(raw).map_err(|e| {
            BlogcastError::Transient(format!(
                "unparseable verdict from pass '{}': {}. Response was: {}",
                pass,
                e,
                preview(raw)
            ))
        })?;

        let revised = verdict
            .script
            .as_deref()
            .map(|s| self.parser.parse(s))
            .filter(|doc| !doc.is_empty());

        match verdict.verdict.trim().to_lowercase().as_str() {
            "approve" | "approved" => {
                if current.is_empty() {
                    let generated = revised.ok_or_else(|| {
                        BlogcastError::Transient(format!(
                            "pass '{}' approved without producing a script",
                            pass
                        ))
                    })?;
                    Ok(PassOutcome::Approve {
                        reason: verdict.reason,
                        generated: Some(generated),
                    })
                } else {
                    Ok(PassOutcome::Approve {
                        reason: verdict.reason,
                        generated: None,
                    })
                }
            }
            "revise" | "revision" => {
                let draft = revised.ok_or_else(|| {
                    BlogcastError::Transient(format!(
                        "pass '{}' asked for a revision without a usable script",
                        pass
                    ))
                })?;
                if pass.starts_with("engagement") && !current.is_empty() {
                    let limit = current.char_count() as f64 * ENGAGEMENT_GROWTH_CAP;
                    if draft.char_count() as f64 > limit {
                        return Err(BlogcastError::Transient(format!(
                            "pass '{}' grew the script from {} to {} chars",
                            pass,
                            current.char_count(),
                            draft.char_count()
                        )));
                    }
                }
                Ok(PassOutcome::Revise {
                    draft,
                    reason: verdict
                        .reason
                        .unwrap_or_else(|| "revision requested".to_string()),
                })
            }
            "regress" | "regression" => {
                let target = verdict.target.filter(|t| !t.trim().is_empty()).ok_or_else(|| {
                    BlogcastError::Transient(format!("pass '{}' regressed without a target", pass))
                })?;
                Ok(PassOutcome::Regress {
                    target: target.trim().to_string(),
                    reason: verdict
                        .reason
                        .unwrap_or_else(|| "regression requested".to_string()),
                    draft: revised,
                })
            }
            other => Err(BlogcastError::Transient(format!(
                "pass '{}' returned unknown verdict '{}'",
                pass, other
            ))),
        }
    }
}

#[async_trait]
impl PassEvaluator for LlmPassEvaluator {
    #[instrument(skip_all, fields(pass = ctx.pass, attempt = ctx.attempt))]
    async fn evaluate(&self, ctx: &PassContext<'_>, script: &ScriptDocument) -> Result<PassOutcome> {
        if Self::is_drafting(ctx.pass) && self.is_well_formed(script) {
            debug!("Existing draft is well-formed, skipping generation");
            return Ok(PassOutcome::Approve {
                reason: Some("draft already covers both hosts".to_string()),
                generated: None,
            });
        }

        let prompt = self.prompt_for(ctx.pass)?;
        let vars = self.variables(ctx, script);
        let system = format!(
            "{}\n{}",
            self.prompts.render_with_custom(&prompt.system, &vars),
            self.prompts
                .render_with_custom(&self.prompts.refinement.verdict_format, &vars)
        );
        let user = self.prompts.render_with_custom(&prompt.user, &vars);

        let raw = self.complete(ctx.pass, system, user).await?;
        debug!("Pass response: {}", preview(&raw));

        let outcome = self.interpret(ctx.pass, script, &raw);
        if let Err(e) = &outcome {
            warn!("Discarding unusable pass response: {}", e);
        }
        outcome
    }
}

fn preview(raw: &str) -> String {
    raw.chars().take(300).collect()
}

/// Format grounding chunks for a prompt.
fn format_grounding(chunks: &[KnowledgeChunk]) -> String {
    let mut out = String::new();
    for chunk in chunks {
        let entry = format!("---\n[section {}]\n{}\n", chunk.position + 1, chunk.text);
        if out.len() + entry.len() > MAX_CONTEXT_CHARS {
            break;
        }
        out.push_str(&entry);
    }
    out
}
