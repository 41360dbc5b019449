//! Answer synthesizer
//!
//! Builds a grounded prompt from the assembled facts and asks the text
//! generator for a narrative. Synthesis never fails a question: an empty
//! context yields a fixed "nothing found" message without calling the model,
//! and a failed or timed-out generation yields the raw fact list instead.

use super::assembler::{render, AssembledContext, FactStatement, Truncation};
use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use crate::llm::{GenerationRequest, TextGenerator};
use crate::metrics;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an expert analyst for Indian Unicorn Startups. \
You have access to a knowledge graph of Indian unicorn companies with their investors, \
sectors, locations, and valuations.

Guidelines:
- Answer only from the numbered facts in the context
- Be concise and specific
- Format valuations like $5.6B
- If the facts do not cover the question, say so
- Keep the order of the facts when listing entities
- Use bullet points for lists";

/// How an answer was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerMode {
    /// Narrative from the text generator
    Generated,
    /// Raw facts, the generator failed or timed out
    Degraded,
    /// The graph had nothing for this question
    NoFacts,
}

impl AnswerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerMode::Generated => "generated",
            AnswerMode::Degraded => "degraded",
            AnswerMode::NoFacts => "no_facts",
        }
    }
}

/// Final answer with the facts it rests on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub facts: Vec<FactStatement>,
    pub truncation: Option<Truncation>,
    pub mode: AnswerMode,
    /// Model that wrote the narrative, absent when none did
    pub model: Option<String>,
}

/// Incremental answer delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AnswerEvent {
    Facts {
        facts: Vec<FactStatement>,
        truncation: Option<Truncation>,
    },
    Delta {
        text: String,
    },
    Done {
        mode: AnswerMode,
        model: Option<String>,
    },
}

pub struct AnswerSynthesizer {
    generator: Arc<dyn TextGenerator>,
    system_prompt: String,
    max_tokens: usize,
    temperature: f32,
    timeout: Duration,
}

impl AnswerSynthesizer {
    pub fn new(generator: Arc<dyn TextGenerator>, config: &LlmConfig) -> Self {
        Self {
            generator,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Override the generation timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model_name(&self) -> &str {
        self.generator.model_name()
    }

    pub async fn synthesize(&self, question: &str, context: &AssembledContext) -> Answer {
        let facts = context.facts().to_vec();
        let truncation = context.truncation();

        if context.is_empty() {
            return Answer {
                text: no_facts_message(question),
                facts,
                truncation,
                mode: AnswerMode::NoFacts,
                model: None,
            };
        }

        let model = self.generator.model_name().to_string();
        let request = self.request(question, context);
        let started = Instant::now();

        match self.generate(&request).await {
            Ok(text) => {
                metrics::record_generation(started.elapsed().as_secs_f64(), &model, true);
                info!(model = %model, facts = facts.len(), "Answer generated");
                Answer {
                    text,
                    facts,
                    truncation,
                    mode: AnswerMode::Generated,
                    model: Some(model),
                }
            }
            Err(e) => {
                metrics::record_generation(started.elapsed().as_secs_f64(), &model, false);
                warn!(model = %model, error = %e, "Generation failed, answering with raw facts");
                Answer {
                    text: degraded_answer(context),
                    facts,
                    truncation,
                    mode: AnswerMode::Degraded,
                    model: None,
                }
            }
        }
    }

    /// Stream the answer: facts first, then text deltas, then a final `Done`
    pub async fn synthesize_stream(
        &self,
        question: &str,
        context: &AssembledContext,
    ) -> BoxStream<'static, AnswerEvent> {
        let head = stream::iter(vec![AnswerEvent::Facts {
            facts: context.facts().to_vec(),
            truncation: context.truncation(),
        }]);

        if context.is_empty() {
            let tail = vec![
                AnswerEvent::Delta {
                    text: no_facts_message(question),
                },
                AnswerEvent::Done {
                    mode: AnswerMode::NoFacts,
                    model: None,
                },
            ];
            return head.chain(stream::iter(tail)).boxed();
        }

        let model = self.generator.model_name().to_string();
        let request = self.request(question, context);
        let fallback = degraded_answer(context);
        let started = Instant::now();

        let chunks = match tokio::time::timeout(self.timeout, self.generator.generate_stream(&request)).await {
            Ok(Ok(chunks)) => chunks,
            Ok(Err(e)) => {
                metrics::record_generation(started.elapsed().as_secs_f64(), &model, false);
                warn!(model = %model, error = %e, "Streaming generation failed, answering with raw facts");
                return head.chain(stream::iter(degraded_events(fallback, false))).boxed();
            }
            Err(_) => {
                metrics::record_generation(started.elapsed().as_secs_f64(), &model, false);
                warn!(model = %model, "Streaming generation timed out, answering with raw facts");
                return head.chain(stream::iter(degraded_events(fallback, false))).boxed();
            }
        };

        let state = StreamState {
            chunks,
            emitted: false,
            fallback,
            model,
            started,
            timeout: self.timeout,
        };

        let body = stream::unfold(Some(state), |state| async move {
            let Some(mut state) = state else {
                return None;
            };
            let next = tokio::time::timeout(state.timeout, state.chunks.next()).await;
            let failure = match next {
                Ok(Some(Ok(text))) => {
                    state.emitted |= !text.trim().is_empty();
                    return Some((vec![AnswerEvent::Delta { text }], Some(state)));
                }
                Ok(None) if state.emitted => {
                    metrics::record_generation(state.started.elapsed().as_secs_f64(), &state.model, true);
                    let done = AnswerEvent::Done {
                        mode: AnswerMode::Generated,
                        model: Some(state.model),
                    };
                    return Some((vec![done], None));
                }
                Ok(None) => "empty response".to_string(),
                Ok(Some(Err(e))) => e.to_string(),
                Err(_) => "timed out".to_string(),
            };

            metrics::record_generation(state.started.elapsed().as_secs_f64(), &state.model, false);
            warn!(model = %state.model, error = %failure, "Answer stream broke off, appending raw facts");
            Some((degraded_events(state.fallback, state.emitted), None))
        })
        .flat_map(stream::iter);

        head.chain(body).boxed()
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let text = tokio::time::timeout(self.timeout, self.generator.generate(request))
            .await
            .map_err(|_| AppError::SynthesisTimeout {
                timeout_ms: self.timeout.as_millis() as u64,
            })??;

        if text.trim().is_empty() {
            return Err(AppError::Synthesis {
                message: "Empty response".to_string(),
            });
        }
        Ok(text)
    }

    fn request(&self, question: &str, context: &AssembledContext) -> GenerationRequest {
        GenerationRequest {
            system: self.system_prompt.clone(),
            prompt: build_prompt(question, context),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

struct StreamState {
    chunks: BoxStream<'static, Result<String>>,
    emitted: bool,
    fallback: String,
    model: String,
    started: Instant,
    timeout: Duration,
}

fn degraded_events(fallback: String, after_text: bool) -> Vec<AnswerEvent> {
    let text = if after_text {
        format!("\n\n{}", fallback)
    } else {
        fallback
    };
    vec![
        AnswerEvent::Delta { text },
        AnswerEvent::Done {
            mode: AnswerMode::Degraded,
            model: None,
        },
    ]
}

/// Prompt holding only the budgeted facts and the question
pub fn build_prompt(question: &str, context: &AssembledContext) -> String {
    let mut prompt = format!("Context from Knowledge Graph:\n{}\n", render(context));
    if context.truncation().is_some() {
        prompt.push_str(
            "\nOnly the highest-ranked facts are listed. Say that the answer is based on partial results.\n",
        );
    }
    prompt.push_str(&format!(
        "\nUser Question: {}\n\nBased on the context above, provide a helpful and accurate answer:",
        question.trim()
    ));
    prompt
}

pub fn no_facts_message(question: &str) -> String {
    format!(
        "I could not find anything in the knowledge graph to answer \"{}\". \
         Try naming a company, investor, sector or city from the dataset.",
        question.trim()
    )
}

fn degraded_answer(context: &AssembledContext) -> String {
    format!(
        "The answer service is unavailable right now. These facts from the knowledge graph match your question:\n{}",
        render(context)
    )
}
