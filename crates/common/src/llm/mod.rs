//! Text generation abstraction
//!
//! Provides a unified interface for answer generation backends:
//! - Ollama (local models such as mistral or llama3)
//! - A deterministic mock for tests and offline runs

mod ollama;

pub use ollama::OllamaGenerator;

use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One generation call
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system: String,
    pub prompt: String,
    pub max_tokens: usize,
    pub temperature: f32,
}

/// Trait for text generation
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a complete response
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;

    /// Generate a response as a stream of text chunks
    async fn generate_stream(
        &self,
        request: &GenerationRequest,
    ) -> Result<BoxStream<'static, Result<String>>> {
        let text = self.generate(request).await?;
        Ok(stream::once(async move { Ok(text) }).boxed())
    }

    /// Whether the backend is reachable and has the model
    async fn is_available(&self) -> bool {
        true
    }

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// What the mock generator does when called
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Restate the numbered facts found in the prompt
    Echo,
    /// Always return this text
    Fixed(String),
    /// Always fail with this message
    Fail(String),
    /// Sleep before echoing
    Delay(Duration),
}

/// Mock generator for testing
pub struct MockGenerator {
    behavior: MockBehavior,
    calls: AtomicUsize,
}

impl MockGenerator {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn echo() -> Self {
        Self::new(MockBehavior::Echo)
    }

    /// Number of generation calls received so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn narrate(prompt: &str) -> String {
        let facts: Vec<&str> = prompt
            .lines()
            .filter_map(|line| {
                let rest = line.trim().strip_prefix('[')?;
                let (index, fact) = rest.split_once("] ")?;
                index.chars().all(|c| c.is_ascii_digit()).then_some(fact)
            })
            .collect();

        if facts.is_empty() {
            return "The knowledge graph has nothing on this.".to_string();
        }

        let mut answer = String::from("From the knowledge graph:");
        for fact in facts {
            answer.push_str("\n- ");
            answer.push_str(fact);
        }
        answer
    }
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::echo()
    }
}

#[async_trait]
impl TextGenerator for MockGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        match &self.behavior {
            MockBehavior::Echo => Ok(Self::narrate(&request.prompt)),
            MockBehavior::Fixed(text) => Ok(text.clone()),
            MockBehavior::Fail(message) => Err(AppError::Synthesis {
                message: message.clone(),
            }),
            MockBehavior::Delay(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(Self::narrate(&request.prompt))
            }
        }
    }

    async fn generate_stream(
        &self,
        request: &GenerationRequest,
    ) -> Result<BoxStream<'static, Result<String>>> {
        let text = self.generate(request).await?;
        let chunks: Vec<Result<String>> = text
            .split_inclusive('\n')
            .map(|line| Ok(line.to_string()))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }

    async fn is_available(&self) -> bool {
        !matches!(self.behavior, MockBehavior::Fail(_))
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

/// Create a generator based on configuration
pub fn create_generator(config: &LlmConfig) -> Result<Arc<dyn TextGenerator>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        "mock" => Ok(Arc::new(MockGenerator::echo())),
        other => Err(AppError::Configuration {
            message: format!("unknown llm provider '{}'", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(prompt: &str) -> GenerationRequest {
        GenerationRequest {
            system: String::new(),
            prompt: prompt.to_string(),
            max_tokens: 100,
            temperature: 0.0,
        }
    }

    #[tokio::test]
    async fn test_echo_restates_facts_in_order() {
        let generator = MockGenerator::echo();
        let prompt = "Facts:\n[1] CRED is located in Bangalore.\n[2] PhonePe is located in Bangalore.\n\nQuestion: x";
        let answer = generator.generate(&request(prompt)).await.unwrap();

        let cred = answer.find("CRED").unwrap();
        let phonepe = answer.find("PhonePe").unwrap();
        assert!(cred < phonepe);
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn test_failing_mock_reports_synthesis_error() {
        let generator = MockGenerator::new(MockBehavior::Fail("model not loaded".into()));
        let err = generator.generate(&request("[1] x")).await.unwrap_err();
        assert!(matches!(err, AppError::Synthesis { .. }));
        assert!(!generator.is_available().await);
    }

    #[tokio::test]
    async fn test_stream_joins_to_full_answer() {
        let generator = MockGenerator::echo();
        let req = request("[1] Flipkart is located in Bangalore.");
        let chunks: Vec<String> = generator
            .generate_stream(&req)
            .await
            .unwrap()
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;

        assert_eq!(chunks.concat(), generator.generate(&req).await.unwrap());
    }

    #[test]
    fn test_unknown_provider_is_configuration_error() {
        let config = LlmConfig {
            provider: "telepathy".into(),
            ..Default::default()
        };
        assert!(matches!(create_generator(&config), Err(AppError::Configuration { .. })));
    }
}
