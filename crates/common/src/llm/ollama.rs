//! Ollama generation client
//!
//! `POST {base_url}/api/generate` for answers, `GET {base_url}/api/tags` for
//! availability. Streaming responses arrive as newline-delimited JSON objects.

use super::{GenerationRequest, TextGenerator};
use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ollama client
pub struct OllamaGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: usize,
}

#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Deserialize)]
struct ModelTag {
    name: String,
}

impl OllamaGenerator {
    /// Create a new Ollama client
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            timeout,
        })
    }

    async fn send(&self, request: &GenerationRequest, stream: bool) -> Result<reqwest::Response> {
        let body = GenerateRequest {
            model: &self.model,
            prompt: &request.prompt,
            system: &request.system,
            stream,
            options: GenerateOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Synthesis {
                message: format!("Ollama error {}: {}", status, body),
            });
        }

        Ok(response)
    }

    fn request_error(&self, error: reqwest::Error) -> AppError {
        if error.is_timeout() {
            AppError::SynthesisTimeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            AppError::Synthesis {
                message: format!("Request failed: {}", error),
            }
        }
    }
}

fn parse_chunk(line: &[u8]) -> Result<Option<GenerateChunk>> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let chunk: GenerateChunk = serde_json::from_str(line).map_err(|e| AppError::Synthesis {
        message: format!("Failed to parse response: {}", e),
    })?;
    match chunk.error {
        Some(message) => Err(AppError::Synthesis { message }),
        None => Ok(Some(chunk)),
    }
}

#[async_trait]
impl TextGenerator for OllamaGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let response = self.send(request, false).await?;
        let bytes = response.bytes().await.map_err(|e| self.request_error(e))?;

        parse_chunk(&bytes)?
            .map(|chunk| chunk.response.trim().to_string())
            .ok_or_else(|| AppError::Synthesis {
                message: "Empty response".to_string(),
            })
    }

    async fn generate_stream(
        &self,
        request: &GenerationRequest,
    ) -> Result<BoxStream<'static, Result<String>>> {
        let response = self.send(request, true).await?;
        let bytes = Box::pin(response.bytes_stream());

        // State: byte stream, pending partial line, finished flag
        let chunks = stream::unfold((bytes, Vec::<u8>::new(), false), |(mut bytes, mut buffer, finished)| async move {
            if finished {
                return None;
            }
            loop {
                if let Some(end) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=end).collect();
                    match parse_chunk(&line) {
                        Ok(None) => continue,
                        Ok(Some(chunk)) => {
                            let done = chunk.done;
                            return Some((Ok(chunk.response), (bytes, buffer, done)));
                        }
                        Err(e) => return Some((Err(e), (bytes, buffer, true))),
                    }
                }

                match bytes.next().await {
                    Some(Ok(data)) => buffer.extend_from_slice(&data),
                    Some(Err(e)) => {
                        let err = AppError::Synthesis {
                            message: format!("Stream interrupted: {}", e),
                        };
                        return Some((Err(err), (bytes, buffer, true)));
                    }
                    None => {
                        let rest = std::mem::take(&mut buffer);
                        return match parse_chunk(&rest) {
                            Ok(Some(chunk)) => Some((Ok(chunk.response), (bytes, buffer, true))),
                            Ok(None) => None,
                            Err(e) => Some((Err(e), (bytes, buffer, true))),
                        };
                    }
                }
            }
        });

        Ok(chunks.filter(|chunk| futures::future::ready(!matches!(chunk, Ok(text) if text.is_empty()))).boxed())
    }

    async fn is_available(&self) -> bool {
        let response = match self.client.get(format!("{}/api/tags", self.base_url)).send().await {
            Ok(response) if response.status().is_success() => response,
            _ => return false,
        };

        match response.json::<TagsResponse>().await {
            Ok(tags) => tags
                .models
                .iter()
                .any(|m| m.name == self.model || m.name.starts_with(&format!("{}:", self.model))),
            Err(_) => false,
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let body = GenerateRequest {
            model: "mistral",
            prompt: "Question",
            system: "You are an analyst",
            stream: false,
            options: GenerateOptions { temperature: 0.3, num_predict: 500 },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["stream"], false);
        assert_eq!(json["options"]["num_predict"], 500);
    }

    #[test]
    fn test_parse_chunk_handles_blank_and_error_lines() {
        assert!(parse_chunk(b"  \n").unwrap().is_none());

        let chunk = parse_chunk(br#"{"response":"Flip","done":false}"#).unwrap().unwrap();
        assert_eq!(chunk.response, "Flip");
        assert!(!chunk.done);

        let err = parse_chunk(br#"{"error":"model 'x' not found"}"#).unwrap_err();
        assert!(matches!(err, AppError::Synthesis { .. }));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let config = LlmConfig {
            base_url: "http://ollama:11434/".into(),
            ..Default::default()
        };
        let generator = OllamaGenerator::new(&config).unwrap();
        assert_eq!(generator.base_url, "http://ollama:11434");
        assert_eq!(generator.model_name(), "mistral");
    }
}
