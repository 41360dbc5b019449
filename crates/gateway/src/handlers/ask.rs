//! Question answering handlers

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::{stream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::time::Instant;
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use unigraph_common::{
    engine::{
        AnswerEvent, AnswerMode, Binding, CancellationFlag, FactStatement, Intent, TemplateId,
        TraceStep, Truncation,
    },
    errors::{AppError, Result},
};

/// Ask request
#[derive(Debug, Deserialize, Validate)]
pub struct AskRequest {
    #[validate(length(min = 1, max = 1000))]
    pub question: String,

    #[serde(default)]
    pub options: AskOptions,
}

#[derive(Debug, Deserialize)]
pub struct AskOptions {
    /// Return the facts the answer was built from
    #[serde(default = "default_true")]
    pub include_facts: bool,

    /// Return the stage trace
    #[serde(default)]
    pub include_trace: bool,
}

impl Default for AskOptions {
    fn default() -> Self {
        Self {
            include_facts: true,
            include_trace: false,
        }
    }
}

fn default_true() -> bool { true }

/// Ask response
#[derive(Serialize)]
pub struct AskResponse {
    pub query_id: Uuid,
    pub question: String,
    pub answer: String,
    pub mode: AnswerMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub intent: Intent,
    pub template: TemplateId,
    pub bindings: Vec<Binding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facts: Option<Vec<FactStatement>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncation: Option<Truncation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<Vec<TraceStep>>,
    pub processing_time_ms: u64,
}

/// Cancels the question when the request future is dropped early
struct CancelOnDrop(CancellationFlag);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

fn validate(request: &AskRequest) -> Result<()> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: Some("question".to_string()),
    })
}

/// Answer a question in one response
pub async fn ask(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>> {
    let start = Instant::now();
    validate(&request)?;

    let guard = CancelOnDrop(CancellationFlag::new());
    let outcome = state.engine.ask_with_cancel(&request.question, &guard.0).await?;
    let answer = outcome.answer;

    Ok(Json(AskResponse {
        query_id: outcome.query_id,
        question: outcome.question,
        answer: answer.text,
        mode: answer.mode,
        model: answer.model,
        intent: outcome.intent,
        template: outcome.template,
        bindings: outcome.bindings,
        facts: request.options.include_facts.then_some(answer.facts),
        truncation: answer.truncation,
        trace: request.options.include_trace.then_some(outcome.trace),
        processing_time_ms: start.elapsed().as_millis() as u64,
    }))
}

/// Answer a question as server-sent events
///
/// Emits `query` once, then `facts`, any number of `delta`, and `done`.
pub async fn ask_stream(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    validate(&request)?;

    let answer = state.engine.ask_stream(&request.question).await?;
    let header = json_event(
        "query",
        &json!({
            "query_id": answer.query_id,
            "intent": answer.intent,
            "template": answer.template,
            "bindings": answer.bindings,
        }),
    );

    let events = stream::once(async move { header })
        .chain(answer.events.map(|event| json_event(event_name(&event), &event)))
        .map(Ok);

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn event_name(event: &AnswerEvent) -> &'static str {
    match event {
        AnswerEvent::Facts { .. } => "facts",
        AnswerEvent::Delta { .. } => "delta",
        AnswerEvent::Done { .. } => "done",
    }
}

fn json_event<T: Serialize>(name: &str, payload: &T) -> Event {
    Event::default()
        .event(name)
        .json_data(payload)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_default_to_facts_without_trace() {
        let request: AskRequest = serde_json::from_str(r#"{"question": "Compare CRED and Ola"}"#).unwrap();
        assert!(request.options.include_facts);
        assert!(!request.options.include_trace);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_overlong_question_fails_validation() {
        let request = AskRequest {
            question: "x".repeat(1001),
            options: AskOptions::default(),
        };
        assert!(validate(&request).is_err());
    }

    #[test]
    fn test_dropped_guard_cancels() {
        let flag = CancellationFlag::new();
        drop(CancelOnDrop(flag.clone()));
        assert!(flag.is_cancelled());
    }
}
