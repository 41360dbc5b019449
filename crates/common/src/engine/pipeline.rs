//! Query pipeline
//!
//! `QueryEngine` runs a question through interpretation, resolution,
//! execution, assembly and synthesis. Each query tracks its progress in a
//! `QueryLifecycle`; a `CancellationFlag` is checked at every stage boundary.
//! The entity catalog is the only state shared between queries and is
//! replaced wholesale on reload.

use super::assembler::{AssembledContext, ContextAssembler};
use super::catalog::{EntityCatalog, Resolution};
use super::executor::GraphExecutor;
use super::interpreter::{Intent, QueryInterpreter};
use super::resolver::{Binding, BoundTemplate, PatternResolver};
use super::synthesizer::{Answer, AnswerEvent, AnswerSynthesizer};
use super::templates::TemplateId;
use crate::cache::Cache;
use crate::config::{AppConfig, EngineConfig};
use crate::errors::{AppError, Result};
use crate::graph::{EntityKind, GraphStats, GraphStore};
use crate::llm::TextGenerator;
use crate::metrics;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, info_span, warn, Instrument, Span};
use uuid::Uuid;

/// Where a query is in the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum QueryState {
    Received,
    Interpreted,
    Resolved,
    Executed,
    Assembled,
    Answered,
    Failed { stage: String, reason: String },
}

impl QueryState {
    pub fn name(&self) -> &'static str {
        match self {
            QueryState::Received => "received",
            QueryState::Interpreted => "interpreted",
            QueryState::Resolved => "resolved",
            QueryState::Executed => "executed",
            QueryState::Assembled => "assembled",
            QueryState::Answered => "answered",
            QueryState::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QueryState::Answered | QueryState::Failed { .. })
    }

    /// The only state a successful stage may move to
    fn successor(&self) -> Option<QueryState> {
        match self {
            QueryState::Received => Some(QueryState::Interpreted),
            QueryState::Interpreted => Some(QueryState::Resolved),
            QueryState::Resolved => Some(QueryState::Executed),
            QueryState::Executed => Some(QueryState::Assembled),
            QueryState::Assembled => Some(QueryState::Answered),
            QueryState::Answered | QueryState::Failed { .. } => None,
        }
    }

    /// Stage that runs when leaving this state
    fn next_stage(&self) -> &'static str {
        match self {
            QueryState::Received => "interpret",
            QueryState::Interpreted => "resolve",
            QueryState::Resolved => "execute",
            QueryState::Executed => "assemble",
            QueryState::Assembled => "synthesize",
            QueryState::Answered | QueryState::Failed { .. } => "done",
        }
    }
}

/// One recorded transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    #[serde(flatten)]
    pub state: QueryState,
    pub elapsed_ms: u64,
}

/// State machine of a single query
#[derive(Debug)]
pub struct QueryLifecycle {
    started: Instant,
    steps: Vec<TraceStep>,
    intent: Option<Intent>,
}

impl QueryLifecycle {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            steps: vec![TraceStep {
                state: QueryState::Received,
                elapsed_ms: 0,
            }],
            intent: None,
        }
    }

    pub fn current(&self) -> &QueryState {
        // steps always holds at least Received
        &self.steps[self.steps.len() - 1].state
    }

    pub fn advance(&mut self, next: QueryState) -> Result<()> {
        if self.current().successor().as_ref() != Some(&next) {
            return Err(AppError::Internal {
                message: format!(
                    "illegal query transition {} -> {}",
                    self.current().name(),
                    next.name()
                ),
            });
        }
        self.push(next);
        Ok(())
    }

    /// Terminal failure at the stage after the current state; no-op once terminal
    pub fn fail(&mut self, error: &AppError) -> &'static str {
        let stage = self.current().next_stage();
        if !self.current().is_terminal() {
            self.push(QueryState::Failed {
                stage: stage.to_string(),
                reason: error.to_string(),
            });
        }
        stage
    }

    pub fn trace(&self) -> &[TraceStep] {
        &self.steps
    }

    /// Remember the intent once interpretation has succeeded
    pub fn set_intent(&mut self, intent: Intent) {
        self.intent = Some(intent);
    }

    /// Intent label for metrics, "none" before interpretation
    pub fn intent_label(&self) -> &'static str {
        self.intent.map_or("none", |intent| intent.as_str())
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn push(&mut self, state: QueryState) {
        self.steps.push(TraceStep {
            state,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        });
    }
}

impl Default for QueryLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Cooperative cancellation shared with the caller
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Fail with `Cancelled` before entering `stage`
    pub fn check(&self, stage: &str) -> Result<()> {
        if self.is_cancelled() {
            return Err(AppError::Cancelled {
                stage: stage.to_string(),
            });
        }
        Ok(())
    }
}

/// A fully answered question
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub query_id: Uuid,
    pub question: String,
    pub answer: Answer,
    pub intent: Intent,
    pub template: TemplateId,
    pub bindings: Vec<Binding>,
    pub trace: Vec<TraceStep>,
    pub elapsed_ms: u64,
    pub answered_at: DateTime<Utc>,
}

/// A question ready to stream its answer
pub struct QueryStream {
    pub query_id: Uuid,
    pub intent: Intent,
    pub template: TemplateId,
    pub bindings: Vec<Binding>,
    pub events: BoxStream<'static, AnswerEvent>,
}

/// Output of every stage before synthesis
struct Prepared {
    bound: BoundTemplate,
    context: AssembledContext,
}

pub struct QueryEngine {
    catalog: RwLock<Arc<EntityCatalog>>,
    interpreter: QueryInterpreter,
    resolver: PatternResolver,
    executor: GraphExecutor,
    assembler: ContextAssembler,
    synthesizer: AnswerSynthesizer,
    generator: Arc<dyn TextGenerator>,
    config: EngineConfig,
}

impl QueryEngine {
    /// Build the engine and load the entity catalog from the store
    pub async fn new(
        store: Arc<dyn GraphStore>,
        generator: Arc<dyn TextGenerator>,
        config: &AppConfig,
    ) -> Result<Self> {
        Self::with_cache(store, generator, None, config).await
    }

    pub async fn with_cache(
        store: Arc<dyn GraphStore>,
        generator: Arc<dyn TextGenerator>,
        cache: Option<Arc<Cache>>,
        config: &AppConfig,
    ) -> Result<Self> {
        let mut executor = GraphExecutor::new(store, config.engine.retry.clone());
        if let Some(cache) = cache {
            executor = executor.with_cache(cache);
        }

        let entries = executor.catalog_entries().await?;
        let catalog = EntityCatalog::new(entries, &config.engine);
        metrics::record_catalog_size(catalog.len());
        info!(entries = catalog.len(), store = executor.store().name(), "Entity catalog loaded");

        Ok(Self {
            catalog: RwLock::new(Arc::new(catalog)),
            interpreter: QueryInterpreter::new(&config.engine)?,
            resolver: PatternResolver::new(&config.engine),
            executor,
            assembler: ContextAssembler::new(&config.engine),
            synthesizer: AnswerSynthesizer::new(generator.clone(), &config.llm),
            generator,
            config: config.engine.clone(),
        })
    }

    pub async fn ask(&self, question: &str) -> Result<QueryOutcome> {
        self.ask_with_cancel(question, &CancellationFlag::new()).await
    }

    pub async fn ask_with_cancel(&self, question: &str, cancel: &CancellationFlag) -> Result<QueryOutcome> {
        let query_id = Uuid::new_v4();
        let span = info_span!("query", %query_id, intent = tracing::field::Empty);

        async move {
            let mut lifecycle = QueryLifecycle::new();
            let result = async {
                let prepared = self.prepare(question, cancel, &mut lifecycle).await?;
                cancel.check("synthesize")?;
                let answer = self.synthesizer.synthesize(question, &prepared.context).await;
                lifecycle.advance(QueryState::Answered)?;
                Ok::<_, AppError>((prepared.bound, answer))
            }
            .await;

            let elapsed = lifecycle.elapsed();
            match result {
                Ok((bound, answer)) => {
                    metrics::record_question(elapsed.as_secs_f64(), bound.intent.as_str(), answer.mode.as_str());
                    info!(
                        template = %bound.template,
                        mode = answer.mode.as_str(),
                        facts = answer.facts.len(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Question answered"
                    );
                    Ok(QueryOutcome {
                        query_id,
                        question: question.to_string(),
                        answer,
                        intent: bound.intent,
                        template: bound.template,
                        bindings: bound.bindings,
                        trace: lifecycle.trace().to_vec(),
                        elapsed_ms: elapsed.as_millis() as u64,
                        answered_at: Utc::now(),
                    })
                }
                Err(e) => Err(self.failed(&mut lifecycle, e)),
            }
        }
        .instrument(span)
        .await
    }

    /// Run every stage but synthesis, then stream the answer
    pub async fn ask_stream(&self, question: &str) -> Result<QueryStream> {
        let query_id = Uuid::new_v4();
        let span = info_span!("query", %query_id, intent = tracing::field::Empty);

        async move {
            let mut lifecycle = QueryLifecycle::new();
            let prepared = match self.prepare(question, &CancellationFlag::new(), &mut lifecycle).await {
                Ok(prepared) => prepared,
                Err(e) => return Err(self.failed(&mut lifecycle, e)),
            };

            let events = self.synthesizer.synthesize_stream(question, &prepared.context).await;
            lifecycle.advance(QueryState::Answered)?;
            metrics::record_question(lifecycle.elapsed().as_secs_f64(), prepared.bound.intent.as_str(), "streamed");
            info!(template = %prepared.bound.template, "Streaming answer");

            Ok(QueryStream {
                query_id,
                intent: prepared.bound.intent,
                template: prepared.bound.template,
                bindings: prepared.bound.bindings,
                events,
            })
        }
        .instrument(span)
        .await
    }

    async fn prepare(
        &self,
        question: &str,
        cancel: &CancellationFlag,
        lifecycle: &mut QueryLifecycle,
    ) -> Result<Prepared> {
        cancel.check("interpret")?;
        let catalog = self.catalog().await;
        let interpretation = self.interpreter.interpret(question, &catalog)?;
        Span::current().record("intent", interpretation.intent.as_str());
        lifecycle.set_intent(interpretation.intent);
        lifecycle.advance(QueryState::Interpreted)?;

        cancel.check("resolve")?;
        let bound = self.resolver.resolve(&interpretation)?;
        lifecycle.advance(QueryState::Resolved)?;

        cancel.check("execute")?;
        let rows = self.executor.execute(&bound).await?;
        lifecycle.advance(QueryState::Executed)?;

        cancel.check("assemble")?;
        let context = self.assembler.assemble(&rows, &bound);
        lifecycle.advance(QueryState::Assembled)?;

        Ok(Prepared { bound, context })
    }

    fn failed(&self, lifecycle: &mut QueryLifecycle, error: AppError) -> AppError {
        let stage = lifecycle.fail(&error);
        let code = error.code().as_code().to_string();
        metrics::record_stage_failure(stage, &code);
        metrics::record_question(lifecycle.elapsed().as_secs_f64(), lifecycle.intent_label(), "failed");
        if error.is_server_error() {
            warn!(stage, error = %error, "Question failed");
        } else {
            info!(stage, error = %error, "Question not answerable");
        }
        error
    }

    /// Current catalog; the handle is cloned so no lock is held across stages
    pub async fn catalog(&self) -> Arc<EntityCatalog> {
        self.catalog.read().await.clone()
    }

    /// Rebuild the catalog from the store; the previous one stays on failure
    pub async fn reload_catalog(&self) -> Result<usize> {
        let entries = self.executor.catalog_entries().await?;
        let catalog = Arc::new(EntityCatalog::new(entries, &self.config));
        let size = catalog.len();

        *self.catalog.write().await = catalog;
        self.executor.invalidate();
        metrics::record_catalog_size(size);
        info!(entries = size, "Entity catalog reloaded");
        Ok(size)
    }

    pub async fn resolve_mention(&self, mention: &str, kinds: &[EntityKind]) -> Vec<Resolution> {
        self.catalog().await.resolve(mention, kinds)
    }

    pub async fn graph_stats(&self) -> Result<GraphStats> {
        self.executor.graph_stats().await
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        self.executor.store()
    }

    /// Row cache, when one is configured
    pub fn cache(&self) -> Option<&Arc<Cache>> {
        self.executor.cache()
    }

    pub fn generator(&self) -> &Arc<dyn TextGenerator> {
        &self.generator
    }
}
