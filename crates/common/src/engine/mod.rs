//! Graph-RAG query engine
//!
//! Answers natural-language questions over the startup knowledge graph:
//! - Entity catalog and mention scanning
//! - Intent interpretation
//! - Template resolution and slot binding
//! - Traversal execution with retries
//! - Fact assembly under a budget
//! - Grounded answer synthesis

mod assembler;
mod catalog;
mod executor;
mod interpreter;
mod pipeline;
mod resolver;
mod synthesizer;
mod templates;

pub use assembler::{render, AssembledContext, ContextAssembler, FactStatement, Provenance, Truncation};
pub use catalog::{EntityCatalog, Mention, Resolution};
pub use executor::{order_rows, GraphExecutor};
pub use interpreter::{Intent, Interpretation, QueryInterpreter, Subject};
pub use pipeline::{
    CancellationFlag, QueryEngine, QueryLifecycle, QueryOutcome, QueryState, QueryStream, TraceStep,
};
pub use resolver::{Binding, BoundTemplate, PatternResolver};
pub use synthesizer::{
    build_prompt, no_facts_message, Answer, AnswerEvent, AnswerMode, AnswerSynthesizer, DEFAULT_SYSTEM_PROMPT,
};
pub use templates::{Metric, Ordering, Shape, Slot, SlotKind, TemplateId, TemplateSpec};
