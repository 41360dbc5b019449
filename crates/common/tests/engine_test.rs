//! End-to-end questions against the sample knowledge graph

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};
use unigraph_common::config::{AppConfig, RetryConfig};
use unigraph_common::engine::{
    AnswerEvent, AnswerMode, CancellationFlag, Intent, QueryEngine, TemplateId, TemplateSpec,
};
use unigraph_common::errors::{AppError, Result};
use unigraph_common::graph::{CatalogEntry, EntityKind, GraphStore, InMemoryGraph, Params, Row};
use unigraph_common::llm::{MockBehavior, MockGenerator};

const FIXTURE: &str = include_str!("../fixtures/sample_graph.json");

fn config() -> AppConfig {
    let mut config = AppConfig::default();
    config.engine.retry = RetryConfig {
        max_attempts: 3,
        initial_backoff_ms: 1,
        max_backoff_ms: 5,
    };
    config
}

fn fixture_store() -> Arc<InMemoryGraph> {
    Arc::new(InMemoryGraph::from_json(FIXTURE).unwrap())
}

async fn engine_with(generator: Arc<MockGenerator>) -> QueryEngine {
    QueryEngine::new(fixture_store(), generator, &config()).await.unwrap()
}

async fn engine() -> QueryEngine {
    engine_with(Arc::new(MockGenerator::echo())).await
}

/// Serves the catalog, fails every traversal as unreachable
struct UnreachableStore {
    inner: InMemoryGraph,
    calls: AtomicUsize,
}

#[async_trait]
impl GraphStore for UnreachableStore {
    async fn query(&self, _template: &TemplateSpec, _params: &Params) -> Result<Vec<Row>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(AppError::StoreUnavailable {
            message: "connection refused".into(),
        })
    }

    async fn catalog_entries(&self) -> Result<Vec<CatalogEntry>> {
        self.inner.catalog_entries().await
    }

    async fn ping(&self) -> Result<()> {
        Err(AppError::StoreUnavailable {
            message: "connection refused".into(),
        })
    }

    fn name(&self) -> &str {
        "unreachable"
    }
}

fn subjects(outcome: &unigraph_common::QueryOutcome) -> Vec<&str> {
    outcome.answer.facts.iter().map(|f| f.subject.as_str()).collect()
}

#[tokio::test]
async fn test_investor_portfolio_lists_companies_by_valuation() {
    let engine = engine().await;
    let outcome = assert_ok!(engine.ask("Which companies has Tiger Global invested in?").await);

    assert_eq!(outcome.intent, Intent::FilterByRelation);
    assert_eq!(outcome.template, TemplateId::InvestorPortfolio);
    assert_eq!(outcome.bindings.len(), 1);
    assert_eq!(outcome.bindings[0].entity.name, "Tiger Global");
    assert_eq!(outcome.bindings[0].entity.kind, EntityKind::Investor);
    assert_eq!(outcome.bindings[0].entity.confidence, 1.0);

    assert_eq!(
        subjects(&outcome),
        vec![
            "Flipkart",
            "Byju's",
            "PhonePe",
            "Dream11",
            "Razorpay",
            "Ola",
            "CRED",
            "Policybazaar",
            "Zomato",
            "Delhivery",
            "Zepto*",
        ]
    );
    assert!(outcome.answer.facts[10].text.contains("current valuation unknown"));

    assert_eq!(outcome.answer.mode, AnswerMode::Generated);
    let first = outcome.answer.text.find("invested in Flipkart").unwrap();
    let last = outcome.answer.text.find("invested in Zepto*").unwrap();
    assert!(first < last);

    let states: Vec<&str> = outcome.trace.iter().map(|s| s.state.name()).collect();
    assert_eq!(
        states,
        vec!["received", "interpreted", "resolved", "executed", "assembled", "answered"]
    );
}

#[tokio::test]
async fn test_each_reads_as_a_listing_not_an_aggregation() {
    let engine = engine().await;
    let outcome = assert_ok!(engine.ask("Show each company Accel backed").await);

    assert_eq!(outcome.intent, Intent::FilterByRelation);
    assert_eq!(outcome.template, TemplateId::InvestorPortfolio);
    assert_eq!(
        subjects(&outcome),
        vec!["Flipkart", "Swiggy", "Ola", "CRED", "Zepto"]
    );
}

#[tokio::test]
async fn test_compare_lists_both_companies_side_by_side() {
    let engine = engine().await;
    let outcome = assert_ok!(engine.ask("Compare CRED and PhonePe").await);

    assert_eq!(outcome.intent, Intent::CompareEntities);
    assert_eq!(outcome.template, TemplateId::CompareCompanies);
    let facts = &outcome.answer.facts;
    assert_eq!(facts.len(), 2);
    assert!(facts[0]
        .text
        .starts_with("CRED: sector Fintech, location Bangalore, current valuation $6.4B"));
    assert!(facts[1]
        .text
        .starts_with("PhonePe: sector Fintech, location Bangalore, current valuation $12B"));
}

#[tokio::test]
async fn test_top_n_is_sorted_and_limited() {
    let engine = engine().await;

    let outcome = assert_ok!(engine.ask("What are the top 5 most valuable companies?").await);
    assert_eq!(outcome.intent, Intent::TopNByMetric);
    assert_eq!(outcome.template, TemplateId::TopCompanies);
    assert_eq!(
        subjects(&outcome),
        vec!["Flipkart", "Byju's", "PhonePe", "Swiggy", "Dream11"]
    );

    // Delhivery and Meesho share a valuation; the unvalued company never ranks
    let outcome = assert_ok!(engine.ask("top 14 companies by valuation").await);
    let names = subjects(&outcome);
    assert_eq!(names.len(), 13);
    assert_eq!(&names[10..], &["Delhivery", "Meesho", "Zepto"]);
    assert!(!names.contains(&"Zepto*"));
}

#[tokio::test]
async fn test_aggregate_excludes_missing_valuations() {
    let engine = engine().await;
    let outcome = assert_ok!(engine.ask("Which sector has the most unicorns?").await);

    assert_eq!(outcome.intent, Intent::AggregateByGroup);
    assert_eq!(outcome.template, TemplateId::SectorStatistics);
    assert_eq!(subjects(&outcome)[..2], ["E-Commerce", "Fintech"]);
    assert_eq!(
        outcome.answer.facts[0].text,
        "#1 E-Commerce: 4 companies, $43.9B total, $14.63B average across 3 valued"
    );
}

#[tokio::test]
async fn test_same_question_gives_identical_output() {
    let engine = engine().await;
    let first = assert_ok!(engine.ask("Which companies has Tiger Global invested in?").await);
    let second = assert_ok!(engine.ask("Which companies has Tiger Global invested in?").await);

    assert_eq!(
        serde_json::to_string(&first.answer.facts).unwrap(),
        serde_json::to_string(&second.answer.facts).unwrap()
    );
    assert_eq!(first.answer.text, second.answer.text);
    assert_ne!(first.query_id, second.query_id);
}

#[tokio::test]
async fn test_ambiguous_mention_lists_candidates() {
    let engine = engine().await;
    let err = assert_err!(engine.ask("Which companies has Sequoia invested in?").await);

    match err {
        AppError::Ambiguous { mention, candidates } => {
            assert_eq!(mention, "Sequoia");
            let names: Vec<&str> = candidates.iter().map(|c| c.name.as_str()).collect();
            assert!(names.contains(&"Sequoia Capital India"));
            assert!(names.contains(&"Sequoia Capital China"));
        }
        other => panic!("expected ambiguity, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unanswerable_question_is_unresolved() {
    let engine = engine().await;
    let err = assert_err!(engine.ask("What is the weather like?").await);
    assert!(matches!(err, AppError::UnresolvedQuery { .. }));
}

#[tokio::test]
async fn test_empty_result_answers_without_generator() {
    let generator = Arc::new(MockGenerator::echo());
    let engine = engine_with(generator.clone()).await;
    let question = "Which companies did SoftBank and Sequoia Capital China invest in together?";
    let outcome = assert_ok!(engine.ask(question).await);

    assert_eq!(outcome.template, TemplateId::SharedPortfolio);
    assert_eq!(outcome.answer.mode, AnswerMode::NoFacts);
    assert!(outcome.answer.facts.is_empty());
    assert!(outcome.answer.text.contains(question));
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn test_unreachable_store_surfaces_retrieval_error() {
    let store = Arc::new(UnreachableStore {
        inner: InMemoryGraph::from_json(FIXTURE).unwrap(),
        calls: AtomicUsize::new(0),
    });
    let engine = QueryEngine::new(store.clone(), Arc::new(MockGenerator::echo()), &config())
        .await
        .unwrap();

    let err = assert_err!(engine.ask("Which companies has Tiger Global invested in?").await);
    match err {
        AppError::Retrieval { template, attempts, .. } => {
            assert_eq!(template, "investor_portfolio");
            assert_eq!(attempts, 3);
        }
        other => panic!("expected retrieval error, got {:?}", other),
    }
    assert_eq!(store.calls.load(Ordering::SeqCst), 3);

    // The failed query leaves the catalog alone
    assert_eq!(engine.catalog().await.len(), 40);
}

#[tokio::test]
async fn test_generator_failure_returns_raw_facts() {
    let generator = Arc::new(MockGenerator::new(MockBehavior::Fail("model not loaded".into())));
    let engine = engine_with(generator).await;
    let outcome = assert_ok!(engine.ask("Compare CRED and PhonePe").await);

    assert_eq!(outcome.answer.mode, AnswerMode::Degraded);
    assert!(outcome.answer.text.contains("[1] CRED: sector Fintech"));
    assert!(outcome.answer.text.contains("[2] PhonePe: sector Fintech"));
}

#[tokio::test]
async fn test_cancelled_question_stops_at_stage_boundary() {
    let generator = Arc::new(MockGenerator::echo());
    let engine = engine_with(generator.clone()).await;
    let cancel = CancellationFlag::new();
    cancel.cancel();

    let err = assert_err!(engine.ask_with_cancel("Compare CRED and PhonePe", &cancel).await);
    assert!(matches!(err, AppError::Cancelled { stage } if stage == "interpret"));
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn test_path_between_investor_and_city() {
    let engine = engine().await;
    let outcome = assert_ok!(engine.ask("How is Tiger Global connected to Mumbai?").await);

    assert_eq!(outcome.intent, Intent::PathBetween);
    assert_eq!(
        outcome.answer.facts[0].text,
        "Tiger Global -[INVESTED_IN]- Dream11 -[LOCATED_IN]- Mumbai (2 hops)"
    );
}

#[tokio::test]
async fn test_stream_sends_facts_then_text() {
    let engine = engine().await;
    let stream = assert_ok!(engine.ask_stream("Compare CRED and PhonePe").await);
    assert_eq!(stream.template, TemplateId::CompareCompanies);

    let events: Vec<AnswerEvent> = stream.events.collect().await;
    assert!(matches!(events.first(), Some(AnswerEvent::Facts { facts, .. }) if facts.len() == 2));
    assert!(events.iter().any(|e| matches!(e, AnswerEvent::Delta { .. })));
    assert!(matches!(
        events.last(),
        Some(AnswerEvent::Done { mode: AnswerMode::Generated, .. })
    ));
}

#[tokio::test]
async fn test_catalog_reload_and_stats() {
    let engine = engine().await;
    assert_eq!(assert_ok!(engine.reload_catalog().await), 40);

    let stats = assert_ok!(engine.graph_stats().await);
    assert_eq!(stats.companies, 14);
    assert_eq!(stats.investors, 5);
    assert_eq!(stats.sectors, 7);
    assert_eq!(stats.subsectors, 10);
    assert_eq!(stats.locations, 4);

    let resolutions = engine.resolve_mention("bengaluru", &[]).await;
    assert_eq!(resolutions[0].name, "Bangalore");
}
