//! Graph executor
//!
//! Runs bound templates against the graph store:
//! - Bounded retry with exponential backoff for transient store failures
//! - Optional Redis row cache keyed by template, parameters and catalog epoch
//! - Parallel sub-traversals for composite templates, merged into one ranking
//! - Deterministic row order and limits

use super::resolver::BoundTemplate;
use super::templates::{Metric, Ordering, Shape, TemplateId, TemplateSpec};
use crate::cache::{keys, Cache};
use crate::config::RetryConfig;
use crate::errors::{AppError, Result};
use crate::graph::{CatalogEntry, GraphStats, GraphStore, Params, Row};
use crate::metrics;
use backoff::{future::retry, ExponentialBackoff, ExponentialBackoffBuilder};
use futures::future::try_join_all;
use serde_json::{json, Value};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Executes traversal templates
pub struct GraphExecutor {
    store: Arc<dyn GraphStore>,
    cache: Option<Arc<Cache>>,
    retry: RetryConfig,
    /// Bumped on catalog reload so cached rows from an older graph are skipped
    epoch: AtomicU64,
}

impl GraphExecutor {
    pub fn new(store: Arc<dyn GraphStore>, retry: RetryConfig) -> Self {
        Self {
            store,
            cache: None,
            retry,
            epoch: AtomicU64::new(0),
        }
    }

    pub fn with_cache(mut self, cache: Arc<Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    pub fn cache(&self) -> Option<&Arc<Cache>> {
        self.cache.as_ref()
    }

    /// Stop serving rows cached before now
    pub fn invalidate(&self) {
        let epoch = self.epoch.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        debug!(epoch, "Row cache epoch advanced");
    }

    /// Run a bound template and return its ordered, limited rows
    pub async fn execute(&self, bound: &BoundTemplate) -> Result<Vec<Row>> {
        let spec = bound.spec();
        let rows = match spec.shape {
            Shape::Statement(_) => self.fetch(spec, &bound.params).await?,
            Shape::Composite(parts) => self.merge_parts(parts, &bound.params).await?,
        };

        let rows = order_rows(spec, bound.metric, bound.limit, rows);
        debug!(template = %bound.template, rows = rows.len(), "Template executed");
        Ok(rows)
    }

    /// Bulk catalog read, with the same retry policy as templates
    pub async fn catalog_entries(&self) -> Result<Vec<CatalogEntry>> {
        let store = &self.store;
        self.with_retry(TemplateId::CatalogEntries.as_str(), || store.catalog_entries())
            .await
    }

    pub async fn graph_stats(&self) -> Result<GraphStats> {
        let rows = self
            .fetch(TemplateId::GraphStatistics.spec(), &Params::new())
            .await?;
        Ok(rows.first().map(GraphStats::from_row).unwrap_or_default())
    }

    async fn fetch(&self, spec: &'static TemplateSpec, params: &Params) -> Result<Vec<Row>> {
        let cached = self.cache.as_ref().map(|cache| {
            let epoch = self.epoch.load(AtomicOrdering::SeqCst);
            (cache, keys::template_rows(epoch, spec.id.as_str(), params))
        });

        if let Some((cache, key)) = &cached {
            match cache.get::<Vec<Row>>(key).await {
                Ok(Some(rows)) => {
                    metrics::record_cache_lookup(true);
                    return Ok(rows);
                }
                Ok(None) => metrics::record_cache_lookup(false),
                Err(e) => warn!(template = %spec.id, error = %e, "Row cache read failed"),
            }
        }

        let store = &self.store;
        let rows = self
            .with_retry(spec.id.as_str(), || store.query(spec, params))
            .await?;

        if let Some((cache, key)) = &cached {
            if let Err(e) = cache.set(key, &rows).await {
                warn!(template = %spec.id, error = %e, "Row cache write failed");
            }
        }
        Ok(rows)
    }

    /// Run independent sub-traversals concurrently and merge them per company
    ///
    /// A company's score is the number of sub-traversals it appears in.
    async fn merge_parts(&self, parts: &'static [TemplateId], params: &Params) -> Result<Vec<Row>> {
        let results = try_join_all(parts.iter().map(|part| self.fetch(part.spec(), params))).await?;

        let mut merged: BTreeMap<String, Row> = BTreeMap::new();
        for (part, rows) in parts.iter().zip(results) {
            for row in rows {
                let Some(name) = row.text("name").map(str::to_string) else {
                    continue;
                };
                let entry = merged.entry(name.clone()).or_insert_with(|| {
                    Row::new()
                        .with("name", json!(name))
                        .with("currentValuation", row.get("currentValuation").cloned().unwrap_or(Value::Null))
                        .with("score", json!(0))
                        .with("sharedSectors", json!([]))
                        .with("sharedLocations", json!([]))
                        .with("sharedInvestors", json!([]))
                });
                let score = entry.integer("score").unwrap_or(0) + 1;
                entry.insert("score", json!(score));
                entry.insert(shared_field(*part), json!(row.texts("shared")));
            }
        }

        let company = params.get("company").cloned().unwrap_or(Value::Null);
        Ok(merged
            .into_values()
            .map(|row| row.with("company", company.clone()))
            .collect())
    }

    async fn with_retry<T, F, Fut>(&self, label: &'static str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let attempts = AtomicU32::new(0);

        let result = retry(self.backoff_policy(), || {
            let attempt = attempts.fetch_add(1, AtomicOrdering::SeqCst) + 1;
            let call = operation();
            async move {
                let started = Instant::now();
                let outcome = call.await;
                metrics::record_store_query(started.elapsed().as_secs_f64(), label, outcome.is_ok());

                match outcome {
                    Ok(value) => Ok(value),
                    Err(e) if e.is_transient() && attempt < max_attempts => {
                        warn!(template = label, attempt, error = %e, "Transient graph store failure, retrying");
                        metrics::record_store_retry(label);
                        Err(backoff::Error::transient(e))
                    }
                    Err(e) => Err(backoff::Error::permanent(e)),
                }
            }
        })
        .await;

        result.map_err(|e| {
            let attempts = attempts.load(AtomicOrdering::SeqCst);
            error!(template = label, attempts, error = %e, "Graph retrieval failed");
            AppError::Retrieval {
                template: label.to_string(),
                attempts,
                message: e.to_string(),
            }
        })
    }

    fn backoff_policy(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.retry.initial_backoff_ms))
            .with_max_interval(Duration::from_millis(self.retry.max_backoff_ms))
            .with_max_elapsed_time(None)
            .build()
    }
}

fn shared_field(part: TemplateId) -> &'static str {
    match part {
        TemplateId::SimilarBySector => "sharedSectors",
        TemplateId::SimilarByLocation => "sharedLocations",
        _ => "sharedInvestors",
    }
}

/// Apply a template's ordering policy and limit
///
/// Unordered list fields are sorted first, so rows are identical however the
/// store happened to collect them.
pub fn order_rows(spec: &TemplateSpec, metric: Option<Metric>, limit: usize, mut rows: Vec<Row>) -> Vec<Row> {
    for row in &mut rows {
        canonicalize(row, spec.ordered_fields);
    }

    match spec.ordering {
        Ordering::Ranked => {
            if let Some(field) = metric.map(|m| m.field()) {
                rows.retain(|row| row.number(field).is_some());
                rows.sort_by(|a, b| descending(a.number(field), b.number(field)).then_with(|| by_name(a, b)));
            }
        }
        Ordering::ValuedFirst(field) => {
            rows.sort_by(|a, b| descending(a.number(field), b.number(field)).then_with(|| by_name(a, b)));
        }
        Ordering::MentionOrder => rows.sort_by_key(|row| row.integer("position").unwrap_or(i64::MAX)),
        Ordering::ByName => rows.sort_by(by_name),
        Ordering::AsReturned => {}
    }

    rows.truncate(limit);
    rows
}

fn canonicalize(row: &mut Row, ordered_fields: &[&str]) {
    for (field, value) in row.values_mut() {
        if ordered_fields.contains(&field.as_str()) {
            continue;
        }
        if let Value::Array(items) = value {
            if items.iter().all(Value::is_string) {
                items.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
                items.dedup();
            }
        }
    }
}

/// Larger values first, missing values last
fn descending(a: Option<f64>, b: Option<f64>) -> CmpOrdering {
    match (a, b) {
        (Some(a), Some(b)) => b.total_cmp(&a),
        (Some(_), None) => CmpOrdering::Less,
        (None, Some(_)) => CmpOrdering::Greater,
        (None, None) => CmpOrdering::Equal,
    }
}

fn by_name(a: &Row, b: &Row) -> CmpOrdering {
    a.text("name")
        .unwrap_or_default()
        .cmp(b.text("name").unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::interpreter::Intent;
    use crate::graph::{CompanySnapshot, GraphSnapshot, InMemoryGraph};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Fails the first `failures` calls with the given error, then delegates
    struct FlakyStore {
        inner: InMemoryGraph,
        failures: usize,
        transient: bool,
        calls: AtomicUsize,
    }

    impl FlakyStore {
        fn new(failures: usize, transient: bool) -> Self {
            Self {
                inner: graph(),
                failures,
                transient,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl GraphStore for FlakyStore {
        async fn query(&self, template: &TemplateSpec, params: &Params) -> Result<Vec<Row>> {
            let call = self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            if call < self.failures {
                return Err(if self.transient {
                    AppError::StoreUnavailable { message: "connection refused".into() }
                } else {
                    AppError::StoreQuery { message: "syntax error".into() }
                });
            }
            self.inner.query(template, params).await
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    fn company(name: &str, valuation: Option<f64>, sector: &str, city: &str, investors: &[&str]) -> CompanySnapshot {
        CompanySnapshot {
            name: name.to_string(),
            current_valuation: valuation,
            sector: Some(sector.to_string()),
            locations: vec![city.to_string()],
            investors: investors.iter().map(|i| i.to_string()).collect(),
            ..Default::default()
        }
    }

    fn graph() -> InMemoryGraph {
        InMemoryGraph::from_snapshot(GraphSnapshot {
            companies: vec![
                company("Swiggy", Some(10.7), "Foodtech", "Bangalore", &["Accel", "SoftBank"]),
                company("Zomato", Some(5.4), "Foodtech", "Gurgaon", &["SoftBank"]),
                company("Zepto", Some(1.4), "E-Commerce", "Mumbai", &["Accel"]),
                company("Meesho", None, "E-Commerce", "Bangalore", &["SoftBank"]),
            ],
        })
    }

    fn retry_config() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
        }
    }

    fn bound(template: TemplateId, pairs: &[(&str, Value)], metric: Option<Metric>, limit: usize) -> BoundTemplate {
        BoundTemplate {
            template,
            intent: Intent::FilterByRelation,
            params: pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            bindings: Vec::new(),
            metric,
            limit,
        }
    }

    fn names(rows: &[Row]) -> Vec<&str> {
        rows.iter().filter_map(|r| r.text("name")).collect()
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let store = Arc::new(FlakyStore::new(2, true));
        let executor = GraphExecutor::new(store.clone(), retry_config());

        let rows = executor
            .execute(&bound(TemplateId::InvestorPortfolio, &[("investor", json!("Accel"))], None, 20))
            .await
            .unwrap();

        assert_eq!(names(&rows), vec!["Swiggy", "Zepto"]);
        assert_eq!(store.calls.load(AtomicOrdering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_retrieval_error() {
        let store = Arc::new(FlakyStore::new(10, true));
        let executor = GraphExecutor::new(store.clone(), retry_config());

        let err = executor
            .execute(&bound(TemplateId::InvestorPortfolio, &[("investor", json!("Accel"))], None, 20))
            .await
            .unwrap_err();

        match err {
            AppError::Retrieval { template, attempts, .. } => {
                assert_eq!(template, "investor_portfolio");
                assert_eq!(attempts, 3);
            }
            other => panic!("expected retrieval error, got {:?}", other),
        }
        assert_eq!(store.calls.load(AtomicOrdering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_query_errors_are_not_retried() {
        let store = Arc::new(FlakyStore::new(1, false));
        let executor = GraphExecutor::new(store.clone(), retry_config());

        let err = executor.graph_stats().await.unwrap_err();
        assert!(matches!(err, AppError::Retrieval { attempts: 1, .. }));
        assert_eq!(store.calls.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ranked_rows_drop_missing_metric() {
        let executor = GraphExecutor::new(Arc::new(graph()), retry_config());
        let rows = executor
            .execute(&bound(TemplateId::TopCompanies, &[], Some(Metric::CurrentValuation), 10))
            .await
            .unwrap();

        assert_eq!(names(&rows), vec!["Swiggy", "Zomato", "Zepto"]);
    }

    #[tokio::test]
    async fn test_similarity_scores_count_shared_traits() {
        let executor = GraphExecutor::new(Arc::new(graph()), retry_config());
        let rows = executor
            .execute(&bound(
                TemplateId::SimilarCompanies,
                &[("company", json!("Swiggy"))],
                Some(Metric::SimilarityScore),
                5,
            ))
            .await
            .unwrap();

        // Meesho shares city and investor, Zomato sector and investor, Zepto an investor
        assert_eq!(names(&rows), vec!["Meesho", "Zomato", "Zepto"]);
        assert_eq!(rows[0].integer("score"), Some(2));
        assert_eq!(rows[0].texts("sharedLocations"), vec!["Bangalore"]);
        assert_eq!(rows[2].integer("score"), Some(1));
        assert_eq!(rows[0].text("company"), Some("Swiggy"));
    }

    #[test]
    fn test_valued_rows_come_first_then_names() {
        let rows = vec![
            Row::new().with("name", json!("Meesho")).with("currentValuation", Value::Null),
            Row::new().with("name", json!("Zepto")).with("currentValuation", json!(1.4)),
            Row::new().with("name", json!("Acko")).with("currentValuation", Value::Null),
            Row::new().with("name", json!("Swiggy")).with("currentValuation", json!(10.7)),
        ];
        let ordered = order_rows(TemplateId::InvestorPortfolio.spec(), None, 3, rows);
        assert_eq!(names(&ordered), vec!["Swiggy", "Zepto", "Acko"]);
    }

    #[test]
    fn test_unordered_lists_are_sorted() {
        let rows = vec![Row::new()
            .with("name", json!("SoftBank"))
            .with("companies", json!(["Zomato", "Meesho", "Zomato"]))];
        let ordered = order_rows(TemplateId::InvestorProfile.spec(), None, 1, rows);
        assert_eq!(ordered[0].texts("companies"), vec!["Meesho", "Zomato"]);
    }

    #[test]
    fn test_path_lists_keep_their_order() {
        let rows = vec![Row::new().with("nodes", json!(["Zepto", "Accel", "Bangalore"]))];
        let ordered = order_rows(TemplateId::PathBetween.spec(), None, 1, rows);
        assert_eq!(ordered[0].texts("nodes"), vec!["Zepto", "Accel", "Bangalore"]);
    }
}
