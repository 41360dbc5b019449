//! Query interpreter
//!
//! Classifies a question into one intent using the entities the catalog finds
//! in it plus keyword cues. Rules are checked in a fixed order and the first
//! match wins, so the same question always gets the same intent.

use super::catalog::{normalize, EntityCatalog, Mention};
use super::templates::Metric;
use crate::config::EngineConfig;
use crate::errors::{AppError, Result};
use crate::graph::EntityKind;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// What the question asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    LookupEntity,
    FilterByRelation,
    TopNByMetric,
    AggregateByGroup,
    CompareEntities,
    CoInvestment,
    Similarity,
    PathBetween,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::LookupEntity => "lookup_entity",
            Intent::FilterByRelation => "filter_by_relation",
            Intent::TopNByMetric => "top_n_by_metric",
            Intent::AggregateByGroup => "aggregate_by_group",
            Intent::CompareEntities => "compare_entities",
            Intent::CoInvestment => "co_investment",
            Intent::Similarity => "similarity",
            Intent::PathBetween => "path_between",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which population a ranking question is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subject {
    Companies,
    Investors,
}

/// Structured reading of a question
#[derive(Debug, Clone, Serialize)]
pub struct Interpretation {
    pub question: String,
    pub intent: Intent,
    /// Entity mentions in question order
    pub mentions: Vec<Mention>,
    pub metric: Option<Metric>,
    pub group_by: Option<EntityKind>,
    pub subject: Subject,
    pub limit: Option<usize>,
    /// Cue words that decided the intent
    pub cues: Vec<String>,
}

impl Interpretation {
    /// Highest-confidence mention; the earliest one wins ties
    pub fn primary(&self) -> Option<&Mention> {
        let mut primary: Option<&Mention> = None;
        for mention in &self.mentions {
            let confidence = mention.best().map_or(0.0, |b| b.confidence);
            if primary.map_or(true, |p| confidence > p.best().map_or(0.0, |b| b.confidence)) {
                primary = Some(mention);
            }
        }
        primary
    }
}

const SIMILARITY_CUES: &[&str] = &[
    "similar", "alternatives", "alternative", "competitors", "competitor", "peers", "rivals",
    "comparable", "companies like", "startups like", "unicorns like",
];
const PATH_CUES: &[&str] = &[
    "connected", "connection", "connections", "path", "link", "linked", "related", "relationship",
];
const CO_INVEST_CUES: &[&str] = &[
    "co-invest", "co-invested", "co-investor", "co-investors", "co-investing", "coinvest",
    "coinvestors", "alongside", "together", "shared", "invested with", "invest with",
];
const SUPERLATIVE_CUES: &[&str] = &[
    "top", "most", "highest", "largest", "biggest", "best", "leading", "richest",
];
const AGGREGATION_CUES: &[&str] = &[
    "total", "sum", "average", "avg", "mean", "how many", "count", "number of", "breakdown",
    "per sector", "per industry", "per city", "per location", "by sector", "by city",
];
const RELATION_CUES: &[&str] = &[
    "invested", "invest", "invests", "investing", "portfolio", "backed", "funded", "investments",
];
const LISTING_CUES: &[&str] = &[
    "companies", "company", "startups", "unicorns", "list", "which", "show", "located", "based",
    "headquartered",
];
const SECTOR_NOUNS: &[&str] = &["sector", "sectors", "industry", "industries"];
const LOCATION_NOUNS: &[&str] = &["city", "cities", "location", "locations"];
const INVESTOR_NOUNS: &[&str] = &["investor", "investors", "vc", "vcs", "fund", "funds", "backers"];

/// Metric cues, checked in order
const METRIC_CUES: &[(&[&str], Metric)] = &[
    (&["growth", "grew", "grown", "multiple", "returns"], Metric::ValuationGrowth),
    (&["entry valuation", "at entry", "entry"], Metric::EntryValuation),
    (&["portfolio value", "portfolio valuation", "largest portfolio", "biggest portfolio"], Metric::PortfolioValue),
    (&["average", "avg", "mean"], Metric::AverageValuation),
    (
        &["how many", "number of", "count", "most unicorns", "most companies", "most startups"],
        Metric::CompanyCount,
    ),
    (&["total", "sum", "combined"], Metric::TotalValuation),
    (&["investments", "most active", "active", "deals"], Metric::InvestmentCount),
    (&["valuation", "valuable", "valued", "worth"], Metric::CurrentValuation),
];

/// A count of at most three digits, after "top"/"first" or before a plural noun
const LIMIT_PATTERN: &str = r"\b(?:top|first)\s+(\d{1,3})\b|\b(\d{1,3})\s+(?:\w+\s+)?(?:companies|startups|unicorns|investors|sectors|cities)\b";

/// Normalized question text for cue lookups
struct Cues {
    words: HashSet<String>,
    padded: String,
}

impl Cues {
    fn new(question: &str) -> Self {
        let normalized = normalize(question);
        Self {
            words: normalized.split(' ').map(str::to_string).collect(),
            padded: format!(" {} ", normalized),
        }
    }

    /// First cue present; multi-word cues match as whole phrases
    fn first(&self, cues: &[&'static str]) -> Option<&'static str> {
        cues.iter().copied().find(|cue| {
            if cue.contains(' ') {
                self.padded.contains(&format!(" {} ", cue))
            } else {
                self.words.contains(*cue)
            }
        })
    }
}

/// Rule-based question classifier
pub struct QueryInterpreter {
    margin: f32,
    max_limit: usize,
    limit_pattern: Regex,
}

impl QueryInterpreter {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let limit_pattern = Regex::new(LIMIT_PATTERN).map_err(|e| AppError::Internal {
            message: format!("invalid limit pattern: {}", e),
        })?;

        Ok(Self {
            margin: config.ambiguity_margin,
            max_limit: config.max_limit,
            limit_pattern,
        })
    }

    /// Interpret a question against the current catalog
    pub fn interpret(&self, question: &str, catalog: &EntityCatalog) -> Result<Interpretation> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AppError::Validation {
                message: "Question must not be empty".to_string(),
                field: Some("question".to_string()),
            });
        }

        let mentions = catalog.scan(question);
        let cues = Cues::new(question);
        let mut matched = Vec::new();

        let intent = self.classify(&mentions, &cues, &mut matched).ok_or_else(|| {
            AppError::UnresolvedQuery {
                question: question.to_string(),
            }
        })?;

        let metric = METRIC_CUES
            .iter()
            .find(|(words, _)| cues.first(words).is_some())
            .map(|(_, metric)| *metric);

        let group_by = match intent {
            Intent::AggregateByGroup => Some(self.group_noun(&mentions, &cues).unwrap_or(EntityKind::Sector)),
            _ => None,
        };

        let subject = if cues.first(INVESTOR_NOUNS).is_some()
            || matches!(metric, Some(Metric::InvestmentCount | Metric::PortfolioValue))
        {
            Subject::Investors
        } else {
            Subject::Companies
        };

        Ok(Interpretation {
            question: question.to_string(),
            intent,
            mentions,
            metric,
            group_by,
            subject,
            limit: self.limit(question),
            cues: matched.into_iter().map(str::to_string).collect(),
        })
    }

    fn classify(&self, mentions: &[Mention], cues: &Cues, matched: &mut Vec<&'static str>) -> Option<Intent> {
        let has_kind = |kind: EntityKind| mentions.iter().any(|m| m.is_kind(kind, self.margin));
        let mut hit = |cue: Option<&'static str>| match cue {
            Some(cue) => {
                matched.push(cue);
                true
            }
            None => false,
        };

        if has_kind(EntityKind::Company) && hit(cues.first(SIMILARITY_CUES)) {
            return Some(Intent::Similarity);
        }
        if distinct_entities(mentions) >= 2 && hit(cues.first(PATH_CUES)) {
            return Some(Intent::PathBetween);
        }
        if has_kind(EntityKind::Investor) && hit(cues.first(CO_INVEST_CUES)) {
            return Some(Intent::CoInvestment);
        }
        if self.same_kind_pair(mentions) {
            return Some(Intent::CompareEntities);
        }

        let superlative = hit(cues.first(SUPERLATIVE_CUES));
        let aggregation = hit(cues.first(AGGREGATION_CUES));
        if superlative || aggregation {
            if self.group_noun(mentions, cues).is_some() || !superlative {
                return Some(Intent::AggregateByGroup);
            }
            return Some(Intent::TopNByMetric);
        }

        if has_kind(EntityKind::Investor) && (has_kind(EntityKind::Company) || hit(cues.first(RELATION_CUES))) {
            return Some(Intent::FilterByRelation);
        }
        let grouping = [EntityKind::Sector, EntityKind::SubSector, EntityKind::Location];
        if grouping.into_iter().any(|kind| has_kind(kind)) && hit(cues.first(LISTING_CUES)) {
            return Some(Intent::FilterByRelation);
        }

        (!mentions.is_empty()).then_some(Intent::LookupEntity)
    }

    /// Two distinct entities whose best reading shares a comparable kind
    fn same_kind_pair(&self, mentions: &[Mention]) -> bool {
        [EntityKind::Company, EntityKind::Investor, EntityKind::Sector, EntityKind::Location]
            .into_iter()
            .any(|kind| {
                let names: HashSet<&str> = mentions
                    .iter()
                    .filter_map(Mention::best)
                    .filter(|best| best.kind == kind)
                    .map(|best| best.name.as_str())
                    .collect();
                names.len() >= 2
            })
    }

    /// Grouping asked for by a noun ("which sector", "per city") with no entity of that kind named
    fn group_noun(&self, mentions: &[Mention], cues: &Cues) -> Option<EntityKind> {
        [(SECTOR_NOUNS, EntityKind::Sector), (LOCATION_NOUNS, EntityKind::Location)]
            .into_iter()
            .find(|(nouns, kind)| {
                cues.first(nouns).is_some() && !mentions.iter().any(|m| m.is_kind(*kind, self.margin))
            })
            .map(|(_, kind)| kind)
    }

    fn limit(&self, question: &str) -> Option<usize> {
        let lowered = question.to_lowercase();
        let captures = self.limit_pattern.captures(&lowered)?;
        let digits = captures.get(1).or_else(|| captures.get(2))?;
        let limit: usize = digits.as_str().parse().ok()?;
        Some(limit.min(self.max_limit).max(1))
    }
}

fn distinct_entities(mentions: &[Mention]) -> usize {
    mentions
        .iter()
        .filter_map(Mention::best)
        .map(|best| (best.name.as_str(), best.kind))
        .collect::<HashSet<_>>()
        .len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::CatalogEntry;

    fn catalog() -> EntityCatalog {
        let entries = [
            ("Flipkart", EntityKind::Company),
            ("CRED", EntityKind::Company),
            ("PhonePe", EntityKind::Company),
            ("Swiggy", EntityKind::Company),
            ("Tiger Global", EntityKind::Investor),
            ("Accel", EntityKind::Investor),
            ("SoftBank", EntityKind::Investor),
            ("Fintech", EntityKind::Sector),
            ("Payments", EntityKind::SubSector),
            ("Bangalore", EntityKind::Location),
            ("Mumbai", EntityKind::Location),
        ]
        .into_iter()
        .map(|(name, kind)| CatalogEntry { name: name.to_string(), kind })
        .collect();
        EntityCatalog::new(entries, &EngineConfig::default())
    }

    fn interpret(question: &str) -> Interpretation {
        QueryInterpreter::new(&EngineConfig::default())
            .unwrap()
            .interpret(question, &catalog())
            .unwrap()
    }

    #[test]
    fn test_lookup() {
        let result = interpret("Tell me about Flipkart");
        assert_eq!(result.intent, Intent::LookupEntity);
        assert_eq!(result.primary().unwrap().best().unwrap().name, "Flipkart");
    }

    #[test]
    fn test_investor_portfolio_is_a_relation_filter() {
        let result = interpret("Which companies has Tiger Global invested in?");
        assert_eq!(result.intent, Intent::FilterByRelation);
        assert!(result.cues.contains(&"invested".to_string()));
    }

    #[test]
    fn test_location_listing_is_a_relation_filter() {
        assert_eq!(interpret("Companies located in Bangalore").intent, Intent::FilterByRelation);
        assert_eq!(interpret("Tell me about Bangalore").intent, Intent::LookupEntity);
    }

    #[test]
    fn test_two_companies_compare() {
        let result = interpret("Compare CRED and PhonePe");
        assert_eq!(result.intent, Intent::CompareEntities);
        assert_eq!(result.mentions.len(), 2);
    }

    #[test]
    fn test_top_n_reads_limit_and_filter() {
        let result = interpret("List top 5 Fintech unicorns");
        assert_eq!(result.intent, Intent::TopNByMetric);
        assert_eq!(result.limit, Some(5));
        assert_eq!(result.subject, Subject::Companies);
    }

    #[test]
    fn test_top_investors_without_entities() {
        let result = interpret("Who are the top investors?");
        assert_eq!(result.intent, Intent::TopNByMetric);
        assert_eq!(result.subject, Subject::Investors);
        assert!(result.mentions.is_empty());
    }

    #[test]
    fn test_group_noun_makes_aggregation() {
        let result = interpret("Which sector has the most unicorns?");
        assert_eq!(result.intent, Intent::AggregateByGroup);
        assert_eq!(result.group_by, Some(EntityKind::Sector));
        assert_eq!(result.metric, Some(Metric::CompanyCount));

        let result = interpret("Which city has the highest total valuation?");
        assert_eq!(result.group_by, Some(EntityKind::Location));
        assert_eq!(result.metric, Some(Metric::TotalValuation));
    }

    #[test]
    fn test_named_group_keeps_ranking() {
        let result = interpret("Top 3 companies in the Fintech sector by valuation");
        assert_eq!(result.intent, Intent::TopNByMetric);
        assert_eq!(result.metric, Some(Metric::CurrentValuation));
        assert_eq!(result.limit, Some(3));
    }

    #[test]
    fn test_growth_metric() {
        let result = interpret("Which Bangalore startups show the highest growth?");
        assert_eq!(result.intent, Intent::TopNByMetric);
        assert_eq!(result.metric, Some(Metric::ValuationGrowth));
    }

    #[test]
    fn test_co_investment_needs_an_investor() {
        assert_eq!(
            interpret("Who co-invested alongside Accel?").intent,
            Intent::CoInvestment
        );
    }

    #[test]
    fn test_similarity_and_path() {
        assert_eq!(interpret("Companies similar to Swiggy").intent, Intent::Similarity);
        assert_eq!(
            interpret("How is SoftBank connected to Mumbai?").intent,
            Intent::PathBetween
        );
    }

    #[test]
    fn test_limit_is_clamped() {
        let result = interpret("top 500 companies by valuation");
        assert_eq!(result.limit, Some(50));
        assert_eq!(interpret("first 3 startups in Bangalore").limit, Some(3));
    }

    #[test]
    fn test_year_is_not_a_limit() {
        let result = interpret("top 2021 unicorns");
        assert_eq!(result.intent, Intent::TopNByMetric);
        assert_eq!(result.limit, None);

        assert_eq!(interpret("Companies in Bangalore founded in 2015").limit, None);
        assert_eq!(interpret("largest 5 fintech companies").limit, Some(5));
    }

    #[test]
    fn test_each_is_not_an_aggregation() {
        let result = interpret("Show each company Accel backed");
        assert_eq!(result.intent, Intent::FilterByRelation);
        assert!(result.cues.contains(&"backed".to_string()));

        let result = interpret("Valuation per sector");
        assert_eq!(result.intent, Intent::AggregateByGroup);
        assert_eq!(result.group_by, Some(EntityKind::Sector));
    }

    #[test]
    fn test_unresolved_and_empty_questions() {
        let interpreter = QueryInterpreter::new(&EngineConfig::default()).unwrap();
        let err = interpreter.interpret("What is the weather like?", &catalog()).unwrap_err();
        assert!(matches!(err, AppError::UnresolvedQuery { .. }));

        let err = interpreter.interpret("   ", &catalog()).unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[test]
    fn test_classification_is_deterministic() {
        let first = interpret("Which companies has Tiger Global invested in?");
        for _ in 0..10 {
            let again = interpret("Which companies has Tiger Global invested in?");
            assert_eq!(again.intent, first.intent);
            assert_eq!(again.mentions, first.mentions);
        }
    }
}
