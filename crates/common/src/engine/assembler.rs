//! Context assembler
//!
//! Turns executor rows into provenance-tagged fact statements:
//! - one statement per row, worded per template
//! - statements restating the same subject/relation pair are dropped
//! - a fact and token budget trims the lowest-ranked facts first
//!
//! An empty row set becomes an explicit `NoFacts` marker.

use super::resolver::BoundTemplate;
use super::templates::TemplateId;
use crate::config::EngineConfig;
use crate::graph::Row;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Where a fact came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub template: TemplateId,
    /// Index of the source row in executor order
    pub row: usize,
    pub fields: Vec<String>,
}

/// One assertion derived from one row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactStatement {
    pub text: String,
    pub subject: String,
    pub relation: String,
    pub provenance: Provenance,
}

/// Facts dropped by the budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Truncation {
    pub kept: usize,
    pub dropped: usize,
}

/// Output of the assembler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssembledContext {
    Facts {
        facts: Vec<FactStatement>,
        truncation: Option<Truncation>,
        /// Estimated tokens of the kept facts
        tokens: usize,
    },
    /// The traversal matched nothing
    NoFacts { template: TemplateId },
}

impl AssembledContext {
    pub fn facts(&self) -> &[FactStatement] {
        match self {
            AssembledContext::Facts { facts, .. } => facts,
            AssembledContext::NoFacts { .. } => &[],
        }
    }

    pub fn truncation(&self) -> Option<Truncation> {
        match self {
            AssembledContext::Facts { truncation, .. } => *truncation,
            AssembledContext::NoFacts { .. } => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, AssembledContext::NoFacts { .. })
    }
}

/// Rendered statement before provenance is attached
struct Draft {
    text: String,
    subject: String,
    relation: String,
    fields: &'static [&'static str],
}

pub struct ContextAssembler {
    max_facts: usize,
    max_tokens: usize,
}

impl ContextAssembler {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            max_facts: config.max_facts.max(1),
            max_tokens: config.max_context_tokens,
        }
    }

    pub fn assemble(&self, rows: &[Row], bound: &BoundTemplate) -> AssembledContext {
        if rows.is_empty() {
            return AssembledContext::NoFacts {
                template: bound.template,
            };
        }

        let mut seen = HashSet::new();
        let mut candidates = Vec::with_capacity(rows.len());
        for (index, row) in rows.iter().enumerate() {
            let draft = draft(bound, index, row);
            if !seen.insert((draft.subject.to_lowercase(), draft.relation.clone())) {
                tracing::debug!(subject = %draft.subject, relation = %draft.relation, "Dropped duplicate fact");
                continue;
            }
            candidates.push(FactStatement {
                provenance: Provenance {
                    template: bound.template,
                    row: index,
                    fields: draft
                        .fields
                        .iter()
                        .filter(|field| row.get(field).is_some_and(|v| !v.is_null()))
                        .map(|field| field.to_string())
                        .collect(),
                },
                text: draft.text,
                subject: draft.subject,
                relation: draft.relation,
            });
        }

        let total = candidates.len();
        let mut facts = Vec::with_capacity(total.min(self.max_facts));
        let mut tokens = 0;
        for fact in candidates {
            let cost = estimate_tokens(&fact.text);
            // The top fact survives any budget
            let fits = facts.len() < self.max_facts && tokens + cost <= self.max_tokens;
            if !facts.is_empty() && !fits {
                break;
            }
            tokens += cost;
            facts.push(fact);
        }

        let truncation = (facts.len() < total).then(|| Truncation {
            kept: facts.len(),
            dropped: total - facts.len(),
        });
        if let Some(t) = truncation {
            tracing::debug!(kept = t.kept, dropped = t.dropped, "Context truncated to budget");
        }

        AssembledContext::Facts {
            facts,
            truncation,
            tokens,
        }
    }
}

/// Numbered fact lines as they appear in prompts and fallback answers
pub fn render(context: &AssembledContext) -> String {
    match context {
        AssembledContext::NoFacts { .. } => "No facts found.".to_string(),
        AssembledContext::Facts {
            facts, truncation, ..
        } => {
            let mut lines: Vec<String> = facts
                .iter()
                .enumerate()
                .map(|(i, fact)| format!("[{}] {}", i + 1, fact.text))
                .collect();
            if let Some(t) = truncation {
                lines.push(truncation_note(t));
            }
            lines.join("\n")
        }
    }
}

pub fn truncation_note(truncation: &Truncation) -> String {
    let noun = if truncation.dropped == 1 { "fact" } else { "facts" };
    format!("({} more {} omitted)", truncation.dropped, noun)
}

fn estimate_tokens(text: &str) -> usize {
    text.len() / 4
}

fn draft(bound: &BoundTemplate, index: usize, row: &Row) -> Draft {
    let name = row.text("name").unwrap_or("unknown").to_string();
    let rank = index + 1;

    match bound.template {
        TemplateId::CompanyProfile => Draft {
            text: format!(
                "{} (rank #{}) has a current valuation of {} and an entry valuation of {}, \
                 entered on {}; sector: {}; sub-sector: {}; locations: {}; investors: {}",
                name,
                count(row, "rank"),
                valuation(row, "currentValuation"),
                valuation(row, "entryValuation"),
                row.text("entryDate").unwrap_or("unknown"),
                list(row, "sectors"),
                list(row, "subsectors"),
                list(row, "locations"),
                list(row, "investors"),
            ),
            subject: name,
            relation: "profile".into(),
            fields: &[
                "name",
                "rank",
                "currentValuation",
                "entryValuation",
                "entryDate",
                "sectors",
                "subsectors",
                "locations",
                "investors",
            ],
        },
        TemplateId::InvestorProfile => Draft {
            text: format!(
                "{} has {} investments with a portfolio value of {}: {}; sectors: {}",
                name,
                count(row, "investments"),
                valuation(row, "portfolioValue"),
                list(row, "companies"),
                list(row, "sectors"),
            ),
            subject: name,
            relation: "profile".into(),
            fields: &["name", "investments", "portfolioValue", "companies", "sectors"],
        },
        TemplateId::SectorProfile => Draft {
            text: format!(
                "{} sector has {} companies worth {} in total: {}; sub-sectors: {}",
                name,
                count(row, "companyCount"),
                valuation(row, "totalValuation"),
                list(row, "companies"),
                list(row, "subsectors"),
            ),
            subject: name,
            relation: "profile".into(),
            fields: &["name", "companyCount", "totalValuation", "companies", "subsectors"],
        },
        TemplateId::SubSectorProfile | TemplateId::LocationProfile => Draft {
            text: format!(
                "{} has {} companies worth {} in total: {}; sectors: {}",
                name,
                count(row, "companyCount"),
                valuation(row, "totalValuation"),
                list(row, "companies"),
                list(row, "sectors"),
            ),
            subject: name,
            relation: "profile".into(),
            fields: &["name", "companyCount", "totalValuation", "companies", "sectors"],
        },
        TemplateId::TopCompanies => Draft {
            text: format!(
                "#{} {}: current valuation {}, entry valuation {}, growth {}; sector: {}; location: {}",
                rank,
                name,
                valuation(row, "currentValuation"),
                valuation(row, "entryValuation"),
                percent(row, "growthPercent"),
                list(row, "sectors"),
                list(row, "locations"),
            ),
            subject: name,
            relation: "ranking".into(),
            fields: &[
                "name",
                "currentValuation",
                "entryValuation",
                "growthPercent",
                "sectors",
                "locations",
            ],
        },
        TemplateId::TopInvestors => Draft {
            text: format!(
                "#{} {}: {} investments, portfolio value {}",
                rank,
                name,
                count(row, "investments"),
                valuation(row, "portfolioValue"),
            ),
            subject: name,
            relation: "ranking".into(),
            fields: &["name", "investments", "portfolioValue"],
        },
        TemplateId::InvestorPortfolio => Draft {
            text: format!(
                "{} invested in {} (current valuation {}; sector: {}; location: {})",
                row.text("investor").unwrap_or("unknown"),
                name,
                valuation(row, "currentValuation"),
                list(row, "sectors"),
                list(row, "locations"),
            ),
            subject: name,
            relation: "INVESTED_IN".into(),
            fields: &["investor", "name", "currentValuation", "sectors", "locations"],
        },
        TemplateId::SectorCompanies => Draft {
            text: format!(
                "{} operates in {} (current valuation {}; sub-sector: {}; location: {})",
                name,
                row.text("sector").unwrap_or("unknown"),
                valuation(row, "currentValuation"),
                list(row, "subsectors"),
                list(row, "locations"),
            ),
            subject: name,
            relation: "OPERATES_IN".into(),
            fields: &["sector", "name", "currentValuation", "subsectors", "locations"],
        },
        TemplateId::SubSectorCompanies => Draft {
            text: format!(
                "{} specializes in {} (current valuation {}; location: {})",
                name,
                row.text("subsector").unwrap_or("unknown"),
                valuation(row, "currentValuation"),
                list(row, "locations"),
            ),
            subject: name,
            relation: "SPECIALIZES_IN".into(),
            fields: &["subsector", "name", "currentValuation", "locations"],
        },
        TemplateId::LocationCompanies => Draft {
            text: format!(
                "{} is located in {} (current valuation {}; sector: {})",
                name,
                row.text("location").unwrap_or("unknown"),
                valuation(row, "currentValuation"),
                list(row, "sectors"),
            ),
            subject: name,
            relation: "LOCATED_IN".into(),
            fields: &["location", "name", "currentValuation", "sectors"],
        },
        TemplateId::SectorStatistics | TemplateId::LocationStatistics => Draft {
            text: format!(
                "#{} {}: {} companies, {} total, {} average across {} valued",
                rank,
                name,
                count(row, "companyCount"),
                valuation(row, "totalValuation"),
                valuation(row, "avgValuation"),
                count(row, "valuedCount"),
            ),
            subject: name,
            relation: "statistics".into(),
            fields: &["name", "companyCount", "totalValuation", "avgValuation", "valuedCount"],
        },
        TemplateId::CompareCompanies => Draft {
            text: format!(
                "{}: sector {}, location {}, current valuation {}, entry valuation {}, \
                 entered on {}, rank #{}; investors: {}",
                name,
                list(row, "sectors"),
                list(row, "locations"),
                valuation(row, "currentValuation"),
                valuation(row, "entryValuation"),
                row.text("entryDate").unwrap_or("unknown"),
                count(row, "rank"),
                list(row, "investors"),
            ),
            subject: name,
            relation: "comparison".into(),
            fields: &[
                "name",
                "sectors",
                "locations",
                "currentValuation",
                "entryValuation",
                "entryDate",
                "rank",
                "investors",
            ],
        },
        TemplateId::CompareInvestors => Draft {
            text: format!(
                "{}: {} investments, portfolio value {}; sectors: {}",
                name,
                count(row, "investments"),
                valuation(row, "portfolioValue"),
                list(row, "sectors"),
            ),
            subject: name,
            relation: "comparison".into(),
            fields: &["name", "investments", "portfolioValue", "sectors"],
        },
        TemplateId::CompareSectors | TemplateId::CompareLocations => Draft {
            text: format!(
                "{}: {} companies, {} total, {} average",
                name,
                count(row, "companyCount"),
                valuation(row, "totalValuation"),
                valuation(row, "avgValuation"),
            ),
            subject: name,
            relation: "comparison".into(),
            fields: &["name", "companyCount", "totalValuation", "avgValuation"],
        },
        TemplateId::CoInvestors => {
            let investor = row.text("investor").unwrap_or("unknown");
            Draft {
                text: format!(
                    "{}: {} shared investments with {} ({})",
                    name,
                    count(row, "sharedInvestments"),
                    investor,
                    list(row, "sharedCompanies"),
                ),
                subject: name,
                relation: format!("CO_INVESTED_WITH {}", investor),
                fields: &["investor", "name", "sharedInvestments", "sharedCompanies"],
            }
        }
        TemplateId::SharedPortfolio => Draft {
            text: format!(
                "{} both invested in {} (current valuation {}; sector: {})",
                row.texts("investors").join(" and "),
                name,
                valuation(row, "currentValuation"),
                list(row, "sectors"),
            ),
            subject: name,
            relation: "INVESTED_IN".into(),
            fields: &["investors", "name", "currentValuation", "sectors"],
        },
        TemplateId::SimilarCompanies => {
            let target = bound
                .params
                .get("company")
                .and_then(Value::as_str)
                .unwrap_or("the company");
            let mut overlaps = Vec::new();
            for (field, label) in [
                ("sharedSectors", "sector"),
                ("sharedLocations", "location"),
                ("sharedInvestors", "investors"),
            ] {
                let shared = row.texts(field);
                if !shared.is_empty() {
                    overlaps.push(format!("shared {}: {}", label, shared.join(", ")));
                }
            }
            Draft {
                text: format!(
                    "{} is similar to {} (score {}; {}; current valuation {})",
                    name,
                    target,
                    count(row, "score"),
                    overlaps.join("; "),
                    valuation(row, "currentValuation"),
                ),
                subject: name,
                relation: "SIMILAR_TO".into(),
                fields: &[
                    "name",
                    "score",
                    "sharedSectors",
                    "sharedLocations",
                    "sharedInvestors",
                    "currentValuation",
                ],
            }
        }
        TemplateId::PathBetween => {
            let nodes = row.texts("nodes");
            let relationships = row.texts("relationships");
            let mut path = nodes.first().map(|n| n.to_string()).unwrap_or_default();
            for (node, relationship) in nodes.iter().skip(1).zip(relationships.iter()) {
                path.push_str(&format!(" -[{}]- {}", relationship, node));
            }
            Draft {
                text: format!("{} ({} hops)", path, count(row, "hops")),
                subject: nodes.first().map(|n| n.to_string()).unwrap_or_default(),
                relation: format!("path to {}", nodes.last().copied().unwrap_or_default()),
                fields: &["nodes", "labels", "relationships", "hops"],
            }
        }
        TemplateId::GraphStatistics => Draft {
            text: format!(
                "The knowledge graph holds {} companies, {} investors, {} sectors, \
                 {} sub-sectors and {} locations joined by {} relationships",
                count(row, "companies"),
                count(row, "investors"),
                count(row, "sectors"),
                count(row, "subsectors"),
                count(row, "locations"),
                count(row, "relationships"),
            ),
            subject: "graph".into(),
            relation: "statistics".into(),
            fields: &[
                "companies",
                "investors",
                "sectors",
                "subsectors",
                "locations",
                "relationships",
            ],
        },
        // Sub-traversals and the catalog scan are never assembled directly
        TemplateId::SimilarBySector
        | TemplateId::SimilarByLocation
        | TemplateId::SimilarByInvestors
        | TemplateId::CatalogEntries => Draft {
            text: row
                .fields()
                .filter_map(|field| row.get(field).map(|value| format!("{}: {}", field, scalar(value))))
                .collect::<Vec<_>>()
                .join(", "),
            subject: name,
            relation: bound.template.as_str().into(),
            fields: &[],
        },
    }
}

/// `$X.YB`, trailing zeros trimmed
fn valuation(row: &Row, field: &str) -> String {
    match row.number(field) {
        Some(value) => format!("${}B", amount(value)),
        None => "unknown".to_string(),
    }
}

fn percent(row: &Row, field: &str) -> String {
    match row.number(field) {
        Some(value) => format!("{}%", amount(value)),
        None => "unknown".to_string(),
    }
}

fn count(row: &Row, field: &str) -> String {
    match (row.integer(field), row.number(field)) {
        (Some(value), _) => value.to_string(),
        (None, Some(value)) => amount(value),
        (None, None) => "unknown".to_string(),
    }
}

fn list(row: &Row, field: &str) -> String {
    let items = row.texts(field);
    if items.is_empty() {
        "unknown".to_string()
    } else {
        items.join(", ")
    }
}

fn amount(value: f64) -> String {
    let text = format!("{:.2}", value);
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "unknown".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::interpreter::Intent;
    use crate::graph::Params;
    use serde_json::json;

    fn bound(template: TemplateId, intent: Intent, params: Value) -> BoundTemplate {
        let params: Params = match params {
            Value::Object(map) => map,
            _ => Params::new(),
        };
        BoundTemplate {
            template,
            intent,
            params,
            bindings: Vec::new(),
            metric: None,
            limit: 20,
        }
    }

    fn portfolio_row(company: &str, valuation: Option<f64>) -> Row {
        Row::new()
            .with("investor", json!("Tiger Global"))
            .with("name", json!(company))
            .with("currentValuation", json!(valuation))
            .with("sectors", json!(["Fintech"]))
            .with("locations", json!(["Bangalore"]))
    }

    fn assembler(max_facts: usize, max_context_tokens: usize) -> ContextAssembler {
        ContextAssembler::new(&EngineConfig {
            max_facts,
            max_context_tokens,
            ..Default::default()
        })
    }

    #[test]
    fn test_empty_rows_are_an_explicit_marker() {
        let template = bound(TemplateId::InvestorPortfolio, Intent::FilterByRelation, json!({}));
        let context = assembler(25, 1500).assemble(&[], &template);

        assert_eq!(
            context,
            AssembledContext::NoFacts {
                template: TemplateId::InvestorPortfolio
            }
        );
        assert!(context.facts().is_empty());
        assert_eq!(render(&context), "No facts found.");
    }

    #[test]
    fn test_one_fact_per_row_in_executor_order() {
        let template = bound(TemplateId::InvestorPortfolio, Intent::FilterByRelation, json!({}));
        let rows = vec![
            portfolio_row("Flipkart", Some(37.6)),
            portfolio_row("CRED", Some(6.4)),
            portfolio_row("Slice", None),
        ];
        let context = assembler(25, 1500).assemble(&rows, &template);
        let facts = context.facts();

        assert_eq!(facts.len(), 3);
        assert_eq!(
            facts[0].text,
            "Tiger Global invested in Flipkart (current valuation $37.6B; sector: Fintech; location: Bangalore)"
        );
        assert!(facts[2].text.contains("current valuation unknown"));
        assert_eq!(facts[1].provenance.row, 1);
        assert!(facts[1].provenance.fields.contains(&"currentValuation".to_string()));
        assert!(!facts[2].provenance.fields.contains(&"currentValuation".to_string()));
        assert!(context.truncation().is_none());
    }

    #[test]
    fn test_duplicate_subject_relation_is_dropped() {
        let template = bound(TemplateId::InvestorPortfolio, Intent::FilterByRelation, json!({}));
        let rows = vec![
            portfolio_row("Flipkart", Some(37.6)),
            portfolio_row("Flipkart", Some(37.6)),
        ];
        let context = assembler(25, 1500).assemble(&rows, &template);

        assert_eq!(context.facts().len(), 1);
        assert!(context.truncation().is_none());
    }

    #[test]
    fn test_budget_drops_lowest_ranked_facts() {
        let template = bound(TemplateId::InvestorPortfolio, Intent::FilterByRelation, json!({}));
        let rows: Vec<Row> = ["Flipkart", "Swiggy", "CRED", "Meesho"]
            .iter()
            .map(|name| portfolio_row(name, Some(1.0)))
            .collect();
        let context = assembler(2, 1500).assemble(&rows, &template);

        let subjects: Vec<&str> = context.facts().iter().map(|f| f.subject.as_str()).collect();
        assert_eq!(subjects, vec!["Flipkart", "Swiggy"]);
        assert_eq!(context.truncation(), Some(Truncation { kept: 2, dropped: 2 }));
        assert!(render(&context).ends_with("(2 more facts omitted)"));
    }

    #[test]
    fn test_top_fact_survives_tiny_token_budget() {
        let template = bound(TemplateId::InvestorPortfolio, Intent::FilterByRelation, json!({}));
        let rows = vec![portfolio_row("Flipkart", Some(37.6)), portfolio_row("CRED", Some(6.4))];
        let context = assembler(25, 1).assemble(&rows, &template);

        assert_eq!(context.facts().len(), 1);
        assert_eq!(context.truncation(), Some(Truncation { kept: 1, dropped: 1 }));
        assert!(render(&context).ends_with("(1 more fact omitted)"));
    }

    #[test]
    fn test_compare_facts_carry_sector_location_valuation() {
        let template = bound(TemplateId::CompareCompanies, Intent::CompareEntities, json!({}));
        let rows = vec![
            Row::new()
                .with("position", json!(0))
                .with("name", json!("CRED"))
                .with("currentValuation", json!(6.4))
                .with("sectors", json!(["Fintech"]))
                .with("locations", json!(["Bangalore"])),
            Row::new()
                .with("position", json!(1))
                .with("name", json!("PhonePe"))
                .with("currentValuation", json!(12.0))
                .with("sectors", json!(["Fintech"]))
                .with("locations", json!(["Bangalore"])),
        ];
        let context = assembler(25, 1500).assemble(&rows, &template);
        let facts = context.facts();

        assert_eq!(facts.len(), 2);
        assert!(facts[0].text.starts_with("CRED: sector Fintech, location Bangalore, current valuation $6.4B"));
        assert!(facts[1].text.starts_with("PhonePe: sector Fintech, location Bangalore, current valuation $12B"));
    }

    #[test]
    fn test_path_and_similarity_wording() {
        let path = bound(TemplateId::PathBetween, Intent::PathBetween, json!({}));
        let rows = vec![Row::new()
            .with("nodes", json!(["Tiger Global", "Flipkart", "Bangalore"]))
            .with("relationships", json!(["INVESTED_IN", "LOCATED_IN"]))
            .with("hops", json!(2))];
        let context = assembler(25, 1500).assemble(&rows, &path);
        assert_eq!(
            context.facts()[0].text,
            "Tiger Global -[INVESTED_IN]- Flipkart -[LOCATED_IN]- Bangalore (2 hops)"
        );

        let similar = bound(
            TemplateId::SimilarCompanies,
            Intent::Similarity,
            json!({"company": "Swiggy"}),
        );
        let rows = vec![Row::new()
            .with("name", json!("Zomato"))
            .with("score", json!(2))
            .with("sharedSectors", json!(["Consumer Internet"]))
            .with("sharedLocations", json!([]))
            .with("sharedInvestors", json!(["Tiger Global"]))
            .with("currentValuation", json!(5.4))];
        let context = assembler(25, 1500).assemble(&rows, &similar);
        assert_eq!(
            context.facts()[0].text,
            "Zomato is similar to Swiggy (score 2; shared sector: Consumer Internet; \
             shared investors: Tiger Global; current valuation $5.4B)"
        );
    }

    #[test]
    fn test_amount_trims_trailing_zeros() {
        assert_eq!(amount(37.6), "37.6");
        assert_eq!(amount(12.0), "12");
        assert_eq!(amount(0.85), "0.85");
    }
}
