//! Pattern resolver
//!
//! Maps an interpretation onto one traversal template and binds its typed
//! slots from the resolved mentions. Every entity bound here exists in the
//! catalog; a slot that cannot be filled unambiguously fails the question
//! instead of guessing.

use super::catalog::{Mention, Resolution};
use super::interpreter::{Intent, Interpretation, Subject};
use super::templates::{Metric, Ordering, SlotKind, TemplateId, TemplateSpec};
use crate::config::EngineConfig;
use crate::errors::{AppError, CandidateEntity, Result};
use crate::graph::{EntityKind, Params};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashSet;

/// One slot filled from one mention
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Binding {
    pub slot: &'static str,
    pub mention: String,
    pub entity: Resolution,
}

/// A template ready to execute
#[derive(Debug, Clone, Serialize)]
pub struct BoundTemplate {
    pub template: TemplateId,
    pub intent: Intent,
    pub params: Params,
    pub bindings: Vec<Binding>,
    pub metric: Option<Metric>,
    pub limit: usize,
}

impl BoundTemplate {
    pub fn spec(&self) -> &'static TemplateSpec {
        self.template.spec()
    }

    /// Names bound to a slot, in binding order
    pub fn bound(&self, slot: &str) -> Vec<&str> {
        self.bindings
            .iter()
            .filter(|b| b.slot == slot)
            .map(|b| b.entity.name.as_str())
            .collect()
    }
}

/// Kinds a comparison can be made between, in preference order
const COMPARABLE: [(EntityKind, TemplateId); 4] = [
    (EntityKind::Company, TemplateId::CompareCompanies),
    (EntityKind::Investor, TemplateId::CompareInvestors),
    (EntityKind::Sector, TemplateId::CompareSectors),
    (EntityKind::Location, TemplateId::CompareLocations),
];

pub struct PatternResolver {
    margin: f32,
    max_limit: usize,
    path_max_hops: usize,
}

impl PatternResolver {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            margin: config.ambiguity_margin,
            max_limit: config.max_limit,
            path_max_hops: config.path_max_hops,
        }
    }

    pub fn resolve(&self, interpretation: &Interpretation) -> Result<BoundTemplate> {
        let template = self.select_template(interpretation)?;
        let spec = template.spec();
        let mentions = &interpretation.mentions;

        let mut params = Params::new();
        let mut bindings = Vec::new();
        let mut used = vec![false; mentions.len()];

        for (slot, required) in spec.slots() {
            match slot.kind {
                SlotKind::Entity(kind) if slot.is_list() => {
                    let mut names: Vec<String> = Vec::new();
                    for (index, mention) in mentions.iter().enumerate() {
                        if names.len() == slot.max {
                            break;
                        }
                        if used[index] || !mention.is_kind(kind, self.margin) {
                            continue;
                        }
                        used[index] = true;
                        let entity = self.pick(mention, Some(kind))?;
                        if names.contains(&entity.name) {
                            continue;
                        }
                        names.push(entity.name.clone());
                        bindings.push(Binding { slot: slot.param, mention: mention.text.clone(), entity });
                    }
                    if names.len() < slot.min && required {
                        return Err(AppError::EntityNotFound { kind });
                    }
                    params.insert(slot.param.to_string(), json!(names));
                }
                SlotKind::Entity(kind) => {
                    let found = mentions
                        .iter()
                        .enumerate()
                        .find(|(index, mention)| !used[*index] && mention.is_kind(kind, self.margin));
                    match found {
                        Some((index, mention)) => {
                            used[index] = true;
                            let entity = self.pick(mention, Some(kind))?;
                            params.insert(slot.param.to_string(), json!(entity.name));
                            bindings.push(Binding { slot: slot.param, mention: mention.text.clone(), entity });
                        }
                        None if required => return Err(AppError::EntityNotFound { kind }),
                        None => {
                            params.insert(slot.param.to_string(), Value::Null);
                        }
                    }
                }
                SlotKind::AnyEntity => {
                    let found = mentions.iter().enumerate().find(|(index, _)| !used[*index]);
                    let Some((index, mention)) = found else {
                        return Err(AppError::UnresolvedQuery {
                            question: interpretation.question.clone(),
                        });
                    };
                    used[index] = true;
                    let entity = self.pick(mention, None)?;
                    params.insert(slot.param.to_string(), json!(entity.name));
                    params.insert(format!("{}Label", slot.param), json!(entity.kind.label()));
                    bindings.push(Binding { slot: slot.param, mention: mention.text.clone(), entity });
                }
            }
        }

        if template == TemplateId::PathBetween {
            if let [from, to] = bindings.as_slice() {
                if from.entity.name == to.entity.name && from.entity.kind == to.entity.kind {
                    return Err(AppError::Validation {
                        message: format!(
                            "A path needs two different entities, both mentions name {}",
                            from.entity.name
                        ),
                        field: Some("question".to_string()),
                    });
                }
            }
        }

        let metric = spec.effective_metric(interpretation.metric);
        let limit = match spec.ordering {
            Ordering::MentionOrder => bindings.len(),
            _ if spec.default_limit <= 1 => spec.default_limit,
            _ => interpretation
                .limit
                .unwrap_or(spec.default_limit)
                .min(self.max_limit),
        };

        params.insert("limit".to_string(), json!(limit));
        params.insert("metric".to_string(), json!(metric.map(|m| m.field())));
        if template == TemplateId::PathBetween {
            params.insert("maxHops".to_string(), json!(self.path_max_hops));
        }

        tracing::debug!(
            template = %template,
            bindings = bindings.len(),
            limit,
            "Bound traversal template"
        );

        Ok(BoundTemplate {
            template,
            intent: interpretation.intent,
            params,
            bindings,
            metric,
            limit,
        })
    }

    fn select_template(&self, interpretation: &Interpretation) -> Result<TemplateId> {
        let mentions = &interpretation.mentions;
        let has_kind = |kind: EntityKind| mentions.iter().any(|m| m.is_kind(kind, self.margin));

        let template = match interpretation.intent {
            Intent::LookupEntity => {
                let mention = interpretation.primary().ok_or_else(|| AppError::UnresolvedQuery {
                    question: interpretation.question.clone(),
                })?;
                TemplateId::profile_for(self.pick(mention, None)?.kind)
            }
            Intent::TopNByMetric => match interpretation.subject {
                Subject::Investors => TemplateId::TopInvestors,
                Subject::Companies => TemplateId::TopCompanies,
            },
            Intent::FilterByRelation => {
                if has_kind(EntityKind::Investor) {
                    TemplateId::InvestorPortfolio
                } else if has_kind(EntityKind::SubSector) {
                    TemplateId::SubSectorCompanies
                } else if has_kind(EntityKind::Sector) {
                    TemplateId::SectorCompanies
                } else if has_kind(EntityKind::Location) {
                    TemplateId::LocationCompanies
                } else {
                    return Err(AppError::UnresolvedQuery {
                        question: interpretation.question.clone(),
                    });
                }
            }
            Intent::AggregateByGroup => match interpretation.group_by {
                Some(EntityKind::Location) => TemplateId::LocationStatistics,
                _ => TemplateId::SectorStatistics,
            },
            Intent::CompareEntities => COMPARABLE
                .iter()
                .find(|(kind, _)| distinct_of_kind(mentions, *kind) >= 2)
                .map_or(TemplateId::CompareCompanies, |(_, template)| *template),
            Intent::CoInvestment => {
                if distinct_of_kind(mentions, EntityKind::Investor) >= 2 {
                    TemplateId::SharedPortfolio
                } else {
                    TemplateId::CoInvestors
                }
            }
            Intent::Similarity => TemplateId::SimilarCompanies,
            Intent::PathBetween => TemplateId::PathBetween,
        };
        Ok(template)
    }

    /// Best candidate of a mention, failing when another one scores within the margin
    fn pick(&self, mention: &Mention, kind: Option<EntityKind>) -> Result<Resolution> {
        let candidates: Vec<&Resolution> = match kind {
            Some(kind) => mention.candidates_of(kind).collect(),
            None => mention.candidates.iter().collect(),
        };
        let Some(top) = candidates.first().copied() else {
            return Err(match kind {
                Some(kind) => AppError::EntityNotFound { kind },
                None => AppError::MentionNotFound {
                    mention: mention.text.clone(),
                },
            });
        };

        let tied: Vec<&Resolution> = candidates
            .iter()
            .copied()
            .filter(|c| top.confidence - c.confidence < self.margin)
            .collect();
        if tied.len() > 1 {
            return Err(AppError::Ambiguous {
                mention: mention.text.clone(),
                candidates: tied
                    .into_iter()
                    .map(|c| CandidateEntity {
                        name: c.name.clone(),
                        kind: c.kind,
                        confidence: c.confidence,
                    })
                    .collect(),
            });
        }
        Ok(top.clone())
    }
}

fn distinct_of_kind(mentions: &[Mention], kind: EntityKind) -> usize {
    mentions
        .iter()
        .filter_map(Mention::best)
        .filter(|best| best.kind == kind)
        .map(|best| best.name.as_str())
        .collect::<HashSet<_>>()
        .len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::catalog::EntityCatalog;
    use crate::engine::interpreter::QueryInterpreter;
    use crate::graph::CatalogEntry;

    fn catalog() -> EntityCatalog {
        let entries = [
            ("CRED", EntityKind::Company),
            ("PhonePe", EntityKind::Company),
            ("Swiggy", EntityKind::Company),
            ("Zepto", EntityKind::Company),
            ("Zepto*", EntityKind::Company),
            ("Tiger Global", EntityKind::Investor),
            ("Accel", EntityKind::Investor),
            ("Sequoia Capital India", EntityKind::Investor),
            ("Sequoia Capital China", EntityKind::Investor),
            ("Fintech", EntityKind::Sector),
            ("Bangalore", EntityKind::Location),
        ]
        .into_iter()
        .map(|(name, kind)| CatalogEntry { name: name.to_string(), kind })
        .collect();
        EntityCatalog::new(entries, &EngineConfig::default())
    }

    fn bind(question: &str) -> Result<BoundTemplate> {
        let config = EngineConfig::default();
        let interpretation = QueryInterpreter::new(&config)?.interpret(question, &catalog())?;
        PatternResolver::new(&config).resolve(&interpretation)
    }

    #[test]
    fn test_portfolio_binds_investor_and_nulls_optional_slots() {
        let bound = bind("Which companies has Tiger Global invested in?").unwrap();
        assert_eq!(bound.template, TemplateId::InvestorPortfolio);
        assert_eq!(bound.params["investor"], "Tiger Global");
        assert_eq!(bound.params["sector"], Value::Null);
        assert_eq!(bound.params["company"], Value::Null);
        assert_eq!(bound.limit, 20);
    }

    #[test]
    fn test_compare_keeps_mention_order() {
        let bound = bind("Compare PhonePe and CRED").unwrap();
        assert_eq!(bound.template, TemplateId::CompareCompanies);
        assert_eq!(bound.params["companies"], json!(["PhonePe", "CRED"]));
        assert_eq!(bound.limit, 2);
    }

    #[test]
    fn test_unsupported_metric_falls_back() {
        let bound = bind("Top 5 investors by growth").unwrap();
        assert_eq!(bound.template, TemplateId::TopInvestors);
        assert_eq!(bound.metric, Some(Metric::InvestmentCount));
        assert_eq!(bound.params["metric"], "investments");
        assert_eq!(bound.params["limit"], 5);
    }

    #[test]
    fn test_filters_bind_alongside_ranking() {
        let bound = bind("Top 3 Fintech startups in Bangalore").unwrap();
        assert_eq!(bound.template, TemplateId::TopCompanies);
        assert_eq!(bound.bound("sector"), vec!["Fintech"]);
        assert_eq!(bound.bound("location"), vec!["Bangalore"]);
        assert_eq!(bound.params["investor"], Value::Null);
    }

    #[test]
    fn test_close_candidates_are_ambiguous() {
        let err = bind("Which companies has Sequoia invested in?").unwrap_err();
        match err {
            AppError::Ambiguous { mention, candidates } => {
                assert_eq!(mention, "Sequoia");
                assert_eq!(candidates.len(), 2);
            }
            other => panic!("expected ambiguity, got {:?}", other),
        }

        let err = bind("Tell me about Zeptoo").unwrap_err();
        assert!(matches!(err, AppError::Ambiguous { .. }));
    }

    #[test]
    fn test_exact_name_is_not_ambiguous() {
        let bound = bind("Tell me about Zepto").unwrap();
        assert_eq!(bound.template, TemplateId::CompanyProfile);
        assert_eq!(bound.bound("company"), vec!["Zepto"]);
    }

    #[test]
    fn test_path_binds_labels_and_hops() {
        let bound = bind("How is Accel connected to Bangalore?").unwrap();
        assert_eq!(bound.template, TemplateId::PathBetween);
        assert_eq!(bound.params["fromLabel"], "Investor");
        assert_eq!(bound.params["toLabel"], "Location");
        assert_eq!(bound.params["maxHops"], 4);
    }

    #[test]
    fn test_two_investors_share_a_portfolio() {
        let bound = bind("Which companies did Accel and Tiger Global invest in together?").unwrap();
        assert_eq!(bound.template, TemplateId::SharedPortfolio);
        assert_eq!(bound.params["investors"], json!(["Accel", "Tiger Global"]));
    }

    #[test]
    fn test_missing_required_entity() {
        let config = EngineConfig::default();
        let mut interpretation = QueryInterpreter::new(&config)
            .unwrap()
            .interpret("Tell me about CRED", &catalog())
            .unwrap();
        interpretation.intent = Intent::CompareEntities;

        let err = PatternResolver::new(&config).resolve(&interpretation).unwrap_err();
        assert!(matches!(err, AppError::EntityNotFound { kind: EntityKind::Company }));
    }

    #[test]
    fn test_any_entity_without_candidates_names_the_mention() {
        let config = EngineConfig::default();
        let mut interpretation = QueryInterpreter::new(&config)
            .unwrap()
            .interpret("Tell me about CRED", &catalog())
            .unwrap();
        interpretation.mentions[0].candidates.clear();

        let err = PatternResolver::new(&config).resolve(&interpretation).unwrap_err();
        match err {
            AppError::MentionNotFound { mention } => assert_eq!(mention, "CRED"),
            other => panic!("expected missing mention, got {:?}", other),
        }
    }

    #[test]
    fn test_path_to_the_same_entity_is_rejected() {
        let config = EngineConfig::default();
        let mut interpretation = QueryInterpreter::new(&config)
            .unwrap()
            .interpret("Tell me about Bangalore and Bengaluru", &catalog())
            .unwrap();
        assert_eq!(interpretation.mentions.len(), 2);
        interpretation.intent = Intent::PathBetween;

        let err = PatternResolver::new(&config).resolve(&interpretation).unwrap_err();
        match err {
            AppError::Validation { message, field } => {
                assert!(message.contains("Bangalore"));
                assert_eq!(field.as_deref(), Some("question"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }
}
