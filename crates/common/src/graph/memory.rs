//! In-memory graph store
//!
//! Loads a JSON snapshot of the knowledge graph and answers every traversal
//! template natively. Used for local runs without a database and as the
//! deterministic store behind the engine's tests.

use super::{CatalogEntry, EntityKind, GraphStore, Params, Row};
use crate::engine::{TemplateId, TemplateSpec};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// Serialized form of the whole graph
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphSnapshot {
    pub companies: Vec<CompanySnapshot>,
}

/// One company with its outgoing relationships
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanySnapshot {
    pub name: String,
    #[serde(default)]
    pub rank: Option<i64>,
    #[serde(default)]
    pub current_valuation: Option<f64>,
    #[serde(default)]
    pub entry_valuation: Option<f64>,
    #[serde(default)]
    pub entry_date: Option<String>,
    #[serde(default)]
    pub sector: Option<String>,
    #[serde(default)]
    pub subsector: Option<String>,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub investors: Vec<String>,
}

/// Node identity inside the in-memory graph
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct NodeKey {
    kind: EntityKind,
    name: String,
}

impl NodeKey {
    fn new(kind: EntityKind, name: &str) -> Self {
        Self { kind, name: name.to_string() }
    }
}

/// In-memory property graph built from a snapshot
#[derive(Debug, Default)]
pub struct InMemoryGraph {
    companies: BTreeMap<String, CompanySnapshot>,
    /// investor -> companies
    portfolios: BTreeMap<String, BTreeSet<String>>,
    /// sector -> subsectors
    subsectors: BTreeMap<String, BTreeSet<String>>,
    locations: BTreeSet<String>,
    /// Undirected adjacency with relationship types, for path search
    adjacency: HashMap<NodeKey, Vec<(NodeKey, &'static str)>>,
    relationships: usize,
}

impl InMemoryGraph {
    pub fn from_snapshot(snapshot: GraphSnapshot) -> Self {
        let mut graph = InMemoryGraph::default();
        for company in snapshot.companies {
            graph.add_company(company);
        }
        graph
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: GraphSnapshot = serde_json::from_str(json)?;
        Ok(Self::from_snapshot(snapshot))
    }

    fn add_company(&mut self, company: CompanySnapshot) {
        let node = NodeKey::new(EntityKind::Company, &company.name);
        self.adjacency.entry(node.clone()).or_default();

        if let Some(sector) = &company.sector {
            let known = self.subsectors.entry(sector.clone()).or_default();
            let new_subsector = match &company.subsector {
                Some(subsector) => known.insert(subsector.clone()),
                None => false,
            };
            self.link(node.clone(), NodeKey::new(EntityKind::Sector, sector), "OPERATES_IN");

            if let (true, Some(subsector)) = (new_subsector, &company.subsector) {
                self.link(
                    NodeKey::new(EntityKind::Sector, sector),
                    NodeKey::new(EntityKind::SubSector, subsector),
                    "HAS_SUBSECTOR",
                );
            }
        }
        if let Some(subsector) = &company.subsector {
            self.link(node.clone(), NodeKey::new(EntityKind::SubSector, subsector), "SPECIALIZES_IN");
        }
        for city in &company.locations {
            self.locations.insert(city.clone());
            self.link(node.clone(), NodeKey::new(EntityKind::Location, city), "LOCATED_IN");
        }
        for investor in &company.investors {
            self.portfolios
                .entry(investor.clone())
                .or_default()
                .insert(company.name.clone());
            self.link(NodeKey::new(EntityKind::Investor, investor), node.clone(), "INVESTED_IN");
        }

        self.companies.insert(company.name.clone(), company);
    }

    fn link(&mut self, from: NodeKey, to: NodeKey, relationship: &'static str) {
        self.adjacency
            .entry(from.clone())
            .or_default()
            .push((to.clone(), relationship));
        self.adjacency.entry(to).or_default().push((from, relationship));
        self.relationships += 1;
    }

    fn all_subsectors(&self) -> BTreeSet<&String> {
        self.subsectors.values().flatten().collect()
    }

    fn exists(&self, kind: EntityKind, name: &str) -> bool {
        self.adjacency.contains_key(&NodeKey::new(kind, name))
    }

    // ---------------------------------------------------------------------
    // Filters shared by several templates
    // ---------------------------------------------------------------------

    fn in_sector(company: &CompanySnapshot, sector: Option<&str>) -> bool {
        sector.map_or(true, |s| company.sector.as_deref() == Some(s))
    }

    fn in_subsector(company: &CompanySnapshot, subsector: Option<&str>) -> bool {
        subsector.map_or(true, |s| company.subsector.as_deref() == Some(s))
    }

    fn in_location(company: &CompanySnapshot, location: Option<&str>) -> bool {
        location.map_or(true, |l| company.locations.iter().any(|c| c == l))
    }

    fn backed_by(company: &CompanySnapshot, investor: Option<&str>) -> bool {
        investor.map_or(true, |i| company.investors.iter().any(|c| c == i))
    }

    fn company_rows(&self) -> impl Iterator<Item = &CompanySnapshot> {
        self.companies.values()
    }

    fn portfolio(&self, investor: &str) -> Vec<&CompanySnapshot> {
        self.portfolios
            .get(investor)
            .map(|names| names.iter().filter_map(|n| self.companies.get(n)).collect())
            .unwrap_or_default()
    }

    // ---------------------------------------------------------------------
    // Templates
    // ---------------------------------------------------------------------

    fn company_profile(&self, name: &str) -> Vec<Row> {
        self.companies
            .get(name)
            .map(|c| vec![company_detail_row(c)])
            .unwrap_or_default()
    }

    fn investor_profile(&self, name: &str) -> Vec<Row> {
        if !self.portfolios.contains_key(name) {
            return Vec::new();
        }
        vec![investor_row(name, &self.portfolio(name))]
    }

    fn sector_profile(&self, name: &str) -> Vec<Row> {
        let Some(subsectors) = self.subsectors.get(name) else {
            return Vec::new();
        };
        let companies: Vec<_> = self
            .company_rows()
            .filter(|c| c.sector.as_deref() == Some(name))
            .collect();

        vec![group_profile_row(name, &companies).with("subsectors", json!(subsectors))]
    }

    fn sub_sector_profile(&self, name: &str) -> Vec<Row> {
        if !self.exists(EntityKind::SubSector, name) {
            return Vec::new();
        }
        let sectors: Vec<&String> = self
            .subsectors
            .iter()
            .filter(|(_, subs)| subs.contains(name))
            .map(|(sector, _)| sector)
            .collect();
        let companies: Vec<_> = self
            .company_rows()
            .filter(|c| c.subsector.as_deref() == Some(name))
            .collect();

        vec![group_profile_row(name, &companies).with("sectors", json!(sectors))]
    }

    fn location_profile(&self, name: &str) -> Vec<Row> {
        if !self.locations.contains(name) {
            return Vec::new();
        }
        let companies: Vec<_> = self
            .company_rows()
            .filter(|c| Self::in_location(c, Some(name)))
            .collect();
        let sectors: BTreeSet<&str> = companies.iter().filter_map(|c| c.sector.as_deref()).collect();

        vec![group_profile_row(name, &companies).with("sectors", json!(sectors))]
    }

    fn top_companies(&self, params: &Params) -> Vec<Row> {
        let (sector, subsector) = (text(params, "sector"), text(params, "subsector"));
        let (location, investor) = (text(params, "location"), text(params, "investor"));

        self.company_rows()
            .filter(|c| {
                Self::in_sector(c, sector)
                    && Self::in_subsector(c, subsector)
                    && Self::in_location(c, location)
                    && Self::backed_by(c, investor)
            })
            .map(|c| {
                Row::new()
                    .with("name", json!(c.name))
                    .with("currentValuation", json!(c.current_valuation))
                    .with("entryValuation", json!(c.entry_valuation))
                    .with("growthPercent", json!(growth_percent(c)))
                    .with("sectors", json!(c.sector.iter().collect::<Vec<_>>()))
                    .with("locations", json!(c.locations))
            })
            .collect()
    }

    fn top_investors(&self, params: &Params) -> Vec<Row> {
        let (sector, location) = (text(params, "sector"), text(params, "location"));

        self.portfolios
            .keys()
            .filter_map(|investor| {
                let companies: Vec<_> = self
                    .portfolio(investor)
                    .into_iter()
                    .filter(|c| Self::in_sector(c, sector) && Self::in_location(c, location))
                    .collect();
                if companies.is_empty() {
                    return None;
                }
                let row = investor_row(investor, &companies);
                Some(row)
            })
            .collect()
    }

    fn investor_portfolio(&self, params: &Params) -> Vec<Row> {
        let Some(investor) = text(params, "investor") else {
            return Vec::new();
        };
        let company = text(params, "company");
        let (sector, location) = (text(params, "sector"), text(params, "location"));

        self.portfolio(investor)
            .into_iter()
            .filter(|c| company.map_or(true, |name| c.name == name))
            .filter(|c| Self::in_sector(c, sector) && Self::in_location(c, location))
            .map(|c| {
                Row::new()
                    .with("investor", json!(investor))
                    .with("name", json!(c.name))
                    .with("currentValuation", json!(c.current_valuation))
                    .with("sectors", json!(c.sector.iter().collect::<Vec<_>>()))
                    .with("locations", json!(c.locations))
            })
            .collect()
    }

    fn sector_companies(&self, params: &Params) -> Vec<Row> {
        let Some(sector) = text(params, "sector") else {
            return Vec::new();
        };
        let location = text(params, "location");

        self.company_rows()
            .filter(|c| c.sector.as_deref() == Some(sector) && Self::in_location(c, location))
            .map(|c| {
                Row::new()
                    .with("sector", json!(sector))
                    .with("name", json!(c.name))
                    .with("currentValuation", json!(c.current_valuation))
                    .with("subsectors", json!(c.subsector.iter().collect::<Vec<_>>()))
                    .with("locations", json!(c.locations))
            })
            .collect()
    }

    fn sub_sector_companies(&self, params: &Params) -> Vec<Row> {
        let Some(subsector) = text(params, "subsector") else {
            return Vec::new();
        };
        let location = text(params, "location");

        self.company_rows()
            .filter(|c| c.subsector.as_deref() == Some(subsector) && Self::in_location(c, location))
            .map(|c| {
                Row::new()
                    .with("subsector", json!(subsector))
                    .with("name", json!(c.name))
                    .with("currentValuation", json!(c.current_valuation))
                    .with("locations", json!(c.locations))
            })
            .collect()
    }

    fn location_companies(&self, params: &Params) -> Vec<Row> {
        let Some(location) = text(params, "location") else {
            return Vec::new();
        };
        let sector = text(params, "sector");

        self.company_rows()
            .filter(|c| Self::in_location(c, Some(location)) && Self::in_sector(c, sector))
            .map(|c| {
                Row::new()
                    .with("location", json!(location))
                    .with("name", json!(c.name))
                    .with("currentValuation", json!(c.current_valuation))
                    .with("sectors", json!(c.sector.iter().collect::<Vec<_>>()))
            })
            .collect()
    }

    fn group_statistics(&self, params: &Params, by: EntityKind) -> Vec<Row> {
        let investor = text(params, "investor");
        let sector = text(params, "sector");
        let location = text(params, "location");

        let mut groups: BTreeMap<&str, Vec<&CompanySnapshot>> = BTreeMap::new();
        for company in self.company_rows() {
            if !Self::backed_by(company, investor) {
                continue;
            }
            match by {
                EntityKind::Sector => {
                    if let Some(name) = company.sector.as_deref() {
                        if Self::in_location(company, location) {
                            groups.entry(name).or_default().push(company);
                        }
                    }
                }
                _ => {
                    if Self::in_sector(company, sector) {
                        for city in &company.locations {
                            groups.entry(city.as_str()).or_default().push(company);
                        }
                    }
                }
            }
        }

        groups
            .into_iter()
            .map(|(name, companies)| statistics_row(name, &companies))
            .collect()
    }

    fn compare(&self, params: &Params, kind: EntityKind) -> Vec<Row> {
        let param = match kind {
            EntityKind::Company => "companies",
            EntityKind::Investor => "investors",
            EntityKind::Sector => "sectors",
            _ => "locations",
        };

        texts(params, param)
            .into_iter()
            .enumerate()
            .filter_map(|(position, name)| {
                let row = match kind {
                    EntityKind::Company => company_detail_row(self.companies.get(name)?),
                    EntityKind::Investor => {
                        self.portfolios.get(name)?;
                        investor_row(name, &self.portfolio(name))
                    }
                    EntityKind::Sector => {
                        self.subsectors.get(name)?;
                        let companies: Vec<_> = self
                            .company_rows()
                            .filter(|c| c.sector.as_deref() == Some(name))
                            .collect();
                        statistics_row(name, &companies)
                    }
                    _ => {
                        if !self.locations.contains(name) {
                            return None;
                        }
                        let companies: Vec<_> = self
                            .company_rows()
                            .filter(|c| Self::in_location(c, Some(name)))
                            .collect();
                        statistics_row(name, &companies)
                    }
                };
                Some(row.with("position", json!(position)))
            })
            .collect()
    }

    fn co_investors(&self, params: &Params) -> Vec<Row> {
        let Some(investor) = text(params, "investor") else {
            return Vec::new();
        };
        let Some(own) = self.portfolios.get(investor) else {
            return Vec::new();
        };

        self.portfolios
            .iter()
            .filter(|(other, _)| other.as_str() != investor)
            .filter_map(|(other, companies)| {
                let shared: Vec<&String> = own.intersection(companies).collect();
                if shared.is_empty() {
                    return None;
                }
                Some(
                    Row::new()
                        .with("investor", json!(investor))
                        .with("name", json!(other))
                        .with("sharedInvestments", json!(shared.len()))
                        .with("sharedCompanies", json!(shared)),
                )
            })
            .collect()
    }

    fn shared_portfolio(&self, params: &Params) -> Vec<Row> {
        let investors = texts(params, "investors");
        let [first, second] = investors.as_slice() else {
            return Vec::new();
        };
        let (Some(a), Some(b)) = (self.portfolios.get(*first), self.portfolios.get(*second)) else {
            return Vec::new();
        };

        a.intersection(b)
            .filter_map(|name| self.companies.get(name))
            .map(|c| {
                Row::new()
                    .with("name", json!(c.name))
                    .with("currentValuation", json!(c.current_valuation))
                    .with("sectors", json!(c.sector.iter().collect::<Vec<_>>()))
                    .with("investors", json!([first, second]))
            })
            .collect()
    }

    fn similar_by(&self, params: &Params, id: TemplateId) -> Vec<Row> {
        let Some(target) = text(params, "company").and_then(|n| self.companies.get(n)) else {
            return Vec::new();
        };
        let own: BTreeSet<&String> = match id {
            TemplateId::SimilarBySector => target.sector.iter().collect(),
            TemplateId::SimilarByLocation => target.locations.iter().collect(),
            _ => target.investors.iter().collect(),
        };

        self.company_rows()
            .filter(|c| c.name != target.name)
            .filter_map(|c| {
                let theirs: BTreeSet<&String> = match id {
                    TemplateId::SimilarBySector => c.sector.iter().collect(),
                    TemplateId::SimilarByLocation => c.locations.iter().collect(),
                    _ => c.investors.iter().collect(),
                };
                let shared: Vec<&&String> = own.intersection(&theirs).collect();
                if shared.is_empty() {
                    return None;
                }
                Some(
                    Row::new()
                        .with("name", json!(c.name))
                        .with("currentValuation", json!(c.current_valuation))
                        .with("shared", json!(shared)),
                )
            })
            .collect()
    }

    /// Breadth-first shortest path over undirected relationships
    fn path_between(&self, params: &Params) -> Vec<Row> {
        let endpoint = |name: &str, label: &str| {
            let kind = EntityKind::from_label(text(params, label)?)?;
            let node = NodeKey::new(kind, text(params, name)?);
            self.adjacency.contains_key(&node).then_some(node)
        };
        let (Some(from), Some(to)) = (endpoint("from", "fromLabel"), endpoint("to", "toLabel")) else {
            return Vec::new();
        };
        let max_hops = params.get("maxHops").and_then(Value::as_u64).unwrap_or(4) as usize;

        let mut previous: HashMap<NodeKey, (NodeKey, &'static str)> = HashMap::new();
        let mut depth: HashMap<NodeKey, usize> = HashMap::from([(from.clone(), 0)]);
        let mut queue = VecDeque::from([from.clone()]);

        while let Some(node) = queue.pop_front() {
            if node == to {
                break;
            }
            let hops = depth[&node];
            if hops >= max_hops {
                continue;
            }
            let mut neighbours: Vec<&(NodeKey, &'static str)> =
                self.adjacency.get(&node).map(|n| n.iter().collect()).unwrap_or_default();
            neighbours.sort();
            for (next, relationship) in neighbours {
                if !depth.contains_key(next) {
                    depth.insert(next.clone(), hops + 1);
                    previous.insert(next.clone(), (node.clone(), *relationship));
                    queue.push_back(next.clone());
                }
            }
        }

        if !depth.contains_key(&to) {
            return Vec::new();
        }

        let mut nodes = vec![to.clone()];
        let mut relationships = Vec::new();
        let mut cursor = to;
        while let Some((prev, relationship)) = previous.get(&cursor) {
            relationships.push(*relationship);
            nodes.push(prev.clone());
            cursor = prev.clone();
        }
        nodes.reverse();
        relationships.reverse();

        vec![Row::new()
            .with("nodes", json!(nodes.iter().map(|n| &n.name).collect::<Vec<_>>()))
            .with("labels", json!(nodes.iter().map(|n| n.kind.label()).collect::<Vec<_>>()))
            .with("relationships", json!(relationships))
            .with("hops", json!(relationships.len()))]
    }

    fn graph_statistics(&self) -> Vec<Row> {
        vec![Row::new()
            .with("companies", json!(self.companies.len()))
            .with("investors", json!(self.portfolios.len()))
            .with("sectors", json!(self.subsectors.len()))
            .with("subsectors", json!(self.all_subsectors().len()))
            .with("locations", json!(self.locations.len()))
            .with("relationships", json!(self.relationships))]
    }
}

#[async_trait]
impl GraphStore for InMemoryGraph {
    async fn query(&self, template: &TemplateSpec, params: &Params) -> Result<Vec<Row>> {
        let rows = match template.id {
            TemplateId::CompanyProfile => self.company_profile(required(params, "company")?),
            TemplateId::InvestorProfile => self.investor_profile(required(params, "investor")?),
            TemplateId::SectorProfile => self.sector_profile(required(params, "sector")?),
            TemplateId::SubSectorProfile => self.sub_sector_profile(required(params, "subsector")?),
            TemplateId::LocationProfile => self.location_profile(required(params, "location")?),
            TemplateId::TopCompanies => self.top_companies(params),
            TemplateId::TopInvestors => self.top_investors(params),
            TemplateId::InvestorPortfolio => self.investor_portfolio(params),
            TemplateId::SectorCompanies => self.sector_companies(params),
            TemplateId::SubSectorCompanies => self.sub_sector_companies(params),
            TemplateId::LocationCompanies => self.location_companies(params),
            TemplateId::SectorStatistics => self.group_statistics(params, EntityKind::Sector),
            TemplateId::LocationStatistics => self.group_statistics(params, EntityKind::Location),
            TemplateId::CompareCompanies => self.compare(params, EntityKind::Company),
            TemplateId::CompareInvestors => self.compare(params, EntityKind::Investor),
            TemplateId::CompareSectors => self.compare(params, EntityKind::Sector),
            TemplateId::CompareLocations => self.compare(params, EntityKind::Location),
            TemplateId::CoInvestors => self.co_investors(params),
            TemplateId::SharedPortfolio => self.shared_portfolio(params),
            TemplateId::SimilarBySector
            | TemplateId::SimilarByLocation
            | TemplateId::SimilarByInvestors => self.similar_by(params, template.id),
            TemplateId::PathBetween => self.path_between(params),
            TemplateId::GraphStatistics => self.graph_statistics(),
            TemplateId::CatalogEntries => self
                .catalog_entries()
                .await?
                .into_iter()
                .map(|entry| {
                    Row::new()
                        .with("name", json!(entry.name))
                        .with("label", json!(entry.kind.label()))
                })
                .collect(),
            TemplateId::SimilarCompanies => {
                return Err(AppError::StoreQuery {
                    message: format!("{} is a composite template", template.id),
                })
            }
        };

        Ok(rows)
    }

    async fn catalog_entries(&self) -> Result<Vec<CatalogEntry>> {
        let mut entries: Vec<CatalogEntry> = self
            .adjacency
            .keys()
            .map(|node| CatalogEntry { name: node.name.clone(), kind: node.kind })
            .collect();
        entries.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.name.cmp(&b.name)));
        Ok(entries)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

fn text<'a>(params: &'a Params, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

fn texts<'a>(params: &'a Params, key: &str) -> Vec<&'a str> {
    match params.get(key) {
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

fn required<'a>(params: &'a Params, key: &str) -> Result<&'a str> {
    text(params, key).ok_or_else(|| AppError::StoreQuery {
        message: format!("missing parameter ${}", key),
    })
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

fn growth_percent(company: &CompanySnapshot) -> Option<f64> {
    match (company.current_valuation, company.entry_valuation) {
        (Some(current), Some(entry)) if entry > 0.0 => Some(round_to((current / entry - 1.0) * 100.0, 1)),
        _ => None,
    }
}

fn valuations<'a>(companies: &[&'a CompanySnapshot]) -> Vec<f64> {
    companies.iter().filter_map(|c| c.current_valuation).collect()
}

fn company_detail_row(company: &CompanySnapshot) -> Row {
    Row::new()
        .with("name", json!(company.name))
        .with("rank", json!(company.rank))
        .with("currentValuation", json!(company.current_valuation))
        .with("entryValuation", json!(company.entry_valuation))
        .with("entryDate", json!(company.entry_date))
        .with("sectors", json!(company.sector.iter().collect::<Vec<_>>()))
        .with("subsectors", json!(company.subsector.iter().collect::<Vec<_>>()))
        .with("locations", json!(company.locations))
        .with("investors", json!(company.investors))
}

fn investor_row(name: &str, companies: &[&CompanySnapshot]) -> Row {
    let values = valuations(companies);
    let portfolio_value = (!values.is_empty()).then(|| round_to(values.iter().sum(), 1));
    let sectors: BTreeSet<&str> = companies.iter().filter_map(|c| c.sector.as_deref()).collect();

    Row::new()
        .with("name", json!(name))
        .with("investments", json!(companies.len()))
        .with("portfolioValue", json!(portfolio_value))
        .with("companies", json!(companies.iter().map(|c| &c.name).collect::<Vec<_>>()))
        .with("sectors", json!(sectors))
}

fn group_profile_row(name: &str, companies: &[&CompanySnapshot]) -> Row {
    let values = valuations(companies);
    let total = (!values.is_empty()).then(|| round_to(values.iter().sum(), 1));

    Row::new()
        .with("name", json!(name))
        .with("companyCount", json!(companies.len()))
        .with("totalValuation", json!(total))
        .with("companies", json!(companies.iter().map(|c| &c.name).collect::<Vec<_>>()))
}

fn statistics_row(name: &str, companies: &[&CompanySnapshot]) -> Row {
    let values = valuations(companies);
    let sum: f64 = values.iter().sum();
    let (total, average) = if values.is_empty() {
        (None, None)
    } else {
        (Some(round_to(sum, 1)), Some(round_to(sum / values.len() as f64, 2)))
    };

    Row::new()
        .with("name", json!(name))
        .with("companyCount", json!(companies.len()))
        .with("valuedCount", json!(values.len()))
        .with("totalValuation", json!(total))
        .with("avgValuation", json!(average))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn company(name: &str, valuation: Option<f64>, sector: &str, city: &str, investors: &[&str]) -> CompanySnapshot {
        CompanySnapshot {
            name: name.to_string(),
            current_valuation: valuation,
            entry_valuation: valuation.map(|v| v / 2.0),
            sector: Some(sector.to_string()),
            locations: vec![city.to_string()],
            investors: investors.iter().map(|i| i.to_string()).collect(),
            ..Default::default()
        }
    }

    fn graph() -> InMemoryGraph {
        InMemoryGraph::from_snapshot(GraphSnapshot {
            companies: vec![
                company("CRED", Some(6.4), "Fintech", "Bangalore", &["Tiger Global", "Sequoia Capital India"]),
                company("PhonePe", Some(12.0), "Fintech", "Bangalore", &["Tiger Global"]),
                company("Nykaa", None, "E-Commerce", "Mumbai", &["Sequoia Capital India"]),
            ],
        })
    }

    fn params(pairs: &[(&str, Value)]) -> Params {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[tokio::test]
    async fn test_statistics_skip_missing_valuations() {
        let graph = graph();
        let rows = graph
            .query(TemplateId::SectorStatistics.spec(), &Params::new())
            .await
            .unwrap();

        let ecommerce = rows.iter().find(|r| r.text("name") == Some("E-Commerce")).unwrap();
        assert_eq!(ecommerce.integer("companyCount"), Some(1));
        assert_eq!(ecommerce.number("totalValuation"), None);

        let fintech = rows.iter().find(|r| r.text("name") == Some("Fintech")).unwrap();
        assert_eq!(fintech.number("totalValuation"), Some(18.4));
        assert_eq!(fintech.number("avgValuation"), Some(9.2));
    }

    #[tokio::test]
    async fn test_co_investors_count_shared_companies() {
        let graph = graph();
        let rows = graph
            .query(
                TemplateId::CoInvestors.spec(),
                &params(&[("investor", json!("Tiger Global"))]),
            )
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text("name"), Some("Sequoia Capital India"));
        assert_eq!(rows[0].integer("sharedInvestments"), Some(1));
    }

    #[tokio::test]
    async fn test_path_between_investor_and_city() {
        let graph = graph();
        let rows = graph
            .query(
                TemplateId::PathBetween.spec(),
                &params(&[
                    ("from", json!("Sequoia Capital India")),
                    ("fromLabel", json!("Investor")),
                    ("to", json!("Mumbai")),
                    ("toLabel", json!("Location")),
                    ("maxHops", json!(4)),
                ]),
            )
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].integer("hops"), Some(2));
        assert_eq!(rows[0].texts("nodes"), vec!["Sequoia Capital India", "Nykaa", "Mumbai"]);
    }

    #[tokio::test]
    async fn test_path_respects_hop_limit() {
        let graph = graph();
        let rows = graph
            .query(
                TemplateId::PathBetween.spec(),
                &params(&[
                    ("from", json!("Tiger Global")),
                    ("fromLabel", json!("Investor")),
                    ("to", json!("Mumbai")),
                    ("toLabel", json!("Location")),
                    ("maxHops", json!(1)),
                ]),
            )
            .await
            .unwrap();

        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_catalog_lists_every_node_once() {
        let graph = graph();
        let entries = graph.catalog_entries().await.unwrap();

        assert_eq!(entries.iter().filter(|e| e.kind == EntityKind::Company).count(), 3);
        assert_eq!(entries.iter().filter(|e| e.kind == EntityKind::Investor).count(), 2);
        assert!(entries.contains(&CatalogEntry { name: "Mumbai".into(), kind: EntityKind::Location }));
    }
}
