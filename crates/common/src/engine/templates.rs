//! Traversal template catalog
//!
//! Every statement sent to the graph store lives here. A template declares its
//! typed slots, the metrics it can rank by, its ordering policy and default
//! limit. Entity names and numbers are always bound as parameters.

use crate::graph::EntityKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a traversal template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateId {
    CompanyProfile,
    InvestorProfile,
    SectorProfile,
    SubSectorProfile,
    LocationProfile,
    TopCompanies,
    TopInvestors,
    InvestorPortfolio,
    SectorCompanies,
    SubSectorCompanies,
    LocationCompanies,
    SectorStatistics,
    LocationStatistics,
    CompareCompanies,
    CompareInvestors,
    CompareSectors,
    CompareLocations,
    CoInvestors,
    SharedPortfolio,
    SimilarCompanies,
    SimilarBySector,
    SimilarByLocation,
    SimilarByInvestors,
    PathBetween,
    GraphStatistics,
    CatalogEntries,
}

impl TemplateId {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateId::CompanyProfile => "company_profile",
            TemplateId::InvestorProfile => "investor_profile",
            TemplateId::SectorProfile => "sector_profile",
            TemplateId::SubSectorProfile => "sub_sector_profile",
            TemplateId::LocationProfile => "location_profile",
            TemplateId::TopCompanies => "top_companies",
            TemplateId::TopInvestors => "top_investors",
            TemplateId::InvestorPortfolio => "investor_portfolio",
            TemplateId::SectorCompanies => "sector_companies",
            TemplateId::SubSectorCompanies => "sub_sector_companies",
            TemplateId::LocationCompanies => "location_companies",
            TemplateId::SectorStatistics => "sector_statistics",
            TemplateId::LocationStatistics => "location_statistics",
            TemplateId::CompareCompanies => "compare_companies",
            TemplateId::CompareInvestors => "compare_investors",
            TemplateId::CompareSectors => "compare_sectors",
            TemplateId::CompareLocations => "compare_locations",
            TemplateId::CoInvestors => "co_investors",
            TemplateId::SharedPortfolio => "shared_portfolio",
            TemplateId::SimilarCompanies => "similar_companies",
            TemplateId::SimilarBySector => "similar_by_sector",
            TemplateId::SimilarByLocation => "similar_by_location",
            TemplateId::SimilarByInvestors => "similar_by_investors",
            TemplateId::PathBetween => "path_between",
            TemplateId::GraphStatistics => "graph_statistics",
            TemplateId::CatalogEntries => "catalog_entries",
        }
    }

    /// Profile template for a looked-up entity
    pub fn profile_for(kind: EntityKind) -> TemplateId {
        match kind {
            EntityKind::Company => TemplateId::CompanyProfile,
            EntityKind::Investor => TemplateId::InvestorProfile,
            EntityKind::Sector => TemplateId::SectorProfile,
            EntityKind::SubSector => TemplateId::SubSectorProfile,
            EntityKind::Location => TemplateId::LocationProfile,
        }
    }

    pub fn spec(self) -> &'static TemplateSpec {
        match self {
            TemplateId::CompanyProfile => &COMPANY_PROFILE,
            TemplateId::InvestorProfile => &INVESTOR_PROFILE,
            TemplateId::SectorProfile => &SECTOR_PROFILE,
            TemplateId::SubSectorProfile => &SUB_SECTOR_PROFILE,
            TemplateId::LocationProfile => &LOCATION_PROFILE,
            TemplateId::TopCompanies => &TOP_COMPANIES,
            TemplateId::TopInvestors => &TOP_INVESTORS,
            TemplateId::InvestorPortfolio => &INVESTOR_PORTFOLIO,
            TemplateId::SectorCompanies => &SECTOR_COMPANIES,
            TemplateId::SubSectorCompanies => &SUB_SECTOR_COMPANIES,
            TemplateId::LocationCompanies => &LOCATION_COMPANIES,
            TemplateId::SectorStatistics => &SECTOR_STATISTICS,
            TemplateId::LocationStatistics => &LOCATION_STATISTICS,
            TemplateId::CompareCompanies => &COMPARE_COMPANIES,
            TemplateId::CompareInvestors => &COMPARE_INVESTORS,
            TemplateId::CompareSectors => &COMPARE_SECTORS,
            TemplateId::CompareLocations => &COMPARE_LOCATIONS,
            TemplateId::CoInvestors => &CO_INVESTORS,
            TemplateId::SharedPortfolio => &SHARED_PORTFOLIO,
            TemplateId::SimilarCompanies => &SIMILAR_COMPANIES,
            TemplateId::SimilarBySector => &SIMILAR_BY_SECTOR,
            TemplateId::SimilarByLocation => &SIMILAR_BY_LOCATION,
            TemplateId::SimilarByInvestors => &SIMILAR_BY_INVESTORS,
            TemplateId::PathBetween => &PATH_BETWEEN,
            TemplateId::GraphStatistics => &GRAPH_STATISTICS,
            TemplateId::CatalogEntries => &CATALOG_ENTRIES,
        }
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Numeric attribute a question can rank or aggregate by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    CurrentValuation,
    EntryValuation,
    ValuationGrowth,
    InvestmentCount,
    PortfolioValue,
    CompanyCount,
    TotalValuation,
    AverageValuation,
    SharedInvestments,
    SimilarityScore,
}

impl Metric {
    /// Output field carrying this metric
    pub fn field(&self) -> &'static str {
        match self {
            Metric::CurrentValuation => "currentValuation",
            Metric::EntryValuation => "entryValuation",
            Metric::ValuationGrowth => "growthPercent",
            Metric::InvestmentCount => "investments",
            Metric::PortfolioValue => "portfolioValue",
            Metric::CompanyCount => "companyCount",
            Metric::TotalValuation => "totalValuation",
            Metric::AverageValuation => "avgValuation",
            Metric::SharedInvestments => "sharedInvestments",
            Metric::SimilarityScore => "score",
        }
    }

    /// Human label used in fact statements
    pub fn label(&self) -> &'static str {
        match self {
            Metric::CurrentValuation => "current valuation",
            Metric::EntryValuation => "entry valuation",
            Metric::ValuationGrowth => "valuation growth",
            Metric::InvestmentCount => "number of investments",
            Metric::PortfolioValue => "portfolio value",
            Metric::CompanyCount => "number of companies",
            Metric::TotalValuation => "total valuation",
            Metric::AverageValuation => "average valuation",
            Metric::SharedInvestments => "shared investments",
            Metric::SimilarityScore => "similarity score",
        }
    }
}

/// What a slot accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Entity(EntityKind),
    /// Any catalog entity; the bound kind's label is passed alongside
    AnyEntity,
}

/// A typed parameter of a template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub param: &'static str,
    pub kind: SlotKind,
    /// Minimum and maximum number of entities bound to this slot
    pub min: usize,
    pub max: usize,
}

impl Slot {
    const fn one(param: &'static str, kind: EntityKind) -> Self {
        Self { param, kind: SlotKind::Entity(kind), min: 1, max: 1 }
    }

    const fn any(param: &'static str) -> Self {
        Self { param, kind: SlotKind::AnyEntity, min: 1, max: 1 }
    }

    const fn many(param: &'static str, kind: EntityKind, min: usize, max: usize) -> Self {
        Self { param, kind: SlotKind::Entity(kind), min, max }
    }

    pub fn is_list(&self) -> bool {
        self.max > 1
    }
}

/// How the executor orders a template's rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ordering {
    /// Descending by the bound metric, rows lacking it are dropped
    Ranked,
    /// Descending by a fixed field; rows lacking it follow, by name
    ValuedFirst(&'static str),
    /// Same order as the entities bound to the list slot
    MentionOrder,
    /// Ascending by name
    ByName,
    /// Store order is kept
    AsReturned,
}

/// How a template is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Statement(&'static str),
    /// Independent sub-traversals merged by the executor
    Composite(&'static [TemplateId]),
}

/// Declaration of one traversal template
#[derive(Debug)]
pub struct TemplateSpec {
    pub id: TemplateId,
    pub required: &'static [Slot],
    pub optional: &'static [Slot],
    pub metrics: &'static [Metric],
    pub default_metric: Option<Metric>,
    pub ordering: Ordering,
    pub default_limit: usize,
    /// List fields whose element order is meaningful
    pub ordered_fields: &'static [&'static str],
    pub shape: Shape,
}

impl TemplateSpec {
    pub fn slots(&self) -> impl Iterator<Item = (&'static Slot, bool)> {
        self.required
            .iter()
            .map(|slot| (slot, true))
            .chain(self.optional.iter().map(|slot| (slot, false)))
    }

    pub fn statement(&self) -> Option<&'static str> {
        match self.shape {
            Shape::Statement(statement) => Some(statement),
            Shape::Composite(_) => None,
        }
    }

    /// Metric used for ranking: the requested one when this template supports it
    pub fn effective_metric(&self, requested: Option<Metric>) -> Option<Metric> {
        requested
            .filter(|metric| self.metrics.contains(metric))
            .or(self.default_metric)
    }
}

const COMPANY_FILTERS: &[Slot] = &[
    Slot::one("sector", EntityKind::Sector),
    Slot::one("subsector", EntityKind::SubSector),
    Slot::one("location", EntityKind::Location),
    Slot::one("investor", EntityKind::Investor),
];

const NO_SLOTS: &[Slot] = &[];
const NO_METRICS: &[Metric] = &[];
const NO_FIELDS: &[&str] = &[];

static COMPANY_PROFILE: TemplateSpec = TemplateSpec {
    id: TemplateId::CompanyProfile,
    required: &[Slot::one("company", EntityKind::Company)],
    optional: NO_SLOTS,
    metrics: NO_METRICS,
    default_metric: None,
    ordering: Ordering::AsReturned,
    default_limit: 1,
    ordered_fields: NO_FIELDS,
    shape: Shape::Statement(
        "MATCH (c:Company {name: $company})
         OPTIONAL MATCH (c)-[:OPERATES_IN]->(s:Sector)
         OPTIONAL MATCH (c)-[:SPECIALIZES_IN]->(ss:SubSector)
         OPTIONAL MATCH (c)-[:LOCATED_IN]->(l:Location)
         OPTIONAL MATCH (i:Investor)-[:INVESTED_IN]->(c)
         WITH c, collect(DISTINCT s.name) AS sectors, collect(DISTINCT ss.name) AS subsectors,
              collect(DISTINCT l.city) AS locations, collect(DISTINCT i.name) AS investors
         RETURN c.name AS name, c.rank AS rank, c.currentValuation AS currentValuation,
                c.entryValuation AS entryValuation, c.entryDate AS entryDate,
                sectors, subsectors, locations, investors",
    ),
};

static INVESTOR_PROFILE: TemplateSpec = TemplateSpec {
    id: TemplateId::InvestorProfile,
    required: &[Slot::one("investor", EntityKind::Investor)],
    optional: NO_SLOTS,
    metrics: NO_METRICS,
    default_metric: None,
    ordering: Ordering::AsReturned,
    default_limit: 1,
    ordered_fields: NO_FIELDS,
    shape: Shape::Statement(
        "MATCH (i:Investor {name: $investor})
         OPTIONAL MATCH (i)-[:INVESTED_IN]->(c:Company)
         OPTIONAL MATCH (c)-[:OPERATES_IN]->(s:Sector)
         WITH i, collect(DISTINCT c) AS companies, collect(DISTINCT s.name) AS sectors
         WITH i, companies, sectors,
              [x IN companies WHERE x.currentValuation IS NOT NULL | x.currentValuation] AS valuations
         RETURN i.name AS name, size(companies) AS investments,
                CASE WHEN size(valuations) = 0 THEN null
                     ELSE round(reduce(t = 0.0, v IN valuations | t + v) * 10) / 10 END AS portfolioValue,
                [x IN companies | x.name] AS companies, sectors",
    ),
};

static SECTOR_PROFILE: TemplateSpec = TemplateSpec {
    id: TemplateId::SectorProfile,
    required: &[Slot::one("sector", EntityKind::Sector)],
    optional: NO_SLOTS,
    metrics: NO_METRICS,
    default_metric: None,
    ordering: Ordering::AsReturned,
    default_limit: 1,
    ordered_fields: NO_FIELDS,
    shape: Shape::Statement(
        "MATCH (s:Sector {name: $sector})
         OPTIONAL MATCH (s)-[:HAS_SUBSECTOR]->(ss:SubSector)
         OPTIONAL MATCH (c:Company)-[:OPERATES_IN]->(s)
         WITH s, collect(DISTINCT ss.name) AS subsectors, collect(DISTINCT c) AS companies
         WITH s, subsectors, companies,
              [x IN companies WHERE x.currentValuation IS NOT NULL | x.currentValuation] AS valuations
         RETURN s.name AS name, subsectors, size(companies) AS companyCount,
                CASE WHEN size(valuations) = 0 THEN null
                     ELSE round(reduce(t = 0.0, v IN valuations | t + v) * 10) / 10 END AS totalValuation,
                [x IN companies | x.name] AS companies",
    ),
};

static SUB_SECTOR_PROFILE: TemplateSpec = TemplateSpec {
    id: TemplateId::SubSectorProfile,
    required: &[Slot::one("subsector", EntityKind::SubSector)],
    optional: NO_SLOTS,
    metrics: NO_METRICS,
    default_metric: None,
    ordering: Ordering::AsReturned,
    default_limit: 1,
    ordered_fields: NO_FIELDS,
    shape: Shape::Statement(
        "MATCH (ss:SubSector {name: $subsector})
         OPTIONAL MATCH (s:Sector)-[:HAS_SUBSECTOR]->(ss)
         OPTIONAL MATCH (c:Company)-[:SPECIALIZES_IN]->(ss)
         WITH ss, collect(DISTINCT s.name) AS sectors, collect(DISTINCT c) AS companies
         WITH ss, sectors, companies,
              [x IN companies WHERE x.currentValuation IS NOT NULL | x.currentValuation] AS valuations
         RETURN ss.name AS name, sectors, size(companies) AS companyCount,
                CASE WHEN size(valuations) = 0 THEN null
                     ELSE round(reduce(t = 0.0, v IN valuations | t + v) * 10) / 10 END AS totalValuation,
                [x IN companies | x.name] AS companies",
    ),
};

static LOCATION_PROFILE: TemplateSpec = TemplateSpec {
    id: TemplateId::LocationProfile,
    required: &[Slot::one("location", EntityKind::Location)],
    optional: NO_SLOTS,
    metrics: NO_METRICS,
    default_metric: None,
    ordering: Ordering::AsReturned,
    default_limit: 1,
    ordered_fields: NO_FIELDS,
    shape: Shape::Statement(
        "MATCH (l:Location {city: $location})
         OPTIONAL MATCH (c:Company)-[:LOCATED_IN]->(l)
         OPTIONAL MATCH (c)-[:OPERATES_IN]->(s:Sector)
         WITH l, collect(DISTINCT c) AS companies, collect(DISTINCT s.name) AS sectors
         WITH l, companies, sectors,
              [x IN companies WHERE x.currentValuation IS NOT NULL | x.currentValuation] AS valuations
         RETURN l.city AS name, sectors, size(companies) AS companyCount,
                CASE WHEN size(valuations) = 0 THEN null
                     ELSE round(reduce(t = 0.0, v IN valuations | t + v) * 10) / 10 END AS totalValuation,
                [x IN companies | x.name] AS companies",
    ),
};

static TOP_COMPANIES: TemplateSpec = TemplateSpec {
    id: TemplateId::TopCompanies,
    required: NO_SLOTS,
    optional: COMPANY_FILTERS,
    metrics: &[Metric::CurrentValuation, Metric::EntryValuation, Metric::ValuationGrowth],
    default_metric: Some(Metric::CurrentValuation),
    ordering: Ordering::Ranked,
    default_limit: 10,
    ordered_fields: NO_FIELDS,
    shape: Shape::Statement(
        "MATCH (c:Company)
         WHERE ($sector IS NULL OR EXISTS { MATCH (c)-[:OPERATES_IN]->(:Sector {name: $sector}) })
           AND ($subsector IS NULL OR EXISTS { MATCH (c)-[:SPECIALIZES_IN]->(:SubSector {name: $subsector}) })
           AND ($location IS NULL OR EXISTS { MATCH (c)-[:LOCATED_IN]->(:Location {city: $location}) })
           AND ($investor IS NULL OR EXISTS { MATCH (:Investor {name: $investor})-[:INVESTED_IN]->(c) })
         WITH c,
              CASE WHEN c.entryValuation > 0 AND c.currentValuation IS NOT NULL
                   THEN round((c.currentValuation / c.entryValuation - 1) * 1000) / 10
                   ELSE null END AS growthPercent
         WITH c, growthPercent,
              CASE $metric
                   WHEN 'entryValuation' THEN c.entryValuation
                   WHEN 'growthPercent' THEN growthPercent
                   ELSE c.currentValuation END AS rankValue
         WHERE rankValue IS NOT NULL
         OPTIONAL MATCH (c)-[:OPERATES_IN]->(s:Sector)
         OPTIONAL MATCH (c)-[:LOCATED_IN]->(l:Location)
         WITH c, growthPercent, rankValue, collect(DISTINCT s.name) AS sectors, collect(DISTINCT l.city) AS locations
         RETURN c.name AS name, c.currentValuation AS currentValuation, c.entryValuation AS entryValuation,
                growthPercent, sectors, locations
         ORDER BY rankValue DESC, name ASC
         LIMIT $limit",
    ),
};

static TOP_INVESTORS: TemplateSpec = TemplateSpec {
    id: TemplateId::TopInvestors,
    required: NO_SLOTS,
    optional: &[
        Slot::one("sector", EntityKind::Sector),
        Slot::one("location", EntityKind::Location),
    ],
    metrics: &[Metric::InvestmentCount, Metric::PortfolioValue],
    default_metric: Some(Metric::InvestmentCount),
    ordering: Ordering::Ranked,
    default_limit: 10,
    ordered_fields: NO_FIELDS,
    shape: Shape::Statement(
        "MATCH (i:Investor)-[:INVESTED_IN]->(c:Company)
         WHERE ($sector IS NULL OR EXISTS { MATCH (c)-[:OPERATES_IN]->(:Sector {name: $sector}) })
           AND ($location IS NULL OR EXISTS { MATCH (c)-[:LOCATED_IN]->(:Location {city: $location}) })
         WITH i, collect(DISTINCT c) AS companies
         WITH i, companies,
              [x IN companies WHERE x.currentValuation IS NOT NULL | x.currentValuation] AS valuations
         WITH i.name AS name, size(companies) AS investments,
              CASE WHEN size(valuations) = 0 THEN null
                   ELSE round(reduce(t = 0.0, v IN valuations | t + v) * 10) / 10 END AS portfolioValue,
              [x IN companies | x.name] AS companies
         WITH name, investments, portfolioValue, companies,
              CASE $metric WHEN 'portfolioValue' THEN portfolioValue ELSE investments END AS rankValue
         WHERE rankValue IS NOT NULL
         RETURN name, investments, portfolioValue, companies
         ORDER BY rankValue DESC, name ASC
         LIMIT $limit",
    ),
};

static INVESTOR_PORTFOLIO: TemplateSpec = TemplateSpec {
    id: TemplateId::InvestorPortfolio,
    required: &[Slot::one("investor", EntityKind::Investor)],
    optional: &[
        Slot::one("company", EntityKind::Company),
        Slot::one("sector", EntityKind::Sector),
        Slot::one("location", EntityKind::Location),
    ],
    metrics: NO_METRICS,
    default_metric: Some(Metric::CurrentValuation),
    ordering: Ordering::ValuedFirst("currentValuation"),
    default_limit: 20,
    ordered_fields: NO_FIELDS,
    shape: Shape::Statement(
        "MATCH (i:Investor {name: $investor})-[:INVESTED_IN]->(c:Company)
         WHERE ($company IS NULL OR c.name = $company)
           AND ($sector IS NULL OR EXISTS { MATCH (c)-[:OPERATES_IN]->(:Sector {name: $sector}) })
           AND ($location IS NULL OR EXISTS { MATCH (c)-[:LOCATED_IN]->(:Location {city: $location}) })
         OPTIONAL MATCH (c)-[:OPERATES_IN]->(s:Sector)
         OPTIONAL MATCH (c)-[:LOCATED_IN]->(l:Location)
         WITH i, c, collect(DISTINCT s.name) AS sectors, collect(DISTINCT l.city) AS locations
         RETURN i.name AS investor, c.name AS name, c.currentValuation AS currentValuation,
                sectors, locations
         ORDER BY c.currentValuation IS NULL, c.currentValuation DESC, name ASC
         LIMIT $limit",
    ),
};

static SECTOR_COMPANIES: TemplateSpec = TemplateSpec {
    id: TemplateId::SectorCompanies,
    required: &[Slot::one("sector", EntityKind::Sector)],
    optional: &[Slot::one("location", EntityKind::Location)],
    metrics: NO_METRICS,
    default_metric: Some(Metric::CurrentValuation),
    ordering: Ordering::ValuedFirst("currentValuation"),
    default_limit: 15,
    ordered_fields: NO_FIELDS,
    shape: Shape::Statement(
        "MATCH (c:Company)-[:OPERATES_IN]->(s:Sector {name: $sector})
         WHERE $location IS NULL OR EXISTS { MATCH (c)-[:LOCATED_IN]->(:Location {city: $location}) }
         OPTIONAL MATCH (c)-[:SPECIALIZES_IN]->(ss:SubSector)
         OPTIONAL MATCH (c)-[:LOCATED_IN]->(l:Location)
         WITH s, c, collect(DISTINCT ss.name) AS subsectors, collect(DISTINCT l.city) AS locations
         RETURN s.name AS sector, c.name AS name, c.currentValuation AS currentValuation,
                subsectors, locations
         ORDER BY c.currentValuation IS NULL, c.currentValuation DESC, name ASC
         LIMIT $limit",
    ),
};

static SUB_SECTOR_COMPANIES: TemplateSpec = TemplateSpec {
    id: TemplateId::SubSectorCompanies,
    required: &[Slot::one("subsector", EntityKind::SubSector)],
    optional: &[Slot::one("location", EntityKind::Location)],
    metrics: NO_METRICS,
    default_metric: Some(Metric::CurrentValuation),
    ordering: Ordering::ValuedFirst("currentValuation"),
    default_limit: 15,
    ordered_fields: NO_FIELDS,
    shape: Shape::Statement(
        "MATCH (c:Company)-[:SPECIALIZES_IN]->(ss:SubSector {name: $subsector})
         WHERE $location IS NULL OR EXISTS { MATCH (c)-[:LOCATED_IN]->(:Location {city: $location}) }
         OPTIONAL MATCH (c)-[:LOCATED_IN]->(l:Location)
         WITH ss, c, collect(DISTINCT l.city) AS locations
         RETURN ss.name AS subsector, c.name AS name, c.currentValuation AS currentValuation, locations
         ORDER BY c.currentValuation IS NULL, c.currentValuation DESC, name ASC
         LIMIT $limit",
    ),
};

static LOCATION_COMPANIES: TemplateSpec = TemplateSpec {
    id: TemplateId::LocationCompanies,
    required: &[Slot::one("location", EntityKind::Location)],
    optional: &[Slot::one("sector", EntityKind::Sector)],
    metrics: NO_METRICS,
    default_metric: Some(Metric::CurrentValuation),
    ordering: Ordering::ValuedFirst("currentValuation"),
    default_limit: 15,
    ordered_fields: NO_FIELDS,
    shape: Shape::Statement(
        "MATCH (c:Company)-[:LOCATED_IN]->(l:Location {city: $location})
         WHERE $sector IS NULL OR EXISTS { MATCH (c)-[:OPERATES_IN]->(:Sector {name: $sector}) }
         OPTIONAL MATCH (c)-[:OPERATES_IN]->(s:Sector)
         WITH l, c, collect(DISTINCT s.name) AS sectors
         RETURN l.city AS location, c.name AS name, c.currentValuation AS currentValuation, sectors
         ORDER BY c.currentValuation IS NULL, c.currentValuation DESC, name ASC
         LIMIT $limit",
    ),
};

const STATISTICS_METRICS: &[Metric] = &[
    Metric::CompanyCount,
    Metric::TotalValuation,
    Metric::AverageValuation,
];

static SECTOR_STATISTICS: TemplateSpec = TemplateSpec {
    id: TemplateId::SectorStatistics,
    required: NO_SLOTS,
    optional: &[
        Slot::one("investor", EntityKind::Investor),
        Slot::one("location", EntityKind::Location),
    ],
    metrics: STATISTICS_METRICS,
    default_metric: Some(Metric::CompanyCount),
    ordering: Ordering::Ranked,
    default_limit: 20,
    ordered_fields: NO_FIELDS,
    shape: Shape::Statement(
        "MATCH (c:Company)-[:OPERATES_IN]->(s:Sector)
         WHERE ($investor IS NULL OR EXISTS { MATCH (:Investor {name: $investor})-[:INVESTED_IN]->(c) })
           AND ($location IS NULL OR EXISTS { MATCH (c)-[:LOCATED_IN]->(:Location {city: $location}) })
         WITH s, collect(DISTINCT c) AS companies
         WITH s, companies,
              [x IN companies WHERE x.currentValuation IS NOT NULL | x.currentValuation] AS valuations
         WITH s.name AS name, size(companies) AS companyCount, size(valuations) AS valuedCount,
              CASE WHEN size(valuations) = 0 THEN null
                   ELSE round(reduce(t = 0.0, v IN valuations | t + v) * 10) / 10 END AS totalValuation,
              CASE WHEN size(valuations) = 0 THEN null
                   ELSE round(reduce(t = 0.0, v IN valuations | t + v) / size(valuations) * 100) / 100 END AS avgValuation
         WITH name, companyCount, valuedCount, totalValuation, avgValuation,
              CASE $metric
                   WHEN 'totalValuation' THEN totalValuation
                   WHEN 'avgValuation' THEN avgValuation
                   ELSE companyCount END AS rankValue
         WHERE rankValue IS NOT NULL
         RETURN name, companyCount, valuedCount, totalValuation, avgValuation
         ORDER BY rankValue DESC, name ASC
         LIMIT $limit",
    ),
};

static LOCATION_STATISTICS: TemplateSpec = TemplateSpec {
    id: TemplateId::LocationStatistics,
    required: NO_SLOTS,
    optional: &[
        Slot::one("investor", EntityKind::Investor),
        Slot::one("sector", EntityKind::Sector),
    ],
    metrics: STATISTICS_METRICS,
    default_metric: Some(Metric::CompanyCount),
    ordering: Ordering::Ranked,
    default_limit: 20,
    ordered_fields: NO_FIELDS,
    shape: Shape::Statement(
        "MATCH (c:Company)-[:LOCATED_IN]->(l:Location)
         WHERE ($investor IS NULL OR EXISTS { MATCH (:Investor {name: $investor})-[:INVESTED_IN]->(c) })
           AND ($sector IS NULL OR EXISTS { MATCH (c)-[:OPERATES_IN]->(:Sector {name: $sector}) })
         WITH l, collect(DISTINCT c) AS companies
         WITH l, companies,
              [x IN companies WHERE x.currentValuation IS NOT NULL | x.currentValuation] AS valuations
         WITH l.city AS name, size(companies) AS companyCount, size(valuations) AS valuedCount,
              CASE WHEN size(valuations) = 0 THEN null
                   ELSE round(reduce(t = 0.0, v IN valuations | t + v) * 10) / 10 END AS totalValuation,
              CASE WHEN size(valuations) = 0 THEN null
                   ELSE round(reduce(t = 0.0, v IN valuations | t + v) / size(valuations) * 100) / 100 END AS avgValuation
         WITH name, companyCount, valuedCount, totalValuation, avgValuation,
              CASE $metric
                   WHEN 'totalValuation' THEN totalValuation
                   WHEN 'avgValuation' THEN avgValuation
                   ELSE companyCount END AS rankValue
         WHERE rankValue IS NOT NULL
         RETURN name, companyCount, valuedCount, totalValuation, avgValuation
         ORDER BY rankValue DESC, name ASC
         LIMIT $limit",
    ),
};

static COMPARE_COMPANIES: TemplateSpec = TemplateSpec {
    id: TemplateId::CompareCompanies,
    required: &[Slot::many("companies", EntityKind::Company, 2, 4)],
    optional: NO_SLOTS,
    metrics: NO_METRICS,
    default_metric: None,
    ordering: Ordering::MentionOrder,
    default_limit: 4,
    ordered_fields: NO_FIELDS,
    shape: Shape::Statement(
        "UNWIND range(0, size($companies) - 1) AS position
         MATCH (c:Company) WHERE c.name = $companies[position]
         OPTIONAL MATCH (c)-[:OPERATES_IN]->(s:Sector)
         OPTIONAL MATCH (c)-[:LOCATED_IN]->(l:Location)
         OPTIONAL MATCH (i:Investor)-[:INVESTED_IN]->(c)
         WITH position, c, collect(DISTINCT s.name) AS sectors, collect(DISTINCT l.city) AS locations,
              collect(DISTINCT i.name) AS investors
         RETURN position, c.name AS name, c.rank AS rank, c.currentValuation AS currentValuation,
                c.entryValuation AS entryValuation, c.entryDate AS entryDate,
                sectors, locations, investors
         ORDER BY position",
    ),
};

static COMPARE_INVESTORS: TemplateSpec = TemplateSpec {
    id: TemplateId::CompareInvestors,
    required: &[Slot::many("investors", EntityKind::Investor, 2, 4)],
    optional: NO_SLOTS,
    metrics: NO_METRICS,
    default_metric: None,
    ordering: Ordering::MentionOrder,
    default_limit: 4,
    ordered_fields: NO_FIELDS,
    shape: Shape::Statement(
        "UNWIND range(0, size($investors) - 1) AS position
         MATCH (i:Investor) WHERE i.name = $investors[position]
         OPTIONAL MATCH (i)-[:INVESTED_IN]->(c:Company)
         OPTIONAL MATCH (c)-[:OPERATES_IN]->(s:Sector)
         WITH position, i, collect(DISTINCT c) AS companies, collect(DISTINCT s.name) AS sectors
         WITH position, i, companies, sectors,
              [x IN companies WHERE x.currentValuation IS NOT NULL | x.currentValuation] AS valuations
         RETURN position, i.name AS name, size(companies) AS investments,
                CASE WHEN size(valuations) = 0 THEN null
                     ELSE round(reduce(t = 0.0, v IN valuations | t + v) * 10) / 10 END AS portfolioValue,
                [x IN companies | x.name] AS companies, sectors
         ORDER BY position",
    ),
};

static COMPARE_SECTORS: TemplateSpec = TemplateSpec {
    id: TemplateId::CompareSectors,
    required: &[Slot::many("sectors", EntityKind::Sector, 2, 4)],
    optional: NO_SLOTS,
    metrics: NO_METRICS,
    default_metric: None,
    ordering: Ordering::MentionOrder,
    default_limit: 4,
    ordered_fields: NO_FIELDS,
    shape: Shape::Statement(
        "UNWIND range(0, size($sectors) - 1) AS position
         MATCH (s:Sector) WHERE s.name = $sectors[position]
         OPTIONAL MATCH (c:Company)-[:OPERATES_IN]->(s)
         WITH position, s, collect(DISTINCT c) AS companies
         WITH position, s, companies,
              [x IN companies WHERE x.currentValuation IS NOT NULL | x.currentValuation] AS valuations
         RETURN position, s.name AS name, size(companies) AS companyCount,
                CASE WHEN size(valuations) = 0 THEN null
                     ELSE round(reduce(t = 0.0, v IN valuations | t + v) * 10) / 10 END AS totalValuation,
                CASE WHEN size(valuations) = 0 THEN null
                     ELSE round(reduce(t = 0.0, v IN valuations | t + v) / size(valuations) * 100) / 100 END AS avgValuation
         ORDER BY position",
    ),
};

static COMPARE_LOCATIONS: TemplateSpec = TemplateSpec {
    id: TemplateId::CompareLocations,
    required: &[Slot::many("locations", EntityKind::Location, 2, 4)],
    optional: NO_SLOTS,
    metrics: NO_METRICS,
    default_metric: None,
    ordering: Ordering::MentionOrder,
    default_limit: 4,
    ordered_fields: NO_FIELDS,
    shape: Shape::Statement(
        "UNWIND range(0, size($locations) - 1) AS position
         MATCH (l:Location) WHERE l.city = $locations[position]
         OPTIONAL MATCH (c:Company)-[:LOCATED_IN]->(l)
         WITH position, l, collect(DISTINCT c) AS companies
         WITH position, l, companies,
              [x IN companies WHERE x.currentValuation IS NOT NULL | x.currentValuation] AS valuations
         RETURN position, l.city AS name, size(companies) AS companyCount,
                CASE WHEN size(valuations) = 0 THEN null
                     ELSE round(reduce(t = 0.0, v IN valuations | t + v) * 10) / 10 END AS totalValuation,
                CASE WHEN size(valuations) = 0 THEN null
                     ELSE round(reduce(t = 0.0, v IN valuations | t + v) / size(valuations) * 100) / 100 END AS avgValuation
         ORDER BY position",
    ),
};

static CO_INVESTORS: TemplateSpec = TemplateSpec {
    id: TemplateId::CoInvestors,
    required: &[Slot::one("investor", EntityKind::Investor)],
    optional: NO_SLOTS,
    metrics: NO_METRICS,
    default_metric: Some(Metric::SharedInvestments),
    ordering: Ordering::Ranked,
    default_limit: 10,
    ordered_fields: NO_FIELDS,
    shape: Shape::Statement(
        "MATCH (a:Investor {name: $investor})-[:INVESTED_IN]->(c:Company)<-[:INVESTED_IN]-(b:Investor)
         WHERE a <> b
         WITH a, b, collect(DISTINCT c.name) AS sharedCompanies
         RETURN a.name AS investor, b.name AS name, size(sharedCompanies) AS sharedInvestments,
                sharedCompanies
         ORDER BY sharedInvestments DESC, name ASC
         LIMIT $limit",
    ),
};

static SHARED_PORTFOLIO: TemplateSpec = TemplateSpec {
    id: TemplateId::SharedPortfolio,
    required: &[Slot::many("investors", EntityKind::Investor, 2, 2)],
    optional: NO_SLOTS,
    metrics: NO_METRICS,
    default_metric: Some(Metric::CurrentValuation),
    ordering: Ordering::ValuedFirst("currentValuation"),
    default_limit: 20,
    ordered_fields: NO_FIELDS,
    shape: Shape::Statement(
        "MATCH (a:Investor)-[:INVESTED_IN]->(c:Company)<-[:INVESTED_IN]-(b:Investor)
         WHERE a.name = $investors[0] AND b.name = $investors[1]
         OPTIONAL MATCH (c)-[:OPERATES_IN]->(s:Sector)
         WITH c, collect(DISTINCT s.name) AS sectors
         RETURN c.name AS name, c.currentValuation AS currentValuation, sectors, $investors AS investors
         ORDER BY c.currentValuation IS NULL, c.currentValuation DESC, name ASC
         LIMIT $limit",
    ),
};

static SIMILAR_COMPANIES: TemplateSpec = TemplateSpec {
    id: TemplateId::SimilarCompanies,
    required: &[Slot::one("company", EntityKind::Company)],
    optional: NO_SLOTS,
    metrics: NO_METRICS,
    default_metric: Some(Metric::SimilarityScore),
    ordering: Ordering::Ranked,
    default_limit: 5,
    ordered_fields: NO_FIELDS,
    shape: Shape::Composite(&[
        TemplateId::SimilarBySector,
        TemplateId::SimilarByLocation,
        TemplateId::SimilarByInvestors,
    ]),
};

static SIMILAR_BY_SECTOR: TemplateSpec = TemplateSpec {
    id: TemplateId::SimilarBySector,
    required: &[Slot::one("company", EntityKind::Company)],
    optional: NO_SLOTS,
    metrics: NO_METRICS,
    default_metric: None,
    ordering: Ordering::ByName,
    default_limit: 100,
    ordered_fields: NO_FIELDS,
    shape: Shape::Statement(
        "MATCH (target:Company {name: $company})-[:OPERATES_IN]->(s:Sector)<-[:OPERATES_IN]-(other:Company)
         WHERE other <> target
         RETURN other.name AS name, other.currentValuation AS currentValuation,
                collect(DISTINCT s.name) AS shared",
    ),
};

static SIMILAR_BY_LOCATION: TemplateSpec = TemplateSpec {
    id: TemplateId::SimilarByLocation,
    required: &[Slot::one("company", EntityKind::Company)],
    optional: NO_SLOTS,
    metrics: NO_METRICS,
    default_metric: None,
    ordering: Ordering::ByName,
    default_limit: 100,
    ordered_fields: NO_FIELDS,
    shape: Shape::Statement(
        "MATCH (target:Company {name: $company})-[:LOCATED_IN]->(l:Location)<-[:LOCATED_IN]-(other:Company)
         WHERE other <> target
         RETURN other.name AS name, other.currentValuation AS currentValuation,
                collect(DISTINCT l.city) AS shared",
    ),
};

static SIMILAR_BY_INVESTORS: TemplateSpec = TemplateSpec {
    id: TemplateId::SimilarByInvestors,
    required: &[Slot::one("company", EntityKind::Company)],
    optional: NO_SLOTS,
    metrics: NO_METRICS,
    default_metric: None,
    ordering: Ordering::ByName,
    default_limit: 100,
    ordered_fields: NO_FIELDS,
    shape: Shape::Statement(
        "MATCH (target:Company {name: $company})<-[:INVESTED_IN]-(i:Investor)-[:INVESTED_IN]->(other:Company)
         WHERE other <> target
         RETURN other.name AS name, other.currentValuation AS currentValuation,
                collect(DISTINCT i.name) AS shared",
    ),
};

// Variable-length bounds cannot be parameters, so the statement searches up to
// six hops and filters by $maxHops.
static PATH_BETWEEN: TemplateSpec = TemplateSpec {
    id: TemplateId::PathBetween,
    required: &[Slot::any("from"), Slot::any("to")],
    optional: NO_SLOTS,
    metrics: NO_METRICS,
    default_metric: None,
    ordering: Ordering::AsReturned,
    default_limit: 1,
    ordered_fields: &["nodes", "labels", "relationships"],
    shape: Shape::Statement(
        "MATCH (a) WHERE $fromLabel IN labels(a) AND coalesce(a.name, a.city) = $from
         MATCH (b) WHERE $toLabel IN labels(b) AND coalesce(b.name, b.city) = $to
         MATCH p = shortestPath((a)-[*..6]-(b))
         WITH p WHERE length(p) <= $maxHops
         RETURN [n IN nodes(p) | coalesce(n.name, n.city)] AS nodes,
                [n IN nodes(p) | head([x IN labels(n) WHERE x IN ['Company', 'Investor', 'Sector', 'SubSector', 'Location']])] AS labels,
                [r IN relationships(p) | type(r)] AS relationships,
                length(p) AS hops",
    ),
};

static GRAPH_STATISTICS: TemplateSpec = TemplateSpec {
    id: TemplateId::GraphStatistics,
    required: NO_SLOTS,
    optional: NO_SLOTS,
    metrics: NO_METRICS,
    default_metric: None,
    ordering: Ordering::AsReturned,
    default_limit: 1,
    ordered_fields: NO_FIELDS,
    shape: Shape::Statement(
        "CALL { MATCH (c:Company) RETURN count(c) AS companies }
         CALL { MATCH (i:Investor) RETURN count(i) AS investors }
         CALL { MATCH (s:Sector) RETURN count(s) AS sectors }
         CALL { MATCH (ss:SubSector) RETURN count(ss) AS subsectors }
         CALL { MATCH (l:Location) RETURN count(l) AS locations }
         CALL { MATCH ()-[r]->() RETURN count(r) AS relationships }
         RETURN companies, investors, sectors, subsectors, locations, relationships",
    ),
};

static CATALOG_ENTRIES: TemplateSpec = TemplateSpec {
    id: TemplateId::CatalogEntries,
    required: NO_SLOTS,
    optional: NO_SLOTS,
    metrics: NO_METRICS,
    default_metric: None,
    ordering: Ordering::AsReturned,
    default_limit: usize::MAX,
    ordered_fields: NO_FIELDS,
    shape: Shape::Statement(
        "MATCH (n)
         WHERE n:Company OR n:Investor OR n:Sector OR n:SubSector OR n:Location
         WITH n, head([x IN labels(n) WHERE x IN ['Company', 'Investor', 'Sector', 'SubSector', 'Location']]) AS label
         RETURN coalesce(n.name, n.city) AS name, label
         ORDER BY label, name",
    ),
};

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [TemplateId; 26] = [
        TemplateId::CompanyProfile,
        TemplateId::InvestorProfile,
        TemplateId::SectorProfile,
        TemplateId::SubSectorProfile,
        TemplateId::LocationProfile,
        TemplateId::TopCompanies,
        TemplateId::TopInvestors,
        TemplateId::InvestorPortfolio,
        TemplateId::SectorCompanies,
        TemplateId::SubSectorCompanies,
        TemplateId::LocationCompanies,
        TemplateId::SectorStatistics,
        TemplateId::LocationStatistics,
        TemplateId::CompareCompanies,
        TemplateId::CompareInvestors,
        TemplateId::CompareSectors,
        TemplateId::CompareLocations,
        TemplateId::CoInvestors,
        TemplateId::SharedPortfolio,
        TemplateId::SimilarCompanies,
        TemplateId::SimilarBySector,
        TemplateId::SimilarByLocation,
        TemplateId::SimilarByInvestors,
        TemplateId::PathBetween,
        TemplateId::GraphStatistics,
        TemplateId::CatalogEntries,
    ];

    #[test]
    fn test_spec_ids_match() {
        for id in ALL {
            assert_eq!(id.spec().id, id, "{} points at the wrong declaration", id);
        }
    }

    #[test]
    fn test_every_slot_is_a_statement_parameter() {
        for id in ALL {
            let spec = id.spec();
            if let Some(statement) = spec.statement() {
                for (slot, _) in spec.slots() {
                    let placeholder = format!("${}", slot.param);
                    assert!(
                        statement.contains(&placeholder),
                        "{} does not use {}",
                        id,
                        placeholder
                    );
                }
            }
        }
    }

    #[test]
    fn test_ranked_templates_declare_a_metric() {
        for id in ALL {
            let spec = id.spec();
            if spec.ordering == Ordering::Ranked {
                assert!(spec.default_metric.is_some(), "{} has no default metric", id);
            }
        }
    }

    #[test]
    fn test_effective_metric_falls_back_to_default() {
        let spec = TemplateId::TopInvestors.spec();
        assert_eq!(spec.effective_metric(Some(Metric::PortfolioValue)), Some(Metric::PortfolioValue));
        assert_eq!(
            spec.effective_metric(Some(Metric::EntryValuation)),
            Some(Metric::InvestmentCount)
        );
    }
}
