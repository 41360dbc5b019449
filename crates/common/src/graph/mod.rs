//! Graph store abstraction
//!
//! Provides:
//! - The entity kinds of the startup knowledge graph
//! - Typed result rows returned by traversal templates
//! - The `GraphStore` trait implemented by the Neo4j HTTP client and the
//!   in-memory snapshot store

mod memory;
mod neo4j;

pub use memory::{CompanySnapshot, GraphSnapshot, InMemoryGraph};
pub use neo4j::Neo4jStore;

use crate::config::GraphStoreConfig;
use crate::engine::{TemplateId, TemplateSpec};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Bound template parameters, passed to the store separately from the statement
pub type Params = serde_json::Map<String, Value>;

/// Kinds of entities held in the knowledge graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Company,
    Investor,
    Sector,
    SubSector,
    Location,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Company,
        EntityKind::Investor,
        EntityKind::Sector,
        EntityKind::SubSector,
        EntityKind::Location,
    ];

    /// Node label in the graph
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Company => "Company",
            EntityKind::Investor => "Investor",
            EntityKind::Sector => "Sector",
            EntityKind::SubSector => "SubSector",
            EntityKind::Location => "Location",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.label() == label)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Company => "company",
            EntityKind::Investor => "investor",
            EntityKind::Sector => "sector",
            EntityKind::SubSector => "sub-sector",
            EntityKind::Location => "location",
        };
        f.write_str(name)
    }
}

impl FromStr for EntityKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "company" | "companies" => Ok(EntityKind::Company),
            "investor" | "investors" => Ok(EntityKind::Investor),
            "sector" | "sectors" => Ok(EntityKind::Sector),
            "subsector" | "sub_sector" | "sub-sector" => Ok(EntityKind::SubSector),
            "location" | "locations" | "city" => Ok(EntityKind::Location),
            other => Err(AppError::InvalidFormat {
                message: format!("unknown entity kind '{}'", other),
            }),
        }
    }
}

/// One entry of the bulk catalog read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub kind: EntityKind,
}

/// A result row: declared output field name -> scalar or nested collection
///
/// Fields are kept in a sorted map so a row always serializes the same way.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(BTreeMap<String, Value>);

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, field: &str, value: Value) -> Self {
        self.0.insert(field.to_string(), value);
        self
    }

    pub fn insert(&mut self, field: &str, value: Value) {
        self.0.insert(field.to_string(), value);
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// String field, `None` when absent or null
    pub fn text(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    /// Numeric field, `None` when absent or null (never zero)
    pub fn number(&self, field: &str) -> Option<f64> {
        self.0.get(field).and_then(Value::as_f64)
    }

    pub fn integer(&self, field: &str) -> Option<i64> {
        self.0.get(field).and_then(Value::as_i64)
    }

    /// String list field; missing or null reads as empty
    pub fn texts(&self, field: &str) -> Vec<&str> {
        match self.0.get(field) {
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub(crate) fn values_mut(&mut self) -> impl Iterator<Item = (&String, &mut Value)> {
        self.0.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Row(iter.into_iter().collect())
    }
}

/// Overall graph counts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub companies: i64,
    pub investors: i64,
    pub sectors: i64,
    pub subsectors: i64,
    pub locations: i64,
    pub relationships: i64,
}

impl GraphStats {
    pub fn from_row(row: &Row) -> Self {
        Self {
            companies: row.integer("companies").unwrap_or(0),
            investors: row.integer("investors").unwrap_or(0),
            sectors: row.integer("sectors").unwrap_or(0),
            subsectors: row.integer("subsectors").unwrap_or(0),
            locations: row.integer("locations").unwrap_or(0),
            relationships: row.integer("relationships").unwrap_or(0),
        }
    }
}

/// Read-only access to the property graph
///
/// The engine owns every statement; a store only executes a template with its
/// bound parameters.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Execute one traversal template
    async fn query(&self, template: &TemplateSpec, params: &Params) -> Result<Vec<Row>>;

    /// Bulk read of every entity name and kind
    async fn catalog_entries(&self) -> Result<Vec<CatalogEntry>> {
        let rows = self
            .query(TemplateId::CatalogEntries.spec(), &Params::new())
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let kind = EntityKind::from_label(row.text("label")?)?;
                let name = row.text("name")?.to_string();
                Some(CatalogEntry { name, kind })
            })
            .collect())
    }

    /// Connectivity check
    async fn ping(&self) -> Result<()>;

    /// Store name for logs and metrics
    fn name(&self) -> &str;
}

/// Create a graph store based on configuration
pub fn create_store(config: &GraphStoreConfig) -> Result<Arc<dyn GraphStore>> {
    match config.provider.as_str() {
        "neo4j" => Ok(Arc::new(Neo4jStore::new(config)?)),
        "memory" => {
            let path = config.snapshot_path.as_deref().ok_or_else(|| AppError::Configuration {
                message: "graph.snapshot_path is required for the memory provider".to_string(),
            })?;
            let json = std::fs::read_to_string(path)?;
            Ok(Arc::new(InMemoryGraph::from_json(&json)?))
        }
        other => Err(AppError::Configuration {
            message: format!("unknown graph provider '{}'", other),
        }),
    }
}
