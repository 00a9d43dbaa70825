//! Configuration loading and management

use crate::core::field::FieldIo;
use crate::core::query::{DEFAULT_PER_PAGE, MAX_PER_PAGE, Query};
use crate::core::registry::FiltersExpression;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a relation attribute is stored by its backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelationConfig {
    /// Set of child ids kept on the parent item (in-memory backend)
    Collection { target: String },

    /// Child rows point at the parent through `column` (one-to-many)
    ForeignKey { target: String, column: String },

    /// Pairs of ids in a secondary table (many-to-many)
    Association {
        target: String,
        table: String,
        parent_column: String,
        child_column: String,
    },

    /// The parent row points at one target row through `column`; only used
    /// to sort across the relation
    ToOne { target: String, column: String },
}

impl RelationConfig {
    pub fn target(&self) -> &str {
        match self {
            RelationConfig::Collection { target }
            | RelationConfig::ForeignKey { target, .. }
            | RelationConfig::Association { target, .. }
            | RelationConfig::ToOne { target, .. } => target,
        }
    }
}

/// Per-resource manager configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceMeta {
    /// Resource name, used in errors and lifecycle events
    pub name: String,

    /// Backend table, defaults to the resource name
    #[serde(default)]
    pub table: Option<String>,

    /// Attribute holding the id, defaults to the primary key (or `id`)
    #[serde(default)]
    pub id_attribute: Option<String>,

    #[serde(default)]
    pub include_fields: Vec<String>,

    #[serde(default)]
    pub exclude_fields: Vec<String>,

    #[serde(default)]
    pub read_only_fields: Vec<String>,

    #[serde(default)]
    pub write_only_fields: Vec<String>,

    #[serde(default)]
    pub filters: FiltersExpression,

    #[serde(default)]
    pub relations: BTreeMap<String, RelationConfig>,

    /// Attach statement and parameters to backend conflicts
    #[serde(default)]
    pub debug: bool,
}

impl ResourceMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            id_attribute: None,
            include_fields: Vec::new(),
            exclude_fields: Vec::new(),
            read_only_fields: Vec::new(),
            write_only_fields: Vec::new(),
            filters: FiltersExpression::default(),
            relations: BTreeMap::new(),
            debug: false,
        }
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn id_attribute(mut self, id_attribute: impl Into<String>) -> Self {
        self.id_attribute = Some(id_attribute.into());
        self
    }

    pub fn filters(mut self, filters: FiltersExpression) -> Self {
        self.filters = filters;
        self
    }

    pub fn relation(mut self, attribute: impl Into<String>, relation: RelationConfig) -> Self {
        self.relations.insert(attribute.into(), relation);
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn table_name(&self) -> &str {
        self.table.as_deref().unwrap_or(&self.name)
    }

    /// Whether an introspected column becomes a resource field
    pub fn includes(&self, column: &str) -> bool {
        let listed = |list: &[String]| list.iter().any(|f| f == column);
        (self.include_fields.is_empty() || listed(&self.include_fields))
            && !listed(&self.exclude_fields)
    }

    pub fn field_io(&self, column: &str) -> FieldIo {
        FieldIo::from_lists(column, &self.read_only_fields, &self.write_only_fields)
    }
}

/// Complete configuration for a set of resources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PotionConfig {
    /// Debug mode, enables debug info on every resource
    #[serde(default)]
    pub debug: bool,

    #[serde(default = "default_per_page")]
    pub default_per_page: usize,

    #[serde(default = "max_per_page")]
    pub max_per_page: usize,

    #[serde(default)]
    pub resources: Vec<ResourceMeta>,
}

fn default_per_page() -> usize {
    DEFAULT_PER_PAGE
}

fn max_per_page() -> usize {
    MAX_PER_PAGE
}

impl Default for PotionConfig {
    fn default() -> Self {
        Self {
            debug: false,
            default_per_page: DEFAULT_PER_PAGE,
            max_per_page: MAX_PER_PAGE,
            resources: Vec::new(),
        }
    }
}

impl PotionConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Load configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        if config.default_per_page == 0 || config.default_per_page > config.max_per_page {
            anyhow::bail!(
                "default_per_page must be between 1 and max_per_page ({}), got {}",
                config.max_per_page,
                config.default_per_page
            );
        }
        Ok(config)
    }

    /// Empty query using the configured page sizes
    pub fn query(&self) -> Query {
        Query::new()
            .per_page(self.default_per_page)
            .max_per_page(self.max_per_page)
    }

    /// Find a resource by name, with the global debug flag applied
    pub fn find_resource(&self, name: &str) -> Option<ResourceMeta> {
        self.resources
            .iter()
            .find(|meta| meta.name == name)
            .map(|meta| {
                let mut meta = meta.clone();
                meta.debug |= self.debug;
                meta
            })
    }
}
