//! Goal taxonomy
//!
//! Loads and validates the fixed set of classification goals. Each entry
//! carries the lexical keywords and the long-form description used as the
//! semantic reference text. The taxonomy is immutable after loading and is
//! shared read-only (`Arc<Taxonomy>`) by both matchers.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::types::{GoalId, MatcherError};

/// Bundled UN SDG taxonomy
const SDG_TAXONOMY_YAML: &str = include_str!("../config/sdg_taxonomy.yaml");

/// One classification goal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxonomyEntry {
    pub id: GoalId,
    pub title: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub description: String,
}

#[derive(Debug, Deserialize)]
struct TaxonomyFile {
    #[serde(default)]
    version: Option<String>,
    goals: Vec<TaxonomyEntry>,
}

/// Validated, id-ordered set of goals
#[derive(Debug, Clone)]
pub struct Taxonomy {
    entries: Vec<TaxonomyEntry>,
    version: Option<String>,
}

impl Taxonomy {
    /// The 17 UN Sustainable Development Goals
    pub fn sdg() -> Result<Self, MatcherError> {
        Self::load_from_str(SDG_TAXONOMY_YAML)
    }

    /// Load from a YAML file
    pub fn load_from_file(path: &Path) -> Result<Self, MatcherError> {
        let content = std::fs::read_to_string(path).map_err(|e| MatcherError::Io {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::load_from_str(&content)
    }

    /// Load from a YAML string
    pub fn load_from_str(yaml: &str) -> Result<Self, MatcherError> {
        let file: TaxonomyFile =
            serde_yaml::from_str(yaml).map_err(|e| MatcherError::Taxonomy(e.to_string()))?;
        let mut taxonomy = Self::new(file.goals)?;
        taxonomy.version = file.version;
        Ok(taxonomy)
    }

    /// Build from entries, sorting by id
    ///
    /// Rejects an empty taxonomy, duplicate ids and blank descriptions.
    pub fn new(mut entries: Vec<TaxonomyEntry>) -> Result<Self, MatcherError> {
        if entries.is_empty() {
            return Err(MatcherError::Taxonomy("taxonomy has no goals".to_string()));
        }

        let mut seen = HashSet::new();
        for entry in &entries {
            if !seen.insert(entry.id) {
                return Err(MatcherError::Taxonomy(format!(
                    "duplicate goal identifier: {}",
                    entry.id
                )));
            }
            if entry.description.trim().is_empty() {
                return Err(MatcherError::Taxonomy(format!(
                    "{} has an empty description",
                    entry.id
                )));
            }
        }

        entries.sort_by_key(|e| e.id);
        Ok(Self {
            entries,
            version: None,
        })
    }

    /// Declared file version, reported in run metadata
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn entries(&self) -> &[TaxonomyEntry] {
        &self.entries
    }

    pub fn get(&self, id: GoalId) -> Option<&TaxonomyEntry> {
        self.entries
            .binary_search_by_key(&id, |e| e.id)
            .ok()
            .map(|idx| &self.entries[idx])
    }

    pub fn contains(&self, id: GoalId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = GoalId> + '_ {
        self.entries.iter().map(|e| e.id)
    }
}
