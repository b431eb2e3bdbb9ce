//! Index naming: which suffix a namespace belongs in, and which suffix a
//! concrete index name carries.
//!
//! Concrete index names look like `<base>_<suffix>_<generation>`, e.g.
//! `enwiki_content_1700000000`. The suffix partitions documents by namespace
//! (`content` for content namespaces, `general` for everything else, plus any
//! custom suffixes introduced by namespace mappings).

use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{CheckerError, ConfigError};
use crate::model::PageId;

pub const CONTENT_INDEX_SUFFIX: &str = "content";
pub const GENERAL_INDEX_SUFFIX: &str = "general";
/// Wiki id used when the config names none.
pub const DEFAULT_WIKI_ID: &str = "wiki";

/// Index layout configuration (`[index]` section).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexLayoutConfig {
    /// Wiki identifier, used as doc id prefix when `prefix_ids` is set.
    pub wiki_id: String,
    /// Namespaces whose pages go to the content index.
    pub content_namespaces: BTreeSet<i64>,
    /// Explicit namespace to suffix overrides, keyed by namespace number.
    /// Keys are strings because TOML table keys always are.
    pub namespace_mappings: BTreeMap<String, String>,
    /// Prefix document ids with `<wiki_id>|`.
    pub prefix_ids: bool,
}

impl Default for IndexLayoutConfig {
    fn default() -> Self {
        Self {
            wiki_id: DEFAULT_WIKI_ID.to_string(),
            content_namespaces: BTreeSet::from([0]),
            namespace_mappings: BTreeMap::new(),
            prefix_ids: false,
        }
    }
}

/// Resolved index layout with a compiled suffix matcher.
#[derive(Debug, Clone)]
pub struct IndexLayout {
    config: IndexLayoutConfig,
    mappings: BTreeMap<i64, String>,
    suffix_pattern: Regex,
}

impl IndexLayout {
    pub fn new(config: IndexLayoutConfig) -> Result<Self, ConfigError> {
        let mut suffixes: BTreeSet<&str> =
            BTreeSet::from([CONTENT_INDEX_SUFFIX, GENERAL_INDEX_SUFFIX]);
        let mut mappings = BTreeMap::new();
        for (namespace, suffix) in &config.namespace_mappings {
            let namespace: i64 = namespace.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("namespace mapping key {namespace:?} is not a number"))
            })?;
            if suffix.is_empty() || suffix.contains('_') {
                return Err(ConfigError::Invalid(format!(
                    "namespace mapping suffix {suffix:?} must be non-empty and free of '_'"
                )));
            }
            suffixes.insert(suffix);
            mappings.insert(namespace, suffix.clone());
        }
        let alternatives = suffixes
            .iter()
            .map(|s| regex::escape(s))
            .collect::<Vec<_>>()
            .join("|");
        let suffix_pattern = Regex::new(&format!("_({alternatives})_[^_]+$"))
            .map_err(|e| ConfigError::Invalid(format!("index suffix pattern: {e}")))?;
        Ok(Self {
            config,
            mappings,
            suffix_pattern,
        })
    }

    pub fn config(&self) -> &IndexLayoutConfig {
        &self.config
    }

    /// Suffix of the index a page in `namespace` belongs in.
    pub fn suffix_for_namespace(&self, namespace: i64) -> &str {
        if let Some(suffix) = self.mappings.get(&namespace) {
            return suffix;
        }
        if self.config.content_namespaces.contains(&namespace) {
            CONTENT_INDEX_SUFFIX
        } else {
            GENERAL_INDEX_SUFFIX
        }
    }

    /// Extract the suffix from a concrete index name.
    pub fn extract_index_suffix(&self, index_name: &str) -> Result<String, CheckerError> {
        self.suffix_pattern
            .captures(index_name)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| CheckerError::MalformedIndexName {
                name: index_name.to_string(),
            })
    }

    /// Document id under which a page is indexed.
    pub fn make_doc_id(&self, page_id: PageId) -> String {
        if self.config.prefix_ids {
            format!("{}|{page_id}", self.config.wiki_id)
        } else {
            page_id.to_string()
        }
    }
}
