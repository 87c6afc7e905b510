use std::fs::File;
use std::io::BufReader;
use std::io::Read;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorLayer, HierarchyError, Result};
use crate::pipeline::{GroupingKind, DEFAULT_GROUPING_ORDER};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    /// Maximum number of parents with cached entries.
    pub size: usize,
    /// Maximum number of variations (instance filter / size limit
    /// combinations) kept per parent.
    pub variations_count: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            size: 1000,
            variations_count: 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HierarchyProviderConfig {
    pub level_cache: CacheConfig,
    pub children_cache: CacheConfig,
    /// The order grouping kinds nest in, outermost first.
    pub grouping_order: Vec<GroupingKind>,
}

impl Default for HierarchyProviderConfig {
    fn default() -> Self {
        HierarchyProviderConfig {
            level_cache: CacheConfig::default(),
            children_cache: CacheConfig::default(),
            grouping_order: DEFAULT_GROUPING_ORDER.to_vec(),
        }
    }
}

impl HierarchyProviderConfig {
    pub fn from_json(input: &str) -> Result<Self> {
        serde_json::from_str(input)
            .map_err(|err| HierarchyError::sticky(ErrorLayer::ConfigLayer, err.to_string()))
    }
}

pub fn load(config_path: &str) -> Result<HierarchyProviderConfig> {
    let config_file = File::open(config_path)?;
    let mut reader = BufReader::new(&config_file);
    let mut input = String::new();
    reader.read_to_string(&mut input)?;
    HierarchyProviderConfig::from_json(&input)
}
