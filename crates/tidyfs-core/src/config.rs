use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::remediation::ConflictPolicy;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub insights_path: PathBuf,
    pub archive_dir: PathBuf,
    pub extractor: ExtractorConfig,
    pub similarity: SimilarityConfig,
    pub remediation: RemediationConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("tidyfs.db"),
            insights_path: PathBuf::from("insights.json"),
            archive_dir: PathBuf::from("archives"),
            extractor: ExtractorConfig::default(),
            similarity: SimilarityConfig::default(),
            remediation: RemediationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Tokens shorter than this (in chars) are discarded.
    pub min_term_len: usize,
    pub extra_stopwords: Vec<String>,
    pub ignore_patterns: Vec<String>,
    pub include_hidden: bool,
    /// Depth below the scanned root; `None` walks the whole subtree.
    pub max_depth: Option<usize>,
    pub content_scan: bool,
    pub content_max_bytes: u64,
    pub content_extensions: Vec<String>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            min_term_len: 2,
            extra_stopwords: Vec::new(),
            ignore_patterns: Vec::new(),
            include_hidden: false,
            max_depth: None,
            content_scan: false,
            content_max_bytes: 64 * 1024,
            content_extensions: [
                "txt", "md", "markdown", "rst", "csv", "tsv", "json", "toml", "yaml", "yml",
                "ini", "cfg", "log", "xml", "html", "htm",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// When the similarity pass runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshPolicy {
    /// Only on an explicit refresh.
    Manual,
    /// After every scan and remediation.
    AfterUpsert,
    /// Mark dirty on change, recompute before serving insights.
    Lazy,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SimilarityConfig {
    pub threshold: f64,
    pub max_insights: usize,
    pub refresh: RefreshPolicy,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            threshold: 0.3,
            max_insights: 20,
            refresh: RefreshPolicy::Lazy,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RemediationConfig {
    pub conflict_policy: ConflictPolicy,
    /// Re-scan the merge destination once its contents changed.
    pub rescan_after_merge: bool,
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            conflict_policy: ConflictPolicy::default(),
            rescan_after_merge: true,
        }
    }
}

/// Load `Config.toml` (optional) overlaid with `TIDYFS__*` environment variables.
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Config").required(false))
        .add_source(Environment::with_prefix("TIDYFS").separator("__"))
        .build()?;
    builder.try_deserialize::<AppConfig>()
}
