//! Configuration loaded from `lineage.toml`.
//!
//! ```toml
//! rules_path = "rules.yaml"
//!
//! [trace]
//! upstream_depth = 3
//! downstream_depth = 3
//! hide_co_writers = true
//!
//! [analysis]
//! island_max_size = 50
//! hub_min_degree = 5
//! longest_path_min_nodes = 3
//! max_chains = 10
//! ```
//!
//! Every key is optional. Loading never fails: a missing or unreadable file
//! yields the defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::analysis::AnalysisConfig;
use crate::error::Result;
use crate::extract::RuleSet;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "lineage.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineageConfig {
    /// Rule document location. Relative paths resolve against the config
    /// file's directory. Unset means the built-in rules.
    pub rules_path: Option<PathBuf>,
    pub trace: TraceConfig,
    pub analysis: AnalysisConfig,
}

/// Defaults for `trace` when the caller does not override them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    pub upstream_depth: usize,
    pub downstream_depth: usize,
    pub hide_co_writers: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            upstream_depth: 3,
            downstream_depth: 3,
            hide_co_writers: true,
        }
    }
}

impl LineageConfig {
    /// Load config from `path`, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "no config file, using defaults");
                return Self::default();
            }
        };
        match toml::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "invalid config, using defaults");
                Self::default()
            }
        }
    }

    /// Resolve `rules_path` against `base_dir` when it is relative.
    pub fn resolve_rules_path(&self, base_dir: &Path) -> Option<PathBuf> {
        self.rules_path.as_ref().map(|p| {
            if p.is_absolute() {
                p.clone()
            } else {
                base_dir.join(p)
            }
        })
    }

    /// The validated rule set this config points at, or the built-in rules.
    pub fn rule_set(&self, base_dir: &Path) -> Result<RuleSet> {
        match self.resolve_rules_path(base_dir) {
            Some(path) => RuleSet::load(&path),
            None => Ok(RuleSet::default()),
        }
    }
}
