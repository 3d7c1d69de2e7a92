//! Checker options
//!
//! Loaded from a TOML file; command-line flags override individual values afterwards.

use crate::error::{CheckerError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Every bundled type system, in pipeline order
pub const ALL_CHECKERS: &[&str] = &["determinism", "format", "index", "mustcallonelements"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckerOptions {
    /// Type systems to run, in order. `index` expands to `value`, `lowerbound`, `upperbound`.
    pub checkers: Vec<String>,
    /// Run whole-program inference and collect observations
    pub infer: bool,
    /// Where inference summaries are written
    pub wpi_dir: Option<PathBuf>,
    /// Restrict inference to these systems; empty means all
    pub enable_wpi_for: Vec<String>,
    pub ignore_null_assignments: bool,
    /// Warn about loops that almost match an obligation pattern
    pub warn_partial_loops: bool,
    /// Extra message keys (or `system:key`) suppressed everywhere
    pub suppress: Vec<String>,
    /// Block visits after which an analysis is considered divergent
    pub max_block_visits: usize,
}

impl Default for CheckerOptions {
    fn default() -> Self {
        Self {
            checkers: ALL_CHECKERS.iter().map(|c| c.to_string()).collect(),
            infer: false,
            wpi_dir: None,
            enable_wpi_for: Vec::new(),
            ignore_null_assignments: true,
            warn_partial_loops: true,
            suppress: Vec::new(),
            max_block_visits: 10_000,
        }
    }
}

impl CheckerOptions {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| CheckerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| CheckerError::Options {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn with_checkers<I, S>(mut self, checkers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.checkers = checkers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_inference(mut self, infer: bool) -> Self {
        self.infer = infer;
        self
    }

    /// True if inference is on and `system` takes part in it
    pub fn wpi_enabled_for(&self, system: &str) -> bool {
        self.infer && (self.enable_wpi_for.is_empty() || self.enable_wpi_for.iter().any(|s| s == system))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = CheckerOptions::default();
        assert_eq!(opts.checkers.len(), 4);
        assert!(opts.ignore_null_assignments);
        assert!(!opts.wpi_enabled_for("determinism"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let opts = CheckerOptions::from_toml(
            r#"
            checkers = ["format"]
            infer = true
            enable_wpi_for = ["format"]
            "#,
        )
        .unwrap();
        assert_eq!(opts.checkers, vec!["format".to_string()]);
        assert_eq!(opts.max_block_visits, 10_000);
        assert!(opts.wpi_enabled_for("format"));
        assert!(!opts.wpi_enabled_for("determinism"));
    }

    #[test]
    fn test_from_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qualflow.toml");
        std::fs::write(&path, "checkers = 3").unwrap();
        let err = CheckerOptions::from_file(&path).unwrap_err();
        assert!(matches!(err, CheckerError::Options { .. }));
        assert!(err.to_string().contains("qualflow.toml"));
    }
}
