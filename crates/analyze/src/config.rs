//! Analyzer configuration, loaded from TOML.
//!
//! ```toml
//! loop_iterations = 2
//! max_nesting_depth = 64
//! jobs = 4
//! violation_severity = "error"
//! open_close_effects = ["OpenedFile"]
//! ```

use crate::diagnostics::Severity;
use ctxeffects_core::{EffectFamily, EffectRegistry};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read config '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalyzerConfig {
    /// Muted fixed-point passes over a loop body before unstable facts collapse.
    pub loop_iterations: u32,
    /// Deepest lambda/block nesting analyzed before giving up on a callable.
    pub max_nesting_depth: usize,
    /// Worker threads; callables are analyzed independently.
    pub jobs: usize,
    pub violation_severity: Severity,
    /// Extra constructors registered as open/close effects.
    pub open_close_effects: Vec<String>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        AnalyzerConfig {
            loop_iterations: 2,
            max_nesting_depth: 64,
            jobs: 1,
            violation_severity: Severity::Warning,
            open_close_effects: Vec::new(),
        }
    }
}

impl AnalyzerConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: AnalyzerConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), ?config, "loaded analyzer config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.loop_iterations == 0 {
            return Err(ConfigError::Invalid(
                "loop_iterations must be at least 1".into(),
            ));
        }
        if self.max_nesting_depth == 0 {
            return Err(ConfigError::Invalid(
                "max_nesting_depth must be at least 1".into(),
            ));
        }
        if self.jobs == 0 {
            return Err(ConfigError::Invalid("jobs must be at least 1".into()));
        }
        Ok(())
    }

    /// Default registry plus the configured open/close constructors.
    pub fn registry(&self) -> EffectRegistry {
        let mut registry = EffectRegistry::default();
        for name in &self.open_close_effects {
            registry.register(name.clone(), EffectFamily::OpenClose);
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let c = AnalyzerConfig::from_toml_str("").unwrap();
        assert_eq!(c, AnalyzerConfig::default());
        assert_eq!(c.loop_iterations, 2);
        assert_eq!(c.violation_severity, Severity::Warning);
    }

    #[test]
    fn overrides_are_applied() {
        let c = AnalyzerConfig::from_toml_str(
            r#"
            jobs = 4
            violation_severity = "error"
            open_close_effects = ["OpenedFile"]
            "#,
        )
        .unwrap();
        assert_eq!(c.jobs, 4);
        assert_eq!(c.violation_severity, Severity::Error);
        assert_eq!(
            c.registry().family_of("OpenedFile"),
            Some(EffectFamily::OpenClose)
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = AnalyzerConfig::from_toml_str("loops = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn zero_jobs_is_invalid() {
        let err = AnalyzerConfig::from_toml_str("jobs = 0").unwrap_err();
        assert!(err.to_string().contains("jobs"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = AnalyzerConfig::load(Path::new("/nonexistent/ctxeffects.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
