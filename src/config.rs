//! Configuration, loaded from `twosql.toml`.
//!
//! ```toml
//! [transform]
//! placeholder = "numbered"
//! remove_blank_lines = true
//!
//! [cache]
//! max_entries = 500
//!
//! [coverage]
//! enabled = true
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::cache::CacheConfig;
use crate::error::{TwoSqlError, TwoSqlResult};

const CONFIG_FILE: &str = "twosql.toml";

/// How bind placeholders are written into SQL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaceholderStyle {
    /// `?` (JDBC, MySQL, SQLite)
    #[default]
    Question,
    /// `$1`, `$2`, ... (PostgreSQL)
    Numbered,
}

impl PlaceholderStyle {
    /// Render the placeholder for the bind at `index` (zero-based).
    pub fn render(self, index: usize) -> String {
        match self {
            PlaceholderStyle::Question => "?".to_string(),
            PlaceholderStyle::Numbered => format!("${}", index + 1),
        }
    }
}

/// Options for a transform pass.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TransformOptions {
    pub placeholder: PlaceholderStyle,
    /// Remove lines left empty by disabled directives.
    pub remove_blank_lines: bool,
    /// Drop an `AND`/`OR` left directly after `WHERE`/`HAVING`.
    pub trim_dangling_connectives: bool,
    /// Drop commas left after `SELECT`/`SET`/`(` or before `)`/`FROM`.
    pub trim_stray_commas: bool,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            placeholder: PlaceholderStyle::Question,
            remove_blank_lines: true,
            trim_dangling_connectives: true,
            trim_stray_commas: true,
        }
    }
}

impl TransformOptions {
    /// Options that leave the rendered text exactly as the directives produced it.
    pub fn verbatim() -> Self {
        Self {
            placeholder: PlaceholderStyle::Question,
            remove_blank_lines: false,
            trim_dangling_connectives: false,
            trim_stray_commas: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CoverageConfig {
    /// Collect branch coverage for every render.
    pub enabled: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub transform: TransformOptions,
    pub cache: CacheConfig,
    pub coverage: CoverageConfig,
}

impl Config {
    /// Create a new configuration builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn from_toml(content: &str) -> TwoSqlResult<Self> {
        toml::from_str(content).map_err(|e| TwoSqlError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> TwoSqlResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        tracing::debug!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Look for `./twosql.toml`, then the user config directory.
    ///
    /// Falls back to defaults when neither exists.
    pub fn discover() -> TwoSqlResult<Self> {
        match Self::candidates().into_iter().find(|p| p.exists()) {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    fn candidates() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("twosql").join("config.toml"));
        }
        paths
    }
}

/// Builder for Config
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn placeholder(mut self, style: PlaceholderStyle) -> Self {
        self.config.transform.placeholder = style;
        self
    }

    /// Turn every cleanup rule on or off at once.
    pub fn cleanup(mut self, enabled: bool) -> Self {
        self.config.transform.remove_blank_lines = enabled;
        self.config.transform.trim_dangling_connectives = enabled;
        self.config.transform.trim_stray_commas = enabled;
        self
    }

    pub fn cache_entries(mut self, max_entries: usize) -> Self {
        self.config.cache.max_entries = max_entries;
        self
    }

    pub fn cache(mut self, enabled: bool) -> Self {
        self.config.cache.enabled = enabled;
        self
    }

    pub fn coverage(mut self, enabled: bool) -> Self {
        self.config.coverage.enabled = enabled;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_toml() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert!(config.transform.remove_blank_lines);
        assert!(config.cache.enabled);
        assert!(!config.coverage.enabled);
    }

    #[test]
    fn test_partial_toml() {
        let config = Config::from_toml(
            r#"
            [transform]
            placeholder = "numbered"
            trim_stray_commas = false

            [cache]
            max_entries = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.transform.placeholder, PlaceholderStyle::Numbered);
        assert!(!config.transform.trim_stray_commas);
        assert!(config.transform.trim_dangling_connectives);
        assert_eq!(config.cache.max_entries, 10);
    }

    #[test]
    fn test_invalid_toml() {
        let err = Config::from_toml("[transform]\nplaceholder = \"colon\"").unwrap_err();
        assert!(matches!(err, TwoSqlError::Config(_)));
    }

    #[test]
    fn test_builder() {
        let config = Config::builder()
            .placeholder(PlaceholderStyle::Numbered)
            .cleanup(false)
            .coverage(true)
            .cache_entries(3)
            .build();
        assert_eq!(config.transform.placeholder, PlaceholderStyle::Numbered);
        assert!(!config.transform.remove_blank_lines);
        assert!(config.coverage.enabled);
        assert_eq!(config.cache.max_entries, 3);
    }

    #[test]
    fn test_placeholder_render() {
        assert_eq!(PlaceholderStyle::Question.render(4), "?");
        assert_eq!(PlaceholderStyle::Numbered.render(0), "$1");
    }
}
