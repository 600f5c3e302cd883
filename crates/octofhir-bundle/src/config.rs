use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BundleConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub processing: ProcessingSettings,
    #[serde(default)]
    pub search: SearchSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl BundleConfig {
    pub fn validate(&self) -> Result<(), String> {
        url::Url::parse(&self.server.base_url)
            .map_err(|e| format!("server.base_url is not a valid URL: {e}"))?;
        // Search validations
        if self.search.default_count == 0 {
            return Err("search.default_count must be > 0".into());
        }
        if self.search.max_count == 0 {
            return Err("search.max_count must be > 0".into());
        }
        if self.search.default_count > self.search.max_count {
            return Err("search.default_count must be <= search.max_count".into());
        }
        if self.processing.interceptor_timeout_ms == 0 {
            return Err("processing.interceptor_timeout_ms must be > 0".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.server.base_url.trim_end_matches('/')
    }

    pub fn interceptor_timeout(&self) -> Duration {
        Duration::from_millis(self.processing.interceptor_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Absolute base used for `Location` headers, `fullUrl` and paging links.
    #[serde(default = "default_base_url")]
    pub base_url: String,
}
fn default_base_url() -> String {
    "http://localhost:8888/fhir".into()
}
impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingSettings {
    /// PUT of a missing resource creates it instead of failing with 405.
    #[serde(default = "default_true")]
    pub allow_update_create: bool,
    #[serde(default)]
    pub allow_delete: bool,
    /// Conditional deletes matching more resources than this fail with 412.
    #[serde(default = "default_conditional_delete_max")]
    pub conditional_delete_max_number: usize,
    #[serde(default)]
    pub prefer_return: PreferReturn,
    #[serde(default = "default_interceptor_timeout_ms")]
    pub interceptor_timeout_ms: u64,
}
fn default_true() -> bool {
    true
}
fn default_conditional_delete_max() -> usize {
    10
}
fn default_interceptor_timeout_ms() -> u64 {
    30_000
}
impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            allow_update_create: default_true(),
            allow_delete: false,
            conditional_delete_max_number: default_conditional_delete_max(),
            prefer_return: PreferReturn::default(),
            interceptor_timeout_ms: default_interceptor_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    #[serde(default = "default_search_default")]
    pub default_count: u32,
    #[serde(default = "default_search_max")]
    pub max_count: u32,
}
fn default_search_default() -> u32 {
    10
}
fn default_search_max() -> u32 {
    1000
}
impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            default_count: default_search_default(),
            max_count: default_search_max(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// What a successful write puts in its response entry body
/// (the `Prefer: return=` header).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PreferReturn {
    Minimal,
    #[default]
    Representation,
    OperationOutcome,
}

impl PreferReturn {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Representation => "representation",
            Self::OperationOutcome => "OperationOutcome",
        }
    }
}

impl fmt::Display for PreferReturn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PreferReturn {
    type Err = String;

    /// Accepts both the header form (`return=minimal`) and the bare value.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        let value = value.strip_prefix("return=").unwrap_or(value);
        match value.to_ascii_lowercase().as_str() {
            "minimal" => Ok(Self::Minimal),
            "representation" => Ok(Self::Representation),
            "operationoutcome" | "operation-outcome" => Ok(Self::OperationOutcome),
            other => Err(format!(
                "unknown return preference '{other}', expected minimal, representation or OperationOutcome"
            )),
        }
    }
}

pub mod loader {
    use super::BundleConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_FILE: &str = "octofhir-bundle.toml";

    pub fn load_config(path: Option<&str>) -> Result<BundleConfig, String> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                let pathbuf = PathBuf::from(p);
                if !pathbuf.exists() {
                    return Err(format!("config file not found: {p}"));
                }
                builder = builder.add_source(File::from(pathbuf));
            }
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        // Environment variable overrides, e.g. OCTOFHIR_BUNDLE__PROCESSING__ALLOW_DELETE=true
        builder = builder.add_source(
            Environment::with_prefix("OCTOFHIR_BUNDLE")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: BundleConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = BundleConfig::default();
        assert!(cfg.validate().is_ok());
        assert!(cfg.processing.allow_update_create);
        assert!(!cfg.processing.allow_delete);
        assert_eq!(cfg.processing.conditional_delete_max_number, 10);
        assert_eq!(cfg.processing.prefer_return, PreferReturn::Representation);
        assert_eq!(cfg.search.default_count, 10);
        assert_eq!(cfg.base_url(), "http://localhost:8888/fhir");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut cfg = BundleConfig::default();
        cfg.search.default_count = 50;
        cfg.search.max_count = 20;
        assert!(cfg.validate().unwrap_err().contains("default_count"));

        let mut cfg = BundleConfig::default();
        cfg.server.base_url = "not a url".into();
        assert!(cfg.validate().unwrap_err().contains("base_url"));

        let mut cfg = BundleConfig::default();
        cfg.logging.level = "loud".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_prefer_return_parsing() {
        assert_eq!("minimal".parse::<PreferReturn>().unwrap(), PreferReturn::Minimal);
        assert_eq!(
            "return=representation".parse::<PreferReturn>().unwrap(),
            PreferReturn::Representation
        );
        assert_eq!(
            "OperationOutcome".parse::<PreferReturn>().unwrap(),
            PreferReturn::OperationOutcome
        );
        assert!("everything".parse::<PreferReturn>().is_err());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut cfg = BundleConfig::default();
        cfg.server.base_url = "https://fhir.example.org/r4/".into();
        cfg.processing.allow_delete = true;
        cfg.processing.prefer_return = PreferReturn::Minimal;
        cfg.search.max_count = 50;

        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(toml::to_string(&cfg).unwrap().as_bytes())
            .unwrap();

        let loaded = loader::load_config(file.path().to_str()).unwrap();
        assert!(loaded.processing.allow_delete);
        assert_eq!(loaded.processing.prefer_return, PreferReturn::Minimal);
        assert_eq!(loaded.search.max_count, 50);
        assert_eq!(loaded.base_url(), "https://fhir.example.org/r4");
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let err = loader::load_config(Some("/definitely/not/here.toml")).unwrap_err();
        assert!(err.contains("not found"));
    }
}
