use anyhow::{Context, Result};
use octofhir_bundle::BundleConfig;
use octofhir_bundle::config::loader;

/// Loads the configuration file and environment overrides.
pub fn load(path: Option<&str>) -> Result<BundleConfig> {
    loader::load_config(path)
        .map_err(anyhow::Error::msg)
        .context("Failed to load configuration")
}

/// Replaces the configured log level with the `--log-level` value.
pub fn override_log_level(config: &mut BundleConfig, level: &str) -> Result<()> {
    let previous = std::mem::replace(&mut config.logging.level, level.to_string());
    if let Err(e) = config.validate() {
        config.logging.level = previous;
        return Err(anyhow::Error::msg(e)).context("Invalid --log-level");
    }
    Ok(())
}

pub fn to_toml(config: &BundleConfig) -> Result<String> {
    toml::to_string_pretty(config).context("Failed to render configuration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_file_and_log_override() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[processing]\nallow_delete = true\nprefer_return = \"minimal\"\n"
        )
        .unwrap();
        let path = file.path().to_str().unwrap();

        let mut config = load(Some(path)).unwrap();
        assert!(config.processing.allow_delete);
        override_log_level(&mut config, "debug").unwrap();
        assert_eq!(config.logging.level, "debug");

        let rendered = to_toml(&config).unwrap();
        assert!(rendered.contains("prefer_return = \"minimal\""));

        let err = override_log_level(&mut config, "loud").unwrap_err();
        assert!(format!("{err:#}").contains("logging.level"));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = load(Some("/nonexistent/octofhir-bundle.toml")).unwrap_err();
        assert!(format!("{err:#}").contains("config file not found"));
    }
}
