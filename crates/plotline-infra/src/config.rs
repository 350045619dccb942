//! Engine configuration loader.
//!
//! Reads `EngineConfig` from an explicit path, or from `plotline.toml` in
//! the working directory when present, then applies the `PLOTLINE_TRACE`
//! and `PLOTLINE_TRACE_DIR` environment overrides.

use std::path::{Path, PathBuf};

use thiserror::Error;

use plotline_types::config::EngineConfig;

/// Config file picked up from the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "plotline.toml";

/// Enables JSONL tracing when set to `1`, `true` or `yes`.
pub const TRACE_ENV: &str = "PLOTLINE_TRACE";

/// Overrides the trace directory.
pub const TRACE_DIR_ENV: &str = "PLOTLINE_TRACE_DIR";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Load the engine configuration.
///
/// - An explicit `path` must exist and parse.
/// - Without one, `plotline.toml` in the working directory is used if it
///   exists; a malformed implicit file logs a warning and falls back to the
///   defaults.
/// - Environment overrides apply last.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig, ConfigError> {
    let mut config = match path {
        Some(path) => read_config(path)?,
        None => implicit_config(Path::new(DEFAULT_CONFIG_FILE)),
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn read_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn implicit_config(path: &Path) -> EngineConfig {
    if !path.exists() {
        tracing::debug!("No {} found, using defaults", path.display());
        return EngineConfig::default();
    }
    match read_config(path) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("{err}, using defaults");
            EngineConfig::default()
        }
    }
}

/// Apply environment overrides using `lookup` to read variables.
pub fn apply_env_overrides<F>(config: &mut EngineConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(toggle) = lookup(TRACE_ENV) {
        config.trace.enabled = is_truthy(&toggle);
    }
    if let Some(dir) = lookup(TRACE_DIR_ENV).filter(|d| !d.trim().is_empty()) {
        config.trace.dir = PathBuf::from(dir);
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn read_config_valid_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("engine.toml");
        std::fs::write(
            &path,
            "default_max_duration_ms = 1500\n\n[trace]\nenabled = true\ndir = \"out\"\n",
        )
        .unwrap();

        let config = read_config(&path).unwrap();
        assert_eq!(config.default_max_duration_ms, 1500);
        assert!(config.trace.enabled);
        assert_eq!(config.trace.dir, PathBuf::from("out"));
    }

    #[test]
    fn explicit_config_errors_surface() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("missing.toml");
        assert!(matches!(
            read_config(&missing),
            Err(ConfigError::Read { .. })
        ));

        let broken = tmp.path().join("broken.toml");
        std::fs::write(&broken, "this is not { valid toml !!!").unwrap();
        assert!(matches!(
            read_config(&broken),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn implicit_config_falls_back_to_default() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(
            implicit_config(&tmp.path().join("plotline.toml")),
            EngineConfig::default()
        );

        let broken = tmp.path().join("plotline.toml");
        std::fs::write(&broken, "default_max_duration_ms = \"soon\"").unwrap();
        assert_eq!(implicit_config(&broken), EngineConfig::default());
    }

    #[test]
    fn env_overrides_trace_section() {
        for (value, expected) in [("1", true), ("TRUE", true), ("yes", true), ("0", false), ("off", false)] {
            let mut config = EngineConfig::default();
            apply_env_overrides(&mut config, env(&[(TRACE_ENV, value)]));
            assert_eq!(config.trace.enabled, expected, "{value}");
        }

        let mut config = EngineConfig::default();
        config.trace.enabled = true;
        apply_env_overrides(&mut config, env(&[(TRACE_DIR_ENV, "/tmp/t")]));
        assert!(config.trace.enabled);
        assert_eq!(config.trace.dir, PathBuf::from("/tmp/t"));

        apply_env_overrides(&mut config, env(&[(TRACE_DIR_ENV, "  ")]));
        assert_eq!(config.trace.dir, PathBuf::from("/tmp/t"));
    }
}
