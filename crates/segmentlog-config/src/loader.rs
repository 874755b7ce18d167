//! Configuration loader with multi-source merging

use crate::{CommitLogConfig, ConfigError, Paths};
use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Configuration loader with builder pattern
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
    config_file: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader with default project directory (current dir)
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "SEGMENTLOG".to_string(),
            config_file: None,
        }
    }

    /// Set the project directory
    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the environment variable prefix (default: "SEGMENTLOG")
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Adds an explicit config file layered above the project files.
    /// Unlike the discovered files it must exist.
    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Load configuration from all sources with proper precedence
    pub fn load(self) -> Result<CommitLogConfig> {
        let mut builder = config::Config::builder();

        // 1. Built-in defaults
        let defaults = CommitLogConfig::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        // 2. User config (~/.config/segmentlog/config.toml)
        let paths = Paths::new();
        if let Ok(user_config_file) = paths.user_config_file() {
            if user_config_file.exists() {
                builder = builder.add_source(toml_file(user_config_file, false));
            }
        }

        // 3. Project config, then local overrides
        for file in [
            Paths::project_config_file(&self.project_dir),
            Paths::local_config_file(&self.project_dir),
        ] {
            if file.exists() {
                builder = builder.add_source(toml_file(file, false));
            }
        }

        // 4. Explicit file
        if let Some(file) = &self.config_file {
            builder = builder.add_source(toml_file(file.clone(), true));
        }

        // 5. Environment variables: SEGMENTLOG_MAX_SEGMENT_BYTES=...
        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let mut commit_log_config: CommitLogConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        commit_log_config.resolve_paths(&self.project_dir);
        commit_log_config.validate()?;

        Ok(commit_log_config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default(self) -> CommitLogConfig {
        self.load().unwrap_or_default()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn toml_file(path: PathBuf, required: bool) -> config::File<config::FileSourceFile, config::FileFormat> {
    config::File::from(path)
        .required(required)
        .format(config::FileFormat::Toml)
}

/// Parses a single TOML file, without defaults layering or validation.
pub fn parse_file(path: impl AsRef<Path>) -> Result<CommitLogConfig, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::ParseError {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use segmentlog_types::CompressionKind;
    use std::fs;
    use tempfile::tempdir;

    fn loader(dir: &Path) -> ConfigLoader {
        // Keeps the host environment out of the tests.
        ConfigLoader::new()
            .with_project_dir(dir)
            .with_env_prefix("SEGMENTLOG_LOADER_TEST_UNSET")
    }

    #[test]
    fn test_load_defaults() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let config = loader(temp_dir.path()).load().expect("Failed to load config");

        assert_eq!(config.flush_interval_ms, 100);
        assert_eq!(config.topics.len(), 1);
        assert_eq!(config.directory, temp_dir.path().join("logs"));
    }

    #[test]
    fn test_load_project_config() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();

        let config_content = r#"
directory = "/var/lib/segmentlog"
max_segment_bytes = 1048576
compression = "zstd"
zstd_level = 9

[[topics]]
name = "orders"
base_offset = 1000

[[topics]]
name = "audit"
flush_interval_ms = 10
"#;
        fs::write(project_dir.join("segmentlog.toml"), config_content)
            .expect("Failed to write config");

        let config = loader(project_dir).load().expect("Failed to load config");

        assert_eq!(config.directory, PathBuf::from("/var/lib/segmentlog"));
        assert_eq!(config.max_segment_bytes, 1_048_576);
        assert_eq!(config.compression, CompressionKind::Zstd);
        assert_eq!(config.zstd_level, 9);
        assert_eq!(config.topics.len(), 2);
        assert_eq!(config.topic("orders").unwrap().base_offset, 1000);
        assert_eq!(config.topic("audit").unwrap().flush_interval_ms, Some(10));
        // Unset fields keep their defaults.
        assert_eq!(config.queue_capacity, 100);
    }

    #[test]
    fn test_local_overrides() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();

        fs::write(project_dir.join("segmentlog.toml"), "queue_capacity = 10\n")
            .expect("Failed to write project config");
        fs::write(project_dir.join("segmentlog.local.toml"), "queue_capacity = 20\n")
            .expect("Failed to write local config");

        let config = loader(project_dir).load().expect("Failed to load config");
        assert_eq!(config.queue_capacity, 20);
    }

    #[test]
    fn explicit_file_wins_and_must_exist() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();
        fs::write(project_dir.join("segmentlog.toml"), "read_buffer_size = 10\n").unwrap();
        let explicit = project_dir.join("override.toml");
        fs::write(&explicit, "read_buffer_size = 30\n").unwrap();

        let config = loader(project_dir).with_config_file(&explicit).load().unwrap();
        assert_eq!(config.read_buffer_size, 30);

        assert!(
            loader(project_dir)
                .with_config_file(project_dir.join("missing.toml"))
                .load()
                .is_err()
        );
    }

    #[test]
    fn invalid_values_fail_to_load() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        fs::write(temp_dir.path().join("segmentlog.toml"), "max_segment_bytes = 0\n").unwrap();

        assert!(loader(temp_dir.path()).load().is_err());
        assert_eq!(
            loader(temp_dir.path()).load_or_default(),
            CommitLogConfig::default()
        );
    }

    #[test]
    fn parse_file_reports_path() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let bad = temp_dir.path().join("bad.toml");
        fs::write(&bad, "queue_capacity = \"many\"\n").unwrap();

        match parse_file(&bad) {
            Err(ConfigError::ParseError { path, .. }) => assert_eq!(path, bad),
            other => panic!("expected parse error, got {other:?}"),
        }
        assert!(matches!(
            parse_file(temp_dir.path().join("absent.toml")),
            Err(ConfigError::ReadError { .. })
        ));
    }
}
