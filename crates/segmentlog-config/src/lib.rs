//! Configuration management for segmentlog
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. Environment variables (SEGMENTLOG_* prefix, highest precedence)
//! 2. segmentlog.local.toml (gitignored, local overrides)
//! 3. segmentlog.toml (git-tracked, project config)
//! 4. ~/.config/segmentlog/config.toml (user defaults)
//! 5. Built-in defaults (lowest precedence)

use anyhow::Result;
use segmentlog_types::{CompressionKind, Offset, TopicName};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::{ConfigLoader, parse_file};
pub use paths::Paths;

/// Valid zstd compression levels.
pub const ZSTD_LEVELS: std::ops::RangeInclusive<i32> = 1..=22;

/// Commit log configuration shared by every topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitLogConfig {
    /// Root directory; each topic lives in `{directory}/{topic}` unless it
    /// names its own directory.
    pub directory: PathBuf,
    pub max_segment_bytes: u64,
    pub index_interval_bytes: u64,
    pub time_index_interval_ms: u64,
    pub flush_interval_ms: u64,
    /// Pending appends per topic before producers start draining inline.
    pub queue_capacity: usize,
    pub write_buffer_size: usize,
    pub read_buffer_size: usize,
    pub compression: CompressionKind,
    pub zstd_level: i32,
    pub topics: Vec<TopicConfig>,
}

impl Default for CommitLogConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("logs"),
            max_segment_bytes: 128 * 1024 * 1024,
            index_interval_bytes: 4096,
            time_index_interval_ms: 4096,
            flush_interval_ms: 100,
            queue_capacity: 100,
            write_buffer_size: 64 * 1024,
            read_buffer_size: 64 * 1024,
            compression: CompressionKind::None,
            zstd_level: 3,
            topics: vec![TopicConfig::default()],
        }
    }
}

/// Per-topic settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    pub name: String,
    /// Offset of the first record when the topic directory is empty.
    pub base_offset: u64,
    /// Overrides the global flush interval.
    pub flush_interval_ms: Option<u64>,
    /// Overrides `{directory}/{name}`.
    pub directory: Option<PathBuf>,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            base_offset: 0,
            flush_interval_ms: None,
            directory: None,
        }
    }
}

impl TopicConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn topic_name(&self) -> TopicName {
        TopicName::new(self.name.clone())
    }

    pub fn base_offset(&self) -> Offset {
        Offset::new(self.base_offset)
    }
}

impl CommitLogConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Creates a configuration rooted at `directory` with the given topics.
    pub fn with_topics<I, S>(directory: impl Into<PathBuf>, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            directory: directory.into(),
            topics: topics.into_iter().map(TopicConfig::new).collect(),
            ..Self::default()
        }
    }

    /// Finds a topic by name, ignoring case.
    pub fn topic(&self, name: &str) -> Option<&TopicConfig> {
        let name = TopicName::new(name);
        self.topics.iter().find(|t| t.topic_name() == name)
    }

    /// Directory holding `topic`'s segment files.
    pub fn topic_directory(&self, topic: &TopicConfig) -> PathBuf {
        topic
            .directory
            .clone()
            .unwrap_or_else(|| self.directory.join(&topic.name))
    }

    /// Background flush period for `topic`.
    pub fn flush_interval(&self, topic: &TopicConfig) -> Duration {
        Duration::from_millis(topic.flush_interval_ms.unwrap_or(self.flush_interval_ms))
    }

    /// Checks limits that would otherwise fail at first use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::ValidationError(msg));

        if self.max_segment_bytes == 0 {
            return invalid("max_segment_bytes must be positive".to_string());
        }
        if self.queue_capacity == 0 {
            return invalid("queue_capacity must be positive".to_string());
        }
        if self.read_buffer_size == 0 {
            return invalid("read_buffer_size must be positive".to_string());
        }
        if self.flush_interval_ms == 0 {
            return invalid("flush_interval_ms must be positive".to_string());
        }
        if !ZSTD_LEVELS.contains(&self.zstd_level) {
            return invalid(format!(
                "zstd_level {} outside {}..={}",
                self.zstd_level,
                ZSTD_LEVELS.start(),
                ZSTD_LEVELS.end()
            ));
        }
        if self.topics.is_empty() {
            return invalid("at least one topic must be configured".to_string());
        }

        let mut seen = HashSet::new();
        for topic in &self.topics {
            if topic.name.trim().is_empty() {
                return invalid("topic names must not be empty".to_string());
            }
            if topic.flush_interval_ms == Some(0) {
                return invalid(format!("topic '{}': flush_interval_ms must be positive", topic.name));
            }
            if !seen.insert(topic.topic_name().key()) {
                return invalid(format!("topic '{}' is configured more than once", topic.name));
            }
        }
        Ok(())
    }

    /// Resolve relative paths to absolute
    pub fn resolve_paths(&mut self, base_dir: impl AsRef<Path>) {
        let base = base_dir.as_ref();

        if self.directory.is_relative() {
            self.directory = base.join(&self.directory);
        }
        for topic in &mut self.topics {
            if let Some(dir) = topic.directory.as_mut().filter(|d| d.is_relative()) {
                *dir = base.join(&*dir);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_default_config() {
        let config = CommitLogConfig::default();
        assert_eq!(config.max_segment_bytes, 128 * 1024 * 1024);
        assert_eq!(config.index_interval_bytes, 4096);
        assert_eq!(config.queue_capacity, 100);
        assert_eq!(config.compression, CompressionKind::None);
        assert_eq!(config.topics.len(), 1);
        assert_eq!(config.topics[0].name, "default");
        config.validate().unwrap();
    }

    #[test]
    fn topic_lookup_ignores_case() {
        let config = CommitLogConfig::with_topics("/data", ["Orders", "payments"]);
        assert_eq!(config.topic("ORDERS").unwrap().name, "Orders");
        assert!(config.topic("refunds").is_none());
    }

    #[test]
    fn topic_directory_and_interval_fall_back_to_globals() {
        let mut config = CommitLogConfig::with_topics("/data", ["orders", "audit"]);
        config.topics[1].directory = Some(PathBuf::from("/mnt/audit"));
        config.topics[1].flush_interval_ms = Some(5);

        assert_eq!(config.topic_directory(&config.topics[0]), PathBuf::from("/data/orders"));
        assert_eq!(config.topic_directory(&config.topics[1]), PathBuf::from("/mnt/audit"));
        assert_eq!(config.flush_interval(&config.topics[0]), Duration::from_millis(100));
        assert_eq!(config.flush_interval(&config.topics[1]), Duration::from_millis(5));
    }

    #[test_case(|c: &mut CommitLogConfig| c.max_segment_bytes = 0; "zero segment size")]
    #[test_case(|c: &mut CommitLogConfig| c.queue_capacity = 0; "zero queue capacity")]
    #[test_case(|c: &mut CommitLogConfig| c.read_buffer_size = 0; "zero read buffer")]
    #[test_case(|c: &mut CommitLogConfig| c.flush_interval_ms = 0; "zero flush interval")]
    #[test_case(|c: &mut CommitLogConfig| c.zstd_level = 40; "zstd level too high")]
    #[test_case(|c: &mut CommitLogConfig| c.topics.clear(); "no topics")]
    #[test_case(|c: &mut CommitLogConfig| c.topics.push(TopicConfig::new("  ")); "blank topic name")]
    #[test_case(|c: &mut CommitLogConfig| c.topics.push(TopicConfig::new("DEFAULT")); "duplicate topic")]
    fn validation_rejects(mutate: fn(&mut CommitLogConfig)) {
        let mut config = CommitLogConfig::default();
        mutate(&mut config);
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_path_resolution() {
        let mut config = CommitLogConfig::with_topics("logs", ["orders", "audit"]);
        config.topics[1].directory = Some(PathBuf::from("audit-logs"));
        config.resolve_paths("/home/user/project");

        assert_eq!(config.directory, PathBuf::from("/home/user/project/logs"));
        assert_eq!(
            config.topic_directory(&config.topics[0]),
            PathBuf::from("/home/user/project/logs/orders")
        );
        assert_eq!(
            config.topics[1].directory,
            Some(PathBuf::from("/home/user/project/audit-logs"))
        );
    }
}
