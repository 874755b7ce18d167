//! Topic-keyed access to appenders and readers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use segmentlog_config::{CommitLogConfig, TopicConfig};
use segmentlog_storage::{CodecRegistry, TopicSegmentRegistry};
use segmentlog_types::TopicName;

use crate::{AppenderOptions, CommitLogAppender, CommitLogError, CommitLogReader, Result};

/// Everything opened for one topic. The registry is shared by the
/// appender and the reader.
struct TopicHandles {
    name: TopicName,
    registry: Arc<TopicSegmentRegistry>,
    appender: Option<Arc<CommitLogAppender>>,
    reader: Option<Arc<CommitLogReader>>,
}

/// Hands out one appender and one reader per configured topic.
///
/// Topics are opened (and recovered from disk) on first use; later calls
/// return the same instances. Topic names match case-insensitively.
pub struct CommitLogFactory {
    config: CommitLogConfig,
    codecs: CodecRegistry,
    topics: Mutex<HashMap<String, TopicHandles>>,
    disposed: AtomicBool,
}

impl CommitLogFactory {
    /// # Errors
    ///
    /// [`CommitLogError::InvalidConfig`] if the configuration fails validation.
    pub fn new(config: CommitLogConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            codecs: CodecRegistry::with_zstd_level(config.zstd_level),
            config,
            topics: Mutex::new(HashMap::new()),
            disposed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &CommitLogConfig {
        &self.config
    }

    fn topics(&self) -> MutexGuard<'_, HashMap<String, TopicHandles>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn topic_config(&self, topic: &str) -> Result<&TopicConfig> {
        self.config
            .topic(topic)
            .ok_or_else(|| CommitLogError::TopicNotConfigured {
                topic: topic.to_string(),
            })
    }

    /// Runs `f` on the topic's handles, opening the topic first if needed.
    fn with_topic<T>(
        &self,
        topic: &str,
        f: impl FnOnce(&TopicConfig, &mut TopicHandles) -> Result<T>,
    ) -> Result<T> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(CommitLogError::disposed(topic));
        }
        let topic_config = self.topic_config(topic)?;
        let key = topic_config.topic_name().key();

        let mut topics = self.topics();
        let handles = match topics.entry(key) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                let name = topic_config.topic_name();
                let registry = TopicSegmentRegistry::open(
                    name.clone(),
                    self.config.topic_directory(topic_config),
                    topic_config.base_offset(),
                    self.config.read_buffer_size,
                )?;
                entry.insert(TopicHandles {
                    name,
                    registry: Arc::new(registry),
                    appender: None,
                    reader: None,
                })
            }
        };
        f(topic_config, handles)
    }

    /// Returns the topic's appender, creating it on first use.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// [`CommitLogError::TopicNotConfigured`] for unknown topics.
    pub fn get_appender(&self, topic: &str) -> Result<Arc<CommitLogAppender>> {
        self.with_topic(topic, |topic_config, handles| {
            if let Some(appender) = &handles.appender {
                return Ok(Arc::clone(appender));
            }
            let appender = Arc::new(CommitLogAppender::open(
                Arc::clone(&handles.registry),
                self.codecs,
                AppenderOptions::from_config(&self.config, topic_config),
            )?);
            handles.appender = Some(Arc::clone(&appender));
            Ok(appender)
        })
    }

    /// Returns the topic's reader, creating it on first use.
    pub fn get_reader(&self, topic: &str) -> Result<Arc<CommitLogReader>> {
        self.with_topic(topic, |_, handles| {
            let registry = Arc::clone(&handles.registry);
            let reader = handles.reader.get_or_insert_with(|| {
                Arc::new(CommitLogReader::new(
                    registry,
                    self.codecs,
                    self.config.read_buffer_size,
                ))
            });
            Ok(Arc::clone(reader))
        })
    }

    /// Names of the topics opened so far.
    pub fn open_topics(&self) -> Vec<TopicName> {
        self.topics().values().map(|h| h.name.clone()).collect()
    }

    /// Disposes every appender and closes every reader. Later `get_*` calls
    /// fail with [`CommitLogError::Disposed`]. Calling it again is a no-op.
    ///
    /// Every topic is disposed even if one fails; the first error is returned.
    pub async fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let handles: Vec<TopicHandles> = self.topics().drain().map(|(_, h)| h).collect();
        let mut first_error = None;
        for topic in handles {
            if let Some(appender) = topic.appender {
                if let Err(e) = appender.dispose().await {
                    tracing::error!(topic = %topic.name, error = %e, "failed to dispose appender");
                    first_error.get_or_insert(e);
                }
            }
            if let Some(reader) = topic.reader {
                reader.close();
            }
        }

        tracing::info!("commit log factory disposed");
        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for CommitLogFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitLogFactory")
            .field("directory", &self.config.directory)
            .field("open_topics", &self.open_topics())
            .field("disposed", &self.disposed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}
