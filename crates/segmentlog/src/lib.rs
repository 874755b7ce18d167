//! # segmentlog
//!
//! A segmented, append-only commit log with Kafka-style on-disk layout.
//!
//! Each topic is a directory of segments. Producers append through a
//! per-topic [`CommitLogAppender`], which serializes concurrent calls into
//! one ordered stream and acknowledges an append only after its batch is
//! flushed. Consumers read through a [`CommitLogReader`], which never sees
//! past the topic's high-water mark. A [`CommitLogFactory`] binds both to
//! configuration.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      CommitLogFactory                         │
//! │  ┌──────────────┐   ┌──────────────────────┐   ┌───────────┐ │
//! │  │   Appender   │ → │ TopicSegmentRegistry │ ← │  Reader   │ │
//! │  │ (queue+drain)│   │  (segments + HWM)    │   │ (cached)  │ │
//! │  └──────┬───────┘   └──────────────────────┘   └─────┬─────┘ │
//! │         ▼                                            ▼       │
//! │   SegmentWriter ──► {base}.log/.index/.timeindex ◄── SegmentReader
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use segmentlog::{CommitLogConfig, CommitLogFactory};
//!
//! # async fn run() -> segmentlog::Result<()> {
//! let factory = CommitLogFactory::new(CommitLogConfig::with_topics("./logs", ["orders"]))?;
//!
//! let appender = factory.get_appender("orders")?;
//! let offset = appender.append("order-created").await?;
//!
//! let reader = factory.get_reader("Orders")?;
//! let record = reader.read_record(offset)?;
//! assert_eq!(record.map(|r| r.offset()), Some(offset));
//!
//! factory.dispose().await?;
//! # Ok(())
//! # }
//! ```

mod appender;
mod bounded_queue;
mod error;
mod factory;
mod reader;

pub use appender::{AppenderOptions, CommitLogAppender};
pub use error::{CommitLogError, Result};
pub use factory::CommitLogFactory;
pub use reader::{CommitLogReader, LogBatches, LogRecords};

pub use segmentlog_config::{CommitLogConfig, ConfigLoader, TopicConfig};
pub use segmentlog_storage::{LogRecord, RecordBatch, StorageError, TopicSegmentRegistry};
pub use segmentlog_types::{CompressionKind, Offset, Timestamp, TopicName};
