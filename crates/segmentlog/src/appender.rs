//! Per-topic appender: turns concurrent `append` calls into one ordered,
//! durable write stream.
//!
//! # Pipeline
//!
//! ```text
//! append() ──push──► BoundedQueue ──drain (one at a time)──► SegmentWriter
//!    ▲                                   │                        │
//!    └──────────── oneshot ack ◄─────────┴── registry HWM ◄───────┘
//! ```
//!
//! Every caller drains right after enqueueing, so latency does not depend
//! on the flush interval; a background task drains on that interval as a
//! safety net. The drain runs under a mutex on the blocking pool, so only
//! one thread ever touches the writer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use segmentlog_config::{CommitLogConfig, TopicConfig};
use segmentlog_storage::{
    CodecRegistry, RecordBatch, Segment, SegmentWriter, SegmentWriterOptions, StorageError,
    TopicSegmentRegistry,
};
use segmentlog_types::{CompressionKind, Offset, Timestamp, TopicName};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::bounded_queue::{BoundedQueue, PushResult};
use crate::{CommitLogError, Result};

/// Settings fixed for the lifetime of an appender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppenderOptions {
    pub writer: SegmentWriterOptions,
    pub flush_interval: Duration,
    pub queue_capacity: usize,
    /// Initial capacity of the reusable encode buffer.
    pub write_buffer_size: usize,
    pub compression: CompressionKind,
}

impl Default for AppenderOptions {
    fn default() -> Self {
        Self::from_config(&CommitLogConfig::default(), &TopicConfig::default())
    }
}

impl AppenderOptions {
    pub fn from_config(config: &CommitLogConfig, topic: &TopicConfig) -> Self {
        Self {
            writer: SegmentWriterOptions {
                max_segment_bytes: config.max_segment_bytes,
                index_interval_bytes: config.index_interval_bytes,
                time_index_interval_ms: config.time_index_interval_ms,
            },
            flush_interval: config.flush_interval(topic),
            queue_capacity: config.queue_capacity,
            write_buffer_size: config.write_buffer_size,
            compression: config.compression,
        }
    }
}

#[derive(Debug)]
enum AppendPayload {
    /// One record.
    Record(Bytes),
    /// Several records written as one batch.
    Records(Vec<Bytes>),
    /// An encoded batch whose offsets get reassigned.
    Encoded(Bytes),
}

#[derive(Debug)]
struct AppendRequest {
    payload: AppendPayload,
    ack: oneshot::Sender<Result<Offset>>,
}

/// Writer-side state; only touched inside the drain lock.
struct DrainState {
    writer: Option<SegmentWriter>,
    options: SegmentWriterOptions,
    codecs: CodecRegistry,
    compression: CompressionKind,
    buffer: BytesMut,
}

impl DrainState {
    /// Writes one request at the current high-water mark.
    ///
    /// The high-water mark only moves after the write is durable, so a
    /// failed request consumes no offsets.
    fn append(
        &mut self,
        topic: &TopicName,
        registry: &TopicSegmentRegistry,
        payload: AppendPayload,
    ) -> Result<Offset> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(CommitLogError::disposed(topic));
        };

        let base = registry.high_water_mark();
        let batch = match payload {
            AppendPayload::Record(payload) => {
                RecordBatch::from_payloads(base, Timestamp::now(), [payload])
            }
            AppendPayload::Records(payloads) => {
                if payloads.is_empty() {
                    return Err(CommitLogError::EmptyBatch);
                }
                RecordBatch::from_payloads(base, Timestamp::now(), payloads)
            }
            AppendPayload::Encoded(bytes) => {
                let (batch, consumed) = RecordBatch::decode(&bytes, &self.codecs)?;
                if consumed != bytes.len() {
                    return Err(StorageError::CorruptFormat {
                        reason: format!(
                            "{} trailing bytes after encoded batch",
                            bytes.len() - consumed
                        ),
                    }
                    .into());
                }
                if batch.is_empty() {
                    return Err(CommitLogError::EmptyBatch);
                }
                batch.rebase(base)
            }
        }
        .with_compression(self.compression);

        if writer.should_roll() {
            let next = SegmentWriter::open(Segment::new(registry.directory(), base), self.options)?;
            let mut previous = std::mem::replace(writer, next);
            registry.update_active_segment(writer.segment().clone());
            tracing::info!(
                %topic,
                old_base_offset = %previous.segment().base_offset(),
                new_base_offset = %base,
                "rolled segment"
            );
            if let Err(e) = previous.close() {
                tracing::warn!(%topic, error = %e, "failed to close sealed segment writer");
            }
        }

        self.buffer.clear();
        batch.encode_into(&self.codecs, &mut self.buffer)?;
        writer.append(&self.buffer, batch.base_offset(), batch.last_offset())?;
        registry.update_high_water_mark(batch.next_offset());

        Ok(base)
    }
}

struct AppenderShared {
    topic: TopicName,
    registry: Arc<TopicSegmentRegistry>,
    queue: BoundedQueue<AppendRequest>,
    drain: Mutex<DrainState>,
    closed: AtomicBool,
}

impl AppenderShared {
    fn lock(&self) -> MutexGuard<'_, DrainState> {
        self.drain.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Writes every queued request in FIFO order, acknowledging each one.
    /// A failed request is rejected and the drain moves on.
    fn drain(&self) {
        let mut state = self.lock();
        self.drain_locked(&mut state);
    }

    fn drain_locked(&self, state: &mut DrainState) {
        while let Some(request) = self.queue.try_pop() {
            let result = state.append(&self.topic, &self.registry, request.payload);
            if let Err(e) = &result {
                tracing::warn!(topic = %self.topic, error = %e, "append rejected");
            }
            // The caller may have stopped waiting.
            let _ = request.ack.send(result);
        }
    }

    /// Final drain, then rejects whatever arrives afterwards and closes the
    /// writer.
    fn shutdown(&self) -> Result<()> {
        let mut state = self.lock();
        self.drain_locked(&mut state);

        let writer = state.writer.take();
        while let Some(request) = self.queue.try_pop() {
            let _ = request.ack.send(Err(CommitLogError::disposed(&self.topic)));
        }

        if let Some(mut writer) = writer {
            writer.close()?;
        }
        Ok(())
    }
}

/// Appends records to one topic.
///
/// Shared behind an `Arc` by every producer of the topic. Offsets are
/// assigned in the order requests reach the queue, and a request is
/// acknowledged only after its batch is flushed to disk.
pub struct CommitLogAppender {
    shared: Arc<AppenderShared>,
    flush_task: Mutex<Option<JoinHandle<()>>>,
}

impl CommitLogAppender {
    /// Opens a writer on the registry's active segment and starts the
    /// background flush task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(
        registry: Arc<TopicSegmentRegistry>,
        codecs: CodecRegistry,
        options: AppenderOptions,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| CommitLogError::Runtime(e.to_string()))?;
        let writer = SegmentWriter::open(registry.active_segment(), options.writer)?;
        let topic = registry.topic().clone();

        let shared = Arc::new(AppenderShared {
            topic: topic.clone(),
            registry,
            queue: BoundedQueue::new(options.queue_capacity),
            drain: Mutex::new(DrainState {
                writer: Some(writer),
                options: options.writer,
                codecs,
                compression: options.compression,
                buffer: BytesMut::with_capacity(options.write_buffer_size),
            }),
            closed: AtomicBool::new(false),
        });

        let flush_task = runtime.spawn(flush_periodically(
            Arc::downgrade(&shared),
            options.flush_interval,
        ));

        tracing::info!(
            %topic,
            high_water_mark = %shared.registry.high_water_mark(),
            flush_interval_ms = options.flush_interval.as_millis() as u64,
            "appender started"
        );

        Ok(Self {
            shared,
            flush_task: Mutex::new(Some(flush_task)),
        })
    }

    pub fn topic(&self) -> &TopicName {
        &self.shared.topic
    }

    /// Next offset to be assigned.
    pub fn high_water_mark(&self) -> Offset {
        self.shared.registry.high_water_mark()
    }

    /// Requests waiting for a drain.
    pub fn pending(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Appends one record and returns its offset once it is on disk.
    pub async fn append(&self, payload: impl Into<Bytes>) -> Result<Offset> {
        self.submit(AppendPayload::Record(payload.into())).await
    }

    /// Appends several records as one batch and returns the first offset.
    /// The records get consecutive offsets.
    pub async fn append_batch(&self, payloads: Vec<Bytes>) -> Result<Offset> {
        if payloads.is_empty() {
            return Err(CommitLogError::EmptyBatch);
        }
        self.submit(AppendPayload::Records(payloads)).await
    }

    /// Appends an already encoded batch. Its checksum is verified and its
    /// records are moved to offsets starting at the high-water mark.
    pub async fn append_encoded(&self, batch: Bytes) -> Result<Offset> {
        self.submit(AppendPayload::Encoded(batch)).await
    }

    /// Drains the queue now instead of waiting for the flush interval.
    pub async fn flush(&self) -> Result<()> {
        self.drain().await
    }

    async fn submit(&self, payload: AppendPayload) -> Result<Offset> {
        let (ack, done) = oneshot::channel();
        let mut request = AppendRequest { payload, ack };

        loop {
            if self.is_disposed() {
                return Err(CommitLogError::disposed(self.topic()));
            }
            match self.shared.queue.try_push(request) {
                PushResult::Ok => break,
                PushResult::Backpressure(back) => {
                    request = back;
                    self.drain().await?;
                }
            }
        }

        self.drain().await?;
        done.await
            .map_err(|_| CommitLogError::disposed(self.topic()))?
    }

    async fn drain(&self) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        tokio::task::spawn_blocking(move || shared.drain()).await?;
        Ok(())
    }

    /// Stops accepting appends, cancels the flush task, writes what is
    /// already queued, rejects anything that raced in afterwards with
    /// [`CommitLogError::Disposed`], and closes the segment.
    ///
    /// Calling it again is a no-op.
    pub async fn dispose(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let task = self
            .flush_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
            // Cancellation is the expected outcome.
            let _ = task.await;
        }

        let shared = Arc::clone(&self.shared);
        tokio::task::spawn_blocking(move || shared.shutdown()).await??;

        tracing::info!(
            topic = %self.shared.topic,
            high_water_mark = %self.high_water_mark(),
            "appender disposed"
        );
        Ok(())
    }
}

impl Drop for CommitLogAppender {
    fn drop(&mut self) {
        let task = self
            .flush_task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

impl std::fmt::Debug for CommitLogAppender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitLogAppender")
            .field("topic", &self.shared.topic)
            .field("pending", &self.pending())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

/// Drains on every tick until the appender is gone.
async fn flush_periodically(shared: Weak<AppenderShared>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(shared) = shared.upgrade() else {
            break;
        };
        if shared.queue.is_empty() {
            continue;
        }
        let topic = shared.topic.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || shared.drain()).await {
            tracing::warn!(%topic, error = %e, "background drain failed");
        }
    }
}
