//! Flight data logger.
//!
//! Append-only, and strictly off the control path: producers enqueue with
//! `try_send` semantics and never block or fail a safety decision. The
//! writer task on the other side of the queue assigns sequence numbers as it
//! persists, so the on-media record stream is gapless and strictly
//! increasing even when queue pressure forced drops upstream.
//!
//! Drop policy under pressure: raw sensor samples go first, then estimates.
//! Phase transitions, ignition events, and faults ride a reserved slice of
//! the queue and are never dropped in favor of bulk data.

mod frame;
mod sink;

pub use frame::{FrameReader, MAX_FRAME, encode_frame};
pub use sink::{LogSink, SdCardSink};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use portable_atomic::{AtomicU32, Ordering};
use serde::{Deserialize, Serialize};

use crate::error::{FlightError, StorageFault};
use crate::estimator::StateEstimate;
use crate::flight::{FlightPhase, Transition};
use crate::pyro::PyroEvent;
use crate::sensors::{Micros, SensorSample};

/// Queue depth between producers and the writer task.
pub const LOG_QUEUE_DEPTH: usize = 128;

/// Slots that only phase/ignition/fault records may consume.
pub const CRITICAL_RESERVE: usize = 16;

/// One persisted flight-log entry. Write-once; `seq` has no gaps on media.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct LogRecord {
    pub seq: u32,
    pub timestamp_us: Micros,
    pub payload: RecordPayload,
}

/// A record accepted by the queue, not yet sequenced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueuedRecord {
    pub timestamp_us: Micros,
    pub payload: RecordPayload,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub enum RecordPayload {
    Sample(SensorSample),
    Estimate(StateEstimate),
    Phase(Transition),
    Ignition(PyroEvent),
    Fault(FaultRecord),
}

/// Every fault is logged with the phase it occurred in.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct FaultRecord {
    pub phase: FlightPhase,
    pub error: FlightError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Bulk,
    Medium,
    Critical,
}

impl RecordPayload {
    pub const fn priority(&self) -> Priority {
        match self {
            Self::Sample(_) => Priority::Bulk,
            Self::Estimate(_) => Priority::Medium,
            Self::Phase(_) | Self::Ignition(_) | Self::Fault(_) => Priority::Critical,
        }
    }
}

/// Drop counters, readable for diagnostics and the logger health record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DropStats {
    pub samples: u32,
    pub estimates: u32,
    pub critical: u32,
}

/// The producer/consumer queue. Declared `static` next to the tasks that
/// share it.
pub struct LogQueue {
    channel: Channel<CriticalSectionRawMutex, QueuedRecord, LOG_QUEUE_DEPTH>,
    dropped_samples: AtomicU32,
    dropped_estimates: AtomicU32,
    dropped_critical: AtomicU32,
}

impl LogQueue {
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
            dropped_samples: AtomicU32::new(0),
            dropped_estimates: AtomicU32::new(0),
            dropped_critical: AtomicU32::new(0),
        }
    }

    /// Enqueue without blocking. Bulk records are refused once the queue is
    /// down to the critical reserve.
    pub fn push(&self, timestamp_us: Micros, payload: RecordPayload) {
        let priority = payload.priority();
        let free = LOG_QUEUE_DEPTH - self.channel.len();

        if priority != Priority::Critical && free <= CRITICAL_RESERVE {
            self.count_drop(priority);
            return;
        }

        let record = QueuedRecord {
            timestamp_us,
            payload,
        };
        if self.channel.try_send(record).is_err() {
            self.count_drop(priority);
        }
    }

    fn count_drop(&self, priority: Priority) {
        let counter = match priority {
            Priority::Bulk => &self.dropped_samples,
            Priority::Medium => &self.dropped_estimates,
            Priority::Critical => &self.dropped_critical,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Await the next record (writer task side).
    pub async fn next(&self) -> QueuedRecord {
        self.channel.receive().await
    }

    pub fn try_next(&self) -> Option<QueuedRecord> {
        self.channel.try_receive().ok()
    }

    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.len() == 0
    }

    pub fn stats(&self) -> DropStats {
        DropStats {
            samples: self.dropped_samples.load(Ordering::Relaxed),
            estimates: self.dropped_estimates.load(Ordering::Relaxed),
            critical: self.dropped_critical.load(Ordering::Relaxed),
        }
    }
}

/// Sequences, frames, and persists records. Runs in the writer task, the
/// only place sequence numbers are assigned.
pub struct LogWriter<S: LogSink> {
    sink: S,
    next_seq: u32,
    skipped_bulk: u32,
}

impl<S: LogSink> LogWriter<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            next_seq: 0,
            skipped_bulk: 0,
        }
    }

    /// Persist one record. When the sink reports low space, bulk records are
    /// skipped so the remaining capacity is spent on the records that matter
    /// for post-flight analysis.
    pub fn write(&mut self, record: &QueuedRecord) -> Result<(), StorageFault> {
        if self.sink.low_space() && record.payload.priority() == Priority::Bulk {
            self.skipped_bulk = self.skipped_bulk.wrapping_add(1);
            return Ok(());
        }

        let sequenced = LogRecord {
            seq: self.next_seq,
            timestamp_us: record.timestamp_us,
            payload: record.payload,
        };

        let mut scratch = [0u8; MAX_FRAME];
        let frame = encode_frame(&sequenced, &mut scratch)?;
        self.sink.append(frame)?;
        self.next_seq = self.next_seq.wrapping_add(1);
        Ok(())
    }

    /// Force written records durable (sink-dependent; the SD sink is durable
    /// per append already).
    pub fn sync(&mut self) -> Result<(), StorageFault> {
        self.sink.sync()
    }

    pub fn skipped_bulk(&self) -> u32 {
        self.skipped_bulk
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}
