// Per-connection produce ordering
//
// The backend commits each partition of a produce batch independently, so two
// batches written concurrently could be acknowledged out of order. The queue
// keeps one batch in flight per connection: submissions are appended to a FIFO
// and a single drain task writes the head, completes it, pops it and moves on.
//
// States, driven by `head_running`:
//   idle     → flag clear, queue empty
//   running  → flag set, drain task writing the head
//   draining → flag set, drain task looping over entries queued meanwhile
//
// The drain task is the only thing that pops a completed entry. `submit` only
// pushes, and `fail_pending` empties the queue when the connection closes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use kafka_protocol::messages::produce_response::ProduceResponse;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::constants::{CHANNEL_CLOSING_MESSAGE, ERROR_LEADER_NOT_AVAILABLE};
use super::messages::{KafkaRequest, KafkaResponse, RequestHeader, ResponseHandle, TopicProduceData};
use super::response_builders::build_error_response;

/// Performs the fanned-out write for one produce batch
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProduceWriter: Send + Sync {
    async fn write(&self, namespace: &str, topic_data: Vec<TopicProduceData>) -> ProduceResponse;
}

/// One admitted produce request
#[derive(Debug)]
pub struct ProduceEntry {
    pub header: RequestHeader,
    /// Namespace the connection was bound to when the request arrived
    pub namespace: String,
    pub topic_data: Vec<TopicProduceData>,
    pub handle: ResponseHandle,
}

struct Queued {
    seq: u64,
    entry: ProduceEntry,
}

pub struct ProduceQueue {
    entries: Mutex<VecDeque<Queued>>,
    head_running: AtomicBool,
    closed: AtomicBool,
    next_seq: AtomicU64,
    writer: Arc<dyn ProduceWriter>,
}

impl ProduceQueue {
    pub fn new(writer: Arc<dyn ProduceWriter>) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(VecDeque::new()),
            head_running: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            next_seq: AtomicU64::new(0),
            writer,
        })
    }

    /// Enqueue a batch and start draining if nothing is running
    pub fn submit(self: &Arc<Self>, entry: ProduceEntry) {
        if self.closed.load(Ordering::Acquire) {
            fail_entry(entry);
            return;
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push_back(Queued { seq, entry });
        self.try_run_head();
    }

    /// Number of batches waiting or running
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Answer every queued batch with the channel-closing error and refuse new ones
    pub fn fail_pending(&self) {
        self.closed.store(true, Ordering::Release);
        let drained: Vec<Queued> = self.entries.lock().drain(..).collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), "failing queued produce requests");
        }
        for queued in drained {
            fail_entry(queued.entry);
        }
    }

    fn try_run_head(self: &Arc<Self>) {
        if self
            .head_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let queue = Arc::clone(self);
        tokio::spawn(async move { queue.drain().await });
    }

    async fn drain(self: Arc<Self>) {
        loop {
            let head = {
                let entries = self.entries.lock();
                entries.front().map(|queued| {
                    (
                        queued.seq,
                        queued.entry.namespace.clone(),
                        queued.entry.topic_data.clone(),
                    )
                })
            };

            let Some((seq, namespace, topic_data)) = head else {
                self.head_running.store(false, Ordering::Release);
                // A submit may have pushed after the empty check but lost the CAS
                if self.is_empty()
                    || self
                        .head_running
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_err()
                {
                    return;
                }
                continue;
            };

            let response = self.writer.write(&namespace, topic_data).await;

            let finished = {
                let mut entries = self.entries.lock();
                match entries.front() {
                    Some(front) if front.seq == seq => entries.pop_front(),
                    // Already failed by fail_pending
                    _ => None,
                }
            };
            if let Some(queued) = finished {
                let header = queued.entry.header;
                let delivered = queued.entry.handle.complete(KafkaResponse::Produce {
                    correlation_id: header.correlation_id,
                    api_version: header.api_version,
                    response,
                });
                if !delivered {
                    warn!(
                        correlation_id = header.correlation_id,
                        "produce response receiver dropped"
                    );
                }
            }
        }
    }
}

fn fail_entry(entry: ProduceEntry) {
    let request = KafkaRequest::Produce {
        transactional_id: None,
        acks: 1,
        timeout_ms: 0,
        topic_data: entry.topic_data,
    };
    let response = build_error_response(
        &entry.header,
        Some(&request),
        ERROR_LEADER_NOT_AVAILABLE,
        Some(CHANNEL_CLOSING_MESSAGE.to_string()),
    );
    entry.handle.complete(response);
}
