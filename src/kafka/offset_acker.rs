// Group offset acknowledgment
//
// Committed group offsets are the system of record. The backend tracks
// consumption on its own, through reader cursors, so every commit is also
// forwarded as a cumulative acknowledgment on a passive reader scoped to the
// group. Readers are created lazily, once per (group, partition resource),
// and closed when the group is deleted or the gateway shuts down.
//
// Forwarding is best effort: failures are logged and never reach the client.
// Handlers use the `spawn_*` variants so a slow backend never holds up a
// group response.

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::{LogPosition, PassiveReader, ReaderFactory};
use super::error::Result;

type ReaderCell = Arc<OnceCell<Arc<dyn PassiveReader>>>;

pub struct OffsetAcker {
    reader_factory: Arc<dyn ReaderFactory>,
    /// group id → partition resource → reader
    readers: DashMap<String, DashMap<String, ReaderCell>>,
}

impl OffsetAcker {
    pub fn new(reader_factory: Arc<dyn ReaderFactory>) -> Self {
        Self {
            reader_factory,
            readers: DashMap::new(),
        }
    }

    /// Make sure a reader exists for each assigned partition of `group`
    pub async fn track(&self, group: &str, resources: &[String]) {
        let attempts = resources.iter().map(|resource| async move {
            if let Err(e) = self.reader_for(group, resource).await {
                warn!(group, resource = %resource, error = %e, "failed to create offset reader");
            }
        });
        join_all(attempts).await;
    }

    /// Run [`Self::track`] in the background
    pub fn spawn_track(self: &Arc<Self>, group: &str, resources: Vec<String>) -> JoinHandle<()> {
        let acker = Arc::clone(self);
        let group = group.to_string();
        tokio::spawn(async move { acker.track(&group, &resources).await })
    }

    /// Forward committed `(partition resource, offset)` pairs to the backend
    ///
    /// Negative offsets carry no position and are skipped.
    pub async fn acknowledge(&self, group: &str, offsets: &[(String, i64)]) {
        let acks = offsets
            .iter()
            .filter(|(resource, offset)| {
                if *offset < 0 {
                    debug!(group, resource = %resource, offset, "skipping ack without position");
                }
                *offset >= 0
            })
            .map(|(resource, offset)| async move {
                let reader = match self.reader_for(group, resource).await {
                    Ok(reader) => reader,
                    Err(e) => {
                        warn!(group, resource = %resource, error = %e, "no reader to acknowledge with");
                        return;
                    }
                };
                let position = LogPosition::from_offset(*offset);
                if let Err(e) = reader.acknowledge_cumulative(position).await {
                    warn!(
                        group,
                        resource = %resource,
                        offset,
                        error = %e,
                        "cumulative acknowledgment failed"
                    );
                }
            });
        join_all(acks).await;
    }

    /// Run [`Self::acknowledge`] in the background
    pub fn spawn_acknowledge(
        self: &Arc<Self>,
        group: &str,
        offsets: Vec<(String, i64)>,
    ) -> JoinHandle<()> {
        let acker = Arc::clone(self);
        let group = group.to_string();
        tokio::spawn(async move { acker.acknowledge(&group, &offsets).await })
    }

    /// Close every reader belonging to `groups`
    ///
    /// A failing close is logged and does not stop the others.
    pub async fn release(&self, groups: &[String]) {
        let mut closing = Vec::new();
        for group in groups {
            let Some((group, partitions)) = self.readers.remove(group) else {
                continue;
            };
            for (resource, cell) in partitions {
                if let Some(reader) = cell.get() {
                    closing.push((group.clone(), resource, Arc::clone(reader)));
                }
            }
        }

        let closes = closing.into_iter().map(|(group, resource, reader)| async move {
            match reader.close().await {
                Ok(()) => debug!(group = %group, resource = %resource, "closed offset reader"),
                Err(e) => warn!(
                    group = %group,
                    resource = %resource,
                    error = %e,
                    "failed to close offset reader"
                ),
            }
        });
        join_all(closes).await;
    }

    /// Close the readers of every tracked group
    pub async fn close_all(&self) {
        let groups: Vec<String> = self.readers.iter().map(|entry| entry.key().clone()).collect();
        if groups.is_empty() {
            return;
        }
        info!(groups = groups.len(), "closing offset readers");
        self.release(&groups).await;
    }

    /// Number of partitions with a live reader for `group`
    pub fn tracked_count(&self, group: &str) -> usize {
        self.readers
            .get(group)
            .map(|partitions| partitions.iter().filter(|c| c.value().initialized()).count())
            .unwrap_or(0)
    }

    async fn reader_for(&self, group: &str, resource: &str) -> Result<Arc<dyn PassiveReader>> {
        let cell = {
            let partitions = self.readers.entry(group.to_string()).or_default();
            let cell = partitions.entry(resource.to_string()).or_default().value().clone();
            cell
        };

        let reader = cell
            .get_or_try_init(|| async {
                debug!(group, resource, "creating offset reader");
                self.reader_factory.create_reader(resource, group).await
            })
            .await?;
        Ok(Arc::clone(reader))
    }
}
