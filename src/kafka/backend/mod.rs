// Backend collaborator contracts
//
// The gateway never talks to the log backend directly. Everything it needs
// (partition placement, node discovery, log handles, admin calls, passive
// readers, credential checks) goes through the traits below so the core can
// be driven by the in-memory implementations in `memory` or by mocks.
//
// All calls are async and may fail independently; callers translate failures
// into wire error codes, they never propagate past the session.

pub mod memory;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use super::constants::{BATCH_INDEX_BITS, ENTRY_ID_MASK, SEGMENT_ID_SHIFT};
use super::error::Result;
use super::naming::NameTranslator;

/// Address of an entry inside a segmented backend log
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogPosition {
    pub segment_id: i64,
    pub entry_id: i64,
}

impl LogPosition {
    pub fn new(segment_id: i64, entry_id: i64) -> Self {
        Self {
            segment_id,
            entry_id,
        }
    }

    /// Kafka offset of the first record stored at this position.
    ///
    /// The low bits are left free for record indexes inside one batch.
    pub fn to_offset(self) -> i64 {
        (self.segment_id << SEGMENT_ID_SHIFT) | (self.entry_id << BATCH_INDEX_BITS)
    }

    /// Position holding the batch that contains `offset`
    pub fn from_offset(offset: i64) -> Self {
        Self {
            segment_id: offset >> SEGMENT_ID_SHIFT,
            entry_id: (offset >> BATCH_INDEX_BITS) & ENTRY_ID_MASK,
        }
    }

    /// Position immediately after this one in the same segment
    pub fn next(self) -> Self {
        Self::new(self.segment_id, self.entry_id + 1)
    }
}

/// Physical address of the backend node owning a resource
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendAddress {
    pub host: String,
    pub port: i32,
}

impl BackendAddress {
    pub fn new(host: impl Into<String>, port: i32) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host_port(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Service-discovery record one backend node publishes about itself
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceRecord {
    pub data_url: Option<String>,
    pub data_url_tls: Option<String>,
    pub admin_url: Option<String>,
    pub admin_url_tls: Option<String>,
    /// Protocol name → advertised listener string, e.g. `kafka` → `PLAINTEXT://h:9092`
    pub protocols: HashMap<String, String>,
}

impl ServiceRecord {
    /// True when any of the node's four URLs mentions `host_port`
    pub fn contains_address(&self, host_port: &str) -> bool {
        [
            &self.data_url,
            &self.data_url_tls,
            &self.admin_url,
            &self.admin_url_tls,
        ]
        .into_iter()
        .flatten()
        .any(|url| url.contains(host_port))
    }

    pub fn protocol(&self, name: &str) -> Option<&str> {
        self.protocols.get(name).map(String::as_str)
    }
}

/// One record batch to append, summarized from its header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendBatch {
    pub payload: Bytes,
    pub record_count: i32,
    pub max_timestamp: i64,
}

/// One stored entry returned by a read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub position: LogPosition,
    pub publish_time: i64,
    pub payload: Bytes,
}

/// Which backend node owns a resource right now
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlacementService: Send + Sync {
    async fn owner_address_of(&self, resource: &str) -> Result<Option<BackendAddress>>;
}

/// Per-node service-discovery records
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DiscoveryRegistry: Send + Sync {
    /// Node names, formatted `host:port`
    async fn list_nodes(&self) -> Result<Vec<String>>;

    async fn data_of(&self, node: &str) -> Result<Option<ServiceRecord>>;
}

/// An attached backend log for one partition
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LogHandle: Send + Sync {
    /// Last entry written. For an empty log the entry id is -1.
    async fn last_confirmed_position(&self) -> Result<LogPosition>;

    /// First retained, non-deleted entry, None when nothing is retained
    async fn first_valid_position(&self) -> Result<Option<LogPosition>>;

    /// First entry published at or after `timestamp`
    async fn find_by_timestamp(&self, timestamp: i64) -> Result<Option<LogPosition>>;

    async fn append(&self, batch: AppendBatch) -> Result<LogPosition>;

    /// Entries from `from` onwards, stopping once `max_bytes` is reached.
    /// At least one entry is returned when any exists.
    async fn read(&self, from: LogPosition, max_bytes: usize) -> Result<Vec<LogEntry>>;
}

/// Opens (attaches) partition logs on this node
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LogStore: Send + Sync {
    async fn open_log(&self, resource: &str) -> Result<Arc<dyn LogHandle>>;
}

/// Admin-plane calls
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AdminClient: Send + Sync {
    /// Number of partitions of a fully-qualified topic, 0 when not partitioned
    async fn partition_count_of(&self, topic: &str) -> Result<i32>;

    async fn create_partitioned_topic(&self, topic: &str, partitions: i32) -> Result<()>;

    /// Every partition resource in a namespace
    async fn list_topics(&self, namespace: &str) -> Result<Vec<String>>;

    /// Role → granted actions for a namespace
    async fn namespace_permissions(&self, namespace: &str)
        -> Result<HashMap<String, Vec<String>>>;
}

/// A reader that never consumes, only acknowledges
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PassiveReader: Send + Sync {
    /// Mark everything up to and including `position` as consumed
    async fn acknowledge_cumulative(&self, position: LogPosition) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Creates passive readers with zero prefetch starting at the earliest entry
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReaderFactory: Send + Sync {
    async fn create_reader(
        &self,
        resource: &str,
        role_prefix: &str,
    ) -> Result<Arc<dyn PassiveReader>>;
}

/// Checks credentials for an auth method and returns the authenticated role
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, method: &str, data: &[u8]) -> Result<String>;
}

/// Every collaborator the gateway is built from
#[derive(Clone)]
pub struct Collaborators {
    pub placement: Arc<dyn PlacementService>,
    pub discovery: Arc<dyn DiscoveryRegistry>,
    pub log_store: Arc<dyn LogStore>,
    pub admin: Arc<dyn AdminClient>,
    pub reader_factory: Arc<dyn ReaderFactory>,
    pub authenticator: Arc<dyn Authenticator>,
    pub translator: Arc<dyn NameTranslator>,
}
