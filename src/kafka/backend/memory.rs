// In-memory backend
//
// Process-local implementations of every collaborator trait. They back the
// integration tests and let the gateway run standalone without a backend
// cluster. Each one keeps a few counters so tests can assert how often the
// core called into the backend.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use super::{
    AdminClient, AppendBatch, Authenticator, BackendAddress, Collaborators, DiscoveryRegistry,
    LogEntry, LogHandle, LogPosition, LogStore, PassiveReader, PlacementService, ReaderFactory,
    ServiceRecord,
};
use crate::kafka::constants::{KAFKA_PROTOCOL_NAME, PERSISTENT_DOMAIN};
use crate::kafka::error::{KafkaError, Result};
use crate::kafka::naming::{NameTranslator, PartitionedNameTranslator};

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Clone)]
struct StoredEntry {
    publish_time: i64,
    payload: bytes::Bytes,
}

/// A single-segment log kept in memory
///
/// Publish times never go backwards, so entries stay sorted by time and
/// `find_by_timestamp` can binary search.
#[derive(Debug)]
pub struct MemoryLog {
    segment_id: i64,
    entries: RwLock<Vec<StoredEntry>>,
    /// Entries below this index are treated as deleted
    first_retained: AtomicUsize,
    append_delay: Mutex<Duration>,
    fail_appends: AtomicBool,
}

impl MemoryLog {
    pub fn new(segment_id: i64) -> Self {
        Self {
            segment_id,
            entries: RwLock::new(Vec::new()),
            first_retained: AtomicUsize::new(0),
            append_delay: Mutex::new(Duration::ZERO),
            fail_appends: AtomicBool::new(false),
        }
    }

    /// Slow every subsequent append down by `delay`
    pub fn set_append_delay(&self, delay: Duration) {
        *self.append_delay.lock() = delay;
    }

    /// Make every subsequent append fail with a storage error
    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Drop every entry below `entry_id` from the readable range
    pub fn truncate_before(&self, entry_id: i64) {
        let index = entry_id.max(0) as usize;
        self.first_retained.fetch_max(index, Ordering::SeqCst);
    }

    /// Append synchronously with an explicit publish time
    pub fn push_at(&self, payload: bytes::Bytes, publish_time: i64) -> LogPosition {
        let mut entries = self.entries.write();
        let floor = entries.last().map(|e| e.publish_time).unwrap_or(i64::MIN);
        entries.push(StoredEntry {
            publish_time: publish_time.max(floor),
            payload,
        });
        LogPosition::new(self.segment_id, entries.len() as i64 - 1)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn position(&self, index: usize) -> LogPosition {
        LogPosition::new(self.segment_id, index as i64)
    }
}

#[async_trait]
impl LogHandle for MemoryLog {
    async fn last_confirmed_position(&self) -> Result<LogPosition> {
        let len = self.entries.read().len() as i64;
        Ok(LogPosition::new(self.segment_id, len - 1))
    }

    async fn first_valid_position(&self) -> Result<Option<LogPosition>> {
        let start = self.first_retained.load(Ordering::SeqCst);
        let len = self.entries.read().len();
        Ok((start < len).then(|| self.position(start)))
    }

    async fn find_by_timestamp(&self, timestamp: i64) -> Result<Option<LogPosition>> {
        let start = self.first_retained.load(Ordering::SeqCst);
        let entries = self.entries.read();
        if start >= entries.len() {
            return Ok(None);
        }
        let index = start + entries[start..].partition_point(|e| e.publish_time < timestamp);
        Ok((index < entries.len()).then(|| self.position(index)))
    }

    async fn append(&self, batch: AppendBatch) -> Result<LogPosition> {
        let delay = *self.append_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(KafkaError::Storage("append rejected by log".into()));
        }
        let publish_time = if batch.max_timestamp > 0 {
            batch.max_timestamp
        } else {
            now_millis()
        };
        Ok(self.push_at(batch.payload, publish_time))
    }

    async fn read(&self, from: LogPosition, max_bytes: usize) -> Result<Vec<LogEntry>> {
        if from.segment_id > self.segment_id {
            return Ok(Vec::new());
        }
        let requested = if from.segment_id < self.segment_id {
            0
        } else {
            from.entry_id.max(0) as usize
        };
        let start = requested.max(self.first_retained.load(Ordering::SeqCst));

        let entries = self.entries.read();
        let mut out = Vec::new();
        let mut total = 0usize;
        for (index, entry) in entries.iter().enumerate().skip(start) {
            if !out.is_empty() && total + entry.payload.len() > max_bytes {
                break;
            }
            total += entry.payload.len();
            out.push(LogEntry {
                position: self.position(index),
                publish_time: entry.publish_time,
                payload: entry.payload.clone(),
            });
        }
        Ok(out)
    }
}

/// Attaches `MemoryLog`s, creating them on first open
#[derive(Debug, Default)]
pub struct MemoryLogStore {
    logs: DashMap<String, Arc<MemoryLog>>,
    opens: AtomicUsize,
    unavailable: RwLock<HashSet<String>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The log behind `resource`, created if needed
    pub fn log(&self, resource: &str) -> Arc<MemoryLog> {
        self.logs
            .entry(resource.to_string())
            .or_insert_with(|| Arc::new(MemoryLog::new(0)))
            .clone()
    }

    /// Number of successful `open_log` calls so far
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Make `open_log` fail for `resource`
    pub fn set_unavailable(&self, resource: &str, unavailable: bool) {
        let mut set = self.unavailable.write();
        if unavailable {
            set.insert(resource.to_string());
        } else {
            set.remove(resource);
        }
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn open_log(&self, resource: &str) -> Result<Arc<dyn LogHandle>> {
        // Yield so concurrent attach attempts actually overlap
        tokio::task::yield_now().await;
        if self.unavailable.read().contains(resource) {
            return Err(KafkaError::LeaderNotAvailable(format!(
                "cannot attach {}",
                resource
            )));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        let log: Arc<dyn LogHandle> = self.log(resource);
        Ok(log)
    }
}

/// Placement table: every resource is owned by `default_owner` unless overridden
#[derive(Debug, Default)]
pub struct StaticPlacement {
    owners: DashMap<String, Option<BackendAddress>>,
    default_owner: RwLock<Option<BackendAddress>>,
    lookups: AtomicUsize,
}

impl StaticPlacement {
    pub fn new(default_owner: Option<BackendAddress>) -> Self {
        Self {
            default_owner: RwLock::new(default_owner),
            ..Self::default()
        }
    }

    pub fn set_owner(&self, resource: &str, owner: Option<BackendAddress>) {
        self.owners.insert(resource.to_string(), owner);
    }

    pub fn set_default_owner(&self, owner: Option<BackendAddress>) {
        *self.default_owner.write() = owner;
    }

    /// Number of `owner_address_of` calls so far
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlacementService for StaticPlacement {
    async fn owner_address_of(&self, resource: &str) -> Result<Option<BackendAddress>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if let Some(owner) = self.owners.get(resource) {
            return Ok(owner.clone());
        }
        Ok(self.default_owner.read().clone())
    }
}

/// Discovery registry with records registered up front
#[derive(Debug, Default)]
pub struct StaticDiscovery {
    records: DashMap<String, ServiceRecord>,
}

impl StaticDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node that serves data on `address` and Kafka on `kafka_listeners`
    pub fn register(&self, address: &BackendAddress, kafka_listeners: &str) {
        let mut protocols = HashMap::new();
        protocols.insert(KAFKA_PROTOCOL_NAME.to_string(), kafka_listeners.to_string());
        let record = ServiceRecord {
            data_url: Some(format!("pulsar://{}", address.host_port())),
            admin_url: Some(format!("http://{}", address.host_port())),
            protocols,
            ..ServiceRecord::default()
        };
        self.records.insert(address.host_port(), record);
    }

    pub fn insert(&self, node: &str, record: ServiceRecord) {
        self.records.insert(node.to_string(), record);
    }
}

#[async_trait]
impl DiscoveryRegistry for StaticDiscovery {
    async fn list_nodes(&self) -> Result<Vec<String>> {
        Ok(self.records.iter().map(|r| r.key().clone()).collect())
    }

    async fn data_of(&self, node: &str) -> Result<Option<ServiceRecord>> {
        Ok(self.records.get(node).map(|r| r.value().clone()))
    }
}

/// Admin plane over an in-memory topic table
pub struct MemoryAdmin {
    /// Fully-qualified topic → partition count
    topics: DashMap<String, i32>,
    permissions: DashMap<String, HashMap<String, Vec<String>>>,
    translator: Arc<dyn NameTranslator>,
    creates: AtomicUsize,
}

impl MemoryAdmin {
    pub fn new(translator: Arc<dyn NameTranslator>) -> Self {
        Self {
            topics: DashMap::new(),
            permissions: DashMap::new(),
            translator,
            creates: AtomicUsize::new(0),
        }
    }

    /// Register a fully-qualified topic with `partitions` partitions
    pub fn add_topic(&self, full_topic: &str, partitions: i32) {
        self.topics.insert(full_topic.to_string(), partitions);
    }

    /// Grant `role` the given actions on `namespace`
    pub fn grant(&self, namespace: &str, role: &str, actions: &[&str]) {
        self.permissions
            .entry(namespace.to_string())
            .or_default()
            .insert(
                role.to_string(),
                actions.iter().map(|a| a.to_string()).collect(),
            );
    }

    /// Number of `create_partitioned_topic` calls so far
    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AdminClient for MemoryAdmin {
    async fn partition_count_of(&self, topic: &str) -> Result<i32> {
        Ok(self.topics.get(topic).map(|c| *c).unwrap_or(0))
    }

    async fn create_partitioned_topic(&self, topic: &str, partitions: i32) -> Result<()> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.topics.insert(topic.to_string(), partitions);
        Ok(())
    }

    async fn list_topics(&self, namespace: &str) -> Result<Vec<String>> {
        let prefix = format!("{}{}/", PERSISTENT_DOMAIN, namespace);
        let mut resources = Vec::new();
        for topic in self.topics.iter() {
            if !topic.key().starts_with(&prefix) {
                continue;
            }
            if *topic.value() == 0 {
                resources.push(topic.key().clone());
            } else {
                resources.extend(
                    (0..*topic.value()).map(|p| self.translator.partition_resource(topic.key(), p)),
                );
            }
        }
        resources.sort();
        Ok(resources)
    }

    async fn namespace_permissions(
        &self,
        namespace: &str,
    ) -> Result<HashMap<String, Vec<String>>> {
        Ok(self
            .permissions
            .get(namespace)
            .map(|p| p.clone())
            .unwrap_or_default())
    }
}

/// Passive reader that remembers the last acknowledged position
#[derive(Debug)]
pub struct MemoryReader {
    pub resource: String,
    pub role_prefix: String,
    acked: Mutex<Option<LogPosition>>,
    closed: AtomicBool,
    fail_close: AtomicBool,
}

impl MemoryReader {
    pub fn acknowledged(&self) -> Option<LogPosition> {
        *self.acked.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn set_fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PassiveReader for MemoryReader {
    async fn acknowledge_cumulative(&self, position: LogPosition) -> Result<()> {
        if self.is_closed() {
            return Err(KafkaError::Backend(format!(
                "reader on {} already closed",
                self.resource
            )));
        }
        let mut acked = self.acked.lock();
        *acked = Some(acked.map_or(position, |p| p.max(position)));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(KafkaError::Backend(format!(
                "close of {} failed",
                self.resource
            )));
        }
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Creates `MemoryReader`s and keeps every one it handed out
#[derive(Debug, Default)]
pub struct MemoryReaderFactory {
    created: Mutex<Vec<Arc<MemoryReader>>>,
}

impl MemoryReaderFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().len()
    }

    /// Every reader created for `resource`, oldest first
    pub fn readers_for(&self, resource: &str) -> Vec<Arc<MemoryReader>> {
        self.created
            .lock()
            .iter()
            .filter(|r| r.resource == resource)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ReaderFactory for MemoryReaderFactory {
    async fn create_reader(
        &self,
        resource: &str,
        role_prefix: &str,
    ) -> Result<Arc<dyn PassiveReader>> {
        tokio::task::yield_now().await;
        let reader = Arc::new(MemoryReader {
            resource: resource.to_string(),
            role_prefix: role_prefix.to_string(),
            acked: Mutex::new(None),
            closed: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
        });
        self.created.lock().push(reader.clone());
        let reader: Arc<dyn PassiveReader> = reader;
        Ok(reader)
    }
}

/// Token authenticator: `method` must be `token`, `data` is the token
#[derive(Debug, Default)]
pub struct StaticAuthenticator {
    tokens: DashMap<String, String>,
}

impl StaticAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(self, token: &str, role: &str) -> Self {
        self.add_token(token, role);
        self
    }

    pub fn add_token(&self, token: &str, role: &str) {
        self.tokens.insert(token.to_string(), role.to_string());
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn authenticate(&self, method: &str, data: &[u8]) -> Result<String> {
        if method != "token" {
            return Err(KafkaError::Authentication(format!(
                "No authentication provider for method {}",
                method
            )));
        }
        let token = String::from_utf8_lossy(data);
        self.tokens
            .get(token.as_ref())
            .map(|role| role.value().clone())
            .ok_or_else(|| KafkaError::Authentication("Invalid token".into()))
    }
}

/// A complete single-node in-memory backend
///
/// `local` owns every resource and advertises `kafka_listeners`, so a gateway
/// configured with the same listeners treats everything as local.
pub struct MemoryBackend {
    pub local: BackendAddress,
    pub placement: Arc<StaticPlacement>,
    pub discovery: Arc<StaticDiscovery>,
    pub logs: Arc<MemoryLogStore>,
    pub admin: Arc<MemoryAdmin>,
    pub readers: Arc<MemoryReaderFactory>,
    pub authenticator: Arc<StaticAuthenticator>,
    pub translator: Arc<PartitionedNameTranslator>,
}

impl MemoryBackend {
    pub fn single_node(local: BackendAddress, kafka_listeners: &str) -> Self {
        let translator = Arc::new(PartitionedNameTranslator);
        let discovery = Arc::new(StaticDiscovery::new());
        discovery.register(&local, kafka_listeners);
        Self {
            placement: Arc::new(StaticPlacement::new(Some(local.clone()))),
            discovery,
            logs: Arc::new(MemoryLogStore::new()),
            admin: Arc::new(MemoryAdmin::new(translator.clone())),
            readers: Arc::new(MemoryReaderFactory::new()),
            authenticator: Arc::new(StaticAuthenticator::new()),
            translator,
            local,
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            placement: self.placement.clone(),
            discovery: self.discovery.clone(),
            log_store: self.logs.clone(),
            admin: self.admin.clone(),
            reader_factory: self.readers.clone(),
            authenticator: self.authenticator.clone(),
            translator: self.translator.clone(),
        }
    }
}
