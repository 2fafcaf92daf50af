// Topic attachment and owner-address cache
//
// Shared by every connection. Two maps live here:
// - attached logs, keyed by partition resource. Each key holds a OnceCell so
//   concurrent lookups of a not-yet-attached resource open it exactly once.
// - last known owner address per partition resource. Entries are evicted
//   when a lookup proves them stale or fails; confirmation never evicts.
//
// DashMap guards are never held across an await: the cell Arc is cloned out
// of the map first.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::backend::{BackendAddress, LogHandle, LogStore, PlacementService};
use super::constants::PERSISTENT_DOMAIN;
use super::error::Result;

type AttachCell = Arc<OnceCell<Arc<dyn LogHandle>>>;

pub struct TopicManager {
    log_store: Arc<dyn LogStore>,
    placement: Arc<dyn PlacementService>,
    topics: DashMap<String, AttachCell>,
    address_cache: DashMap<String, BackendAddress>,
}

impl TopicManager {
    pub fn new(log_store: Arc<dyn LogStore>, placement: Arc<dyn PlacementService>) -> Self {
        Self {
            log_store,
            placement,
            topics: DashMap::new(),
            address_cache: DashMap::new(),
        }
    }

    /// Attached log for `resource`, attaching it on first use
    ///
    /// A failed attach leaves the slot empty so the next call retries.
    pub async fn get_topic(&self, resource: &str) -> Result<Arc<dyn LogHandle>> {
        let cell = self
            .topics
            .entry(resource.to_string())
            .or_default()
            .value()
            .clone();

        let handle = cell
            .get_or_try_init(|| async {
                debug!(resource, "attaching log");
                self.log_store.open_log(resource).await
            })
            .await?;
        Ok(Arc::clone(handle))
    }

    /// Whether `resource` is attached on this node
    pub fn is_attached(&self, resource: &str) -> bool {
        self.topics
            .get(resource)
            .map(|cell| cell.initialized())
            .unwrap_or(false)
    }

    /// Current owner address of `resource`
    ///
    /// Served from the cache when present. A placement answer of "no owner"
    /// or a placement failure evicts any cached entry.
    pub async fn topic_broker(&self, resource: &str) -> Result<Option<BackendAddress>> {
        if let Some(cached) = self.address_cache.get(resource) {
            return Ok(Some(cached.value().clone()));
        }

        match self.placement.owner_address_of(resource).await {
            Ok(Some(address)) => {
                self.address_cache
                    .insert(resource.to_string(), address.clone());
                Ok(Some(address))
            }
            Ok(None) => {
                self.remove_lookup_cache(resource);
                Ok(None)
            }
            Err(e) => {
                warn!(resource, error = %e, "owner lookup failed");
                self.remove_lookup_cache(resource);
                Err(e)
            }
        }
    }

    /// Cached owner address, without consulting placement
    pub fn cached_address(&self, resource: &str) -> Option<BackendAddress> {
        self.address_cache.get(resource).map(|a| a.value().clone())
    }

    pub fn remove_lookup_cache(&self, resource: &str) {
        if self.address_cache.remove(resource).is_some() {
            debug!(resource, "evicted cached owner address");
        }
    }

    /// Drop cached addresses for every resource in `namespace`
    pub fn release_namespace(&self, namespace: &str) {
        let prefix = format!("{}{}/", PERSISTENT_DOMAIN, namespace);
        self.address_cache.retain(|resource, _| !resource.starts_with(&prefix));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kafka::backend::memory::{MemoryLogStore, StaticPlacement};
    use crate::kafka::backend::MockPlacementService;
    use crate::kafka::error::KafkaError;

    const RESOURCE: &str = "persistent://public/default/t-partition-0";

    fn manager() -> (TopicManager, Arc<MemoryLogStore>, Arc<StaticPlacement>) {
        let store = Arc::new(MemoryLogStore::new());
        let placement = Arc::new(StaticPlacement::new(Some(BackendAddress::new("b1", 6650))));
        let manager = TopicManager::new(store.clone(), placement.clone());
        (manager, store, placement)
    }

    #[tokio::test]
    async fn test_get_topic_attaches_once() {
        let (manager, store, _) = manager();
        assert!(!manager.is_attached(RESOURCE));
        manager.get_topic(RESOURCE).await.unwrap();
        manager.get_topic(RESOURCE).await.unwrap();
        assert!(manager.is_attached(RESOURCE));
        assert_eq!(store.open_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_get_topic_attaches_once() {
        let (manager, store, _) = manager();
        let manager = Arc::new(manager);
        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let m = manager.clone();
                tokio::spawn(async move { m.get_topic(RESOURCE).await.map(|_| ()) })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(store.open_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_attach_is_retried() {
        let (manager, store, _) = manager();
        store.set_unavailable(RESOURCE, true);
        assert!(manager.get_topic(RESOURCE).await.is_err());
        assert!(!manager.is_attached(RESOURCE));

        store.set_unavailable(RESOURCE, false);
        manager.get_topic(RESOURCE).await.unwrap();
        assert!(manager.is_attached(RESOURCE));
    }

    #[tokio::test]
    async fn test_topic_broker_caches_owner() {
        let (manager, _, placement) = manager();
        let first = manager.topic_broker(RESOURCE).await.unwrap();
        let second = manager.topic_broker(RESOURCE).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(placement.lookup_count(), 1);
    }

    #[tokio::test]
    async fn test_eviction_forces_requery() {
        let (manager, _, placement) = manager();
        manager.topic_broker(RESOURCE).await.unwrap();
        manager.remove_lookup_cache(RESOURCE);
        manager.topic_broker(RESOURCE).await.unwrap();
        assert_eq!(placement.lookup_count(), 2);
    }

    #[tokio::test]
    async fn test_missing_owner_is_not_cached() {
        let (manager, _, placement) = manager();
        placement.set_default_owner(None);
        assert_eq!(manager.topic_broker(RESOURCE).await.unwrap(), None);
        assert!(manager.cached_address(RESOURCE).is_none());
    }

    #[tokio::test]
    async fn test_placement_failure_evicts() {
        let mut placement = MockPlacementService::new();
        placement
            .expect_owner_address_of()
            .with(mockall::predicate::eq(RESOURCE))
            .times(1)
            .returning(|_| Err(KafkaError::Backend("zk down".into())));
        let manager = TopicManager::new(Arc::new(MemoryLogStore::new()), Arc::new(placement));

        assert!(manager.topic_broker(RESOURCE).await.is_err());
        assert!(manager.cached_address(RESOURCE).is_none());
    }

    #[tokio::test]
    async fn test_release_namespace() {
        let (manager, _, _) = manager();
        manager.topic_broker(RESOURCE).await.unwrap();
        manager
            .topic_broker("persistent://other/ns/t-partition-0")
            .await
            .unwrap();

        manager.release_namespace("public/default");
        assert!(manager.cached_address(RESOURCE).is_none());
        assert!(manager
            .cached_address("persistent://other/ns/t-partition-0")
            .is_some());
    }
}
