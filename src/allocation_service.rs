use std::collections::BTreeMap;
use std::sync::Arc;

use ipnet::Ipv4Net;
use log::{info, warn};
use tokio::sync::RwLock;

use crate::allocator;
use crate::error::{Error, Result};
use crate::interval_store::IntervalStore;
use crate::persistence::OccupiedLog;
use crate::pool_registry::PoolRegistry;
use crate::record::{AllocationRecord, LeaseKey};

/// Request-handling core composing registry, store and log. Mutating
/// operations take the write half of the lock so the whole
/// find-validate-persist-insert sequence is atomic; peek and list take the
/// read half and see a consistent snapshot.
pub struct AllocationService {
    registry: PoolRegistry,
    log: Arc<dyn OccupiedLog>,
    store: RwLock<IntervalStore>,
}

impl AllocationService {
    /// Rebuild the in-memory store from the persisted log. The log is the
    /// only bootstrap source; an entry that does not parse is fatal rather
    /// than silently dropped.
    pub async fn bootstrap(registry: PoolRegistry, log: Arc<dyn OccupiedLog>) -> Result<Self> {
        let mut store = IntervalStore::new();
        for (key, cidr) in log.read_all().await? {
            let lease = LeaseKey::parse(&key)
                .ok_or_else(|| Error::Persistence(format!("bad key in state file: {}", key)))?;
            let net: Ipv4Net = cidr
                .parse()
                .map_err(|_| Error::Persistence(format!("bad CIDR in state file: {}", cidr)))?;
            store.insert(AllocationRecord::new(lease, net))?;
        }
        if store.is_empty() {
            info!("State file is empty, starting with a free pool");
        } else {
            info!("Replayed {} occupied CIDR blocks", store.len());
        }
        Ok(Self {
            registry,
            log,
            store: RwLock::new(store),
        })
    }

    /// Allocate a free block, persist it and mark it occupied.
    pub async fn allocate_commit(
        &self,
        prefix: u8,
        required_range: &str,
        reason: &str,
    ) -> Result<Ipv4Net> {
        validate_reason(reason)?;
        let parents = self.registry.resolve(required_range)?;

        let mut store = self.store.write().await;
        let cidr = allocator::find_free(&store, parents, prefix)?;
        let key = LeaseKey::now(reason);

        // Persist first; the store is only mutated once the write is
        // durable, so a failed append leaves both sides unchanged.
        self.log.append(&key.to_string(), &cidr.to_string()).await?;
        store.insert(AllocationRecord::new(key.clone(), cidr))?;

        info!("Allocated {} as {} from range '{}'", cidr, key, required_range);
        Ok(cidr)
    }

    /// Same search as `allocate_commit`, with no side effect anywhere.
    pub async fn allocate_peek(
        &self,
        prefix: u8,
        required_range: &str,
        reason: &str,
    ) -> Result<Ipv4Net> {
        validate_reason(reason)?;
        let parents = self.registry.resolve(required_range)?;
        let store = self.store.read().await;
        allocator::find_free(&store, parents, prefix)
    }

    /// Mapping of lease key to CIDR for every occupied block.
    pub async fn list_occupied(&self) -> BTreeMap<String, String> {
        let store = self.store.read().await;
        store
            .all()
            .map(|r| (r.key.to_string(), r.cidr.to_string()))
            .collect()
    }

    /// Release the block whose CIDR matches the input exactly.
    pub async fn delete(&self, cidr: &str) -> Result<Ipv4Net> {
        let net = parse_cidr(cidr)?;

        let mut store = self.store.write().await;
        let removed = store.remove(&net)?;
        if let Err(e) = self.log.remove_value(&removed.cidr.to_string()).await {
            // keep memory and log consistent
            warn!("State file update failed, rolling back delete of {}", cidr);
            let _ = store.insert(removed);
            return Err(e);
        }

        info!(
            "Released {} (reason '{}', allocated at {})",
            net,
            removed.key.reason(),
            removed.key.timestamp()
        );
        Ok(net)
    }

    /// Register a block that was allocated out of band.
    pub async fn add_manual(&self, cidr: &str, reason: &str) -> Result<Ipv4Net> {
        validate_reason(reason)?;
        let net = parse_cidr(cidr)?;
        if net.addr() != net.network() {
            return Err(Error::InvalidCidr(format!("{} has host bits set", cidr)));
        }

        let mut store = self.store.write().await;
        if let Some(existing) = store.conflict_with(&net) {
            return Err(Error::Overlap(net.to_string(), existing.cidr.to_string()));
        }
        let key = LeaseKey::now(reason);
        self.log.append(&key.to_string(), &net.to_string()).await?;
        store.insert(AllocationRecord::new(key.clone(), net))?;

        info!("Manually registered {} as {}", net, key);
        Ok(net)
    }
}

fn parse_cidr(s: &str) -> Result<Ipv4Net> {
    s.parse::<Ipv4Net>()
        .map_err(|_| Error::InvalidCidr(s.to_string()))
}

/// Reasons become half of a lease key and a commit message in the external
/// store, so the character set is kept tight.
fn validate_reason(reason: &str) -> Result<()> {
    let ok = reason.len() >= 3
        && reason
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidReason(reason.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::JsonFileLog;
    use async_trait::async_trait;
    use std::collections::HashMap;

    fn lab_registry() -> PoolRegistry {
        let mut pools = HashMap::new();
        pools.insert("lab".to_string(), vec!["10.0.0.0/16".parse().unwrap()]);
        pools.insert("tiny".to_string(), vec!["192.168.1.0/24".parse().unwrap()]);
        PoolRegistry::new(pools)
    }

    async fn service(dir: &tempfile::TempDir) -> AllocationService {
        let log = Arc::new(JsonFileLog::new(dir.path().join("occupied-range.json")));
        AllocationService::bootstrap(lab_registry(), log).await.unwrap()
    }

    #[tokio::test]
    async fn sequential_commits_walk_the_range() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir).await;

        let first = svc.allocate_commit(24, "lab", "build-42").await.unwrap();
        assert_eq!(first.to_string(), "10.0.0.0/24");
        let second = svc.allocate_commit(24, "lab", "build-43").await.unwrap();
        assert_eq!(second.to_string(), "10.0.1.0/24");
    }

    #[tokio::test]
    async fn peek_has_no_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir).await;

        let before = svc.list_occupied().await;
        let peeked = svc.allocate_peek(24, "lab", "preview").await.unwrap();
        assert_eq!(peeked.to_string(), "10.0.0.0/24");
        assert_eq!(svc.list_occupied().await, before);

        // peeking does not consume the block
        let committed = svc.allocate_commit(24, "lab", "preview").await.unwrap();
        assert_eq!(committed, peeked);
    }

    #[tokio::test]
    async fn peek_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir).await;
        svc.allocate_commit(24, "lab", "seed-block").await.unwrap();

        let a = svc.allocate_peek(25, "lab", "check").await.unwrap();
        let b = svc.allocate_peek(25, "lab", "check").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn deleted_blocks_are_reclaimed_first_fit() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir).await;

        svc.allocate_commit(24, "lab", "build-42").await.unwrap();
        svc.allocate_commit(24, "lab", "build-43").await.unwrap();
        svc.delete("10.0.1.0/24").await.unwrap();

        let next = svc.allocate_commit(24, "lab", "build-44").await.unwrap();
        assert_eq!(next.to_string(), "10.0.1.0/24");
    }

    #[tokio::test]
    async fn delete_of_unknown_cidr_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir).await;
        assert!(matches!(
            svc.delete("10.9.9.0/24").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn manual_add_round_trip_restores_state() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir).await;

        let before = svc.list_occupied().await;
        svc.add_manual("10.0.5.0/24", "legacy").await.unwrap();
        svc.delete("10.0.5.0/24").await.unwrap();
        assert_eq!(svc.list_occupied().await, before);
    }

    #[tokio::test]
    async fn manual_add_rejects_overlap_and_host_bits() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir).await;
        svc.allocate_commit(24, "lab", "build-42").await.unwrap();

        assert!(matches!(
            svc.add_manual("10.0.0.0/24", "legacy").await,
            Err(Error::Overlap(_, _))
        ));
        assert!(matches!(
            svc.add_manual("10.0.0.128/26", "legacy").await,
            Err(Error::Overlap(_, _))
        ));
        assert!(matches!(
            svc.add_manual("10.0.9.5/24", "legacy").await,
            Err(Error::InvalidCidr(_))
        ));
    }

    #[tokio::test]
    async fn pool_of_one_block_exhausts() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir).await;

        svc.allocate_commit(24, "tiny", "only-one").await.unwrap();
        assert!(matches!(
            svc.allocate_commit(24, "tiny", "one-more").await,
            Err(Error::PoolExhausted(24))
        ));
    }

    #[tokio::test]
    async fn bad_inputs_never_touch_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir).await;

        assert!(matches!(
            svc.allocate_commit(24, "lab", "a b").await,
            Err(Error::InvalidReason(_))
        ));
        assert!(matches!(
            svc.allocate_commit(24, "lab", "ab").await,
            Err(Error::InvalidReason(_))
        ));
        assert!(matches!(
            svc.allocate_commit(24, "nope", "build-42").await,
            Err(Error::UnknownRange(_))
        ));
        assert!(matches!(
            svc.add_manual("10.0.0.0/33", "legacy").await,
            Err(Error::InvalidCidr(_))
        ));
        assert!(svc.list_occupied().await.is_empty());
    }

    #[tokio::test]
    async fn state_survives_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("occupied-range.json");

        {
            let log = Arc::new(JsonFileLog::new(&path));
            let svc = AllocationService::bootstrap(lab_registry(), log).await.unwrap();
            svc.allocate_commit(24, "lab", "build-42").await.unwrap();
            svc.allocate_commit(24, "lab", "build-43").await.unwrap();
        }

        let log = Arc::new(JsonFileLog::new(&path));
        let svc = AllocationService::bootstrap(lab_registry(), log).await.unwrap();
        assert_eq!(svc.list_occupied().await.len(), 2);
        let next = svc.allocate_commit(24, "lab", "build-44").await.unwrap();
        assert_eq!(next.to_string(), "10.0.2.0/24");
    }

    struct FailingLog;

    #[async_trait]
    impl OccupiedLog for FailingLog {
        async fn append(&self, _key: &str, _cidr: &str) -> Result<()> {
            Err(Error::Persistence("disk on fire".to_string()))
        }
        async fn remove_value(&self, _cidr: &str) -> Result<()> {
            Err(Error::Persistence("disk on fire".to_string()))
        }
        async fn read_all(&self) -> Result<BTreeMap<String, String>> {
            Ok(BTreeMap::new())
        }
    }

    #[tokio::test]
    async fn failed_persistence_rolls_back_the_commit() {
        let svc = AllocationService::bootstrap(lab_registry(), Arc::new(FailingLog))
            .await
            .unwrap();

        assert!(matches!(
            svc.allocate_commit(24, "lab", "build-42").await,
            Err(Error::Persistence(_))
        ));
        assert!(svc.list_occupied().await.is_empty());

        // the block is still allocatable afterwards
        let peeked = svc.allocate_peek(24, "lab", "check").await.unwrap();
        assert_eq!(peeked.to_string(), "10.0.0.0/24");
    }

    #[tokio::test]
    async fn no_overlap_invariant_holds_across_mixed_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir).await;

        for (prefix, reason) in [(24u8, "one"), (26, "two"), (25, "three"), (24, "four")] {
            svc.allocate_commit(prefix, "lab", reason).await.unwrap();
        }
        svc.add_manual("10.0.100.0/24", "legacy").await.unwrap();

        let occupied = svc.list_occupied().await;
        let nets: Vec<Ipv4Net> = occupied.values().map(|c| c.parse().unwrap()).collect();
        for (i, a) in nets.iter().enumerate() {
            for b in nets.iter().skip(i + 1) {
                assert!(
                    !(a.contains(&b.network()) || b.contains(&a.network())),
                    "{} overlaps {}",
                    a,
                    b
                );
            }
        }
    }
}
