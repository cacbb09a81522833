//! Operation Lease Control
//!
//! Pauses the pool-health controller by placing an operation lease on every
//! pool of a topology and resumes it by removing the lease again. Leases are
//! written through the pool store, so a concurrent writer surfaces as a
//! conflict instead of being overwritten.

use crate::crd::{OperationLease, StoragePool};
use crate::domain::ports::{PoolStoreRef, ReconcileControl};
use crate::error::{Error, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

/// Lease-backed reconcile control
pub struct PoolLeaseControl {
    pools: PoolStoreRef,
    holder: String,
    ttl_secs: u64,
}

impl PoolLeaseControl {
    pub fn new(pools: PoolStoreRef, holder: impl Into<String>, ttl_secs: u64) -> Self {
        Self {
            pools,
            holder: holder.into(),
            ttl_secs,
        }
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }
}

#[async_trait]
impl ReconcileControl for PoolLeaseControl {
    /// Lease every pool of `topology`.
    ///
    /// Fails with `Error::LeaseHeld` before writing anything when another
    /// holder owns a live lease on any of the pools. A write conflict caused
    /// by another holder leasing a pool in between also fails with
    /// `Error::LeaseHeld`, after the leases already written are released.
    /// Other write failures are logged and skipped.
    async fn pause(&self, topology: &str) -> Result<()> {
        let pools = self.pools.list_pools(topology).await?;

        if let Some(held) = pools
            .iter()
            .find(|p| p.is_leased_by_other(&self.holder, self.ttl_secs))
        {
            return Err(lease_held(held));
        }

        let lease = OperationLease::new(&self.holder);
        let mut leased = Vec::new();
        for mut pool in pools {
            pool.set_operation_lease(&lease)?;
            match self.pools.update_pool(&pool).await {
                Ok(updated) => {
                    debug!(pool = %pool.name(), holder = %self.holder, "Leased pool");
                    leased.push(updated);
                }
                Err(Error::Persist { conflict: true, .. }) => {
                    match self.taken_by_other(topology, pool.name()).await {
                        Ok(None) => {
                            warn!(pool = %pool.name(), "Lease write conflicted, pool left unleased")
                        }
                        Ok(Some(err)) | Err(err) => {
                            self.release_all(leased).await;
                            return Err(err);
                        }
                    }
                }
                Err(e) => warn!(pool = %pool.name(), "Could not lease pool: {}", e),
            }
        }
        Ok(())
    }

    /// Release this holder's lease on every pool of `topology`
    async fn resume(&self, topology: &str) -> Result<()> {
        let pools = self.pools.list_pools(topology).await?;
        let mut failed = 0usize;

        for pool in pools {
            if self.release(pool).await.is_err() {
                failed += 1;
            }
        }

        if failed > 0 {
            return Err(Error::Internal(format!(
                "failed to release lease on {} pool(s) of {}",
                failed, topology
            )));
        }
        Ok(())
    }
}

impl PoolLeaseControl {
    /// Re-read `pool` and report a live lease of another holder on it
    async fn taken_by_other(&self, topology: &str, pool: &str) -> Result<Option<Error>> {
        let current = self.pools.list_pools(topology).await?;
        Ok(current
            .iter()
            .find(|p| p.name() == pool && p.is_leased_by_other(&self.holder, self.ttl_secs))
            .map(lease_held))
    }

    async fn release_all(&self, pools: Vec<StoragePool>) {
        for pool in pools {
            let _ = self.release(pool).await;
        }
    }

    /// Drop this holder's lease from `pool`; a pool it does not hold is left alone
    async fn release(&self, mut pool: StoragePool) -> Result<()> {
        let ours = pool
            .operation_lease()
            .map(|l| l.holder == self.holder)
            .unwrap_or(false);
        if !ours || !pool.clear_operation_lease() {
            return Ok(());
        }
        match self.pools.update_pool(&pool).await {
            Ok(_) => {
                debug!(pool = %pool.name(), "Released pool lease");
                Ok(())
            }
            Err(e) => {
                warn!(pool = %pool.name(), "Could not release pool lease: {}", e);
                Err(e)
            }
        }
    }
}

fn lease_held(pool: &StoragePool) -> Error {
    Error::LeaseHeld {
        pool: pool.name().to_string(),
        holder: pool
            .operation_lease()
            .map(|l| l.holder)
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryCluster;
    use crate::domain::ports::PoolStore;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn cluster() -> Arc<InMemoryCluster> {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.add_pool("pool-1", "node-1", "topo-a", vec![]);
        cluster.add_pool("pool-2", "node-2", "topo-a", vec![]);
        cluster.add_pool("pool-3", "node-3", "topo-b", vec![]);
        cluster
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let cluster = cluster();
        let control = PoolLeaseControl::new(cluster.clone(), "day2-ops", 300);

        control.pause("topo-a").await.unwrap();
        for pool in cluster.list_pools("topo-a").await.unwrap() {
            assert_eq!(pool.operation_lease().unwrap().holder, "day2-ops");
        }
        assert!(cluster.pool("pool-3").unwrap().operation_lease().is_none());

        control.resume("topo-a").await.unwrap();
        for pool in cluster.list_pools("topo-a").await.unwrap() {
            assert!(pool.operation_lease().is_none());
        }
    }

    #[tokio::test]
    async fn test_pause_refuses_foreign_lease() {
        let cluster = cluster();
        let other = PoolLeaseControl::new(cluster.clone(), "other", 300);
        other.pause("topo-a").await.unwrap();

        let control = PoolLeaseControl::new(cluster.clone(), "day2-ops", 300);
        assert_matches!(
            control.pause("topo-a").await,
            Err(Error::LeaseHeld { ref holder, .. }) if holder == "other"
        );

        // Resume leaves the other holder's lease in place
        control.resume("topo-a").await.unwrap();
        assert_eq!(
            cluster.pool("pool-1").unwrap().operation_lease().unwrap().holder,
            "other"
        );
    }

    #[tokio::test]
    async fn test_expired_foreign_lease_is_taken_over() {
        let cluster = cluster();
        let mut pool = cluster.pool("pool-1").unwrap();
        pool.set_operation_lease(&OperationLease {
            holder: "crashed".into(),
            acquired_at: chrono::Utc::now() - chrono::Duration::minutes(10),
        })
        .unwrap();
        cluster.update_pool(&pool).await.unwrap();

        let control = PoolLeaseControl::new(cluster.clone(), "day2-ops", 60);
        control.pause("topo-a").await.unwrap();
        assert_eq!(
            cluster.pool("pool-1").unwrap().operation_lease().unwrap().holder,
            "day2-ops"
        );
    }

    /// Store that lets holder "other" lease `pool-2` right after the first listing
    struct RacingStore {
        inner: Arc<InMemoryCluster>,
        armed: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl PoolStore for RacingStore {
        async fn list_pools(&self, topology: &str) -> Result<Vec<StoragePool>> {
            let pools = self.inner.list_pools(topology).await?;
            if self.armed.swap(false, std::sync::atomic::Ordering::SeqCst) {
                let mut pool = self.inner.pool("pool-2").unwrap();
                pool.set_operation_lease(&OperationLease::new("other")).unwrap();
                self.inner.update_pool(&pool).await.unwrap();
            }
            Ok(pools)
        }

        async fn update_pool(&self, pool: &StoragePool) -> Result<StoragePool> {
            self.inner.update_pool(pool).await
        }
    }

    #[tokio::test]
    async fn test_pause_loses_race_to_concurrent_holder() {
        let cluster = cluster();
        let store = Arc::new(RacingStore {
            inner: cluster.clone(),
            armed: std::sync::atomic::AtomicBool::new(true),
        });
        let control = PoolLeaseControl::new(store, "day2-ops", 300);

        assert_matches!(
            control.pause("topo-a").await,
            Err(Error::LeaseHeld { ref pool, ref holder }) if pool == "pool-2" && holder == "other"
        );

        // The lease written on pool-1 before the conflict is released again
        assert!(cluster.pool("pool-1").unwrap().operation_lease().is_none());
        assert_eq!(
            cluster.pool("pool-2").unwrap().operation_lease().unwrap().holder,
            "other"
        );
    }
}
