//! Process-local lease store.

use super::{Lease, LeaseStore, LockError, LockFuture, OperationKind};
use crate::clock::Clock;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct LeaseEntry {
    lease: Lease,
    /// Id of the armed expiry timer, changes on every renewal
    timer: u64,
    expiry: Option<JoinHandle<()>>,
}

/// In-memory lease table keyed by logical name
///
/// Each acquisition or renewal arms a timer that force-expires the lease at
/// its deadline if it was neither renewed nor released before. Per-key
/// updates go through the DashMap entry API, so unrelated keys never contend
/// on the same lock.
pub struct MemoryLeaseStore {
    leases: Arc<DashMap<String, LeaseEntry>>,
    clock: Arc<dyn Clock>,
    /// Source of lease tokens and timer ids
    sequence: AtomicU64,
}

impl MemoryLeaseStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        MemoryLeaseStore {
            leases: Arc::new(DashMap::new()),
            clock,
            sequence: AtomicU64::new(1),
        }
    }

    /// Leases currently held and not past their deadline
    pub fn active(&self) -> Vec<Lease> {
        let now = self.clock.now();
        let mut leases: Vec<Lease> = self
            .leases
            .iter()
            .filter(|entry| !entry.lease.is_expired(now))
            .map(|entry| entry.lease.clone())
            .collect();
        leases.sort_by(|a, b| a.key.cmp(&b.key));
        leases
    }

    fn next_id(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    fn acquire(&self, operation: OperationKind, key: &str, timeout: Duration) -> Result<Lease, LockError> {
        let now = self.clock.now();
        let token = self.next_id();
        let lease = Lease::new(operation, key, now, timeout).with_token(token);
        let entry = LeaseEntry {
            lease: lease.clone(),
            timer: token,
            expiry: None,
        };

        match self.leases.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let held = &occupied.get().lease;
                if !held.is_expired(now) {
                    return Err(LockError::Locked {
                        key: key.to_string(),
                        requested: operation,
                        held_by: held.operation,
                        started: held.start,
                        expected_end: held.end,
                    });
                }
                warn!(
                    operation = %held.operation,
                    key,
                    "Replacing lease that outlived its deadline"
                );
                let stale = occupied.insert(entry);
                if let Some(timer) = stale.expiry {
                    timer.abort();
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
            }
        }

        self.arm_expiry(key, token, timeout);
        Ok(lease)
    }

    /// Spawn the force-expiry timer, when running inside a tokio runtime
    fn arm_expiry(&self, key: &str, timer_id: u64, timeout: Duration) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(key, "No runtime, lease expires on its deadline only");
            return;
        };
        let leases = self.leases.clone();
        let owned_key = key.to_string();
        let timer = runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some((_, expired)) =
                leases.remove_if(&owned_key, |_, entry| entry.timer == timer_id)
            {
                warn!(
                    operation = %expired.lease.operation,
                    key = %owned_key,
                    timeout_ms = timeout.as_millis() as u64,
                    "Lease force-expired before release"
                );
            }
        });

        match self.leases.get_mut(key) {
            Some(mut entry) if entry.timer == timer_id => entry.expiry = Some(timer),
            _ => timer.abort(),
        }
    }

    fn extend(&self, holder: &Lease, timeout: Duration) -> Result<Lease, LockError> {
        let timer_id = self.next_id();
        let renewed = match self.leases.get_mut(&holder.key) {
            Some(mut entry) if entry.lease.is_held_by(holder) => {
                entry.lease.end = self.clock.now() + timeout;
                entry.timer = timer_id;
                if let Some(timer) = entry.expiry.take() {
                    timer.abort();
                }
                entry.lease.clone()
            }
            _ => return Err(gone(holder)),
        };

        self.arm_expiry(&holder.key, timer_id, timeout);
        Ok(renewed)
    }

    fn release(&self, holder: &Lease) -> Result<(), LockError> {
        match self
            .leases
            .remove_if(&holder.key, |_, entry| entry.lease.is_held_by(holder))
        {
            Some((_, entry)) => {
                if let Some(timer) = entry.expiry {
                    timer.abort();
                }
                Ok(())
            }
            None => Err(gone(holder)),
        }
    }
}

fn gone(holder: &Lease) -> LockError {
    LockError::Gone {
        key: holder.key.clone(),
        operation: holder.operation,
    }
}

impl Drop for MemoryLeaseStore {
    fn drop(&mut self) {
        for mut entry in self.leases.iter_mut() {
            if let Some(timer) = entry.expiry.take() {
                timer.abort();
            }
        }
    }
}

impl LeaseStore for MemoryLeaseStore {
    fn name(&self) -> &str {
        "In Memory Store"
    }

    fn save<'a>(
        &'a self,
        operation: OperationKind,
        key: &'a str,
        timeout: Duration,
    ) -> LockFuture<'a, Lease> {
        Box::pin(async move {
            info!(%operation, key, timeout_ms = timeout.as_millis() as u64, "Lock");
            self.acquire(operation, key, timeout)
        })
    }

    fn renew<'a>(&'a self, lease: &'a Lease, timeout: Duration) -> LockFuture<'a, Lease> {
        Box::pin(async move {
            debug!(operation = %lease.operation, key = %lease.key, "Renew lock");
            self.extend(lease, timeout)
        })
    }

    fn delete<'a>(&'a self, lease: &'a Lease) -> LockFuture<'a, ()> {
        Box::pin(async move {
            info!(operation = %lease.operation, key = %lease.key, "Unlock");
            self.release(lease)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimulatedClock;

    fn store() -> (SimulatedClock, MemoryLeaseStore) {
        let clock = SimulatedClock::new(10_000);
        let store = MemoryLeaseStore::new(Arc::new(clock.clone()));
        (clock, store)
    }

    #[tokio::test]
    async fn test_save_is_exclusive_across_kinds() {
        let (_, store) = store();
        let lease = store
            .save(OperationKind::Creation, "orders", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(lease.start.as_millis(), 10_000);
        assert_eq!(lease.end.as_millis(), 70_000);

        for kind in [OperationKind::Creation, OperationKind::Update, OperationKind::Deletion] {
            match store.save(kind, "orders", Duration::from_secs(60)).await {
                Err(LockError::Locked { held_by, requested, .. }) => {
                    assert_eq!(held_by, OperationKind::Creation);
                    assert_eq!(requested, kind);
                }
                other => panic!("expected Locked, got {:?}", other),
            }
        }

        let other = store
            .save(OperationKind::Creation, "customers", Duration::from_secs(60))
            .await
            .unwrap();
        assert_ne!(other.token, lease.token);
        assert_eq!(store.active().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_requires_matching_kind() {
        let (_, store) = store();
        let lease = store
            .save(OperationKind::Update, "orders", Duration::from_secs(60))
            .await
            .unwrap();
        let wrong_kind = Lease {
            operation: OperationKind::Deletion,
            ..lease.clone()
        };

        assert_eq!(
            store.delete(&wrong_kind).await,
            Err(LockError::Gone {
                key: "orders".into(),
                operation: OperationKind::Deletion,
            })
        );
        store.delete(&lease).await.unwrap();
        assert!(matches!(
            store.delete(&lease).await,
            Err(LockError::Gone { .. })
        ));
    }

    #[tokio::test]
    async fn test_timer_force_expires_lease() {
        let (_, store) = store();
        let lease = store
            .save(OperationKind::Creation, "orders", Duration::from_millis(20))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(store.leases.is_empty());
        assert!(matches!(
            store.delete(&lease).await,
            Err(LockError::Gone { .. })
        ));
    }

    #[tokio::test]
    async fn test_stale_holder_cannot_release_successor() {
        let (_, store) = store();
        let stale = store
            .save(OperationKind::Creation, "orders", Duration::from_millis(20))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let successor = store
            .save(OperationKind::Creation, "orders", Duration::from_secs(60))
            .await
            .unwrap();

        assert!(matches!(
            store.delete(&stale).await,
            Err(LockError::Gone { .. })
        ));
        assert!(matches!(
            store.renew(&stale, Duration::from_secs(60)).await,
            Err(LockError::Gone { .. })
        ));
        assert_eq!(store.active(), vec![successor.clone()]);
        store.delete(&successor).await.unwrap();
    }

    #[tokio::test]
    async fn test_renew_pushes_deadline() {
        let (clock, store) = store();
        let lease = store
            .save(OperationKind::Update, "orders", Duration::from_secs(60))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(50));
        let renewed = store.renew(&lease, Duration::from_secs(60)).await.unwrap();
        assert_eq!(renewed.start, lease.start);
        assert_eq!(renewed.end.as_millis(), 120_000);
        assert_eq!(renewed.token, lease.token);

        // past the first deadline, still held
        clock.advance(Duration::from_secs(20));
        assert!(matches!(
            store.save(OperationKind::Deletion, "orders", Duration::from_secs(60)).await,
            Err(LockError::Locked { .. })
        ));
        store.delete(&lease).await.unwrap();
    }

    #[tokio::test]
    async fn test_renew_rearms_timer() {
        let (_, store) = store();
        let lease = store
            .save(OperationKind::Creation, "orders", Duration::from_millis(60))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        store.renew(&lease, Duration::from_millis(150)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.leases.len(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(store.leases.is_empty());
    }

    #[tokio::test]
    async fn test_expired_lease_can_be_taken_over() {
        let (clock, store) = store();
        store
            .save(OperationKind::Update, "orders", Duration::from_secs(60))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(61));
        assert!(store.active().is_empty());
        let lease = store
            .save(OperationKind::Deletion, "orders", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(lease.operation, OperationKind::Deletion);
        assert_eq!(store.active(), vec![lease]);
    }

    #[test]
    fn test_works_without_runtime() {
        let (_, store) = store();
        let lease = store
            .acquire(OperationKind::Creation, "orders", Duration::from_secs(1))
            .unwrap();
        assert!(store.acquire(OperationKind::Creation, "orders", Duration::from_secs(1)).is_err());
        store.extend(&lease, Duration::from_secs(5)).unwrap();
        store.release(&lease).unwrap();
    }
}
