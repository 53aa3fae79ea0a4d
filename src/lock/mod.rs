//! Operation Lock
//!
//! Grants exclusive, time-bounded ownership of a logical name to one
//! in-flight operation. Lease state lives in a pluggable [`LeaseStore`]; the
//! default [`MemoryLeaseStore`] is process-local, so deployments running
//! several managers must inject a shared implementation.
//!
//! [`OperationLock::run`] wraps a workflow with acquire → supervise → release.
//! The lease is released on every exit path, panics included, and the
//! workflow is raced against the lease deadline according to the configured
//! [`TimeoutPolicy`]. Under [`TimeoutPolicy::Cancel`] the lease is renewed
//! until the workflow has returned, so a cancelled workflow still owns the
//! name while its compensations run.

pub mod memory;

pub use memory::MemoryLeaseStore;

use crate::clock::{Clock, Timestamp};
use crate::config::{OperationTimeouts, TimeoutPolicy};
use crate::error::{ErrorKind, IndexError};
use futures::FutureExt;
use serde::Serialize;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Kind of operation holding a lease
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Creation,
    Update,
    Deletion,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Creation => "creation",
            OperationKind::Update => "update",
            OperationKind::Deletion => "deletion",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exclusive ownership record of one logical name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub operation: OperationKind,
    pub key: String,
    pub start: Timestamp,
    /// `start + timeout`, pushed back by renewals
    pub end: Timestamp,
    /// Identity of this acquisition, unique per store
    pub token: u64,
}

impl Lease {
    pub fn new(operation: OperationKind, key: impl Into<String>, start: Timestamp, timeout: Duration) -> Self {
        Lease {
            operation,
            key: key.into(),
            start,
            end: start + timeout,
            token: 0,
        }
    }

    pub fn with_token(mut self, token: u64) -> Self {
        self.token = token;
        self
    }

    /// True if `holder` is this very acquisition
    pub fn is_held_by(&self, holder: &Lease) -> bool {
        self.token == holder.token && self.operation == holder.operation && self.key == holder.key
    }

    /// Time left before the lease deadline
    pub fn remaining(&self, now: Timestamp) -> Duration {
        self.end.saturating_sub(now)
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    #[error(
        "An operation '{held_by}' started at {started} is already running for '{key}', \
         wait for it to finish (it should be finished before {expected_end}) to do a '{requested}'"
    )]
    Locked {
        key: String,
        requested: OperationKind,
        held_by: OperationKind,
        started: Timestamp,
        expected_end: Timestamp,
    },
    #[error("No operation '{operation}' exists (anymore) for '{key}'; the timeout may be too short")]
    Gone { key: String, operation: OperationKind },
    #[error("lease store unavailable: {0}")]
    Unavailable(String),
}

pub type LockFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, LockError>> + Send + 'a>>;

/// Backing store for leases
///
/// `save` must be atomic per key: of two concurrent saves for the same key,
/// at most one succeeds while a live lease exists.
pub trait LeaseStore: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Acquire a lease on `key`; `Locked` while another live lease exists
    fn save<'a>(
        &'a self,
        operation: OperationKind,
        key: &'a str,
        timeout: Duration,
    ) -> LockFuture<'a, Lease>;

    /// Push the deadline of `lease` to `now + timeout`; `Gone` unless `lease`
    /// is still the live acquisition for its key
    fn renew<'a>(&'a self, lease: &'a Lease, timeout: Duration) -> LockFuture<'a, Lease>;

    /// Release `lease`; `Gone` if absent, held by another kind, or replaced
    /// by a later acquisition
    fn delete<'a>(&'a self, lease: &'a Lease) -> LockFuture<'a, ()>;
}

/// Runs workflows under a lease
pub struct OperationLock<L: LeaseStore> {
    store: Arc<L>,
    clock: Arc<dyn Clock>,
    timeouts: OperationTimeouts,
    policy: TimeoutPolicy,
}

impl<L: LeaseStore> OperationLock<L> {
    pub fn new(
        store: Arc<L>,
        clock: Arc<dyn Clock>,
        timeouts: OperationTimeouts,
        policy: TimeoutPolicy,
    ) -> Self {
        OperationLock {
            store,
            clock,
            timeouts,
            policy,
        }
    }

    pub fn store(&self) -> &Arc<L> {
        &self.store
    }

    pub fn policy(&self) -> TimeoutPolicy {
        self.policy
    }

    pub fn timeouts(&self) -> &OperationTimeouts {
        &self.timeouts
    }

    /// Run `work` while holding the lease for (`operation`, `key`)
    ///
    /// `work` receives a token that is cancelled when the lease deadline
    /// passes under [`TimeoutPolicy::Cancel`].
    pub async fn run<T, F, Fut>(
        &self,
        operation: OperationKind,
        key: &str,
        work: F,
    ) -> Result<T, IndexError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, IndexError>> + Send + 'static,
        T: Send + 'static,
    {
        let timeout = self.timeouts.for_kind(operation);
        info!(
            %operation,
            name = key,
            timeout_ms = timeout.as_millis() as u64,
            store = self.store.name(),
            "Will try to run operation"
        );
        let lease = self.store.save(operation, key, timeout).await?;
        let remaining = lease.remaining(self.clock.now());

        let supervised = AssertUnwindSafe(async {
            let cancel = CancellationToken::new();
            let task = work(cancel.clone());
            self.supervise(&lease, timeout, remaining, task, cancel).await
        })
        .catch_unwind()
        .await;

        if let Err(err) = self.store.delete(&lease).await {
            warn!(%operation, name = key, error = %err, "Could not release lease");
        }

        match supervised {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    async fn supervise<T, Fut>(
        &self,
        lease: &Lease,
        timeout: Duration,
        remaining: Duration,
        task: Fut,
        cancel: CancellationToken,
    ) -> Result<T, IndexError>
    where
        Fut: Future<Output = Result<T, IndexError>> + Send + 'static,
        T: Send + 'static,
    {
        match self.policy {
            TimeoutPolicy::Cancel => {
                let mut task = std::pin::pin!(task);
                let mut deadline = std::pin::pin!(tokio::time::sleep(remaining));
                let period = renew_period(timeout);
                let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
                heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    tokio::select! {
                        result = &mut task => {
                            return match result {
                                Err(err) if cancel.is_cancelled() && err.kind() == ErrorKind::Timeout => {
                                    Err(err.context(timeout_message(lease, timeout)))
                                }
                                other => other,
                            };
                        }
                        _ = &mut deadline, if !cancel.is_cancelled() => {
                            warn!(
                                operation = %lease.operation,
                                name = %lease.key,
                                "Operation overran its lease, cancelling"
                            );
                            cancel.cancel();
                        }
                        _ = heartbeat.tick() => {
                            if let Err(err) = self.store.renew(lease, timeout).await {
                                warn!(
                                    operation = %lease.operation,
                                    name = %lease.key,
                                    error = %err,
                                    "Could not renew lease"
                                );
                            }
                        }
                    }
                }
            }
            TimeoutPolicy::Detach => {
                let mut handle = tokio::spawn(task);
                tokio::select! {
                    joined = &mut handle => match joined {
                        Ok(result) => result,
                        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                        Err(err) => Err(IndexError::new(
                            ErrorKind::Engine,
                            format!("operation task aborted: {}", err),
                        )),
                    },
                    _ = tokio::time::sleep(remaining) => {
                        warn!(
                            operation = %lease.operation,
                            name = %lease.key,
                            "Operation overran its lease, detaching it"
                        );
                        Err(IndexError::timeout(timeout_message(lease, timeout)))
                    }
                }
            }
        }
    }
}

/// Renewals run twice per timeout, so the store never expires a live holder
fn renew_period(timeout: Duration) -> Duration {
    (timeout / 2).max(Duration::from_millis(1))
}

fn timeout_message(lease: &Lease, timeout: Duration) -> String {
    format!(
        "Operation '{}' Timeout: the operation started at {} did not finish in the given '{}' ms \
         (it should have finished before {}). Either raise this timeout or check the state of \
         the index store manually",
        lease.operation,
        lease.start,
        timeout.as_millis(),
        lease.end
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimulatedClock;

    fn lock(policy: TimeoutPolicy, timeout: Duration) -> OperationLock<MemoryLeaseStore> {
        let clock: Arc<dyn Clock> = Arc::new(SimulatedClock::new(1_000));
        OperationLock::new(
            Arc::new(MemoryLeaseStore::new(clock.clone())),
            clock,
            OperationTimeouts::uniform(timeout),
            policy,
        )
    }

    #[test]
    fn test_lease_deadline() {
        let lease = Lease::new(
            OperationKind::Creation,
            "orders",
            Timestamp::from_millis(1_000),
            Duration::from_millis(500),
        );
        assert_eq!(lease.end, Timestamp::from_millis(1_500));
        assert_eq!(lease.remaining(Timestamp::from_millis(1_200)), Duration::from_millis(300));
        assert!(!lease.is_expired(Timestamp::from_millis(1_499)));
        assert!(lease.is_expired(Timestamp::from_millis(1_500)));
    }

    #[tokio::test]
    async fn test_run_releases_on_success_and_failure() {
        let lock = lock(TimeoutPolicy::Cancel, Duration::from_secs(5));

        let value = lock
            .run(OperationKind::Creation, "orders", |_| async { Ok(42) })
            .await
            .unwrap();
        assert_eq!(value, 42);
        assert!(lock.store().active().is_empty());

        let err = lock
            .run(OperationKind::Update, "orders", |_| async {
                Err::<(), _>(IndexError::conflict("boom"))
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(lock.store().active().is_empty());
    }

    #[tokio::test]
    async fn test_run_rejects_while_held() {
        let lock = Arc::new(lock(TimeoutPolicy::Cancel, Duration::from_secs(5)));
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let (finish_tx, finish_rx) = tokio::sync::oneshot::channel::<()>();

        let holder = {
            let lock = lock.clone();
            tokio::spawn(async move {
                lock.run(OperationKind::Update, "orders", move |_| async move {
                    let _ = started_tx.send(());
                    let _ = finish_rx.await;
                    Ok(())
                })
                .await
            })
        };
        started_rx.await.unwrap();

        let err = lock
            .run(OperationKind::Deletion, "orders", |_| async { Ok(()) })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Locked);
        assert!(err.message().contains("'update'"));

        finish_tx.send(()).unwrap();
        holder.await.unwrap().unwrap();
        lock.run(OperationKind::Deletion, "orders", |_| async { Ok(()) })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancel_policy_cancels_and_waits() {
        let lock = lock(TimeoutPolicy::Cancel, Duration::from_millis(50));
        let observed = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let err = {
            let observed = observed.clone();
            lock.run(OperationKind::Update, "orders", move |cancel| async move {
                cancel.cancelled().await;
                observed.store(true, std::sync::atomic::Ordering::SeqCst);
                Err::<(), _>(IndexError::timeout("cancelled while reindexing"))
            })
            .await
            .unwrap_err()
        };

        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.message().starts_with("Operation 'update' Timeout"));
        assert!(observed.load(std::sync::atomic::Ordering::SeqCst));
        assert!(lock.store().active().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_operation_holds_lease_through_rollback() {
        let clock: Arc<dyn Clock> = Arc::new(SimulatedClock::new(1_000));
        let store = Arc::new(MemoryLeaseStore::new(clock.clone()));
        let sharing = |timeout: Duration| {
            Arc::new(OperationLock::new(
                store.clone(),
                clock.clone(),
                OperationTimeouts::uniform(timeout),
                TimeoutPolicy::Cancel,
            ))
        };
        let short = sharing(Duration::from_millis(50));
        let long = sharing(Duration::from_secs(10));
        let rolling_back = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let overrunning = {
            let short = short.clone();
            let rolling_back = rolling_back.clone();
            tokio::spawn(async move {
                short
                    .run(OperationKind::Creation, "orders", move |cancel| async move {
                        cancel.cancelled().await;
                        rolling_back.store(true, std::sync::atomic::Ordering::SeqCst);
                        // compensations
                        tokio::time::sleep(Duration::from_millis(300)).await;
                        Err::<(), _>(IndexError::timeout("cancelled while creating"))
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(rolling_back.load(std::sync::atomic::Ordering::SeqCst));
        let err = long
            .run(OperationKind::Creation, "orders", |_| async { Ok(()) })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Locked);

        let err = overrunning.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(store.active().is_empty());

        // the next holder keeps the name until it finishes
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let (finish_tx, finish_rx) = tokio::sync::oneshot::channel::<()>();
        let successor = {
            let long = long.clone();
            tokio::spawn(async move {
                long.run(OperationKind::Creation, "orders", move |_| async move {
                    let _ = started_tx.send(());
                    let _ = finish_rx.await;
                    Ok(())
                })
                .await
            })
        };
        started_rx.await.unwrap();

        let err = long
            .run(OperationKind::Deletion, "orders", |_| async { Ok(()) })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Locked);

        finish_tx.send(()).unwrap();
        successor.await.unwrap().unwrap();
        assert!(store.active().is_empty());
    }

    #[tokio::test]
    async fn test_detach_policy_returns_before_workflow_ends() {
        let lock = lock(TimeoutPolicy::Detach, Duration::from_millis(50));
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();

        let err = lock
            .run(OperationKind::Update, "orders", move |cancel| async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                let _ = done_tx.send(cancel.is_cancelled());
                Ok(())
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(lock.store().active().is_empty());
        // the detached workflow still runs to completion, never cancelled
        assert_eq!(done_rx.await, Ok(false));
    }

    #[tokio::test]
    async fn test_panic_releases_lease() {
        let lock = Arc::new(lock(TimeoutPolicy::Cancel, Duration::from_secs(5)));

        let joined = {
            let lock = lock.clone();
            tokio::spawn(async move {
                lock.run(OperationKind::Creation, "orders", |_| async {
                    if true {
                        panic!("workflow bug");
                    }
                    Ok(())
                })
                .await
            })
            .await
        };
        assert!(joined.unwrap_err().is_panic());
        assert!(lock.store().active().is_empty());
    }
}
