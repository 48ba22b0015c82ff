use std::sync::{
    LockResult, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use metrics::counter;
use tracing::warn;

const METRIC_LOCK_POISONED: &str = "dcache_lock_poisoned_total";

/// Reader/writer lock that recovers from poisoning.
///
/// A panic while a guard is held leaves the state as the panicking thread
/// left it; the next caller logs the recovery and carries on.
pub(crate) struct CacheLock<T> {
    inner: RwLock<T>,
    target: &'static str,
}

impl<T> CacheLock<T> {
    pub(crate) fn new(value: T, target: &'static str) -> Self {
        Self {
            inner: RwLock::new(value),
            target,
        }
    }

    pub(crate) fn read(&self, op: &'static str) -> RwLockReadGuard<'_, T> {
        recover(self.inner.read(), self.target, op, "rwlock.read")
    }

    pub(crate) fn write(&self, op: &'static str) -> RwLockWriteGuard<'_, T> {
        recover(self.inner.write(), self.target, op, "rwlock.write")
    }

    #[cfg(test)]
    pub(crate) fn poison(&self) {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = self.inner.write();
            panic!("poison cache lock");
        }));
    }
}

pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    target: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    recover(lock.lock(), target, op, "mutex.lock")
}

fn recover<G>(
    result: LockResult<G>,
    target: &'static str,
    op: &'static str,
    lock_kind: &'static str,
) -> G {
    result.unwrap_or_else(|poisoned: PoisonError<G>| {
        warn!(
            op,
            target_module = target,
            lock_kind,
            result = "poisoned_recovered",
            hint = "state may be stale after panic in another thread",
            "Recovered from poisoned cache lock"
        );
        counter!(METRIC_LOCK_POISONED, "lock_kind" => lock_kind).increment(1);
        poisoned.into_inner()
    })
}
