//! Background reclamation of idle query plans.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::lock::mutex_lock;

const SOURCE: &str = "dcache::cache::cleaner";

/// Something holding query plans that can be pruned.
pub(crate) trait Reclaim: Send + Sync {
    /// Remove plans idle for longer than `ttl`; returns how many were removed.
    fn reclaim_idle(&self, ttl: Duration) -> usize;
}

struct Worker {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// One OS thread per cache ticking at a fixed interval.
///
/// Holds only a weak reference to the cache state, so a forgotten cleaner
/// exits on its next tick once the cache is gone.
pub(crate) struct TtlCleaner {
    model_type: &'static str,
    running: AtomicBool,
    worker: Mutex<Option<Worker>>,
}

impl TtlCleaner {
    pub(crate) fn new(model_type: &'static str) -> Self {
        Self {
            model_type,
            running: AtomicBool::new(false),
            worker: Mutex::new(None),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Start ticking. Returns false if already running or the thread could not start.
    pub(crate) fn start(
        &self,
        target: Weak<dyn Reclaim>,
        interval: Duration,
        ttl: Duration,
    ) -> bool {
        let mut slot = mutex_lock(&self.worker, SOURCE, "start");
        if self.running.swap(true, Ordering::AcqRel) {
            return false;
        }

        let (stop, stop_rx) = mpsc::channel();
        let model_type = self.model_type;
        let spawned = thread::Builder::new()
            .name(format!("dcache-cleaner-{}", model_type.to_lowercase()))
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    let Some(target) = target.upgrade() else {
                        break;
                    };
                    let removed = target.reclaim_idle(ttl);
                    if removed > 0 {
                        info!(model_type, removed, "Reclaimed idle query plans");
                    }
                }
                debug!(model_type, "Query plan cleaner exited");
            });

        match spawned {
            Ok(handle) => {
                *slot = Some(Worker { stop, handle });
                debug!(
                    model_type,
                    interval_ms = interval.as_millis() as u64,
                    ttl_ms = ttl.as_millis() as u64,
                    "Query plan cleaner started"
                );
                true
            }
            Err(err) => {
                self.running.store(false, Ordering::Release);
                warn!(model_type, error = %err, "Failed to start query plan cleaner");
                false
            }
        }
    }

    /// Stop ticking and wait for the thread. Returns false if it was not running.
    pub(crate) fn stop(&self) -> bool {
        let worker = mutex_lock(&self.worker, SOURCE, "stop").take();
        self.running.store(false, Ordering::Release);
        let Some(Worker { stop, handle }) = worker else {
            return false;
        };

        let _ = stop.send(());
        if handle.thread().id() != thread::current().id() && handle.join().is_err() {
            warn!(
                model_type = self.model_type,
                "Query plan cleaner panicked before stopping"
            );
        }
        true
    }
}

impl Drop for TtlCleaner {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    use super::*;

    #[derive(Default)]
    struct Counting {
        ticks: AtomicUsize,
    }

    impl Reclaim for Counting {
        fn reclaim_idle(&self, _ttl: Duration) -> usize {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            0
        }
    }

    fn as_target(target: &Arc<Counting>) -> Weak<dyn Reclaim> {
        let weak: Weak<Counting> = Arc::downgrade(target);
        weak
    }

    fn wait_for(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn ticks_until_stopped() {
        let target = Arc::new(Counting::default());
        let weak = as_target(&target);
        let cleaner = TtlCleaner::new("Widget");

        assert!(cleaner.start(weak.clone(), Duration::from_millis(5), Duration::ZERO));
        assert!(!cleaner.start(weak, Duration::from_millis(5), Duration::ZERO));
        assert!(wait_for(|| target.ticks.load(Ordering::SeqCst) >= 2));

        assert!(cleaner.stop());
        assert!(!cleaner.is_running());
        let after_stop = target.ticks.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(target.ticks.load(Ordering::SeqCst), after_stop);
        assert!(!cleaner.stop());
    }

    #[test]
    fn stop_wakes_a_long_interval_immediately() {
        let target = Arc::new(Counting::default());
        let weak = as_target(&target);
        let cleaner = TtlCleaner::new("Widget");
        cleaner.start(weak, Duration::from_secs(3600), Duration::ZERO);

        let started = Instant::now();
        cleaner.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(target.ticks.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn exits_when_target_is_dropped() {
        let target = Arc::new(Counting::default());
        let weak = as_target(&target);
        let cleaner = TtlCleaner::new("Widget");
        cleaner.start(weak, Duration::from_millis(5), Duration::ZERO);
        drop(target);

        let finished = wait_for(|| {
            mutex_lock(&cleaner.worker, SOURCE, "test")
                .as_ref()
                .is_some_and(|worker| worker.handle.is_finished())
        });
        assert!(finished);
    }
}
