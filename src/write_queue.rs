use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tokio::time::Duration;

/// How long after a write completes its filesystem echoes are still ignored.
pub const SUPPRESSION_GRACE: Duration = Duration::from_millis(500);

type Slot = Arc<Mutex<()>>;

/// Per-file write ordering. Work queued for one path runs strictly after the previous
/// work for that path settles; different paths never wait on each other.
#[derive(Clone, Default)]
pub struct WriteSerializer {
    slots: Arc<StdMutex<HashMap<PathBuf, Slot>>>,
}

impl WriteSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn run<F, Fut, T>(&self, path: &Path, work: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let key = queue_key(path);
        let slot = self.slot(&key);
        let result = {
            let _turn = slot.lock().await;
            work().await
        };
        self.release(&key, slot);
        result
    }

    pub fn pending_paths(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    fn slot(&self, key: &Path) -> Slot {
        let mut slots = self
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        slots
            .entry(key.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn release(&self, key: &Path, slot: Slot) {
        let mut slots = self
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Map entry plus ours: nobody else is queued on this path.
        if Arc::strong_count(&slot) == 2 {
            slots.remove(key);
        }
    }
}

fn queue_key(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Counts engine writes in flight so the change watcher can drop their echoes.
#[derive(Clone)]
pub struct WriteSuppression {
    in_flight: Arc<AtomicUsize>,
    grace: Duration,
}

impl Default for WriteSuppression {
    fn default() -> Self {
        Self::new(SUPPRESSION_GRACE)
    }
}

impl WriteSuppression {
    pub fn new(grace: Duration) -> Self {
        Self {
            in_flight: Arc::new(AtomicUsize::new(0)),
            grace,
        }
    }

    pub fn begin(&self) -> SuppressionGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        SuppressionGuard {
            in_flight: self.in_flight.clone(),
            grace: self.grace,
        }
    }

    pub fn is_active(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }
}

/// Holds the in-flight count up until `grace` after it is dropped.
pub struct SuppressionGuard {
    in_flight: Arc<AtomicUsize>,
    grace: Duration,
}

impl Drop for SuppressionGuard {
    fn drop(&mut self) {
        let in_flight = self.in_flight.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let grace = self.grace;
                handle.spawn(async move {
                    tokio::time::sleep(grace).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                });
            }
            Err(_) => {
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[tokio::test]
    async fn same_path_work_never_overlaps() {
        let serializer = WriteSerializer::new();
        let busy = Arc::new(AtomicBool::new(false));
        let order = Arc::new(StdMutex::new(Vec::new()));
        let path = PathBuf::from("/tmp/relay-serializer-test.csv");

        let mut handles = Vec::new();
        for index in 0..8 {
            let serializer = serializer.clone();
            let busy = busy.clone();
            let order = order.clone();
            let path = path.clone();
            handles.push(tokio::spawn(async move {
                serializer
                    .run(&path, || async {
                        assert!(!busy.swap(true, Ordering::SeqCst), "overlapping writes");
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        order.lock().expect("order lock").push(index);
                        busy.store(false, Ordering::SeqCst);
                    })
                    .await;
            }));
        }
        for handle in handles {
            handle.await.expect("task");
        }
        assert_eq!(order.lock().expect("order lock").len(), 8);
        assert_eq!(serializer.pending_paths(), 0);
    }

    #[tokio::test]
    async fn different_paths_run_concurrently() {
        let serializer = WriteSerializer::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let first = {
            let serializer = serializer.clone();
            tokio::spawn(async move {
                serializer
                    .run(Path::new("/tmp/relay-a.csv"), || async move {
                        rx.await.expect("signal from other path");
                    })
                    .await;
            })
        };
        serializer
            .run(Path::new("/tmp/relay-b.csv"), || async move {
                tx.send(()).expect("send");
            })
            .await;
        tokio::time::timeout(Duration::from_secs(2), first)
            .await
            .expect("independent paths must not block")
            .expect("task");
    }

    #[tokio::test]
    async fn suppression_outlives_guard_by_grace() {
        let suppression = WriteSuppression::new(Duration::from_millis(100));
        assert!(!suppression.is_active());
        let guard = suppression.begin();
        assert!(suppression.is_active());
        drop(guard);
        assert!(suppression.is_active());
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!suppression.is_active());
    }

    #[test]
    fn guard_without_runtime_releases_immediately() {
        let suppression = WriteSuppression::new(Duration::from_secs(60));
        drop(suppression.begin());
        assert!(!suppression.is_active());
    }
}
