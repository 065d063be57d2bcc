//! Per-device ownership of background tasks.

use std::collections::HashMap;
use std::time::Duration;

use camview_core::types::DbId;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct DeviceTasks {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Maps each device to the tasks running on its behalf.
///
/// Every device gets a child of the arena's cancellation token. Replacing,
/// removing and shutting down happen under the arena lock, so a device never
/// has two generations of tasks registered at once.
pub struct TaskArena {
    entries: Mutex<HashMap<DbId, DeviceTasks>>,
    cancel: CancellationToken,
    stop_timeout: Duration,
}

impl TaskArena {
    pub fn new(stop_timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
            stop_timeout,
        }
    }

    /// Stop the device's current tasks, then register the ones `start` spawns.
    ///
    /// `start` receives the token the new tasks must observe.
    pub async fn replace<F>(&self, device_id: DbId, start: F)
    where
        F: FnOnce(CancellationToken) -> Vec<JoinHandle<()>>,
    {
        let mut entries = self.entries.lock().await;
        if let Some(previous) = entries.remove(&device_id) {
            self.stop(device_id, previous).await;
        }

        let cancel = self.cancel.child_token();
        let handles = start(cancel.clone());
        tracing::debug!(device_id, tasks = handles.len(), "Device tasks started");
        entries.insert(device_id, DeviceTasks { cancel, handles });
    }

    /// Stop and forget the device's tasks. Returns whether any were registered.
    pub async fn remove(&self, device_id: DbId) -> bool {
        let mut entries = self.entries.lock().await;
        match entries.remove(&device_id) {
            Some(tasks) => {
                self.stop(device_id, tasks).await;
                true
            }
            None => false,
        }
    }

    pub async fn contains(&self, device_id: DbId) -> bool {
        self.entries.lock().await.contains_key(&device_id)
    }

    /// Devices that currently have tasks registered.
    pub async fn device_ids(&self) -> Vec<DbId> {
        self.entries.lock().await.keys().copied().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Cancel every device's tasks and wait for them.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let mut entries = self.entries.lock().await;
        for (device_id, tasks) in entries.drain() {
            self.stop(device_id, tasks).await;
        }
        tracing::info!("Task arena shut down");
    }

    async fn stop(&self, device_id: DbId, tasks: DeviceTasks) {
        tasks.cancel.cancel();
        for handle in tasks.handles {
            match tokio::time::timeout(self.stop_timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(device_id, error = %e, "Device task ended abnormally"),
                Err(_) => tracing::warn!(device_id, "Device task did not stop in time"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn waiters(
        stopped: &Arc<AtomicUsize>,
        count: usize,
    ) -> impl FnOnce(CancellationToken) -> Vec<JoinHandle<()>> {
        let stopped = Arc::clone(stopped);
        move |cancel| {
            (0..count)
                .map(|_| {
                    let cancel = cancel.clone();
                    let stopped = Arc::clone(&stopped);
                    tokio::spawn(async move {
                        cancel.cancelled().await;
                        stopped.fetch_add(1, Ordering::SeqCst);
                    })
                })
                .collect()
        }
    }

    #[tokio::test]
    async fn replace_stops_previous_generation() {
        let arena = TaskArena::new(Duration::from_secs(1));
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        arena.replace(1, waiters(&first, 2)).await;
        arena.replace(1, waiters(&second, 1)).await;

        assert_eq!(first.load(Ordering::SeqCst), 2);
        assert_eq!(second.load(Ordering::SeqCst), 0);
        assert_eq!(arena.len().await, 1);
    }

    #[tokio::test]
    async fn remove_only_touches_that_device() {
        let arena = TaskArena::new(Duration::from_secs(1));
        let one = Arc::new(AtomicUsize::new(0));
        let two = Arc::new(AtomicUsize::new(0));
        arena.replace(1, waiters(&one, 1)).await;
        arena.replace(2, waiters(&two, 1)).await;

        assert!(arena.remove(1).await);
        assert!(!arena.remove(1).await);

        assert_eq!(one.load(Ordering::SeqCst), 1);
        assert_eq!(two.load(Ordering::SeqCst), 0);
        assert!(arena.contains(2).await);
        assert!(!arena.contains(1).await);
    }

    #[tokio::test]
    async fn shutdown_stops_everything() {
        let arena = TaskArena::new(Duration::from_secs(1));
        let stopped = Arc::new(AtomicUsize::new(0));
        arena.replace(1, waiters(&stopped, 2)).await;
        arena.replace(2, waiters(&stopped, 1)).await;

        arena.shutdown().await;

        assert_eq!(stopped.load(Ordering::SeqCst), 3);
        assert!(arena.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_task_does_not_block_removal() {
        let arena = TaskArena::new(Duration::from_secs(2));
        arena
            .replace(1, |_cancel| vec![tokio::spawn(std::future::pending::<()>())])
            .await;

        assert!(arena.remove(1).await);
        assert!(arena.is_empty().await);
    }
}
