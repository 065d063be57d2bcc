//! Restart-on-failure supervision for long-running tasks.
//!
//! A supervised task is described by a factory producing a fresh future
//! for every attempt. When an attempt fails (returns an error or panics)
//! it is restarted after an exponentially growing delay. An attempt that
//! returns `Ok` is finished and not restarted. Cancelling a task's token
//! stops it for good.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type TaskFuture = Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send>>;

/// Builds one attempt of a task. Receives the task's cancellation token.
pub type TaskFactory = Arc<dyn Fn(CancellationToken) -> TaskFuture + Send + Sync>;

/// Wrap an async function of the cancellation token as a [`TaskFactory`].
pub fn task_factory<F, Fut>(f: F) -> TaskFactory
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Arc::new(move |cancel| -> TaskFuture { Box::pin(f(cancel)) })
}

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first restart.
    pub initial_delay: Duration,
    /// Upper bound on the delay between restarts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Calculate the next backoff delay, clamped to [`BackoffConfig::max_delay`].
pub fn next_delay(current: Duration, config: &BackoffConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Run attempts of `factory` until one succeeds or `cancel` fires.
///
/// An attempt that ran longer than the maximum delay counts as healthy and
/// resets the backoff.
pub async fn run_with_backoff(
    name: &str,
    factory: &TaskFactory,
    config: &BackoffConfig,
    cancel: &CancellationToken,
) {
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let started = Instant::now();
        let outcome = tokio::spawn(factory(cancel.clone())).await;

        if cancel.is_cancelled() {
            tracing::debug!(task = name, "Supervised task stopped");
            return;
        }

        match outcome {
            Ok(Ok(())) => {
                tracing::info!(task = name, "Supervised task finished");
                return;
            }
            Ok(Err(e)) => {
                tracing::warn!(task = name, attempt, error = %e, "Supervised task failed");
            }
            Err(e) => {
                tracing::error!(task = name, attempt, error = %e, "Supervised task panicked");
            }
        }

        if started.elapsed() > config.max_delay {
            delay = config.initial_delay;
        }

        tracing::info!(
            task = name,
            delay_ms = delay.as_millis() as u64,
            "Restarting supervised task"
        );
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        delay = next_delay(delay, config);
    }
}

struct Supervised {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns named tasks and restarts them with backoff when they fail.
pub struct Supervisor {
    tasks: Mutex<HashMap<String, Supervised>>,
    backoff: BackoffConfig,
    cancel: CancellationToken,
    stop_timeout: Duration,
}

impl Supervisor {
    pub fn new(backoff: BackoffConfig, stop_timeout: Duration) -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            backoff,
            cancel: CancellationToken::new(),
            stop_timeout,
        }
    }

    /// Start supervising `factory` under `name`, stopping any task of the same name first.
    pub async fn add(&self, name: impl Into<String>, factory: TaskFactory) {
        let name = name.into();
        let cancel = self.cancel.child_token();
        let handle = {
            let name = name.clone();
            let backoff = self.backoff.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                run_with_backoff(&name, &factory, &backoff, &cancel).await;
            })
        };

        let previous = self
            .tasks
            .lock()
            .await
            .insert(name.clone(), Supervised { cancel, handle });
        if let Some(previous) = previous {
            tracing::info!(task = %name, "Replacing supervised task");
            self.stop(&name, previous).await;
        }
    }

    /// Stop and forget the task named `name`. Returns whether it existed.
    pub async fn remove(&self, name: &str) -> bool {
        let removed = self.tasks.lock().await.remove(name);
        match removed {
            Some(task) => {
                self.stop(name, task).await;
                true
            }
            None => false,
        }
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.tasks.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Cancel every task and wait for each up to the stop timeout.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks: Vec<_> = self.tasks.lock().await.drain().collect();
        for (name, task) in tasks {
            self.stop(&name, task).await;
        }
        tracing::info!("Supervisor shut down");
    }

    async fn stop(&self, name: &str, task: Supervised) {
        task.cancel.cancel();
        if tokio::time::timeout(self.stop_timeout, task.handle).await.is_err() {
            tracing::warn!(task = name, "Supervised task did not stop in time");
        }
    }
}
