//! `Sweeper` runs a maintenance task on a timer and keeps running it until dropped.
//!
//! Each tick invokes the task once; a failed run is logged and counted, and the
//! timer keeps going. The sweeper cancels its background loop when it is dropped.

use async_trait::async_trait;
use log::{debug, info, warn};
use stats::SweeperStats;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

mod stats;

/// A unit of periodic maintenance work, such as deleting expired records.
#[async_trait]
pub trait SweepTask: Send + Sync + 'static {
    /// Short name of the task (for logging).
    fn name(&self) -> &str;

    /// Run one sweep pass.
    /// Returns the number of records removed by this pass.
    async fn sweep(&self) -> Result<u64, Box<dyn std::error::Error + Send + Sync>>;
}

#[derive(Debug)]
pub struct Sweeper {
    /// A cancellation token to signal shutdown.
    shutdown_token: CancellationToken,
    /// The task name (for logging).
    task_name: String,
    /// Statistics about the sweep runs
    stats: Arc<SweeperStats>,
}

#[derive(Debug, Clone)]
pub struct SweeperOptions {
    /// Time between the end of one pass and the start of the next (default: 60 s)
    pub interval: Duration,
    /// Delay before the first pass, so sweeps don't pile onto startup (default: 10 s)
    pub initial_delay: Duration,
}

impl Default for SweeperOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            initial_delay: Duration::from_secs(10),
        }
    }
}

impl Sweeper {
    /// Starts running a task periodically with the default options.
    ///
    /// When the `Sweeper` is dropped, the background loop stops.
    ///
    /// # Arguments
    /// * `task` - The maintenance task to run.
    pub fn start<T: SweepTask>(task: T) -> Self {
        Self::start_with_opt(task, Default::default())
    }

    /// Starts running a task periodically.
    ///
    /// When the `Sweeper` is dropped, the background loop stops.
    ///
    /// # Arguments
    /// * `task` - The maintenance task to run.
    /// * `opt` - Additional options for the sweeper.
    pub fn start_with_opt<T: SweepTask>(task: T, opt: SweeperOptions) -> Self {
        let shutdown_token = CancellationToken::new();
        let task_name = task.name().to_string();

        let mut handle = Self {
            shutdown_token,
            task_name,
            stats: Arc::new(SweeperStats::default()),
        };

        // Spawn the sweep loop
        handle.spawn(task, opt);
        handle
    }

    /// Gets the name of the task this sweeper runs
    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    /// Gets the number of passes that have run
    pub fn run_counter(&self) -> usize {
        self.stats.run_counter()
    }

    /// Gets the number of passes that returned an error
    pub fn failure_counter(&self) -> usize {
        self.stats.failure_counter()
    }

    /// Gets the total number of records removed across all passes
    pub fn removed_counter(&self) -> u64 {
        self.stats.removed_counter()
    }

    /// Starts the sweep loop.
    fn spawn<T: SweepTask>(&mut self, task: T, opt: SweeperOptions) {
        let shutdown_token = self.shutdown_token.clone();
        let task_name = self.task_name.clone();
        let stats = self.stats.clone();

        // Spawn a new task to drive the sweep passes
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_token.cancelled() => {
                    info!("Sweeper '{}' cancelled before its first pass", task_name);
                    return;
                }
                _ = tokio::time::sleep(opt.initial_delay) => {}
            }

            let mut tick = interval(opt.interval);
            loop {
                tokio::select! {
                    _ = shutdown_token.cancelled() => {
                        info!("Sweeper '{}' received shutdown signal", task_name);
                        break;
                    }
                    _ = tick.tick() => {}
                }

                let count = stats.increment_run_counter();
                debug!("Sweep '{}' starting (pass {})", task_name, count + 1);
                match task.sweep().await {
                    Ok(removed) => {
                        stats.add_removed(removed);
                        if removed > 0 {
                            info!("Sweep '{}' removed {} records", task_name, removed);
                        } else {
                            debug!("Sweep '{}' found nothing to remove", task_name);
                        }
                    }
                    Err(e) => {
                        stats.increment_failure_counter();
                        warn!("Sweep '{}' failed: {}", task_name, e);
                    }
                }
            }
        });
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        debug!("Sweeper '{}' is dropping, stopping loop", self.task_name);
        self.shutdown_token.cancel();
    }
}
