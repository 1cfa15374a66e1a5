use async_trait::async_trait;
use log::LevelFilter;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use sweeper::{SweepTask, Sweeper, SweeperOptions};

fn setup_logger() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(LevelFilter::Debug)
        .try_init();
}

/// A task that removes a fixed number of records on every pass.
struct CountingTask {
    passes: Arc<AtomicU64>,
    removed_per_pass: u64,
}

#[async_trait]
impl SweepTask for CountingTask {
    fn name(&self) -> &str {
        "counting"
    }

    async fn sweep(&self) -> Result<u64, Box<dyn std::error::Error + Send + Sync>> {
        self.passes.fetch_add(1, Ordering::SeqCst);
        Ok(self.removed_per_pass)
    }
}

/// A task that always fails.
struct FailingTask;

#[async_trait]
impl SweepTask for FailingTask {
    fn name(&self) -> &str {
        "failing"
    }

    async fn sweep(&self) -> Result<u64, Box<dyn std::error::Error + Send + Sync>> {
        Err("store unavailable".into())
    }
}

#[tokio::test]
async fn test_sweeper_runs_on_interval() {
    setup_logger();

    let passes = Arc::new(AtomicU64::new(0));
    let task = CountingTask {
        passes: passes.clone(),
        removed_per_pass: 3,
    };
    let opt = SweeperOptions {
        interval: Duration::from_millis(20),
        initial_delay: Duration::from_millis(0),
    };
    let sweeper = Sweeper::start_with_opt(task, opt);
    tokio::time::sleep(Duration::from_millis(110)).await;

    let runs = sweeper.run_counter();
    assert!(runs >= 3, "expected at least 3 passes, got {}", runs);
    assert_eq!(sweeper.failure_counter(), 0);
    assert_eq!(sweeper.removed_counter(), runs as u64 * 3);
    assert_eq!(passes.load(Ordering::SeqCst), runs as u64);
}

#[tokio::test]
async fn test_sweeper_stops_on_drop() {
    setup_logger();

    let passes = Arc::new(AtomicU64::new(0));
    let task = CountingTask {
        passes: passes.clone(),
        removed_per_pass: 0,
    };
    let opt = SweeperOptions {
        interval: Duration::from_millis(10),
        initial_delay: Duration::from_millis(0),
    };
    let sweeper = Sweeper::start_with_opt(task, opt);
    tokio::time::sleep(Duration::from_millis(60)).await;
    drop(sweeper);

    let after_drop = passes.load(Ordering::SeqCst);
    assert!(after_drop > 0, "sweeper never ran");

    // No further passes once the handle is gone
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(passes.load(Ordering::SeqCst), after_drop);
}

#[tokio::test]
async fn test_sweeper_keeps_running_after_failures() {
    setup_logger();

    let opt = SweeperOptions {
        interval: Duration::from_millis(10),
        initial_delay: Duration::from_millis(0),
    };
    let sweeper = Sweeper::start_with_opt(FailingTask, opt);
    tokio::time::sleep(Duration::from_millis(75)).await;

    assert!(
        sweeper.failure_counter() >= 3,
        "loop should survive failed passes, got {} failures",
        sweeper.failure_counter()
    );
    assert_eq!(sweeper.failure_counter(), sweeper.run_counter());
    assert_eq!(sweeper.removed_counter(), 0);
}

#[tokio::test]
async fn test_sweeper_honors_initial_delay() {
    setup_logger();

    let passes = Arc::new(AtomicU64::new(0));
    let task = CountingTask {
        passes: passes.clone(),
        removed_per_pass: 1,
    };
    let opt = SweeperOptions {
        interval: Duration::from_millis(10),
        initial_delay: Duration::from_millis(100),
    };
    let sweeper = Sweeper::start_with_opt(task, opt);

    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(sweeper.run_counter(), 0, "pass ran before the initial delay");

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(sweeper.run_counter() > 0, "no pass ran after the initial delay");
}
