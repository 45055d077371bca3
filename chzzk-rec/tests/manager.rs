//! Task manager behaviour with fake platform and pipeline collaborators.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use chzzk_rec::config::{Channel, Config, Credentials, CredentialsProvider};
use chzzk_rec::manager::{TaskManager, desired_tasks};
use chzzk_rec::monitor::{LiveInfo, LiveStatus, LiveStatusClient};
use chzzk_rec::pipeline::{PipelineExit, PipelineOutcome, PipelineRequest, PipelineRunner, SessionMetrics};
use chzzk_rec::recorder::{TaskContext, TaskPhase, TaskSettings};
use chzzk_rec::resolver::{StreamHandle, StreamResolver};

struct AlwaysLive;

#[async_trait]
impl LiveStatusClient for AlwaysLive {
    async fn live_status(&self, _: &str, _: &Credentials) -> chzzk_rec::Result<LiveStatus> {
        Ok(LiveStatus::Live(LiveInfo {
            live_id: Some(1),
            title: "live".to_string(),
            category: None,
            channel_name: None,
            adult: false,
            media: None,
        }))
    }
}

struct FixedResolver;

#[async_trait]
impl StreamResolver for FixedResolver {
    async fn resolve(&self, channel: &Channel, _: &Credentials) -> chzzk_rec::Result<StreamHandle> {
        Ok(StreamHandle::new(&channel.id, "https://example.com/playlist.m3u8", "720p"))
    }

    async fn refresh(&self, handle: &StreamHandle, _: &Credentials) -> chzzk_rec::Result<StreamHandle> {
        Ok(handle.clone())
    }
}

/// Records until cancelled, then takes `stop_delay` to shut down.
#[derive(Default)]
struct SlowStopRunner {
    stop_delay: Duration,
    panic_first: bool,
    calls: AtomicUsize,
    active: Mutex<HashMap<String, usize>>,
    max_active: Mutex<HashMap<String, usize>>,
}

impl SlowStopRunner {
    fn enter(&self, channel: &str) {
        let mut active = self.active.lock();
        let count = active.entry(channel.to_string()).or_default();
        *count += 1;
        let mut max = self.max_active.lock();
        let peak = max.entry(channel.to_string()).or_default();
        *peak = (*peak).max(*count);
    }

    fn leave(&self, channel: &str) {
        if let Some(count) = self.active.lock().get_mut(channel) {
            *count -= 1;
        }
    }

    fn active_total(&self) -> usize {
        self.active.lock().values().sum()
    }
}

#[async_trait]
impl PipelineRunner for SlowStopRunner {
    async fn run(
        &self,
        request: PipelineRequest,
        _metrics: watch::Sender<SessionMetrics>,
        cancel: CancellationToken,
    ) -> PipelineOutcome {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panic_first && call == 0 {
            panic!("pipeline exploded");
        }

        self.enter(&request.channel);
        cancel.cancelled().await;
        tokio::time::sleep(self.stop_delay).await;
        self.leave(&request.channel);

        PipelineOutcome {
            exit: PipelineExit::Cancelled,
            fetcher_code: None,
            encoder_code: None,
            bytes_written: 0,
            duration: Duration::from_secs(1),
            output: None,
            handle: request.handle,
            refresh_failed: false,
            auth_rejected: false,
        }
    }
}

fn channel(identifier: &str, active: bool) -> Channel {
    Channel {
        id: format!("{identifier}-id"),
        name: identifier.to_uppercase(),
        output_dir: std::env::temp_dir().join("chzzk-rec-manager-tests"),
        identifier: identifier.to_string(),
        active,
        delay: None,
    }
}

fn config(channels: Vec<Channel>) -> Config {
    Config {
        channels,
        ..Default::default()
    }
}

fn manager(runner: Arc<SlowStopRunner>) -> TaskManager {
    let ctx = TaskContext {
        client: Arc::new(AlwaysLive),
        resolver: Arc::new(FixedResolver),
        runner,
        credentials: Arc::new(CredentialsProvider::fixed(Credentials::default())),
    };
    let settings = TaskSettings {
        poll_interval: Duration::from_secs(30),
        poll_jitter: Duration::ZERO,
        max_poll_errors: 3,
        backoff_base: Duration::from_secs(30),
        backoff_max: Duration::from_secs(480),
        auth_failure_threshold: 3,
    };
    TaskManager::new(ctx, settings, Duration::from_secs(30))
}

#[tokio::test(start_paused = true)]
async fn inactive_channels_are_never_started() {
    let runner = Arc::new(SlowStopRunner::default());
    let mut manager = manager(runner.clone());
    let config = config(vec![channel("a", true), channel("b", false)]);

    manager.start(desired_tasks(&config));
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(manager.channels(), vec!["a".to_string()]);
    let statuses = manager.board().snapshot();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].phase, TaskPhase::Recording);
    assert!(!runner.active.lock().contains_key("B"));

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn stagger_delay_postpones_first_poll() {
    let runner = Arc::new(SlowStopRunner::default());
    let mut manager = manager(runner.clone());
    let mut delayed = channel("late", true);
    delayed.delay = Some(20);

    manager.start(desired_tasks(&config(vec![channel("early", true), delayed])));
    tokio::time::sleep(Duration::from_secs(5)).await;

    let board = manager.board();
    assert_eq!(board.get("early").map(|s| s.phase), Some(TaskPhase::Recording));
    assert_eq!(board.get("late").map(|s| s.phase), Some(TaskPhase::Idle));

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(board.get("late").map(|s| s.phase), Some(TaskPhase::Recording));

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn rapid_reload_never_overlaps_recordings() {
    let runner = Arc::new(SlowStopRunner {
        stop_delay: Duration::from_secs(5),
        ..Default::default()
    });
    let mut manager = manager(runner.clone());
    let with_a = config(vec![channel("a", true)]);
    let without_a = config(vec![]);

    manager.start(desired_tasks(&with_a));
    tokio::time::sleep(Duration::from_secs(1)).await;

    for _ in 0..3 {
        manager.reload(&without_a);
        manager.reload(&with_a);
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(manager.channels(), vec!["a".to_string()]);
    assert_eq!(runner.max_active.lock().get("A").copied(), Some(1));
    assert_eq!(runner.active_total(), 1);

    let report = manager.shutdown().await;
    assert!(report.all_graceful());
    assert_eq!(runner.active_total(), 0);
}

#[tokio::test(start_paused = true)]
async fn reload_stops_removed_and_starts_added_channels() {
    let runner = Arc::new(SlowStopRunner::default());
    let mut manager = manager(runner.clone());

    manager.start(desired_tasks(&config(vec![channel("a", true), channel("b", true)])));
    tokio::time::sleep(Duration::from_secs(1)).await;

    let plan = manager.reload(&config(vec![channel("b", true), channel("c", true)]));
    assert_eq!(plan.stop, vec!["a".to_string()]);
    assert_eq!(plan.start.len(), 1);
    assert_eq!(plan.unchanged, 1);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(manager.channels(), vec!["b".to_string(), "c".to_string()]);
    assert!(manager.board().get("a").is_none());
    assert_eq!(runner.active.lock().get("A").copied(), Some(0));

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_waits_for_pipelines() {
    let runner = Arc::new(SlowStopRunner {
        stop_delay: Duration::from_secs(3),
        ..Default::default()
    });
    let mut manager = manager(runner.clone());
    manager.start(desired_tasks(&config(vec![channel("a", true), channel("b", true)])));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(runner.active_total(), 2);

    let report = manager.shutdown().await;

    assert_eq!(report.total_tasks, 2);
    assert_eq!(report.graceful_stops, 2);
    assert_eq!(runner.active_total(), 0);
    assert!(manager.is_empty());
    assert!(manager.board().is_empty());
}

#[tokio::test(start_paused = true)]
async fn panicked_task_is_restarted() {
    let runner = Arc::new(SlowStopRunner {
        panic_first: true,
        ..Default::default()
    });
    let mut manager = manager(runner.clone());
    manager.start(desired_tasks(&config(vec![channel("a", true)])));
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(manager.reconcile().await, 1);
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(runner.calls.load(Ordering::SeqCst), 2);
    assert_eq!(runner.active_total(), 1);
    assert_eq!(manager.reconcile().await, 0);

    manager.shutdown().await;
}
