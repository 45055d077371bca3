//! The set of recording tasks.
//!
//! The manager is the single source of truth for which channels are tasked.
//! Tasks are keyed by channel identifier; a reload is a diff against that
//! map (see [`plan`]). A task being stopped keeps running until its pipeline
//! is down, and a replacement for the same channel waits for it, so a
//! channel never has two recordings at once.

pub mod board;
pub mod plan;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Channel, Config, ConfigStore, CredentialsProvider};
use crate::recorder::{RecordingTask, TaskContext, TaskSettings};

pub use board::StatusBoard;
pub use plan::{DesiredTask, ReloadPlan, desired_tasks, plan_reload};

struct TaskEntry {
    channel: Channel,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Report from [`TaskManager::shutdown`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub total_tasks: usize,
    pub graceful_stops: usize,
    pub forced_terminations: usize,
}

impl ShutdownReport {
    pub fn all_graceful(&self) -> bool {
        self.forced_terminations == 0
    }
}

/// Owns one [`RecordingTask`] per active channel.
pub struct TaskManager {
    ctx: TaskContext,
    settings: TaskSettings,
    shutdown_timeout: Duration,
    root: CancellationToken,
    tasks: HashMap<String, TaskEntry>,
    /// Cancelled tasks that may still be stopping their pipeline.
    draining: HashMap<String, JoinHandle<()>>,
    board: StatusBoard,
}

impl TaskManager {
    pub fn new(ctx: TaskContext, settings: TaskSettings, shutdown_timeout: Duration) -> Self {
        Self {
            ctx,
            settings,
            shutdown_timeout,
            root: CancellationToken::new(),
            tasks: HashMap::new(),
            draining: HashMap::new(),
            board: StatusBoard::new(),
        }
    }

    /// Shared view of every task's status.
    pub fn board(&self) -> StatusBoard {
        self.board.clone()
    }

    /// Identifiers of the tasked channels, sorted.
    pub fn channels(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.tasks.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Settings used for tasks started from now on.
    pub fn set_settings(&mut self, settings: TaskSettings) {
        if settings != self.settings {
            info!("Recorder settings changed, applying to newly started tasks");
            self.settings = settings;
        }
    }

    /// Start a task for each desired channel.
    pub fn start(&mut self, desired: Vec<DesiredTask>) {
        for task in desired {
            self.spawn(task);
        }
        info!(tasks = self.tasks.len(), "Recording tasks started");
    }

    /// Bring the task set in line with `config`.
    pub fn reload(&mut self, config: &Config) -> ReloadPlan {
        self.prune_draining();
        let running: HashMap<String, Channel> = self
            .tasks
            .iter()
            .map(|(id, entry)| (id.clone(), entry.channel.clone()))
            .collect();
        let plan = plan_reload(&running, desired_tasks(config));
        if plan.is_empty() {
            return plan;
        }

        for identifier in &plan.stop {
            self.stop(identifier);
        }
        for task in &plan.restart {
            self.stop(&task.channel.identifier);
            self.spawn(task.clone());
        }
        for task in &plan.start {
            self.spawn(task.clone());
        }

        info!(
            started = plan.start.len(),
            stopped = plan.stop.len(),
            restarted = plan.restart.len(),
            unchanged = plan.unchanged,
            "Configuration reloaded"
        );
        plan
    }

    /// Restart tasks that ended without being asked to, e.g. after a panic.
    pub async fn reconcile(&mut self) -> usize {
        self.prune_draining();
        let finished: Vec<String> = self
            .tasks
            .iter()
            .filter(|(_, entry)| entry.handle.is_finished() && !entry.token.is_cancelled())
            .map(|(id, _)| id.clone())
            .collect();

        let mut restarted = 0;
        for identifier in finished {
            let Some(entry) = self.tasks.remove(&identifier) else {
                continue;
            };
            match entry.handle.await {
                Err(e) if e.is_panic() => {
                    error!(channel = %identifier, "Recording task panicked, restarting")
                }
                Err(e) => warn!(channel = %identifier, error = %e, "Recording task aborted, restarting"),
                Ok(()) => warn!(channel = %identifier, "Recording task exited, restarting"),
            }
            self.board.remove(&identifier);
            self.spawn(DesiredTask {
                channel: entry.channel,
                delay: Duration::ZERO,
            });
            restarted += 1;
        }
        restarted
    }

    /// Cancel every task and wait for their pipelines to stop, aborting
    /// whatever is still running after the shutdown timeout.
    pub async fn shutdown(&mut self) -> ShutdownReport {
        info!(tasks = self.tasks.len(), "Stopping all recording tasks");
        self.root.cancel();

        let mut handles: Vec<(String, JoinHandle<()>)> = self
            .tasks
            .drain()
            .map(|(id, entry)| (id, entry.handle))
            .chain(self.draining.drain())
            .collect();

        let mut report = ShutdownReport {
            total_tasks: handles.len(),
            ..Default::default()
        };
        let deadline = tokio::time::Instant::now() + self.shutdown_timeout;

        for (identifier, handle) in handles.iter_mut() {
            match tokio::time::timeout_at(deadline, &mut *handle).await {
                Ok(Ok(())) => report.graceful_stops += 1,
                Ok(Err(e)) => {
                    warn!(channel = %identifier, error = %e, "Task failed during shutdown");
                    report.forced_terminations += 1;
                }
                Err(_) => {
                    warn!(channel = %identifier, "Task did not stop in time, aborting");
                    handle.abort();
                    report.forced_terminations += 1;
                }
            }
            self.board.remove(identifier);
        }

        info!(
            total = report.total_tasks,
            graceful = report.graceful_stops,
            forced = report.forced_terminations,
            "Shutdown complete"
        );
        report
    }

    /// Poll the configuration every `interval`, apply changes, and restart
    /// crashed tasks until `shutdown` fires. Then stop everything.
    pub async fn run(
        mut self,
        store: ConfigStore,
        credentials: Arc<CredentialsProvider>,
        mut last: Config,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> ShutdownReport {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let store = store.clone();
                    let fresh = match tokio::task::spawn_blocking(move || store.load()).await {
                        Ok(config) => config,
                        Err(e) => {
                            warn!(error = %e, "Configuration reload task failed");
                            continue;
                        }
                    };
                    if fresh.credentials != last.credentials {
                        credentials.replace(fresh.credentials.clone());
                    }
                    if fresh != last {
                        self.set_settings(TaskSettings::from_settings(&fresh.settings));
                        self.reload(&fresh);
                        last = fresh;
                    }
                    self.reconcile().await;
                }
            }
        }

        self.shutdown().await
    }

    fn spawn(&mut self, task: DesiredTask) {
        let DesiredTask { channel, delay } = task;
        let identifier = channel.identifier.clone();
        let token = self.root.child_token();
        let (recording, rx) = RecordingTask::new(
            channel.clone(),
            delay,
            self.settings.clone(),
            self.ctx.clone(),
            token.clone(),
        );
        self.board.insert(&identifier, rx);

        let handle = match self.draining.remove(&identifier) {
            Some(previous) => {
                debug!(channel = %identifier, "Waiting for previous task to stop");
                tokio::spawn(async move {
                    let _ = previous.await;
                    recording.run().await;
                })
            }
            None => tokio::spawn(recording.run()),
        };

        self.tasks.insert(identifier, TaskEntry { channel, token, handle });
    }

    fn stop(&mut self, identifier: &str) {
        let Some(entry) = self.tasks.remove(identifier) else {
            return;
        };
        info!(channel = %identifier, "Stopping recording task");
        entry.token.cancel();
        self.board.remove(identifier);
        let handle = match self.draining.remove(identifier) {
            Some(older) => {
                let newer = entry.handle;
                tokio::spawn(async move {
                    let _ = older.await;
                    let _ = newer.await;
                })
            }
            None => entry.handle,
        };
        self.draining.insert(identifier.to_string(), handle);
    }

    fn prune_draining(&mut self) {
        self.draining.retain(|_, handle| !handle.is_finished());
    }
}
