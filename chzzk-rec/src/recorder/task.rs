//! The per-channel recording state machine.
//!
//! ```text
//! Idle -> Polling -> Resolving -> Recording -> Polling
//!            |           |             |
//!            +-----------+-------------+--> Retrying -> Polling
//! ```
//!
//! `Stopped` is entered from any state once the cancellation token fires.
//! The task is the only writer of its [`TaskStatus`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::backoff::Backoff;
use super::session::RecordingSession;
use super::state::{TaskPhase, TaskStatus};
use super::status::StatusPublisher;
use crate::Error;
use crate::config::{Channel, Credentials, CredentialsProvider, RecorderSettings};
use crate::monitor::{LiveInfo, LiveStatus, LiveStatusClient};
use crate::pipeline::{PipelineExit, PipelineRequest, PipelineRunner, SessionMetrics};
use crate::resolver::token::MIN_REFRESH_AFTER;
use crate::resolver::{StreamHandle, StreamResolver};
use crate::utils::filename::{recording_filename, unique_path};

/// Clean recordings shorter than this are logged as suspicious.
pub const SHORT_RECORDING: Duration = Duration::from_secs(10);

/// Timing and escalation knobs of a task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSettings {
    pub poll_interval: Duration,
    pub poll_jitter: Duration,
    /// Consecutive transient poll errors before backing off.
    pub max_poll_errors: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Consecutive auth failures before flagging the credentials.
    pub auth_failure_threshold: u32,
}

impl TaskSettings {
    pub fn from_settings(settings: &RecorderSettings) -> Self {
        Self {
            poll_interval: settings.poll_interval(),
            poll_jitter: Duration::from_secs(settings.poll_jitter_secs),
            max_poll_errors: settings.max_poll_errors.max(1),
            backoff_base: Duration::from_secs(settings.backoff_base_secs.max(1)),
            backoff_max: Duration::from_secs(settings.backoff_max_secs),
            auth_failure_threshold: settings.auth_failure_threshold.max(1),
        }
    }

    /// Poll interval with a random offset of up to `poll_jitter` either way.
    fn jittered_interval(&self) -> Duration {
        let jitter_ms = self.poll_jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.poll_interval;
        }
        let offset = rand::random::<u64>() % (jitter_ms * 2 + 1);
        let base = self.poll_interval.as_millis() as u64;
        Duration::from_millis((base + offset).saturating_sub(jitter_ms).max(1000))
    }
}

/// Collaborators shared by every task.
#[derive(Clone)]
pub struct TaskContext {
    pub client: Arc<dyn LiveStatusClient>,
    pub resolver: Arc<dyn StreamResolver>,
    pub runner: Arc<dyn PipelineRunner>,
    pub credentials: Arc<CredentialsProvider>,
}

/// A resolved handle kept for the next attempt on the same broadcast.
#[derive(Debug, Clone)]
struct CachedHandle {
    live_id: Option<u64>,
    handle: StreamHandle,
}

/// One channel's recording loop.
pub struct RecordingTask {
    channel: Channel,
    start_delay: Duration,
    settings: TaskSettings,
    ctx: TaskContext,
    status: StatusPublisher,
    cancel: CancellationToken,
    poll_errors: u32,
    poll_backoff: Backoff,
    pipeline_backoff: Backoff,
    auth_failures: u32,
    cached: Option<CachedHandle>,
}

impl RecordingTask {
    pub fn new(
        channel: Channel,
        start_delay: Duration,
        settings: TaskSettings,
        ctx: TaskContext,
        cancel: CancellationToken,
    ) -> (Self, watch::Receiver<TaskStatus>) {
        let (status, rx) = StatusPublisher::new(TaskStatus::new(&channel.identifier, channel.label()));
        let task = Self {
            poll_backoff: Backoff::new(settings.backoff_base, settings.backoff_max),
            pipeline_backoff: Backoff::new(settings.backoff_base, settings.backoff_max),
            channel,
            start_delay,
            settings,
            ctx,
            status,
            cancel,
            poll_errors: 0,
            auth_failures: 0,
            cached: None,
        };
        (task, rx)
    }

    /// Run until cancelled.
    pub async fn run(mut self) {
        info!(channel = %self.channel.identifier, delay_secs = self.start_delay.as_secs(), "Recording task started");

        if self.start_delay.is_zero() || self.sleep(self.start_delay).await {
            loop {
                self.status.phase(TaskPhase::Polling);
                let Some(wait) = self.cycle().await else {
                    break;
                };
                if !self.sleep(wait).await {
                    break;
                }
            }
        }

        self.status.phase(TaskPhase::Stopped);
        info!(channel = %self.channel.identifier, "Recording task stopped");
    }

    /// Sleep unless cancelled first. Returns `false` on cancellation.
    async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    fn poll_wait(&self) -> Duration {
        self.settings.jittered_interval()
    }

    /// One poll, plus a recording if the channel is live. Returns how long to
    /// wait before the next poll, `None` once cancelled.
    async fn cycle(&mut self) -> Option<Duration> {
        let credentials = self.ctx.credentials.get().await;
        let client = self.ctx.client.clone();

        let status = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return None,
            status = client.live_status(&self.channel.id, &credentials) => status,
        };

        match status {
            Ok(LiveStatus::Live(info)) => {
                self.poll_succeeded();
                self.record(info, credentials).await
            }
            Ok(LiveStatus::Offline) | Ok(LiveStatus::Blocked) => {
                self.poll_succeeded();
                self.cached = None;
                Some(self.poll_wait())
            }
            Err(e) if e.is_transient() => Some(self.poll_failed(e)),
            Err(e) if e.is_auth() => Some(self.auth_failed(&e, &credentials)),
            Err(e) => {
                error!(channel = %self.channel.identifier, error = %e, "Live status check failed");
                self.status.error(e.to_string());
                Some(self.settings.backoff_max.max(self.settings.poll_interval))
            }
        }
    }

    fn poll_succeeded(&mut self) {
        self.poll_errors = 0;
        self.poll_backoff.reset();
    }

    fn poll_failed(&mut self, err: Error) -> Duration {
        self.poll_errors += 1;
        warn!(
            channel = %self.channel.identifier,
            consecutive = self.poll_errors,
            error = %err,
            "Live status check failed"
        );
        self.status.error(err.to_string());

        if self.poll_errors < self.settings.max_poll_errors {
            return self.poll_wait();
        }
        let delay = self.poll_backoff.next_delay();
        self.status.phase(TaskPhase::Retrying {
            attempt: self.poll_backoff.failures(),
            delay,
        });
        delay
    }

    /// Count an auth rejection and pick the wait before the next poll.
    fn auth_failed(&mut self, err: &Error, credentials: &Credentials) -> Duration {
        self.status.error(err.to_string());

        if credentials.is_empty() {
            warn!(channel = %self.channel.identifier, error = %err, "Stream requires login and no credentials are configured");
            return self.poll_wait();
        }

        self.auth_failures += 1;
        self.ctx.credentials.invalidate();
        warn!(
            channel = %self.channel.identifier,
            consecutive = self.auth_failures,
            error = %err,
            "Credentials rejected"
        );

        if self.auth_failures < self.settings.auth_failure_threshold {
            return self.poll_wait();
        }
        if self.auth_failures == self.settings.auth_failure_threshold {
            error!(
                channel = %self.channel.identifier,
                "Credentials rejected repeatedly, check NID_AUT and NID_SES in the configuration"
            );
        }
        self.status.config_problem(Some(format!(
            "credentials rejected {} times in a row",
            self.auth_failures
        )));
        self.settings.backoff_max.max(self.settings.poll_interval)
    }

    fn auth_succeeded(&mut self) {
        self.auth_failures = 0;
        self.status.config_problem(None);
    }

    /// Reuse the last handle when it belongs to the same broadcast and is not
    /// about to expire.
    fn take_cached(&mut self, live_id: Option<u64>) -> Option<StreamHandle> {
        let cached = self.cached.take()?;
        if cached.live_id != live_id || live_id.is_none() {
            return None;
        }
        let fresh = cached
            .handle
            .expires_at
            .is_none_or(|exp| exp > chrono::Utc::now() + MIN_REFRESH_AFTER);
        fresh.then_some(cached.handle)
    }

    async fn resolve(&mut self, info: &LiveInfo, credentials: &Credentials) -> Option<Result<StreamHandle, Duration>> {
        if let Some(handle) = self.take_cached(info.live_id) {
            debug!(channel = %self.channel.identifier, "Reusing stream handle");
            return Some(Ok(handle));
        }

        self.status.phase(TaskPhase::Resolving);
        let resolver = self.ctx.resolver.clone();
        let resolved = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return None,
            resolved = resolver.resolve(&self.channel, credentials) => resolved,
        };

        Some(match resolved {
            Ok(handle) => {
                self.auth_succeeded();
                Ok(handle)
            }
            Err(Error::NotLive) => {
                debug!(channel = %self.channel.identifier, "Channel went offline before resolving");
                Err(self.poll_wait())
            }
            Err(e) if e.is_auth() => Err(self.auth_failed(&e, credentials)),
            Err(e) => {
                warn!(channel = %self.channel.identifier, error = %e, "Failed to resolve stream");
                self.status.error(e.to_string());
                Err(self.poll_wait())
            }
        })
    }

    async fn record(&mut self, info: LiveInfo, credentials: Credentials) -> Option<Duration> {
        let handle = match self.resolve(&info, &credentials).await? {
            Ok(handle) => handle,
            Err(cooldown) => {
                self.status.phase(TaskPhase::Polling);
                return Some(cooldown);
            }
        };

        let started_at = Local::now();
        let channel_name = info.channel_name.as_deref().unwrap_or(self.channel.label());
        let filename = recording_filename(channel_name, &info.title, started_at);
        let output_path = unique_path(&self.channel.output_dir, &filename);

        info!(
            channel = %self.channel.identifier,
            title = %info.title,
            quality = %handle.quality,
            output = %output_path.display(),
            "Channel is live, starting recording"
        );

        let mut session = RecordingSession::new(started_at, output_path.clone(), handle.quality.clone());
        self.status.clear_error();
        self.status.recording(&session);

        let (metrics_tx, mut metrics_rx) = watch::channel(SessionMetrics::default());
        let request = PipelineRequest {
            channel: self.channel.label().to_string(),
            handle,
            output_path,
            credentials,
        };
        let runner = self.ctx.runner.clone();
        let run = runner.run(request, metrics_tx, self.cancel.child_token());
        tokio::pin!(run);

        let mut metrics_open = true;
        let outcome = loop {
            tokio::select! {
                outcome = &mut run => break outcome,
                changed = metrics_rx.changed(), if metrics_open => {
                    if changed.is_err() {
                        metrics_open = false;
                        continue;
                    }
                    session.metrics = metrics_rx.borrow_and_update().clone();
                    self.status.session(&session);
                }
            }
        };

        if outcome.auth_rejected {
            let err = Error::auth("stream server rejected the session");
            let current = self.ctx.credentials.get().await;
            self.auth_failed(&err, &current);
        }
        self.cached = (!outcome.refresh_failed && !outcome.auth_rejected).then(|| CachedHandle {
            live_id: info.live_id,
            handle: outcome.handle.clone(),
        });

        match outcome.exit {
            PipelineExit::Cancelled => None,
            PipelineExit::Clean => {
                self.pipeline_backoff.reset();
                if outcome.duration < SHORT_RECORDING {
                    warn!(
                        channel = %self.channel.identifier,
                        duration_ms = outcome.duration.as_millis() as u64,
                        "Recording ended cleanly after a very short time"
                    );
                }
                info!(
                    channel = %self.channel.identifier,
                    bytes = outcome.bytes_written,
                    output = ?outcome.output,
                    "Stream ended"
                );
                Some(Duration::ZERO)
            }
            PipelineExit::Failed(e) => {
                let delay = self.pipeline_backoff.next_delay();
                if matches!(e, Error::PipelineStart(_)) {
                    error!(channel = %self.channel.identifier, error = %e, "Recording pipeline could not start");
                } else {
                    warn!(channel = %self.channel.identifier, error = %e, "Recording failed");
                }
                self.status.error(e.to_string());
                self.status.phase(TaskPhase::Retrying {
                    attempt: self.pipeline_backoff.failures(),
                    delay,
                });
                Some(delay)
            }
        }
    }
}
