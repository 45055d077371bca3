//! Two-stage subprocess pipeline supervision.
//!
//! One [`PipelineSupervisor::run`] call is one recording attempt: start the
//! playlist proxy, spawn the fetcher and the encoder, copy the fetcher's
//! stdout into the encoder's stdin, keep the stream token fresh, and when
//! either side exits (or the attempt is cancelled) stop the other one,
//! finalize the output file and classify the result. It never retries.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Child;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::command::{PipelineConfig, encoder_command, fetcher_command};
use super::metrics::{MetricsTracker, SessionMetrics};
use super::progress::{FetcherEvent, ParsedLine, ProgressParser, classify_fetcher_line};
use super::proxy::PlaylistProxy;
use super::reader::OutputRecordReader;
use crate::Error;
use crate::config::{Credentials, CredentialsProvider};
use crate::resolver::token::MIN_REFRESH_AFTER;
use crate::resolver::{StreamHandle, StreamResolver};
use crate::utils::fs::{ensure_dir_all_with_op, file_size, finalize_recording};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Everything one attempt needs.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    /// Channel label for logs.
    pub channel: String,
    pub handle: StreamHandle,
    /// In-progress output path (`*.ts.part`).
    pub output_path: PathBuf,
    pub credentials: Credentials,
}

/// How an attempt ended.
#[derive(Debug)]
pub enum PipelineExit {
    /// The fetcher exited 0 and the output reached the minimum size.
    Clean,
    /// Stopped through the cancellation token.
    Cancelled,
    /// [`Error::PipelineStart`] or [`Error::PipelineRuntime`].
    Failed(Error),
}

/// Result of one attempt.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub exit: PipelineExit,
    pub fetcher_code: Option<i32>,
    pub encoder_code: Option<i32>,
    pub bytes_written: u64,
    pub duration: Duration,
    /// Final recording path, `None` when nothing was kept.
    pub output: Option<PathBuf>,
    /// Latest handle, including any refreshed token.
    pub handle: StreamHandle,
    /// A token refresh failed during the attempt.
    pub refresh_failed: bool,
    /// The fetcher reported the stream rejected our credentials.
    pub auth_rejected: bool,
}

impl PipelineOutcome {
    fn start_failure(handle: StreamHandle, err: Error) -> Self {
        Self {
            exit: PipelineExit::Failed(err),
            fetcher_code: None,
            encoder_code: None,
            bytes_written: 0,
            duration: Duration::ZERO,
            output: None,
            handle,
            refresh_failed: false,
            auth_rejected: false,
        }
    }

    pub fn is_clean(&self) -> bool {
        matches!(self.exit, PipelineExit::Clean)
    }
}

/// Runs recording attempts.
#[async_trait]
pub trait PipelineRunner: Send + Sync {
    /// Run one attempt to completion. Metrics are published to `metrics` at
    /// most once per second.
    async fn run(
        &self,
        request: PipelineRequest,
        metrics: watch::Sender<SessionMetrics>,
        cancel: CancellationToken,
    ) -> PipelineOutcome;
}

/// Supervises `streamlink | ffmpeg`.
pub struct PipelineSupervisor {
    config: PipelineConfig,
    http: reqwest::Client,
    resolver: Arc<dyn StreamResolver>,
    credentials: Arc<CredentialsProvider>,
}

impl PipelineSupervisor {
    pub fn new(
        config: PipelineConfig,
        http: reqwest::Client,
        resolver: Arc<dyn StreamResolver>,
        credentials: Arc<CredentialsProvider>,
    ) -> Self {
        Self {
            config,
            http,
            resolver,
            credentials,
        }
    }
}

#[derive(Debug, Default)]
struct FetcherSummary {
    last_error: Option<String>,
    auth_rejected: bool,
}

enum FirstExit {
    Cancelled,
    Fetcher(std::io::Result<ExitStatus>),
    Encoder(std::io::Result<ExitStatus>),
}

fn exit_code(status: &std::io::Result<ExitStatus>) -> Option<i32> {
    status.as_ref().ok().and_then(|s| s.code())
}

#[async_trait]
impl PipelineRunner for PipelineSupervisor {
    async fn run(
        &self,
        request: PipelineRequest,
        metrics: watch::Sender<SessionMetrics>,
        cancel: CancellationToken,
    ) -> PipelineOutcome {
        let PipelineRequest {
            channel,
            handle,
            output_path,
            credentials,
        } = request;

        if let Some(dir) = output_path.parent()
            && let Err(e) = ensure_dir_all_with_op("creating output directory", dir).await
        {
            return PipelineOutcome::start_failure(handle, Error::PipelineStart(e.to_string()));
        }

        let (handle_tx, handle_rx) = watch::channel(handle.clone());
        let refresh_now = Arc::new(Notify::new());
        let proxy = match PlaylistProxy::start(
            self.http.clone(),
            credentials.clone(),
            self.config.quality.clone(),
            handle_rx.clone(),
            refresh_now.clone(),
        )
        .await
        {
            Ok(proxy) => proxy,
            Err(e) => {
                error!(channel = %channel, error = %e, "Playlist proxy could not be started");
                return PipelineOutcome::start_failure(handle, e);
            }
        };

        let fetcher_spec = fetcher_command(&self.config, &proxy.url(), &credentials);
        let encoder_spec = encoder_command(&self.config, &output_path);
        debug!(channel = %channel, command = %fetcher_spec.redacted(), "Spawning fetcher");
        debug!(channel = %channel, command = %encoder_spec.redacted(), "Spawning encoder");

        let mut fetcher = match fetcher_spec.to_command(Stdio::null(), Stdio::piped()).spawn() {
            Ok(child) => child,
            Err(e) => {
                proxy.stop().await;
                let err = Error::PipelineStart(format!(
                    "failed to spawn fetcher {}: {e}",
                    self.config.streamlink.display()
                ));
                error!(channel = %channel, error = %err, "Fetcher could not be started");
                return PipelineOutcome::start_failure(handle, err);
            }
        };

        let mut encoder = match encoder_spec.to_command(Stdio::piped(), Stdio::null()).spawn() {
            Ok(child) => child,
            Err(e) => {
                let _ = process_utils::terminate_gracefully(&mut fetcher, self.config.stop_grace).await;
                proxy.stop().await;
                let err = Error::PipelineStart(format!(
                    "failed to spawn encoder {}: {e}",
                    self.config.ffmpeg.display()
                ));
                error!(channel = %channel, error = %err, "Encoder could not be started");
                return PipelineOutcome::start_failure(handle, err);
            }
        };

        let (Some(fetcher_stdout), Some(fetcher_stderr), Some(encoder_stdin), Some(encoder_stderr)) = (
            fetcher.stdout.take(),
            fetcher.stderr.take(),
            encoder.stdin.take(),
            encoder.stderr.take(),
        ) else {
            let _ = process_utils::terminate_gracefully(&mut fetcher, self.config.stop_grace).await;
            let _ = process_utils::terminate_gracefully(&mut encoder, self.config.stop_grace).await;
            proxy.stop().await;
            return PipelineOutcome::start_failure(
                handle,
                Error::PipelineStart("failed to capture subprocess pipes".to_string()),
            );
        };

        info!(channel = %channel, output = %output_path.display(), quality = %handle.quality, "Recording started");
        let started = Instant::now();

        let copy_task = tokio::spawn(copy_stream(fetcher_stdout, encoder_stdin));
        let fetcher_log = tokio::spawn(watch_fetcher(fetcher_stderr, channel.clone()));
        let encoder_log = tokio::spawn(watch_encoder(
            encoder_stderr,
            channel.clone(),
            MetricsTracker::new(metrics, started),
        ));

        let refresh_cancel = cancel.child_token();
        let refresher = tokio::spawn(refresh_loop(
            self.resolver.clone(),
            self.credentials.clone(),
            handle_tx,
            self.config.token_refresh_lead,
            refresh_now,
            refresh_cancel.clone(),
        ));

        let grace = self.config.stop_grace;
        let first = tokio::select! {
            biased;
            _ = cancel.cancelled() => FirstExit::Cancelled,
            status = fetcher.wait() => FirstExit::Fetcher(status),
            status = encoder.wait() => FirstExit::Encoder(status),
        };

        let cancelled = matches!(first, FirstExit::Cancelled);
        let (fetcher_status, encoder_status) = match first {
            FirstExit::Cancelled => {
                info!(channel = %channel, "Stopping recording");
                let fetcher_status = process_utils::terminate_gracefully(&mut fetcher, grace).await;
                let encoder_status = drain_encoder(&mut encoder, copy_task, grace).await;
                (fetcher_status, encoder_status)
            }
            FirstExit::Fetcher(status) => {
                debug!(channel = %channel, status = ?status, "Fetcher exited");
                let encoder_status = drain_encoder(&mut encoder, copy_task, grace).await;
                (status, encoder_status)
            }
            FirstExit::Encoder(status) => {
                warn!(channel = %channel, status = ?status, "Encoder exited before the fetcher");
                let fetcher_status = process_utils::terminate_gracefully(&mut fetcher, grace).await;
                let _ = copy_task.await;
                (fetcher_status, status)
            }
        };

        refresh_cancel.cancel();
        let refresh_failed = refresher.await.unwrap_or(true);
        proxy.stop().await;
        let fetcher_summary = fetcher_log.await.unwrap_or_default();
        let final_metrics = encoder_log.await.unwrap_or_default();

        let duration = started.elapsed();
        let fetcher_code = exit_code(&fetcher_status);
        let encoder_code = exit_code(&encoder_status);
        let size_on_disk = file_size(&output_path).await;
        let bytes_written = size_on_disk.max(final_metrics.bytes_written);

        let output = match finalize_recording(&output_path).await {
            Ok(path) => path,
            Err(e) => {
                error!(channel = %channel, error = %e, "Failed to finalize recording");
                None
            }
        };

        let handle = handle_rx.borrow().clone();

        let exit = classify(
            cancelled,
            fetcher_code,
            encoder_code,
            size_on_disk,
            self.config.min_output_bytes,
            fetcher_summary.last_error.as_deref(),
        );

        info!(
            channel = %channel,
            fetcher_code = ?fetcher_code,
            encoder_code = ?encoder_code,
            bytes = bytes_written,
            duration_secs = duration.as_secs(),
            exit = ?exit,
            "Recording attempt finished"
        );

        PipelineOutcome {
            exit,
            fetcher_code,
            encoder_code,
            bytes_written,
            duration,
            output,
            handle,
            refresh_failed,
            auth_rejected: fetcher_summary.auth_rejected,
        }
    }
}

/// Classify an attempt from the fetcher's exit code and the output size.
pub fn classify(
    cancelled: bool,
    fetcher_code: Option<i32>,
    encoder_code: Option<i32>,
    output_bytes: u64,
    min_output_bytes: u64,
    fetcher_error: Option<&str>,
) -> PipelineExit {
    if cancelled {
        return PipelineExit::Cancelled;
    }

    match fetcher_code {
        Some(0) if output_bytes >= min_output_bytes => PipelineExit::Clean,
        Some(0) => PipelineExit::Failed(Error::PipelineRuntime(format!(
            "stream ended with {output_bytes} bytes written (minimum {min_output_bytes})"
        ))),
        code => {
            let fetcher = code.map_or_else(|| "terminated".to_string(), |c| format!("exit {c}"));
            let encoder = encoder_code.map_or_else(|| "terminated".to_string(), |c| format!("exit {c}"));
            let detail = fetcher_error.map(|e| format!(": {e}")).unwrap_or_default();
            PipelineExit::Failed(Error::PipelineRuntime(format!(
                "fetcher {fetcher}, encoder {encoder}{detail}"
            )))
        }
    }
}

/// Wait for the copy task to close the encoder's input and the encoder to
/// finish, both within `grace`, then stop it.
async fn drain_encoder(
    encoder: &mut Child,
    copy_task: JoinHandle<u64>,
    grace: Duration,
) -> std::io::Result<ExitStatus> {
    let deadline = tokio::time::Instant::now() + grace;
    if tokio::time::timeout_at(deadline, copy_task).await.is_err() {
        debug!("Fetcher output still flowing after the grace period");
    }

    match tokio::time::timeout_at(deadline, encoder.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!("Encoder did not finish after its input closed, terminating");
            process_utils::terminate_gracefully(encoder, grace).await
        }
    }
}

/// Copy fetcher output into the encoder until either side closes.
async fn copy_stream<R, W>(mut reader: R, mut writer: W) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        match reader.read(&mut buffer).await {
            Ok(0) => break,
            Ok(n) => {
                if writer.write_all(&buffer[..n]).await.is_err() {
                    break;
                }
                total += n as u64;
            }
            Err(e) => {
                debug!(error = %e, "Fetcher stdout read failed");
                break;
            }
        }
    }
    let _ = writer.shutdown().await;
    total
}

async fn watch_fetcher<R>(stderr: R, channel: String) -> FetcherSummary
where
    R: AsyncRead + Unpin,
{
    let mut reader = OutputRecordReader::new(stderr);
    let mut summary = FetcherSummary::default();

    loop {
        match reader.next_record().await {
            Ok(Some(line)) => match classify_fetcher_line(&line) {
                FetcherEvent::Opening => info!(channel = %channel, "Fetcher opened stream"),
                FetcherEvent::Ended => info!(channel = %channel, "Fetcher reports stream ended"),
                FetcherEvent::Error(message) => {
                    warn!(channel = %channel, error = %message, "Fetcher error");
                    if message.contains("403") || message.contains("401") {
                        summary.auth_rejected = true;
                    }
                    summary.last_error = Some(message);
                }
                FetcherEvent::Other => debug!(target: "chzzk_rec::fetcher", channel = %channel, "{line}"),
            },
            Ok(None) => break,
            Err(e) => {
                debug!(channel = %channel, error = %e, "Error reading fetcher stderr");
                break;
            }
        }
    }
    summary
}

async fn watch_encoder<R>(stderr: R, channel: String, mut tracker: MetricsTracker) -> SessionMetrics
where
    R: AsyncRead + Unpin,
{
    let mut reader = OutputRecordReader::new(stderr);
    let mut parser = ProgressParser::new();

    loop {
        match reader.next_record().await {
            Ok(Some(line)) => match parser.feed(&line) {
                ParsedLine::Report(report) => tracker.record(&report, Instant::now()),
                ParsedLine::Pending => {}
                ParsedLine::Unparsed => {
                    debug!(target: "chzzk_rec::encoder", channel = %channel, "{line}")
                }
            },
            Ok(None) => break,
            Err(e) => {
                debug!(channel = %channel, error = %e, "Error reading encoder stderr");
                break;
            }
        }
    }

    tracker.publish(Instant::now());
    tracker.current().clone()
}

/// Renew the token ahead of expiry, or at once when the playlist proxy
/// reports a rejected token, and publish each renewed handle to the proxy.
///
/// Returns whether the last refresh attempt failed.
async fn refresh_loop(
    resolver: Arc<dyn StreamResolver>,
    credentials: Arc<CredentialsProvider>,
    handle: watch::Sender<StreamHandle>,
    lead: Duration,
    refresh_now: Arc<Notify>,
    cancel: CancellationToken,
) -> bool {
    let lead = chrono::Duration::from_std(lead).unwrap_or(chrono::Duration::hours(3));
    let mut retry_at: Option<chrono::DateTime<Utc>> = None;
    let mut scheduled = true;
    let mut failed = false;

    loop {
        let current = handle.borrow().clone();
        let due = if scheduled {
            retry_at.or_else(|| current.refresh_at(lead))
        } else {
            None
        };
        if due.is_none() && scheduled {
            debug!(channel_id = %current.channel_id, "Stream URL carries no expiry, refreshing on demand only");
        }
        let wait = due.map(|due| (due - Utc::now()).to_std().unwrap_or(Duration::ZERO));

        tokio::select! {
            _ = cancel.cancelled() => return failed,
            _ = refresh_now.notified() => {
                debug!(channel_id = %current.channel_id, "Token refresh requested");
            }
            _ = sleep_for(wait) => {}
        }

        match resolver.refresh(&current, &credentials.get().await).await {
            Ok(renewed) => {
                info!(channel_id = %renewed.channel_id, expires_at = ?renewed.expires_at, "Stream token refreshed");
                handle.send_replace(renewed);
                retry_at = None;
                scheduled = true;
                failed = false;
            }
            Err(e) => {
                warn!(channel_id = %current.channel_id, error = %e, "Stream token refresh failed");
                failed = true;

                let next = Utc::now() + MIN_REFRESH_AFTER;
                match current.expires_at {
                    Some(expires_at) if e.is_transient() && next < expires_at => retry_at = Some(next),
                    _ => {
                        retry_at = None;
                        scheduled = false;
                    }
                }
            }
        }
    }
}

async fn sleep_for(wait: Option<Duration>) {
    match wait {
        Some(wait) => tokio::time::sleep(wait).await,
        None => std::future::pending().await,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::Channel;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::TempDir;

    /// Answers refreshes from a script and records when each one happened.
    struct ScriptedRefresh {
        answers: Mutex<VecDeque<crate::Result<String>>>,
        calls: Mutex<Vec<tokio::time::Instant>>,
    }

    impl ScriptedRefresh {
        fn new(answers: Vec<crate::Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<tokio::time::Instant> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl StreamResolver for ScriptedRefresh {
        async fn resolve(&self, _: &Channel, _: &Credentials) -> crate::Result<StreamHandle> {
            Err(Error::NotLive)
        }

        async fn refresh(&self, handle: &StreamHandle, _: &Credentials) -> crate::Result<StreamHandle> {
            self.calls.lock().push(tokio::time::Instant::now());
            let answer = self
                .answers
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(Error::transient("unavailable")));
            handle.with_token_from(&answer?)
        }
    }

    fn token_url(token: &str, expires_in: chrono::Duration) -> String {
        let exp = (Utc::now() + expires_in).timestamp();
        format!("https://cdn.example/live/playlist.m3u8?hdnts={token}&exp={exp}")
    }

    fn spawn_refresh(
        resolver: Arc<ScriptedRefresh>,
        handle: StreamHandle,
    ) -> (JoinHandle<bool>, watch::Receiver<StreamHandle>, Arc<Notify>, CancellationToken) {
        let (tx, rx) = watch::channel(handle);
        let notify = Arc::new(Notify::new());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(refresh_loop(
            resolver,
            Arc::new(CredentialsProvider::fixed(Credentials::default())),
            tx,
            Duration::from_secs(3 * 3600),
            notify.clone(),
            cancel.clone(),
        ));
        (task, rx, notify, cancel)
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_fires_ahead_of_expiry() {
        let expires_in = chrono::Duration::hours(3) + chrono::Duration::minutes(10);
        let handle = StreamHandle::new("abc", token_url("one", expires_in), "1080p");
        let resolver = ScriptedRefresh::new(vec![Ok(token_url("two", chrono::Duration::days(1)))]);
        let started = tokio::time::Instant::now();

        let (task, mut rx, _notify, cancel) = spawn_refresh(resolver.clone(), handle);
        rx.changed().await.unwrap();

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(595) && elapsed <= Duration::from_secs(601), "{elapsed:?}");
        assert_eq!(rx.borrow().token().as_deref(), Some("two"));
        assert_eq!(resolver.calls().len(), 1);

        cancel.cancel();
        assert!(!task.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_refresh_error_retries_after_a_minute() {
        let handle = StreamHandle::new("abc", token_url("one", chrono::Duration::hours(2)), "1080p");
        let resolver = ScriptedRefresh::new(vec![
            Err(Error::transient("timed out")),
            Ok(token_url("two", chrono::Duration::days(1))),
        ]);

        let (task, mut rx, _notify, cancel) = spawn_refresh(resolver.clone(), handle);
        rx.changed().await.unwrap();

        let calls = resolver.calls();
        assert_eq!(calls.len(), 2);
        let gap = calls[1] - calls[0];
        assert!(gap >= Duration::from_secs(59) && gap <= Duration::from_secs(61), "{gap:?}");
        assert_eq!(rx.borrow().token().as_deref(), Some("two"));

        cancel.cancel();
        assert!(!task.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_refresh_error_stops_scheduling() {
        let handle = StreamHandle::new("abc", token_url("one", chrono::Duration::hours(2)), "1080p");
        let resolver = ScriptedRefresh::new(vec![Err(Error::auth("cookies rejected"))]);

        let (task, rx, _notify, cancel) = spawn_refresh(resolver.clone(), handle);
        tokio::time::sleep(Duration::from_secs(3600)).await;

        assert_eq!(resolver.calls().len(), 1);
        assert_eq!(rx.borrow().token().as_deref(), Some("one"));
        cancel.cancel();
        assert!(task.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_token_refreshes_on_demand() {
        let handle = StreamHandle::new("abc", "https://cdn.example/live/playlist.m3u8?hdnts=one", "1080p");
        let resolver = ScriptedRefresh::new(vec![Ok(token_url("two", chrono::Duration::days(1)))]);

        let (task, mut rx, notify, cancel) = spawn_refresh(resolver.clone(), handle);
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(resolver.calls().is_empty());

        notify.notify_one();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().token().as_deref(), Some("two"));

        cancel.cancel();
        assert!(!task.await.unwrap());
    }

    const FAKE_ENCODER: &str = r#"#!/bin/sh
for last; do :; done
cat > "$last"
size=$(wc -c < "$last")
echo "total_size=$size" >&2
echo "out_time_us=2000000" >&2
echo "speed=1.00x" >&2
echo "progress=end" >&2
exit 0
"#;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn supervisor_with(dir: &Path, fetcher_body: &str, resolver: Arc<dyn StreamResolver>) -> PipelineSupervisor {
        let config = PipelineConfig {
            streamlink: script(dir, "fake-streamlink", fetcher_body),
            ffmpeg: script(dir, "fake-ffmpeg", FAKE_ENCODER),
            plugin_dir: None,
            quality: "best".to_string(),
            threads: 1,
            stop_grace: Duration::from_secs(2),
            min_output_bytes: 1,
            token_refresh_lead: Duration::from_secs(3 * 3600),
        };
        PipelineSupervisor::new(
            config,
            reqwest::Client::new(),
            resolver,
            Arc::new(CredentialsProvider::fixed(Credentials::default())),
        )
    }

    fn supervisor(dir: &Path, fetcher_body: &str) -> PipelineSupervisor {
        supervisor_with(dir, fetcher_body, ScriptedRefresh::new(Vec::new()))
    }

    fn request(dir: &Path) -> PipelineRequest {
        PipelineRequest {
            channel: "tester".to_string(),
            handle: StreamHandle::new("abc", "https://example.com/hls/playlist.m3u8", "1080p"),
            output_path: dir.join("out").join("recording.ts.part"),
            credentials: Credentials::default(),
        }
    }

    #[tokio::test]
    async fn test_clean_run_finalizes_output() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(dir.path(), "#!/bin/sh\nprintf 'segment-data'\nexit 0\n");
        let (tx, rx) = watch::channel(SessionMetrics::default());

        let outcome = sup.run(request(dir.path()), tx, CancellationToken::new()).await;

        assert!(outcome.is_clean(), "unexpected exit: {:?}", outcome.exit);
        assert_eq!(outcome.fetcher_code, Some(0));
        assert_eq!(outcome.bytes_written, 12);
        assert!(!outcome.refresh_failed);
        let output = outcome.output.expect("output kept");
        assert_eq!(output, dir.path().join("out").join("recording.ts"));
        assert_eq!(std::fs::read(&output).unwrap(), b"segment-data");
        assert!(!dir.path().join("out").join("recording.ts.part").exists());
        assert_eq!(rx.borrow().bytes_written, 12);
    }

    #[tokio::test]
    async fn test_fetcher_reads_from_local_proxy() {
        let dir = TempDir::new().unwrap();
        let argv = dir.path().join("argv");
        let body = format!(
            "#!/bin/sh\nprintf '%s' \"$2\" > '{}'\nprintf 'x'\nexit 0\n",
            argv.display()
        );
        let sup = supervisor(dir.path(), &body);
        let (tx, _rx) = watch::channel(SessionMetrics::default());

        let outcome = sup.run(request(dir.path()), tx, CancellationToken::new()).await;

        assert!(outcome.is_clean(), "unexpected exit: {:?}", outcome.exit);
        let url = std::fs::read_to_string(&argv).unwrap();
        assert!(url.starts_with("hls://http://127.0.0.1:"), "{url}");
        assert!(url.ends_with("/live.m3u8"), "{url}");
        assert!(!url.contains("example.com"));
    }

    #[tokio::test]
    async fn test_failed_refresh_does_not_stop_recording() {
        let dir = TempDir::new().unwrap();
        let resolver = ScriptedRefresh::new(vec![Err(Error::auth("cookies rejected"))]);
        let sup = supervisor_with(
            dir.path(),
            "#!/bin/sh\nsleep 0.5\nprintf 'segment-data'\nexit 0\n",
            resolver.clone(),
        );
        let mut req = request(dir.path());
        req.handle = StreamHandle::new("abc", token_url("one", chrono::Duration::minutes(30)), "1080p");
        req.handle.issued_at = Utc::now() - chrono::Duration::minutes(5);
        let (tx, _rx) = watch::channel(SessionMetrics::default());

        let outcome = sup.run(req, tx, CancellationToken::new()).await;

        assert!(outcome.is_clean(), "unexpected exit: {:?}", outcome.exit);
        assert!(outcome.refresh_failed);
        assert_eq!(resolver.calls().len(), 1);
        assert_eq!(outcome.handle.token().as_deref(), Some("one"));
    }

    #[tokio::test]
    async fn test_fetcher_error_is_failure() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(
            dir.path(),
            "#!/bin/sh\necho '[cli][error] Unable to open URL: 403 Client Error: Forbidden' >&2\nexit 1\n",
        );
        let (tx, _rx) = watch::channel(SessionMetrics::default());

        let outcome = sup.run(request(dir.path()), tx, CancellationToken::new()).await;

        assert!(matches!(outcome.exit, PipelineExit::Failed(Error::PipelineRuntime(_))));
        assert_eq!(outcome.fetcher_code, Some(1));
        assert!(outcome.auth_rejected);
        assert!(outcome.output.is_none());
        assert!(!dir.path().join("out").join("recording.ts.part").exists());
    }

    #[tokio::test]
    async fn test_cancel_stops_pipeline_and_keeps_output() {
        let dir = TempDir::new().unwrap();
        let sup = supervisor(
            dir.path(),
            "#!/bin/sh\nwhile true; do printf 'chunk'; sleep 0.05; done\n",
        );
        let (tx, _rx) = watch::channel(SessionMetrics::default());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(400)).await;
            trigger.cancel();
        });

        let outcome = sup.run(request(dir.path()), tx, cancel).await;

        assert!(matches!(outcome.exit, PipelineExit::Cancelled));
        let output = outcome.output.expect("partial output kept");
        assert!(std::fs::metadata(output).unwrap().len() > 0);
    }

    #[tokio::test]
    async fn test_missing_fetcher_is_start_failure() {
        let dir = TempDir::new().unwrap();
        let mut sup = supervisor(dir.path(), "#!/bin/sh\nexit 0\n");
        sup.config.streamlink = dir.path().join("does-not-exist");
        let (tx, _rx) = watch::channel(SessionMetrics::default());

        let outcome = sup.run(request(dir.path()), tx, CancellationToken::new()).await;

        assert!(matches!(outcome.exit, PipelineExit::Failed(Error::PipelineStart(_))));
        assert!(outcome.output.is_none());
    }

    #[tokio::test]
    async fn test_drain_waits_for_input_to_close() {
        let mut encoder = process_utils::tokio_command("sh")
            .args(["-c", "cat > /dev/null"])
            .stdin(Stdio::piped())
            .spawn()
            .unwrap();
        let stdin = encoder.stdin.take().unwrap();
        let copy_task = tokio::spawn(copy_stream(&b"payload"[..], stdin));
        let started = Instant::now();

        let status = drain_encoder(&mut encoder, copy_task, Duration::from_secs(5)).await.unwrap();

        assert!(status.success());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_drain_stops_encoder_when_input_never_closes() {
        let mut encoder = process_utils::tokio_command("sleep")
            .arg("30")
            .stdin(Stdio::null())
            .spawn()
            .unwrap();
        let copy_task = tokio::spawn(async {
            std::future::pending::<()>().await;
            0u64
        });
        let started = Instant::now();

        let status = drain_encoder(&mut encoder, copy_task, Duration::from_millis(300)).await.unwrap();

        assert!(!status.success());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_classify() {
        assert!(matches!(classify(true, Some(0), Some(0), 100, 1, None), PipelineExit::Cancelled));
        assert!(matches!(classify(false, Some(0), Some(0), 100, 1, None), PipelineExit::Clean));
        assert!(matches!(
            classify(false, Some(0), Some(0), 0, 1, None),
            PipelineExit::Failed(Error::PipelineRuntime(_))
        ));
        match classify(false, Some(1), None, 100, 1, Some("boom")) {
            PipelineExit::Failed(Error::PipelineRuntime(msg)) => {
                assert_eq!(msg, "fetcher exit 1, encoder terminated: boom");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
