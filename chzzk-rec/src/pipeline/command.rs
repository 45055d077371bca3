//! Fetcher and encoder command lines.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use crate::config::{Credentials, RecorderSettings};
use crate::monitor::auth_headers;

/// Stream name the fetcher selects. The playlist proxy serves a single media
/// playlist, variant selection by [`PipelineConfig::quality`] happens there.
pub const FETCHER_STREAM: &str = "best";

/// Settings shared by every pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub streamlink: PathBuf,
    pub ffmpeg: PathBuf,
    pub plugin_dir: Option<PathBuf>,
    /// Variant to record: `best`, `worst` or a name such as `1080p`.
    pub quality: String,
    pub threads: u32,
    /// How long each subprocess gets to exit after being asked to.
    pub stop_grace: Duration,
    /// Output smaller than this makes a zero-exit run a failure.
    pub min_output_bytes: u64,
    /// Renew the stream token this long before it expires.
    pub token_refresh_lead: Duration,
}

impl PipelineConfig {
    pub fn from_settings(settings: &RecorderSettings) -> Self {
        Self {
            streamlink: settings.streamlink_program(),
            ffmpeg: settings.ffmpeg_program(),
            plugin_dir: settings.plugin_dir.clone(),
            quality: settings.quality.clone(),
            threads: settings.threads.max(1),
            stop_grace: settings.stop_grace(),
            min_output_bytes: settings.min_output_bytes,
            token_refresh_lead: Duration::from_secs(settings.token_refresh_lead_secs),
        }
    }
}

/// A program, its arguments and extra environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, OsString)>,
}

impl CommandSpec {
    /// Build a tokio command with the given stdio wiring.
    pub fn to_command(&self, stdin: Stdio, stdout: Stdio) -> tokio::process::Command {
        let mut cmd = process_utils::tokio_command(&self.program);
        cmd.args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(stdin)
            .stdout(stdout)
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Command line for logs with cookie values masked.
    pub fn redacted(&self) -> String {
        let mut out = self.program.display().to_string();
        for arg in &self.args {
            out.push(' ');
            if arg.starts_with("Cookie=") {
                out.push_str("Cookie=<redacted>");
            } else if arg.contains(' ') {
                out.push_str(&format!("\"{arg}\""));
            } else {
                out.push_str(arg);
            }
        }
        out
    }
}

/// Fetcher URL for a playlist served by the proxy.
pub fn fetcher_url(playlist_url: &str) -> String {
    format!("hls://{playlist_url}")
}

/// `streamlink --stdout hls://<proxy> best ...`
pub fn fetcher_command(config: &PipelineConfig, proxy_url: &str, credentials: &Credentials) -> CommandSpec {
    let mut args = vec![
        "--stdout".to_string(),
        fetcher_url(proxy_url),
        FETCHER_STREAM.to_string(),
        "--hls-live-restart".to_string(),
    ];

    if let Some(dir) = &config.plugin_dir {
        args.push("--plugin-dirs".to_string());
        args.push(dir.display().to_string());
    }

    args.push("--stream-segment-threads".to_string());
    args.push(config.threads.to_string());

    for (name, value) in auth_headers(credentials) {
        args.push("--http-header".to_string());
        args.push(format!("{name}={value}"));
    }

    args.extend([
        "--ffmpeg-ffmpeg".to_string(),
        config.ffmpeg.display().to_string(),
        "--ffmpeg-copyts".to_string(),
        "--hls-segment-stream-data".to_string(),
    ]);

    CommandSpec {
        program: config.streamlink.clone(),
        args,
        env: Vec::new(),
    }
}

/// `ffmpeg -i pipe:0 -c copy ... <output>`
///
/// MPEG-TS with `resend_headers` stays playable up to the last written
/// packet, so a terminated encoder never leaves a broken container.
pub fn encoder_command(config: &PipelineConfig, output: &Path) -> CommandSpec {
    let args = [
        "-i",
        "pipe:0",
        "-c",
        "copy",
        "-progress",
        "pipe:2",
        "-copy_unknown",
        "-map_metadata:s:a",
        "0:s:a",
        "-map_metadata:s:v",
        "0:s:v",
        "-bsf:v",
        "h264_mp4toannexb",
        "-bsf:a",
        "aac_adtstoasc",
        "-f",
        "mpegts",
        "-mpegts_flags",
        "resend_headers",
        "-bsf",
        "setts=pts=PTS-STARTPTS",
        "-fflags",
        "+genpts+discardcorrupt+nobuffer",
        "-avioflags",
        "direct",
        "-y",
    ]
    .into_iter()
    .map(str::to_string)
    .chain(std::iter::once(output.display().to_string()))
    .collect();

    CommandSpec {
        program: config.ffmpeg.clone(),
        args,
        env: vec![("LC_ALL".to_string(), OsString::from("C"))],
    }
}
