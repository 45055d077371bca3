//! Panic reporting through `tracing`.

use std::backtrace::Backtrace;
use std::fs::OpenOptions;
use std::io::Write;
use std::panic::{PanicHookInfo, take_hook};
use std::path::{Path, PathBuf};
use std::thread;

use chrono::Local;

use crate::logging::LOG_FILE_PREFIX;

/// Install a hook that logs every panic, keeping the previous hook's output.
///
/// A panicking recording task is also reported by the task manager; this
/// hook adds the location and backtrace. With `log_dir` set and an aborting
/// panic strategy, the record is appended straight to the daily log file as
/// the background writer will not get to flush.
pub fn install(log_dir: Option<PathBuf>) {
    let previous = take_hook();

    std::panic::set_hook(Box::new(move |info: &PanicHookInfo<'_>| {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let record = panic_record(info);
            tracing::error!(target: "chzzk_rec::panic", "{record}");

            if cfg!(panic = "abort")
                && let Some(dir) = &log_dir
            {
                let _ = append_record(dir, &record);
            }
        }));

        previous(info);
    }));
}

fn append_record(log_dir: &Path, record: &str) -> std::io::Result<()> {
    let path = log_dir.join(format!("{LOG_FILE_PREFIX}.{}", Local::now().format("%Y-%m-%d")));
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{record}")?;
    file.flush()
}

fn panic_record(info: &PanicHookInfo<'_>) -> String {
    let location = info
        .location()
        .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
        .unwrap_or_else(|| "<unknown>".to_string());
    let thread = thread::current().name().unwrap_or("<unnamed>").to_string();

    format!(
        "PANIC thread={thread} location={location} payload={}\nBacktrace:\n{}",
        payload_text(info),
        Backtrace::force_capture()
    )
}

fn payload_text(info: &PanicHookInfo<'_>) -> String {
    let payload = info.payload();
    payload
        .downcast_ref::<&'static str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| info.to_string())
}
