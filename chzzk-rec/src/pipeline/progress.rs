//! Encoder and fetcher output parsing.
//!
//! The encoder reports progress two ways: `-progress` blocks of `key=value`
//! records ending in `progress=continue|end`, and classic one-line stats
//! (`frame=... size=... time=... bitrate=... speed=...x`). [`ProgressParser`]
//! understands both and returns [`ParsedLine::Unparsed`] for anything else;
//! callers ignore those lines.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

/// Number of byte-rate samples averaged for throughput.
pub const THROUGHPUT_SAMPLES: usize = 5;

/// Metrics extracted from one progress report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressReport {
    /// Media time written so far, in seconds.
    pub out_time_secs: Option<f64>,
    /// Bytes written to the output.
    pub total_size: Option<u64>,
    /// Output bitrate in bits per second.
    pub bitrate_bps: Option<f64>,
    /// Encoding speed relative to realtime.
    pub speed: Option<f64>,
    /// `progress=end` was seen.
    pub finished: bool,
}

/// Outcome of feeding one line to the parser.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    /// A complete report.
    Report(ProgressReport),
    /// A `key=value` record of a block still in progress.
    Pending,
    /// Not progress output.
    Unparsed,
}

/// Stateful parser for encoder stderr.
#[derive(Debug, Default)]
pub struct ProgressParser {
    block: HashMap<String, String>,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, line: &str) -> ParsedLine {
        let line = line.trim();
        if line.is_empty() {
            return ParsedLine::Unparsed;
        }

        if let Some(report) = parse_stat_line(line) {
            return ParsedLine::Report(report);
        }

        let Some((key, value)) = line.split_once('=') else {
            return ParsedLine::Unparsed;
        };
        let key = key.trim();
        if key.is_empty() || key.contains(char::is_whitespace) {
            return ParsedLine::Unparsed;
        }
        let value = value.trim();

        if key == "progress" {
            let mut report = report_from_block(&self.block);
            report.finished = value == "end";
            self.block.clear();
            return ParsedLine::Report(report);
        }

        self.block.insert(key.to_string(), value.to_string());
        ParsedLine::Pending
    }
}

fn report_from_block(block: &HashMap<String, String>) -> ProgressReport {
    let total_size = block.get("total_size").and_then(|v| v.parse::<u64>().ok());
    let out_time_secs = block
        .get("out_time")
        .and_then(|v| parse_time(v))
        .or_else(|| {
            block
                .get("out_time_us")
                .or_else(|| block.get("out_time_ms"))
                .and_then(|v| v.parse::<i64>().ok())
                .filter(|us| *us >= 0)
                .map(|us| us as f64 / 1_000_000.0)
        });
    let bitrate_bps = block
        .get("bitrate")
        .and_then(|v| parse_kbits(v))
        .or_else(|| derive_bitrate(total_size, out_time_secs));
    let speed = block.get("speed").and_then(|v| parse_speed_value(v));

    ProgressReport {
        out_time_secs,
        total_size,
        bitrate_bps,
        speed,
        finished: false,
    }
}

fn derive_bitrate(total_size: Option<u64>, out_time_secs: Option<f64>) -> Option<f64> {
    match (total_size, out_time_secs) {
        (Some(size), Some(secs)) if secs > 0.0 => Some(size as f64 * 8.0 / secs),
        _ => None,
    }
}

/// Parse `HH:MM:SS.frac` into seconds. Negative times are rejected.
pub fn parse_time(time_str: &str) -> Option<f64> {
    let parts: Vec<&str> = time_str.trim().split(':').collect();
    if parts.len() != 3 {
        return None;
    }

    let hours: f64 = parts[0].parse().ok()?;
    let minutes: f64 = parts[1].parse().ok()?;
    let seconds: f64 = parts[2].parse().ok()?;
    if hours < 0.0 || minutes < 0.0 || seconds < 0.0 {
        return None;
    }

    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// `1234.5kbits/s` to bits per second.
fn parse_kbits(value: &str) -> Option<f64> {
    let number = value.trim().strip_suffix("kbits/s")?;
    let kbits: f64 = number.trim().parse().ok()?;
    Some(kbits * 1000.0)
}

/// `1.01x` to 1.01.
fn parse_speed_value(value: &str) -> Option<f64> {
    value.trim().strip_suffix('x')?.trim().parse().ok()
}

fn field<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let key = format!("{name}=");
    let mut search = line;
    loop {
        let start = search.find(&key)?;
        let preceded_ok = start == 0
            || search[..start]
                .chars()
                .last()
                .is_some_and(char::is_whitespace);
        let rest = &search[start + key.len()..];
        if preceded_ok {
            let rest = rest.trim_start();
            let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
            return Some(&rest[..end]);
        }
        search = rest;
    }
}

/// `1024kB`, `1024KiB` or `512mB` to bytes.
fn parse_size_value(value: &str) -> Option<u64> {
    let idx = value.find(|c: char| c.is_ascii_alphabetic())?;
    let (number, unit) = value.split_at(idx);
    let number: f64 = number.trim().parse().ok()?;
    let multiplier = match unit.to_ascii_lowercase().as_str() {
        "kb" | "kib" => 1024.0,
        "mb" | "mib" => 1024.0 * 1024.0,
        "gb" | "gib" => 1024.0 * 1024.0 * 1024.0,
        "b" => 1.0,
        _ => return None,
    };
    Some((number * multiplier) as u64)
}

/// Classic stat line: `frame=.. fps=.. size=.. time=.. bitrate=.. speed=..x`.
fn parse_stat_line(line: &str) -> Option<ProgressReport> {
    if !line.contains(' ') || field(line, "time").is_none() {
        return None;
    }
    if field(line, "frame").is_none() && field(line, "size").is_none() {
        return None;
    }

    let total_size = field(line, "size").and_then(parse_size_value);
    let out_time_secs = field(line, "time").and_then(parse_time);
    Some(ProgressReport {
        out_time_secs,
        total_size,
        bitrate_bps: field(line, "bitrate")
            .and_then(parse_kbits)
            .or_else(|| derive_bitrate(total_size, out_time_secs)),
        speed: field(line, "speed").and_then(parse_speed_value),
        finished: false,
    })
}

/// Moving average of the byte rate between consecutive size reports.
#[derive(Debug, Default)]
pub struct ThroughputWindow {
    last: Option<(u64, Instant)>,
    samples: VecDeque<f64>,
}

impl ThroughputWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a cumulative size observed at `now`; returns the averaged rate
    /// in bytes per second once at least one sample exists.
    pub fn record(&mut self, total_size: u64, now: Instant) -> Option<f64> {
        if let Some((prev_size, prev_at)) = self.last {
            let elapsed = now.saturating_duration_since(prev_at).as_secs_f64();
            if elapsed > 0.0 {
                let delta = total_size.saturating_sub(prev_size) as f64;
                if self.samples.len() == THROUGHPUT_SAMPLES {
                    self.samples.pop_front();
                }
                self.samples.push_back(delta / elapsed);
            }
        }
        self.last = Some((total_size, now));
        self.average()
    }

    pub fn average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }
}

/// Notable fetcher stderr lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetcherEvent {
    Opening,
    Ended,
    Error(String),
    Other,
}

pub fn classify_fetcher_line(line: &str) -> FetcherEvent {
    if line.contains("[cli][error]") {
        let message = line
            .split_once("[cli][error]")
            .map(|(_, rest)| rest.trim().to_string())
            .unwrap_or_default();
        return FetcherEvent::Error(message);
    }
    if line.contains("Opening stream") {
        return FetcherEvent::Opening;
    }
    if line.contains("Stream ended") {
        return FetcherEvent::Ended;
    }
    FetcherEvent::Other
}
