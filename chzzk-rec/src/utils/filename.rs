//! Recording filename construction.
//!
//! Names look like `[2024-05-01 21_00_00] channel title.ts.part`. Titles are
//! stripped of characters that are invalid on Windows, the whole name is
//! sanitized for every platform, and names longer than 255 UTF-8 bytes are
//! cut down with a short SHA-256 suffix so they stay unique.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use sha2::{Digest, Sha256};
use tracing::warn;

/// Maximum filename length in bytes on common filesystems.
pub const MAX_FILENAME_BYTES: usize = 255;

/// Hex digits of the hash appended to shortened names.
const HASH_LEN: usize = 8;

/// Extension used while a recording is in progress.
pub const PART_EXTENSION: &str = ".ts.part";

/// Characters that are invalid in Windows filenames
const WINDOWS_INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Windows reserved filenames (case-insensitive)
const WINDOWS_RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Remove title characters that cannot appear in a filename.
pub fn strip_title(title: &str) -> String {
    title
        .trim_end()
        .chars()
        .filter(|c| !WINDOWS_INVALID_CHARS.contains(c))
        .collect()
}

/// Sanitize a string for use in filenames across all platforms.
///
/// Control characters and Windows-invalid characters become a single
/// underscore, leading/trailing spaces and dots are trimmed, reserved device
/// names get a `_` prefix and an empty result becomes `unnamed`.
///
/// ```
/// use chzzk_rec::utils::filename::sanitize_filename;
///
/// assert_eq!(sanitize_filename("hello?world"), "hello_world");
/// assert_eq!(sanitize_filename("안녕하세요?"), "안녕하세요_");
/// assert_eq!(sanitize_filename(""), "unnamed");
/// assert_eq!(sanitize_filename("CON"), "_CON");
/// ```
pub fn sanitize_filename(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut last_was_replacement = false;

    for c in input.chars() {
        if c.is_control() || WINDOWS_INVALID_CHARS.contains(&c) {
            if !last_was_replacement {
                result.push('_');
                last_was_replacement = true;
            }
        } else {
            result.push(c);
            last_was_replacement = false;
        }
    }

    let trimmed = result.trim_matches(|c| c == ' ' || c == '.');
    if trimmed.is_empty() {
        return "unnamed".to_string();
    }

    let upper = trimmed.to_uppercase();
    for reserved in WINDOWS_RESERVED_NAMES {
        if upper == *reserved || upper.starts_with(&format!("{reserved}.")) {
            return format!("_{trimmed}");
        }
    }

    trimmed.to_string()
}

/// Shorten a filename to [`MAX_FILENAME_BYTES`], keeping its extension.
///
/// The stem is cut on a character boundary and followed by `_<hash>` where the
/// hash is taken over the full original name.
pub fn shorten_filename(filename: &str) -> String {
    if filename.len() <= MAX_FILENAME_BYTES {
        return filename.to_string();
    }

    let (stem, ext) = match filename.strip_suffix(PART_EXTENSION) {
        Some(stem) => (stem, PART_EXTENSION),
        None => match filename.rfind('.') {
            Some(idx) if idx > 0 => (&filename[..idx], &filename[idx..]),
            _ => (filename, ""),
        },
    };

    let digest = Sha256::digest(filename.as_bytes());
    let hash = &hex::encode(digest)[..HASH_LEN];

    let budget = MAX_FILENAME_BYTES.saturating_sub(ext.len() + HASH_LEN + 1);
    let mut cut = budget.min(stem.len());
    while !stem.is_char_boundary(cut) {
        cut -= 1;
    }

    let shortened = format!("{}_{hash}{ext}", &stem[..cut]);
    warn!(original = %filename, shortened = %shortened, "Filename too long, shortened");
    shortened
}

/// Build the in-progress filename for a recording started at `started_at`.
pub fn recording_filename(channel_name: &str, title: &str, started_at: DateTime<Local>) -> String {
    let stamp = started_at.format("%Y-%m-%d %H_%M_%S");
    let title = strip_title(title);
    let raw = if title.is_empty() {
        format!("[{stamp}] {channel_name}")
    } else {
        format!("[{stamp}] {channel_name} {title}")
    };
    let name = sanitize_filename(&raw);
    shorten_filename(&format!("{name}{PART_EXTENSION}"))
}

/// Final name of a recording once the `.part` suffix is dropped.
pub fn final_path(part_path: &Path) -> PathBuf {
    let name = part_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.strip_suffix(".part") {
        Some(stripped) => part_path.with_file_name(stripped),
        None => part_path.to_path_buf(),
    }
}

/// Pick a path in `dir` for `filename` that collides with neither an existing
/// `.part` file nor its finished counterpart, appending ` (n)` when needed.
pub fn unique_path(dir: &Path, filename: &str) -> PathBuf {
    let candidate = dir.join(filename);
    if !candidate.exists() && !final_path(&candidate).exists() {
        return candidate;
    }

    let stem = filename.strip_suffix(PART_EXTENSION).unwrap_or(filename);
    let ext = if filename.ends_with(PART_EXTENSION) { PART_EXTENSION } else { "" };

    let mut n = 1u32;
    loop {
        let name = shorten_filename(&format!("{stem} ({n}){ext}"));
        let candidate = dir.join(name);
        if !candidate.exists() && !final_path(&candidate).exists() {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 1, 21, 3, 9).unwrap()
    }

    #[test]
    fn test_empty_string() {
        assert_eq!(sanitize_filename(""), "unnamed");
    }

    #[test]
    fn test_windows_reserved_names() {
        assert_eq!(sanitize_filename("CON"), "_CON");
        assert_eq!(sanitize_filename("nul.exe"), "_nul.exe");
        assert_eq!(sanitize_filename("LPT1"), "_LPT1");
    }

    #[test]
    fn test_consecutive_invalid_chars_collapsed() {
        assert_eq!(sanitize_filename("hello???world"), "hello_world");
        assert_eq!(sanitize_filename("a<>:\"b"), "a_b");
        assert_eq!(sanitize_filename("tab\there"), "tab_here");
    }

    #[test]
    fn test_korean_characters_preserved() {
        assert_eq!(sanitize_filename("안녕하세요"), "안녕하세요");
    }

    #[test]
    fn test_strip_title_removes_invalid_chars() {
        assert_eq!(strip_title("a/b\\c:d*e?f\"g<h>i|j  "), "abcdefghij");
    }

    #[test]
    fn test_recording_filename_format() {
        let name = recording_filename("streamer", "Late night: talk?", at());
        assert_eq!(name, "[2024-05-01 21_03_09] streamer Late night talk.ts.part");
    }

    #[test]
    fn test_recording_filename_without_title() {
        let name = recording_filename("streamer", "   ", at());
        assert_eq!(name, "[2024-05-01 21_03_09] streamer.ts.part");
    }

    #[test]
    fn test_shorten_keeps_short_names() {
        assert_eq!(shorten_filename("a.ts.part"), "a.ts.part");
    }

    #[test]
    fn test_shorten_long_multibyte_name() {
        let long = format!("{}{}", "방송".repeat(100), PART_EXTENSION);
        let short = shorten_filename(&long);

        assert!(short.len() <= MAX_FILENAME_BYTES);
        assert!(short.ends_with(PART_EXTENSION));
        let hash_part = short
            .strip_suffix(PART_EXTENSION)
            .and_then(|s| s.rsplit('_').next())
            .unwrap();
        assert_eq!(hash_part.len(), HASH_LEN);
        assert!(hash_part.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_shorten_is_deterministic_and_distinct() {
        let a = format!("{}a{}", "x".repeat(300), PART_EXTENSION);
        let b = format!("{}b{}", "x".repeat(300), PART_EXTENSION);
        assert_eq!(shorten_filename(&a), shorten_filename(&a));
        assert_ne!(shorten_filename(&a), shorten_filename(&b));
    }

    #[test]
    fn test_final_path_drops_part_suffix() {
        let p = Path::new("/rec/[x] y.ts.part");
        assert_eq!(final_path(p), PathBuf::from("/rec/[x] y.ts"));
        assert_eq!(final_path(Path::new("/rec/a.ts")), PathBuf::from("/rec/a.ts"));
    }

    #[test]
    fn test_unique_path_appends_counter() {
        let dir = tempfile::tempdir().unwrap();
        let name = "[t] ch.ts.part";

        let first = unique_path(dir.path(), name);
        assert_eq!(first, dir.path().join(name));

        std::fs::write(dir.path().join("[t] ch.ts"), b"done").unwrap();
        let second = unique_path(dir.path(), name);
        assert_eq!(second, dir.path().join("[t] ch (1).ts.part"));

        std::fs::write(&second, b"x").unwrap();
        let third = unique_path(dir.path(), name);
        assert_eq!(third, dir.path().join("[t] ch (2).ts.part"));
    }
}
