use chrono::{DateTime, Utc};

/// Fallback stem when a title sanitizes to nothing
const DEFAULT_FILENAME: &str = "audio";

/// Format duration as a clock-style timestamp (`3:07`, `1:02:03`)
pub fn format_timestamp(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}

/// Describe how long ago `then` was, relative to `now`
pub fn format_ago(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - then).num_seconds().max(0);

    const UNITS: &[(i64, &str)] = &[
        (365 * 24 * 3600, "year"),
        (30 * 24 * 3600, "month"),
        (7 * 24 * 3600, "week"),
        (24 * 3600, "day"),
        (3600, "hour"),
        (60, "minute"),
    ];

    for &(unit_seconds, name) in UNITS {
        let count = seconds / unit_seconds;
        if count > 0 {
            let plural = if count == 1 { "" } else { "s" };
            return format!("{} {}{} ago", count, name, plural);
        }
    }

    "just now".to_string()
}

/// Derive a download filename stem from a title.
///
/// Keeps only `[A-Za-z0-9 ._-]`, collapses whitespace, trims leading and
/// trailing dots and spaces, and caps the result at `max_len` characters.
pub fn sanitize_filename(title: &str, max_len: usize) -> String {
    let kept: String = title
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '.' | '_' | '-'))
        .collect();

    let collapsed = kept.split_whitespace().collect::<Vec<_>>().join(" ");
    let truncated: String = collapsed.chars().take(max_len).collect();
    let trimmed = truncated.trim_matches(|c| c == '.' || c == ' ');

    if trimmed.is_empty() {
        DEFAULT_FILENAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Build the attachment filename for a title and extension
pub fn attachment_filename(title: &str, extension: &str, max_len: usize) -> String {
    let mut stem = sanitize_filename(title, max_len);

    // Titles often already end in the extension ("Song.mp3")
    let suffix = format!(".{}", extension.to_ascii_lowercase());
    if stem.to_ascii_lowercase().ends_with(&suffix) && stem.len() > suffix.len() {
        stem.truncate(stem.len() - suffix.len());
    }

    format!("{}.{}", stem, extension)
}

/// Last `n` non-empty lines of `text`
pub fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}

/// Check if the current environment has the required tools
pub async fn check_dependencies(yt_dlp: &str, ffmpeg: &str) -> Vec<String> {
    let mut missing = Vec::new();

    if !check_command_available(yt_dlp, "--version").await {
        missing.push(format!("{} - required for search, metadata and extraction", yt_dlp));
    }

    if !check_command_available(ffmpeg, "-version").await {
        missing.push(format!("{} - required for transcoding downloads", ffmpeg));
    }

    missing
}

/// Check if a command is available in PATH
async fn check_command_available(command: &str, version_flag: &str) -> bool {
    use tokio::process::Command;

    Command::new(command)
        .arg(version_flag)
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}
