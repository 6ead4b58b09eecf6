//! Classification of ffmpeg stderr when run with `-progress pipe:2`.

/// One line of ffmpeg stderr
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StderrLine<'a> {
    /// Current position in the output, e.g. `00:01:02.500000`
    Progress(&'a str),
    /// Any other `key=value` line of a progress block
    ProgressField,
    /// A log line worth keeping for error reports
    Diagnostic,
}

/// Classify one line of ffmpeg stderr.
pub fn classify(line: &str) -> StderrLine<'_> {
    let Some((key, value)) = line.split_once('=') else {
        return StderrLine::Diagnostic;
    };

    let is_progress_key =
        !key.is_empty() && key.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !is_progress_key {
        return StderrLine::Diagnostic;
    }

    // ffmpeg reports a negative out_time before the first packet is muxed
    if key == "out_time" && !value.starts_with('-') && value != "N/A" {
        StderrLine::Progress(value.trim())
    } else {
        StderrLine::ProgressField
    }
}
