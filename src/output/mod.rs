use anyhow::Result;

use crate::cli::OutputFormat;
use crate::extractors::VideoMetadata;
use crate::utils::format_timestamp;

/// Render video metadata in the requested format
pub fn format_metadata(metadata: &VideoMetadata, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(format_as_text(metadata)),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(metadata)?),
    }
}

fn format_as_text(metadata: &VideoMetadata) -> String {
    let mut out = String::new();
    out.push_str(&format!("Title:    {}\n", metadata.title));
    out.push_str(&format!("Author:   {}\n", metadata.author));
    out.push_str(&format!(
        "Duration: {} ({}s)\n",
        format_timestamp(metadata.duration_seconds),
        metadata.duration_seconds
    ));
    if let Some(thumbnail) = &metadata.thumbnail_url {
        out.push_str(&format!("Thumb:    {}\n", thumbnail));
    }
    out.push_str(&format!("Formats:  {}", metadata.formats.len()));
    out
}

/// Print video metadata to the console
pub fn print_to_console(metadata: &VideoMetadata, format: OutputFormat) -> Result<()> {
    println!("{}", format_metadata(metadata, format)?);
    Ok(())
}
