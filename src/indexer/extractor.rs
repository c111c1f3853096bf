use std::path::Path;
use anyhow::{Result, Context};
use super::walker::SupportedFormat;

pub fn extract_text(path: &Path, format: SupportedFormat) -> Result<String> {
    match format {
        SupportedFormat::PlainText => extract_plain_text(path),
        SupportedFormat::Pdf => extract_pdf(path),
    }
}

/// Picks the extraction format from the file extension. Anything that is
/// not a PDF is read as plain text, matching the upload path's behavior.
pub fn format_for_upload(path: &Path) -> SupportedFormat {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(SupportedFormat::from_extension)
        .unwrap_or(SupportedFormat::PlainText)
}

fn extract_plain_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read text file: {}", path.display()))
}

fn extract_pdf(path: &Path) -> Result<String> {
    let text = pdf_extract::extract_text(path)
        .with_context(|| format!("Failed to extract PDF text: {}", path.display()))?;
    Ok(text)
}
