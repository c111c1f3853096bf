use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy)]
pub enum SupportedFormat {
    PlainText,
    Pdf,
}

impl SupportedFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "txt" | "md" | "rst" | "json" | "yaml" | "yml" | "toml" => Some(Self::PlainText),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }
}

pub fn walk_directory(dir: &Path) -> Vec<(PathBuf, SupportedFormat)> {
    let mut files: Vec<(PathBuf, SupportedFormat)> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let path = entry.into_path();
            let ext = path.extension()?.to_str()?;
            let format = SupportedFormat::from_extension(ext)?;
            Some((path, format))
        })
        .collect();
    // Stable ingestion order keeps chunk ids reproducible across runs.
    files.sort_by(|a, b| a.0.cmp(&b.0));
    files
}
