use walkdir::WalkDir;
use std::path::{Path, PathBuf};
use crate::error::{Result, SifterError};

/// Extensions treated as library documents
pub const DOCUMENT_EXTENSIONS: &[&str] = &["md", "markdown", "txt"];

/// A document file found under the library root
#[derive(Debug, Clone)]
pub struct FileMetadata {
    /// Path relative to the library root, always with `/` separators.
    pub relative_path: String,
    pub absolute_path: PathBuf,
    pub extension: String,
    pub file_size: u64,
}

pub fn is_document_path(path: &Path) -> bool {
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_lowercase();
    DOCUMENT_EXTENSIONS.contains(&extension.as_str())
}

/// Path of `path` relative to `root`, normalized to forward slashes
pub fn relative_path(root: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(root).map_err(|_| {
        SifterError::InvalidInput(format!(
            "{} is outside the library root {}",
            path.display(),
            root.display()
        ))
    })?;
    Ok(relative.to_string_lossy().replace('\\', "/"))
}

/// Recursively discover library documents under `root`.
///
/// Hidden files and directories (dot-prefixed) are skipped. Results are sorted by
/// relative path so ingestion order is deterministic.
pub fn discover_files(root: &Path) -> Result<Vec<FileMetadata>> {
    let mut files = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));

    for entry in walker.filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_file() || !is_document_path(path) {
            continue;
        }

        let metadata = std::fs::metadata(path)?;
        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_lowercase();

        files.push(FileMetadata {
            relative_path: relative_path(root, path)?,
            absolute_path: path.to_path_buf(),
            extension,
            file_size: metadata.len(),
        });
    }

    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    log::info!("Discovered {} documents in {}", files.len(), root.display());
    Ok(files)
}
