//! ZIP Archive Handling
//!
//! Verifies downloaded model archives before they are handed to the
//! nnU-Net installer.

use std::fs::File;
use std::path::{Path, PathBuf};

/// Extraction error types
#[derive(Debug)]
pub enum ExtractError {
    Io(String),
    Zip(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::Io(e) => write!(f, "IO error: {}", e),
            ExtractError::Zip(e) => write!(f, "ZIP error: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

fn open_archive(zip_path: &Path) -> Result<zip::ZipArchive<File>, ExtractError> {
    let file = File::open(zip_path).map_err(|e| ExtractError::Io(e.to_string()))?;
    zip::ZipArchive::new(file).map_err(|e| ExtractError::Zip(e.to_string()))
}

fn is_metadata(path: &Path) -> bool {
    let path_str = path.to_string_lossy();
    path_str.contains("__MACOSX") || path_str.contains(".DS_Store")
}

/// Summary of a readable archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveInfo {
    /// Distinct first path components, e.g. `Dataset004_WML`
    pub top_level: Vec<PathBuf>,
}

impl ArchiveInfo {
    pub fn contains_top_level(&self, name: &str) -> bool {
        self.top_level.iter().any(|p| p.as_os_str() == name)
    }
}

/// Check that `zip_path` is a complete, non-empty ZIP archive.
///
/// A truncated download loses the central directory at the end of the file,
/// so opening it fails here.
pub fn verify_archive(zip_path: &Path) -> Result<ArchiveInfo, ExtractError> {
    let mut archive = open_archive(zip_path)?;
    if archive.len() == 0 {
        return Err(ExtractError::Zip("archive is empty".to_string()));
    }

    let mut top_level: Vec<PathBuf> = Vec::new();
    for i in 0..archive.len() {
        let file = archive.by_index(i).map_err(|e| ExtractError::Zip(e.to_string()))?;
        let path = match file.enclosed_name() {
            Some(p) => p.to_owned(),
            None => continue,
        };
        if is_metadata(&path) {
            continue;
        }
        if let Some(first) = path.components().next() {
            let first = PathBuf::from(first.as_os_str());
            if !top_level.contains(&first) {
                top_level.push(first);
            }
        }
    }

    Ok(ArchiveInfo { top_level })
}
