//! Local file eligibility and input collection.
//!
//! Only `.jpg`, `.jpeg`, `.png` and `.bmp` files may be submitted. Everything
//! here runs before any network activity so that rejected input never costs a
//! request.

use crate::error::{SegmaskError, SegmaskResult};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const SUPPORTED_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

pub fn is_supported_image(path: &Path) -> bool {
    extension_lowercase(path).is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}

/// Content type sent with the upload. The service only distinguishes JPEG from PNG.
pub fn upload_mime_type(path: &Path) -> &'static str {
    match extension_lowercase(path).as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        _ => "image/png",
    }
}

fn extension_lowercase(path: &Path) -> Option<String> {
    path.extension().and_then(|ext| ext.to_str()).map(str::to_lowercase)
}

/// Checks a batch before submission.
pub fn validate_batch(files: &[PathBuf], max_batch_size: Option<usize>) -> SegmaskResult<()> {
    if files.is_empty() {
        return Err(SegmaskError::validation("no files selected"));
    }
    if let Some(max) = max_batch_size {
        if files.len() > max {
            return Err(SegmaskError::validation(format!(
                "batch of {} files exceeds the limit of {}",
                files.len(),
                max
            )));
        }
    }
    if let Some(bad) = files.iter().find(|f| !is_supported_image(f)) {
        return Err(SegmaskError::validation(format!(
            "unsupported file type: {} (expected one of {})",
            bad.display(),
            SUPPORTED_EXTENSIONS.join(", ")
        )));
    }
    Ok(())
}

/// Result of expanding user-supplied paths into submittable files.
#[derive(Debug, Default, Clone)]
pub struct InputSelection {
    pub files: Vec<PathBuf>,
    /// Paths that were named explicitly but cannot be submitted, with the reason.
    pub rejected: Vec<(PathBuf, String)>,
}

/// Expands files and directories into eligible images.
///
/// Directory contents are sorted so that submission order is deterministic.
/// Ineligible files found inside directories are skipped silently; explicitly
/// named ones are reported in `rejected`.
pub fn collect_inputs(paths: &[PathBuf], recursive: bool) -> InputSelection {
    let mut selection = InputSelection::default();

    for path in paths {
        if path.is_dir() {
            let walker = WalkDir::new(path).min_depth(1).sort_by_file_name();
            let walker = if recursive { walker } else { walker.max_depth(1) };
            for entry in walker.into_iter().filter_map(Result::ok) {
                if entry.file_type().is_file() && is_supported_image(entry.path()) {
                    selection.files.push(entry.into_path());
                }
            }
        } else if !path.exists() {
            selection.rejected.push((path.clone(), "file not found".to_string()));
        } else if !is_supported_image(path) {
            selection.rejected.push((path.clone(), "unsupported file type".to_string()));
        } else {
            selection.files.push(path.clone());
        }
    }

    selection
}
