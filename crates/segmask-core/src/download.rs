//! Saving result images to disk.

use crate::error::{SegmaskError, SegmaskResult, map_http_error};
use crate::outcome::BatchOutcome;
use crate::transport::HttpSettings;
use reqwest::Client;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File name for the `n`-th (1-based) result image of `source`:
/// `photo.jpg` → `photo_result.png`, then `photo_result_2.png`, ...
pub fn result_file_name(source: &Path, n: usize) -> String {
    let stem = source.file_stem().map_or_else(|| "image".into(), |s| s.to_string_lossy());
    if n <= 1 { format!("{}_result.png", stem) } else { format!("{}_result_{}.png", stem, n) }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DownloadReport {
    pub saved: Vec<PathBuf>,
    /// (url, error message)
    pub failed: Vec<(String, String)>,
}

/// Pairs every result URL of `outcome` with a destination in `dir`.
///
/// Sources from different directories can share a stem (`x/photo.png`,
/// `y/photo.jpg`); a later image whose name is taken gets the next free
/// `_result_{n}` suffix so no destination is written twice.
fn plan_destinations<'a>(outcome: &'a BatchOutcome, dir: &Path) -> Vec<(&'a str, PathBuf)> {
    let mut taken = HashSet::new();
    let mut jobs = Vec::new();
    for item in &outcome.succeeded {
        for (i, url) in item.result_image_urls.iter().enumerate() {
            let mut n = i + 1;
            let mut name = result_file_name(&item.source_path, n);
            while taken.contains(&name) {
                n += 1;
                name = result_file_name(&item.source_path, n);
            }
            jobs.push((url.as_str(), dir.join(&name)));
            taken.insert(name);
        }
    }
    jobs
}

pub struct ResultDownloader {
    client: Client,
}

impl ResultDownloader {
    pub fn new(settings: &HttpSettings) -> SegmaskResult<Self> {
        Ok(Self { client: settings.build_client()? })
    }

    /// Fetches one image and writes it to `dest`. Returns the byte count.
    pub async fn download(&self, url: &str, dest: &Path) -> SegmaskResult<u64> {
        debug!(url = %url, dest = %dest.display(), "Downloading result image");
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_http_error(status, &body, "download"));
        }

        let bytes = response.bytes().await?;
        tokio::fs::write(dest, &bytes).await?;
        Ok(bytes.len() as u64)
    }

    /// Saves every result image of `outcome` into `dir`, creating it if needed.
    ///
    /// Individual failures are collected in the report and do not stop the
    /// remaining downloads. `on_progress` receives 0-100 after each image.
    pub async fn download_outcome(
        &self,
        outcome: &BatchOutcome,
        dir: &Path,
        on_progress: impl Fn(u8),
    ) -> SegmaskResult<DownloadReport> {
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            SegmaskError::Config(format!("cannot create output directory {}: {}", dir.display(), e))
        })?;

        let jobs = plan_destinations(outcome, dir);

        let total = jobs.len();
        let mut report = DownloadReport::default();
        for (index, (url, dest)) in jobs.into_iter().enumerate() {
            match self.download(url, &dest).await {
                Ok(_) => report.saved.push(dest),
                Err(e) => {
                    warn!(url = %url, error = %e, "Download failed");
                    report.failed.push((url.to_string(), e.to_string()));
                }
            }
            on_progress(crate::runner::progress_percent(index, total));
        }

        info!(saved = report.saved.len(), failed = report.failed.len(), dir = %dir.display(), "Downloads finished");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::ItemResult;

    #[test]
    fn test_result_file_name() {
        assert_eq!(result_file_name(Path::new("/a/photo.jpg"), 1), "photo_result.png");
        assert_eq!(result_file_name(Path::new("/a/photo.jpg"), 2), "photo_result_2.png");
        assert_eq!(result_file_name(Path::new("scan.v2.bmp"), 1), "scan.v2_result.png");
    }

    #[test]
    fn test_shared_stems_get_distinct_destinations() {
        let outcome = BatchOutcome {
            succeeded: vec![
                ItemResult {
                    source_path: PathBuf::from("/in/x/photo.png"),
                    result_image_urls: vec!["u1".to_string(), "u2".to_string()],
                },
                ItemResult {
                    source_path: PathBuf::from("/in/y/photo.jpg"),
                    result_image_urls: vec!["u3".to_string()],
                },
            ],
            failed: Vec::new(),
        };

        let names: Vec<_> = plan_destinations(&outcome, Path::new("/out"))
            .into_iter()
            .map(|(url, dest)| (url, dest.file_name().unwrap().to_string_lossy().into_owned()))
            .collect();
        assert_eq!(
            names,
            vec![
                ("u1", "photo_result.png".to_string()),
                ("u2", "photo_result_2.png".to_string()),
                ("u3", "photo_result_3.png".to_string()),
            ]
        );
    }
}
