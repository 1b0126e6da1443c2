use std::ffi::OsString;
use std::path::{Path, PathBuf};

use futures::StreamExt;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{DownloadError, TagError, VerifyError};
use crate::fetch::RateLimitedFetcher;
use crate::http::{HttpClient, HttpResponse};
use crate::progress::{ProgressEvent, SharedProgressReporter};
use crate::state::PARTIAL_SUFFIX;
use crate::tag::{EpisodeTags, TagWriter};

use super::resolve::ResolvedEpisode;
use super::status::EpisodeStatus;

/// Context for tracking a download in concurrent scenarios
#[derive(Debug, Clone)]
pub struct DownloadContext {
    /// Slot ID (0 to workers-1) for progress bar management
    pub download_id: usize,
    /// Index of this episode in the download queue
    pub episode_index: usize,
    /// Total number of episodes to download
    pub total_to_download: usize,
}

/// Outcome of materializing a single episode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Materialized {
    Downloaded {
        bytes: u64,
        /// Set when tags were requested but could not be written
        tag_failure: Option<String>,
    },
    Failed {
        reason: String,
    },
}

/// `<path>.partial`, the name a file has while it is being written
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// Download the episode content to its destination path
///
/// The body is streamed into `<path>.partial` and renamed over the final path
/// once complete, so an interrupted download never leaves a file that looks
/// finished. On success the episode becomes `Downloaded`.
pub async fn download_content<C: HttpClient>(
    fetcher: &RateLimitedFetcher<C>,
    episode: &mut ResolvedEpisode,
    context: &DownloadContext,
    reporter: &SharedProgressReporter,
) -> Result<u64, DownloadError> {
    let url = episode.download_url.clone();

    let response = fetcher
        .fetch(&url, false)
        .await
        .map_err(|e| DownloadError::Network {
            url: url.clone(),
            source: e,
        })?;

    if !response.is_success() {
        return Err(DownloadError::HttpStatus {
            url,
            status: response.status,
        });
    }

    reporter.report(ProgressEvent::DownloadStarting {
        download_id: context.download_id,
        episode_title: episode.title.clone(),
        episode_index: context.episode_index,
        total_to_download: context.total_to_download,
        content_length: response.content_length,
    });

    let partial = partial_path(&episode.path);
    let bytes_downloaded =
        match stream_to_file(response, &partial, &url, &episode.title, context, reporter).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(e);
            }
        };

    if let Err(e) = tokio::fs::rename(&partial, &episode.path).await {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(DownloadError::FinalizeFailed {
            path: episode.path.clone(),
            source: e,
        });
    }

    episode.set_status(EpisodeStatus::Downloaded);

    reporter.report(ProgressEvent::DownloadCompleted {
        download_id: context.download_id,
        episode_title: episode.title.clone(),
        bytes_downloaded,
    });

    Ok(bytes_downloaded)
}

async fn stream_to_file(
    response: HttpResponse,
    partial: &Path,
    url: &str,
    title: &str,
    context: &DownloadContext,
    reporter: &SharedProgressReporter,
) -> Result<u64, DownloadError> {
    let mut file = File::create(partial)
        .await
        .map_err(|e| DownloadError::FileCreateFailed {
            path: partial.to_path_buf(),
            source: e,
        })?;

    let total_bytes = response.content_length;
    let mut bytes_downloaded: u64 = 0;
    let mut stream = response.body;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| DownloadError::StreamFailed {
            url: url.to_string(),
            source: e,
        })?;

        file.write_all(&chunk)
            .await
            .map_err(|e| DownloadError::FileWriteFailed {
                path: partial.to_path_buf(),
                source: e,
            })?;

        bytes_downloaded += chunk.len() as u64;

        reporter.report(ProgressEvent::DownloadProgress {
            download_id: context.download_id,
            episode_title: title.to_string(),
            bytes_downloaded,
            total_bytes,
        });
    }

    file.flush()
        .await
        .map_err(|e| DownloadError::FileWriteFailed {
            path: partial.to_path_buf(),
            source: e,
        })?;

    Ok(bytes_downloaded)
}

/// Write descriptive tags into an episode file that is already on disk
pub fn write_tags(tagger: &dyn TagWriter, episode: &ResolvedEpisode) -> Result<(), TagError> {
    let tags = EpisodeTags::from_episode(episode);
    tagger.write_tags(episode, &tags)
}

/// Download and tag one episode
///
/// Never fails: a download error marks the episode `Failed`, a tagging error
/// is logged and leaves the episode `Downloaded`.
pub async fn materialize<C: HttpClient>(
    fetcher: &RateLimitedFetcher<C>,
    tagger: Option<&dyn TagWriter>,
    episode: &mut ResolvedEpisode,
    context: &DownloadContext,
    reporter: &SharedProgressReporter,
) -> Materialized {
    let bytes = match download_content(fetcher, episode, context, reporter).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(
                podcast = %episode.podcast,
                episode = %episode.title,
                error = %e,
                "Download failed"
            );
            reporter.report(ProgressEvent::DownloadFailed {
                download_id: context.download_id,
                episode_title: episode.title.clone(),
                error: e.to_string(),
            });
            episode.set_status(EpisodeStatus::Failed);
            return Materialized::Failed {
                reason: e.to_string(),
            };
        }
    };

    info!(
        podcast = %episode.podcast,
        episode = %episode.title,
        bytes,
        "Downloaded episode"
    );

    let tag_failure = tagger.and_then(|tagger| match write_tags(tagger, episode) {
        Ok(()) => None,
        Err(e) => {
            warn!(
                podcast = %episode.podcast,
                episode = %episode.title,
                error = %e,
                "Could not write tags"
            );
            Some(e.to_string())
        }
    });

    Materialized::Downloaded { bytes, tag_failure }
}

/// True when `actual` is within `tolerance` (a fraction of `expected`)
pub fn size_within_tolerance(actual: u64, expected: u64, tolerance: f64) -> bool {
    let diff = actual.abs_diff(expected);
    diff == 0 || (diff as f64) < expected as f64 * tolerance
}

/// Compare a downloaded file against the size the server reports
///
/// Returns `Ok(true)` if the file is intact. A missing file, or one whose
/// size is off by `tolerance * expected` or more, moves the episode to
/// `Corrupted`.
pub async fn verify_download<C: HttpClient>(
    fetcher: &RateLimitedFetcher<C>,
    episode: &mut ResolvedEpisode,
    tolerance: f64,
) -> Result<bool, VerifyError> {
    let url = episode.download_url.as_str();

    let response = fetcher
        .fetch(url, true)
        .await
        .map_err(|e| VerifyError::Network {
            url: url.to_string(),
            source: e,
        })?;

    if !response.is_success() {
        return Err(VerifyError::HttpStatus {
            url: url.to_string(),
            status: response.status,
        });
    }

    let expected = response
        .content_length
        .ok_or_else(|| VerifyError::MissingContentLength(url.to_string()))?;

    let actual = match tokio::fs::metadata(&episode.path).await {
        Ok(meta) => Some(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            return Err(VerifyError::Metadata {
                path: episode.path.clone(),
                source: e,
            });
        }
    };

    let intact = actual.is_some_and(|size| size_within_tolerance(size, expected, tolerance));
    debug!(
        episode = %episode.title,
        expected,
        actual = ?actual,
        intact,
        "Verified download size"
    );

    if !intact {
        episode.set_status(EpisodeStatus::Corrupted);
    }

    Ok(intact)
}
