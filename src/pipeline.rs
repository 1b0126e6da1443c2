// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use rand::seq::SliceRandom;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::episode::{
    DownloadContext, EpisodeResolver, EpisodeStatus, Materialized, ResolvedEpisode, materialize,
    verify_download, write_tags,
};
use crate::error::PipelineError;
use crate::feed::{FeedParser, FeedResolver, ResolvedFeed, RssAtomParser, ensure_directory};
use crate::fetch::{RateLimitedFetcher, RetryPolicy};
use crate::http::HttpClient;
use crate::playlist::{PlaylistFormat, write_playlists};
use crate::progress::{NoopReporter, ProgressEvent, SharedProgressReporter};
use crate::state::ExistingFiles;
use crate::tag::{FileTagWriter, TagWriter};

/// Options for a run
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Only consider the first `n` entries of every feed (None = all)
    pub limit: Option<usize>,
    /// Workers for feed and episode resolution
    pub threads: usize,
    /// Workers for downloads; defaults to `threads`
    pub download_threads: Option<usize>,
    /// Cap on the number of episodes downloaded across all feeds
    pub max_downloads: Option<usize>,
    /// Playlists written per podcast after downloading
    pub playlists: Vec<PlaylistFormat>,
    /// Write tags into freshly downloaded files
    pub write_tags: bool,
}

impl PipelineOptions {
    fn resolve_workers(&self) -> usize {
        self.threads.max(1)
    }

    fn download_workers(&self) -> usize {
        self.download_threads.unwrap_or(self.threads).max(1)
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            limit: None,
            threads: 10,
            download_threads: None,
            max_downloads: None,
            playlists: Vec::new(),
            write_tags: true,
        }
    }
}

/// Options for the `verify` command
#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// Allowed size difference as a fraction of the remote size
    pub tolerance: f64,
    /// Where corrupted paths are listed; defaults to `<destination>/corrupted_episodes.txt`
    pub report_path: Option<PathBuf>,
}

impl VerifyOptions {
    pub const DEFAULT_TOLERANCE: f64 = 0.02;
    pub const DEFAULT_REPORT_NAME: &'static str = "corrupted_episodes.txt";
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            tolerance: Self::DEFAULT_TOLERANCE,
            report_path: None,
        }
    }
}

/// Stages a run passes through, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Start,
    FeedsLoading,
    FeedsResolving,
    DirectoriesEnsured,
    EpisodesResolving,
    MaterializationDistributing,
    MaterializationRunning,
    Complete,
}

fn enter(stage: RunStage) {
    debug!(stage = ?stage, "Entering run stage");
}

/// Counts and failures of a finished run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub feeds_resolved: usize,
    pub feeds_failed: usize,
    pub episodes_total: usize,
    /// Episodes whose file was already present
    pub existing: usize,
    /// Entries that could not be resolved into a downloadable episode
    pub unresolved: usize,
    pub downloaded: usize,
    pub failed: usize,
    pub tagged: usize,
    pub tag_failures: usize,
    pub corrupted: usize,
    /// Files that failed verification
    pub corrupted_paths: Vec<PathBuf>,
    /// `(what, why)` for every feed, episode or file that failed
    pub failures: Vec<(String, String)>,
}

/// Result of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// No feed sources were given; nothing was done
    NoFeeds,
    Completed(RunReport),
}

impl RunOutcome {
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            RunOutcome::NoFeeds => None,
            RunOutcome::Completed(report) => Some(report),
        }
    }
}

struct FeedEpisodes {
    feed: ResolvedFeed,
    /// Resolved episodes in feed order
    episodes: Vec<ResolvedEpisode>,
}

/// Drives feeds through resolution, download, tagging and playlist writing
pub struct DownloadPipeline<C, P = RssAtomParser> {
    fetcher: Arc<RateLimitedFetcher<C>>,
    parser: P,
    tagger: Arc<dyn TagWriter>,
    reporter: SharedProgressReporter,
    destination: PathBuf,
}

impl<C: HttpClient + 'static> DownloadPipeline<C> {
    pub fn new(client: C, policy: RetryPolicy, destination: impl Into<PathBuf>) -> Self {
        Self {
            fetcher: Arc::new(RateLimitedFetcher::new(client, policy)),
            parser: RssAtomParser,
            tagger: Arc::new(FileTagWriter),
            reporter: NoopReporter::shared(),
            destination: destination.into(),
        }
    }
}

impl<C: HttpClient + 'static, P: FeedParser> DownloadPipeline<C, P> {
    pub fn with_parser<Q: FeedParser>(self, parser: Q) -> DownloadPipeline<C, Q> {
        DownloadPipeline {
            fetcher: self.fetcher,
            parser,
            tagger: self.tagger,
            reporter: self.reporter,
            destination: self.destination,
        }
    }

    pub fn with_tagger(mut self, tagger: Arc<dyn TagWriter>) -> Self {
        self.tagger = tagger;
        self
    }

    pub fn with_reporter(mut self, reporter: SharedProgressReporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Download every new episode of the given feeds
    pub async fn run_download(
        &self,
        sources: Vec<String>,
        options: &PipelineOptions,
    ) -> Result<RunOutcome, PipelineError> {
        enter(RunStage::Start);
        if sources.is_empty() {
            warn!("No feeds have been provided");
            return Ok(RunOutcome::NoFeeds);
        }

        let mut report = RunReport::default();
        let mut feeds = self.resolve(sources, options, &mut report).await?;

        enter(RunStage::MaterializationDistributing);
        let mut queue = Vec::new();
        let mut claimed = HashSet::new();
        let mut duplicates = Vec::new();
        for (feed_index, entry) in feeds.iter().enumerate() {
            for (episode_index, episode) in entry.episodes.iter().enumerate() {
                match episode.status() {
                    EpisodeStatus::Downloaded => report.existing += 1,
                    EpisodeStatus::Pending if !claimed.insert(episode.path.clone()) => {
                        // first entry in feed order keeps the file
                        warn!(
                            podcast = %episode.podcast,
                            episode = %episode.title,
                            path = %episode.path.display(),
                            "Another episode already downloads to this path"
                        );
                        report.unresolved += 1;
                        report.failures.push((
                            describe(episode),
                            format!("Duplicate destination path {}", episode.path.display()),
                        ));
                        duplicates.push((feed_index, episode_index));
                    }
                    EpisodeStatus::Pending => {
                        queue.push((feed_index, episode_index, episode.clone()))
                    }
                    _ => {}
                }
            }
        }
        if let Some(max) = options.max_downloads {
            queue.truncate(max);
        }
        queue.shuffle(&mut rand::rng());

        self.reporter.report(ProgressEvent::EpisodesResolved {
            total_episodes: report.episodes_total,
            existing: report.existing,
            to_download: queue.len(),
        });
        info!(
            existing = report.existing,
            to_download = queue.len(),
            "Starting downloads"
        );

        enter(RunStage::MaterializationRunning);
        let tagger = options.write_tags.then(|| self.tagger.clone());
        let results = self
            .materialize_all(queue, tagger, options.download_workers())
            .await;

        for (feed_index, episode_index, episode, outcome) in results {
            match outcome {
                Materialized::Downloaded { tag_failure, .. } => {
                    report.downloaded += 1;
                    match tag_failure {
                        Some(reason) => {
                            report.tag_failures += 1;
                            report.failures.push((describe(&episode), reason));
                        }
                        None if options.write_tags => report.tagged += 1,
                        None => {}
                    }
                }
                Materialized::Failed { reason } => {
                    report.failed += 1;
                    report.failures.push((describe(&episode), reason));
                }
            }
            feeds[feed_index].episodes[episode_index] = episode;
        }
        for (feed_index, episode_index) in duplicates.into_iter().rev() {
            feeds[feed_index].episodes.remove(episode_index);
        }

        if !options.playlists.is_empty() {
            for entry in &feeds {
                if let Err(e) = write_playlists(
                    &options.playlists,
                    &entry.feed.title,
                    &entry.feed.directory,
                    &entry.episodes,
                ) {
                    warn!(podcast = %entry.feed.title, error = %e, "Could not write playlist");
                }
            }
        }

        enter(RunStage::Complete);
        self.reporter.report(ProgressEvent::RunCompleted {
            downloaded_count: report.downloaded,
            existing_count: report.existing,
            failed_count: report.failed,
        });

        Ok(RunOutcome::Completed(report))
    }

    /// Compare downloaded files with the size the server reports
    ///
    /// Paths of corrupted files are written to the report file, one per line.
    pub async fn run_verify(
        &self,
        sources: Vec<String>,
        options: &PipelineOptions,
        verify: &VerifyOptions,
    ) -> Result<RunOutcome, PipelineError> {
        enter(RunStage::Start);
        if sources.is_empty() {
            warn!("No feeds have been provided");
            return Ok(RunOutcome::NoFeeds);
        }

        let mut report = RunReport::default();
        let feeds = self.resolve(sources, options, &mut report).await?;

        let downloaded: Vec<ResolvedEpisode> = feeds
            .into_iter()
            .flat_map(|entry| entry.episodes)
            .filter(|episode| episode.status() == EpisodeStatus::Downloaded)
            .collect();
        report.existing = downloaded.len();
        let checked = downloaded.len();

        let fetcher = self.fetcher.as_ref();
        let tolerance = verify.tolerance;
        let results: Vec<_> = stream::iter(downloaded)
            .map(|mut episode| async move {
                let result = verify_download(fetcher, &mut episode, tolerance).await;
                (episode, result)
            })
            .buffer_unordered(options.resolve_workers())
            .collect()
            .await;

        for (episode, result) in results {
            match result {
                Ok(true) => {}
                Ok(false) => {
                    warn!(
                        podcast = %episode.podcast,
                        episode = %episode.title,
                        path = %episode.path.display(),
                        "Episode is corrupted"
                    );
                    report.corrupted += 1;
                    report.corrupted_paths.push(episode.path.clone());
                }
                Err(e) => {
                    warn!(episode = %episode.title, error = %e, "Could not verify episode");
                    report.failures.push((describe(&episode), e.to_string()));
                }
            }
        }
        report.corrupted_paths.sort();

        let report_path = verify
            .report_path
            .clone()
            .unwrap_or_else(|| self.destination.join(VerifyOptions::DEFAULT_REPORT_NAME));
        let mut content = String::new();
        for path in &report.corrupted_paths {
            content.push_str(&path.display().to_string());
            content.push('\n');
        }
        tokio::fs::write(&report_path, content)
            .await
            .map_err(|e| PipelineError::ReportWriteFailed {
                path: report_path.clone(),
                source: e,
            })?;
        info!(path = %report_path.display(), corrupted = report.corrupted, "Wrote verification report");

        enter(RunStage::Complete);
        self.reporter.report(ProgressEvent::VerifyCompleted {
            checked,
            corrupted: report.corrupted,
        });

        Ok(RunOutcome::Completed(report))
    }

    /// Rewrite tags of every episode whose file is already on disk
    pub async fn run_tag(
        &self,
        sources: Vec<String>,
        options: &PipelineOptions,
    ) -> Result<RunOutcome, PipelineError> {
        enter(RunStage::Start);
        if sources.is_empty() {
            warn!("No feeds have been provided");
            return Ok(RunOutcome::NoFeeds);
        }

        let mut report = RunReport::default();
        let feeds = self.resolve(sources, options, &mut report).await?;

        for episode in feeds.iter().flat_map(|entry| entry.episodes.iter()) {
            if episode.status() != EpisodeStatus::Downloaded {
                continue;
            }
            report.existing += 1;
            match write_tags(self.tagger.as_ref(), episode) {
                Ok(()) => report.tagged += 1,
                Err(e) => {
                    warn!(episode = %episode.title, error = %e, "Could not write tags");
                    report.tag_failures += 1;
                    report.failures.push((describe(episode), e.to_string()));
                }
            }
        }

        enter(RunStage::Complete);
        self.reporter.report(ProgressEvent::TaggingCompleted {
            tagged: report.tagged,
            failed: report.tag_failures,
        });

        Ok(RunOutcome::Completed(report))
    }

    /// Resolve feeds, ensure their directories and resolve their episodes
    ///
    /// Each stage finishes before the next one starts. Failed feeds and
    /// entries are dropped and recorded in `report`.
    async fn resolve(
        &self,
        mut sources: Vec<String>,
        options: &PipelineOptions,
        report: &mut RunReport,
    ) -> Result<Vec<FeedEpisodes>, PipelineError> {
        let workers = options.resolve_workers();

        enter(RunStage::FeedsLoading);
        sources.shuffle(&mut rand::rng());
        self.reporter.report(ProgressEvent::FetchingFeeds {
            count: sources.len(),
        });

        enter(RunStage::FeedsResolving);
        let resolver = FeedResolver::new(
            self.fetcher.as_ref(),
            &self.parser,
            &self.destination,
            options.limit,
        );
        let results: Vec<_> = stream::iter(sources)
            .map(|source| {
                let resolver = &resolver;
                async move {
                    let result = resolver.resolve(&source).await;
                    (source, result)
                }
            })
            .buffer_unordered(workers)
            .collect()
            .await;

        let mut feeds = Vec::new();
        for (source, result) in results {
            match result {
                Ok(feed) => {
                    self.reporter.report(ProgressEvent::FeedResolved {
                        podcast_title: feed.title.clone(),
                        total_episodes: feed.episodes.len(),
                    });
                    feeds.push(feed);
                }
                Err(e) => {
                    error!(feed = %source, error = %e, "Could not resolve feed");
                    self.reporter.report(ProgressEvent::FeedFailed {
                        source: source.clone(),
                        error: e.to_string(),
                    });
                    report.feeds_failed += 1;
                    report.failures.push((source, e.to_string()));
                }
            }
        }

        enter(RunStage::DirectoriesEnsured);
        feeds.retain(|feed| match ensure_directory(feed) {
            Ok(()) => true,
            Err(e) => {
                error!(podcast = %feed.title, error = %e, "Could not create podcast directory");
                report.feeds_failed += 1;
                report.failures.push((feed.source.clone(), e.to_string()));
                false
            }
        });
        report.feeds_resolved = feeds.len();

        let existing = ExistingFiles::scan(&self.destination)?;
        if existing.partial_files_cleaned > 0 {
            info!(
                count = existing.partial_files_cleaned,
                "Removed partial files of interrupted downloads"
            );
            self.reporter.report(ProgressEvent::PartialFilesCleanedUp {
                count: existing.partial_files_cleaned,
            });
        }

        enter(RunStage::EpisodesResolving);
        let episode_resolver =
            EpisodeResolver::new(self.fetcher.as_ref(), &self.destination, &existing);
        let work: Vec<_> = feeds
            .iter()
            .enumerate()
            .flat_map(|(feed_index, feed)| {
                feed.episodes
                    .iter()
                    .cloned()
                    .enumerate()
                    .map(move |(entry_index, descriptor)| (feed_index, entry_index, descriptor))
            })
            .collect();
        report.episodes_total = work.len();

        let feeds_ref = &feeds;
        let mut results: Vec<_> = stream::iter(work)
            .map(|(feed_index, entry_index, descriptor)| {
                let resolver = &episode_resolver;
                async move {
                    let podcast = feeds_ref[feed_index].title.as_str();
                    let title = descriptor.title.clone();
                    let result = resolver.resolve(descriptor, podcast).await;
                    (feed_index, entry_index, title, result)
                }
            })
            .buffer_unordered(workers)
            .collect()
            .await;
        results.sort_by_key(|(feed_index, entry_index, _, _)| (*feed_index, *entry_index));

        let mut per_feed: Vec<Vec<ResolvedEpisode>> = feeds.iter().map(|_| Vec::new()).collect();
        for (feed_index, _, title, result) in results {
            match result {
                Ok(episode) => per_feed[feed_index].push(episode),
                Err(e) => {
                    let podcast = &feeds[feed_index].title;
                    warn!(podcast = %podcast, episode = %title, error = %e, "Could not resolve episode");
                    report.unresolved += 1;
                    report.failures.push((format!("{podcast}: {title}"), e.to_string()));
                }
            }
        }

        Ok(feeds
            .into_iter()
            .zip(per_feed)
            .map(|(feed, episodes)| FeedEpisodes { feed, episodes })
            .collect())
    }

    /// Download the queue with a fixed pool of worker slots
    ///
    /// Slot ids double as progress bar ids. A panicking worker brings the whole
    /// run down.
    async fn materialize_all(
        &self,
        queue: Vec<(usize, usize, ResolvedEpisode)>,
        tagger: Option<Arc<dyn TagWriter>>,
        workers: usize,
    ) -> Vec<(usize, usize, ResolvedEpisode, Materialized)> {
        let total_to_download = queue.len();
        if total_to_download == 0 {
            return Vec::new();
        }

        let workers = workers.min(total_to_download);
        let (slot_tx, mut slot_rx) = mpsc::channel(workers);
        for slot in 0..workers {
            let _ = slot_tx.send(slot).await;
        }

        let mut handles = Vec::with_capacity(total_to_download);

        for (queue_index, (feed_index, episode_index, mut episode)) in queue.into_iter().enumerate()
        {
            // Wait for a free slot before spawning so episodes start in queue order
            let Some(download_id) = slot_rx.recv().await else {
                break;
            };

            let slot_tx = slot_tx.clone();
            let fetcher = self.fetcher.clone();
            let tagger = tagger.clone();
            let reporter = self.reporter.clone();

            handles.push(tokio::spawn(async move {
                let context = DownloadContext {
                    download_id,
                    episode_index: queue_index,
                    total_to_download,
                };

                let outcome = materialize(
                    fetcher.as_ref(),
                    tagger.as_deref(),
                    &mut episode,
                    &context,
                    &reporter,
                )
                .await;

                let _ = slot_tx.send(download_id).await;

                (feed_index, episode_index, episode, outcome)
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => error!(error = %e, "Download task was cancelled"),
            }
        }
        results
    }
}

fn describe(episode: &ResolvedEpisode) -> String {
    format!("{}: {}", episode.podcast, episode.title)
}
