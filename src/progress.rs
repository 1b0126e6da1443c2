use std::sync::Arc;

/// Events emitted while a run progresses, for terminal output
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Feed documents are being fetched
    FetchingFeeds { count: usize },

    /// A feed was fetched and parsed
    FeedResolved {
        podcast_title: String,
        total_episodes: usize,
    },

    /// A feed could not be fetched or parsed and was dropped
    FeedFailed { source: String, error: String },

    /// Stale `.partial` files were removed while scanning the destination
    PartialFilesCleanedUp { count: usize },

    /// All episodes of all feeds have been resolved
    EpisodesResolved {
        total_episodes: usize,
        existing: usize,
        to_download: usize,
    },

    /// A download is starting
    DownloadStarting {
        /// Identifies the download slot (0 to workers-1)
        download_id: usize,
        episode_title: String,
        /// Index of this episode in the download queue
        episode_index: usize,
        /// Total number of episodes to download
        total_to_download: usize,
        /// Expected content length in bytes, if known
        content_length: Option<u64>,
    },

    /// Download progress update
    DownloadProgress {
        download_id: usize,
        episode_title: String,
        bytes_downloaded: u64,
        total_bytes: Option<u64>,
    },

    /// A download completed successfully
    DownloadCompleted {
        download_id: usize,
        episode_title: String,
        bytes_downloaded: u64,
    },

    /// A download failed
    DownloadFailed {
        download_id: usize,
        episode_title: String,
        error: String,
    },

    /// The `verify` command checked every downloaded episode
    VerifyCompleted { checked: usize, corrupted: usize },

    /// The `tag` command rewrote tags of existing files
    TaggingCompleted { tagged: usize, failed: usize },

    /// A download run completed
    RunCompleted {
        downloaded_count: usize,
        existing_count: usize,
        failed_count: usize,
    },
}

/// Receives [`ProgressEvent`]s as a run advances.
///
/// Implementations can draw progress bars, print messages or collect
/// statistics. Events arrive from several worker tasks at once.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// A shared reference to a progress reporter
pub type SharedProgressReporter = Arc<dyn ProgressReporter>;

/// Reporter that drops every event, for quiet mode and tests
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _event: ProgressEvent) {}
}

impl NoopReporter {
    /// Create a new NoopReporter wrapped in an Arc
    pub fn shared() -> SharedProgressReporter {
        Arc::new(Self)
    }
}
