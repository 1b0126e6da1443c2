pub mod episode;
pub mod error;
pub mod feed;
pub mod fetch;
pub mod http;
pub mod pipeline;
pub mod playlist;
pub mod progress;
pub mod state;
pub mod tag;

// Re-export main types for convenience
pub use episode::{EpisodeStatus, ResolvedEpisode, clean_title, extension_for_mime};
pub use error::{
    DownloadError, EpisodeError, FeedError, NetworkError, PipelineError, SourceError, TagError,
    TransportError, VerifyError,
};
pub use feed::{
    EpisodeDescriptor, FeedParser, ResolvedFeed, RssAtomParser, load_feeds_from_opml,
    load_feeds_from_text_files,
};
pub use fetch::{RateLimitedFetcher, RetryPolicy};
pub use http::{HttpClient, HttpResponse, ReqwestClient};
pub use pipeline::{
    DownloadPipeline, PipelineOptions, RunOutcome, RunReport, RunStage, VerifyOptions,
};
pub use playlist::PlaylistFormat;
pub use progress::{NoopReporter, ProgressEvent, ProgressReporter, SharedProgressReporter};
pub use tag::{EpisodeTags, FileTagWriter, TagWriter};
