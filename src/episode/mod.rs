mod download;
mod filename;
mod resolve;
mod status;

pub use download::{
    DownloadContext, Materialized, download_content, materialize, partial_path,
    size_within_tolerance, verify_download, write_tags,
};
pub use filename::{clean_title, episode_path, extension_for_mime, normalize_mime};
pub use resolve::{EpisodeResolver, ResolvedEpisode, find_download_link};
pub use status::EpisodeStatus;
