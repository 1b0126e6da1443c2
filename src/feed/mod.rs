mod parse;
mod resolve;
mod sources;

pub use parse::{EpisodeDescriptor, FeedLink, FeedParser, MalformedFeed, ParsedFeed, RssAtomParser};
pub use resolve::{FeedResolver, ResolvedFeed, ensure_directory, sanitize_podcast_title};
pub use sources::{
    clean_text_line, load_feeds_from_opml, load_feeds_from_text_files, parse_feed_list, parse_opml,
};
