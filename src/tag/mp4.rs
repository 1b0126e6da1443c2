use std::path::Path;

use super::EpisodeTags;

/// Write the episode tags into the iTunes metadata atoms of an MP4 file
pub(super) fn write(path: &Path, tags: &EpisodeTags) -> Result<(), mp4ameta::Error> {
    let mut tag = mp4ameta::Tag::read_from_path(path)?;

    tag.set_title(tags.title.as_str());
    tag.set_album(tags.album.as_str());
    if let Some(date) = &tags.date {
        tag.set_year(date.as_str());
    }
    if let Some(description) = &tags.description {
        tag.set_description(description.as_str());
    }
    if let Some(track) = tags.track {
        tag.set_track_number(u16::try_from(track).unwrap_or(u16::MAX));
    }

    tag.write_to_path(path)
}
