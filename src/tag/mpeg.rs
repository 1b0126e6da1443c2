use std::path::Path;

use id3::{ErrorKind, Tag, TagLike, Version};

use super::EpisodeTags;

/// Merge the episode tags into the file's ID3v2 tag, creating one if absent
pub(super) fn write(path: &Path, tags: &EpisodeTags) -> Result<(), id3::Error> {
    let mut tag = match Tag::read_from_path(path) {
        Ok(tag) => tag,
        Err(e) if matches!(e.kind, ErrorKind::NoTag) => Tag::new(),
        Err(e) => return Err(e),
    };

    tag.set_title(tags.title.as_str());
    tag.set_album(tags.album.as_str());
    if let Some(date) = &tags.date {
        // original release time
        tag.set_text("TDOR", date.as_str());
    }
    if let Some(description) = &tags.description {
        // podcast description
        tag.set_text("TDES", description.as_str());
    }
    if let Some(track) = tags.track {
        tag.set_track(track);
    }

    tag.write_to_path(path, Version::Id3v24)
}
