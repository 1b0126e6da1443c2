use std::path::{Path, PathBuf};

/// Remove path separators and NUL bytes so a title is a single path segment
///
/// Nothing is substituted; every other character is kept as-is.
pub fn clean_title(title: &str) -> String {
    title.chars().filter(|c| *c != '/' && *c != '\0').collect()
}

/// Strip parameters (`; charset=...`) and normalize case of a MIME type
pub fn normalize_mime(mime: &str) -> String {
    mime.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Map an audio MIME type to the file extension used on disk
///
/// Unknown types yield `None`; there is deliberately no default extension.
pub fn extension_for_mime(mime: &str) -> Option<&'static str> {
    match normalize_mime(mime).as_str() {
        "audio/mp4" | "audio/x-m4a" | "audio/m4a" => Some(".m4a"),
        "audio/mpeg" | "audio/mp3" | "audio/mpa" | "audio/mpa-robust" => Some(".mp3"),
        "audio/aac" | "audio/aacp" | "audio/3gpp" | "audio/3gpp2" | "audio/mp4a-latm"
        | "audio/mpeg4-generic" => Some(".aac"),
        "audio/flac" | "audio/x-flac" => Some(".flac"),
        "audio/wav" | "audio/x-wav" | "audio/wave" => Some(".wav"),
        "audio/ogg" | "audio/opus" | "audio/webm" => Some(".opus"),
        _ => None,
    }
}

/// `<destination>/<podcast>/<title><extension>`
///
/// The title is appended verbatim (not via `with_extension`) so titles that
/// contain dots keep them.
pub fn episode_path(destination: &Path, podcast: &str, title: &str, extension: &str) -> PathBuf {
    destination.join(podcast).join(format!("{title}{extension}"))
}
