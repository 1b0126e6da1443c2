// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;

/// Lifecycle of an episode within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EpisodeStatus {
    /// Nothing resolved yet
    #[default]
    Blank,
    /// Download URL, content type and path are known
    Pending,
    /// Content is on disk
    Downloaded,
    /// On-disk size does not match the remote size
    Corrupted,
    /// Materialization failed
    Failed,
}

impl EpisodeStatus {
    /// Whether moving from `self` to `next` is allowed
    pub fn can_transition_to(self, next: EpisodeStatus) -> bool {
        use EpisodeStatus::*;

        matches!(
            (self, next),
            (Blank, Pending)
                | (Pending, Downloaded)
                | (Pending, Failed)
                | (Downloaded, Downloaded)
                | (Downloaded, Corrupted)
        )
    }
}

impl fmt::Display for EpisodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EpisodeStatus::Blank => "blank",
            EpisodeStatus::Pending => "pending",
            EpisodeStatus::Downloaded => "downloaded",
            EpisodeStatus::Corrupted => "corrupted",
            EpisodeStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}
