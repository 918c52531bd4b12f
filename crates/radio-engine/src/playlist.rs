//! Playlist listing normalization and playback scoping.

use std::collections::HashSet;

use radio_types::{ALL_TRACKS_NAME, PlaylistEntry};

/// Turn raw server lines into entries.
///
/// Names are trimmed; empty names, duplicates and the reserved "All tracks" name are dropped.
/// Server order is kept, ids count up from 1, and the synthetic "All tracks" entry comes first.
pub fn normalize_playlists<I, S>(raw: I) -> Vec<PlaylistEntry>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut out = vec![PlaylistEntry::all_tracks()];
    for name in raw {
        let name = name.as_ref().trim();
        if name.is_empty() || is_all_tracks(name) || !seen.insert(name.to_string()) {
            continue;
        }
        out.push(PlaylistEntry {
            id: out.len() as i64,
            name: name.to_string(),
        });
    }
    out
}

/// Playlist filter to send to the server; `None` streams everything.
pub fn playlist_scope(name: &str) -> Option<String> {
    let name = name.trim();
    if name.is_empty() || is_all_tracks(name) {
        None
    } else {
        Some(name.to_string())
    }
}

fn is_all_tracks(name: &str) -> bool {
    name.eq_ignore_ascii_case(ALL_TRACKS_NAME)
}
