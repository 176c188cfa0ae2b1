//! Splice two growing HLS media playlists into one continuous playlist.
//!
//! A decode job writes two tracks, each with its own media playlist that the
//! producer appends to while it runs. Players want a single feed, so every
//! request rebuilds one from whatever bytes are on disk at that moment:
//!
//! ```text
//! primary header + segments
//! #EXT-X-DISCONTINUITY          (once the primary has ended and the secondary exists)
//! secondary segments
//! #EXT-X-ENDLIST                (once the primary track has ended)
//! ```
//!
//! Nothing is cached; both inputs may be half-written, so a duration tag
//! whose URI line has not landed yet is held back instead of emitted.

use std::io;
use std::path::Path;

use tracing::debug;

/// Playlist header tag.
pub const EXTM3U: &str = "#EXTM3U";
/// Prefix shared by all extended playlist directives.
pub const EXT_X_PREFIX: &str = "#EXT-X";
/// Segment duration tag.
pub const EXTINF: &str = "#EXTINF";
/// End-of-stream marker.
pub const EXT_X_ENDLIST: &str = "#EXT-X-ENDLIST";
/// Splice point between two non-contiguous segment sequences.
pub const EXT_X_DISCONTINUITY: &str = "#EXT-X-DISCONTINUITY";

/// MIME type for the spliced playlist.
pub const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// Result of splicing the two tracks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpliceOutcome {
    /// The primary playlist does not exist yet.
    NotStarted,
    /// The combined playlist text.
    Playlist(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind {
    EndList,
    Duration,
    Directive,
    Uri,
    Ignored,
}

fn classify(line: &str) -> LineKind {
    if line == EXT_X_ENDLIST {
        LineKind::EndList
    } else if line.starts_with(EXTINF) {
        LineKind::Duration
    } else if line.starts_with(EXTM3U) || line.starts_with(EXT_X_PREFIX) {
        LineKind::Directive
    } else if !line.is_empty() && !line.starts_with('#') {
        LineKind::Uri
    } else {
        LineKind::Ignored
    }
}

/// Segment references collected from one playlist.
struct Track<'a> {
    lines: Vec<&'a str>,
    ended: bool,
}

/// Walk one playlist.
///
/// `keep_header` controls whether directives outside a segment (header and
/// meta tags) are kept. Directives between a duration tag and its URI belong
/// to that segment and travel with it.
fn collect_track(text: &str, keep_header: bool) -> Track<'_> {
    let mut track = Track {
        lines: Vec::new(),
        ended: false,
    };
    let mut pending: Vec<&str> = Vec::new();

    for line in text.lines().map(str::trim) {
        match classify(line) {
            LineKind::EndList => track.ended = true,
            LineKind::Duration => pending.push(line),
            LineKind::Directive if !pending.is_empty() => pending.push(line),
            LineKind::Directive if keep_header => track.lines.push(line),
            LineKind::Uri => {
                track.lines.append(&mut pending);
                track.lines.push(line);
            }
            LineKind::Directive | LineKind::Ignored => {}
        }
    }

    if !pending.is_empty() {
        debug!(lines = pending.len(), "Holding back incomplete segment entry");
    }

    track
}

/// Splice the primary playlist text with the optional secondary one.
///
/// The primary end marker is swallowed: it only signals that the secondary
/// track may follow. Once the primary has ended the result always carries
/// exactly one end marker, whether or not the secondary has finished.
pub fn splice(primary: &str, secondary: Option<&str>) -> String {
    let primary = collect_track(primary, true);
    let mut out = primary.lines;

    if !primary.ended {
        return out.join("\n");
    }

    // Any non-blank secondary marks the splice point, even before its first
    // segment lands.
    if let Some(text) = secondary.filter(|text| !text.trim().is_empty()) {
        out.push(EXT_X_DISCONTINUITY);
        out.extend(collect_track(text, false).lines);
    }

    out.push(EXT_X_ENDLIST);
    out.join("\n")
}

/// Splice the playlists stored at `primary` and `secondary`.
///
/// A missing primary yields [`SpliceOutcome::NotStarted`]. The secondary is
/// best-effort: missing or unreadable means "not written yet".
pub async fn splice_files(primary: &Path, secondary: &Path) -> io::Result<SpliceOutcome> {
    let primary_text = match tokio::fs::read(primary).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(SpliceOutcome::NotStarted),
        Err(e) => return Err(e),
    };

    let secondary_text = match tokio::fs::read(secondary).await {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) => {
            if e.kind() != io::ErrorKind::NotFound {
                debug!(path = %secondary.display(), error = %e, "Secondary playlist unreadable");
            }
            None
        }
    };

    Ok(SpliceOutcome::Playlist(splice(
        &primary_text,
        secondary_text.as_deref(),
    )))
}
