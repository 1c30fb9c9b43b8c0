//! Base URL ("patch URL") reconciliation for relative segment paths.

use std::time::Duration;

use tracing::{debug, info};
use url::Url;

use crate::session::HttpSession;
use crate::{Result, RewindError};

/// A base URL together with the segment URL it was validated against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchUrl {
    pub base: String,
    pub file_url: String,
}

impl PatchUrl {
    pub fn join(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }
}

/// Build the candidate base for `segment_path` relative to `playlist_url`.
///
/// The playlist's path components (host first) are appended to the base until
/// one of them also appears in the segment path; the segment path is assumed
/// to continue from there.
pub fn candidate(playlist_url: &str, segment_path: &str) -> Result<PatchUrl> {
    if segment_path.starts_with("http://") || segment_path.starts_with("https://") {
        return Ok(PatchUrl {
            base: String::new(),
            file_url: segment_path.to_string(),
        });
    }

    Url::parse(playlist_url).map_err(|e| RewindError::invalid_url(playlist_url, e.to_string()))?;
    let Some((scheme, rest)) = playlist_url.split_once("://") else {
        return Err(RewindError::invalid_url(playlist_url, "missing scheme"));
    };

    let rest = rest.split('?').next().unwrap_or(rest);
    let mut playlist_parts: Vec<&str> = rest.split('/').collect();
    playlist_parts.pop();
    let segment_parts: Vec<&str> = segment_path
        .split('?')
        .next()
        .unwrap_or(segment_path)
        .split('/')
        .collect();

    let mut base = format!("{scheme}://");
    for part in playlist_parts {
        if segment_parts.contains(&part) {
            break;
        }
        base.push_str(part);
        base.push('/');
    }
    if segment_path.starts_with('/') {
        base.pop();
    }

    let file_url = format!("{base}{segment_path}");
    Ok(PatchUrl { base, file_url })
}

/// Resolve and validate the patch URL, preferring the media playlist and
/// falling back to the master playlist.
pub async fn resolve(
    session: &HttpSession,
    media_url: &str,
    master_url: Option<&str>,
    segment_path: &str,
    timeout: Duration,
) -> Result<PatchUrl> {
    for playlist_url in std::iter::once(media_url).chain(master_url) {
        let patch = candidate(playlist_url, segment_path)?;
        if session.probe(&patch.file_url, timeout).await {
            info!(base = %patch.base, "Resolved patch URL");
            return Ok(patch);
        }
        debug!(
            playlist = playlist_url,
            candidate = %patch.file_url,
            "Patch URL candidate unreachable"
        );
    }
    Err(RewindError::PatchResolution {
        segment: segment_path.to_string(),
    })
}
