//! On-disk layout of a mission and the locally reconstructed manifest.

use std::path::PathBuf;

use tracing::{debug, info};

use crate::Result;
use crate::manifest::{MediaPlaylistInfo, resource_name};
use crate::status::{MissionReport, StatusMap};

pub const LOCAL_MANIFEST: &str = "media.m3u8";
pub const KEY_FILE: &str = "server.key";
pub const REPORT_FILE: &str = "status.json";

/// `<output>/backup/<title>/{fragments,decrypt}` plus the merged file next to `backup`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissionLayout {
    pub root: PathBuf,
    pub title: String,
    pub backup: PathBuf,
    pub fragments: PathBuf,
    pub decrypt: PathBuf,
}

impl MissionLayout {
    pub fn new(root: impl Into<PathBuf>, title: impl Into<String>) -> Self {
        let root = root.into();
        let title = title.into();
        let backup = root.join("backup").join(&title);
        Self {
            fragments: backup.join("fragments"),
            decrypt: backup.join("decrypt"),
            backup,
            root,
            title,
        }
    }

    pub async fn create(&self, with_decrypt: bool) -> Result<()> {
        tokio::fs::create_dir_all(&self.fragments).await?;
        if with_decrypt {
            tokio::fs::create_dir_all(&self.decrypt).await?;
        }
        info!(path = %self.fragments.display(), "Fragments, key and manifest stored here");
        Ok(())
    }

    pub fn fragment(&self, filename: &str) -> PathBuf {
        self.fragments.join(filename)
    }

    pub fn decrypted(&self, filename: &str) -> PathBuf {
        self.decrypt.join(filename)
    }

    pub fn key_path(&self) -> PathBuf {
        self.fragments.join(KEY_FILE)
    }

    /// `<output>/backup/<title>.log`
    pub fn log_path(&self) -> PathBuf {
        self.root.join("backup").join(format!("{}.log", self.title))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.fragments.join(LOCAL_MANIFEST)
    }

    /// Final muxed file; MPEG-TS is remuxed into MP4.
    pub fn final_output(&self, media_ext: &str) -> PathBuf {
        let ext = if media_ext.eq_ignore_ascii_case("ts") || media_ext.is_empty() {
            "mp4"
        } else {
            media_ext
        };
        self.root.join(format!("{}.{ext}", self.title))
    }

    /// Mirror a fetched source manifest into the backup folder, blank lines removed.
    pub async fn write_source_manifest(&self, url: &str, content: &str) -> Result<PathBuf> {
        let path = self.backup.join(resource_name(url));
        let compact: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
        tokio::fs::write(&path, compact.join("\n")).await?;
        debug!(path = %path.display(), "Source manifest mirrored");
        Ok(path)
    }

    pub async fn write_local_manifest(
        &self,
        live_content: &str,
        media: &MediaPlaylistInfo,
        status: &StatusMap,
    ) -> Result<PathBuf> {
        let path = self.manifest_path();
        tokio::fs::write(&path, render_local_manifest(live_content, media, status)).await?;
        info!(path = %path.display(), segments = status.len(), "Local manifest written");
        Ok(path)
    }

    pub async fn write_report(&self, report: &MissionReport) -> Result<PathBuf> {
        let path = self.backup.join(REPORT_FILE);
        let json = serde_json::to_vec_pretty(report).map_err(std::io::Error::other)?;
        tokio::fs::write(&path, json).await?;
        Ok(path)
    }
}

/// Header of the live manifest (init segment and key pointed at local files),
/// then every tracked segment in sequence order, then `#EXT-X-ENDLIST`.
pub fn render_local_manifest(
    live_content: &str,
    media: &MediaPlaylistInfo,
    status: &StatusMap,
) -> String {
    let mut out = String::new();
    for line in live_content.lines() {
        if line.contains("#EXTINF:") || line.contains("#EXT-X-PROGRAM-DATE-TIME:") {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }
        let line = match (&media.map_uri, &media.key_uri) {
            (Some(map), _) if line.starts_with("#EXT-X-MAP:") => {
                line.replace(map.as_str(), &resource_name(map))
            }
            (_, Some(key)) if line.starts_with("#EXT-X-KEY:") => line.replace(key.as_str(), KEY_FILE),
            _ => line.to_string(),
        };
        out.push_str(&line);
        out.push('\n');
    }

    for (_, segment) in status.iter() {
        out.push_str(&format!("#EXTINF:{},\n", media.target_duration));
        out.push_str(&segment.filename);
        out.push('\n');
    }
    out.push_str("#EXT-X-ENDLIST");
    out
}
