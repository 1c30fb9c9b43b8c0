//! Playlist resolution: master/media discovery, polling and patch URL upkeep.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::manifest::{self, MasterPlaylistInfo, MediaPlaylistInfo, PlaylistKind, Variant};
use crate::patch::{self, PatchUrl};
use crate::session::HttpSession;
use crate::{Result, RewindError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverState {
    Uninitialized,
    Classified(PlaylistKind),
    Ready,
}

/// Owns the current master and media URLs of one rendition and keeps the
/// parsed media playlist and its patch URL fresh.
#[derive(Debug)]
pub struct PlaylistResolver {
    session: HttpSession,
    state: ResolverState,
    rendition: i64,
    probe_timeout: Duration,

    master_url: Option<String>,
    master_base: Option<String>,
    master: Option<MasterPlaylistInfo>,
    master_content: Option<String>,

    media_url: Option<String>,
    announced_media_url: Option<String>,
    media: Option<MediaPlaylistInfo>,
    media_content: Option<String>,
    patch: Option<PatchUrl>,
}

impl PlaylistResolver {
    pub fn new(session: HttpSession, rendition: i64, probe_timeout: Duration) -> Self {
        Self {
            session,
            state: ResolverState::Uninitialized,
            rendition,
            probe_timeout,
            master_url: None,
            master_base: None,
            master: None,
            master_content: None,
            media_url: None,
            announced_media_url: None,
            media: None,
            media_content: None,
            patch: None,
        }
    }

    /// Fetch the entry URL once and decide whether it is a master or a media playlist.
    pub async fn classify(&mut self, entry_url: &str) -> Result<PlaylistKind> {
        let content = self.session.fetch_text(entry_url).await?;
        let kind = manifest::classify(&content, entry_url)?;
        match kind {
            PlaylistKind::Master => self.master_url = Some(entry_url.to_string()),
            PlaylistKind::Media => self.media_url = Some(entry_url.to_string()),
        }
        info!(url = entry_url, kind = ?kind, "Classified entry playlist");
        self.state = ResolverState::Classified(kind);
        Ok(kind)
    }

    /// First full update with errors propagated: classification, master
    /// selection, media parse and patch resolution all have to succeed.
    pub async fn prepare(&mut self, entry_url: &str) -> Result<()> {
        if self.state == ResolverState::Uninitialized {
            self.classify(entry_url).await?;
        }
        if self.master_url.is_some() {
            self.session.refresh_credentials().await;
            self.fetch_master().await?;
        }
        self.session.refresh_credentials().await;
        self.fetch_media().await?;
        self.state = ResolverState::Ready;
        Ok(())
    }

    /// Re-read the master playlist and re-select the configured rendition.
    /// No-op for a media-only entry.
    pub async fn update_master_playlist(&mut self) {
        if self.master_url.is_none() {
            return;
        }
        self.session.refresh_credentials().await;
        if let Err(e) = self.fetch_master().await {
            warn!(url = ?self.master_url, error = %e, "Failed to update master playlist");
        }
    }

    /// Re-read the media playlist. Returns `false` when it could not be
    /// fetched or parsed; the previous parse is kept in that case.
    pub async fn update_media_playlist(&mut self) -> bool {
        self.session.refresh_credentials().await;
        match self.fetch_media().await {
            Ok(()) => true,
            Err(e) => {
                self.patch = None;
                warn!(url = ?self.media_url, error = %e, "Failed to update media playlist");
                false
            }
        }
    }

    async fn fetch_master(&mut self) -> Result<()> {
        let Some(url) = self.master_url.clone() else {
            return Ok(());
        };
        let content = self.session.fetch_text(&url).await?;
        let master = manifest::parse_master(&content, &url)?;
        let variant = select_variant(&master.variants, self.rendition)?.clone();

        if self.master_base.is_none() {
            let candidate = patch::candidate(&url, &variant.uri)?;
            self.master_base = Some(candidate.base);
        }
        let base = self.master_base.as_deref().unwrap_or_default();
        let media_url = if variant.uri.starts_with("http://") || variant.uri.starts_with("https://") {
            variant.uri.clone()
        } else {
            format!("{base}{}", variant.uri)
        };

        if self.media_url.is_none() {
            info!(variant = %variant.line, "Selected rendition");
        }
        self.media_url = Some(media_url);
        self.master = Some(master);
        self.master_content = Some(content);
        Ok(())
    }

    async fn fetch_media(&mut self) -> Result<()> {
        let Some(url) = self.media_url.clone() else {
            return Err(RewindError::malformed("no media playlist URL resolved"));
        };
        let content = self.session.fetch_text(&url).await?;
        let media = manifest::parse_media(&content, &url)?;
        let first_path = media
            .first_file()
            .map(|f| f.path.clone())
            .unwrap_or_default();

        let patch_alive = match &self.patch {
            Some(patch) => {
                self.session
                    .probe(&patch.join(&first_path), self.probe_timeout)
                    .await
            }
            None => false,
        };
        if !patch_alive {
            if self.patch.is_some() {
                debug!("Patch URL no longer reaches the window, re-resolving");
            }
            self.patch = None;
            let patch = patch::resolve(
                &self.session,
                &url,
                self.master_url.as_deref(),
                &first_path,
                self.probe_timeout,
            )
            .await?;
            self.patch = Some(patch);
        }

        if self.announced_media_url.as_deref() != Some(url.as_str()) {
            info!(url = %url, "Media playlist URL updated");
            self.announced_media_url = Some(url);
        }
        self.media = Some(media);
        self.media_content = Some(content);
        Ok(())
    }

    pub fn state(&self) -> ResolverState {
        self.state
    }

    pub fn master_url(&self) -> Option<&str> {
        self.master_url.as_deref()
    }

    pub fn media_url(&self) -> Option<&str> {
        self.media_url.as_deref()
    }

    pub fn master(&self) -> Option<&MasterPlaylistInfo> {
        self.master.as_ref()
    }

    pub fn media(&self) -> Option<&MediaPlaylistInfo> {
        self.media.as_ref()
    }

    pub fn master_content(&self) -> Option<&str> {
        self.master_content.as_deref()
    }

    pub fn media_content(&self) -> Option<&str> {
        self.media_content.as_deref()
    }

    pub fn patch(&self) -> Option<&PatchUrl> {
        self.patch.as_ref()
    }

    pub fn session(&self) -> &HttpSession {
        &self.session
    }
}

/// Pick the variant at `index`. An index outside `0..len` falls back to the
/// last variant, which is not necessarily the best one.
pub fn select_variant(variants: &[Variant], index: i64) -> Result<&Variant> {
    let picked = usize::try_from(index)
        .ok()
        .and_then(|i| variants.get(i))
        .or_else(|| variants.last());
    picked.ok_or_else(|| RewindError::malformed("master playlist has no variants"))
}
