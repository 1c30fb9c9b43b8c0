//! Line-oriented parsing of master and media playlists.
//!
//! The parser is deliberately lenient: unknown tags are skipped and malformed
//! numeric values fall back to defaults. Only a playlist that lacks every
//! structural tag (no variants for a master, no `#EXTINF` for a media
//! playlist) is rejected.

use serde::Serialize;

use crate::{Result, RewindError};

const TAG_MEDIA: &str = "#EXT-X-MEDIA:";
const TAG_STREAM_INF: &str = "#EXT-X-STREAM-INF";
const TAG_VERSION: &str = "#EXT-X-VERSION";
const TAG_EXTINF: &str = "#EXTINF";
const TAG_PROGRAM_DATE_TIME: &str = "#EXT-X-PROGRAM-DATE-TIME";
const TAG_TARGET_DURATION: &str = "#EXT-X-TARGETDURATION";
const TAG_MEDIA_SEQUENCE: &str = "#EXT-X-MEDIA-SEQUENCE";
const TAG_PLAYLIST_TYPE: &str = "#EXT-X-PLAYLIST-TYPE";
const TAG_KEY: &str = "#EXT-X-KEY";
const TAG_MAP: &str = "#EXT-X-MAP";

/// What a fetched manifest turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistKind {
    Master,
    Media,
}

/// A rendition advertised by a master playlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Variant {
    /// `GROUP-ID` for `EXT-X-MEDIA`, `BANDWIDTH` for `EXT-X-STREAM-INF`.
    pub quality: String,
    /// `TYPE` for `EXT-X-MEDIA`, always `STREAM` for `EXT-X-STREAM-INF`.
    pub kind: String,
    pub uri: String,
    /// The raw tag line the variant was parsed from.
    pub line: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MasterPlaylistInfo {
    pub name: String,
    pub url: String,
    pub version: u32,
    /// Variants indexed densely from 0, best numeric quality first.
    pub variants: Vec<Variant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlayType {
    Live,
    Vod,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaFile {
    /// Position in the manifest, starting at 1.
    pub order: u64,
    pub duration: f64,
    pub path: String,
    pub program_date_time: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MediaPlaylistInfo {
    pub name: String,
    pub url: String,
    pub play_type: PlayType,
    pub target_duration: u64,
    pub version: u32,
    pub media_sequence: u64,
    pub key_uri: Option<String>,
    pub iv: Option<String>,
    pub map_uri: Option<String>,
    pub media_ext: String,
    pub files: Vec<MediaFile>,
}

impl MediaPlaylistInfo {
    pub fn first_file(&self) -> Option<&MediaFile> {
        self.files.first()
    }

    pub fn last_file(&self) -> Option<&MediaFile> {
        self.files.last()
    }
}

/// Decide whether `content` is a master or a media playlist.
pub fn classify(content: &str, url: &str) -> Result<PlaylistKind> {
    if content.contains(".m3u8") {
        Ok(PlaylistKind::Master)
    } else if content.contains("EXTINF") {
        Ok(PlaylistKind::Media)
    } else {
        Err(RewindError::Classification {
            url: url.to_string(),
        })
    }
}

pub fn parse_master(content: &str, url: &str) -> Result<MasterPlaylistInfo> {
    let lines: Vec<&str> = content.lines().map(str::trim).collect();
    let mut version = 0;
    let mut entries = Vec::new();

    for (n, line) in lines.iter().enumerate() {
        if let Some(attrs) = line.strip_prefix(TAG_MEDIA) {
            let attrs = parse_attributes(attrs);
            entries.push(Variant {
                quality: attribute(&attrs, "GROUP-ID").unwrap_or_default(),
                kind: attribute(&attrs, "TYPE").unwrap_or_default(),
                uri: attribute(&attrs, "URI").unwrap_or_default(),
                line: line.to_string(),
            });
        } else if line.starts_with(TAG_STREAM_INF) {
            let attrs = parse_attributes(tag_value(line).unwrap_or_default());
            let quality = attribute(&attrs, "BANDWIDTH")
                .filter(|b| is_numeric(b))
                .unwrap_or_else(|| "0".to_string());
            entries.push(Variant {
                quality,
                kind: "STREAM".to_string(),
                uri: lines.get(n + 1).map(|l| l.to_string()).unwrap_or_default(),
                line: line.to_string(),
            });
        } else if line.starts_with(TAG_VERSION) {
            if let Some(v) = tag_value(line).and_then(|v| v.parse().ok()) {
                version = v;
            }
        }
    }

    if entries.is_empty() {
        return Err(RewindError::malformed(format!(
            "master playlist {url} advertises no variants"
        )));
    }

    let (mut numeric, other): (Vec<_>, Vec<_>) =
        entries.into_iter().partition(|v| is_numeric(&v.quality));
    numeric.sort_by(|a, b| {
        let qa = a.quality.parse::<u128>().unwrap_or(0);
        let qb = b.quality.parse::<u128>().unwrap_or(0);
        (&b.kind, qb).cmp(&(&a.kind, qa))
    });
    numeric.extend(other);

    Ok(MasterPlaylistInfo {
        name: resource_name(url),
        url: url.to_string(),
        version,
        variants: numeric,
    })
}

pub fn parse_media(content: &str, url: &str) -> Result<MediaPlaylistInfo> {
    let lines: Vec<&str> = content.lines().map(str::trim).collect();
    let mut info = MediaPlaylistInfo {
        name: resource_name(url),
        url: url.to_string(),
        play_type: PlayType::Live,
        target_duration: 0,
        version: 0,
        media_sequence: 0,
        key_uri: None,
        iv: None,
        map_uri: None,
        media_ext: String::new(),
        files: Vec::new(),
    };
    let mut order = 0;

    for (n, line) in lines.iter().enumerate() {
        if !line.starts_with('#') {
            continue;
        }
        if line.starts_with(TAG_EXTINF) {
            let duration = tag_value(line)
                .and_then(|v| v.split(',').next())
                .and_then(|d| d.trim().parse::<f64>().ok())
                .unwrap_or(0.0);
            let program_date_time = n
                .checked_sub(1)
                .and_then(|p| lines[p].strip_prefix(TAG_PROGRAM_DATE_TIME))
                .map(|v| v.trim_start_matches(':').to_string());
            order += 1;
            info.files.push(MediaFile {
                order,
                duration,
                path: lines.get(n + 1).map(|l| l.to_string()).unwrap_or_default(),
                program_date_time,
            });
        } else if line.starts_with(TAG_TARGET_DURATION) {
            if let Some(v) = tag_value(line).and_then(|v| v.parse().ok()) {
                info.target_duration = v;
            }
        } else if line.starts_with(TAG_VERSION) {
            if let Some(v) = tag_value(line).and_then(|v| v.parse().ok()) {
                info.version = v;
            }
        } else if line.starts_with(TAG_MEDIA_SEQUENCE) {
            if let Some(v) = tag_value(line).and_then(|v| v.parse().ok()) {
                info.media_sequence = v;
            }
        } else if line.starts_with(TAG_PLAYLIST_TYPE) {
            info.play_type = PlayType::Vod;
        } else if line.starts_with(TAG_KEY) {
            if let Some(uri) = quoted_uri(line) {
                info.key_uri = Some(uri);
            }
            if let Some((_, rest)) = line.split_once("IV=0x") {
                let iv = rest.split(',').next().unwrap_or_default();
                info.iv = Some(iv.to_string());
            }
        } else if line.starts_with(TAG_MAP) {
            info.map_uri = quoted_uri(line);
        }
    }

    let Some(last) = info.files.last() else {
        return Err(RewindError::malformed(format!(
            "media playlist {url} lists no segments"
        )));
    };
    info.media_ext = extension(&last.path);
    Ok(info)
}

/// Last path component of `url`, query string removed.
pub fn resource_name(url: &str) -> String {
    strip_query(url)
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

pub fn strip_query(path: &str) -> &str {
    path.split('?').next().unwrap_or(path)
}

/// Extension after the last dot of the query-less path.
pub fn extension(path: &str) -> String {
    let name = resource_name(path);
    match name.rsplit_once('.') {
        Some((_, ext)) => ext.to_string(),
        None => String::new(),
    }
}

fn tag_value(line: &str) -> Option<&str> {
    line.split_once(':').map(|(_, value)| value.trim())
}

fn quoted_uri(line: &str) -> Option<String> {
    let (_, rest) = line.split_once("URI=\"")?;
    rest.split('"').next().map(str::to_string)
}

fn is_numeric(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

/// Split an attribute list on commas that are not inside quotes.
fn parse_attributes(list: &str) -> Vec<(String, String)> {
    let mut attrs = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    let bytes = list.as_bytes();
    for i in 0..=bytes.len() {
        let at_end = i == bytes.len();
        if !at_end && bytes[i] == b'"' {
            in_quotes = !in_quotes;
        }
        if at_end || (bytes[i] == b',' && !in_quotes) {
            let pair = &list[start..i];
            if let Some((key, value)) = pair.split_once('=') {
                attrs.push((
                    key.trim().to_string(),
                    value.trim().trim_matches('"').to_string(),
                ));
            }
            start = i + 1;
        }
    }
    attrs
}

fn attribute(attrs: &[(String, String)], key: &str) -> Option<String> {
    attrs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.clone())
}
