//! Cookie sources attached to every request of a mission.

use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use crate::Result;

/// Supplies cookies (and optionally a Referer) for outgoing requests.
///
/// A rotating source is backed by a live browser session whose cookies expire
/// while a stream is being recorded; `refresh` re-extracts them.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Value for the `Cookie` header, if any cookies are known.
    fn cookie_header(&self) -> Option<String>;

    /// Re-extract the current cookies.
    async fn refresh(&self) -> Result<()> {
        Ok(())
    }

    /// Page URL of the underlying session, used as Referer when present.
    fn current_url(&self) -> Option<String> {
        None
    }

    fn is_rotating(&self) -> bool {
        false
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoCredentials;

impl CredentialSource for NoCredentials {
    fn cookie_header(&self) -> Option<String> {
        None
    }
}

/// A fixed cookie jar loaded once.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StaticCredentials {
    cookies: Vec<(String, String)>,
}

impl StaticCredentials {
    /// Parse a `name=value; other=value` header string.
    pub fn parse(header: &str) -> Self {
        let cookies = header
            .split(';')
            .filter_map(|pair| {
                let (name, value) = pair.trim().split_once('=')?;
                let name = name.trim();
                (!name.is_empty()).then(|| (name.to_string(), value.trim().to_string()))
            })
            .collect();
        Self { cookies }
    }

    /// Parse a Netscape `cookies.txt` export. Comment lines are skipped, except
    /// for the `#HttpOnly_` prefix browsers emit for http-only cookies.
    pub fn from_netscape(content: &str) -> Self {
        let cookies = content
            .lines()
            .filter_map(|line| {
                let line = line.strip_prefix("#HttpOnly_").unwrap_or(line);
                if line.trim().is_empty() || line.starts_with('#') {
                    return None;
                }
                let fields: Vec<&str> = line.split('\t').collect();
                if fields.len() < 7 {
                    return None;
                }
                Some((fields[5].to_string(), fields[6].trim_end().to_string()))
            })
            .collect();
        Self { cookies }
    }

    /// Load cookies from `source`: a path to a cookie file when it exists,
    /// otherwise the string itself is treated as a cookie header.
    pub async fn load(source: &str) -> Result<Self> {
        let path = Path::new(source);
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            let content = tokio::fs::read_to_string(path).await?;
            let credentials = if content.contains('\t') {
                Self::from_netscape(&content)
            } else {
                Self::parse(content.trim())
            };
            debug!(
                path = %path.display(),
                count = credentials.len(),
                "Loaded cookies from file"
            );
            return Ok(credentials);
        }
        Ok(Self::parse(source))
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }
}

impl CredentialSource for StaticCredentials {
    fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}
