use reqwest::StatusCode;

pub type Result<T, E = RewindError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum RewindError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("proxy configuration error: {reason}")]
    ProxyConfiguration { reason: String },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} during {operation} for {url}")]
    HttpStatus {
        status: StatusCode,
        url: String,
        operation: &'static str,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("manifest is neither a master nor a media playlist: {url}")]
    Classification { url: String },

    #[error("malformed manifest: {reason}")]
    ManifestMalformed { reason: String },

    #[error("no base URL reaches segment `{segment}`")]
    PatchResolution { segment: String },

    #[error("segment naming pattern error: {reason}")]
    NamingPattern { reason: String },

    #[error("no valid sequence found between {lo} and {hi}")]
    BoundaryNotFound { lo: u64, hi: u64 },

    #[error("segment download failed for {url}: {reason}")]
    SegmentDownload { url: String, reason: String },

    #[error("decryption error: {reason}")]
    Decryption { reason: String },

    #[error("invalid IV `{iv}`: {reason}")]
    IvFormat { iv: String, reason: String },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("merge failed: {reason}")]
    Merge { reason: String },

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl RewindError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn proxy_configuration(reason: impl Into<String>) -> Self {
        Self::ProxyConfiguration {
            reason: reason.into(),
        }
    }

    pub fn http_status(
        status: StatusCode,
        url: impl Into<String>,
        operation: &'static str,
    ) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
            operation,
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::ManifestMalformed {
            reason: reason.into(),
        }
    }

    pub fn naming_pattern(reason: impl Into<String>) -> Self {
        Self::NamingPattern {
            reason: reason.into(),
        }
    }

    pub fn segment_download(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SegmentDownload {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn decryption(reason: impl Into<String>) -> Self {
        Self::Decryption {
            reason: reason.into(),
        }
    }

    pub fn merge(reason: impl Into<String>) -> Self {
        Self::Merge {
            reason: reason.into(),
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Cancelled => false,
            Self::InvalidUrl { .. }
            | Self::ProxyConfiguration { .. }
            | Self::Classification { .. }
            | Self::ManifestMalformed { .. }
            | Self::NamingPattern { .. }
            | Self::BoundaryNotFound { .. }
            | Self::IvFormat { .. }
            | Self::Configuration { .. } => false,
            Self::HttpStatus { .. } => true,
            Self::Network { .. }
            | Self::Io { .. }
            | Self::PatchResolution { .. }
            | Self::SegmentDownload { .. }
            | Self::Decryption { .. }
            | Self::Merge { .. }
            | Self::Internal { .. } => true,
        }
    }

    /// Errors that abort a mission during initialisation. Everything else is
    /// isolated to the segment, probe or stage that produced it.
    pub fn is_mission_fatal(&self) -> bool {
        matches!(
            self,
            Self::Classification { .. }
                | Self::PatchResolution { .. }
                | Self::InvalidUrl { .. }
                | Self::ProxyConfiguration { .. }
                | Self::Configuration { .. }
        )
    }
}
