use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, info};

use crate::RewindError;
use crate::proxy::ProxyConfig;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// Configurable options for the HTTP side of the recorder
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// Longest wait for the next chunk of a response; a silent origin fails after this
    pub read_timeout: Duration,

    /// Whether to follow redirects
    pub follow_redirects: bool,

    /// User agent string
    pub user_agent: String,

    /// Custom HTTP headers for requests
    pub headers: HeaderMap,

    /// Proxy configuration (optional)
    pub proxy: Option<ProxyConfig>,

    /// Whether to use system proxy settings if available
    pub use_system_proxy: bool,

    /// Maximum idle connections to keep per host
    pub pool_max_idle_per_host: usize,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            follow_redirects: true,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: DownloaderConfig::get_default_headers(),
            proxy: None,
            use_system_proxy: true,
            pool_max_idle_per_host: 10,
        }
    }
}

impl DownloaderConfig {
    pub fn builder() -> DownloaderConfigBuilder {
        DownloaderConfigBuilder::new()
    }

    /// Segment sizes are checked against `Content-Length`, so no
    /// `Accept-Encoding` is advertised.
    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));

        default_headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );

        default_headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.5,zh-CN;q=0.3,zh;q=0.2"),
        );
        default_headers
    }
}

/// Builder for [`DownloaderConfig`]
#[derive(Debug, Default)]
pub struct DownloaderConfigBuilder {
    config: DownloaderConfig,
}

impl DownloaderConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Add a header; invalid names or values are rejected with a configuration error.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self, RewindError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| RewindError::configuration(format!("invalid header name {name}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| RewindError::configuration(format!("invalid header value: {e}")))?;
        self.config.headers.insert(name, value);
        Ok(self)
    }

    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.config.proxy = Some(proxy);
        self
    }

    pub fn use_system_proxy(mut self, enabled: bool) -> Self {
        self.config.use_system_proxy = enabled;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    pub fn build(self) -> DownloaderConfig {
        self.config
    }
}

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Create a reqwest Client with the provided configuration
pub fn create_client(config: &DownloaderConfig) -> Result<Client, RewindError> {
    install_rustls_provider();

    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .user_agent(&config.user_agent)
        .default_headers(config.headers.clone())
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    if !config.read_timeout.is_zero() {
        client_builder = client_builder.read_timeout(config.read_timeout);
    }

    if let Some(proxy_config) = &config.proxy {
        let proxy = proxy_config.build()?;
        client_builder = client_builder.proxy(proxy);
        info!(proxy_url = %proxy_config.url, "Using explicitly configured proxy");
    } else if config.use_system_proxy {
        debug!("Using system proxy settings");
    } else {
        client_builder = client_builder.no_proxy();
        debug!("Proxy disabled");
    }

    client_builder.build().map_err(RewindError::from)
}

/// Tuning knobs for a single recording mission
#[derive(Debug, Clone)]
pub struct MissionConfig {
    /// Delay between two media playlist polls
    pub poll_interval: Duration,

    /// Polls in a row without a new segment before scheduling stops
    pub stagnation_limit: u32,

    /// Failed polls in a row before the stream is considered ended
    pub poll_failure_limit: u32,

    /// Simultaneous segment downloads and probes
    pub concurrency: usize,

    /// Attempts per segment while following the live window
    pub live_tries: u32,

    /// Attempts per segment while backfilling
    pub backfill_tries: u32,

    /// Fixed delay between two attempts on the same segment
    pub retry_delay: Duration,

    /// Timeout for a single segment request
    pub segment_timeout: Duration,

    /// Timeout for a whole master or media playlist request
    pub playlist_timeout: Duration,

    /// Timeout for a single liveness probe
    pub probe_timeout: Duration,

    /// Upper bound on a guess-search probe batch
    pub guess_async_limit: usize,

    /// How far below the first listed id the boundary search starts
    pub boundary_distance: u64,

    /// Decrypt segments when the playlist carries a key
    pub decrypt: bool,

    /// Recover elapsed segments before the first listed one
    pub full_download: bool,

    /// Hand the finished mission to the muxer
    pub merge: bool,

    /// Root directory for backups and merged files
    pub output_dir: PathBuf,

    /// Stream-copy muxer executable
    pub tool: PathBuf,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            stagnation_limit: 10,
            poll_failure_limit: 10,
            concurrency: 10,
            live_tries: 3,
            backfill_tries: 5,
            retry_delay: Duration::from_secs(3),
            segment_timeout: Duration::from_secs(10),
            playlist_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(10),
            guess_async_limit: 300,
            boundary_distance: 1_000_000,
            decrypt: true,
            full_download: false,
            merge: true,
            output_dir: PathBuf::from("output"),
            tool: PathBuf::from("ffmpeg"),
        }
    }
}
