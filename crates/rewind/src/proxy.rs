//! Outbound proxy settings for the recorder's HTTP client.

use reqwest::Proxy;

use crate::RewindError;

#[derive(Debug, Clone, PartialEq, Eq, Copy)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum ProxyType {
    Http,
    Https,
    /// Remote DNS through `socks5h`
    Socks5,
}

impl ProxyType {
    fn scheme(self) -> &'static str {
        match self {
            ProxyType::Http => "http",
            ProxyType::Https => "https",
            ProxyType::Socks5 => "socks5h",
        }
    }
}

/// Basic credentials sent to the proxy
#[derive(Debug, Clone)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// `host:port`, with or without a scheme
    pub url: String,
    pub proxy_type: ProxyType,
    pub auth: Option<ProxyAuth>,
}

impl ProxyConfig {
    /// Guess the proxy type from the URL scheme; bare `host:port` is treated as HTTP.
    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        let proxy_type = match url.split_once("://").map(|(scheme, _)| scheme) {
            Some("socks5" | "socks5h") => ProxyType::Socks5,
            Some("https") => ProxyType::Https,
            _ => ProxyType::Http,
        };
        Self {
            url,
            proxy_type,
            auth: None,
        }
    }

    /// Proxy URL with the scheme implied by `proxy_type`. An explicit scheme wins.
    fn normalized_url(&self) -> String {
        if self.url.contains("://") {
            self.url.clone()
        } else {
            format!("{}://{}", self.proxy_type.scheme(), self.url)
        }
    }

    /// Build the reqwest proxy. All traffic goes through it, whatever the target scheme.
    pub fn build(&self) -> Result<Proxy, RewindError> {
        let url = self.normalized_url();
        let proxy = Proxy::all(&url).map_err(|e| {
            RewindError::proxy_configuration(format!("invalid {:?} proxy {url}: {e}", self.proxy_type))
        })?;
        Ok(match &self.auth {
            Some(auth) => proxy.basic_auth(&auth.username, &auth.password),
            None => proxy,
        })
    }
}
