use std::path::PathBuf;

use clap::Parser;
use rewind_engine::ProxyType;

/// Record live HLS streams, including the part that already left the playlist.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Master or media playlist URLs; one mission per URL
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// Mission title; numbered when several URLs are given
    #[arg(short, long)]
    pub title: Option<String>,

    /// Rendition index in the sorted master playlist (negative counts from the end)
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub quality: i64,

    /// Output directory for backups and merged files
    #[arg(short, long, default_value = "output")]
    pub output: PathBuf,

    /// Cookie file (Netscape or header format) or a literal cookie string
    #[arg(long)]
    pub cookies: Option<String>,

    /// Stream-copy muxer executable
    #[arg(long, default_value = "ffmpeg")]
    pub tool: PathBuf,

    /// Decrypt AES-128 segments into a side folder
    #[arg(long)]
    pub decrypt: bool,

    /// Recover segments published before the current playlist window
    #[arg(long)]
    pub full_download: bool,

    /// Missions recorded at the same time
    #[arg(long, default_value_t = 3)]
    pub threads: usize,

    /// Simultaneous segment downloads per mission
    #[arg(long, default_value_t = 10)]
    pub concurrency: usize,

    /// Referer sent with every request
    #[arg(long)]
    pub referer: Option<String>,

    /// User agent sent with every request
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Proxy URL (http://, https:// or socks5://)
    #[arg(long)]
    pub proxy: Option<String>,

    /// Proxy type; guessed from the proxy URL when omitted
    #[arg(long, value_enum, requires = "proxy")]
    pub proxy_type: Option<ProxyType>,

    /// Proxy username
    #[arg(long, requires = "proxy")]
    pub proxy_username: Option<String>,

    /// Proxy password
    #[arg(long, requires = "proxy_username")]
    pub proxy_password: Option<String>,

    /// Extra request header as `Name=value`; repeatable
    #[arg(short = 'H', long = "header")]
    pub headers: Vec<String>,

    /// Keep the segments without muxing them into one file
    #[arg(long)]
    pub no_merge: bool,

    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Errors only
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}
