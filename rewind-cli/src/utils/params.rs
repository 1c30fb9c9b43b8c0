use std::collections::HashSet;

use crate::error::AppError;
use tracing::{debug, error, warn};

/// Parses `key=value` (or `Key: value`) header arguments into pairs.
///
/// The split happens at the first separator, so values may contain `=` or `:`.
///
/// # Errors
///
/// Returns `AppError::InvalidInput` for an argument without a separator or
/// with an empty key.
pub fn parse_headers(params: &[String]) -> Result<Vec<(String, String)>, AppError> {
    params
        .iter()
        .map(|param| {
            let split = match (param.find('='), param.find(':')) {
                (Some(eq), Some(colon)) => Some(eq.min(colon)),
                (eq, colon) => eq.or(colon),
            };
            let Some(at) = split else {
                error!("Invalid header format: {param}");
                return Err(AppError::InvalidInput(format!(
                    "invalid header format: {param}"
                )));
            };
            let key = param[..at].trim();
            let value = param[at + 1..].trim();
            if key.is_empty() {
                return Err(AppError::InvalidInput(format!("empty header name: {param}")));
            }
            debug!("Added header: {key}={value}");
            Ok((key.to_string(), value.to_string()))
        })
        .collect()
}

/// Mission title for the `index`-th of `total` URLs.
///
/// An explicit title is used as-is for a single URL and gets a numeric suffix
/// otherwise. Without one, the manifest file stem is used.
pub fn title_for(url: &str, explicit: Option<&str>, index: usize, total: usize) -> String {
    match explicit {
        Some(title) if total > 1 => format!("{title}_{}", index + 1),
        Some(title) => title.to_string(),
        None => {
            let path = url.split(['?', '#']).next().unwrap_or(url);
            let name = path.rsplit('/').next().unwrap_or(path);
            let stem = name.rsplit_once('.').map_or(name, |(stem, _)| stem);
            if stem.is_empty() {
                format!("mission_{}", index + 1)
            } else {
                stem.to_string()
            }
        }
    }
}

/// One title per URL, unique within the run so missions never share a backup folder.
///
/// A repeated title gets the first free `_<n>` suffix, starting at 2.
pub fn unique_titles(urls: &[String], explicit: Option<&str>) -> Vec<String> {
    let total = urls.len();
    let mut taken = HashSet::new();
    urls.iter()
        .enumerate()
        .map(|(index, url)| {
            let base = title_for(url, explicit, index, total);
            let mut title = base.clone();
            let mut n = 2;
            while !taken.insert(title.clone()) {
                title = format!("{base}_{n}");
                n += 1;
            }
            if title != base {
                warn!(url = %url, title = %title, "Title already in use, renamed");
            }
            title
        })
        .collect()
}
