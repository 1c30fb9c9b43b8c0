//! Segment naming pattern inference.
//!
//! Live origins usually name segments `prefix_<n>.ext`, sometimes with a query
//! that repeats the number. Two consecutive samples are enough to derive a
//! template that can address segments no longer listed in the window.

use std::fmt;

use crate::manifest::strip_query;
use crate::{Result, RewindError};

pub const PLACEHOLDER: &str = "{num}";

/// A segment path with the sequence number replaced by [`PLACEHOLDER`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentTemplate {
    template: String,
    fill: usize,
}

impl SegmentTemplate {
    pub fn new(template: impl Into<String>, fill: usize) -> Self {
        Self {
            template: template.into(),
            fill,
        }
    }

    pub fn fill(&self) -> usize {
        self.fill
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Substitute `number` (zero-filled to the inferred width) into the template.
    pub fn render(&self, number: u64) -> String {
        let value = format!("{number:0width$}", width = self.fill);
        self.template.replace(PLACEHOLDER, &value)
    }
}

impl fmt::Display for SegmentTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)
    }
}

/// Template plus the id spacing observed in the playlist window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatInfo {
    pub template: SegmentTemplate,
    pub space: u64,
}

struct Templated {
    path: String,
    fill: usize,
    number: u64,
}

/// Template a single path, ignoring its query string.
pub fn template_path(path: &str) -> Result<SegmentTemplate> {
    let templated = template_without_query(path)?;
    Ok(SegmentTemplate::new(templated.path, templated.fill))
}

/// Derive a template from two consecutive segment paths.
pub fn infer(first: &str, second: &str) -> Result<FormatInfo> {
    let a = template_without_query(first)?;
    let b = template_without_query(second)?;

    if a.path != b.path {
        return Err(RewindError::naming_pattern(format!(
            "segment names disagree: `{}` vs `{}`",
            a.path, b.path
        )));
    }
    if b.number <= a.number {
        return Err(RewindError::naming_pattern(format!(
            "sequence does not increase: {} then {}",
            a.number, b.number
        )));
    }

    let mut template = a.path;
    match (query_of(first), query_of(second)) {
        (Some(qa), Some(qb)) => {
            template.push('?');
            template.push_str(&diff_query(qa, qb)?);
        }
        (None, None) => {}
        _ => {
            return Err(RewindError::naming_pattern(
                "only one sample carries a query string",
            ));
        }
    }

    Ok(FormatInfo {
        template: SegmentTemplate::new(template, a.fill),
        space: b.number - a.number,
    })
}

/// Integer value of the last digit run in the segment file name.
pub fn sequence_number(path: &str) -> Option<u64> {
    let name = file_name(strip_query(path));
    let stem = name.rsplit_once('.').map_or(name, |(stem, _)| stem);
    let (start, end) = last_digit_run(stem)?;
    stem[start..end].parse().ok()
}

fn template_without_query(path: &str) -> Result<Templated> {
    let path = strip_query(path);
    let (dir, name) = match path.rsplit_once('/') {
        Some((dir, name)) => (Some(dir), name),
        None => (None, path),
    };
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) => (stem, Some(ext)),
        None => (name, None),
    };

    let (start, end) = last_digit_run(stem)
        .ok_or_else(|| RewindError::naming_pattern(format!("no digits in `{name}`")))?;
    let digits = &stem[start..end];
    let number = digits
        .parse()
        .map_err(|e| RewindError::naming_pattern(format!("`{digits}` is not a sequence: {e}")))?;
    let fill = if digits.len() > 1 && digits.starts_with('0') {
        digits.len()
    } else {
        0
    };

    let mut templated = String::with_capacity(path.len() + PLACEHOLDER.len());
    if let Some(dir) = dir {
        templated.push_str(dir);
        templated.push('/');
    }
    templated.push_str(&stem[..start]);
    templated.push_str(PLACEHOLDER);
    templated.push_str(&stem[end..]);
    if let Some(ext) = ext {
        templated.push('.');
        templated.push_str(ext);
    }

    Ok(Templated {
        path: templated,
        fill,
        number,
    })
}

/// Positional comparison of `&`-separated arguments. Both queries must carry
/// the same number of arguments in the same order.
fn diff_query(first: &str, second: &str) -> Result<String> {
    let a: Vec<&str> = first.split('&').collect();
    let b: Vec<&str> = second.split('&').collect();
    if a.len() != b.len() {
        return Err(RewindError::naming_pattern(format!(
            "query argument count differs: {} vs {}",
            a.len(),
            b.len()
        )));
    }

    let args: Vec<String> = a
        .iter()
        .zip(&b)
        .map(|(x, y)| {
            if x == y {
                x.to_string()
            } else {
                match x.split_once('=') {
                    Some((key, _)) => format!("{key}={PLACEHOLDER}"),
                    None => PLACEHOLDER.to_string(),
                }
            }
        })
        .collect();
    Ok(args.join("&"))
}

fn query_of(path: &str) -> Option<&str> {
    path.split_once('?').map(|(_, q)| q)
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Byte range of the right-most run of ASCII digits.
fn last_digit_run(s: &str) -> Option<(usize, usize)> {
    let bytes = s.as_bytes();
    let end = bytes.iter().rposition(u8::is_ascii_digit)? + 1;
    let start = bytes[..end]
        .iter()
        .rposition(|b| !b.is_ascii_digit())
        .map_or(0, |i| i + 1);
    Some((start, end))
}
