//! Destination name sanitizing
//!
//! Client file names are untrusted. A sanitized name is a single path segment:
//! no separators, no traversal, no control characters, no leading dot (hidden
//! names and the staging directory are reserved), and never empty.

use chrono::Utc;
use std::fmt;
use std::io;
use std::path::Path;
use uuid::Uuid;

/// Longest sanitized name in bytes, leaving room for a disambiguation suffix
/// under the usual 255-byte filesystem limit.
pub const MAX_NAME_BYTES: usize = 240;

/// Counter suffixes tried before falling back to a random token
const MAX_COUNTER: u32 = 1000;

/// Extensions longer than this are treated as part of the stem
const MAX_EXTENSION_BYTES: usize = 16;

/// A file name that is safe to join onto the storage root
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SanitizedName(String);

impl SanitizedName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for SanitizedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive a safe name from an untrusted one, without touching the filesystem.
///
/// Missing or unusable names get a generated placeholder.
pub fn sanitize(declared: Option<&str>) -> SanitizedName {
    let cleaned = declared.map(clean).unwrap_or_default();
    if cleaned.is_empty() {
        return SanitizedName(placeholder());
    }
    SanitizedName(truncate(cleaned))
}

/// Sanitize `declared` and make it unique under `root`
pub async fn resolve(root: &Path, declared: Option<&str>) -> io::Result<SanitizedName> {
    let name = sanitize(declared);
    if !tokio::fs::try_exists(root.join(name.as_str())).await? {
        return Ok(name);
    }
    disambiguate(root, &name).await
}

/// Find a free variant of `name` under `root`: `stem-1.ext`, `stem-2.ext`, ...
/// then `stem-<random>.ext`.
pub async fn disambiguate(root: &Path, name: &SanitizedName) -> io::Result<SanitizedName> {
    for counter in 1..=MAX_COUNTER {
        let candidate = with_suffix(name.as_str(), &counter.to_string());
        if !tokio::fs::try_exists(root.join(&candidate)).await? {
            return Ok(SanitizedName(candidate));
        }
    }

    Ok(with_random_suffix(name))
}

/// `stem-<random>.ext`, without consulting the filesystem
pub fn with_random_suffix(name: &SanitizedName) -> SanitizedName {
    SanitizedName(with_suffix(name.as_str(), &random_token()))
}

/// Keep the last path segment and strip what makes a segment unsafe
fn clean(raw: &str) -> String {
    let segment = raw.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or_default();
    let visible: String = segment.chars().filter(|c| !c.is_control()).collect();

    visible
        .trim_start_matches(|c: char| c == '.' || c.is_whitespace())
        .trim_end_matches(|c: char| c == '.' || c.is_whitespace())
        .to_string()
}

fn placeholder() -> String {
    format!(
        "upload-{}-{}",
        Utc::now().format("%Y%m%dT%H%M%S"),
        random_token()
    )
}

/// Eight hex digits
fn random_token() -> String {
    let mut token = Uuid::new_v4().simple().to_string();
    token.truncate(8);
    token
}

/// Split `name` into stem and extension. Dotfiles have no extension.
fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < name.len() => {
            let ext = &name[idx + 1..];
            if ext.len() <= MAX_EXTENSION_BYTES {
                (&name[..idx], Some(ext))
            } else {
                (name, None)
            }
        }
        _ => (name, None),
    }
}

fn with_suffix(name: &str, suffix: &str) -> String {
    match split_extension(name) {
        (stem, Some(ext)) => format!("{}-{}.{}", stem, suffix, ext),
        (stem, None) => format!("{}-{}", stem, suffix),
    }
}

fn truncate(name: String) -> String {
    if name.len() <= MAX_NAME_BYTES {
        return name;
    }

    let (stem, ext) = split_extension(&name);
    let budget = MAX_NAME_BYTES - ext.map(|e| e.len() + 1).unwrap_or(0);
    let stem = prefix_within(stem, budget);
    match ext {
        Some(ext) => format!("{}.{}", stem, ext),
        None => stem.to_string(),
    }
}

/// Longest prefix of `s` that fits in `max` bytes on a char boundary
fn prefix_within(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
