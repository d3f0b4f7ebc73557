use std::fmt;

use compat_league::hash::{self, HashDomain};
use serde::{Serialize, Serializer};

pub use compat_league::wad_pack::{is_voice_over, VOICE_OVER_MARKER};

/// Root-segment literals that mark a document string as an asset path.
pub const ASSET_MARKERS: [&str; 2] = ["assets/", "data/"];

/// Join key between document strings and files on disk: one archive-domain
/// hash in 16 lowercase hex characters.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CanonicalKey(String);

impl CanonicalKey {
    pub fn from_hash(path_hash: u64) -> Self {
        Self(HashDomain::Archive.format(path_hash))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn path_hash(&self) -> u64 {
        HashDomain::Archive.parse(&self.0).unwrap_or_default()
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for CanonicalKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Forward slashes, lower case.
pub fn normalize_path(raw: &str) -> String {
    raw.replace('\\', "/").to_lowercase()
}

pub fn unify_path(raw: &str) -> CanonicalKey {
    let normalized = normalize_path(raw);
    if hash::is_path_hash(&normalized) {
        return CanonicalKey(normalized);
    }
    let stem = normalized.split('.').next().unwrap_or(&normalized);
    if hash::is_path_hash(stem) {
        return CanonicalKey(stem.to_string());
    }
    CanonicalKey::from_hash(hash::path_hash(&normalized))
}

/// True for document strings the scanner and auditor track.
pub fn is_asset_reference(value: &str) -> bool {
    let lower = normalize_path(value);
    ASSET_MARKERS.iter().any(|marker| lower.contains(marker)) && !is_voice_over(&lower)
}

fn first_separator(path: &str) -> Option<(usize, char)> {
    path.char_indices().find(|&(_, c)| c == '/' || c == '\\')
}

/// Inserts `<segment>` after the first path segment, reusing its separator,
/// or prefixes `<segment>/` when `path` has none. Casing is preserved.
pub fn relocate_path(path: &str, segment: &str) -> String {
    match first_separator(path) {
        Some((index, sep)) => format!("{}{}{}{}", &path[..index], sep, segment, &path[index..]),
        None => format!("{}/{}", segment, path),
    }
}

/// Undoes [`relocate_path`] when `path` carries `segment` in either position.
pub fn strip_relocation(path: &str, segment: &str) -> Option<String> {
    for sep in ['/', '\\'] {
        if let Some(rest) = path.strip_prefix(segment).and_then(|rest| rest.strip_prefix(sep)) {
            return Some(rest.to_string());
        }
    }
    let (index, sep) = first_separator(path)?;
    let rest = path[index + 1..]
        .strip_prefix(segment)
        .and_then(|rest| rest.strip_prefix(sep))?;
    Some(format!("{}{}", &path[..=index], rest))
}
