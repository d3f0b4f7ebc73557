use std::collections::HashMap;
use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::hash::HashDomain;

pub const ARCHIVE_TABLE_FILES: [&str; 2] = ["hashes.game.txt", "hashes.lcu.txt"];
pub const DOCUMENT_TABLE_FILES: [&str; 4] = [
    "hashes.binentries.txt",
    "hashes.binhashes.txt",
    "hashes.bintypes.txt",
    "hashes.binfields.txt",
];

#[derive(Debug, Error)]
pub enum HashTableError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("hash table directory not found: {0}")]
    MissingDir(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TableLoadStats {
    pub files: usize,
    pub entries: usize,
    pub skipped_lines: usize,
}

/// Reverse lookup tables for both hash domains.
///
/// Built once per run and passed explicitly to the stages that resolve
/// hashes back to names. A hash with no known name is not an error; callers
/// keep the hex form.
#[derive(Clone, Debug, Default)]
pub struct HashTables {
    archive: HashMap<u64, String>,
    document: HashMap<u32, String>,
}

impl HashTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every known table file present in `dir`. Absent files are skipped.
    pub fn load_dir(dir: &Path) -> Result<(Self, TableLoadStats), HashTableError> {
        if !dir.is_dir() {
            return Err(HashTableError::MissingDir(dir.display().to_string()));
        }
        let mut tables = Self::new();
        let mut stats = TableLoadStats::default();
        let groups = [
            (HashDomain::Archive, &ARCHIVE_TABLE_FILES[..]),
            (HashDomain::Document, &DOCUMENT_TABLE_FILES[..]),
        ];
        for (domain, names) in groups {
            for name in names {
                let path = dir.join(name);
                if !path.is_file() {
                    tracing::debug!(path = %path.display(), "hash table not present");
                    continue;
                }
                let text = fs::read_to_string(&path).map_err(|source| HashTableError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
                let (entries, skipped) = tables.load_text(domain, &text);
                stats.files += 1;
                stats.entries += entries;
                stats.skipped_lines += skipped;
            }
        }
        tracing::info!(
            files = stats.files,
            entries = stats.entries,
            skipped = stats.skipped_lines,
            "hash tables loaded"
        );
        Ok((tables, stats))
    }

    /// Parses `<hex> <name>` lines into `domain`. Returns (loaded, skipped).
    pub fn load_text(&mut self, domain: HashDomain, text: &str) -> (usize, usize) {
        let mut loaded = 0;
        let mut skipped = 0;
        for raw_line in text.lines() {
            let line = raw_line.trim_end_matches('\r');
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, name)) = line.split_once(' ') else {
                skipped += 1;
                continue;
            };
            let Some(hash) = domain.parse(key) else {
                skipped += 1;
                continue;
            };
            if name.is_empty() {
                skipped += 1;
                continue;
            }
            self.insert(domain, hash, name);
            loaded += 1;
        }
        (loaded, skipped)
    }

    pub fn insert(&mut self, domain: HashDomain, hash: u64, name: impl Into<String>) {
        match domain {
            HashDomain::Archive => {
                self.archive.insert(hash, name.into());
            }
            HashDomain::Document => {
                self.document.insert(hash as u32, name.into());
            }
        }
    }

    pub fn to_name(&self, domain: HashDomain, hash: u64) -> Option<&str> {
        match domain {
            HashDomain::Archive => self.archive.get(&hash).map(String::as_str),
            HashDomain::Document => self.document.get(&(hash as u32)).map(String::as_str),
        }
    }

    pub fn to_hash(domain: HashDomain, name: &str) -> u64 {
        domain.hash(name)
    }

    pub fn archive_name(&self, hash: u64) -> Option<&str> {
        self.to_name(HashDomain::Archive, hash)
    }

    pub fn document_name(&self, hash: u32) -> Option<&str> {
        self.to_name(HashDomain::Document, u64::from(hash))
    }

    /// Name for display: the known name, or the hash in hex.
    pub fn display_name(&self, domain: HashDomain, hash: u64) -> String {
        self.to_name(domain, hash)
            .map(str::to_string)
            .unwrap_or_else(|| domain.format(hash))
    }

    pub fn len(&self, domain: HashDomain) -> usize {
        match domain {
            HashDomain::Archive => self.archive.len(),
            HashDomain::Document => self.document.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.archive.is_empty() && self.document.is_empty()
    }
}
