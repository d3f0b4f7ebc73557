use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;

use crate::hash::HashDomain;
use crate::hashtable::HashTables;
use crate::wad::{self, WadChunk, WadError, WadToc};

/// Side-channel map (hex hash -> original name) for chunks written under
/// their hash instead of their resolved name.
pub const HASHED_FILES_NAME: &str = "hashed_files.json";
pub const MAX_BASENAME_LEN: usize = 255;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ExtractReport {
    pub extracted: usize,
    pub failed: usize,
    /// Chunks whose name resolved but had to be written under the hash.
    pub hashed: usize,
    /// Chunks with no known name.
    pub unresolved: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExtractTarget {
    Named(PathBuf),
    Hashed { path: PathBuf, original: String },
}

impl ExtractTarget {
    pub fn path(&self) -> &Path {
        match self {
            ExtractTarget::Named(path) => path,
            ExtractTarget::Hashed { path, .. } => path,
        }
    }
}

pub fn hashed_file_name(path_hash: u64, extension: Option<&str>) -> String {
    let hex = HashDomain::Archive.format(path_hash);
    match extension {
        Some(ext) if !ext.is_empty() => format!("{}.{}", hex, ext),
        _ => hex,
    }
}

/// Picks where a resolved chunk name lands under `out_dir`.
///
/// Falls back to the hash at the root when the base name is longer than
/// [`MAX_BASENAME_LEN`], when the name is not a safe relative path, or when
/// the target already exists as a directory.
pub fn extraction_target(
    out_dir: &Path,
    name: &str,
    path_hash: u64,
    extension: Option<&str>,
) -> ExtractTarget {
    let normalized = name.replace('\\', "/");
    let hashed = || ExtractTarget::Hashed {
        path: out_dir.join(hashed_file_name(path_hash, extension)),
        original: normalized.clone(),
    };
    let basename = normalized.rsplit('/').next().unwrap_or(&normalized);
    if basename.len() > MAX_BASENAME_LEN {
        return hashed();
    }
    let Some(target) = safe_join(out_dir, &normalized) else {
        return hashed();
    };
    if target.is_dir() {
        return hashed();
    }
    ExtractTarget::Named(target)
}

pub fn extract_wad(
    archive: &Path,
    out_dir: &Path,
    tables: &HashTables,
) -> Result<ExtractReport, WadError> {
    let mut reader = BufReader::new(File::open(archive)?);
    let toc = wad::read_toc(&mut reader)?;
    fs::create_dir_all(out_dir)?;

    let mut report = ExtractReport::default();
    let mut hashed_names = load_hashed_names(out_dir);
    for chunk in toc.chunks() {
        match extract_chunk(&toc, &mut reader, chunk, out_dir, tables) {
            Ok(outcome) => {
                report.extracted += 1;
                match outcome {
                    ChunkOutcome::Named => {}
                    ChunkOutcome::Unresolved => report.unresolved += 1,
                    ChunkOutcome::Hashed(original) => {
                        report.hashed += 1;
                        hashed_names.insert(chunk.hash_hex(), original);
                    }
                }
            }
            Err(err) => {
                report.failed += 1;
                tracing::warn!(chunk = %chunk.hash_hex(), error = %err, "chunk extraction failed");
            }
        }
    }

    if !hashed_names.is_empty() {
        let text = serde_json::to_string_pretty(&hashed_names)?;
        fs::write(out_dir.join(HASHED_FILES_NAME), text)?;
    }
    tracing::info!(
        archive = %archive.display(),
        extracted = report.extracted,
        failed = report.failed,
        hashed = report.hashed,
        unresolved = report.unresolved,
        "wad extracted"
    );
    Ok(report)
}

/// Reads an existing side-channel map, or an empty one.
pub fn load_hashed_names(dir: &Path) -> BTreeMap<String, String> {
    fs::read_to_string(dir.join(HASHED_FILES_NAME))
        .ok()
        .and_then(|text| serde_json::from_str(&text).ok())
        .unwrap_or_default()
}

enum ChunkOutcome {
    Named,
    Unresolved,
    Hashed(String),
}

fn extract_chunk(
    toc: &WadToc,
    reader: &mut BufReader<File>,
    chunk: &WadChunk,
    out_dir: &Path,
    tables: &HashTables,
) -> Result<ChunkOutcome, WadError> {
    let data = toc.read_chunk(reader, chunk)?;
    let extension = wad::guess_extension(&data);

    let Some(name) = tables.archive_name(chunk.path_hash) else {
        let path = out_dir.join(hashed_file_name(chunk.path_hash, extension));
        fs::write(&path, &data)?;
        return Ok(ChunkOutcome::Unresolved);
    };

    let target = extraction_target(out_dir, name, chunk.path_hash, extension);
    if let ExtractTarget::Named(path) = &target {
        let parent_ready = path
            .parent()
            .map(|parent| fs::create_dir_all(parent).is_ok())
            .unwrap_or(true);
        if parent_ready && fs::write(path, &data).is_ok() {
            return Ok(ChunkOutcome::Named);
        }
        tracing::debug!(name, "named target unusable, falling back to hash");
    }

    let path = out_dir.join(hashed_file_name(chunk.path_hash, extension));
    fs::write(&path, &data)?;
    Ok(ChunkOutcome::Hashed(name.replace('\\', "/")))
}

fn safe_join(base: &Path, entry: &str) -> Option<PathBuf> {
    let rel = Path::new(entry);
    let mut safe = PathBuf::from(base);
    for component in rel.components() {
        match component {
            Component::Normal(part) => safe.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if safe.as_path() == base || safe.file_name() == Some(OsStr::new("")) {
        return None;
    }
    Some(safe)
}
