use std::collections::HashSet;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use serde::Serialize;
use walkdir::WalkDir;

use crate::hash::{path_hash, HashDomain};
use crate::wad::{self, WadError, WadWriter};
use crate::wad_extract::HASHED_FILES_NAME;

/// Voice-over banks are always addressed by their literal path.
pub const VOICE_OVER_MARKER: &str = "sounds/wwise2016/vo/";

pub fn is_voice_over(path: &str) -> bool {
    path.replace('\\', "/")
        .to_ascii_lowercase()
        .contains(VOICE_OVER_MARKER)
}

/// How a packed file is addressed inside the archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChunkIdentity {
    /// A hash-named file at the root of the input tree.
    Hash(u64),
    /// Any other file, hashed from its relative path.
    Path(String),
}

impl ChunkIdentity {
    pub fn path_hash(&self) -> u64 {
        match self {
            ChunkIdentity::Hash(hash) => *hash,
            ChunkIdentity::Path(path) => path_hash(path),
        }
    }
}

/// `rel` is relative to the packed directory, `/` separated.
pub fn classify_pack_path(rel: &str) -> ChunkIdentity {
    let rel = rel.replace('\\', "/");
    if is_voice_over(&rel) {
        return ChunkIdentity::Path(rel);
    }
    if !rel.contains('/') {
        let stem = rel.split('.').next().unwrap_or(&rel);
        if let Some(hash) = HashDomain::Archive.parse(&stem.to_ascii_lowercase()) {
            return ChunkIdentity::Hash(hash);
        }
    }
    ChunkIdentity::Path(rel)
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PackReport {
    pub chunks: usize,
    /// Chunks whose payload reuses an earlier chunk's stored bytes.
    pub shared: usize,
    pub stored_bytes: u64,
    /// Relative paths dropped because an earlier file had the same hash.
    pub collisions: Vec<String>,
}

pub fn pack_dir(input_dir: &Path, archive: &Path) -> Result<PackReport, WadError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(input_dir).sort_by_file_name() {
        let entry = entry.map_err(|err| {
            WadError::Io(
                err.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory walk failed")),
            )
        })?;
        if !entry.file_type().is_file() || entry.file_name() == HASHED_FILES_NAME {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(input_dir) else {
            continue;
        };
        let rel = rel.to_string_lossy().replace('\\', "/");
        files.push((entry.path().to_path_buf(), rel));
    }

    let mut report = PackReport::default();
    let mut seen = HashSet::new();
    let mut planned = Vec::with_capacity(files.len());
    for (path, rel) in files {
        let hash = classify_pack_path(&rel).path_hash();
        if !seen.insert(hash) {
            tracing::warn!(path = %rel, hash = %HashDomain::Archive.format(hash), "duplicate chunk hash, keeping first");
            report.collisions.push(rel);
            continue;
        }
        planned.push((path, rel, hash));
    }

    if let Some(parent) = archive.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file = BufWriter::new(File::create(archive)?);
    let mut writer = WadWriter::new(file, planned.len())?;
    for (path, rel, hash) in &planned {
        let data = fs::read(path)?;
        let extension = Path::new(rel).extension().and_then(|ext| ext.to_str());
        let chunk = writer.add_chunk(*hash, &data, wad::compression_for_extension(extension))?;
        if chunk.duplicated {
            report.shared += 1;
        } else {
            report.stored_bytes += u64::from(chunk.compressed_size);
        }
        tracing::debug!(path = %rel, size = data.len(), "packed");
    }
    let (_, chunks) = writer.finish()?;
    report.chunks = chunks.len();
    tracing::info!(
        archive = %archive.display(),
        chunks = report.chunks,
        shared = report.shared,
        collisions = report.collisions.len(),
        "wad packed"
    );
    Ok(report)
}
