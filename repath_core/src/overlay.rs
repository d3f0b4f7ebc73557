use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use compat_league::wad_extract::{load_hashed_names, HASHED_FILES_NAME};
use serde::Serialize;
use walkdir::WalkDir;

use crate::source_index::SourceIndex;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct OverlayReport {
    pub copied: usize,
    /// Base files removed because an upper file with the same key was
    /// extracted under a different name.
    pub shadowed: usize,
    pub skipped: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<String>,
}

/// Lays every file of `upper` over `base`, overwriting. Upper files win:
/// a base file with the same canonical key under another name (hashed vs
/// resolved, or different casing) is removed first. Side-channel name maps
/// are merged instead of copied.
pub fn overlay_tree(upper: &Path, base: &Path) -> Result<OverlayReport, std::io::Error> {
    fs::create_dir_all(base)?;
    let base_index = SourceIndex::build(base)?;
    let mut report = OverlayReport::default();

    for entry in WalkDir::new(upper).sort_by_file_name() {
        let entry = entry.map_err(|err| {
            err.into_io_error()
                .unwrap_or_else(|| std::io::Error::other("directory walk failed"))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(upper) else {
            continue;
        };
        let relative = rel.to_string_lossy().replace('\\', "/");
        if relative == HASHED_FILES_NAME {
            continue;
        }
        let target = base.join(&relative);
        if let Some(existing) = base_index.lookup(&relative) {
            if existing.location != target && existing.location.is_file() {
                match fs::remove_file(&existing.location) {
                    Ok(()) => report.shadowed += 1,
                    Err(err) => {
                        tracing::warn!(path = %existing.relative, error = %err, "shadowed file not removed");
                    }
                }
            }
        }
        let result = target
            .parent()
            .map(fs::create_dir_all)
            .unwrap_or(Ok(()))
            .and_then(|()| fs::copy(entry.path(), &target));
        match result {
            Ok(_) => report.copied += 1,
            Err(err) => {
                tracing::warn!(path = %relative, error = %err, "overlay copy failed");
                report.skipped += 1;
                report.failures.push(relative);
            }
        }
    }

    merge_hashed_names(upper, base)?;
    tracing::info!(
        upper = %upper.display(),
        base = %base.display(),
        copied = report.copied,
        shadowed = report.shadowed,
        skipped = report.skipped,
        "overlay complete"
    );
    Ok(report)
}

fn merge_hashed_names(upper: &Path, base: &Path) -> Result<(), std::io::Error> {
    let upper_names = load_hashed_names(upper);
    if upper_names.is_empty() {
        return Ok(());
    }
    let mut merged: BTreeMap<String, String> = load_hashed_names(base);
    merged.extend(upper_names);
    let text = serde_json::to_string_pretty(&merged)?;
    fs::write(base.join(HASHED_FILES_NAME), text)
}
