use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Component, Path, PathBuf};

use compat_league::bin;
use compat_league::wad_extract::HASHED_FILES_NAME;
use serde::Serialize;
use thiserror::Error;
use walkdir::WalkDir;

use crate::scan::EntryHash;
use crate::unify::{is_asset_reference, normalize_path, relocate_path, strip_relocation, unify_path, CanonicalKey};

const TEXTURE_VARIANT_PREFIXES: [&str; 2] = ["2x_", "4x_"];

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("output tree not found: {0}")]
    MissingDir(String),
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EntryAudit {
    pub hash: EntryHash,
    pub type_hash: u32,
    pub mentioned: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DocumentAudit {
    pub path: String,
    pub entries: Vec<EntryAudit>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub documents: Vec<DocumentAudit>,
    /// Documents that could not be parsed.
    pub unreadable: Vec<String>,
    pub junk_files: Vec<String>,
}

impl AuditReport {
    pub fn missing_count(&self) -> usize {
        self.documents
            .iter()
            .flat_map(|document| &document.entries)
            .map(|entry| entry.missing.len())
            .sum()
    }

    /// Every missing reference once, in report order.
    pub fn missing_paths(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        let mut paths = Vec::new();
        for entry in self.documents.iter().flat_map(|document| &document.entries) {
            for path in &entry.missing {
                if seen.insert(path.as_str()) {
                    paths.push(path.as_str());
                }
            }
        }
        paths
    }
}

/// Forms a reference may take on disk with `segment` added or removed.
pub fn reference_candidates(reference: &str, segment: &str) -> Vec<String> {
    let mut candidates = vec![reference.to_string()];
    let mut push = |candidate: String| {
        if !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    };
    push(relocate_path(reference, segment));
    push(format!("{}/{}", segment, reference));
    if let Some(stripped) = strip_relocation(reference, segment) {
        push(stripped);
    }
    candidates
}

struct TreeFiles {
    paths: Vec<String>,
    by_key: BTreeMap<CanonicalKey, Vec<usize>>,
    by_path: BTreeMap<String, usize>,
    matched: Vec<bool>,
}

impl TreeFiles {
    fn collect(root: &Path) -> Result<Self, AuditError> {
        let mut files = TreeFiles {
            paths: Vec::new(),
            by_key: BTreeMap::new(),
            by_path: BTreeMap::new(),
            matched: Vec::new(),
        };
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(|err| AuditError::Io {
                path: root.display().to_string(),
                source: err
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory walk failed")),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(root) else {
                continue;
            };
            let rel = normalize_path(&rel.to_string_lossy());
            let index = files.paths.len();
            files.by_key.entry(unify_path(&rel)).or_default().push(index);
            files.by_path.insert(rel.clone(), index);
            files.matched.push(rel == HASHED_FILES_NAME);
            files.paths.push(rel);
        }
        Ok(files)
    }

    fn mark_path(&mut self, path: &str) {
        if let Some(&index) = self.by_path.get(path) {
            self.matched[index] = true;
        }
    }

    /// Marks every file satisfying `reference` under any of `segments`.
    /// Returns false when none does.
    fn satisfy(&mut self, reference: &str, segments: &[&str]) -> bool {
        let candidates = segments
            .iter()
            .flat_map(|segment| reference_candidates(reference, segment));
        for candidate in candidates {
            let Some(indices) = self.by_key.get(&unify_path(&candidate)).cloned() else {
                continue;
            };
            for index in indices {
                self.matched[index] = true;
                if reference.ends_with(".dds") {
                    let path = self.paths[index].clone();
                    let (dir, name) = match path.rsplit_once('/') {
                        Some((dir, name)) => (format!("{}/", dir), name.to_string()),
                        None => (String::new(), path.clone()),
                    };
                    for prefix in TEXTURE_VARIANT_PREFIXES {
                        self.mark_path(&format!("{}{}{}", dir, prefix, name));
                    }
                }
            }
            return true;
        }
        false
    }
}

/// Audits every `.bin` document in `output_dir`, allowing references to
/// differ from the files by any one of `segments`.
pub fn audit(output_dir: &Path, segments: &[&str]) -> Result<AuditReport, AuditError> {
    audit_documents(output_dir, None, segments)
}

/// Audits `documents` (relative to `output_dir`), or every `.bin` in the
/// tree when `None`.
pub fn audit_documents(
    output_dir: &Path,
    documents: Option<&[String]>,
    segments: &[&str],
) -> Result<AuditReport, AuditError> {
    if !output_dir.is_dir() {
        return Err(AuditError::MissingDir(output_dir.display().to_string()));
    }
    let mut files = TreeFiles::collect(output_dir)?;
    let selected: Vec<String> = match documents {
        Some(documents) => documents.iter().map(|doc| normalize_path(doc)).collect(),
        None => files
            .paths
            .iter()
            .filter(|path| path.ends_with(".bin"))
            .cloned()
            .collect(),
    };

    let mut report = AuditReport::default();
    for rel in selected {
        let document = match bin::read_bin(&output_dir.join(&rel)) {
            Ok(document) => document,
            Err(err) => {
                tracing::warn!(path = %rel, error = %err, "unreadable document skipped");
                report.unreadable.push(rel);
                continue;
            }
        };
        files.mark_path(&rel);

        let mut entries = Vec::new();
        for entry in &document.entries {
            let mut mentioned: Vec<String> = Vec::new();
            entry.visit_strings(&mut |value| {
                if !is_asset_reference(value) {
                    return;
                }
                let reference = normalize_path(value);
                if !mentioned.contains(&reference) {
                    mentioned.push(reference);
                }
            });
            if mentioned.is_empty() {
                continue;
            }
            let missing = mentioned
                .iter()
                .filter(|reference| !files.satisfy(reference, segments))
                .cloned()
                .collect();
            entries.push(EntryAudit {
                hash: EntryHash(entry.hash),
                type_hash: entry.type_hash,
                mentioned,
                missing,
            });
        }
        if !entries.is_empty() {
            report.documents.push(DocumentAudit { path: rel, entries });
        }
    }

    report.junk_files = files
        .paths
        .iter()
        .zip(&files.matched)
        .filter(|(_, matched)| !**matched)
        .map(|(path, _)| path.clone())
        .collect();
    tracing::info!(
        output = %output_dir.display(),
        documents = report.documents.len(),
        missing = report.missing_count(),
        junk = report.junk_files.len(),
        "audit complete"
    );
    Ok(report)
}

/// Stand-in files written for missing textures.
#[derive(Clone, Debug, Default)]
pub struct PlaceholderTextures {
    pub dds: Option<PathBuf>,
    pub tex: Option<PathBuf>,
}

impl PlaceholderTextures {
    fn for_reference(&self, reference: &str) -> Option<&Path> {
        if reference.ends_with(".dds") {
            self.dds.as_deref()
        } else if reference.ends_with(".tex") {
            self.tex.as_deref()
        } else {
            None
        }
    }
}

/// Copies a placeholder to the path of every missing `.dds`/`.tex`
/// reference in `report`. Returns the number of files written.
pub fn fill_missing_textures(
    report: &AuditReport,
    output_dir: &Path,
    placeholders: &PlaceholderTextures,
) -> usize {
    let mut written = 0;
    for reference in report.missing_paths() {
        let Some(source) = placeholders.for_reference(reference) else {
            continue;
        };
        let relative = Path::new(reference);
        if relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
        {
            tracing::warn!(path = %reference, "unsafe placeholder target skipped");
            continue;
        }
        let target = output_dir.join(relative);
        let result = target
            .parent()
            .map(fs::create_dir_all)
            .unwrap_or(Ok(()))
            .and_then(|_| fs::copy(source, &target));
        match result {
            Ok(_) => written += 1,
            Err(err) => tracing::warn!(path = %reference, error = %err, "placeholder copy failed"),
        }
    }
    tracing::info!(written, "placeholder textures written");
    written
}
