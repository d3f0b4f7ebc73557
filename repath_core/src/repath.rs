use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use compat_league::bin::{self, BinError};
use compat_league::hash::{path_hash, HashDomain};
use serde::Serialize;
use thiserror::Error;
use walkdir::WalkDir;

use crate::scan::{EntryHash, ScanTree};
use crate::source_index::SourceIndex;
use crate::unify::{is_asset_reference, normalize_path, relocate_path, unify_path, CanonicalKey};

pub const DEFAULT_SEGMENT: &str = "bum";
pub const MAX_BASENAME_LEN: usize = 255;

#[derive(Debug, Error)]
pub enum RepathError {
    #[error("no entry scanned, select at least one root document with entries")]
    NoEntriesScanned,
    #[error("{entry}/{path} is missing from the source tree")]
    MissingSourceAsset { entry: String, path: String },
    #[error("output directory is not empty: {0}")]
    OutputNotEmpty(String),
    #[error("invalid relocation segment {0:?}")]
    InvalidSegment(String),
    #[error("failed to rewrite document {path}: {source}")]
    Document {
        path: String,
        #[source]
        source: BinError,
    },
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> RepathError + '_ {
    move |source| RepathError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn document_error(path: &Path) -> impl FnOnce(BinError) -> RepathError + '_ {
    move |source| RepathError::Document {
        path: path.display().to_string(),
        source,
    }
}

/// A single non-empty path segment of ASCII letters, digits, `_` or `-`.
pub fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Which segment each entry is relocated behind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelocationPlan {
    default_segment: String,
    overrides: BTreeMap<CanonicalKey, String>,
}

impl RelocationPlan {
    /// An empty `segment` falls back to [`DEFAULT_SEGMENT`].
    pub fn new(segment: &str) -> Self {
        let segment = segment.trim();
        let default_segment = if segment.is_empty() {
            DEFAULT_SEGMENT.to_string()
        } else {
            segment.to_string()
        };
        Self {
            default_segment,
            overrides: BTreeMap::new(),
        }
    }

    /// Entries first seen in `document` use `segment` instead of the default.
    pub fn with_override(mut self, document: &str, segment: &str) -> Self {
        self.overrides
            .insert(unify_path(document), segment.trim().to_string());
        self
    }

    pub fn default_segment(&self) -> &str {
        &self.default_segment
    }

    pub fn segment_for(&self, origin: &CanonicalKey) -> &str {
        self.overrides
            .get(origin)
            .map(String::as_str)
            .unwrap_or(&self.default_segment)
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.default_segment.as_str()).chain(self.overrides.values().map(String::as_str))
    }
}

impl Default for RelocationPlan {
    fn default() -> Self {
        Self::new(DEFAULT_SEGMENT)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RewriteOptions {
    /// Relocate references regardless of whether they were found.
    pub ignore_missing: bool,
    /// Fold linked documents into their root.
    pub combine_linked: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RewriteReport {
    pub copied_assets: usize,
    pub copied_documents: usize,
    pub failed_copies: usize,
    pub rewritten_documents: usize,
    pub rewritten_strings: usize,
    /// Outputs written under a hashed name because the base name was too long.
    pub hashed_names: usize,
    pub merged_documents: usize,
    pub pruned_dirs: usize,
    pub failures: Vec<String>,
}

/// Output location for `relative` under `out_dir`, lower-cased.
///
/// A base name longer than [`MAX_BASENAME_LEN`] is replaced by the hash of
/// the whole relative path plus its extension, at the output root.
pub fn output_target(out_dir: &Path, relative: &str) -> (PathBuf, bool) {
    let lower = normalize_path(relative);
    let basename = lower.rsplit('/').next().unwrap_or(&lower);
    if basename.len() <= MAX_BASENAME_LEN {
        return (out_dir.join(&lower), false);
    }
    let mut name = HashDomain::Archive.format(path_hash(&lower));
    if let Some(ext) = Path::new(basename).extension().and_then(|ext| ext.to_str()) {
        name.push('.');
        name.push_str(ext);
    }
    (out_dir.join(name), true)
}

/// True when `dir` is missing or has no entries.
pub fn is_empty_dir(dir: &Path) -> Result<bool, std::io::Error> {
    match fs::read_dir(dir) {
        Ok(mut entries) => Ok(entries.next().is_none()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(err) => Err(err),
    }
}

/// Copies every found reference of `scan` into `output_dir`, relocating
/// entry-referenced files behind their segment and rewriting copied documents.
pub fn rewrite(
    scan: &ScanTree,
    index: &SourceIndex,
    plan: &RelocationPlan,
    output_dir: &Path,
    options: RewriteOptions,
) -> Result<RewriteReport, RepathError> {
    if scan.is_empty() {
        return Err(RepathError::NoEntriesScanned);
    }
    if !options.ignore_missing {
        if let Some((entry, path)) = scan.first_missing() {
            return Err(RepathError::MissingSourceAsset { entry, path });
        }
    }
    if let Some(bad) = plan.segments().find(|segment| !is_valid_segment(segment)) {
        return Err(RepathError::InvalidSegment(bad.to_string()));
    }
    if !is_empty_dir(output_dir).map_err(io_error(output_dir))? {
        return Err(RepathError::OutputNotEmpty(output_dir.display().to_string()));
    }
    fs::create_dir_all(output_dir).map_err(io_error(output_dir))?;

    let mut report = RewriteReport::default();
    let mut written = BTreeSet::new();
    let mut document_outputs = BTreeMap::new();

    for (key, record) in &scan.documents {
        if !record.existed {
            continue;
        }
        let Some(source) = index.get(key) else {
            continue;
        };
        let (target, hashed) = output_target(output_dir, &record.original);
        if !written.insert(target.clone()) {
            document_outputs.insert(key.clone(), target);
            continue;
        }
        copy_file(&source.location, &target)?;
        report.copied_documents += 1;
        report.hashed_names += usize::from(hashed);
        report.rewritten_strings += rewrite_document(&target, scan, plan, options)?;
        report.rewritten_documents += 1;
        document_outputs.insert(key.clone(), target);
    }

    for entry in scan.entries.values() {
        let segment = plan.segment_for(&entry.origin);
        for (key, record) in &entry.paths {
            if !record.existed {
                continue;
            }
            let Some(source) = index.get(key) else {
                continue;
            };
            // Same relocation as the document string, so both unify alike.
            let relocated = normalize_path(&relocate_path(&record.original, segment));
            let (target, hashed) = output_target(output_dir, &relocated);
            if !written.insert(target.clone()) {
                continue;
            }
            let is_document = relocated.ends_with(".bin");
            if is_document {
                copy_file(&source.location, &target)?;
                report.copied_documents += 1;
                report.rewritten_strings += rewrite_document(&target, scan, plan, options)?;
                report.rewritten_documents += 1;
            } else if let Err(err) = copy_file(&source.location, &target) {
                tracing::warn!(path = %relocated, error = %err, "asset copy failed");
                report.failed_copies += 1;
                report.failures.push(relocated);
                continue;
            } else {
                report.copied_assets += 1;
            }
            report.hashed_names += usize::from(hashed);
        }
    }

    if options.combine_linked {
        report.merged_documents = combine_linked(scan, &document_outputs)?;
    }
    report.pruned_dirs = prune_empty_dirs(output_dir).map_err(io_error(output_dir))?;

    tracing::info!(
        output = %output_dir.display(),
        assets = report.copied_assets,
        documents = report.copied_documents,
        strings = report.rewritten_strings,
        failed = report.failed_copies,
        merged = report.merged_documents,
        "rewrite complete"
    );
    Ok(report)
}

fn copy_file(source: &Path, target: &Path) -> Result<(), RepathError> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    fs::copy(source, target).map_err(io_error(target))?;
    Ok(())
}

/// Relocates every recorded reference inside the document at `path` and
/// writes it back. Returns the number of strings changed.
pub fn rewrite_document(
    path: &Path,
    scan: &ScanTree,
    plan: &RelocationPlan,
    options: RewriteOptions,
) -> Result<usize, RepathError> {
    let mut document = bin::read_bin(path).map_err(document_error(path))?;
    let mut changed = 0;
    for entry in &mut document.entries {
        let Some(scanned) = scan.entry(EntryHash(entry.hash)) else {
            continue;
        };
        let segment = plan.segment_for(&scanned.origin);
        entry.visit_strings_mut(&mut |value| {
            if !is_asset_reference(value) {
                return;
            }
            let Some(record) = scanned.paths.get(&unify_path(value)) else {
                return;
            };
            if record.existed || options.ignore_missing {
                *value = relocate_path(value, segment);
                changed += 1;
            }
        });
    }
    bin::write_bin(&document, path).map_err(document_error(path))?;
    tracing::debug!(path = %path.display(), changed, "document rewritten");
    Ok(changed)
}

/// Folds each root's linked documents into the root output and deletes the
/// standalone copies. Returns the number of documents removed.
fn combine_linked(
    scan: &ScanTree,
    outputs: &BTreeMap<CanonicalKey, PathBuf>,
) -> Result<usize, RepathError> {
    let root_outputs: BTreeSet<&PathBuf> = scan
        .roots
        .iter()
        .filter_map(|root| outputs.get(root))
        .collect();
    let mut merged = BTreeSet::new();

    for root in &scan.roots {
        let linked = scan.linked_closure(root);
        if linked.is_empty() {
            continue;
        }
        let Some(root_path) = outputs.get(root) else {
            continue;
        };
        let mut document = bin::read_bin(root_path).map_err(document_error(root_path))?;
        let linked_keys: BTreeSet<&CanonicalKey> = linked.iter().collect();
        document
            .links
            .retain(|link| !linked_keys.contains(&unify_path(link)));
        let mut identities: BTreeSet<u32> = document.entries.iter().map(|entry| entry.hash).collect();

        for key in &linked {
            let Some(linked_path) = outputs.get(key) else {
                continue;
            };
            if linked_path == root_path {
                continue;
            }
            let linked_document =
                bin::read_bin(linked_path).map_err(document_error(linked_path))?;
            for entry in linked_document.entries {
                if identities.insert(entry.hash) {
                    document.entries.push(entry);
                }
            }
            if !root_outputs.contains(linked_path) {
                merged.insert(linked_path.clone());
            }
        }
        bin::write_bin(&document, root_path).map_err(document_error(root_path))?;
        tracing::debug!(root = %root_path.display(), linked = linked.len(), "linked documents combined");
    }

    for path in &merged {
        fs::remove_file(path).map_err(io_error(path))?;
    }
    Ok(merged.len())
}

/// Removes every empty directory below `root`, deepest first.
pub fn prune_empty_dirs(root: &Path) -> Result<usize, std::io::Error> {
    let mut pruned = 0;
    for entry in WalkDir::new(root).min_depth(1).contents_first(true) {
        let entry = entry.map_err(|err| {
            err.into_io_error()
                .unwrap_or_else(|| std::io::Error::other("directory walk failed"))
        })?;
        if entry.file_type().is_dir() && is_empty_dir(entry.path())? {
            fs::remove_dir(entry.path())?;
            pruned += 1;
        }
    }
    Ok(pruned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::scan;
    use compat_league::bin::{BinDocument, BinEntry, BinField, BinValue};

    fn write_doc(root: &Path, rel: &str, links: &[&str], entries: Vec<BinEntry>) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        let document = BinDocument {
            links: links.iter().map(|link| link.to_string()).collect(),
            entries,
            ..BinDocument::default()
        };
        bin::write_bin(&document, &path).expect("write bin");
    }

    fn touch(root: &Path, rel: &str, data: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, data).expect("write");
    }

    fn entry(hash: u32, strings: &[&str]) -> BinEntry {
        BinEntry {
            type_hash: 0xaa,
            hash,
            fields: strings
                .iter()
                .enumerate()
                .map(|(i, value)| BinField::new(i as u32, BinValue::String(value.to_string())))
                .collect(),
        }
    }

    fn strings_of(document: &BinDocument, hash: u32) -> Vec<String> {
        let mut out = Vec::new();
        document
            .entry(hash)
            .expect("entry")
            .visit_strings(&mut |value| out.push(value.to_string()));
        out
    }

    #[test]
    fn long_base_names_are_hashed_at_root() {
        let out = Path::new("/out");
        let (short, hashed) = output_target(out, "ASSETS/Frog/X.dds");
        assert_eq!(short, out.join("assets/frog/x.dds"));
        assert!(!hashed);

        let long = format!("assets/frog/{}.dds", "n".repeat(260));
        let (target, hashed) = output_target(out, &long);
        assert!(hashed);
        assert_eq!(
            target,
            out.join(format!("{}.dds", HashDomain::Archive.format(path_hash(&long))))
        );
    }

    #[test]
    fn segments_are_validated() {
        assert!(is_valid_segment("frog"));
        assert!(is_valid_segment("my-mod_2"));
        assert!(!is_valid_segment(""));
        assert!(!is_valid_segment("a/b"));
        assert!(!is_valid_segment(".."));
        assert_eq!(RelocationPlan::new("  ").default_segment(), DEFAULT_SEGMENT);
    }

    #[test]
    fn overrides_apply_by_origin_document() {
        let plan = RelocationPlan::new("frog").with_override("DATA/B.bin", "toad");
        assert_eq!(plan.segment_for(&unify_path("data/b.bin")), "toad");
        assert_eq!(plan.segment_for(&unify_path("data/a.bin")), "frog");
    }

    #[test]
    fn rewrite_relocates_found_references() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("source");
        touch(&source, "assets/x/y.dds", b"dds");
        let vo = "assets/sounds/wwise2016/vo/en_us/frog_vo.wpk";
        touch(&source, vo, b"vo");
        write_doc(&source, "data/frog.bin", &[], vec![entry(1, &["assets/x/y.dds", "y.dds", vo])]);

        let index = SourceIndex::build(&source).expect("index");
        let tree = scan(&["data/frog.bin".to_string()], &index).expect("scan");

        let out = dir.path().join("out");
        let report = rewrite(&tree, &index, &RelocationPlan::new("frog"), &out, RewriteOptions::default())
            .expect("rewrite");
        assert_eq!(report.copied_assets, 1);
        assert_eq!(report.copied_documents, 1);
        assert_eq!(report.rewritten_strings, 1);
        assert!(out.join("assets/frog/x/y.dds").is_file());

        let document = bin::read_bin(&out.join("data/frog.bin")).expect("read");
        assert_eq!(
            strings_of(&document, 1),
            vec!["assets/frog/x/y.dds".to_string(), "y.dds".to_string(), vo.to_string()]
        );
        assert!(!out.join(vo).exists());
    }

    #[test]
    fn backslash_references_land_where_the_document_points() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("source");
        touch(&source, "assets/x/y.dds", b"dds");
        write_doc(&source, "data/frog.bin", &[], vec![entry(1, &["ASSETS\\X\\Y.dds"])]);

        let index = SourceIndex::build(&source).expect("index");
        let tree = scan(&["data/frog.bin".to_string()], &index).expect("scan");
        let out = dir.path().join("out");
        rewrite(&tree, &index, &RelocationPlan::new("frog"), &out, RewriteOptions::default())
            .expect("rewrite");

        let document = bin::read_bin(&out.join("data/frog.bin")).expect("read");
        let strings = strings_of(&document, 1);
        assert_eq!(strings, vec!["ASSETS\\frog\\X\\Y.dds".to_string()]);
        assert!(out.join("assets/frog/x/y.dds").is_file());
        assert_eq!(
            unify_path(&strings[0]),
            unify_path("assets/frog/x/y.dds")
        );

        let audit = crate::audit::audit(&out, &["frog"]).expect("audit");
        assert_eq!(audit.missing_count(), 0);
        assert!(audit.junk_files.is_empty());
    }

    #[test]
    fn missing_asset_blocks_before_writing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("source");
        write_doc(&source, "data/frog.bin", &[], vec![entry(1, &["assets/gone.dds"])]);
        let index = SourceIndex::build(&source).expect("index");
        let tree = scan(&["data/frog.bin".to_string()], &index).expect("scan");

        let out = dir.path().join("out");
        let err = rewrite(&tree, &index, &RelocationPlan::new("frog"), &out, RewriteOptions::default())
            .expect_err("missing");
        assert!(matches!(
            err,
            RepathError::MissingSourceAsset { ref path, .. } if path == "assets/gone.dds"
        ));
        assert!(!out.exists());
    }

    #[test]
    fn ignore_missing_relocates_anyway() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("source");
        write_doc(&source, "data/frog.bin", &[], vec![entry(1, &["assets/gone.dds"])]);
        let index = SourceIndex::build(&source).expect("index");
        let tree = scan(&["data/frog.bin".to_string()], &index).expect("scan");

        let out = dir.path().join("out");
        let options = RewriteOptions {
            ignore_missing: true,
            combine_linked: false,
        };
        let report = rewrite(&tree, &index, &RelocationPlan::new("frog"), &out, options).expect("rewrite");
        assert_eq!(report.copied_assets, 0);
        let document = bin::read_bin(&out.join("data/frog.bin")).expect("read");
        assert_eq!(strings_of(&document, 1), vec!["assets/frog/gone.dds".to_string()]);
    }

    #[test]
    fn empty_scan_and_dirty_output_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let index = SourceIndex::default();
        let err = rewrite(
            &ScanTree::default(),
            &index,
            &RelocationPlan::default(),
            dir.path(),
            RewriteOptions::default(),
        )
        .expect_err("empty");
        assert!(matches!(err, RepathError::NoEntriesScanned));

        let source = dir.path().join("source");
        write_doc(&source, "data/frog.bin", &[], vec![entry(1, &[])]);
        let index = SourceIndex::build(&source).expect("index");
        let tree = scan(&["data/frog.bin".to_string()], &index).expect("scan");
        let out = dir.path().join("out");
        touch(&out, "stale.txt", b"old");
        let err = rewrite(&tree, &index, &RelocationPlan::default(), &out, RewriteOptions::default())
            .expect_err("dirty");
        assert!(matches!(err, RepathError::OutputNotEmpty(_)));
    }

    #[test]
    fn combine_folds_linked_entries_into_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("source");
        touch(&source, "assets/a.dds", b"a");
        touch(&source, "assets/b.dds", b"b");
        write_doc(
            &source,
            "data/root.bin",
            &["data/linked.bin", "data/external.bin"],
            vec![entry(1, &["assets/a.dds"])],
        );
        write_doc(
            &source,
            "data/linked.bin",
            &[],
            vec![entry(1, &[]), entry(2, &["assets/b.dds"])],
        );
        let index = SourceIndex::build(&source).expect("index");
        let tree = scan(&["data/root.bin".to_string()], &index).expect("scan");

        let out = dir.path().join("out");
        let options = RewriteOptions {
            ignore_missing: true,
            combine_linked: true,
        };
        let report = rewrite(&tree, &index, &RelocationPlan::new("frog"), &out, options).expect("rewrite");
        assert_eq!(report.merged_documents, 1);
        assert!(!out.join("data/linked.bin").exists());

        let root = bin::read_bin(&out.join("data/root.bin")).expect("root");
        assert_eq!(root.links, vec!["data/external.bin".to_string()]);
        let hashes: Vec<u32> = root.entries.iter().map(|entry| entry.hash).collect();
        assert_eq!(hashes, vec![1, 2]);
        assert_eq!(strings_of(&root, 2), vec!["assets/frog/b.dds".to_string()]);
        assert!(out.join("assets/frog/b.dds").is_file());
    }

    #[test]
    fn prune_removes_nested_empty_dirs() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("a/b/c")).expect("mkdir");
        touch(dir.path(), "keep/file.txt", b"x");
        let pruned = prune_empty_dirs(dir.path()).expect("prune");
        assert_eq!(pruned, 3);
        assert!(dir.path().join("keep").is_dir());
        assert!(dir.path().is_dir());
    }
}
