use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use compat_league::bin::{self, BinError};
use compat_league::hash::HashDomain;
use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::source_index::{SourceIndex, SourceKind};
use crate::unify::{is_asset_reference, normalize_path, unify_path, CanonicalKey};

/// Label of the pseudo-entry that tracks roots and linked documents.
pub const DOCUMENTS_LABEL: &str = "documents";

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("root document not found in source tree: {0}")]
    RootNotFound(String),
    #[error("root is not a document: {0}")]
    RootNotDocument(String),
    #[error("failed to read document {path}: {source}")]
    Document {
        path: String,
        #[source]
        source: BinError,
    },
}

/// Identity hash of a document entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryHash(pub u32);

impl fmt::Display for EntryHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&HashDomain::Document.format(u64::from(self.0)))
    }
}

impl Serialize for EntryHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ScannedPath {
    pub existed: bool,
    /// The string as it was found, casing intact.
    pub original: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ScannedEntry {
    pub type_hash: u32,
    /// Document the entry was first seen in.
    pub origin: CanonicalKey,
    pub paths: BTreeMap<CanonicalKey, ScannedPath>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ScanTree {
    /// Pseudo-entry: every root and every followed or unresolved link.
    pub documents: BTreeMap<CanonicalKey, ScannedPath>,
    pub entries: BTreeMap<EntryHash, ScannedEntry>,
    /// Document -> documents it links to and that exist in the source tree.
    pub links: BTreeMap<CanonicalKey, Vec<CanonicalKey>>,
    pub roots: Vec<CanonicalKey>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub roots: usize,
    pub documents: usize,
    pub entries: usize,
    pub references: usize,
    pub missing: usize,
}

impl ScanTree {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, hash: EntryHash) -> Option<&ScannedEntry> {
        self.entries.get(&hash)
    }

    /// First record whose existence flag is false, as (entry label, path).
    pub fn first_missing(&self) -> Option<(String, String)> {
        let document = self
            .documents
            .values()
            .find(|path| !path.existed)
            .map(|path| (DOCUMENTS_LABEL.to_string(), path.original.clone()));
        document.or_else(|| {
            self.entries.iter().find_map(|(hash, entry)| {
                entry
                    .paths
                    .values()
                    .find(|path| !path.existed)
                    .map(|path| (hash.to_string(), path.original.clone()))
            })
        })
    }

    /// Every document reachable from `root` through followed links, root
    /// excluded, in discovery order.
    pub fn linked_closure(&self, root: &CanonicalKey) -> Vec<CanonicalKey> {
        let mut seen = BTreeSet::new();
        let mut ordered = Vec::new();
        let mut stack = vec![root.clone()];
        seen.insert(root.clone());
        while let Some(current) = stack.pop() {
            let Some(children) = self.links.get(&current) else {
                continue;
            };
            for child in children.iter().rev() {
                if seen.insert(child.clone()) {
                    ordered.push(child.clone());
                    stack.push(child.clone());
                }
            }
        }
        ordered
    }

    pub fn summary(&self) -> ScanSummary {
        let references: usize = self.entries.values().map(|entry| entry.paths.len()).sum();
        let missing = self.documents.values().filter(|path| !path.existed).count()
            + self
                .entries
                .values()
                .flat_map(|entry| entry.paths.values())
                .filter(|path| !path.existed)
                .count();
        ScanSummary {
            roots: self.roots.len(),
            documents: self.documents.len(),
            entries: self.entries.len(),
            references,
            missing,
        }
    }
}

/// True for `characters/<X>/.../<stem>.bin` links whose stem is `<X>` or
/// starts with `<X>_`: the owning character's own records.
pub fn is_self_skin_link(link: &str) -> bool {
    let lower = normalize_path(link);
    let Some(without_ext) = lower.strip_suffix(".bin") else {
        return false;
    };
    let Some((_, rest)) = without_ext.split_once("characters/") else {
        return false;
    };
    let parts: Vec<&str> = rest.split('/').collect();
    if parts.len() < 2 {
        return false;
    }
    let owner = parts[0];
    let stem = parts[parts.len() - 1];
    !owner.is_empty() && (stem == owner || stem.starts_with(&format!("{}_", owner)))
}

/// Scans `roots` (paths relative to the indexed tree) and every document
/// they link to.
pub fn scan(roots: &[String], index: &SourceIndex) -> Result<ScanTree, ScanError> {
    let mut tree = ScanTree::default();
    let mut visited = BTreeSet::new();
    for root in roots {
        let key = unify_path(root);
        let Some(file) = index.get(&key) else {
            return Err(ScanError::RootNotFound(root.clone()));
        };
        if file.kind != SourceKind::Document {
            return Err(ScanError::RootNotDocument(root.clone()));
        }
        tree.documents.insert(
            key.clone(),
            ScannedPath {
                existed: true,
                original: file.relative.clone(),
            },
        );
        if !tree.roots.contains(&key) {
            tree.roots.push(key.clone());
        }
        scan_document(&key, index, &mut tree, &mut visited)?;
    }
    let summary = tree.summary();
    tracing::info!(
        roots = summary.roots,
        documents = summary.documents,
        entries = summary.entries,
        references = summary.references,
        missing = summary.missing,
        "scan complete"
    );
    Ok(tree)
}

fn scan_document(
    key: &CanonicalKey,
    index: &SourceIndex,
    tree: &mut ScanTree,
    visited: &mut BTreeSet<CanonicalKey>,
) -> Result<(), ScanError> {
    if !visited.insert(key.clone()) {
        return Ok(());
    }
    let Some(file) = index.get(key) else {
        return Ok(());
    };
    let document = bin::read_bin(&file.location).map_err(|source| ScanError::Document {
        path: file.relative.clone(),
        source,
    })?;
    tracing::debug!(
        path = %file.relative,
        links = document.links.len(),
        entries = document.entries.len(),
        "scanning document"
    );

    let mut children = Vec::new();
    for link in &document.links {
        if is_self_skin_link(link) {
            tracing::debug!(link = %link, "skipping self-skin link");
            continue;
        }
        let link_key = unify_path(link);
        let existed = index.contains(&link_key);
        tree.documents.insert(
            link_key.clone(),
            ScannedPath {
                existed,
                original: link.clone(),
            },
        );
        if existed {
            children.push(link_key);
        }
    }
    tree.links.entry(key.clone()).or_default().extend(children.iter().cloned());

    for entry in &document.entries {
        let scanned = tree
            .entries
            .entry(EntryHash(entry.hash))
            .or_insert_with(|| ScannedEntry {
                type_hash: entry.type_hash,
                origin: key.clone(),
                paths: BTreeMap::new(),
            });
        entry.visit_strings(&mut |value| {
            if !is_asset_reference(value) {
                return;
            }
            let path_key = unify_path(value);
            let existed = index.contains(&path_key);
            scanned.paths.insert(
                path_key,
                ScannedPath {
                    existed,
                    original: value.to_string(),
                },
            );
        });
    }

    for child in children {
        scan_document(&child, index, tree, visited)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use compat_league::bin::{BinDocument, BinEntry, BinField, BinStruct, BinType, BinValue};
    use std::fs;
    use std::path::Path;

    fn string_field(name: u32, value: &str) -> BinField {
        BinField::new(name, BinValue::String(value.to_string()))
    }

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

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, b"x").expect("write");
    }

    #[test]
    fn self_skin_links_are_recognized() {
        assert!(is_self_skin_link("DATA/Characters/Teemo/Teemo.bin"));
        assert!(is_self_skin_link("characters/teemo/teemo_skin0.bin"));
        assert!(!is_self_skin_link("characters/teemo/tt/tt_base.bin"));
        assert!(!is_self_skin_link("characters/teemo/skins/skin0.bin"));
        assert!(!is_self_skin_link("data/shared/common.bin"));
    }

    #[test]
    fn scan_records_nested_strings_and_existence() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(dir.path(), "assets/x/y.dds");
        let nested = BinValue::Embed(Some(BinStruct {
            class_hash: 7,
            fields: vec![string_field(2, "ASSETS/Missing.tex")],
        }));
        let list = BinValue::List {
            item_type: BinType::String,
            items: vec![BinValue::String("assets/x/y.dds".to_string())],
        };
        write_doc(
            dir.path(),
            "data/characters/frog/skins/skin0.bin",
            &[],
            vec![BinEntry {
                type_hash: 1,
                hash: 0x10,
                fields: vec![
                    BinField::new(1, list),
                    BinField::new(3, nested),
                    string_field(4, "not a path"),
                ],
            }],
        );
        let index = SourceIndex::build(dir.path()).expect("index");
        let tree = scan(&["data/characters/frog/skins/skin0.bin".to_string()], &index).expect("scan");

        let entry = tree.entry(EntryHash(0x10)).expect("entry");
        assert_eq!(entry.paths.len(), 2);
        assert!(entry.paths[&unify_path("assets/x/y.dds")].existed);
        assert!(!entry.paths[&unify_path("assets/missing.tex")].existed);
        assert_eq!(
            tree.first_missing(),
            Some(("00000010".to_string(), "ASSETS/Missing.tex".to_string()))
        );
    }

    #[test]
    fn self_skin_link_is_skipped_and_other_link_followed() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_doc(
            dir.path(),
            "characters/teemo/skins/skin0.bin",
            &["characters/teemo/teemo_skin0.bin", "characters/teemo/tt/tt_base.bin"],
            vec![BinEntry {
                type_hash: 1,
                hash: 1,
                fields: vec![],
            }],
        );
        write_doc(
            dir.path(),
            "characters/teemo/teemo_skin0.bin",
            &[],
            vec![BinEntry {
                type_hash: 1,
                hash: 2,
                fields: vec![],
            }],
        );
        write_doc(
            dir.path(),
            "characters/teemo/tt/tt_base.bin",
            &[],
            vec![BinEntry {
                type_hash: 1,
                hash: 3,
                fields: vec![],
            }],
        );
        let index = SourceIndex::build(dir.path()).expect("index");
        let tree = scan(&["characters/teemo/skins/skin0.bin".to_string()], &index).expect("scan");

        assert!(tree.entry(EntryHash(2)).is_none());
        assert!(tree.entry(EntryHash(3)).is_some());
        let root = unify_path("characters/teemo/skins/skin0.bin");
        assert_eq!(
            tree.links[&root],
            vec![unify_path("characters/teemo/tt/tt_base.bin")]
        );
        assert!(!tree
            .documents
            .contains_key(&unify_path("characters/teemo/teemo_skin0.bin")));
    }

    #[test]
    fn cyclic_links_terminate() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_doc(dir.path(), "data/a.bin", &["data/b.bin"], vec![BinEntry {
            type_hash: 1,
            hash: 1,
            fields: vec![],
        }]);
        write_doc(dir.path(), "data/b.bin", &["data/a.bin", "data/gone.bin"], vec![BinEntry {
            type_hash: 1,
            hash: 2,
            fields: vec![],
        }]);
        let index = SourceIndex::build(dir.path()).expect("index");
        let tree = scan(&["data/a.bin".to_string()], &index).expect("scan");
        assert_eq!(tree.entries.len(), 2);
        assert!(!tree.documents[&unify_path("data/gone.bin")].existed);
        assert_eq!(
            tree.linked_closure(&unify_path("data/a.bin")),
            vec![unify_path("data/b.bin")]
        );
        assert_eq!(tree.first_missing().map(|(label, _)| label), Some(DOCUMENTS_LABEL.to_string()));
    }

    #[test]
    fn voice_over_strings_are_never_recorded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let vo = "assets/sounds/wwise2016/vo/en_us/characters/frog/frog_vo.wpk";
        touch(dir.path(), vo);
        write_doc(dir.path(), "data/frog.bin", &[], vec![BinEntry {
            type_hash: 1,
            hash: 9,
            fields: vec![string_field(1, vo)],
        }]);
        let index = SourceIndex::build(dir.path()).expect("index");
        let tree = scan(&["data/frog.bin".to_string()], &index).expect("scan");
        assert!(tree.entry(EntryHash(9)).expect("entry").paths.is_empty());
    }

    #[test]
    fn unknown_root_is_an_error() {
        let index = SourceIndex::default();
        let err = scan(&["data/none.bin".to_string()], &index).expect_err("missing root");
        assert!(matches!(err, ScanError::RootNotFound(_)));
    }
}
