use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::unify::{unify_path, CanonicalKey};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Document,
    Asset,
}

impl SourceKind {
    pub fn classify(path: &str) -> Self {
        if path.to_ascii_lowercase().ends_with(".bin") {
            SourceKind::Document
        } else {
            SourceKind::Asset
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceFile {
    pub location: PathBuf,
    /// Relative to the indexed root, `/` separated, original casing.
    pub relative: String,
    pub kind: SourceKind,
}

/// Every file under one source tree, keyed by its canonical key.
#[derive(Clone, Debug, Default)]
pub struct SourceIndex {
    root: PathBuf,
    files: BTreeMap<CanonicalKey, SourceFile>,
}

impl SourceIndex {
    /// Walks `root` in sorted order. When two files share a key the later
    /// one in walk order wins.
    pub fn build(root: &Path) -> Result<Self, std::io::Error> {
        let mut index = Self {
            root: root.to_path_buf(),
            files: BTreeMap::new(),
        };
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(|err| {
                err.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory walk failed"))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(root) else {
                continue;
            };
            let relative = rel.to_string_lossy().replace('\\', "/");
            index.insert(entry.path().to_path_buf(), relative);
        }
        tracing::info!(
            root = %root.display(),
            files = index.len(),
            documents = index.documents().count(),
            "source tree indexed"
        );
        Ok(index)
    }

    pub fn insert(&mut self, location: PathBuf, relative: String) -> CanonicalKey {
        let key = unify_path(&relative);
        let kind = SourceKind::classify(&relative);
        if let Some(previous) = self.files.get(&key) {
            tracing::debug!(
                key = %key,
                previous = %previous.relative,
                current = %relative,
                "source key collision, keeping later file"
            );
        }
        self.files.insert(
            key.clone(),
            SourceFile {
                location,
                relative,
                kind,
            },
        );
        key
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn get(&self, key: &CanonicalKey) -> Option<&SourceFile> {
        self.files.get(key)
    }

    /// Looks up any raw path or string form.
    pub fn lookup(&self, raw: &str) -> Option<&SourceFile> {
        self.files.get(&unify_path(raw))
    }

    pub fn contains(&self, key: &CanonicalKey) -> bool {
        self.files.contains_key(key)
    }

    pub fn documents(&self) -> impl Iterator<Item = (&CanonicalKey, &SourceFile)> {
        self.files
            .iter()
            .filter(|(_, file)| file.kind == SourceKind::Document)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CanonicalKey, &SourceFile)> {
        self.files.iter()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn build_indexes_relative_paths_and_documents() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("Data/Characters/Teemo")).expect("mkdir");
        fs::create_dir_all(dir.path().join("assets")).expect("mkdir");
        fs::write(dir.path().join("Data/Characters/Teemo/Teemo.bin"), b"PROP").expect("write");
        fs::write(dir.path().join("assets/x.dds"), b"DDS ").expect("write");

        let index = SourceIndex::build(dir.path()).expect("index");
        assert_eq!(index.len(), 2);
        assert_eq!(index.documents().count(), 1);
        let doc = index
            .lookup("DATA/characters/teemo/teemo.bin")
            .expect("document");
        assert_eq!(doc.relative, "Data/Characters/Teemo/Teemo.bin");
        assert_eq!(doc.kind, SourceKind::Document);
        assert!(index.lookup("assets\\X.dds").is_some());
    }

    #[test]
    fn later_insert_wins_on_shared_key() {
        let mut index = SourceIndex::default();
        let first = index.insert(PathBuf::from("/a/X.dds"), "X.dds".to_string());
        let second = index.insert(PathBuf::from("/b/x.dds"), "x.dds".to_string());
        assert_eq!(first, second);
        assert_eq!(index.len(), 1);
        assert_eq!(
            index.get(&first).map(|file| file.location.clone()),
            Some(PathBuf::from("/b/x.dds"))
        );
    }
}
