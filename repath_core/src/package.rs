use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use zip::read::ZipArchive;
use zip::result::ZipError;
use zip::write::FileOptions;
use zip::ZipWriter;

pub const WAD_MEMBER_SUFFIX: &str = ".wad.client";
const REPATHED_SUFFIX: &str = "_repathed";

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] ZipError),
    #[error("package member not found: {0}")]
    MemberNotFound(String),
    #[error("package output must differ from its input: {0}")]
    SamePath(String),
}

fn normalize_member(name: &str) -> String {
    name.replace('\\', "/").to_ascii_lowercase()
}

fn member_matches(name: &str, member: &str) -> bool {
    normalize_member(name) == normalize_member(member)
}

/// Names of every archive member of the package, in package order.
pub fn find_wad_members(package: &Path) -> Result<Vec<String>, PackageError> {
    let mut archive = ZipArchive::new(File::open(package)?)?;
    let mut members = Vec::new();
    for index in 0..archive.len() {
        let file = archive.by_index(index)?;
        if !file.is_dir() && normalize_member(file.name()).ends_with(WAD_MEMBER_SUFFIX) {
            members.push(file.name().to_string());
        }
    }
    Ok(members)
}

/// Writes `member` to `dest`. Returns the number of bytes written.
pub fn extract_member(package: &Path, member: &str, dest: &Path) -> Result<u64, PackageError> {
    let mut archive = ZipArchive::new(File::open(package)?)?;
    let index = (0..archive.len())
        .find(|&index| {
            archive
                .by_index(index)
                .map(|file| member_matches(file.name(), member))
                .unwrap_or(false)
        })
        .ok_or_else(|| PackageError::MemberNotFound(member.to_string()))?;
    let mut file = archive.by_index(index)?;
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut out = File::create(dest)?;
    let written = io::copy(&mut file, &mut out)?;
    tracing::debug!(member, bytes = written, "package member extracted");
    Ok(written)
}

/// Copies `package` to `out`, swapping the contents of `member` for `data`.
pub fn replace_member(
    package: &Path,
    member: &str,
    data: &[u8],
    out: &Path,
) -> Result<(), PackageError> {
    if package == out {
        return Err(PackageError::SamePath(out.display().to_string()));
    }
    let mut archive = ZipArchive::new(File::open(package)?)?;
    if let Some(parent) = out.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = ZipWriter::new(File::create(out)?);
    let mut replaced = false;
    for index in 0..archive.len() {
        let mut file = archive.by_index(index)?;
        let name = file.name().to_string();
        if file.is_dir() {
            writer.add_directory(name, FileOptions::default())?;
            continue;
        }
        let options = FileOptions::default().compression_method(file.compression());
        writer.start_file(name.clone(), options)?;
        if !replaced && member_matches(&name, member) {
            writer.write_all(data)?;
            replaced = true;
        } else {
            let mut buffer = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut buffer)?;
            writer.write_all(&buffer)?;
        }
    }
    writer.finish()?;
    if !replaced {
        let _ = fs::remove_file(out);
        return Err(PackageError::MemberNotFound(member.to_string()));
    }
    tracing::info!(package = %out.display(), member, "package rebuilt");
    Ok(())
}

/// `<stem>_repathed<.ext>` next to `package`.
pub fn repathed_package_name(package: &Path) -> PathBuf {
    let stem = package
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match package.extension() {
        Some(ext) => format!("{}{}.{}", stem, REPATHED_SUFFIX, ext.to_string_lossy()),
        None => format!("{}{}", stem, REPATHED_SUFFIX),
    };
    package.with_file_name(name)
}
