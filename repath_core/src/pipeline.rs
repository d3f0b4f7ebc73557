use std::fs;
use std::path::{Path, PathBuf};

use compat_league::hashtable::HashTables;
use compat_league::wad::WadError;
use compat_league::wad_extract::{self, ExtractReport};
use compat_league::wad_pack::{self, PackReport};
use serde::Serialize;
use thiserror::Error;

use crate::audit::{self, AuditError, AuditReport};
use crate::config::RepathConfig;
use crate::overlay::{self, OverlayReport};
use crate::package::{self, PackageError};
use crate::repair::{self, RepairError, RepairReport};
use crate::repath::{self, RepathError};
use crate::scan::{self, ScanError, ScanSummary};
use crate::source_index::SourceIndex;

pub const EXTRACTED_DIR: &str = "extracted";
pub const MOD_DIR: &str = "mod";
pub const REPATHED_DIR: &str = "repathed";
pub const OUTPUT_DIR: &str = "output";
pub const REPORT_FILE_NAME: &str = "repath_report.json";
const DEFAULT_WAD_NAME: &str = "repathed.wad.client";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("work directory is not empty: {0}")]
    WorkDirNotEmpty(String),
    #[error("package has no archive member")]
    NoWadMember,
    #[error("package has several archive members, pick one of: {}", .0.join(", "))]
    AmbiguousWadMember(Vec<String>),
    #[error(transparent)]
    Repair(#[from] RepairError),
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Package(#[from] PackageError),
    #[error(transparent)]
    Wad(#[from] WadError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Repath(#[from] RepathError),
    #[error(transparent)]
    Audit(#[from] AuditError),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> PipelineError + '_ {
    move |source| PipelineError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipelineInput {
    /// A mod package zip; `member` picks the archive when there are several.
    Package {
        path: PathBuf,
        member: Option<String>,
    },
    Wad(PathBuf),
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct PipelineReport {
    pub archive: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline: Option<ExtractReport>,
    pub extract: ExtractReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlay: Option<OverlayReport>,
    pub source_files: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repair: Option<RepairReport>,
    pub scan: ScanSummary,
    pub rewrite: repath::RewriteReport,
    pub pack: PackReport,
    pub audit: AuditReport,
    pub placeholders: usize,
    pub output_archive: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_package: Option<String>,
}

impl PipelineReport {
    pub fn write_json(&self, path: &Path) -> Result<(), PipelineError> {
        let text = serde_json::to_string_pretty(self).map_err(|err| PipelineError::Io {
            path: path.display().to_string(),
            source: err.into(),
        })?;
        fs::write(path, text).map_err(io_error(path))
    }
}

/// Extract, index, scan, rewrite, repack and audit one archive.
#[derive(Clone, Debug)]
pub struct RepathPipeline {
    pub input: PipelineInput,
    /// Unmodified game archive the mod is laid over before scanning.
    pub baseline: Option<PathBuf>,
    /// Root documents, relative to the extracted tree.
    pub roots: Vec<String>,
    pub work_dir: PathBuf,
    pub config: RepathConfig,
    /// Rebuilt package location; defaults to `<stem>_repathed<.ext>`.
    pub package_out: Option<PathBuf>,
}

impl RepathPipeline {
    pub fn new(input: PipelineInput, roots: Vec<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            input,
            baseline: None,
            roots,
            work_dir: work_dir.into(),
            config: RepathConfig::default(),
            package_out: None,
        }
    }

    pub fn with_config(mut self, config: RepathConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_baseline(mut self, baseline: impl Into<PathBuf>) -> Self {
        self.baseline = Some(baseline.into());
        self
    }

    pub fn extracted_dir(&self) -> PathBuf {
        self.work_dir.join(EXTRACTED_DIR)
    }

    pub fn repathed_dir(&self) -> PathBuf {
        self.work_dir.join(REPATHED_DIR)
    }

    pub fn run(&self, tables: &HashTables) -> Result<PipelineReport, PipelineError> {
        if !repath::is_empty_dir(&self.work_dir).map_err(io_error(&self.work_dir))? {
            return Err(PipelineError::WorkDirNotEmpty(
                self.work_dir.display().to_string(),
            ));
        }
        fs::create_dir_all(&self.work_dir).map_err(io_error(&self.work_dir))?;

        let (archive, member) = self.stage_archive()?;
        let mut report = PipelineReport {
            archive: archive.display().to_string(),
            ..PipelineReport::default()
        };

        let extracted = self.extracted_dir();
        match &self.baseline {
            Some(baseline) => {
                report.baseline = Some(wad_extract::extract_wad(baseline, &extracted, tables)?);
                let mod_dir = self.work_dir.join(MOD_DIR);
                report.extract = wad_extract::extract_wad(&archive, &mod_dir, tables)?;
                report.overlay = Some(
                    overlay::overlay_tree(&mod_dir, &extracted).map_err(io_error(&extracted))?,
                );
            }
            None => report.extract = wad_extract::extract_wad(&archive, &extracted, tables)?,
        }

        let index = SourceIndex::build(&extracted).map_err(io_error(&extracted))?;
        report.source_files = index.len();

        let tree = scan::scan(&self.roots, &index)?;
        report.scan = tree.summary();

        let plan = self.config.relocation_plan();
        let repathed = self.repathed_dir();
        report.rewrite = repath::rewrite(
            &tree,
            &index,
            &plan,
            &repathed,
            self.config.rewrite_options(),
        )?;
        if self.config.repair_documents {
            report.repair = Some(repair::repair_outputs(&self.roots, &index, &repathed)?);
        }

        let segments: Vec<&str> = plan.segments().collect();
        let output_archive = self.output_archive_path(&archive);
        report.pack = wad_pack::pack_dir(&repathed, &output_archive)?;
        report.audit = audit::audit(&repathed, &segments)?;

        if let Some(placeholders) = self.config.placeholders() {
            report.placeholders =
                audit::fill_missing_textures(&report.audit, &repathed, &placeholders);
            if report.placeholders > 0 {
                report.pack = wad_pack::pack_dir(&repathed, &output_archive)?;
                report.audit = audit::audit(&repathed, &segments)?;
            }
        }
        report.output_archive = output_archive.display().to_string();

        if let (PipelineInput::Package { path, .. }, Some(member)) = (&self.input, member) {
            let out = self
                .package_out
                .clone()
                .unwrap_or_else(|| package::repathed_package_name(path));
            let data = fs::read(&output_archive).map_err(io_error(&output_archive))?;
            package::replace_member(path, &member, &data, &out)?;
            report.output_package = Some(out.display().to_string());
        }

        tracing::info!(
            archive = %report.archive,
            output = %report.output_archive,
            missing = report.audit.missing_count(),
            junk = report.audit.junk_files.len(),
            "pipeline complete"
        );
        Ok(report)
    }

    /// Archive to extract, plus the package member it came from.
    fn stage_archive(&self) -> Result<(PathBuf, Option<String>), PipelineError> {
        match &self.input {
            PipelineInput::Wad(path) => Ok((path.clone(), None)),
            PipelineInput::Package { path, member } => {
                let members = package::find_wad_members(path)?;
                let chosen = match member {
                    Some(wanted) => members
                        .iter()
                        .find(|name| {
                            name.replace('\\', "/").eq_ignore_ascii_case(&wanted.replace('\\', "/"))
                        })
                        .cloned()
                        .ok_or_else(|| PackageError::MemberNotFound(wanted.clone()))?,
                    None => match members.as_slice() {
                        [] => return Err(PipelineError::NoWadMember),
                        [only] => only.clone(),
                        _ => return Err(PipelineError::AmbiguousWadMember(members.clone())),
                    },
                };
                let dest = self.work_dir.join(member_file_name(&chosen));
                package::extract_member(path, &chosen, &dest)?;
                Ok((dest, Some(chosen)))
            }
        }
    }

    fn output_archive_path(&self, archive: &Path) -> PathBuf {
        let name = archive
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_WAD_NAME.to_string());
        self.work_dir.join(OUTPUT_DIR).join(name)
    }
}

fn member_file_name(member: &str) -> String {
    member
        .replace('\\', "/")
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_WAD_NAME)
        .to_string()
}
