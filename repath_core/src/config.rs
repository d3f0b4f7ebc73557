use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audit::PlaceholderTextures;
use crate::repath::{is_valid_segment, RelocationPlan, RewriteOptions, DEFAULT_SEGMENT};

pub const HASH_DIR_ENV: &str = "REPATH_HASH_DIR";
const HASH_DIR_NAME: &str = "hashes";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("config parse failed ({path}): {message}")]
    Parse { path: String, message: String },
    #[error("config is invalid: {}", .0.join("; "))]
    Invalid(Vec<String>),
    #[error("hash table directory not found\n{0}")]
    NoHashDir(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RepathConfig {
    pub segment: String,
    pub ignore_missing: bool,
    pub combine_linked: bool,
    pub hash_dir: Option<PathBuf>,
    pub repair_documents: bool,
    /// Root document path -> segment for entries first seen in it.
    pub segment_overrides: BTreeMap<String, String>,
    pub placeholder_dds: Option<PathBuf>,
    pub placeholder_tex: Option<PathBuf>,
}

impl Default for RepathConfig {
    fn default() -> Self {
        Self {
            segment: DEFAULT_SEGMENT.to_string(),
            ignore_missing: false,
            combine_linked: false,
            hash_dir: None,
            repair_documents: false,
            segment_overrides: BTreeMap::new(),
            placeholder_dds: None,
            placeholder_tex: None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConfigValidation {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ConfigValidation {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

impl RepathConfig {
    pub fn parse_toml(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|err| err.to_string())
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse_toml(&text).map_err(|message| ConfigError::Parse {
            path: path.display().to_string(),
            message,
        })
    }

    /// Validates after all overrides are applied, logging warnings.
    pub fn into_validated(self) -> Result<Self, ConfigError> {
        let validation = self.validate();
        for warning in &validation.warnings {
            tracing::warn!("{}", warning);
        }
        if !validation.is_ok() {
            return Err(ConfigError::Invalid(validation.errors));
        }
        Ok(self)
    }

    pub fn validate(&self) -> ConfigValidation {
        let mut validation = ConfigValidation::default();
        if !is_valid_segment(self.segment.trim()) {
            validation.errors.push(format!(
                "segment {:?} must be a single token of letters, digits, '_' or '-'",
                self.segment
            ));
        }
        for (document, segment) in &self.segment_overrides {
            if document.trim().is_empty() {
                validation
                    .errors
                    .push("segment override document must not be empty".to_string());
            }
            if !is_valid_segment(segment.trim()) {
                validation.errors.push(format!(
                    "segment override {:?} for {} is not a valid segment",
                    segment, document
                ));
            }
        }
        if self.ignore_missing {
            validation
                .warnings
                .push("ignore_missing relocates references that have no source file".to_string());
        }
        if let Some(dir) = &self.hash_dir {
            if !dir.is_dir() {
                validation
                    .warnings
                    .push(format!("hash_dir {} does not exist", dir.display()));
            }
        }
        for placeholder in [&self.placeholder_dds, &self.placeholder_tex].into_iter().flatten() {
            if !placeholder.is_file() {
                validation
                    .warnings
                    .push(format!("placeholder {} does not exist", placeholder.display()));
            }
        }
        validation
    }

    pub fn relocation_plan(&self) -> RelocationPlan {
        self.segment_overrides
            .iter()
            .fold(RelocationPlan::new(&self.segment), |plan, (document, segment)| {
                plan.with_override(document, segment)
            })
    }

    pub fn rewrite_options(&self) -> RewriteOptions {
        RewriteOptions {
            ignore_missing: self.ignore_missing,
            combine_linked: self.combine_linked,
        }
    }

    pub fn placeholders(&self) -> Option<PlaceholderTextures> {
        if self.placeholder_dds.is_none() && self.placeholder_tex.is_none() {
            return None;
        }
        Some(PlaceholderTextures {
            dds: self.placeholder_dds.clone(),
            tex: self.placeholder_tex.clone(),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigSource {
    CliOverride,
    EnvOverride,
    ConfigFile,
    UserConfig,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConfigSource::CliOverride => "cli override",
            ConfigSource::EnvOverride => "env override",
            ConfigSource::ConfigFile => "config file",
            ConfigSource::UserConfig => "user config",
        };
        write!(f, "{}", label)
    }
}

#[derive(Clone, Debug)]
pub struct ResolutionCandidate {
    pub source: ConfigSource,
    pub path: PathBuf,
    pub exists: bool,
}

#[derive(Clone, Debug)]
pub struct ResolvedPath {
    pub path: PathBuf,
    pub source: ConfigSource,
    pub candidates: Vec<ResolutionCandidate>,
}

impl ResolvedPath {
    pub fn describe(&self) -> String {
        format!(
            "hash dir resolved ({}) -> {}\n{}",
            self.source,
            self.path.display(),
            format_candidates(&self.candidates, true)
        )
    }
}

/// Hash table directory: CLI, then `REPATH_HASH_DIR`, then the config file,
/// then `<user config root>/hashes`. The first existing directory wins.
pub fn resolve_hash_dir(
    cli: Option<&Path>,
    config: &RepathConfig,
) -> Result<ResolvedPath, ConfigError> {
    resolve_hash_dir_from(
        cli,
        env::var_os(HASH_DIR_ENV).map(PathBuf::from),
        config,
        &user_config_root(),
    )
}

pub fn resolve_hash_dir_from(
    cli: Option<&Path>,
    env_value: Option<PathBuf>,
    config: &RepathConfig,
    user_root: &Path,
) -> Result<ResolvedPath, ConfigError> {
    let ordered = [
        (ConfigSource::CliOverride, cli.map(Path::to_path_buf)),
        (ConfigSource::EnvOverride, env_value),
        (ConfigSource::ConfigFile, config.hash_dir.clone()),
        (ConfigSource::UserConfig, Some(user_root.join(HASH_DIR_NAME))),
    ];
    let mut candidates = Vec::new();
    for (source, path) in ordered {
        let Some(path) = path else {
            continue;
        };
        let exists = path.is_dir();
        candidates.push(ResolutionCandidate {
            source,
            path: path.clone(),
            exists,
        });
        if exists {
            return Ok(ResolvedPath {
                path,
                source,
                candidates,
            });
        }
    }
    Err(ConfigError::NoHashDir(format_candidates(&candidates, false)))
}

fn format_candidates(candidates: &[ResolutionCandidate], mark_hits: bool) -> String {
    let mut lines = Vec::new();
    for candidate in candidates {
        let hit = if mark_hits && candidate.exists {
            " [hit]"
        } else {
            ""
        };
        lines.push(format!(
            "- {}: {}{}",
            candidate.source,
            candidate.path.display(),
            hit
        ));
    }
    lines.join("\n")
}

pub fn user_config_root() -> PathBuf {
    if let Some(appdata) = env::var_os("APPDATA") {
        return PathBuf::from(appdata).join("Repath");
    }
    if let Some(config) = env::var_os("XDG_CONFIG_HOME") {
        return PathBuf::from(config).join("repath");
    }
    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".config").join("repath");
    }
    PathBuf::from("repath_config")
}
