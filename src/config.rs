use crate::pattern::MatcherSet;
use anyhow::{Context as _, Result};
use regex::Regex;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use time::macros::format_description;
use time::Date;

pub const APP_DIR: &str = "custodian";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("no [[roots]] configured")]
    NoRoots,
    #[error("scan_path must be an absolute path, got {0:?}")]
    ScanPathNotAbsolute(PathBuf),
    #[error("recycle_bin_path must be an absolute path, got {0:?}")]
    RecyclePathNotAbsolute(PathBuf),
    #[error("relative_path must be an absolute path, got {0:?}")]
    RelativePathNotAbsolute(PathBuf),
    #[error("invalid reorganize_template {0:?}: only /{{year}}, /{{month}} and /{{day}} segments are allowed")]
    BadTemplate(String),
    #[error("invalid permission string {0:?}: expected octal digits like \"664\" or \"0o664\"")]
    BadPermission(String),
    #[error("invalid date_threshold {0:?}: expected YYYY-MM-DD")]
    BadDateThreshold(String),
    #[error("invalid pattern {pattern:?}")]
    BadPattern {
        pattern: String,
        source: regex::Error,
    },
    #[error("the ownership action requires owner_user and owner_group")]
    OwnerNamesMissing,
    #[error("unknown user {0:?}")]
    UnknownUser(String),
    #[error("unknown group {0:?}")]
    UnknownGroup(String),
    #[error("concurrency must be between 1 and 10, got {0}")]
    BadConcurrency(usize),
}

/// Analyzer toggles, in the order the pipeline runs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    PreCleanup,
    Duplicates,
    Orphans,
    Reorganize,
    Permissions,
    Ownership,
    PostCleanup,
}

impl ActionKind {
    fn all() -> Vec<ActionKind> {
        vec![
            ActionKind::PreCleanup,
            ActionKind::Duplicates,
            ActionKind::Orphans,
            ActionKind::Reorganize,
            ActionKind::Permissions,
            ActionKind::Ownership,
            ActionKind::PostCleanup,
        ]
    }
}

/// One `[[roots]]` table as it appears in the TOML file, before validation.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRoot {
    scan_path: PathBuf,
    relative_path: Option<PathBuf>,
    recycle_bin_path: PathBuf,
    #[serde(default = "default_template")]
    reorganize_template: String,
    #[serde(default = "default_hash_byte_limit")]
    hash_byte_limit: u64,
    #[serde(default = "default_dupe_set_extensions")]
    dupe_set_extensions: Vec<String>,
    #[serde(default = "default_orphan_file_extensions")]
    orphan_file_extensions: Vec<String>,
    #[serde(default = "default_date_threshold")]
    date_threshold: String,
    #[serde(default)]
    empty_threshold: u64,
    #[serde(default = "default_ignore_directories")]
    ignore_directories: Vec<String>,
    #[serde(default = "default_ignore_files")]
    ignore_files: Vec<String>,
    #[serde(default = "default_remove_files")]
    remove_files: Vec<String>,
    #[serde(default = "default_file_perm")]
    file_perm: String,
    #[serde(default = "default_dir_perm")]
    dir_perm: String,
    owner_user: Option<String>,
    owner_group: Option<String>,
    #[serde(default = "default_concurrency")]
    concurrency: usize,
    #[serde(default = "ActionKind::all")]
    actions: Vec<ActionKind>,
}

impl RawRoot {
    fn defaults(scan_path: PathBuf, recycle_bin_path: PathBuf) -> Self {
        Self {
            scan_path,
            relative_path: None,
            recycle_bin_path,
            reorganize_template: default_template(),
            hash_byte_limit: default_hash_byte_limit(),
            dupe_set_extensions: default_dupe_set_extensions(),
            orphan_file_extensions: default_orphan_file_extensions(),
            date_threshold: default_date_threshold(),
            empty_threshold: 0,
            ignore_directories: default_ignore_directories(),
            ignore_files: default_ignore_files(),
            remove_files: default_remove_files(),
            file_perm: default_file_perm(),
            dir_perm: default_dir_perm(),
            owner_user: None,
            owner_group: None,
            concurrency: default_concurrency(),
            actions: ActionKind::all(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    roots: Vec<RawRoot>,
}

/// A validated per-root configuration; everything analyzers need, pre-compiled.
#[derive(Debug, Clone)]
pub struct RootConfig {
    pub scan_path: PathBuf,
    pub relative_path: PathBuf,
    pub recycle_bin_path: PathBuf,
    pub reorganize_template: String,
    pub hash_byte_limit: u64,
    /// Master extensions for filesets, lower-cased without the dot.
    pub dupe_set_extensions: Vec<String>,
    /// Legacy knob for a future extension-filter orphan mode.
    pub orphan_file_extensions: Vec<String>,
    pub date_threshold: Date,
    pub empty_threshold: u64,
    pub ignore_directories: MatcherSet,
    pub ignore_files: MatcherSet,
    pub remove_files: MatcherSet,
    pub file_perm: u32,
    pub dir_perm: u32,
    pub owner_user: Option<String>,
    pub owner_group: Option<String>,
    pub concurrency: usize,
    pub actions: Vec<ActionKind>,
}

impl RootConfig {
    pub fn action_enabled(&self, action: ActionKind) -> bool {
        self.actions.contains(&action)
    }

    /// A config with every default, for tests and programmatic use.
    pub fn with_defaults(scan_path: PathBuf, recycle_bin_path: PathBuf) -> Self {
        Self::from_raw(RawRoot::defaults(scan_path, recycle_bin_path))
            .expect("default configuration is valid")
    }

    fn from_raw(raw: RawRoot) -> Result<Self, ConfigError> {
        if !raw.scan_path.is_absolute() {
            return Err(ConfigError::ScanPathNotAbsolute(raw.scan_path));
        }
        if !raw.recycle_bin_path.is_absolute() {
            return Err(ConfigError::RecyclePathNotAbsolute(raw.recycle_bin_path));
        }
        let relative_path = match raw.relative_path {
            Some(p) if !p.is_absolute() => return Err(ConfigError::RelativePathNotAbsolute(p)),
            Some(p) => p,
            None => raw.scan_path.clone(),
        };
        validate_template(&raw.reorganize_template)?;
        let date_threshold = parse_date(&raw.date_threshold)
            .ok_or_else(|| ConfigError::BadDateThreshold(raw.date_threshold.clone()))?;
        if raw.concurrency < 1 || raw.concurrency > 10 {
            return Err(ConfigError::BadConcurrency(raw.concurrency));
        }
        if raw.actions.contains(&ActionKind::Ownership)
            && (raw.owner_user.is_none() || raw.owner_group.is_none())
        {
            return Err(ConfigError::OwnerNamesMissing);
        }
        Ok(Self {
            scan_path: raw.scan_path,
            relative_path,
            recycle_bin_path: raw.recycle_bin_path,
            reorganize_template: raw.reorganize_template,
            hash_byte_limit: raw.hash_byte_limit,
            dupe_set_extensions: normalize_extensions(raw.dupe_set_extensions),
            orphan_file_extensions: normalize_extensions(raw.orphan_file_extensions),
            date_threshold,
            empty_threshold: raw.empty_threshold,
            ignore_directories: build_matchers(raw.ignore_directories)?,
            ignore_files: build_matchers(raw.ignore_files)?,
            remove_files: build_matchers(raw.remove_files)?,
            file_perm: parse_mode(&raw.file_perm)?,
            dir_perm: parse_mode(&raw.dir_perm)?,
            owner_user: raw.owner_user,
            owner_group: raw.owner_group,
            concurrency: raw.concurrency,
            actions: raw.actions,
        })
    }
}

#[derive(Debug)]
pub struct Config {
    pub roots: Vec<RootConfig>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(text)?;
        if raw.roots.is_empty() {
            return Err(ConfigError::NoRoots.into());
        }
        let roots = raw
            .roots
            .into_iter()
            .map(RootConfig::from_raw)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { roots })
    }

    /// `custodian.toml` next to the invocation, else the per-user config dir.
    pub fn default_location() -> PathBuf {
        let local = PathBuf::from("custodian.toml");
        if local.exists() {
            return local;
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }
}

/// Accepts "664" and "0o664"; values above 0o777 are rejected.
pub fn parse_mode(s: &str) -> Result<u32, ConfigError> {
    let digits = s.strip_prefix("0o").unwrap_or(s);
    match u32::from_str_radix(digits, 8) {
        Ok(mode) if mode <= 0o777 => Ok(mode),
        _ => Err(ConfigError::BadPermission(s.to_string())),
    }
}

fn validate_template(template: &str) -> Result<(), ConfigError> {
    let re = Regex::new(r"^(?:/\{(?:year|month|day)\})+/?$").expect("template pattern compiles");
    if re.is_match(template) {
        Ok(())
    } else {
        Err(ConfigError::BadTemplate(template.to_string()))
    }
}

fn parse_date(s: &str) -> Option<Date> {
    let fd = format_description!("[year]-[month]-[day]");
    Date::parse(s, &fd).ok()
}

fn build_matchers(patterns: Vec<String>) -> Result<MatcherSet, ConfigError> {
    MatcherSet::new(&patterns).map_err(|source| ConfigError::BadPattern {
        pattern: patterns.join(", "),
        source,
    })
}

fn normalize_extensions(exts: Vec<String>) -> Vec<String> {
    exts.into_iter()
        .map(|e| e.trim_start_matches('.').to_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

fn default_template() -> String {
    "/{year}/{month}/".to_string()
}
fn default_hash_byte_limit() -> u64 {
    131072
}
fn default_dupe_set_extensions() -> Vec<String> {
    vec!["jpg", "jpeg", "mp4", "avi"].into_iter().map(String::from).collect()
}
fn default_orphan_file_extensions() -> Vec<String> {
    vec![".aae", ".xml", ".ini"].into_iter().map(String::from).collect()
}
fn default_date_threshold() -> String {
    "1995-01-01".to_string()
}
fn default_ignore_directories() -> Vec<String> {
    vec!["@eaDir", "@*"].into_iter().map(String::from).collect()
}
fn default_ignore_files() -> Vec<String> {
    vec!["*.ini".to_string()]
}
fn default_remove_files() -> Vec<String> {
    vec!["*picasa.ini", "Thumbs.db"].into_iter().map(String::from).collect()
}
fn default_file_perm() -> String {
    "664".to_string()
}
fn default_dir_perm() -> String {
    "775".to_string()
}
fn default_concurrency() -> usize {
    5
}
