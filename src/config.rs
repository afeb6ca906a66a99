//! TOML configuration parsing and validation.
//!
//! A single file (default `./skillpack.toml`) describes where state and
//! output live, how documents are chunked and hashed, the version bump
//! policy, and one `[packages.<name>]` table per skill package.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use skillpack_core::{ChunkConfig, NormalizationPolicy, StreamingChunker, VersionPolicy};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub chunking: ChunkConfig,
    #[serde(default)]
    pub hashing: HashingConfig,
    #[serde(default)]
    pub versioning: VersionPolicy,
    #[serde(default)]
    pub update: UpdateConfig,
    #[serde(default)]
    pub packages: BTreeMap<String, PackageConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkspaceConfig {
    /// Manifests and lock files, one directory per package.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Written packages, `<output_dir>/<package>/<version>/`.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            output_dir: default_output_dir(),
        }
    }
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("./.skillpack")
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("./dist")
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct HashingConfig {
    #[serde(default)]
    pub normalization: NormalizationPolicy,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct UpdateConfig {
    /// Abort the whole update on the first unreadable document instead of
    /// skipping it.
    #[serde(default)]
    pub strict: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PackageConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    /// Tags attached to every document of the package. Changing them is a
    /// metadata-only change (patch bump).
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.md".to_string(),
        "**/*.mdx".to_string(),
        "**/*.txt".to_string(),
        "**/*.rst".to_string(),
    ]
}

impl Config {
    /// Defaults for every section and no packages. Used by commands that
    /// work without a config file.
    pub fn minimal() -> Self {
        Self::default()
    }

    pub fn package(&self, name: &str) -> Result<&PackageConfig> {
        self.packages.get(name).ok_or_else(|| {
            let known: Vec<&str> = self.packages.keys().map(String::as_str).collect();
            anyhow::anyhow!(
                "Unknown package: '{}'. Configured packages: {}",
                name,
                if known.is_empty() {
                    "(none)".to_string()
                } else {
                    known.join(", ")
                }
            )
        })
    }

    /// Build the chunker described by `[chunking]`.
    pub fn chunker(&self) -> Result<StreamingChunker> {
        StreamingChunker::new(self.chunking).context("Invalid [chunking] configuration")
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Relative paths are resolved against the config file's directory.
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    config.workspace.state_dir = resolve(base, &config.workspace.state_dir);
    config.workspace.output_dir = resolve(base, &config.workspace.output_dir);
    for package in config.packages.values_mut() {
        package.root = resolve(base, &package.root);
    }

    validate(&config)?;
    Ok(config)
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

pub fn validate(config: &Config) -> Result<()> {
    config.chunker()?;

    config
        .versioning
        .validate()
        .context("Invalid [versioning] configuration")?;

    for name in config.packages.keys() {
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            || name.starts_with('.')
        {
            bail!(
                "Invalid package name '{}': use letters, digits, '-', '_' or '.'",
                name
            );
        }
    }

    Ok(())
}
