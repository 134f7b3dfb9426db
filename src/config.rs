//! Service manifest (`stackup.toml`)

use crate::paths;
use anyhow::{Context, Result, bail};
use provision::{FunctionSpec, PipelineEnvironments};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub service: ServiceConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default, rename = "function")]
    pub functions: Vec<FunctionSpec>,
    #[serde(default)]
    pub site: Option<SiteConfig>,
    #[serde(default)]
    pub pipeline: Option<PipelineConfig>,
    #[serde(default)]
    pub local: LocalConfig,

    /// Directory holding the manifest; relative paths resolve against it
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub scratch_dir: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub binary_name: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Build command argv; the output path arrives in `STACKUP_OUTPUT`
    #[serde(default)]
    pub command: Vec<String>,
    /// Path of the produced binary, when the command doesn't honor `STACKUP_OUTPUT`
    #[serde(default)]
    pub artifact: Option<String>,
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default)]
    pub link_flags: Option<String>,
    #[serde(default)]
    pub native_deps: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    pub resources_dir: String,
    #[serde(default)]
    pub prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub trigger: String,
    #[serde(default)]
    pub environments: PipelineEnvironments,
}

/// Settings of the local sandbox backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Backend state root; defaults to [`paths::state_dir`]
    #[serde(default)]
    pub root: Option<String>,
    #[serde(default)]
    pub buckets: BTreeMap<String, BucketConfig>,
    /// Pre-existing roles, name to ARN
    #[serde(default)]
    pub roles: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketConfig {
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub versioning: bool,
}

impl Manifest {
    /// Load and validate a manifest file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let mut manifest = Self::parse(&content)
            .with_context(|| format!("Invalid manifest {}", path.display()))?;
        manifest.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        log::debug!("Loaded manifest for service {}", manifest.service.name);
        Ok(manifest)
    }

    /// Parse and validate manifest text
    pub fn parse(content: &str) -> Result<Self> {
        let manifest: Self = toml::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<()> {
        if self.service.name.trim().is_empty() {
            bail!("service.name must not be empty");
        }
        if self.service.bucket.trim().is_empty() {
            bail!("service.bucket must not be empty");
        }
        let mut seen = std::collections::BTreeSet::new();
        for function in &self.functions {
            if !seen.insert(function.name.as_str()) {
                bail!("duplicate function name: {}", function.name);
            }
        }
        if let Some(pipeline) = &self.pipeline {
            if pipeline.trigger.trim().is_empty() {
                bail!("pipeline.trigger must not be empty");
            }
            // Mismatched environment keys only warn, at provision time
        }
        Ok(())
    }

    /// Resolve a manifest-relative path
    pub fn resolve(&self, path: &str) -> PathBuf {
        paths::resolve(&self.base_dir, path)
    }

    /// Directory for build outputs and archives
    pub fn scratch_dir(&self) -> PathBuf {
        match &self.service.scratch_dir {
            Some(dir) => self.resolve(dir),
            None => self.base_dir.join(".stackup"),
        }
    }

    /// Root of the local backend state
    pub fn local_root(&self) -> Result<PathBuf> {
        match &self.local.root {
            Some(root) => Ok(self.resolve(root)),
            None => paths::state_dir(),
        }
    }
}
