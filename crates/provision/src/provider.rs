//! Collaborator traits
//!
//! The engine never talks to a build toolchain, object store or
//! orchestration service directly. Callers hand it a [`Providers`] bundle,
//! which lets the same workflow drive a real cloud account, a local sandbox
//! or test doubles.

use crate::template::Template;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Session handle shared by every collaborator call of one run
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Session {
    /// Active region of the session
    pub region: String,
    /// Optional named credentials profile
    pub profile: Option<String>,
}

impl Session {
    /// Create a session for a region
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            profile: None,
        }
    }
}

/// Inputs for compiling the deployable binary
#[derive(Debug, Clone)]
pub struct BuildRequest<'a> {
    pub service_name: &'a str,
    /// Path of the executable to produce
    pub output: &'a Path,
    /// Link against native system libraries
    pub native_deps: bool,
    pub build_id: &'a str,
    pub build_tags: Option<&'a str>,
    pub link_flags: Option<&'a str>,
    pub dry_run: bool,
}

/// Compiles the deployable binary for the target execution platform
pub trait BuildProvider: Send + Sync {
    fn compile(&self, request: &BuildRequest<'_>) -> Result<()>;
}

/// Object storage for code archives, site archives and templates
pub trait ObjectStore: Send + Sync {
    /// Upload a local file, returning the object's location URL
    fn upload(&self, local_path: &Path, bucket: &str, key: &str) -> Result<String>;

    /// Delete an uploaded object; the undo action of [`ObjectStore::upload`]
    fn delete(&self, bucket: &str, key: &str, version: Option<&str>) -> Result<()>;

    /// Check if the bucket keeps multiple object versions
    fn versioning_enabled(&self, bucket: &str) -> Result<bool>;

    /// Region the bucket lives in
    fn bucket_region(&self, bucket: &str) -> Result<String>;
}

/// One entry of a computed change-set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceChange {
    /// `Add`, `Modify`, `Remove`, ...
    pub action: String,
    pub resource_type: String,
    pub logical_id: String,
    #[serde(default)]
    pub physical_id: Option<String>,
}

/// Description of a live stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackDescriptor {
    pub name: String,
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
}

/// A full create-or-update convergence request
#[derive(Debug, Clone)]
pub struct ConvergeRequest<'a> {
    pub stack_name: &'a str,
    pub template: &'a Template,
    pub template_url: &'a str,
    pub tags: &'a BTreeMap<String, String>,
    pub start_time: SystemTime,
    pub timeout: Duration,
}

/// Direct code update of one existing function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeUpdate {
    pub function_id: String,
    pub bucket: String,
    pub key: String,
    pub version: Option<String>,
}

/// The remote orchestration service that owns stacks
pub trait Orchestrator: Send + Sync {
    /// Compute the changes `template` would make to the live stack
    fn compute_change_set(
        &self,
        change_set_name: &str,
        stack_name: &str,
        template: &Template,
        template_url: &str,
    ) -> Result<Vec<ResourceChange>>;

    /// Discard a computed change-set
    fn delete_change_set(&self, stack_name: &str, change_set_name: &str) -> Result<()>;

    /// Create or update the stack and wait for it to settle
    fn converge_stack(&self, request: &ConvergeRequest<'_>) -> Result<StackDescriptor>;

    /// Describe the live stack
    fn describe_stack(&self, stack_name: &str) -> Result<StackDescriptor>;

    /// Push new code to an existing function
    fn update_function_code(&self, update: &CodeUpdate) -> Result<()>;
}

/// Looks up pre-existing roles by name
pub trait RoleDirectory: Send + Sync {
    /// ARN of the named role; errors if it is missing or inaccessible
    fn role_arn(&self, name: &str) -> Result<String>;
}

/// The collaborators one provisioning run talks to
#[derive(Clone)]
pub struct Providers {
    pub session: Session,
    pub build: Arc<dyn BuildProvider>,
    pub storage: Arc<dyn ObjectStore>,
    pub orchestrator: Arc<dyn Orchestrator>,
    pub roles: Arc<dyn RoleDirectory>,
}

/// Build provider that expects the binary to already exist
///
/// Useful when the binary is produced by an outer build system.
#[derive(Debug, Clone)]
pub struct PrebuiltBinary {
    pub path: PathBuf,
}

impl BuildProvider for PrebuiltBinary {
    fn compile(&self, request: &BuildRequest<'_>) -> Result<()> {
        if !self.path.is_file() {
            anyhow::bail!("prebuilt binary not found: {}", self.path.display());
        }
        if self.path != request.output {
            std::fs::copy(&self.path, request.output)?;
        }
        Ok(())
    }
}
