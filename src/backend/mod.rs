//! Local sandbox backend
//!
//! Implements every collaborator on the local filesystem so a service can be
//! provisioned end to end without a cloud account. State lives under the
//! manifest's `[local] root`, or [`crate::paths::state_dir`] by default.

mod roles;
mod stack;
mod storage;

pub use roles::ConfiguredRoles;
pub use stack::LocalStacks;
pub use storage::DirectoryStore;

use crate::config::Manifest;
use crate::runner::CommandBuild;
use anyhow::{Result, bail};
use provision::{BuildProvider, PrebuiltBinary, Providers, Session};
use std::sync::Arc;

/// Build provider selected by the `[build]` table
fn build_provider(manifest: &Manifest) -> Result<Arc<dyn BuildProvider>> {
    let artifact = manifest.build.artifact.as_deref().map(|a| manifest.resolve(a));
    if !manifest.build.command.is_empty() {
        return Ok(Arc::new(CommandBuild {
            argv: manifest.build.command.clone(),
            artifact,
            working_dir: manifest.base_dir.clone(),
        }));
    }
    match artifact {
        Some(path) => Ok(Arc::new(PrebuiltBinary { path })),
        None => bail!("Manifest has neither build.command nor build.artifact"),
    }
}

/// Collaborators for one run against the local backend
pub fn providers(manifest: &Manifest) -> Result<Providers> {
    let root = manifest.local_root()?;
    log::debug!("Local backend state: {}", root.display());

    let session = Session {
        region: manifest.service.region.clone(),
        profile: manifest.service.profile.clone(),
    };
    Ok(Providers {
        session,
        build: build_provider(manifest)?,
        storage: Arc::new(DirectoryStore::new(&root, manifest.local.buckets.clone())),
        orchestrator: Arc::new(LocalStacks::new(&root)),
        roles: Arc::new(ConfiguredRoles::new(manifest.local.roles.clone())),
    })
}

/// Orchestrator only, for read-only commands
pub fn stacks(manifest: &Manifest) -> Result<LocalStacks> {
    Ok(LocalStacks::new(manifest.local_root()?))
}
