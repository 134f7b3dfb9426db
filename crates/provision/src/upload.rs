//! Artifact uploads
//!
//! Upload tasks only talk to the object store and report what they did. The
//! controlling thread registers rollbacks and cleanups for the successful
//! ones afterwards, then fails the step if any task failed.

use crate::archive::ArchiveWriter;
use crate::artifact::{UploadLocation, synthetic_location, version_aware_key};
use crate::context::WorkflowContext;
use crate::error::{Error, Result};
use crate::provider::ObjectStore;
use crate::task::{Task, run_all, task};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One artifact to put into the bucket
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub local_path: PathBuf,
    pub default_key: String,
}

/// Result of one upload task
#[derive(Debug, Clone)]
pub struct Uploaded {
    pub local_path: PathBuf,
    pub location: UploadLocation,
    /// False when the upload was skipped in dry-run mode
    pub stored: bool,
}

/// Upload one local file under a version-aware key
///
/// In dry-run mode nothing is sent; the location is synthesized from the
/// bucket and the key that would have been used.
pub fn upload_artifact(
    storage: &dyn ObjectStore,
    bucket: &str,
    request: &UploadRequest,
    versioning_enabled: bool,
    dry_run: bool,
) -> Result<Uploaded> {
    let key = version_aware_key(&request.default_key, versioning_enabled);

    let (location, stored) = if dry_run {
        log::info!(
            "Dry run: skipping upload of {} to s3://{bucket}/{key}",
            request.local_path.display()
        );
        (synthetic_location(bucket, &key), false)
    } else {
        let size = std::fs::metadata(&request.local_path).map_or(0, |m| m.len());
        log::info!(
            "Uploading {} ({size} bytes) to s3://{bucket}/{key}",
            request.local_path.display()
        );
        let location = storage
            .upload(&request.local_path, bucket, &key)
            .map_err(|e| Error::remote(format!("upload of {key}"), e))?;
        (location, true)
    };

    let location = UploadLocation::parse(&location).ok_or_else(|| {
        Error::remote(
            format!("upload of {key}"),
            anyhow::anyhow!("object store returned an invalid location: {location}"),
        )
    })?;

    Ok(Uploaded {
        local_path: request.local_path.clone(),
        location,
        stored,
    })
}

/// Register the undo action of a finished upload
///
/// Local files are cleaned up by whoever created them, so a skipped upload
/// registers nothing.
pub fn register_upload(ctx: &mut WorkflowContext, uploaded: &Uploaded) {
    if !uploaded.stored {
        return;
    }
    let storage = Arc::clone(&ctx.providers.storage);
    let bucket = ctx.input.bucket.clone();
    let key = uploaded.location.key.clone();
    let version = uploaded.location.version.clone();
    ctx.transaction
        .register_rollback(format!("delete s3://{bucket}/{key}"), move || {
            storage.delete(&bucket, &key, version.as_deref())
        });
}

/// Package the static site directory into `path`
fn package_site(resources_dir: &Path, prefix: &str, path: &Path) -> Result<()> {
    let mut archive = ArchiveWriter::create(path)?;
    let count = archive.add_dir(prefix, resources_dir)?;
    archive.finish()?;
    log::info!("Packaged {count} site file(s) from {}", resources_dir.display());
    Ok(())
}

/// Upload the code archive and, when configured, the site archive
pub(crate) fn create_upload(ctx: &mut WorkflowContext) -> Result<()> {
    let package_path = ctx
        .state
        .package_path
        .clone()
        .ok_or(Error::MissingArtifact("code archive"))?;
    let code = UploadRequest {
        default_key: ctx.default_key(&file_name(&package_path)),
        local_path: package_path,
    };

    let site = ctx.input.site.as_ref().map(|site| {
        let path = ctx
            .input
            .scratch_dir
            .join(format!("{}-site.zip", ctx.input.service_name));
        (site.resources_dir.clone(), site.prefix.clone(), UploadRequest {
            default_key: ctx.default_key(&file_name(&path)),
            local_path: path,
        })
    });
    if let Some((_, _, request)) = &site {
        ctx.transaction
            .register_file_cleanup(request.local_path.clone());
    }

    let storage = ctx.providers.storage.as_ref();
    let bucket = ctx.input.bucket.as_str();
    let versioning = ctx.state.versioning_enabled;
    let dry_run = ctx.input.dry_run;

    let mut tasks: Vec<Task<'_, Uploaded, Error>> = vec![task(|| {
        upload_artifact(storage, bucket, &code, versioning, dry_run)
    })];
    if let Some((resources_dir, prefix, request)) = &site {
        tasks.push(task(move || {
            package_site(resources_dir, prefix, &request.local_path)?;
            upload_artifact(storage, bucket, request, versioning, dry_run)
        }));
    }

    let outcome = run_all(tasks)?;
    let total = outcome.len();
    let mut results = outcome.results.into_iter();
    let code_upload = results.next().flatten();
    let site_upload = results.next().flatten();

    for uploaded in code_upload.iter().chain(site_upload.iter()) {
        register_upload(ctx, uploaded);
    }
    if !outcome.failures.is_empty() {
        return Err(Error::Tasks {
            operation: "upload",
            total,
            failures: outcome.failures,
        });
    }

    ctx.state.code_upload = code_upload.map(|u| u.location);
    ctx.state.site_upload = site_upload.map(|u| u.location);
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
