use crate::config::BucketConfig;
use anyhow::{Context, Result, bail};
use provision::ObjectStore;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Object store backed by a local directory tree
///
/// Layout per bucket:
/// - `buckets/<bucket>/objects/<key>`: current object
/// - `buckets/<bucket>/versions/<key>/<id>`: every stored version (versioned buckets only)
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
    buckets: BTreeMap<String, BucketConfig>,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>, buckets: BTreeMap<String, BucketConfig>) -> Self {
        Self {
            root: root.into(),
            buckets,
        }
    }

    fn bucket(&self, bucket: &str) -> Result<&BucketConfig> {
        self.buckets
            .get(bucket)
            .with_context(|| format!("Bucket not found: {bucket}"))
    }

    fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.root.join("buckets").join(bucket)
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        Ok(self.bucket_dir(bucket).join("objects").join(checked_key(key)?))
    }

    fn versions_dir(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        Ok(self.bucket_dir(bucket).join("versions").join(checked_key(key)?))
    }

    /// Restore the newest remaining version as the current object
    fn restore_latest(&self, bucket: &str, key: &str) -> Result<()> {
        let object = self.object_path(bucket, key)?;
        let versions = self.versions_dir(bucket, key)?;
        let latest = match fs::read_dir(&versions) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .filter_map(|e| {
                    let modified = e.metadata().and_then(|m| m.modified()).ok()?;
                    Some((modified, e.path()))
                })
                .max_by_key(|(modified, _)| *modified)
                .map(|(_, path)| path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        match latest {
            Some(path) => {
                fs::copy(&path, &object)?;
            }
            None => remove_if_present(&object)?,
        }
        Ok(())
    }
}

/// Reject keys that would escape the bucket directory
fn checked_key(key: &str) -> Result<&Path> {
    let path = Path::new(key);
    if key.is_empty()
        || path.is_absolute()
        || path
            .components()
            .any(|c| !matches!(c, std::path::Component::Normal(_)))
    {
        bail!("Invalid object key: {key}");
    }
    Ok(path)
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}

fn version_id(content: &[u8]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(content);
    let now = chrono::Utc::now();
    hasher.update(&now.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
    hasher.finalize().to_hex()[..20].to_string()
}

impl ObjectStore for DirectoryStore {
    fn upload(&self, local_path: &Path, bucket: &str, key: &str) -> Result<String> {
        let config = self.bucket(bucket)?;
        let content = fs::read(local_path)
            .with_context(|| format!("Could not read {}", local_path.display()))?;

        let object = self.object_path(bucket, key)?;
        if let Some(parent) = object.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&object, &content)?;
        log::debug!("Stored {} bytes at {}", content.len(), object.display());

        let location = format!("s3://{bucket}/{key}");
        if !config.versioning {
            return Ok(location);
        }

        let id = version_id(&content);
        let versions = self.versions_dir(bucket, key)?;
        fs::create_dir_all(&versions)?;
        fs::write(versions.join(&id), &content)?;
        Ok(format!("{location}?versionId={id}"))
    }

    fn delete(&self, bucket: &str, key: &str, version: Option<&str>) -> Result<()> {
        self.bucket(bucket)?;
        match version {
            Some(id) => {
                let versions = self.versions_dir(bucket, key)?;
                remove_if_present(&versions.join(checked_key(id)?))?;
                self.restore_latest(bucket, key)
            }
            None => remove_if_present(&self.object_path(bucket, key)?),
        }
    }

    fn versioning_enabled(&self, bucket: &str) -> Result<bool> {
        Ok(self.bucket(bucket)?.versioning)
    }

    fn bucket_region(&self, bucket: &str) -> Result<String> {
        Ok(self.bucket(bucket)?.region.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provision::UploadLocation;

    fn store(root: &Path, versioning: bool) -> DirectoryStore {
        let mut buckets = BTreeMap::new();
        buckets.insert(
            "artifacts".to_string(),
            BucketConfig {
                region: "eu-west-1".into(),
                versioning,
            },
        );
        DirectoryStore::new(root, buckets)
    }

    #[test]
    fn test_unversioned_upload_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("code.zip");
        fs::write(&local, b"zip").unwrap();
        let store = store(&dir.path().join("state"), false);

        let location = store.upload(&local, "artifacts", "svc/code.zip").unwrap();
        assert_eq!(location, "s3://artifacts/svc/code.zip");
        let object = store.object_path("artifacts", "svc/code.zip").unwrap();
        assert_eq!(fs::read(&object).unwrap(), b"zip");

        store.delete("artifacts", "svc/code.zip", None).unwrap();
        assert!(!object.exists());
        // Deleting again is fine
        store.delete("artifacts", "svc/code.zip", None).unwrap();
    }

    #[test]
    fn test_versioned_delete_restores_previous() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("code.zip");
        let store = store(&dir.path().join("state"), true);

        fs::write(&local, b"first").unwrap();
        let first = store.upload(&local, "artifacts", "svc/code.zip").unwrap();
        assert!(UploadLocation::parse(&first).unwrap().version.is_some());

        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::write(&local, b"second").unwrap();
        let second = store.upload(&local, "artifacts", "svc/code.zip").unwrap();
        let second = UploadLocation::parse(&second).unwrap();
        assert_eq!(second.key, "svc/code.zip");

        store
            .delete("artifacts", "svc/code.zip", second.version())
            .unwrap();
        let object = store.object_path("artifacts", "svc/code.zip").unwrap();
        assert_eq!(fs::read(object).unwrap(), b"first");
    }

    #[test]
    fn test_unknown_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), false);
        let err = store.bucket_region("missing").unwrap_err();
        assert!(err.to_string().contains("Bucket not found"));
        assert_eq!(store.bucket_region("artifacts").unwrap(), "eu-west-1");
    }

    #[test]
    fn test_rejects_escaping_keys() {
        assert!(checked_key("../etc/passwd").is_err());
        assert!(checked_key("/abs").is_err());
        assert!(checked_key("").is_err());
        assert!(checked_key("svc/code.zip").is_ok());
    }
}
