//! Artifact naming policy and parsed upload locations

use percent_encoding::percent_decode_str;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use url::Url;

/// Disambiguates keys salted within the same clock tick
static SALT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Return the object key to upload to, given the default key
///
/// Buckets with versioning keep the stable default key, since older
/// revisions stay reachable by version id. Without versioning every upload
/// gets a fresh key with a time-salted hash inserted before the extension,
/// so anything referencing the object by key sees a new value.
pub fn version_aware_key(default_key: &str, versioning_enabled: bool) -> String {
    if versioning_enabled {
        return default_key.to_string();
    }

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let sequence = SALT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    salted_key(default_key, &format!("{nanos}-{sequence}"))
}

/// Insert `-<hash(default_key, salt)>` before the extension of `default_key`
pub fn salted_key(default_key: &str, salt: &str) -> String {
    let (prefix, extension) = split_extension(default_key);
    let digest = blake3::hash(format!("{default_key}-{salt}").as_bytes());
    let key = format!("{prefix}-{}{extension}", digest.to_hex());

    log::debug!(
        "Created unique object key {key} (default: {default_key}, extension: {extension:?})"
    );
    key
}

/// Split `dir/name.ext` into (`dir/name`, `.ext`)
fn split_extension(key: &str) -> (&str, &str) {
    let name_start = key.rfind('/').map_or(0, |i| i + 1);
    match key[name_start..].rfind('.') {
        Some(dot) if dot > 0 => key.split_at(name_start + dot),
        _ => (key, ""),
    }
}

/// Location URL reported for an upload that was skipped in dry-run mode
pub fn synthetic_location(bucket: &str, key: &str) -> String {
    format!("https://{bucket}-s3.amazonaws.com/{key}")
}

/// A stored object reference parsed from the location URL an upload returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadLocation {
    /// The full location URL as returned by the object store
    pub location: String,
    /// Object key (URL path without the leading slash)
    pub key: String,
    /// Object version, when the bucket keeps versions
    pub version: Option<String>,
}

impl UploadLocation {
    /// Parse a location URL such as `https://host/dir/key.zip?versionId=abc`
    ///
    /// Returns `None` unless the string has a scheme, a host and a key.
    pub fn parse(location: &str) -> Option<Self> {
        let url = Url::parse(location).ok()?;
        if url.host_str().is_none_or(str::is_empty) {
            return None;
        }
        let key = percent_decode_str(url.path().trim_start_matches('/'))
            .decode_utf8_lossy()
            .into_owned();
        if key.is_empty() {
            return None;
        }

        let values: Vec<String> = url
            .query_pairs()
            .filter(|(name, _)| name == "versionId")
            .map(|(_, value)| value.into_owned())
            .collect();
        // Only an unambiguous single value counts
        let version = match <[String; 1]>::try_from(values) {
            Ok([single]) if !single.is_empty() => Some(single),
            _ => None,
        };

        Some(Self {
            location: location.to_string(),
            key,
            version,
        })
    }

    /// Object version as a plain string slice
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }
}
