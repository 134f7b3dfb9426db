//! Zip archive writer for code, site and pipeline packages

use crate::error::Result;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use zip::CompressionMethod;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

/// Permission bits given to the archived binary where the host has no mode
#[cfg(any(not(unix), test))]
const EXECUTABLE_MODE: u32 = 0o755;

/// An archive being written to a local file
pub struct ArchiveWriter {
    zip: ZipWriter<File>,
    path: PathBuf,
    entries: usize,
}

impl std::fmt::Debug for ArchiveWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveWriter")
            .field("path", &self.path)
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}

impl ArchiveWriter {
    /// Create (or truncate) the archive at `path`
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        Ok(Self {
            zip: ZipWriter::new(file),
            path: path.to_path_buf(),
            entries: 0,
        })
    }

    /// Path of the archive on disk
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries written so far
    pub fn entries(&self) -> usize {
        self.entries
    }

    fn options() -> SimpleFileOptions {
        SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
    }

    /// Add an entry from an in-memory buffer
    pub fn add_bytes(&mut self, name: &str, data: &[u8]) -> Result<()> {
        self.zip.start_file(name, Self::options())?;
        self.zip.write_all(data)?;
        self.entries += 1;
        Ok(())
    }

    /// Add an entry copied from a local file
    pub fn add_file(&mut self, name: &str, source: &Path) -> Result<()> {
        self.copy_from(name, source, Self::options())
    }

    /// Add a local file as an executable entry
    ///
    /// On Unix the file's own permission bits are carried over; elsewhere
    /// the entry is marked `0755` so it stays runnable once extracted.
    pub fn add_executable(&mut self, name: &str, source: &Path) -> Result<()> {
        let mode = executable_mode(source)?;
        log::debug!("Adding executable {name} (mode: {mode:o})");
        self.copy_from(name, source, Self::options().unix_permissions(mode))
    }

    /// Add every file below `dir`, named `<prefix>/<relative path>`
    pub fn add_dir(&mut self, prefix: &str, dir: &Path) -> Result<usize> {
        let mut added = 0;
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(dir) else {
                continue;
            };
            let relative = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let name = if prefix.is_empty() {
                relative
            } else {
                format!("{}/{relative}", prefix.trim_end_matches('/'))
            };
            self.add_file(&name, entry.path())?;
            added += 1;
        }
        Ok(added)
    }

    fn copy_from(&mut self, name: &str, source: &Path, options: SimpleFileOptions) -> Result<()> {
        let mut input = File::open(source)?;
        self.zip.start_file(name, options)?;
        io::copy(&mut input, &mut self.zip)?;
        self.entries += 1;
        Ok(())
    }

    /// Write the central directory and close the archive
    pub fn finish(self) -> Result<PathBuf> {
        let file = self.zip.finish()?;
        file.sync_all()?;
        log::debug!(
            "Closed archive {} ({} entries)",
            self.path.display(),
            self.entries
        );
        Ok(self.path)
    }
}

#[cfg(unix)]
fn executable_mode(source: &Path) -> Result<u32> {
    use std::os::unix::fs::PermissionsExt;
    Ok(std::fs::metadata(source)?.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn executable_mode(source: &Path) -> Result<u32> {
    std::fs::metadata(source)?;
    Ok(EXECUTABLE_MODE)
}
