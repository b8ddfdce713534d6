use anyhow::{Context, Result};
use std::path::Path;
use std::{fs, thread, time::Duration};

/// Attempts made by [`IoUtil::delete_directory`] before giving up.
const DELETE_RETRIES: u32 = 3;

/// File-system helpers for the agent's scratch area.
pub struct IoUtil;

impl IoUtil {
    /// Recursively delete a directory with retry logic.
    ///
    /// A missing directory is not an error. Symlinks are unlinked, never
    /// followed. Transient failures (locked or read-only files) are retried
    /// with a short, growing delay.
    pub fn delete_directory(path: &Path) -> Result<()> {
        let metadata = match fs::symlink_metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to stat '{}'", path.display()))
            }
        };

        if metadata.file_type().is_symlink() || metadata.is_file() {
            return fs::remove_file(path)
                .with_context(|| format!("Failed to remove '{}'", path.display()));
        }

        let mut last_err = None;
        for attempt in 0..DELETE_RETRIES {
            if let Err(e) = Self::remove_readonly_recursive(path) {
                tracing::debug!(
                    "Failed to remove readonly attributes (attempt {}): {}",
                    attempt + 1,
                    e
                );
            }

            match fs::remove_dir_all(path) {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                Err(e) => {
                    last_err = Some(e);
                    if attempt + 1 < DELETE_RETRIES {
                        thread::sleep(Duration::from_millis(100 * (attempt as u64 + 1)));
                    }
                }
            }
        }

        let err = last_err.unwrap_or_else(|| std::io::Error::other("unknown failure"));
        Err(err).with_context(|| {
            format!(
                "Failed to delete directory '{}' after {} retries",
                path.display(),
                DELETE_RETRIES
            )
        })
    }

    /// Make sure `path` exists and is empty, removing anything left behind
    /// by a previous run.
    pub fn empty_directory(path: &Path) -> Result<()> {
        Self::delete_directory(path)?;
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory '{}'", path.display()))
    }

    /// Copy a single file, creating the destination's parent directories.
    /// Permissions travel with the contents.
    pub fn copy_file(source: &Path, destination: &Path) -> Result<u64> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory '{}'", parent.display()))?;
        }
        fs::copy(source, destination).with_context(|| {
            format!(
                "Failed to copy '{}' to '{}'",
                source.display(),
                destination.display()
            )
        })
    }

    /// Whether `path` is a regular file the current user may execute.
    #[cfg(unix)]
    pub fn is_executable(path: &Path) -> bool {
        use std::os::unix::fs::PermissionsExt;
        fs::metadata(path)
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }

    /// Whether `path` is a regular file the current user may execute.
    #[cfg(not(unix))]
    pub fn is_executable(path: &Path) -> bool {
        fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
    }

    fn remove_readonly_recursive(path: &Path) -> Result<()> {
        let meta = fs::symlink_metadata(path)?;
        if meta.file_type().is_symlink() {
            return Ok(());
        }
        if meta.is_dir() {
            for entry in fs::read_dir(path)? {
                Self::remove_readonly_recursive(&entry?.path())?;
            }
        }
        Self::remove_readonly(path)
    }

    fn remove_readonly(path: &Path) -> Result<()> {
        let meta = match fs::metadata(path) {
            Ok(m) => m,
            Err(_) => return Ok(()),
        };
        let mut perms = meta.permissions();
        if perms.readonly() {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                perms.set_mode(perms.mode() | 0o200);
            }
            #[cfg(not(unix))]
            perms.set_readonly(false);
            fs::set_permissions(path, perms)?;
        }
        Ok(())
    }
}
