// Scratch workspace owned by a single action run.

use std::path::{Path, PathBuf};

use action_sdk::IoUtil;
use agent_common::constants::layout;

use crate::error::AgentError;
use crate::loader::LoadToken;

/// Locations used by every stage of a run, all below one scratch root.
///
/// ```text
/// <root>/action       downloaded package archive
/// <root>/extracted/   expanded package tree
/// <root>/modules/     entry modules staged per load token
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
    archive_path: PathBuf,
    extract_dir: PathBuf,
    modules_dir: PathBuf,
}

impl Workspace {
    /// Compute the layout below `root` without touching the disk.
    pub fn layout(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            archive_path: root.join(layout::ARCHIVE_FILE),
            extract_dir: root.join(layout::EXTRACT_DIR),
            modules_dir: root.join(layout::MODULES_DIR),
            root,
        }
    }

    /// Reset the scratch root and return its layout.
    ///
    /// Blocking on purpose: nothing may touch the scratch area before this
    /// returns. Leftovers from a previous run are removed.
    pub fn prepare(root: impl Into<PathBuf>) -> Result<Self, AgentError> {
        let workspace = Self::layout(root);

        IoUtil::empty_directory(&workspace.root)
            .and_then(|_| IoUtil::empty_directory(&workspace.extract_dir))
            .and_then(|_| IoUtil::empty_directory(&workspace.modules_dir))
            .map_err(|e| AgentError::Workspace {
                path: workspace.root.clone(),
                source: e.into(),
            })?;

        tracing::debug!("Workspace ready at '{}'", workspace.root.display());
        Ok(workspace)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    pub fn extract_dir(&self) -> &Path {
        &self.extract_dir
    }

    pub fn modules_dir(&self) -> &Path {
        &self.modules_dir
    }

    /// Directory an entry module is staged into for the given load.
    pub fn staging_dir(&self, token: LoadToken) -> PathBuf {
        self.modules_dir.join(token.to_string())
    }
}
