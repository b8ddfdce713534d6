// Entry-module loading.
//
// Every load stages a private copy of the package's entry module under a
// fresh load token and opens that copy, so a module is never served from a
// cache filled by an earlier package.

mod executable;
mod native;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use action_sdk::{ActionParameters, IoUtil};
use agent_common::constants::layout;

use crate::error::AgentError;
use crate::workspace::Workspace;

pub use executable::{parse_output, ExecutableEntryPoint};
pub use native::NativeEntryPoint;

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Identity of one load, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoadToken(u64);

impl LoadToken {
    /// A token no earlier load has used.
    pub fn next() -> Self {
        LoadToken(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LoadToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cache key: a module path qualified by the load that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoadKey {
    pub module_path: PathBuf,
    pub token: LoadToken,
}

/// How an entry module is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    /// Shared library exporting the `ca_action_*` symbols.
    Native,
    /// Program fed its parameters on stdin.
    Executable,
}

impl ModuleKind {
    /// Candidates in resolution order.
    pub const ALL: [ModuleKind; 2] = [ModuleKind::Native, ModuleKind::Executable];

    /// File name of the entry module of this kind.
    pub fn file_name(self) -> String {
        match self {
            ModuleKind::Native => {
                format!("{}.{}", layout::ENTRY_MODULE, std::env::consts::DLL_EXTENSION)
            }
            ModuleKind::Executable => {
                format!("{}{}", layout::ENTRY_MODULE, std::env::consts::EXE_SUFFIX)
            }
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleKind::Native => write!(f, "native"),
            ModuleKind::Executable => write!(f, "executable"),
        }
    }
}

/// An entry module found in the extracted package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryModule {
    pub kind: ModuleKind,
    pub path: PathBuf,
}

/// Locate the entry module at the root of the extracted tree.
pub fn resolve_entry_module(extract_dir: &Path) -> Result<EntryModule> {
    for kind in ModuleKind::ALL {
        let path = extract_dir.join(kind.file_name());
        if path.is_file() {
            return Ok(EntryModule { kind, path });
        }
    }

    let expected = ModuleKind::ALL
        .iter()
        .map(|k| format!("'{}'", k.file_name()))
        .collect::<Vec<_>>()
        .join(" or ");
    let found = list_files(extract_dir);
    if found.is_empty() {
        anyhow::bail!("Entry module {expected} not found; the package is empty");
    }
    anyhow::bail!(
        "Entry module {expected} not found; package contains: {}",
        found.join(", ")
    )
}

const LISTED_FILES: usize = 20;

fn list_files(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = walkdir::WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            e.path()
                .strip_prefix(root)
                .ok()
                .map(|p| p.to_string_lossy().replace('\\', "/"))
        })
        .collect();
    files.sort();
    if files.len() > LISTED_FILES {
        let more = files.len() - LISTED_FILES;
        files.truncate(LISTED_FILES);
        files.push(format!("... ({more} more)"));
    }
    files
}

/// A loaded entry point, ready to be invoked.
#[async_trait]
pub trait EntryPoint: Send + Sync {
    fn kind(&self) -> ModuleKind;

    /// Run the action with the given parameters and return its result value.
    /// An `Err` carries the action's own failure message.
    async fn invoke(&self, parameters: &ActionParameters) -> Result<Value>;
}

/// Loads entry modules and caches them per [`LoadKey`].
///
/// A load under a new token always stages and opens a fresh copy; entries
/// left by older tokens for the same module path are evicted.
#[derive(Default)]
pub struct ModuleLoader {
    cache: Mutex<HashMap<LoadKey, Arc<dyn EntryPoint>>>,
}

impl ModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the package's entry module for the run identified by `token`.
    pub fn load(
        &self,
        workspace: &Workspace,
        token: LoadToken,
    ) -> Result<Arc<dyn EntryPoint>, AgentError> {
        let extract_dir = workspace.extract_dir();
        let load_error = |source: anyhow::Error| AgentError::Load {
            path: extract_dir.to_path_buf(),
            source: source.into(),
        };

        let module = resolve_entry_module(extract_dir).map_err(load_error)?;
        let key = LoadKey {
            module_path: module.path.clone(),
            token,
        };

        if let Some(entry) = self.cache.lock().get(&key) {
            tracing::debug!("Reusing entry module loaded under token {token}");
            return Ok(entry.clone());
        }

        let entry = stage_and_open(&module, workspace, token).map_err(load_error)?;

        let mut cache = self.cache.lock();
        cache.retain(|k, _| k.module_path != key.module_path || k.token == token);
        cache.insert(key, entry.clone());

        tracing::info!(
            kind = %module.kind,
            "Loaded entry module '{}' under token {token}",
            module.path.display()
        );
        Ok(entry)
    }

    /// Keys currently held, for diagnostics.
    pub fn cached_keys(&self) -> Vec<LoadKey> {
        let mut keys: Vec<LoadKey> = self.cache.lock().keys().cloned().collect();
        keys.sort_by_key(|k| k.token);
        keys
    }
}

fn stage_and_open(
    module: &EntryModule,
    workspace: &Workspace,
    token: LoadToken,
) -> Result<Arc<dyn EntryPoint>> {
    let staged = workspace
        .staging_dir(token)
        .join(module.kind.file_name());
    IoUtil::copy_file(&module.path, &staged)
        .with_context(|| format!("Failed to stage '{}'", module.path.display()))?;

    let entry: Arc<dyn EntryPoint> = match module.kind {
        ModuleKind::Native => Arc::new(NativeEntryPoint::open(&staged)?),
        ModuleKind::Executable => {
            make_executable(&staged)?;
            Arc::new(ExecutableEntryPoint::new(staged, workspace.extract_dir()))
        }
    };
    Ok(entry)
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    if IoUtil::is_executable(path) {
        return Ok(());
    }
    tracing::debug!("Entry module '{}' lacks execute permission, adding it", path.display());
    let mut permissions = std::fs::metadata(path)?.permissions();
    permissions.set_mode(permissions.mode() | 0o755);
    std::fs::set_permissions(path, permissions)
        .with_context(|| format!("Failed to mark '{}' executable", path.display()))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}
