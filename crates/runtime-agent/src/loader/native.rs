use std::ffi::{CStr, CString};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use libloading::Library;
use serde_json::Value;

use action_sdk::abi::{
    self, AbiVersionFn, FreeFn, InvokeFn, ABI_VERSION_SYMBOL, FREE_SYMBOL, INVOKE_SYMBOL,
};
use action_sdk::{ActionParameters, ABI_VERSION};

use super::{EntryPoint, ModuleKind};

/// Entry point exported by a shared library through `export_action!`.
pub struct NativeEntryPoint {
    path: PathBuf,
    // Keeps the code behind `invoke`/`free` mapped.
    library: Option<Arc<Library>>,
    invoke: InvokeFn,
    free: FreeFn,
}

impl NativeEntryPoint {
    /// Open the library at `path` and resolve its exports.
    pub fn open(path: &Path) -> Result<Self> {
        // SAFETY: loading runs the library's initialisers; packages are
        // trusted code by the time they reach the agent.
        let library = unsafe { Library::new(path) }
            .with_context(|| format!("Failed to open shared library '{}'", path.display()))?;

        // SAFETY: symbol types match the declarations in `action_sdk::abi`.
        let (version, invoke, free) = unsafe {
            let version = library
                .get::<AbiVersionFn>(ABI_VERSION_SYMBOL)
                .context("Library does not export 'ca_action_abi_version'")?;
            let invoke = *library
                .get::<InvokeFn>(INVOKE_SYMBOL)
                .context("Library does not export 'ca_action_invoke'")?;
            let free = *library
                .get::<FreeFn>(FREE_SYMBOL)
                .context("Library does not export 'ca_action_free'")?;
            (version(), invoke, free)
        };

        if version != ABI_VERSION {
            anyhow::bail!(
                "Library '{}' implements action ABI version {version}, expected {ABI_VERSION}",
                path.display()
            );
        }

        Ok(Self {
            path: path.to_path_buf(),
            library: Some(Arc::new(library)),
            invoke,
            free,
        })
    }

    /// Wrap entry functions that are already linked into the process.
    ///
    /// # Safety
    ///
    /// `invoke` and `free` must follow the `ca_action_invoke`/`ca_action_free`
    /// contract and stay valid for the lifetime of the returned value.
    pub unsafe fn from_raw(invoke: InvokeFn, free: FreeFn) -> Self {
        Self {
            path: PathBuf::from("<linked>"),
            library: None,
            invoke,
            free,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EntryPoint for NativeEntryPoint {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Native
    }

    async fn invoke(&self, parameters: &ActionParameters) -> Result<Value> {
        let input = CString::new(serde_json::to_string(parameters)?)
            .context("Parameters contain a NUL byte")?;
        let library = self.library.clone();
        let (invoke, free) = (self.invoke, self.free);

        let raw = tokio::task::spawn_blocking(move || {
            let _library = library;
            // SAFETY: `input` outlives the call, and the result pointer is
            // released through the library's own `free` exactly once.
            unsafe {
                let result = invoke(input.as_ptr());
                if result.is_null() {
                    return Err(anyhow::anyhow!("Entry point returned no result"));
                }
                let text = CStr::from_ptr(result).to_string_lossy().into_owned();
                free(result);
                Ok(text)
            }
        })
        .await
        .context("Entry point task panicked")??;

        let envelope = abi::decode_envelope(&raw)
            .with_context(|| format!("Entry point returned a malformed result: {raw}"))?;
        envelope.into_result().map_err(anyhow::Error::msg)
    }
}
