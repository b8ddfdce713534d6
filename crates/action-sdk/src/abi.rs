// Native entry-point contract shared by the agent and by action packages.
//
// A native action is a `cdylib` named `index.<dylib ext>` that exports three
// C symbols. Parameters travel in as a JSON object of strings and the result
// travels back as a JSON envelope, both as NUL-terminated UTF-8 strings.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::panic::{self, UnwindSafe};

/// Version of the native calling convention. Bumped on incompatible changes.
pub const ABI_VERSION: u32 = 1;

/// `extern "C" fn() -> u32`
pub const ABI_VERSION_SYMBOL: &[u8] = b"ca_action_abi_version\0";

/// `extern "C" fn(params: *const c_char) -> *mut c_char`
pub const INVOKE_SYMBOL: &[u8] = b"ca_action_invoke\0";

/// `extern "C" fn(result: *mut c_char)`
pub const FREE_SYMBOL: &[u8] = b"ca_action_free\0";

pub type AbiVersionFn = unsafe extern "C" fn() -> u32;
pub type InvokeFn = unsafe extern "C" fn(*const c_char) -> *mut c_char;
pub type FreeFn = unsafe extern "C" fn(*mut c_char);

/// Invocation parameters handed to an entry point, keyed by parameter name.
pub type ActionParameters = BTreeMap<String, String>;

/// Result envelope returned across the native boundary.
///
/// Serialized as `{"ok": <value>}` or `{"error": "<message>"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionEnvelope {
    Ok(Value),
    Error(String),
}

impl ActionEnvelope {
    /// Convert into a `Result`, the error side carrying the action's message.
    pub fn into_result(self) -> Result<Value, String> {
        match self {
            ActionEnvelope::Ok(value) => Ok(value),
            ActionEnvelope::Error(message) => Err(message),
        }
    }
}

impl From<Result<Value, String>> for ActionEnvelope {
    fn from(result: Result<Value, String>) -> Self {
        match result {
            Ok(value) => ActionEnvelope::Ok(value),
            Err(message) => ActionEnvelope::Error(message),
        }
    }
}

/// Decode an envelope produced by [`invoke_with`].
pub fn decode_envelope(json: &str) -> Result<ActionEnvelope, serde_json::Error> {
    serde_json::from_str(json)
}

/// Action-side body of `ca_action_invoke`.
///
/// Decodes the parameters, runs `handler` and encodes its outcome. Panics in
/// the handler are caught and reported as error envelopes so they never
/// unwind across the C boundary.
///
/// # Safety
///
/// `params` must be null or point to a valid NUL-terminated string that stays
/// alive for the duration of the call.
pub unsafe fn invoke_with<F>(params: *const c_char, handler: F) -> *mut c_char
where
    F: FnOnce(ActionParameters) -> Result<Value, String> + UnwindSafe,
{
    let envelope = match decode_parameters(params) {
        Ok(parameters) => match panic::catch_unwind(move || handler(parameters)) {
            Ok(result) => ActionEnvelope::from(result),
            Err(payload) => ActionEnvelope::Error(panic_message(payload.as_ref())),
        },
        Err(message) => ActionEnvelope::Error(message),
    };

    encode_envelope(&envelope).into_raw()
}

/// Action-side body of `ca_action_free`.
///
/// # Safety
///
/// `result` must be null or a pointer previously returned by [`invoke_with`]
/// that has not been freed yet.
pub unsafe fn free_result(result: *mut c_char) {
    if !result.is_null() {
        drop(CString::from_raw(result));
    }
}

unsafe fn decode_parameters(params: *const c_char) -> Result<ActionParameters, String> {
    if params.is_null() {
        return Ok(ActionParameters::new());
    }
    let raw = CStr::from_ptr(params)
        .to_str()
        .map_err(|e| format!("parameters are not valid UTF-8: {e}"))?;
    serde_json::from_str(raw).map_err(|e| format!("parameters are not a JSON object of strings: {e}"))
}

fn encode_envelope(envelope: &ActionEnvelope) -> CString {
    // serde_json escapes NUL inside strings, so the output never contains one.
    let json = serde_json::to_string(envelope)
        .unwrap_or_else(|e| format!(r#"{{"error":"failed to encode result: {e}"}}"#));
    CString::new(json).unwrap_or_else(|_| {
        CString::new(r#"{"error":"result contained an interior NUL byte"}"#)
            .unwrap_or_default()
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("action panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("action panicked: {s}")
    } else {
        "action panicked".to_string()
    }
}

/// Export a function as the package's native entry point.
///
/// The function takes [`ActionParameters`] and returns
/// `Result<serde_json::Value, E>` for any `E: Display`.
///
/// ```ignore
/// fn sum(params: action_sdk::ActionParameters) -> Result<serde_json::Value, String> {
///     let a: i64 = params["A"].parse().map_err(|e| format!("{e}"))?;
///     let b: i64 = params["B"].parse().map_err(|e| format!("{e}"))?;
///     Ok(serde_json::json!({ "sum": a + b }))
/// }
///
/// action_sdk::export_action!(sum);
/// ```
#[macro_export]
macro_rules! export_action {
    ($handler:path) => {
        #[no_mangle]
        pub extern "C" fn ca_action_abi_version() -> u32 {
            $crate::abi::ABI_VERSION
        }

        #[no_mangle]
        pub unsafe extern "C" fn ca_action_invoke(
            params: *const ::std::os::raw::c_char,
        ) -> *mut ::std::os::raw::c_char {
            $crate::abi::invoke_with(params, |parameters| {
                $handler(parameters).map_err(|e| e.to_string())
            })
        }

        #[no_mangle]
        pub unsafe extern "C" fn ca_action_free(result: *mut ::std::os::raw::c_char) {
            $crate::abi::free_result(result)
        }
    };
}
