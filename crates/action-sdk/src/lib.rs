// action-sdk: Foundation layer for the runtime agent.
// This crate has ZERO dependencies on other workspace crates. Action authors
// depend on it to export an entry point; the agent depends on it to load one.

pub mod abi;
pub mod io_util;
pub mod process_invoker;

// Re-export commonly used items at crate root
pub use abi::{ActionEnvelope, ActionParameters, ABI_VERSION};
pub use io_util::IoUtil;
pub use process_invoker::{ProcessExitCodeError, ProcessInvoker, ProcessOutput, ProcessRequest};
