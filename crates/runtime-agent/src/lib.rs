// runtime-agent: single-shot executor for packaged actions.
//
// One process handles one action: reset the scratch area, report STARTED,
// fetch the package, unpack it, load its entry point, invoke it with the
// collected parameters and report COMPLETED or FAILED.

pub mod error;
pub mod fetcher;
pub mod loader;
pub mod parameters;
pub mod reporter;
pub mod runner;
pub mod unpacker;
pub mod workspace;

pub use error::{AgentError, Stage};
pub use fetcher::{BlobCoordinate, BlobStore, FetchedPackage, LocalBlobStore, S3BlobStore};
pub use loader::{EntryPoint, LoadKey, LoadToken, ModuleKind, ModuleLoader};
pub use parameters::collect_parameters;
pub use reporter::{LifecycleReport, ReportStatus, StatusReporter};
pub use runner::{ActionRunner, RunReport};
pub use unpacker::{ArchiveFormat, UnpackedPackage};
pub use workspace::Workspace;
