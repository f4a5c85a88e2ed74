//! Narrow interfaces to the host environment, with default backends.
//!
//! Every collaborator completes through a callback and never calls back while
//! holding engine state; script-facing delivery is done by the host bindings.

pub mod fs;
pub mod resources;
pub mod timer;
pub mod web_request;

pub use fs::{DefaultFileSystem, FileSystem};
pub use resources::{DirectoryResources, EmbeddedResources, ResourceReader};
pub use timer::{DefaultTimer, Timer};
pub use web_request::{DefaultWebRequest, NetworkStatus, ServerResponse, WebRequest};
