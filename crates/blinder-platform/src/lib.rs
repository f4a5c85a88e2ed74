//! Platform services for the blinder filter engine.
//!
//! A [`Platform`] owns the engine session, the collaborators script talks to
//! (file system, web requests, timers, bootstrap resources) and the executor
//! that runs construction and callback delivery off the caller's thread.
//!
//! # Example
//!
//! ```no_run
//! use blinder_platform::{ContentType, Platform, PlatformConfig};
//!
//! let platform = Platform::new(PlatformConfig::default().base_path("resources"))?;
//! let engine = platform.filter_engine()?;
//! let hit = engine.matches(
//!     "https://ads.example.com/banner.png",
//!     ContentType::Image,
//!     Some("https://example.com/"),
//!     None,
//!     false,
//! )?;
//! println!("{hit:?}");
//! # Ok::<(), blinder_platform::PlatformError>(())
//! ```

pub mod bindings;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod executor;
pub mod filter_engine;
pub mod platform;
pub mod shared;

pub use bindings::{ConsoleLevel, reset_console_handler, set_console_handler};
pub use collaborators::{
    DefaultFileSystem, DefaultTimer, DefaultWebRequest, DirectoryResources, EmbeddedResources,
    FileSystem, NetworkStatus, ResourceReader, ServerResponse, Timer, WebRequest,
};
pub use config::{
    AppInfo, BooleanPrefName, FilterEngineParams, PlatformConfig, PreconfiguredPrefs,
    StringPrefName,
};
pub use error::{BridgeError, BridgeResult, PlatformError, PlatformResult};
pub use executor::{
    Executor, ExecutorStats, ExecutorStatsSnapshot, Rejected, Task, ThreadPoolExecutor,
    ThreadPoolExecutorBuilder,
};
pub use filter_engine::{
    ContentType, ContentTypeMask, EmulationSelector, Filter, FilterEngine, FilterType,
};
pub use platform::{FilterEngineCallback, FilterEngineState, Platform, PlatformBuilder};
pub use shared::{Outcome, SharedOutcome};

pub use blinder_engine::{EngineSession, EngineValue, SessionOptions};
