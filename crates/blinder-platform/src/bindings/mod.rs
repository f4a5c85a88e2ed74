//! Host objects installed into the script global.
//!
//! Each binding is a native callback made with
//! [`EngineSession::new_callback`]. Script callbacks handed to a collaborator
//! are kept as [`EngineValue`]s and called back through the executor, so
//! collaborator threads never enter the engine.

pub mod console;
mod fs;
mod timers;
mod web_request;

use std::sync::Arc;

use blinder_engine::{BridgeError, BridgeResult, EngineSession, EngineValue, WeakEngineSession};
use tracing::{debug, warn};

use crate::collaborators::{FileSystem, Timer, WebRequest};
use crate::config::AppInfo;
use crate::executor::Executor;

pub use console::{ConsoleLevel, reset_console_handler, set_console_handler};

/// Collaborators reachable from the bindings.
pub(crate) struct HostServices {
    pub session: WeakEngineSession,
    pub executor: Arc<dyn Executor>,
    pub file_system: Arc<dyn FileSystem>,
    pub web_request: Arc<dyn WebRequest>,
    pub timer: Arc<dyn Timer>,
}

impl HostServices {
    /// Call `callback` on the executor with the arguments built by `args`.
    ///
    /// Silently dropped when the executor is stopped or the session is gone.
    pub fn deliver<A>(&self, callback: EngineValue, args: A)
    where
        A: FnOnce(&EngineSession) -> BridgeResult<Vec<EngineValue>> + Send + 'static,
    {
        let session = self.session.clone();
        let task = Box::new(move || {
            let Some(session) = session.upgrade() else {
                debug!("engine session gone; script callback dropped");
                return;
            };
            let result = args(&session).and_then(|args| callback.call(&args));
            if let Err(error) = result {
                warn!(%error, "script callback failed");
            }
        });
        if self.executor.dispatch(task).is_err() {
            debug!("executor stopped; script callback dropped");
        }
    }
}

/// Install every host object into the session's global.
pub(crate) fn install(host: &Arc<HostServices>, session: &EngineSession, app_info: &AppInfo) -> BridgeResult<()> {
    let global = session.global()?;
    console::install(session, &global)?;
    timers::install(host, session, &global)?;
    fs::install(host, session, &global)?;
    web_request::install(host, session, &global)?;
    install_app_info(session, &global, app_info)
}

fn install_app_info(session: &EngineSession, global: &EngineValue, app_info: &AppInfo) -> BridgeResult<()> {
    let info = session.from_json(&serde_json::to_value(app_info)?)?;
    let freeze = session
        .global()?
        .get_property("Object")?
        .get_property("freeze")?;
    let frozen = freeze.call(&[info])?;
    global.set_property("_appInfo", frozen)
}

/// Short description of a value's shape, for argument errors.
pub(crate) fn describe(value: &EngineValue) -> &'static str {
    if value.is_undefined() {
        "undefined"
    } else if value.is_null() {
        "null"
    } else if value.is_function() {
        "function"
    } else if value.is_array() {
        "array"
    } else if value.is_object() {
        "object"
    } else if value.is_string() {
        "string"
    } else if value.is_number() {
        "number"
    } else if value.is_bool() {
        "boolean"
    } else {
        "value"
    }
}

/// The argument at `index`, which must be a function.
pub(crate) fn function_arg(args: &[EngineValue], index: usize) -> BridgeResult<EngineValue> {
    match args.get(index) {
        Some(arg) if arg.is_function() => Ok(arg.clone()),
        Some(arg) => Err(BridgeError::type_error("a function", describe(arg))),
        None => Err(BridgeError::type_error("a function", "undefined")),
    }
}

/// The argument at `index`, converted to a string.
pub(crate) fn string_arg(args: &[EngineValue], index: usize) -> BridgeResult<String> {
    match args.get(index) {
        Some(arg) if !arg.is_undefined() && !arg.is_null() => arg.as_string(),
        Some(arg) => Err(BridgeError::type_error("a string", describe(arg))),
        None => Err(BridgeError::type_error("a string", "undefined")),
    }
}
