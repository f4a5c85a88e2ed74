//! The script `console` object.
//!
//! Every method formats its arguments into one line and passes it to the
//! process-wide handler. Without a custom handler, lines go to `tracing`
//! under target `blinder::script`.

use std::sync::Arc;

use blinder_engine::{BridgeResult, EngineSession, EngineValue};
use parking_lot::{RwLock, const_rwlock};
use tracing::{debug, error, info, warn};

const SCRIPT_TARGET: &str = "blinder::script";

/// Severity of a console line, one per `console` method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleLevel {
    Log,
    Info,
    Debug,
    Warn,
    Error,
}

impl ConsoleLevel {
    pub const ALL: [ConsoleLevel; 5] = [
        ConsoleLevel::Log,
        ConsoleLevel::Info,
        ConsoleLevel::Debug,
        ConsoleLevel::Warn,
        ConsoleLevel::Error,
    ];

    /// Name of the `console` method.
    pub fn method_name(self) -> &'static str {
        match self {
            ConsoleLevel::Log => "log",
            ConsoleLevel::Info => "info",
            ConsoleLevel::Debug => "debug",
            ConsoleLevel::Warn => "warn",
            ConsoleLevel::Error => "error",
        }
    }
}

type Handler = Arc<dyn Fn(ConsoleLevel, &str) + Send + Sync + 'static>;

/// `None` selects [`log_to_tracing`].
static HANDLER: RwLock<Option<Handler>> = const_rwlock(None);

/// Route console output of every session to `handler`.
pub fn set_console_handler(handler: impl Fn(ConsoleLevel, &str) + Send + Sync + 'static) {
    *HANDLER.write() = Some(Arc::new(handler));
}

pub fn reset_console_handler() {
    *HANDLER.write() = None;
}

fn log_to_tracing(level: ConsoleLevel, line: &str) {
    match level {
        ConsoleLevel::Log | ConsoleLevel::Info => info!(target: SCRIPT_TARGET, "{line}"),
        ConsoleLevel::Debug => debug!(target: SCRIPT_TARGET, "{line}"),
        ConsoleLevel::Warn => warn!(target: SCRIPT_TARGET, "{line}"),
        ConsoleLevel::Error => error!(target: SCRIPT_TARGET, "{line}"),
    }
}

fn emit(level: ConsoleLevel, line: &str) {
    // Cloned out so a handler may replace itself.
    let handler = HANDLER.read().clone();
    match handler {
        Some(handler) => handler(level, line),
        None => log_to_tracing(level, line),
    }
}

pub(super) fn install(session: &EngineSession, global: &EngineValue) -> BridgeResult<()> {
    let console = session.new_object()?;
    for level in ConsoleLevel::ALL {
        let method = session.new_callback(move |args| {
            emit(level, &format_console_args(&args));
            Ok(None)
        })?;
        console.set_property(level.method_name(), method)?;
    }
    global.set_property("console", console)
}

/// Objects print as JSON, everything else by string conversion.
fn format_console_args(args: &[EngineValue]) -> String {
    let parts: Vec<String> = args
        .iter()
        .map(|value| {
            if value.is_object() && !value.is_function() {
                if let Ok(json) = value.to_json() {
                    if !json.is_null() {
                        return json.to_string();
                    }
                }
            }
            value
                .as_string()
                .unwrap_or_else(|_| "[object]".to_string())
        })
        .collect();
    parts.join(" ")
}
