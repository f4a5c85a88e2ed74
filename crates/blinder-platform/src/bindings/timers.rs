//! `setTimeout(fn, ms, ...args)` on top of the timer collaborator.

use std::sync::Arc;
use std::time::Duration;

use blinder_engine::{BridgeResult, EngineSession, EngineValue};

use super::{HostServices, function_arg};

pub(super) fn install(
    host: &Arc<HostServices>,
    session: &EngineSession,
    global: &EngineValue,
) -> BridgeResult<()> {
    let host = host.clone();
    let set_timeout = session.new_callback(move |args| {
        let callback = function_arg(&args, 0)?;
        let delay = match args.get(1) {
            Some(ms) if !ms.is_undefined() => delay_from_ms(ms.as_double()?),
            _ => Duration::ZERO,
        };
        let extra: Vec<EngineValue> = args.into_iter().skip(2).collect();

        let deliver_to = host.clone();
        host.timer.set_timer(
            delay,
            Box::new(move || deliver_to.deliver(callback, move |_| Ok(extra))),
        );
        Ok(None)
    })?;
    global.set_property("setTimeout", set_timeout)
}

/// Negative and non-finite delays fire immediately.
fn delay_from_ms(ms: f64) -> Duration {
    if ms.is_finite() && ms > 0.0 {
        Duration::from_secs_f64(ms / 1000.0)
    } else {
        Duration::ZERO
    }
}
