//! `_fileSystem` on top of the file system collaborator.
//!
//! Completions report errors as strings; an empty string means success.

use std::sync::Arc;

use blinder_engine::{BridgeResult, EngineSession, EngineValue};

use super::{HostServices, function_arg, string_arg};

pub(super) fn install(
    host: &Arc<HostServices>,
    session: &EngineSession,
    global: &EngineValue,
) -> BridgeResult<()> {
    let file_system = session.new_object()?;

    let read = {
        let host = host.clone();
        session.new_callback(move |args| {
            let path = string_arg(&args, 0)?;
            let callback = function_arg(&args, 1)?;
            let deliver_to = host.clone();
            host.file_system.read(
                &path,
                Box::new(move |result| {
                    deliver_to.deliver(callback, move |session| {
                        let (content, error) = match result {
                            Ok(bytes) => (bytes, String::new()),
                            Err(error) => (Vec::new(), error),
                        };
                        let outcome = session.new_object()?;
                        outcome.set_property("content", content.as_slice())?;
                        outcome.set_property("error", error)?;
                        Ok(vec![outcome])
                    })
                }),
            );
            Ok(None)
        })?
    };

    let write = {
        let host = host.clone();
        session.new_callback(move |args| {
            let path = string_arg(&args, 0)?;
            let content = args
                .get(1)
                .map(EngineValue::as_string_buffer)
                .transpose()?
                .unwrap_or_default();
            let callback = function_arg(&args, 2)?;
            let deliver_to = host.clone();
            host.file_system.write(
                &path,
                content,
                Box::new(move |result| deliver_to.deliver(callback, error_string(result))),
            );
            Ok(None)
        })?
    };

    let move_file = {
        let host = host.clone();
        session.new_callback(move |args| {
            let from = string_arg(&args, 0)?;
            let to = string_arg(&args, 1)?;
            let callback = function_arg(&args, 2)?;
            let deliver_to = host.clone();
            host.file_system.move_file(
                &from,
                &to,
                Box::new(move |result| deliver_to.deliver(callback, error_string(result))),
            );
            Ok(None)
        })?
    };

    let remove = {
        let host = host.clone();
        session.new_callback(move |args| {
            let path = string_arg(&args, 0)?;
            let callback = function_arg(&args, 1)?;
            let deliver_to = host.clone();
            host.file_system.remove(
                &path,
                Box::new(move |result| deliver_to.deliver(callback, error_string(result))),
            );
            Ok(None)
        })?
    };

    file_system.set_property("read", read)?;
    file_system.set_property("write", write)?;
    file_system.set_property("move", move_file)?;
    file_system.set_property("remove", remove)?;
    global.set_property("_fileSystem", file_system)
}

fn error_string(
    result: Result<(), String>,
) -> impl FnOnce(&EngineSession) -> BridgeResult<Vec<EngineValue>> + Send + 'static {
    move |session| {
        let error = result.err().unwrap_or_default();
        Ok(vec![session.new_string(&error)?])
    }
}
