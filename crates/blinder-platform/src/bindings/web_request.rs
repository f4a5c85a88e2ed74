//! `_webRequest.GET(url, headers, cb)` on top of the web request collaborator.

use std::sync::Arc;

use blinder_engine::{BridgeResult, EngineSession, EngineValue};

use super::{HostServices, function_arg, string_arg};
use crate::collaborators::ServerResponse;

pub(super) fn install(
    host: &Arc<HostServices>,
    session: &EngineSession,
    global: &EngineValue,
) -> BridgeResult<()> {
    let web_request = session.new_object()?;
    let host = host.clone();
    let get = session.new_callback(move |args| {
        let url = string_arg(&args, 0)?;
        let headers = match args.get(1) {
            Some(headers) => request_headers(headers)?,
            None => Vec::new(),
        };
        let callback = function_arg(&args, 2)?;
        let deliver_to = host.clone();
        host.web_request.get(
            &url,
            headers,
            Box::new(move |response| {
                deliver_to.deliver(callback, move |session| {
                    Ok(vec![response_object(session, &response)?])
                })
            }),
        );
        Ok(None)
    })?;
    web_request.set_property("GET", get)?;
    global.set_property("_webRequest", web_request)
}

/// Headers arrive either as `[[name, value], ...]` or as a plain object.
fn request_headers(headers: &EngineValue) -> BridgeResult<Vec<(String, String)>> {
    if headers.is_undefined() || headers.is_null() {
        return Ok(Vec::new());
    }
    if headers.is_array() {
        let mut pairs = Vec::new();
        for pair in headers.as_list()? {
            let mut parts = pair.as_list()?.into_iter();
            if let (Some(name), Some(value)) = (parts.next(), parts.next()) {
                pairs.push((name.as_string()?, value.as_string()?));
            }
        }
        return Ok(pairs);
    }
    headers
        .get_own_property_names()?
        .into_iter()
        .map(|name| {
            let value = headers.get_property(&name)?.as_string()?;
            Ok((name, value))
        })
        .collect()
}

fn response_object(session: &EngineSession, response: &ServerResponse) -> BridgeResult<EngineValue> {
    let headers = session.new_object()?;
    for (name, value) in &response.response_headers {
        headers.set_property(name, value.as_str())?;
    }
    let object = session.new_object()?;
    object.set_property("status", i64::from(response.status.code()))?;
    object.set_property("responseStatus", i64::from(response.response_status))?;
    object.set_property("responseHeaders", headers)?;
    object.set_property("responseText", response.response_text.as_str())?;
    Ok(object)
}
