//! Script-side helpers installed once per session.
//!
//! Some questions are easier to ask from script than through the native API:
//! whether an object is a boxed primitive, the name of its constructor, its own
//! enumerable keys, and a string with unpaired surrogates replaced by U+FFFD. The helpers live in a frozen object that is pinned by
//! the session and never exposed on the global object.

use rquickjs::{Object, Persistent, Value};

use crate::error::BridgeResult;
use crate::scope::ContextScope;

const SOURCE: &str = r#"(() => {
  "use strict";
  const accepts = (method, value) => {
    try {
      method.call(value);
      return true;
    } catch (_) {
      return false;
    }
  };
  const tag = Object.prototype.toString;
  return Object.freeze({
    boxedKind(value) {
      if (value === null || typeof value !== "object") return "";
      if (accepts(String.prototype.valueOf, value)) return "string";
      if (accepts(Number.prototype.valueOf, value)) return "number";
      if (accepts(Boolean.prototype.valueOf, value)) return "boolean";
      return "";
    },
    className(object) {
      const ctor = object.constructor;
      if (typeof ctor === "function" && typeof ctor.name === "string" && ctor.name !== "") {
        return ctor.name;
      }
      return tag.call(object).slice(8, -1);
    },
    ownNames(object) {
      return Object.keys(object);
    },
    wellFormed(text) {
      return text.replace(/[\uD800-\uDBFF](?![\uDC00-\uDFFF])|(?<![\uD800-\uDBFF])[\uDC00-\uDFFF]/g, "\uFFFD");
    },
  });
})()"#;

/// Primitive wrapped by a boxed object (`new String("x")` and friends).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BoxedKind {
    String,
    Number,
    Bool,
}

pub(crate) fn install(scope: &ContextScope<'_>) -> BridgeResult<()> {
    let helpers: Object = scope.ctx().eval(SOURCE).map_err(|e| scope.capture(e))?;
    scope
        .inner()
        .set_intrinsics(Persistent::save(scope.ctx(), helpers))
}

pub(crate) fn boxed_kind<'js>(
    scope: &ContextScope<'js>,
    value: &Value<'js>,
) -> BridgeResult<Option<BoxedKind>> {
    if !value.is_object() {
        return Ok(None);
    }
    let kind: String = scope
        .intrinsic("boxedKind")?
        .call((value.clone(),))
        .map_err(|e| scope.capture(e))?;
    Ok(match kind.as_str() {
        "string" => Some(BoxedKind::String),
        "number" => Some(BoxedKind::Number),
        "boolean" => Some(BoxedKind::Bool),
        _ => None,
    })
}

pub(crate) fn class_name<'js>(scope: &ContextScope<'js>, object: &Value<'js>) -> BridgeResult<String> {
    scope
        .intrinsic("className")?
        .call((object.clone(),))
        .map_err(|e| scope.capture(e))
}

pub(crate) fn own_names<'js>(
    scope: &ContextScope<'js>,
    object: &Value<'js>,
) -> BridgeResult<Vec<String>> {
    scope
        .intrinsic("ownNames")?
        .call((object.clone(),))
        .map_err(|e| scope.capture(e))
}

pub(crate) fn well_formed<'js>(
    scope: &ContextScope<'js>,
    text: rquickjs::String<'js>,
) -> BridgeResult<String> {
    scope
        .intrinsic("wellFormed")?
        .call((text,))
        .map_err(|e| scope.capture(e))
}
