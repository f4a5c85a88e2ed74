//! Context scopes.
//!
//! A [`ContextScope`] is the only way to reach engine-native values. The
//! outermost scope on a thread takes the runtime lock through
//! `Context::with`; nested scopes for the same session on the same thread
//! reuse the outer context instead of locking again. The thread's stack of
//! entered sessions is restored on every exit path, panics included.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;

use rquickjs::convert::Coerced;
use rquickjs::{Ctx, Function, Object, Persistent, Type, Value};
use tracing::warn;

use crate::error::{BridgeError, BridgeResult};
use crate::session::{EngineSession, SessionInner};
use crate::value::EngineValue;

struct Entered {
    session: u64,
    ctx: *const (),
}

thread_local! {
    static ENTERED: RefCell<Vec<Entered>> = const { RefCell::new(Vec::new()) };
}

fn push_entered(session: u64, ctx: *const ()) {
    ENTERED.with(|stack| stack.borrow_mut().push(Entered { session, ctx }));
}

fn pop_entered() {
    ENTERED.with(|stack| {
        stack.borrow_mut().pop();
    });
}

fn entered_ctx(session: u64) -> Option<*const ()> {
    ENTERED.with(|stack| {
        stack
            .borrow()
            .iter()
            .rev()
            .find(|entry| entry.session == session)
            .map(|entry| entry.ctx)
    })
}

/// Whether the current thread is inside a scope of the given session.
pub(crate) fn is_entered(session: u64) -> bool {
    entered_ctx(session).is_some()
}

/// Depth of the current thread's scope stack, across all sessions.
pub fn entered_depth() -> usize {
    ENTERED.with(|stack| stack.borrow().len())
}

/// Run `f` inside a scope of `session`.
pub(crate) fn enter<F, R>(session: &Arc<SessionInner>, f: F) -> BridgeResult<R>
where
    F: for<'js> FnOnce(&ContextScope<'js>) -> BridgeResult<R> + Send,
    R: Send,
{
    if let Some(raw) = entered_ctx(session.id) {
        // SAFETY: `raw` was pushed by an enclosing scope on this thread and
        // points at a `Ctx` that outlives that scope's closure. This call
        // returns before the enclosing closure can, so the pointee is alive.
        let outer = unsafe { &*(raw as *const Ctx<'static>) };
        let scope = ContextScope::new(outer.clone(), session.clone());
        return f(&scope);
    }

    let guard = session.core.read_recursive();
    let core = guard.as_ref().ok_or(BridgeError::EngineGone)?;
    let result = core.context.with(|ctx| {
        push_entered(session.id, &ctx as *const Ctx<'_> as *const ());
        scopeguard::defer! { pop_entered(); }
        let scope = ContextScope::new(ctx.clone(), session.clone());
        f(&scope)
    });
    drain_jobs(session.id, &core.runtime);
    result
}

/// Run `f` inside a scope built from a context handed to a native function.
pub(crate) fn enter_native<'js, R>(
    session: &Arc<SessionInner>,
    ctx: &Ctx<'js>,
    f: impl FnOnce(&ContextScope<'js>) -> R,
) -> R {
    push_entered(session.id, ctx as *const Ctx<'js> as *const ());
    scopeguard::defer! { pop_entered(); }
    let scope = ContextScope::new(ctx.clone(), session.clone());
    f(&scope)
}

fn drain_jobs(session: u64, runtime: &rquickjs::Runtime) {
    loop {
        match runtime.execute_pending_job() {
            Ok(true) => {}
            Ok(false) => break,
            Err(_) => warn!(session, "pending script job raised an uncaught exception"),
        }
    }
}

/// An entered execution context of one session.
///
/// Only obtainable through [`EngineSession::enter`] or
/// [`EngineSession::scope_from_native`]; it cannot leave the thread that
/// entered it.
pub struct ContextScope<'js> {
    ctx: Ctx<'js>,
    session: Arc<SessionInner>,
    _not_send: PhantomData<*mut ()>,
}

impl<'js> ContextScope<'js> {
    fn new(ctx: Ctx<'js>, session: Arc<SessionInner>) -> Self {
        Self {
            ctx,
            session,
            _not_send: PhantomData,
        }
    }

    /// The raw engine context.
    pub fn ctx(&self) -> &Ctx<'js> {
        &self.ctx
    }

    /// The session this scope belongs to.
    pub fn session(&self) -> EngineSession {
        EngineSession::from_inner(self.session.clone())
    }

    /// The global object of the bound context.
    pub fn global(&self) -> Object<'js> {
        self.ctx.globals()
    }

    /// Promote a transient value to a lifetime-bound [`EngineValue`].
    pub fn adopt(&self, value: Value<'js>) -> BridgeResult<EngineValue> {
        let persistent = Persistent::save(&self.ctx, value);
        let id = self.session.store(persistent)?;
        Ok(EngineValue::from_parts(self.session.clone(), id))
    }

    /// Bring an [`EngineValue`] back into this context.
    pub fn restore(&self, value: &EngineValue) -> BridgeResult<Value<'js>> {
        match value.session_id() {
            Some(id) if id == self.session.id => {}
            Some(_) => {
                return Err(BridgeError::internal(
                    "value belongs to a different engine session",
                ));
            }
            None => return Err(BridgeError::internal("value handle was released")),
        }
        self.restore_slot(value.slot())
    }

    pub(crate) fn restore_slot(&self, slot: u64) -> BridgeResult<Value<'js>> {
        let persistent = self.session.load(slot)?;
        Ok(persistent.restore(&self.ctx)?)
    }

    pub(crate) fn inner(&self) -> &Arc<SessionInner> {
        &self.session
    }

    /// Turn an engine error into a structured bridge error, consuming any
    /// pending script exception.
    pub fn capture(&self, error: rquickjs::Error) -> BridgeError {
        if !matches!(error, rquickjs::Error::Exception) {
            return error.into();
        }
        exception_to_error(&self.ctx.catch())
    }

    /// Like [`capture`](Self::capture) but reported as a failed coercion.
    pub(crate) fn conversion(&self, target: &'static str, error: rquickjs::Error) -> BridgeError {
        let message = match self.capture(error) {
            BridgeError::ScriptExecution {
                error_type,
                message,
                ..
            } => format!("{error_type}: {message}"),
            other => other.to_string(),
        };
        BridgeError::conversion(target, message)
    }

    /// Look up one of the session's helper functions.
    pub(crate) fn intrinsic(&self, name: &str) -> BridgeResult<Function<'js>> {
        let helpers = self.session.intrinsics()?.restore(&self.ctx)?;
        helpers.get(name).map_err(|e| self.capture(e))
    }

    /// `JSON.stringify(value)`; `None` when the value has no JSON form.
    pub fn json_stringify(&self, value: Value<'js>) -> BridgeResult<Option<String>> {
        let json: Object = self.global().get("JSON").map_err(|e| self.capture(e))?;
        let stringify: Function = json.get("stringify").map_err(|e| self.capture(e))?;
        stringify.call((value,)).map_err(|e| self.capture(e))
    }

    /// `JSON.parse(text)`.
    pub fn json_parse(&self, text: &str) -> BridgeResult<Value<'js>> {
        let json: Object = self.global().get("JSON").map_err(|e| self.capture(e))?;
        let parse: Function = json.get("parse").map_err(|e| self.capture(e))?;
        parse.call((text,)).map_err(|e| self.capture(e))
    }
}

fn string_property(object: &Object<'_>, key: &str) -> Option<String> {
    object
        .get::<_, Option<Coerced<String>>>(key)
        .ok()
        .flatten()
        .map(|Coerced(text)| text)
}

fn exception_to_error(thrown: &Value<'_>) -> BridgeError {
    let Some(object) = thrown.as_object() else {
        let message = thrown
            .get::<Coerced<String>>()
            .map(|Coerced(text)| text)
            .unwrap_or_else(|_| "unknown exception".to_owned());
        return BridgeError::script_error("Error", message);
    };

    let error_type = string_property(object, "name").unwrap_or_else(|| "Error".to_owned());
    let message = string_property(object, "message").unwrap_or_default();
    if error_type == "SyntaxError" {
        return BridgeError::SyntaxError {
            message,
            file: None,
        };
    }
    BridgeError::ScriptExecution {
        error_type,
        message,
        stack: string_property(object, "stack").filter(|stack| !stack.is_empty()),
    }
}

/// Short name of a value's shape, for type errors.
pub(crate) fn kind_of(value: &Value<'_>) -> &'static str {
    match value.type_of() {
        Type::Undefined => "undefined",
        Type::Null => "null",
        Type::Bool => "boolean",
        Type::Int | Type::Float => "number",
        Type::String => "string",
        Type::Symbol => "symbol",
        Type::Array => "array",
        Type::Function | Type::Constructor => "function",
        _ if value.is_object() => "object",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::EngineSession;

    #[test]
    fn test_nested_scope_reuses_outer_context() {
        let session = EngineSession::new().unwrap();
        let depth = session
            .enter(|_outer| {
                let inner = session.enter(|_inner| Ok(entered_depth()))?;
                Ok((entered_depth(), inner))
            })
            .unwrap();
        assert_eq!(depth, (1, 1));
        assert_eq!(entered_depth(), 0);
    }

    #[test]
    fn test_scope_stack_restored_after_error() {
        let session = EngineSession::new().unwrap();
        let result: BridgeResult<()> = session.enter(|_| Err(BridgeError::internal("bail out")));
        assert!(result.is_err());
        assert_eq!(entered_depth(), 0);
        assert!(session.enter(|_| Ok(())).is_ok());
    }

    #[test]
    fn test_scope_stack_restored_after_panic() {
        let session = EngineSession::new().unwrap();
        let depth_after = session
            .enter(|scope| {
                let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    let _: () =
                        session.scope_from_native(scope.ctx(), |_| panic!("inside native scope"));
                }));
                assert!(outcome.is_err());
                Ok(entered_depth())
            })
            .unwrap();
        assert_eq!(depth_after, 1);
        assert_eq!(entered_depth(), 0);
    }

    #[test]
    fn test_capture_script_exception() {
        let session = EngineSession::new().unwrap();
        let err = session
            .enter(|scope| {
                let result = scope
                    .ctx()
                    .eval::<Value, _>("throw new RangeError('out of range')");
                Ok(result.map_err(|e| scope.capture(e)).err())
            })
            .unwrap()
            .unwrap();
        assert_eq!(err.error_type(), Some("RangeError"));
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_capture_thrown_primitive() {
        let session = EngineSession::new().unwrap();
        let err = session
            .enter(|scope| {
                let result = scope.ctx().eval::<Value, _>("throw 'plain text'");
                Ok(result.map_err(|e| scope.capture(e)).err())
            })
            .unwrap()
            .unwrap();
        assert_eq!(err.to_string(), "Error: plain text");
    }

    #[test]
    fn test_kind_of() {
        let session = EngineSession::new().unwrap();
        let kinds = session
            .enter(|scope| {
                let ctx = scope.ctx();
                let kind_of_source = |source: &str| -> BridgeResult<&'static str> {
                    let value: Value = ctx.eval(source).map_err(|e| scope.capture(e))?;
                    Ok(kind_of(&value))
                };
                Ok(vec![
                    kind_of_source("undefined")?,
                    kind_of_source("null")?,
                    kind_of_source("1.5")?,
                    kind_of_source("'s'")?,
                    kind_of_source("[1]")?,
                    kind_of_source("({})")?,
                    kind_of_source("(() => 1)")?,
                ])
            })
            .unwrap();
        assert_eq!(
            kinds,
            ["undefined", "null", "number", "string", "array", "object", "function"]
        );
    }
}
