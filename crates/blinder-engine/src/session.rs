//! Engine session: the runtime, its persistent context and the handle table
//! every [`EngineValue`] points into.
//!
//! The session is the single authority on whether the engine is alive.
//! Disposing it releases every persistent handle inside the context first and
//! only then drops the context and the runtime. Handles that outlive the
//! session become inert.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use rquickjs::function::Rest;
use rquickjs::{Array, Context, Ctx, Exception, Function, IntoJs, Object, Persistent, Runtime, Value};
use serde::{Deserialize, Serialize};
use tracing::{debug, debug_span};

use crate::error::{BridgeError, BridgeResult};
use crate::intrinsics;
use crate::scope::{self, ContextScope};
use crate::value::EngineValue;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Limits applied to the runtime when a session is created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Heap limit in bytes
    pub memory_limit: Option<usize>,
    /// Native stack limit in bytes
    pub max_stack_size: Option<usize>,
}

impl SessionOptions {
    pub fn memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    pub fn max_stack_size(mut self, bytes: usize) -> Self {
        self.max_stack_size = Some(bytes);
        self
    }
}

/// Persistent handles owned by a session.
#[derive(Default)]
pub(crate) struct HandleTable {
    slots: HashMap<u64, Persistent<Value<'static>>>,
    intrinsics: Option<Persistent<Object<'static>>>,
}

// SAFETY: the table is only read or mutated by a thread that has entered the
// session's context, which holds the runtime lock for the duration.
unsafe impl Send for HandleTable {}

pub(crate) struct EngineCore {
    handles: Mutex<HandleTable>,
    pub(crate) context: Context,
    pub(crate) runtime: Runtime,
}

pub(crate) struct SessionInner {
    pub(crate) id: u64,
    alive: AtomicBool,
    pub(crate) core: RwLock<Option<EngineCore>>,
    next_slot: AtomicU64,
}

impl SessionInner {
    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn with_handles<R>(&self, f: impl FnOnce(&mut HandleTable) -> R) -> BridgeResult<R> {
        let guard = self.core.read_recursive();
        let core = guard.as_ref().ok_or(BridgeError::EngineGone)?;
        let mut handles = core.handles.lock();
        Ok(f(&mut handles))
    }

    pub(crate) fn store(&self, value: Persistent<Value<'static>>) -> BridgeResult<u64> {
        let slot = self.next_slot.fetch_add(1, Ordering::Relaxed);
        self.with_handles(|handles| {
            handles.slots.insert(slot, value);
        })?;
        Ok(slot)
    }

    pub(crate) fn load(&self, slot: u64) -> BridgeResult<Persistent<Value<'static>>> {
        self.with_handles(|handles| handles.slots.get(&slot).cloned())?
            .ok_or(BridgeError::StaleHandle(slot))
    }

    /// Unregister a slot. The returned handle must be dropped inside a scope.
    pub(crate) fn release(&self, slot: u64) -> Option<Persistent<Value<'static>>> {
        self.with_handles(|handles| handles.slots.remove(&slot))
            .ok()
            .flatten()
    }

    pub(crate) fn set_intrinsics(&self, helpers: Persistent<Object<'static>>) -> BridgeResult<()> {
        let previous = self.with_handles(|handles| handles.intrinsics.replace(helpers))?;
        drop(previous);
        Ok(())
    }

    pub(crate) fn intrinsics(&self) -> BridgeResult<Persistent<Object<'static>>> {
        self.with_handles(|handles| handles.intrinsics.clone())?
            .ok_or_else(|| BridgeError::internal("session intrinsics are not installed"))
    }

    fn dispose(&self) {
        if !self.alive.swap(false, Ordering::AcqRel) {
            return;
        }
        let Some(core) = self.core.write().take() else {
            return;
        };
        let released = core.context.with(|_ctx| {
            let table = std::mem::take(&mut *core.handles.lock());
            let count = table.slots.len();
            drop(table);
            count
        });
        debug!(session = self.id, released, "engine session disposed");
        drop(core);
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.dispose();
    }
}

type NativeCallback = dyn Fn(Vec<EngineValue>) -> BridgeResult<Option<EngineValue>> + Send + Sync;

/// A live script engine instance plus its persistent context.
///
/// Cheap to clone; all clones refer to the same engine. The engine stays
/// alive until [`dispose`](Self::dispose) is called or the last clone and the
/// last value created from it are dropped.
#[derive(Clone)]
pub struct EngineSession {
    inner: Arc<SessionInner>,
}

impl EngineSession {
    /// Create a session with default options.
    pub fn new() -> BridgeResult<Self> {
        Self::with_options(SessionOptions::default())
    }

    /// Create a session with explicit runtime limits.
    pub fn with_options(options: SessionOptions) -> BridgeResult<Self> {
        let runtime = Runtime::new()
            .map_err(|e| BridgeError::Engine(format!("runtime creation failed: {e}")))?;
        if let Some(limit) = options.memory_limit {
            runtime.set_memory_limit(limit);
        }
        if let Some(size) = options.max_stack_size {
            runtime.set_max_stack_size(size);
        }
        let context = Context::full(&runtime)
            .map_err(|e| BridgeError::Engine(format!("context creation failed: {e}")))?;

        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let session = Self {
            inner: Arc::new(SessionInner {
                id,
                alive: AtomicBool::new(true),
                core: RwLock::new(Some(EngineCore {
                    handles: Mutex::new(HandleTable::default()),
                    context,
                    runtime,
                })),
                next_slot: AtomicU64::new(1),
            }),
        };
        session.enter(intrinsics::install)?;
        debug!(session = id, ?options, "engine session created");
        Ok(session)
    }

    pub(crate) fn from_inner(inner: Arc<SessionInner>) -> Self {
        Self { inner }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Whether the engine has not been disposed yet.
    pub fn is_alive(&self) -> bool {
        self.inner.is_alive()
    }

    /// A reference that does not keep the engine alive.
    pub fn downgrade(&self) -> WeakEngineSession {
        WeakEngineSession {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Run `f` inside a context scope of this session.
    ///
    /// Nested calls on the same thread reuse the outer scope. After the
    /// outermost scope returns, pending promise jobs are drained.
    pub fn enter<F, R>(&self, f: F) -> BridgeResult<R>
    where
        F: for<'js> FnOnce(&ContextScope<'js>) -> BridgeResult<R> + Send,
        R: Send,
    {
        scope::enter(&self.inner, f)
    }

    /// Build a scope around the context a native function was invoked with.
    ///
    /// `ctx` must belong to this session. Engine value operations made from
    /// inside `f` reuse this context instead of locking the runtime again.
    pub fn scope_from_native<'js, R>(
        &self,
        ctx: &Ctx<'js>,
        f: impl FnOnce(&ContextScope<'js>) -> R,
    ) -> R {
        scope::enter_native(&self.inner, ctx, f)
    }

    /// Evaluate script source in the global scope.
    pub fn evaluate(&self, source: &str, filename: &str) -> BridgeResult<EngineValue> {
        let _span = debug_span!("evaluate", session = self.inner.id, file = filename).entered();
        self.enter(|scope| {
            let value: Value = scope.ctx().eval(source).map_err(|e| match scope.capture(e) {
                BridgeError::SyntaxError { message, .. } => BridgeError::SyntaxError {
                    message,
                    file: Some(filename.to_owned()),
                },
                other => other,
            })?;
            scope.adopt(value)
        })
    }

    /// The global object of the persistent context.
    pub fn global(&self) -> BridgeResult<EngineValue> {
        self.enter(|scope| scope.adopt(scope.global().into_value()))
    }

    pub fn new_undefined(&self) -> BridgeResult<EngineValue> {
        self.enter(|scope| scope.adopt(Value::new_undefined(scope.ctx().clone())))
    }

    pub fn new_null(&self) -> BridgeResult<EngineValue> {
        self.enter(|scope| scope.adopt(Value::new_null(scope.ctx().clone())))
    }

    pub fn new_bool(&self, value: bool) -> BridgeResult<EngineValue> {
        self.new_primitive(value)
    }

    pub fn new_int(&self, value: i64) -> BridgeResult<EngineValue> {
        self.new_primitive(value)
    }

    pub fn new_double(&self, value: f64) -> BridgeResult<EngineValue> {
        self.new_primitive(value)
    }

    pub fn new_string(&self, value: &str) -> BridgeResult<EngineValue> {
        self.new_primitive(value)
    }

    /// A string from raw bytes; invalid UTF-8 is replaced.
    pub fn new_string_buffer(&self, bytes: &[u8]) -> BridgeResult<EngineValue> {
        self.new_primitive(String::from_utf8_lossy(bytes).into_owned())
    }

    fn new_primitive<T>(&self, value: T) -> BridgeResult<EngineValue>
    where
        T: for<'js> IntoJs<'js> + Send,
    {
        self.enter(move |scope| {
            let value = value.into_js(scope.ctx()).map_err(|e| scope.capture(e))?;
            scope.adopt(value)
        })
    }

    pub fn new_object(&self) -> BridgeResult<EngineValue> {
        self.enter(|scope| {
            let object = Object::new(scope.ctx().clone()).map_err(|e| scope.capture(e))?;
            scope.adopt(object.into_value())
        })
    }

    /// A dense array holding `items` in order.
    pub fn new_array(&self, items: &[EngineValue]) -> BridgeResult<EngineValue> {
        self.enter(|scope| {
            let array = Array::new(scope.ctx().clone()).map_err(|e| scope.capture(e))?;
            for (index, item) in items.iter().enumerate() {
                array
                    .set(index, scope.restore(item)?)
                    .map_err(|e| scope.capture(e))?;
            }
            scope.adopt(array.into_value())
        })
    }

    /// Build an engine value from JSON data.
    pub fn from_json(&self, json: &serde_json::Value) -> BridgeResult<EngineValue> {
        let text = serde_json::to_string(json)?;
        self.enter(|scope| {
            let value = scope.json_parse(&text)?;
            scope.adopt(value)
        })
    }

    /// Expose a Rust closure to script as a function.
    ///
    /// Arguments arrive as engine values; returning `None` yields
    /// `undefined`. An error is thrown into script as an `Error`.
    pub fn new_callback<F>(&self, callback: F) -> BridgeResult<EngineValue>
    where
        F: Fn(Vec<EngineValue>) -> BridgeResult<Option<EngineValue>> + Send + Sync + 'static,
    {
        let callback: Arc<NativeCallback> = Arc::new(callback);
        let session = Arc::downgrade(&self.inner);
        self.enter(move |scope| {
            let function =
                native_callback(scope.ctx(), session, callback).map_err(|e| scope.capture(e))?;
            scope.adopt(function.into_value())
        })
    }

    /// Number of live value handles registered with the session.
    pub fn handle_count(&self) -> usize {
        self.inner
            .with_handles(|handles| handles.slots.len())
            .unwrap_or(0)
    }

    /// Release every value handle, then the context, then the runtime.
    ///
    /// Values still held elsewhere become inert. Fails when called from
    /// inside one of this session's own scopes.
    pub fn dispose(&self) -> BridgeResult<()> {
        if scope::is_entered(self.inner.id) {
            return Err(BridgeError::internal(
                "cannot dispose an engine session from inside its own scope",
            ));
        }
        self.inner.dispose();
        Ok(())
    }
}

impl fmt::Debug for EngineSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineSession")
            .field("id", &self.inner.id)
            .field("alive", &self.inner.is_alive())
            .finish()
    }
}

fn native_callback<'js>(
    ctx: &Ctx<'js>,
    session: Weak<SessionInner>,
    callback: Arc<NativeCallback>,
) -> rquickjs::Result<Function<'js>> {
    Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<Value<'js>> {
            let Some(session) = session.upgrade() else {
                return Err(Exception::throw_message(&ctx, "script engine has been disposed"));
            };
            let result = scope::enter_native(&session, &ctx, |scope| {
                let args = args
                    .0
                    .into_iter()
                    .map(|arg| scope.adopt(arg))
                    .collect::<BridgeResult<Vec<_>>>()?;
                match callback(args)? {
                    Some(value) => scope.restore(&value),
                    None => Ok(Value::new_undefined(ctx.clone())),
                }
            });
            result.map_err(|error| Exception::throw_message(&ctx, &error.to_string()))
        },
    )
}

/// Non-owning reference to an [`EngineSession`].
#[derive(Clone, Debug)]
pub struct WeakEngineSession {
    inner: Weak<SessionInner>,
}

impl WeakEngineSession {
    /// The session, if it has not been dropped or disposed.
    pub fn upgrade(&self) -> Option<EngineSession> {
        self.inner
            .upgrade()
            .filter(|inner| inner.is_alive())
            .map(EngineSession::from_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<EngineSession>();
        assert_send_sync::<WeakEngineSession>();
    }

    #[test]
    fn test_session_options_builder() {
        let options = SessionOptions::default()
            .memory_limit(64 * 1024 * 1024)
            .max_stack_size(512 * 1024);
        assert_eq!(options.memory_limit, Some(64 * 1024 * 1024));
        assert_eq!(options.max_stack_size, Some(512 * 1024));

        let session = EngineSession::with_options(options).unwrap();
        assert!(session.is_alive());
    }

    #[test]
    fn test_sessions_have_distinct_ids() {
        let a = EngineSession::new().unwrap();
        let b = EngineSession::new().unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_handle_count_tracks_values() {
        let session = EngineSession::new().unwrap();
        let baseline = session.handle_count();
        let value = session.new_int(7).unwrap();
        let copy = value.clone();
        assert_eq!(session.handle_count(), baseline + 2);
        drop(value);
        drop(copy);
        assert_eq!(session.handle_count(), baseline);
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let session = EngineSession::new().unwrap();
        session.dispose().unwrap();
        session.dispose().unwrap();
        assert!(!session.is_alive());
        assert!(matches!(session.new_int(1), Err(BridgeError::EngineGone)));
    }

    #[test]
    fn test_dispose_refused_inside_scope() {
        let session = EngineSession::new().unwrap();
        let refused = session.enter(|_| Ok(session.dispose().is_err())).unwrap();
        assert!(refused);
        assert!(session.is_alive());
    }

    #[test]
    fn test_weak_session_does_not_outlive_dispose() {
        let session = EngineSession::new().unwrap();
        let weak = session.downgrade();
        assert!(weak.upgrade().is_some());
        session.dispose().unwrap();
        assert!(weak.upgrade().is_none());
    }
}
