//! Lifetime-bound handles to script values.
//!
//! An [`EngineValue`] names a slot in its session's handle table. Every
//! operation enters a context scope, restores the engine value from the slot
//! and works on it there; nothing engine-native escapes the scope.

use std::fmt;
use std::sync::Arc;

use rquickjs::convert::Coerced;
use rquickjs::function::{Rest, This};
use rquickjs::{IntoJs, Value};
use tracing::debug;

use crate::error::{BridgeError, BridgeResult};
use crate::intrinsics::{self, BoxedKind};
use crate::scope::{self, ContextScope, kind_of};
use crate::session::{EngineSession, SessionInner};

const ORPHAN_SLOT: u64 = u64::MAX;

/// Who is responsible for a value's engine-side handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// The session is alive; dropping the value releases its handle.
    Live,
    /// The session was disposed first; the handle is left untouched.
    ParentDead,
    /// The handle was moved out or released explicitly.
    Released,
}

/// A handle to one script value, bound to its session's lifetime.
///
/// `EngineValue` is `Send + Sync`: any thread may operate on it, and each
/// operation serializes on the session's context.
pub struct EngineValue {
    session: Option<Arc<SessionInner>>,
    slot: u64,
}

impl EngineValue {
    pub(crate) fn from_parts(session: Arc<SessionInner>, slot: u64) -> Self {
        Self {
            session: Some(session),
            slot,
        }
    }

    fn orphan(session: Arc<SessionInner>) -> Self {
        Self {
            session: Some(session),
            slot: ORPHAN_SLOT,
        }
    }

    pub(crate) fn session_id(&self) -> Option<u64> {
        self.session.as_ref().map(|session| session.id)
    }

    pub(crate) fn slot(&self) -> u64 {
        self.slot
    }

    /// The session this value belongs to, while it is alive.
    pub fn session(&self) -> Option<EngineSession> {
        self.session
            .as_ref()
            .filter(|session| session.is_alive())
            .map(|session| EngineSession::from_inner(session.clone()))
    }

    pub fn ownership(&self) -> Ownership {
        match &self.session {
            None => Ownership::Released,
            Some(session) if session.is_alive() => Ownership::Live,
            Some(_) => Ownership::ParentDead,
        }
    }

    /// Move the handle out, leaving this binding [`Ownership::Released`].
    pub fn take(&mut self) -> EngineValue {
        Self {
            session: self.session.take(),
            slot: self.slot,
        }
    }

    /// Release the engine-side handle now.
    pub fn release(self) {
        drop(self);
    }

    fn live_session(&self) -> BridgeResult<&Arc<SessionInner>> {
        match &self.session {
            Some(session) if session.is_alive() => Ok(session),
            Some(_) => Err(BridgeError::EngineGone),
            None => Err(BridgeError::internal("value handle was released")),
        }
    }

    fn with_value<F, R>(&self, f: F) -> BridgeResult<R>
    where
        F: for<'js> FnOnce(&ContextScope<'js>, Value<'js>) -> BridgeResult<R> + Send,
        R: Send,
    {
        let session = self.live_session()?;
        scope::enter(session, |scope| {
            let value = scope.restore_slot(self.slot)?;
            f(scope, value)
        })
    }

    fn check(&self, predicate: impl for<'js> FnOnce(&ContextScope<'js>, &Value<'js>) -> BridgeResult<bool> + Send) -> bool {
        match self.with_value(|scope, value| predicate(scope, &value)) {
            Ok(answer) => answer,
            Err(error) => {
                debug!(%error, "type predicate on unusable value");
                false
            }
        }
    }

    pub fn is_undefined(&self) -> bool {
        self.check(|_, value| Ok(value.is_undefined()))
    }

    pub fn is_null(&self) -> bool {
        self.check(|_, value| Ok(value.is_null()))
    }

    /// True for string primitives and `String` objects.
    pub fn is_string(&self) -> bool {
        self.check(|scope, value| {
            Ok(value.is_string()
                || intrinsics::boxed_kind(scope, value)? == Some(BoxedKind::String))
        })
    }

    /// True for number primitives and `Number` objects.
    pub fn is_number(&self) -> bool {
        self.check(|scope, value| {
            Ok(value.is_number()
                || intrinsics::boxed_kind(scope, value)? == Some(BoxedKind::Number))
        })
    }

    /// True for boolean primitives and `Boolean` objects.
    pub fn is_bool(&self) -> bool {
        self.check(|scope, value| {
            Ok(value.is_bool() || intrinsics::boxed_kind(scope, value)? == Some(BoxedKind::Bool))
        })
    }

    /// True for anything with object identity, arrays and functions included.
    pub fn is_object(&self) -> bool {
        self.check(|_, value| Ok(value.is_object()))
    }

    pub fn is_array(&self) -> bool {
        self.check(|_, value| Ok(value.is_array()))
    }

    pub fn is_function(&self) -> bool {
        self.check(|_, value| Ok(value.is_function()))
    }

    /// String conversion by script rules; objects go through `toString`.
    /// Unpaired surrogates come out as U+FFFD.
    pub fn as_string(&self) -> BridgeResult<String> {
        self.with_value(|scope, value| {
            let Coerced(text) = value
                .get::<Coerced<rquickjs::String>>()
                .map_err(|e| scope.conversion("string", e))?;
            match text.to_string() {
                Ok(text) => Ok(text),
                Err(_) => intrinsics::well_formed(scope, text),
            }
        })
    }

    /// Like [`as_string`](Self::as_string), as UTF-8 bytes.
    pub fn as_string_buffer(&self) -> BridgeResult<Vec<u8>> {
        self.as_string().map(String::into_bytes)
    }

    /// Truncates toward zero; out of range saturates and NaN is 0.
    pub fn as_int(&self) -> BridgeResult<i64> {
        self.with_value(|scope, value| {
            value
                .get::<Coerced<f64>>()
                .map(|Coerced(number)| number as i64)
                .map_err(|e| scope.conversion("integer", e))
        })
    }

    pub fn as_double(&self) -> BridgeResult<f64> {
        self.with_value(|scope, value| {
            value
                .get::<Coerced<f64>>()
                .map(|Coerced(number)| number)
                .map_err(|e| scope.conversion("number", e))
        })
    }

    /// Truthiness.
    pub fn as_bool(&self) -> BridgeResult<bool> {
        self.with_value(|scope, value| {
            value
                .get::<Coerced<bool>>()
                .map(|Coerced(flag)| flag)
                .map_err(|e| scope.conversion("boolean", e))
        })
    }

    /// Elements of an array, in index order.
    ///
    /// The length is read once up front.
    pub fn as_list(&self) -> BridgeResult<Vec<EngineValue>> {
        self.with_value(|scope, value| {
            let Some(array) = value.as_array() else {
                return Err(BridgeError::type_error("an array", kind_of(&value)));
            };
            let length = array.len();
            let mut items = Vec::with_capacity(length);
            for index in 0..length {
                let item: Value = array.get(index).map_err(|e| scope.capture(e))?;
                items.push(scope.adopt(item)?);
            }
            Ok(items)
        })
    }

    /// Own enumerable string keys, in the engine's enumeration order.
    pub fn get_own_property_names(&self) -> BridgeResult<Vec<String>> {
        self.with_value(|scope, value| {
            if !value.is_object() {
                return Err(BridgeError::type_error("an object", kind_of(&value)));
            }
            intrinsics::own_names(scope, &value)
        })
    }

    /// Read a property; a missing property reads as `undefined`.
    pub fn get_property(&self, name: &str) -> BridgeResult<EngineValue> {
        self.with_value(|scope, value| {
            let Some(object) = value.as_object() else {
                return Err(BridgeError::type_error("an object", kind_of(&value)));
            };
            let property: Value = object.get(name).map_err(|e| scope.capture(e))?;
            scope.adopt(property)
        })
    }

    /// Write a property on the referenced object.
    pub fn set_property(&self, name: &str, value: impl IntoEngineArg) -> BridgeResult<()> {
        self.with_value(move |scope, target| {
            let Some(object) = target.as_object() else {
                return Err(BridgeError::type_error("an object", kind_of(&target)));
            };
            let value = value.into_engine(scope)?;
            object.set(name, value).map_err(|e| scope.capture(e))
        })
    }

    /// Name of the type that constructed this object.
    pub fn get_class(&self) -> BridgeResult<String> {
        self.with_value(|scope, value| {
            if !value.is_object() {
                return Err(BridgeError::type_error("an object", kind_of(&value)));
            }
            intrinsics::class_name(scope, &value)
        })
    }

    /// Call with the global object as receiver.
    pub fn call(&self, args: &[EngineValue]) -> BridgeResult<EngineValue> {
        self.invoke(args, None)
    }

    /// Call with an explicit receiver, which must be an object.
    pub fn call_with_this(
        &self,
        args: &[EngineValue],
        this: &EngineValue,
    ) -> BridgeResult<EngineValue> {
        self.invoke(args, Some(this))
    }

    fn invoke(&self, args: &[EngineValue], this: Option<&EngineValue>) -> BridgeResult<EngineValue> {
        self.with_value(|scope, value| {
            let Some(function) = value.as_function() else {
                return Err(BridgeError::type_error("a function", kind_of(&value)));
            };
            let receiver = match this {
                Some(this) => {
                    let receiver = scope.restore(this)?;
                    if !receiver.is_object() {
                        return Err(BridgeError::type_error("an object receiver", kind_of(&receiver)));
                    }
                    receiver
                }
                None => scope.global().into_value(),
            };
            let argv = args
                .iter()
                .map(|arg| scope.restore(arg))
                .collect::<BridgeResult<Vec<_>>>()?;
            let result: Value = function
                .call((This(receiver), Rest(argv)))
                .map_err(|e| scope.capture(e))?;
            scope.adopt(result)
        })
    }

    /// JSON form of the value; values without one map to `null`.
    pub fn to_json(&self) -> BridgeResult<serde_json::Value> {
        let text = self.with_value(|scope, value| scope.json_stringify(value))?;
        match text {
            Some(text) => Ok(serde_json::from_str(&text)?),
            None => Ok(serde_json::Value::Null),
        }
    }
}

impl Clone for EngineValue {
    /// Duplicates the handle inside a scope of the source's session.
    fn clone(&self) -> Self {
        let Some(session) = &self.session else {
            return Self {
                session: None,
                slot: self.slot,
            };
        };
        if !session.is_alive() {
            return Self::orphan(session.clone());
        }
        let slot = self.slot;
        let duplicated = scope::enter(session, |scope| {
            let value = scope.restore_slot(slot)?;
            scope.adopt(value)
        });
        match duplicated {
            Ok(copy) => copy,
            Err(error) => {
                debug!(%error, slot, "value copy produced an orphan handle");
                Self::orphan(session.clone())
            }
        }
    }
}

impl Drop for EngineValue {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        if self.slot == ORPHAN_SLOT || !session.is_alive() {
            return;
        }
        let slot = self.slot;
        let released = scope::enter(&session, |_scope| {
            drop(session.release(slot));
            Ok(())
        });
        if let Err(error) = released {
            debug!(%error, slot, "value handle not released");
        }
    }
}

impl fmt::Debug for EngineValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineValue")
            .field("session", &self.session_id())
            .field("slot", &self.slot)
            .field("ownership", &self.ownership())
            .finish()
    }
}

/// Anything that can be written into a script object property.
pub trait IntoEngineArg: Send {
    fn into_engine<'js>(self, scope: &ContextScope<'js>) -> BridgeResult<Value<'js>>;
}

macro_rules! primitive_engine_arg {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoEngineArg for $ty {
                fn into_engine<'js>(self, scope: &ContextScope<'js>) -> BridgeResult<Value<'js>> {
                    self.into_js(scope.ctx()).map_err(|e| scope.capture(e))
                }
            }
        )*
    };
}

primitive_engine_arg!(bool, i32, i64, f64, String);

impl IntoEngineArg for &str {
    fn into_engine<'js>(self, scope: &ContextScope<'js>) -> BridgeResult<Value<'js>> {
        self.into_js(scope.ctx()).map_err(|e| scope.capture(e))
    }
}

/// Raw bytes are stored as a string; invalid UTF-8 is replaced.
impl IntoEngineArg for &[u8] {
    fn into_engine<'js>(self, scope: &ContextScope<'js>) -> BridgeResult<Value<'js>> {
        String::from_utf8_lossy(self).into_engine(scope)
    }
}

impl IntoEngineArg for std::borrow::Cow<'_, str> {
    fn into_engine<'js>(self, scope: &ContextScope<'js>) -> BridgeResult<Value<'js>> {
        self.as_ref().into_engine(scope)
    }
}

impl IntoEngineArg for &EngineValue {
    fn into_engine<'js>(self, scope: &ContextScope<'js>) -> BridgeResult<Value<'js>> {
        scope.restore(self)
    }
}

impl IntoEngineArg for EngineValue {
    fn into_engine<'js>(self, scope: &ContextScope<'js>) -> BridgeResult<Value<'js>> {
        scope.restore(&self)
    }
}
