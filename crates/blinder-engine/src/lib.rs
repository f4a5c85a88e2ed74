//! Lifetime-bound handles into an embedded QuickJS engine.
//!
//! An [`EngineSession`] owns one runtime and its persistent context.
//! [`EngineValue`]s are copyable handles to script values; every operation on
//! them enters a [`ContextScope`] on the calling thread, so values can be
//! shared freely between threads while engine access stays serialized.
//!
//! # Example
//!
//! ```
//! use blinder_engine::EngineSession;
//!
//! let session = EngineSession::new().unwrap();
//! let add = session.evaluate("() => 40 + 2", "example.js").unwrap();
//! assert_eq!(add.call(&[]).unwrap().as_int().unwrap(), 42);
//! ```
//!
//! # Lifetime
//!
//! Disposing a session releases every handle inside the context before the
//! context and runtime go away. Values that outlive it report
//! [`Ownership::ParentDead`] and never touch the engine again:
//!
//! ```
//! use blinder_engine::{EngineSession, Ownership};
//!
//! let session = EngineSession::new().unwrap();
//! let value = session.new_string("late").unwrap();
//! session.dispose().unwrap();
//! assert_eq!(value.ownership(), Ownership::ParentDead);
//! assert!(value.as_string().is_err());
//! ```

mod error;
mod intrinsics;
mod scope;
mod session;
mod value;

pub use error::{BridgeError, BridgeResult};
pub use scope::{ContextScope, entered_depth};
pub use session::{EngineSession, SessionOptions, WeakEngineSession};
pub use value::{EngineValue, IntoEngineArg, Ownership};

// `ContextScope::ctx` hands out raw engine types.
pub use rquickjs;
