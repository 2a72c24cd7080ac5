//! Local method tables.
//!
//! A bridge answers only the method names its table declares. The declared
//! set is read once when the bridge is constructed; anything else is
//! answered with `unknown_method` without reaching the table.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;

use futures_util::FutureExt;
use futures_util::future::{self, BoxFuture};
use rustc_hash::FxHashMap;

use crate::protocol::{Payload, RpcFault};

// ============================================================================
// Types
// ============================================================================

/// Future returned by a method handler.
pub type HandlerFuture = BoxFuture<'static, Result<Payload, RpcFault>>;

/// Boxed handler closure.
type Handler = Box<dyn Fn(Payload) -> HandlerFuture + Send + Sync>;

// ============================================================================
// MethodTable
// ============================================================================

/// Methods one side of a bridge exposes to the other.
pub trait MethodTable: Send + Sync + 'static {
    /// Every declared method name.
    fn methods(&self) -> Vec<&'static str>;

    /// Starts a call to a declared method.
    ///
    /// Errors are returned as [`RpcFault`] data. The bridge only calls this
    /// for names listed by [`methods`](Self::methods).
    fn call(&self, method: &str, param: Payload) -> HandlerFuture;
}

// ============================================================================
// HandlerTable
// ============================================================================

/// Method table assembled from closures.
///
/// # Example
///
/// ```ignore
/// let table = HandlerTable::new()
///     .method("ping", |_| async { Ok(Payload::from(true)) });
/// ```
#[derive(Default)]
pub struct HandlerTable {
    handlers: FxHashMap<&'static str, Handler>,
}

impl HandlerTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a method.
    ///
    /// Declaring the same name twice keeps the last handler.
    #[must_use]
    pub fn method<F, Fut>(mut self, name: &'static str, handler: F) -> Self
    where
        F: Fn(Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Payload, RpcFault>> + Send + 'static,
    {
        self.handlers
            .insert(name, Box::new(move |param| handler(param).boxed()));
        self
    }
}

impl MethodTable for HandlerTable {
    fn methods(&self) -> Vec<&'static str> {
        self.handlers.keys().copied().collect()
    }

    fn call(&self, method: &str, param: Payload) -> HandlerFuture {
        match self.handlers.get(method) {
            Some(handler) => handler(param),
            None => future::ready(Err(RpcFault::unknown_method(method))).boxed(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
