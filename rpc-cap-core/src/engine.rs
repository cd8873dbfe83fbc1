//! Middleware chain for request dispatch.
//!
//! An [`Engine`] is an ordered stack of [`Middleware`]. Each middleware
//! receives the request together with a [`Next`] handle for the rest of the
//! stack and may:
//!
//! - answer directly by returning a result or an error,
//! - rewrite the request and forward it with [`Next::run`],
//! - forward the request and transform whatever comes back.
//!
//! The last option is what makes the chain an onion: code after
//! `next.run(req).await` executes only once every downstream middleware has
//! finished, in reverse order of the stack.
//!
//! Engines nest. An [`Engine`] pushed into another engine runs its own stack
//! first, and when that stack is exhausted the request falls through to the
//! enclosing engine's remaining middleware.
//!
//! ```rust
//! use async_trait::async_trait;
//! use rpc_cap_core::engine::{Engine, Middleware, Next, Request, RpcResult};
//! use serde_json::json;
//!
//! struct Pong;
//!
//! #[async_trait]
//! impl Middleware for Pong {
//!     async fn call(&self, req: Request, next: Next<'_>) -> RpcResult {
//!         if req.method == "ping" {
//!             return Ok(json!("pong"));
//!         }
//!         next.run(req).await
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let mut engine = Engine::new();
//! engine.push(Pong);
//! assert_eq!(engine.handle(Request::new("ping")).await.unwrap(), json!("pong"));
//! assert!(engine.handle(Request::new("other")).await.is_err());
//! # });
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RpcError;

/// Outcome of a dispatched call: exactly one of a result or an error.
pub type RpcResult = Result<Value, RpcError>;

/// An RPC method invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Caller-chosen request identifier, echoed back untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,

    /// Method name.
    pub method: String,

    /// Method parameters (usually a JSON array).
    #[serde(default)]
    pub params: Value,
}

impl Request {
    /// Create a request with no params.
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            id: None,
            method: method.into(),
            params: Value::Null,
        }
    }

    /// Set the params.
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    /// Set the request id.
    pub fn with_id(mut self, id: impl Into<Value>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// The request as JSON, for echoing in error data.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// A single step in an [`Engine`].
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Handle the request, optionally delegating to the rest of the chain.
    async fn call(&self, req: Request, next: Next<'_>) -> RpcResult;
}

/// Handle to the remainder of a middleware chain.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    stack: &'a [Arc<dyn Middleware>],
    outer: Option<&'a Next<'a>>,
}

impl<'a> Next<'a> {
    /// A chain over `stack` that fails when exhausted.
    pub fn new(stack: &'a [Arc<dyn Middleware>]) -> Self {
        Self { stack, outer: None }
    }

    /// A chain over `stack` that falls through to `outer` when exhausted.
    pub fn nested(stack: &'a [Arc<dyn Middleware>], outer: &'a Next<'a>) -> Self {
        Self {
            stack,
            outer: Some(outer),
        }
    }

    /// A chain with no middleware at all; running it always fails.
    pub fn end() -> Next<'static> {
        Next {
            stack: &[],
            outer: None,
        }
    }

    /// Pass the request to the next middleware.
    pub fn run(self, req: Request) -> BoxFuture<'a, RpcResult> {
        match self.stack.split_first() {
            Some((head, rest)) => head.call(
                req,
                Next {
                    stack: rest,
                    outer: self.outer,
                },
            ),
            None => match self.outer {
                Some(outer) => (*outer).run(req),
                None => Box::pin(async move {
                    Err(RpcError::internal(
                        format!("request for '{}' was not handled", req.method),
                        Some(req.to_value()),
                    ))
                }),
            },
        }
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &self.stack.len())
            .field("nested", &self.outer.is_some())
            .finish()
    }
}

/// An ordered stack of middleware.
#[derive(Clone, Default)]
pub struct Engine {
    stack: Vec<Arc<dyn Middleware>>,
}

impl Engine {
    /// Create an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware to the end of the stack.
    pub fn push(&mut self, middleware: impl Middleware + 'static) {
        self.stack.push(Arc::new(middleware));
    }

    /// Append an already shared middleware.
    pub fn push_arc(&mut self, middleware: Arc<dyn Middleware>) {
        self.stack.push(middleware);
    }

    /// Number of middleware in the stack.
    pub fn len(&self) -> usize {
        self.stack.len()
    }

    /// Returns true if the stack is empty.
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Run a request through the stack.
    pub async fn handle(&self, req: Request) -> RpcResult {
        Next::new(&self.stack).run(req).await
    }
}

#[async_trait]
impl Middleware for Engine {
    async fn call(&self, req: Request, next: Next<'_>) -> RpcResult {
        Next::nested(&self.stack, &next).run(req).await
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("middleware", &self.stack.len())
            .finish()
    }
}
