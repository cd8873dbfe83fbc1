//! Restricted methods and the approval callback.
//!
//! A [`RestrictedMethod`] pairs a human-readable description with the
//! [`MethodHandler`] that serves calls once a permission check passes. The
//! handler receives a [`DomainEngine`] bound to the caller, so it can issue
//! further calls with exactly the caller's authority.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::controller::DomainEngine;
use crate::engine::{Next, Request, RpcResult};
use crate::error::RpcError;
use crate::permission::{PermissionsRequest, RequestedPermissions};

/// Serves calls to a restricted method.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    /// Handle an authorized call.
    ///
    /// `next` continues with whatever follows the controller in the
    /// enclosing chain. `provider` dispatches sub-calls as the same domain.
    async fn call(&self, req: Request, next: Next<'_>, provider: &DomainEngine) -> RpcResult;
}

/// Adapts a synchronous closure into a [`MethodHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F> MethodHandler for FnHandler<F>
where
    F: Fn(&Request) -> RpcResult + Send + Sync,
{
    async fn call(&self, req: Request, _next: Next<'_>, _provider: &DomainEngine) -> RpcResult {
        (self.0)(&req)
    }
}

/// A method whose calls require a permission.
#[derive(Clone)]
pub struct RestrictedMethod {
    pub description: String,
    pub handler: Arc<dyn MethodHandler>,
}

impl RestrictedMethod {
    pub fn new(description: impl Into<String>, handler: impl MethodHandler + 'static) -> Self {
        Self {
            description: description.into(),
            handler: Arc::new(handler),
        }
    }

    /// A method served by a plain function of the request.
    pub fn from_fn<F>(description: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Request) -> RpcResult + Send + Sync + 'static,
    {
        Self::new(description, FnHandler(f))
    }
}

impl fmt::Debug for RestrictedMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestrictedMethod")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Asks the user which of the requested permissions to grant.
///
/// Returning an empty map rejects the request. Returning an error fails the
/// `requestPermissions` call with that error.
#[async_trait]
pub trait UserApproval: Send + Sync {
    async fn approve(&self, request: PermissionsRequest) -> Result<RequestedPermissions, RpcError>;
}

/// Blanket implementation for async closures
#[async_trait]
impl<F, Fut> UserApproval for F
where
    F: Fn(PermissionsRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<RequestedPermissions, RpcError>> + Send + 'static,
{
    async fn approve(&self, request: PermissionsRequest) -> Result<RequestedPermissions, RpcError> {
        self(request).await
    }
}
