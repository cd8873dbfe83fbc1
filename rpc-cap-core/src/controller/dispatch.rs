//! Authorizing dispatch.
//!
//! Every call bound to a domain goes through [`CapabilitiesController::handle_request`]:
//!
//! 1. safe methods pass straight to `next`
//! 2. internal methods are answered by the controller
//! 3. the method is resolved to a restricted method, or fails `methodNotFound`
//! 4. the domain's permission for the exact method is looked up, or the call fails `unauthorized`
//! 5. the permission's caveats are built into a pipeline in front of the handler
//!
//! Handlers receive a [`DomainEngine`] bound to the same domain, so any call
//! they make on behalf of the caller is checked against the caller's
//! permissions.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use super::{CapabilitiesController, InternalMethod};
use crate::engine::{Engine, Middleware, Next, Request, RpcResult};
use crate::error::RpcError;
use crate::events::CapabilityEvent;
use crate::method::MethodHandler;
use crate::permission::{OriginMetadata, Permission};

impl CapabilitiesController {
    /// Authorize and dispatch a call made by `origin`.
    pub async fn handle_request(
        &self,
        origin: &OriginMetadata,
        req: Request,
        next: Next<'_>,
    ) -> RpcResult {
        if self.inner.safe_methods.contains(&req.method) {
            log::debug!("{} -> {}: safe method", origin.origin, req.method);
            return next.run(req).await;
        }

        if let Some(internal) = self.inner.internal_methods.get(&req.method).copied() {
            log::debug!("{} -> {}: internal method", origin.origin, req.method);
            return match internal {
                InternalMethod::GetPermissions => {
                    Ok(serde_json::to_value(self.get_permissions_for_domain(&origin.origin))?)
                }
                InternalMethod::RequestPermissions => {
                    self.handle_request_permissions(origin, &req).await
                }
                InternalMethod::GrantPermissions => self.handle_grant_permissions(origin, &req),
                InternalMethod::RevokePermissions => self.handle_revoke_permissions(origin, &req),
            };
        }

        let Some(key) = self.inner.resolver.resolve(&req.method) else {
            log::debug!("{} -> {}: not a restricted method", origin.origin, req.method);
            return Err(RpcError::method_not_found(Some(req.to_value())));
        };

        let Some(permission) = self.authorizing_permission(&origin.origin, &req.method) else {
            log::debug!("{} -> {}: unauthorized", origin.origin, req.method);
            self.emit(CapabilityEvent::CallDenied {
                origin: origin.origin.clone(),
                method: req.method.clone(),
            });
            return Err(RpcError::unauthorized(Some(req.to_value())));
        };

        log::debug!(
            "{} -> {}: authorized via '{}' with {} caveat(s)",
            origin.origin,
            req.method,
            key,
            permission.caveats.len()
        );
        self.execute_method(origin, &key, &permission, req, next).await
    }

    /// The permission that authorizes `domain` to call exactly `method`.
    fn authorizing_permission(&self, domain: &str, method: &str) -> Option<Permission> {
        let state = self.inner.state.read();
        match self.inner.lookup.lookup(&state, domain, method) {
            Ok(permission) => permission.cloned(),
            Err(err) => {
                log::warn!("rejecting {} for {}: {}", method, domain, err);
                None
            }
        }
    }

    /// Run the restricted method behind the permission's caveat pipeline.
    async fn execute_method(
        &self,
        origin: &OriginMetadata,
        key: &str,
        permission: &Permission,
        req: Request,
        next: Next<'_>,
    ) -> RpcResult {
        let method = self
            .inner
            .resolver
            .get(key)
            .ok_or_else(|| RpcError::method_not_found(Some(req.to_value())))?;
        let provider = self.create_virtual_engine_for(origin.clone());

        if permission.caveats.is_empty() {
            return method.handler.call(req, next, &provider).await;
        }

        let mut stack = self.inner.caveats.build_pipeline(&permission.caveats)?;
        stack.push(Arc::new(HandlerStep {
            handler: method.handler.clone(),
            provider,
        }));
        Next::nested(&stack, &next).run(req).await
    }

    // ===== Engines =====

    /// A middleware that dispatches every call as `origin`.
    pub fn create_bound_middleware(&self, origin: impl Into<OriginMetadata>) -> DomainMiddleware {
        DomainMiddleware {
            controller: self.clone(),
            origin: origin.into(),
        }
    }

    /// An engine whose only middleware is bound to `origin`.
    ///
    /// Calls the controller does not answer fail as unhandled.
    pub fn create_permissioned_engine(&self, origin: impl Into<OriginMetadata>) -> Engine {
        let mut engine = Engine::new();
        engine.push(self.create_bound_middleware(origin));
        engine
    }

    /// A sub-dispatcher bound to `origin`, chained to the downstream engine if configured.
    pub fn create_virtual_engine_for(&self, origin: impl Into<OriginMetadata>) -> DomainEngine {
        let origin = origin.into();
        let mut engine = Engine::new();
        engine.push(self.create_bound_middleware(origin.clone()));
        if let Some(downstream) = &self.inner.engine {
            engine.push(downstream.clone());
        }
        DomainEngine { origin, engine }
    }
}

/// Final pipeline step: invoke the restricted method.
struct HandlerStep {
    handler: Arc<dyn MethodHandler>,
    provider: DomainEngine,
}

#[async_trait]
impl Middleware for HandlerStep {
    async fn call(&self, req: Request, next: Next<'_>) -> RpcResult {
        self.handler.call(req, next, &self.provider).await
    }
}

/// The controller bound to a fixed caller.
#[derive(Clone)]
pub struct DomainMiddleware {
    controller: CapabilitiesController,
    origin: OriginMetadata,
}

impl DomainMiddleware {
    pub fn origin(&self) -> &OriginMetadata {
        &self.origin
    }
}

#[async_trait]
impl Middleware for DomainMiddleware {
    async fn call(&self, req: Request, next: Next<'_>) -> RpcResult {
        self.controller.handle_request(&self.origin, req, next).await
    }
}

impl fmt::Debug for DomainMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainMiddleware")
            .field("origin", &self.origin.origin)
            .finish()
    }
}

/// A sub-dispatcher that issues calls as one domain.
///
/// Handed to restricted methods so they can call other methods with exactly
/// the caller's authority.
#[derive(Clone)]
pub struct DomainEngine {
    origin: OriginMetadata,
    engine: Engine,
}

impl DomainEngine {
    /// Origin the engine dispatches as.
    pub fn origin(&self) -> &str {
        &self.origin.origin
    }

    pub fn metadata(&self) -> &OriginMetadata {
        &self.origin
    }

    /// Dispatch a call as this domain.
    pub async fn handle(&self, req: Request) -> RpcResult {
        self.engine.handle(req).await
    }
}

impl fmt::Debug for DomainEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainEngine")
            .field("origin", &self.origin.origin)
            .field("engine", &self.engine)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::RestrictedMethod;
    use crate::permission::{Caveat, PermissionsRequest, RequestedPermissions};
    use serde_json::json;

    async fn deny(_req: PermissionsRequest) -> std::result::Result<RequestedPermissions, RpcError> {
        Ok(RequestedPermissions::new())
    }

    fn controller() -> CapabilitiesController {
        CapabilitiesController::builder()
            .safe_methods(["ping"])
            .restricted_method(
                "echo",
                RestrictedMethod::from_fn("Echo params", |req| Ok(req.params.clone())),
            )
            .with_user_approval(deny)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_safe_method_passes_through() {
        let c = controller();
        let mut engine = c.create_permissioned_engine("a.com");

        struct Pong;

        #[async_trait]
        impl Middleware for Pong {
            async fn call(&self, _req: Request, _next: Next<'_>) -> RpcResult {
                Ok(json!("pong"))
            }
        }
        engine.push(Pong);

        assert_eq!(engine.handle(Request::new("ping")).await.unwrap(), json!("pong"));
    }

    #[tokio::test]
    async fn test_unknown_method_not_found() {
        let c = controller();
        let engine = c.create_permissioned_engine("a.com");
        let err = engine.handle(Request::new("nope")).await.unwrap_err();
        assert!(err.is_method_not_found());
        assert_eq!(err.data().unwrap()["method"], "nope");
    }

    #[tokio::test]
    async fn test_missing_permission_unauthorized() {
        let c = controller();
        let engine = c.create_permissioned_engine("a.com");
        let err = engine.handle(Request::new("echo")).await.unwrap_err();
        assert!(err.is_unauthorized());
    }

    #[tokio::test]
    async fn test_permitted_call_runs_caveats() {
        let c = controller();
        c.add_permissions_for(
            "a.com",
            vec![Permission::new("echo", "a.com")
                .with_caveats(vec![Caveat::new("forceParams", json!([1, 2]))])],
        )
        .unwrap();

        let engine = c.create_permissioned_engine("a.com");
        let res = engine
            .handle(Request::new("echo").with_params(json!(["x"])))
            .await
            .unwrap();
        assert_eq!(res, json!([1, 2]));
    }

    #[tokio::test]
    async fn test_permission_is_per_domain() {
        let c = controller();
        c.add_permissions_for("a.com", vec![Permission::new("echo", "a.com")])
            .unwrap();

        let other = c.create_permissioned_engine("b.com");
        assert!(other
            .handle(Request::new("echo"))
            .await
            .unwrap_err()
            .is_unauthorized());
    }

    #[tokio::test]
    async fn test_get_permissions_internal_method() {
        let c = controller();
        c.add_permissions_for("a.com", vec![Permission::new("echo", "a.com")])
            .unwrap();

        let engine = c.create_permissioned_engine("a.com");
        let res = engine.handle(Request::new("getPermissions")).await.unwrap();
        assert_eq!(res.as_array().unwrap().len(), 1);
        assert_eq!(res[0]["parentCapability"], "echo");
    }

    #[tokio::test]
    async fn test_invalid_stored_caveat_value_is_internal_error() {
        // Seeded state bypasses grant-time validation
        let mut state = crate::permission::CapabilitiesState::default();
        state.add_permissions(
            "a.com",
            vec![Permission::new("echo", "a.com")
                .with_caveats(vec![Caveat::new("limitResponseLength", json!("many"))])],
        );
        let c = CapabilitiesController::builder()
            .restricted_method(
                "echo",
                RestrictedMethod::from_fn("Echo params", |req| Ok(req.params.clone())),
            )
            .with_user_approval(deny)
            .with_initial_state(state)
            .build()
            .unwrap();

        let engine = c.create_permissioned_engine("a.com");
        let err = engine.handle(Request::new("echo")).await.unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn test_virtual_engine_is_bound() {
        let c = controller();
        let provider = c.create_virtual_engine_for(OriginMetadata::new("a.com").with_site_title("A"));
        assert_eq!(provider.origin(), "a.com");
        assert_eq!(provider.metadata().site_title.as_deref(), Some("A"));
    }
}
