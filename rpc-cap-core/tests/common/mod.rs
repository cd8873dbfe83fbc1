//! Common test utilities shared across test files.
//!
//! This module provides handler and approval doubles plus request helpers.
//! Items here may not be used by all test files, hence the module-level allow.
#![allow(dead_code)]

use async_trait::async_trait;
use rpc_cap_core::{
    CapabilitiesBuilder, CapabilitiesController, Caveat, DomainEngine, MethodHandler, Next,
    PermissionsRequest, Request, RequestedPermission, RequestedPermissions, RestrictedMethod,
    RpcError, RpcResult, UserApproval,
};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};

// ===== Approval Doubles =====

/// Grants exactly what was requested.
pub async fn approve_all(req: PermissionsRequest) -> Result<RequestedPermissions, RpcError> {
    Ok(req.permissions)
}

/// Grants nothing.
pub async fn reject_all(_req: PermissionsRequest) -> Result<RequestedPermissions, RpcError> {
    Ok(RequestedPermissions::new())
}

/// Fails the approval with a custom error.
pub async fn failing_approval(_req: PermissionsRequest) -> Result<RequestedPermissions, RpcError> {
    Err(RpcError::custom(1234, "approval prompt crashed"))
}

/// Grants a fixed map regardless of what was requested.
pub struct RewriteApproval(pub RequestedPermissions);

#[async_trait]
impl UserApproval for RewriteApproval {
    async fn approve(&self, _req: PermissionsRequest) -> Result<RequestedPermissions, RpcError> {
        Ok(self.0.clone())
    }
}

type Reply = oneshot::Sender<Result<RequestedPermissions, RpcError>>;

/// Hands every request to the test and waits for the test to answer.
pub struct GatedApproval {
    tx: mpsc::UnboundedSender<(PermissionsRequest, Reply)>,
}

#[async_trait]
impl UserApproval for GatedApproval {
    async fn approve(&self, req: PermissionsRequest) -> Result<RequestedPermissions, RpcError> {
        let (reply, answer) = oneshot::channel();
        self.tx
            .send((req, reply))
            .map_err(|_| RpcError::internal("approval gate closed", None))?;
        answer
            .await
            .map_err(|_| RpcError::internal("approval dropped", None))?
    }
}

/// Test side of a [`GatedApproval`].
pub struct ApprovalGate {
    rx: mpsc::UnboundedReceiver<(PermissionsRequest, Reply)>,
}

impl ApprovalGate {
    /// Wait for the next request to reach the approval callback.
    pub async fn next(&mut self) -> PendingApproval {
        let (request, reply) = self.rx.recv().await.expect("approval gate closed");
        PendingApproval { request, reply }
    }
}

/// A request waiting for the test's answer.
pub struct PendingApproval {
    pub request: PermissionsRequest,
    reply: Reply,
}

impl PendingApproval {
    pub fn approve(self, permissions: RequestedPermissions) {
        let _ = self.reply.send(Ok(permissions));
    }

    pub fn approve_as_requested(self) {
        let permissions = self.request.permissions.clone();
        self.approve(permissions);
    }

    pub fn reject(self) {
        let _ = self.reply.send(Ok(RequestedPermissions::new()));
    }
}

pub fn gated_approval() -> (GatedApproval, ApprovalGate) {
    let (tx, rx) = mpsc::unbounded_channel();
    (GatedApproval { tx }, ApprovalGate { rx })
}

// ===== Handlers =====

/// Returns the params it was called with.
pub fn echo_method() -> RestrictedMethod {
    RestrictedMethod::from_fn("Echo the params", |req| Ok(req.params.clone()))
}

/// Always returns the same value.
pub fn static_method(value: Value) -> RestrictedMethod {
    RestrictedMethod::from_fn("Return a fixed value", move |_| Ok(value.clone()))
}

/// Always fails with a custom error.
pub fn failing_method() -> RestrictedMethod {
    RestrictedMethod::from_fn("Always fails", |_| {
        Err(RpcError::custom(-32000, "handler exploded").with_data(json!({"why": "test"})))
    })
}

/// Calls another method through the domain-bound sub-dispatcher.
pub struct CallThrough(pub &'static str);

#[async_trait]
impl MethodHandler for CallThrough {
    async fn call(&self, req: Request, _next: Next<'_>, provider: &DomainEngine) -> RpcResult {
        provider
            .handle(Request::new(self.0).with_params(req.params))
            .await
    }
}

/// Reports the origin of the sub-dispatcher it was given.
pub struct WhoAmI;

#[async_trait]
impl MethodHandler for WhoAmI {
    async fn call(&self, _req: Request, _next: Next<'_>, provider: &DomainEngine) -> RpcResult {
        Ok(json!(provider.origin()))
    }
}

/// Hands the call on to whatever follows the controller.
pub struct Forward;

#[async_trait]
impl MethodHandler for Forward {
    async fn call(&self, req: Request, next: Next<'_>, _provider: &DomainEngine) -> RpcResult {
        next.run(req).await
    }
}

// ===== Controllers =====

/// Builder with a standard method table:
///
/// - `echo`: returns params
/// - `accounts`: returns `[1, 2, 3, 4, 5]`
/// - `plugin_*`: returns params
/// - `fail`: custom error
pub fn standard_builder() -> CapabilitiesBuilder {
    CapabilitiesController::builder()
        .safe_methods(["net_version"])
        .restricted_method("echo", echo_method())
        .restricted_method("accounts", static_method(json!([1, 2, 3, 4, 5])))
        .restricted_method("plugin_*", echo_method())
        .restricted_method("fail", failing_method())
}

pub fn standard_controller() -> CapabilitiesController {
    standard_builder()
        .with_user_approval(approve_all)
        .build()
        .expect("controller should build")
}

// ===== Requests =====

/// A `requestPermissions` call for the given map.
pub fn request_permissions(permissions: Value) -> Request {
    Request::new("requestPermissions").with_params(json!([permissions]))
}

/// Requested permissions without caveats for each method.
pub fn perms(methods: &[&str]) -> RequestedPermissions {
    methods
        .iter()
        .map(|m| (m.to_string(), RequestedPermission::default()))
        .collect()
}

/// Requested permission for one method with caveats.
pub fn perms_with(method: &str, caveats: Vec<Caveat>) -> RequestedPermissions {
    let mut map = RequestedPermissions::new();
    map.insert(method.to_string(), RequestedPermission::with_caveats(caveats));
    map
}
