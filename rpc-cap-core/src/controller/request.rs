//! The permissions request workflow.
//!
//! A request is validated, queued, and handed to the approval callback. The
//! callback is the only point where the workflow suspends. Whatever the
//! outcome, the request leaves the queue afterwards: a guard removes it when
//! the workflow finishes, fails, or its future is dropped.

use serde_json::{json, Value};
use uuid::Uuid;

use super::CapabilitiesController;
use crate::engine::{Request, RpcResult};
use crate::error::{Result, RpcError};
use crate::events::CapabilityEvent;
use crate::permission::{
    OriginMetadata, Permission, PermissionsRequest, RequestMetadata, RequestedPermissions,
};

impl CapabilitiesController {
    pub(super) async fn handle_request_permissions(
        &self,
        origin: &OriginMetadata,
        req: &Request,
    ) -> RpcResult {
        let requested = parse_requested_permissions(req)?;
        let granted = self.request_permissions(origin, requested).await?;
        Ok(serde_json::to_value(granted)?)
    }

    /// Ask the user to grant `requested` to `origin`.
    ///
    /// Resolves with the domain's permissions after the approved ones were
    /// committed. An empty approval fails with `userRejectedRequest`, and an
    /// approval error is returned as is.
    pub async fn request_permissions(
        &self,
        origin: &OriginMetadata,
        requested: RequestedPermissions,
    ) -> Result<Vec<Permission>> {
        for (method, entry) in &requested {
            if entry.method.as_ref().is_some_and(|m| m != method) {
                return Err(RpcError::invalid_request(Some(
                    json!({ "method": method, "parentCapability": entry.method }),
                )));
            }
            if self.inner.resolver.resolve(method).is_none() {
                return Err(RpcError::method_not_found(Some(json!(method))));
            }
        }

        let mut request = PermissionsRequest {
            metadata: RequestMetadata {
                id: String::new(),
                origin: origin.origin.clone(),
                site_title: origin.site_title.clone(),
            },
            permissions: requested,
        };

        // Queued ids are unique; a caller id already in the queue is replaced
        let mut queued = request.clone();
        request.metadata.id = self.mutate(|state| {
            let id = match &origin.id {
                Some(id) if state.permissions_requests.iter().all(|r| r.id() != id) => id.clone(),
                Some(id) => {
                    log::debug!("request id {} is already queued, assigning a new one", id);
                    Uuid::new_v4().to_string()
                }
                None => Uuid::new_v4().to_string(),
            };
            queued.metadata.id = id.clone();
            state.permissions_requests.push(queued);
            Ok(id)
        })?;
        let mut pending = PendingRequest {
            controller: self,
            id: request.metadata.id.clone(),
            origin: request.metadata.origin.clone(),
            approved: false,
        };

        log::info!(
            "permissions request {} from {} queued for approval",
            pending.id,
            pending.origin
        );
        self.emit(CapabilityEvent::RequestQueued {
            request_id: pending.id.clone(),
            origin: pending.origin.clone(),
            methods: request.permissions.keys().cloned().collect(),
        });

        let approved = self.await_approval(request).await?;
        if approved.is_empty() {
            log::info!("permissions request {} rejected", pending.id);
            return Err(RpcError::user_rejected(Some(
                json!({ "id": pending.id, "origin": pending.origin }),
            )));
        }

        let granted = self.grant_new_permissions(&origin.origin, approved)?;
        pending.approved = true;
        Ok(granted)
    }

    async fn await_approval(&self, request: PermissionsRequest) -> Result<RequestedPermissions> {
        let id = request.metadata.id.clone();
        let approval = self.inner.approval.approve(request);

        match self.inner.approval_timeout {
            None => approval.await,
            Some(limit) => match tokio::time::timeout(limit, approval).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    log::info!("permissions request {} timed out after {:?}", id, limit);
                    Err(RpcError::user_rejected(Some(
                        json!({ "id": id, "reason": "timeout" }),
                    )))
                }
            },
        }
    }

    /// Commit approved permissions for `domain`.
    ///
    /// Every method must resolve and every caveat list must be valid before
    /// anything is written. Returns the domain's permissions after the commit.
    pub fn grant_new_permissions(
        &self,
        domain: &str,
        approved: RequestedPermissions,
    ) -> Result<Vec<Permission>> {
        if let Some(unknown) = approved
            .keys()
            .find(|method| self.inner.resolver.resolve(method).is_none())
        {
            return Err(RpcError::method_not_found(Some(json!(unknown))));
        }

        let mut permissions = Vec::with_capacity(approved.len());
        for (method, entry) in approved {
            let permission =
                Permission::new(method, domain).with_caveats(entry.caveats.unwrap_or_default());
            if let Err(err) = self.inner.caveats.validate_caveats(&permission.caveats) {
                return Err(RpcError::internal(
                    "Invalid caveats.",
                    Some(json!({
                        "permission": serde_json::to_value(&permission).unwrap_or(Value::Null),
                        "reason": err.to_string(),
                    })),
                ));
            }
            permissions.push(permission);
        }

        let added = permissions.clone();
        let committed = self.mutate(|state| {
            state.add_permissions(domain, permissions);
            Ok(state.permissions_for(domain).to_vec())
        })?;

        log::info!("granted {} permission(s) to {}", added.len(), domain);
        self.emit(CapabilityEvent::PermissionsGranted {
            origin: domain.to_string(),
            permissions: added,
        });
        Ok(committed)
    }

    fn dequeue_request(&self, id: &str) {
        let result = self.mutate(|state| Ok(state.remove_request(id)));
        if let Err(err) = result {
            log::warn!("failed to dequeue permissions request {}: {}", id, err);
        }
    }
}

/// Removes a queued request when the workflow ends, however it ends.
struct PendingRequest<'a> {
    controller: &'a CapabilitiesController,
    id: String,
    origin: String,
    approved: bool,
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        self.controller.dequeue_request(&self.id);
        self.controller.emit(CapabilityEvent::RequestResolved {
            request_id: std::mem::take(&mut self.id),
            origin: std::mem::take(&mut self.origin),
            approved: self.approved,
        });
    }
}

/// Extract the requested permissions from `params[0]`.
fn parse_requested_permissions(req: &Request) -> Result<RequestedPermissions> {
    let invalid = || RpcError::invalid_request(Some(req.to_value()));

    let first = req
        .params
        .as_array()
        .and_then(|params| params.first())
        .filter(|value| value.is_object())
        .ok_or_else(invalid)?;

    serde_json::from_value(first.clone()).map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_requested_permissions() {
        let req = Request::new("requestPermissions")
            .with_params(json!([{ "eth_accounts": {}, "write": { "caveats": [] } }]));
        let parsed = parse_requested_permissions(&req).unwrap();
        assert_eq!(parsed.len(), 2);
        assert!(parsed.contains_key("eth_accounts"));
    }

    #[test]
    fn test_parse_rejects_bad_shapes() {
        for params in [
            Value::Null,
            json!({ "eth_accounts": {} }),
            json!([]),
            json!([["eth_accounts"]]),
            json!(["eth_accounts"]),
            json!([{ "eth_accounts": { "caveats": "nope" } }]),
        ] {
            let req = Request::new("requestPermissions").with_params(params);
            let err = parse_requested_permissions(&req).unwrap_err();
            assert!(err.is_invalid_request());
            assert_eq!(err.data(), Some(&req.to_value()));
        }
    }
}
