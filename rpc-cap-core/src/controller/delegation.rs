//! Delegating permissions between domains.
//!
//! A domain holding a valid permission may hand a copy of it, caveats
//! included, to another domain. The copy records where it came from, so
//! with [`LookupStrategy::DelegationChain`] it stops working as soon as the
//! granter loses the permission. Only the granter may revoke what it
//! delegated.
//!
//! [`LookupStrategy::DelegationChain`]: crate::permission::LookupStrategy::DelegationChain

use serde_json::json;

use super::CapabilitiesController;
use crate::engine::{Request, RpcResult};
use crate::error::{Result, RpcError};
use crate::events::CapabilityEvent;
use crate::permission::{delegation_root, OriginMetadata, Permission};

impl CapabilitiesController {
    /// Delegate `granter`'s permissions for `methods` to `grantee`.
    ///
    /// Fails `unauthorized` unless the granter holds a valid permission for
    /// every method. Nothing is written on failure.
    pub fn grant_delegated<S: AsRef<str>>(
        &self,
        granter: &str,
        grantee: &str,
        methods: &[S],
    ) -> Result<Vec<Permission>> {
        if granter == grantee {
            return Err(RpcError::invalid_request(Some(
                json!({ "reason": "cannot delegate to self", "origin": granter }),
            )));
        }

        let granted = self.mutate(|state| {
            let mut delegated = Vec::with_capacity(methods.len());
            for method in methods {
                let method = method.as_ref();
                let own = state.permission(granter, method).ok_or_else(|| {
                    RpcError::unauthorized(Some(json!({ "granter": granter, "method": method })))
                })?;
                if let Err(err) = delegation_root(state, granter, method) {
                    log::warn!("{} cannot delegate {}: {}", granter, method, err);
                    return Err(RpcError::unauthorized(Some(
                        json!({ "granter": granter, "method": method, "reason": err.to_string() }),
                    )));
                }

                delegated.push(
                    Permission::new(method, grantee)
                        .with_caveats(own.caveats.clone())
                        .delegated_from(granter),
                );
            }

            state.add_permissions(grantee, delegated.clone());
            Ok(delegated)
        })?;

        log::info!(
            "{} delegated {} permission(s) to {}",
            granter,
            granted.len(),
            grantee
        );
        self.emit(CapabilityEvent::PermissionsGranted {
            origin: grantee.to_string(),
            permissions: granted.clone(),
        });
        Ok(granted)
    }

    /// Revoke permissions `granter` delegated to `grantee`.
    ///
    /// Fails `unauthorized` if any of the grantee's permissions for `methods`
    /// is missing or was not delegated by the granter.
    pub fn revoke_delegated<S: AsRef<str>>(
        &self,
        granter: &str,
        grantee: &str,
        methods: &[S],
    ) -> Result<Vec<String>> {
        let revoked = self.mutate(|state| {
            for method in methods {
                let method = method.as_ref();
                let delegated_by_granter = state
                    .permission(grantee, method)
                    .is_some_and(|p| p.source.granter() == Some(granter));
                if !delegated_by_granter {
                    return Err(RpcError::unauthorized(Some(
                        json!({ "granter": granter, "grantee": grantee, "method": method }),
                    )));
                }
            }

            state.remove_permissions(grantee, methods);
            Ok(methods
                .iter()
                .map(|m| m.as_ref().to_string())
                .collect::<Vec<_>>())
        })?;

        log::info!(
            "{} revoked {} permission(s) from {}",
            granter,
            revoked.len(),
            grantee
        );
        self.emit(CapabilityEvent::PermissionsRemoved {
            origin: grantee.to_string(),
            methods: revoked.clone(),
        });
        Ok(revoked)
    }

    pub(super) fn handle_grant_permissions(
        &self,
        origin: &OriginMetadata,
        req: &Request,
    ) -> RpcResult {
        let (grantee, methods) = parse_grantee_methods(req)?;
        let granted = self.grant_delegated(&origin.origin, &grantee, &methods)?;
        Ok(serde_json::to_value(granted)?)
    }

    pub(super) fn handle_revoke_permissions(
        &self,
        origin: &OriginMetadata,
        req: &Request,
    ) -> RpcResult {
        let (grantee, methods) = parse_grantee_methods(req)?;
        let revoked = self.revoke_delegated(&origin.origin, &grantee, &methods)?;
        Ok(json!(revoked))
    }
}

/// Parse `params: [grantee, { method: {} }]`.
fn parse_grantee_methods(req: &Request) -> Result<(String, Vec<String>)> {
    let invalid = || RpcError::invalid_request(Some(req.to_value()));
    let params = req.params.as_array().ok_or_else(invalid)?;

    let grantee = params
        .first()
        .and_then(|v| v.as_str())
        .ok_or_else(invalid)?
        .to_string();
    let methods: Vec<String> = params
        .get(1)
        .and_then(|v| v.as_object())
        .ok_or_else(invalid)?
        .keys()
        .cloned()
        .collect();

    if methods.is_empty() {
        return Err(invalid());
    }
    Ok((grantee, methods))
}
