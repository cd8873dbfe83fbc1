//! The capabilities controller.
//!
//! [`CapabilitiesController`] owns the permission state and everything
//! needed to enforce it: the restricted-method table, the caveat registry,
//! the approval callback, and an optional downstream engine. It is cheap to
//! clone; clones share the same state.
//!
//! Every mutation follows the same discipline: copy the current state,
//! apply the change to the copy, write the copy to the [`StateStore`], and
//! only then make it visible. A failed validation or a failed write leaves
//! the visible state untouched.

mod builder;
mod caveats;
mod delegation;
mod dispatch;
mod request;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

pub use builder::CapabilitiesBuilder;
pub use dispatch::{DomainEngine, DomainMiddleware};

use crate::caveat::CaveatRegistry;
use crate::engine::Engine;
use crate::error::Result;
use crate::events::{CapabilityEvent, CapabilityHook};
use crate::method::UserApproval;
use crate::permission::{
    CapabilitiesState, DomainEntry, LookupStrategy, Permission, PermissionsRequest, StateStore,
};
use crate::resolver::MethodResolver;

/// Name of the method returning the caller's permissions.
pub const GET_PERMISSIONS: &str = "getPermissions";
/// Name of the method asking the user for new permissions.
pub const REQUEST_PERMISSIONS: &str = "requestPermissions";
/// Name of the method delegating permissions to another domain.
pub const GRANT_PERMISSIONS: &str = "grantPermissions";
/// Name of the method revoking delegated permissions.
pub const REVOKE_PERMISSIONS: &str = "revokePermissions";

/// Methods the controller answers itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InternalMethod {
    GetPermissions,
    RequestPermissions,
    GrantPermissions,
    RevokePermissions,
}

/// Authorizes RPC calls per calling domain.
#[derive(Clone)]
pub struct CapabilitiesController {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    safe_methods: BTreeSet<String>,
    internal_methods: BTreeMap<String, InternalMethod>,
    method_prefix: String,
    resolver: MethodResolver,
    caveats: CaveatRegistry,
    approval: Arc<dyn UserApproval>,
    approval_timeout: Option<Duration>,
    engine: Option<Engine>,
    lookup: LookupStrategy,
    state: RwLock<CapabilitiesState>,
    store: Box<dyn StateStore>,
    hooks: RwLock<Vec<Arc<dyn CapabilityHook>>>,
}

impl CapabilitiesController {
    /// Create a builder for configuring a controller.
    pub fn builder() -> CapabilitiesBuilder {
        CapabilitiesBuilder::new()
    }

    /// Prefix applied to the internal method names.
    pub fn method_prefix(&self) -> &str {
        &self.inner.method_prefix
    }

    /// Lookup strategy used to authorize calls.
    pub fn lookup_strategy(&self) -> LookupStrategy {
        self.inner.lookup
    }

    /// The caveat registry this controller validates against.
    pub fn caveat_registry(&self) -> &CaveatRegistry {
        &self.inner.caveats
    }

    // ===== Store Accessors =====

    /// All domains holding at least one permission.
    pub fn get_domains(&self) -> BTreeMap<String, DomainEntry> {
        self.inner.state.read().domains.clone()
    }

    /// Permissions held by a domain, empty if none.
    pub fn get_permissions_for_domain(&self, domain: &str) -> Vec<Permission> {
        self.inner.state.read().permissions_for(domain).to_vec()
    }

    /// The domain's permission for exactly `method`.
    pub fn get_permission(&self, domain: &str, method: &str) -> Option<Permission> {
        self.inner.state.read().permission(domain, method).cloned()
    }

    /// Returns true if the domain holds any permission.
    pub fn has_permissions(&self, domain: &str) -> bool {
        !self.inner.state.read().permissions_for(domain).is_empty()
    }

    /// Returns true if the domain holds a permission for exactly `method`.
    pub fn has_permission(&self, domain: &str, method: &str) -> bool {
        self.inner.state.read().permission(domain, method).is_some()
    }

    /// Add permissions to a domain, replacing existing ones for the same methods.
    ///
    /// Caveats are validated first; nothing is written if any list is invalid.
    /// The stored invoker is always `domain`.
    pub fn add_permissions_for(&self, domain: &str, mut permissions: Vec<Permission>) -> Result<()> {
        for permission in &mut permissions {
            self.inner.caveats.validate_caveats(&permission.caveats)?;
            if permission.invoker != domain {
                log::debug!(
                    "filing permission for {} issued to {} under {}",
                    permission.method,
                    permission.invoker,
                    domain
                );
                permission.invoker = domain.to_string();
            }
        }

        let added = permissions.clone();
        self.mutate(|state| {
            state.add_permissions(domain, permissions);
            Ok(())
        })?;

        log::info!("added {} permission(s) for {}", added.len(), domain);
        self.emit(CapabilityEvent::PermissionsGranted {
            origin: domain.to_string(),
            permissions: added,
        });
        Ok(())
    }

    /// Remove the permissions for the given methods. Returns how many were removed.
    pub fn remove_permissions_for<S: AsRef<str>>(&self, domain: &str, methods: &[S]) -> Result<usize> {
        let removed: Vec<String> = {
            let state = self.inner.state.read();
            state
                .permissions_for(domain)
                .iter()
                .filter(|p| methods.iter().any(|m| m.as_ref() == p.method))
                .map(|p| p.method.clone())
                .collect()
        };

        let count = self.mutate(|state| Ok(state.remove_permissions(domain, methods)))?;

        if count > 0 {
            log::info!("removed {} permission(s) from {}", count, domain);
            self.emit(CapabilityEvent::PermissionsRemoved {
                origin: domain.to_string(),
                methods: removed,
            });
        }
        Ok(count)
    }

    /// Remove every permission of every domain.
    pub fn clear_domains(&self) -> Result<()> {
        let cleared = self.mutate(|state| {
            let cleared = std::mem::take(&mut state.domains);
            Ok(cleared)
        })?;

        log::info!("cleared permissions of {} domain(s)", cleared.len());
        for (origin, entry) in cleared {
            self.emit(CapabilityEvent::PermissionsRemoved {
                origin,
                methods: entry.permissions.into_iter().map(|p| p.method).collect(),
            });
        }
        Ok(())
    }

    /// Requests currently waiting for user approval.
    pub fn get_permissions_requests(&self) -> Vec<PermissionsRequest> {
        self.inner.state.read().permissions_requests.clone()
    }

    /// Restricted-method key to description, for approval UIs.
    pub fn permissions_descriptions(&self) -> BTreeMap<String, String> {
        self.inner.resolver.descriptions()
    }

    /// Snapshot of the current state.
    pub fn serialize(&self) -> CapabilitiesState {
        self.inner.state.read().clone()
    }

    // ===== Hooks =====

    /// Register a hook at runtime.
    pub fn add_hook(&self, hook: impl CapabilityHook + 'static) {
        self.inner.hooks.write().push(Arc::new(hook));
    }

    pub(crate) fn emit(&self, event: CapabilityEvent) {
        // Snapshot so a hook may register further hooks
        let hooks: Vec<Arc<dyn CapabilityHook>> = self.inner.hooks.read().clone();
        for hook in hooks {
            hook.on_event(&event);
        }
    }

    // ===== State =====

    /// Apply `f` to a copy of the state, persist it, then publish it.
    pub(crate) fn mutate<T>(
        &self,
        f: impl FnOnce(&mut CapabilitiesState) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.inner.state.write();
        let mut next = state.clone();
        let out = f(&mut next)?;
        self.inner.store.save(&next)?;
        *state = next;
        Ok(out)
    }
}

impl fmt::Debug for CapabilitiesController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilitiesController")
            .field("safe_methods", &self.inner.safe_methods)
            .field("internal_methods", &self.inner.internal_methods)
            .field("restricted_methods", &self.inner.resolver.keys().collect::<Vec<_>>())
            .field("lookup", &self.inner.lookup)
            .field("approval_timeout", &self.inner.approval_timeout)
            .finish_non_exhaustive()
    }
}
