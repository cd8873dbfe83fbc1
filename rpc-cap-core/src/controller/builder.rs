//! CapabilitiesBuilder for fluent controller construction
//!
//! All configuration is collected here and frozen by `build()`. The
//! controller never changes its restricted methods, caveat types, or safe
//! methods afterwards.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use super::{
    CapabilitiesController, Inner, InternalMethod, GET_PERMISSIONS, GRANT_PERMISSIONS,
    REQUEST_PERMISSIONS, REVOKE_PERMISSIONS,
};
use crate::caveat::{CaveatError, CaveatRegistry};
use crate::engine::{Engine, Middleware};
use crate::error::ConfigError;
use crate::events::CapabilityHook;
use crate::method::{RestrictedMethod, UserApproval};
use crate::permission::{
    CapabilitiesState, Caveat, LookupStrategy, MemoryStateStore, StateStore,
};
use crate::resolver::MethodResolver;

/// Builder for creating a [`CapabilitiesController`]
///
/// # Example
///
/// ```rust
/// use rpc_cap_core::{CapabilitiesController, PermissionsRequest, RequestedPermissions, RestrictedMethod, RpcError};
/// use serde_json::json;
///
/// async fn approve_all(req: PermissionsRequest) -> Result<RequestedPermissions, RpcError> {
///     Ok(req.permissions)
/// }
///
/// let controller = CapabilitiesController::builder()
///     .safe_methods(["net_version"])
///     .restricted_method(
///         "eth_accounts",
///         RestrictedMethod::from_fn("View your accounts", |_req| Ok(json!(["0xabc"]))),
///     )
///     .with_user_approval(approve_all)
///     .build()
///     .unwrap();
///
/// assert_eq!(controller.permissions_descriptions()["eth_accounts"], "View your accounts");
/// ```
pub struct CapabilitiesBuilder {
    safe_methods: Vec<String>,
    method_prefix: String,
    restricted_methods: BTreeMap<String, RestrictedMethod>,
    approval: Option<Arc<dyn UserApproval>>,
    /// Opt-in limit on how long an approval may stay pending
    approval_timeout: Option<Duration>,
    /// Downstream engine reached by sub-dispatchers after the controller
    engine: Option<Engine>,
    /// Custom store (if None, uses MemoryStateStore)
    store: Option<Box<dyn StateStore>>,
    initial_state: Option<CapabilitiesState>,
    caveats: CaveatRegistry,
    lookup: LookupStrategy,
    hooks: Vec<Arc<dyn CapabilityHook>>,
}

impl Default for CapabilitiesBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilitiesBuilder {
    /// Create a builder with the built-in caveat types and no methods
    pub fn new() -> Self {
        Self {
            safe_methods: Vec::new(),
            method_prefix: String::new(),
            restricted_methods: BTreeMap::new(),
            approval: None,
            approval_timeout: None,
            engine: None,
            store: None,
            initial_state: None,
            caveats: CaveatRegistry::builtin(),
            lookup: LookupStrategy::Direct,
            hooks: Vec::new(),
        }
    }

    /// Methods that pass through without any permission
    pub fn safe_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.safe_methods.extend(methods.into_iter().map(Into::into));
        self
    }

    /// Prefix for the internal method names, e.g. `wallet_`
    pub fn method_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.method_prefix = prefix.into();
        self
    }

    /// Register a restricted method under a key
    ///
    /// Keys ending in `_` cover a namespace; keys ending in `*` cover the
    /// namespace and the bare prefix.
    pub fn restricted_method(mut self, key: impl Into<String>, method: RestrictedMethod) -> Self {
        self.restricted_methods.insert(key.into(), method);
        self
    }

    /// Register several restricted methods
    pub fn restricted_methods<I, K>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = (K, RestrictedMethod)>,
        K: Into<String>,
    {
        self.restricted_methods
            .extend(methods.into_iter().map(|(key, method)| (key.into(), method)));
        self
    }

    /// Set the callback that asks the user to approve permission requests
    ///
    /// Required; `build()` fails without it.
    pub fn with_user_approval(mut self, approval: impl UserApproval + 'static) -> Self {
        self.approval = Some(Arc::new(approval));
        self
    }

    /// Fail pending approvals as rejected after `timeout`
    ///
    /// Without this, a request waits for as long as the callback does.
    pub fn with_approval_timeout(mut self, timeout: Duration) -> Self {
        self.approval_timeout = Some(timeout);
        self
    }

    /// Chain a downstream engine behind the controller's sub-dispatchers
    pub fn with_engine(mut self, engine: Engine) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Persist state through a custom store
    pub fn with_state_store(mut self, store: impl StateStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    /// Start from the given state instead of the store's contents
    pub fn with_initial_state(mut self, state: CapabilitiesState) -> Self {
        self.initial_state = Some(state);
        self
    }

    /// Register an additional caveat type
    pub fn with_caveat_type<F>(mut self, kind: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(&Caveat) -> Result<Arc<dyn Middleware>, CaveatError> + Send + Sync + 'static,
    {
        self.caveats.register(kind, constructor);
        self
    }

    /// Require delegated permissions to trace back to a direct grant, and
    /// expose the grant/revoke internal methods
    pub fn with_delegation_chains(mut self) -> Self {
        self.lookup = LookupStrategy::DelegationChain;
        self
    }

    /// Register a hook for controller events
    pub fn add_hook(mut self, hook: impl CapabilityHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Build the controller
    ///
    /// Loads persisted state from the store unless an initial state was
    /// given. Pending requests are dropped, since nothing awaits them.
    pub fn build(self) -> Result<CapabilitiesController, ConfigError> {
        let approval = self.approval.ok_or(ConfigError::MissingUserApproval)?;

        let prefix = self.method_prefix;
        let mut internal_methods = BTreeMap::new();
        internal_methods.insert(format!("{prefix}{GET_PERMISSIONS}"), InternalMethod::GetPermissions);
        internal_methods.insert(
            format!("{prefix}{REQUEST_PERMISSIONS}"),
            InternalMethod::RequestPermissions,
        );
        if self.lookup == LookupStrategy::DelegationChain {
            internal_methods.insert(
                format!("{prefix}{GRANT_PERMISSIONS}"),
                InternalMethod::GrantPermissions,
            );
            internal_methods.insert(
                format!("{prefix}{REVOKE_PERMISSIONS}"),
                InternalMethod::RevokePermissions,
            );
        }

        // Safe and internal names are routed before restricted ones and would shadow them
        let safe_methods: BTreeSet<String> = self.safe_methods.into_iter().collect();
        if let Some(conflict) = safe_methods
            .iter()
            .chain(internal_methods.keys())
            .find(|m| self.restricted_methods.contains_key(m.as_str()))
        {
            return Err(ConfigError::ConflictingMethod(conflict.clone()));
        }
        if let Some(conflict) = safe_methods
            .iter()
            .find(|m| internal_methods.contains_key(m.as_str()))
        {
            return Err(ConfigError::ConflictingMethod(conflict.clone()));
        }

        let store = self
            .store
            .unwrap_or_else(|| Box::new(MemoryStateStore::new()));

        let (mut state, mut dirty) = match self.initial_state {
            Some(state) => (state, true),
            None => (store.load()?.unwrap_or_default(), false),
        };
        let before = state.domains.len();
        state.domains.retain(|_, entry| !entry.permissions.is_empty());
        if state.domains.len() != before {
            log::debug!(
                "dropping {} domain(s) without permissions",
                before - state.domains.len()
            );
            dirty = true;
        }
        if !state.permissions_requests.is_empty() {
            log::debug!(
                "discarding {} stale permissions request(s)",
                state.permissions_requests.len()
            );
            state.permissions_requests.clear();
            dirty = true;
        }
        if dirty {
            store.save(&state)?;
        }

        Ok(CapabilitiesController {
            inner: Arc::new(Inner {
                safe_methods,
                internal_methods,
                method_prefix: prefix,
                resolver: MethodResolver::new(self.restricted_methods),
                caveats: self.caveats,
                approval,
                approval_timeout: self.approval_timeout,
                engine: self.engine,
                lookup: self.lookup,
                state: RwLock::new(state),
                store,
                hooks: RwLock::new(self.hooks),
            }),
        })
    }
}
