//! Permission lookup strategies.
//!
//! The default [`LookupStrategy::Direct`] treats every permission as
//! self-contained: if the domain holds a permission for the exact method, the
//! call is authorized.
//!
//! [`LookupStrategy::DelegationChain`] additionally requires a delegated
//! permission to trace back, through `from` links for the same method, to a
//! directly granted root. Revoking any link in the chain therefore revokes
//! everything delegated below it.

use std::collections::BTreeSet;

use super::state::CapabilitiesState;
use super::types::{GrantSource, Permission};

/// How the controller decides whether a stored permission authorizes a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LookupStrategy {
    /// Exact-method match on the calling domain only.
    #[default]
    Direct,

    /// Exact-method match plus a valid delegation chain to a direct root.
    DelegationChain,
}

/// Why a delegation chain failed to resolve.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    /// A granter in the chain no longer holds the method
    #[error("'{granter}' holds no permission for '{method}'")]
    MissingLink { granter: String, method: String },

    /// The chain loops back on itself
    #[error("delegation cycle through '{0}'")]
    Cycle(String),
}

impl LookupStrategy {
    /// Find the permission authorizing `domain` to call `method`.
    ///
    /// Returns `Ok(None)` when the domain holds no permission for the method.
    pub fn lookup<'s>(
        &self,
        state: &'s CapabilitiesState,
        domain: &str,
        method: &str,
    ) -> Result<Option<&'s Permission>, ChainError> {
        let Some(own) = state.permission(domain, method) else {
            return Ok(None);
        };

        if *self == LookupStrategy::DelegationChain && !own.source.is_direct() {
            delegation_root(state, domain, method)?;
        }
        Ok(Some(own))
    }
}

/// Follow `from` links until a directly granted permission is reached.
pub fn delegation_root<'s>(
    state: &'s CapabilitiesState,
    domain: &str,
    method: &str,
) -> Result<&'s Permission, ChainError> {
    let mut visited: BTreeSet<String> = BTreeSet::new();
    let mut current = domain.to_string();

    loop {
        if !visited.insert(current.clone()) {
            return Err(ChainError::Cycle(current));
        }

        let perm = state
            .permission(&current, method)
            .ok_or_else(|| ChainError::MissingLink {
                granter: current.clone(),
                method: method.to_string(),
            })?;

        match &perm.source {
            GrantSource::Direct => return Ok(perm),
            GrantSource::Delegated { from } => current = from.clone(),
        }
    }
}
