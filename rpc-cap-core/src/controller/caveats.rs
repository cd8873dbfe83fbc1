//! Caveat queries and mutations on stored permissions.
//!
//! Mutations build the new caveat list on a copy, validate it, and only then
//! replace the permission. Any failure leaves the stored caveats untouched.

use serde_json::{json, Value};

use super::CapabilitiesController;
use crate::caveat::{json_kind, CaveatError};
use crate::error::{Result, RpcError};
use crate::permission::{CapabilitiesState, Caveat, Permission};

fn no_such_permission(domain: &str, method: &str) -> RpcError {
    RpcError::internal(
        "No such permission exists for the given domain.",
        Some(json!({ "domain": domain, "method": method })),
    )
}

fn existing_permission(
    state: &CapabilitiesState,
    domain: &str,
    method: &str,
) -> Result<Permission> {
    state
        .permission(domain, method)
        .cloned()
        .ok_or_else(|| no_such_permission(domain, method))
}

impl CapabilitiesController {
    /// Caveats of the domain's permission for `method`, if it exists.
    pub fn get_caveats(&self, domain: &str, method: &str) -> Option<Vec<Caveat>> {
        self.inner
            .state
            .read()
            .permission(domain, method)
            .map(|p| p.caveats.clone())
    }

    /// The named caveat of the domain's permission for `method`.
    pub fn get_caveat(&self, domain: &str, method: &str, name: &str) -> Option<Caveat> {
        self.inner
            .state
            .read()
            .permission(domain, method)
            .and_then(|p| p.caveat(name).cloned())
    }

    /// Append a caveat to an existing permission.
    pub fn add_caveat_for(&self, domain: &str, method: &str, caveat: Caveat) -> Result<()> {
        self.inner.caveats.validate_caveat(&caveat)?;

        self.mutate(|state| {
            let mut permission = existing_permission(state, domain, method)?;
            let mut caveats = permission.caveats.clone();
            caveats.push(caveat);
            self.inner.caveats.validate_caveats(&caveats)?;

            permission.caveats = caveats;
            state.add_permissions(domain, vec![permission]);
            Ok(())
        })?;

        log::debug!("added caveat to {} for {}", method, domain);
        Ok(())
    }

    /// Replace the value of a named caveat.
    ///
    /// The new value must have the same JSON type as the current one.
    pub fn update_caveat_for(
        &self,
        domain: &str,
        method: &str,
        name: &str,
        value: Value,
    ) -> Result<()> {
        if name.is_empty() {
            return Err(CaveatError::NameRequired.into());
        }

        self.mutate(|state| {
            let mut permission = existing_permission(state, domain, method)?;
            let mut caveats = permission.caveats.clone();
            let target = caveats
                .iter_mut()
                .find(|c| c.name.as_deref() == Some(name))
                .ok_or_else(|| CaveatError::NoSuchCaveat(name.to_string()))?;

            let (expected, actual) = (json_kind(&target.value), json_kind(&value));
            if expected != actual {
                return Err(CaveatError::TypeMismatch {
                    name: name.to_string(),
                    expected,
                    actual,
                }
                .into());
            }
            target.value = value;
            self.inner.caveats.validate_caveats(&caveats)?;

            permission.caveats = caveats;
            state.add_permissions(domain, vec![permission]);
            Ok(())
        })?;

        log::debug!("updated caveat '{}' of {} for {}", name, method, domain);
        Ok(())
    }

    /// Remove a named caveat.
    pub fn remove_caveat_for(&self, domain: &str, method: &str, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(CaveatError::NameRequired.into());
        }

        self.mutate(|state| {
            let mut permission = existing_permission(state, domain, method)?;
            let before = permission.caveats.len();
            permission
                .caveats
                .retain(|c| c.name.as_deref() != Some(name));
            if permission.caveats.len() == before {
                return Err(CaveatError::NoSuchCaveat(name.to_string()).into());
            }

            state.add_permissions(domain, vec![permission]);
            Ok(())
        })?;

        log::debug!("removed caveat '{}' of {} for {}", name, method, domain);
        Ok(())
    }
}
