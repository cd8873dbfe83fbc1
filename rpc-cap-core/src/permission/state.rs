//! Controller state and the pure operations over it.
//!
//! Everything here runs on a plain value. The controller takes care of
//! locking and persistence, which keeps these rules easy to test in isolation:
//!
//! - at most one permission per (domain, method)
//! - adding a permission replaces any existing one for the same method
//! - a domain whose permission list becomes empty is removed

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::types::{Permission, PermissionsRequest};

/// Permissions held by a single domain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainEntry {
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

/// Persistable controller state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitiesState {
    /// Origin to domain entry. Never contains an entry with zero permissions.
    #[serde(default)]
    pub domains: BTreeMap<String, DomainEntry>,

    /// Requests awaiting user approval.
    #[serde(default)]
    pub permissions_requests: Vec<PermissionsRequest>,
}

impl CapabilitiesState {
    /// Permissions of a domain, empty if the domain is unknown.
    pub fn permissions_for(&self, domain: &str) -> &[Permission] {
        self.domains
            .get(domain)
            .map(|entry| entry.permissions.as_slice())
            .unwrap_or(&[])
    }

    /// The permission for exactly `method`, if the domain holds one.
    pub fn permission(&self, domain: &str, method: &str) -> Option<&Permission> {
        self.permissions_for(domain)
            .iter()
            .find(|p| p.method == method)
    }

    /// Replace the domain's permissions, dropping the entry when empty.
    pub fn set_domain(&mut self, domain: &str, permissions: Vec<Permission>) {
        if permissions.is_empty() {
            self.domains.remove(domain);
        } else {
            self.domains
                .insert(domain.to_string(), DomainEntry { permissions });
        }
    }

    /// Add permissions to a domain, replacing existing ones for the same methods.
    pub fn add_permissions(&mut self, domain: &str, new_permissions: Vec<Permission>) {
        let mut permissions: Vec<Permission> = self
            .permissions_for(domain)
            .iter()
            .filter(|old| !new_permissions.iter().any(|new| new.method == old.method))
            .cloned()
            .collect();

        for new in new_permissions {
            // Later entries for the same method win within a single batch too
            permissions.retain(|p| p.method != new.method);
            permissions.push(new);
        }

        self.set_domain(domain, permissions);
    }

    /// Remove the permissions for the given methods. Returns how many were removed.
    pub fn remove_permissions<S: AsRef<str>>(&mut self, domain: &str, methods: &[S]) -> usize {
        let before = self.permissions_for(domain);
        let original_len = before.len();
        let remaining: Vec<Permission> = before
            .iter()
            .filter(|p| !methods.iter().any(|m| m.as_ref() == p.method))
            .cloned()
            .collect();
        let removed = original_len - remaining.len();

        if removed > 0 {
            self.set_domain(domain, remaining);
        }
        removed
    }

    /// Remove every permission of every domain.
    pub fn clear_domains(&mut self) {
        self.domains.clear();
    }

    /// Drop a pending request by id.
    pub fn remove_request(&mut self, request_id: &str) -> bool {
        let original_len = self.permissions_requests.len();
        self.permissions_requests
            .retain(|req| req.metadata.id != request_id);
        self.permissions_requests.len() < original_len
    }
}
