//! Maps concrete method names onto registered restricted methods.
//!
//! Registry keys come in three forms:
//!
//! | Key | Matches |
//! |-----|---------|
//! | `eth_accounts` | exactly `eth_accounts` |
//! | `plugin_` | any method in the `plugin_` namespace |
//! | `plugin_*` | `plugin_` itself and any method in the `plugin_` namespace |
//!
//! Resolution only answers which handler serves a call. Authorization is
//! checked separately against the exact method name, so a permission for
//! `plugin_a` never authorizes `plugin_b`.

use std::collections::{BTreeMap, BTreeSet};

use crate::method::RestrictedMethod;

const WILDCARD: char = '*';
const SEPARATOR: char = '_';

/// Resolves method names against a restricted-method table.
#[derive(Debug, Clone, Default)]
pub struct MethodResolver {
    methods: BTreeMap<String, RestrictedMethod>,
    // Wildcard keys with the trailing marker removed
    wildcards: BTreeSet<String>,
}

impl MethodResolver {
    pub fn new(methods: BTreeMap<String, RestrictedMethod>) -> Self {
        let wildcards = methods
            .keys()
            .filter_map(|key| key.strip_suffix(WILDCARD))
            .filter(|stripped| !stripped.is_empty())
            .map(str::to_string)
            .collect();
        Self { methods, wildcards }
    }

    /// The registry key that serves `method`, if any.
    pub fn resolve(&self, method: &str) -> Option<String> {
        if self.methods.contains_key(method) {
            return Some(method.to_string());
        }
        if self.wildcards.contains(method) {
            return Some(format!("{}{}", method, WILDCARD));
        }

        // Try `a_`, then `a_b_`, and so on; the first namespace that matches wins
        let mut prefix = String::with_capacity(method.len() + 1);
        for segment in method.split(SEPARATOR) {
            prefix.push_str(segment);
            prefix.push(SEPARATOR);

            if self.methods.contains_key(&prefix) {
                return Some(prefix);
            }
            if self.wildcards.contains(&prefix) {
                return Some(format!("{}{}", prefix, WILDCARD));
            }
        }
        None
    }

    /// The restricted method registered under `key`.
    pub fn get(&self, key: &str) -> Option<&RestrictedMethod> {
        self.methods.get(key)
    }

    /// Resolve `method` and return its restricted method.
    pub fn lookup(&self, method: &str) -> Option<&RestrictedMethod> {
        self.resolve(method).and_then(|key| self.methods.get(&key))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.methods.contains_key(key)
    }

    /// Registry key to description.
    pub fn descriptions(&self) -> BTreeMap<String, String> {
        self.methods
            .iter()
            .map(|(key, method)| (key.clone(), method.description.clone()))
            .collect()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }
}
