//! Permission, caveat and request types.
//!
//! A [`Permission`] is an explicit grant of authority for one domain to call
//! one exact method, optionally attenuated by an ordered list of [`Caveat`]s.
//! Permissions serialize in an ocap-ld inspired shape so persisted state stays
//! readable by other tooling:
//!
//! ```json
//! {
//!   "@context": ["https://github.com/MetaMask/json-rpc-capabilities-middleware"],
//!   "id": "6f1c...",
//!   "parentCapability": "eth_accounts",
//!   "invoker": "https://example.com",
//!   "date": 1700000000000,
//!   "caveats": [{ "type": "limitResponseLength", "value": 1 }]
//! }
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// JSON-LD context attached to every permission.
pub const PERMISSION_CONTEXT: &str = "https://github.com/MetaMask/json-rpc-capabilities-middleware";

/// A named, typed attenuation attached to a permission.
///
/// `kind` selects a constructor from the caveat registry and `value` is
/// interpreted only by that constructor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Caveat {
    /// Registered caveat type, e.g. `"forceParams"`.
    #[serde(rename = "type")]
    pub kind: String,

    /// Payload for the caveat type.
    #[serde(default)]
    pub value: Value,

    /// Optional name, unique among the caveats of a single permission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Caveat {
    /// Create an unnamed caveat.
    pub fn new(kind: impl Into<String>, value: Value) -> Self {
        Self {
            kind: kind.into(),
            value,
            name: None,
        }
    }

    /// Give the caveat a name so it can be updated or removed later.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Where a permission's authority comes from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GrantSource {
    /// Granted to the domain itself (user approval or programmatic grant).
    #[default]
    Direct,

    /// Delegated by another domain that holds the same method.
    Delegated {
        /// Origin of the delegating domain.
        from: String,
    },
}

impl GrantSource {
    pub fn is_direct(&self) -> bool {
        matches!(self, GrantSource::Direct)
    }

    /// The delegating origin, if any.
    pub fn granter(&self) -> Option<&str> {
        match self {
            GrantSource::Direct => None,
            GrantSource::Delegated { from } => Some(from),
        }
    }
}

/// Purpose of a [`Proof`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProofPurpose {
    CapabilityDelegation,
    CapabilityInvocation,
}

/// Reserved proof block. Not verified by this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proof {
    #[serde(rename = "type")]
    pub kind: String,
    pub proof_purpose: ProofPurpose,
    pub created: String,
    pub creator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_value: Option<String>,
}

/// A grant of authority for one domain to call one exact method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permission {
    #[serde(rename = "@context", default = "default_context")]
    pub context: Vec<String>,

    /// Unique identifier of this grant.
    pub id: String,

    /// Exact method name this permission authorizes.
    #[serde(rename = "parentCapability")]
    pub method: String,

    /// Origin of the domain holding the permission.
    pub invoker: String,

    /// Issue time, serialized as epoch milliseconds.
    #[serde(rename = "date", with = "chrono::serde::ts_milliseconds")]
    pub issued_at: DateTime<Utc>,

    /// Ordered attenuations applied when the method is called.
    #[serde(default)]
    pub caveats: Vec<Caveat>,

    #[serde(default, skip_serializing_if = "GrantSource::is_direct")]
    pub source: GrantSource,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<Proof>,
}

fn default_context() -> Vec<String> {
    vec![PERMISSION_CONTEXT.to_string()]
}

impl Permission {
    /// Create a direct permission with a fresh id and the current time.
    pub fn new(method: impl Into<String>, invoker: impl Into<String>) -> Self {
        Self {
            context: default_context(),
            id: Uuid::new_v4().to_string(),
            method: method.into(),
            invoker: invoker.into(),
            issued_at: Utc::now(),
            caveats: Vec::new(),
            source: GrantSource::Direct,
            proof: None,
        }
    }

    /// Set the caveats.
    pub fn with_caveats(mut self, caveats: Vec<Caveat>) -> Self {
        self.caveats = caveats;
        self
    }

    /// Mark the permission as delegated by `granter`.
    pub fn delegated_from(mut self, granter: impl Into<String>) -> Self {
        self.source = GrantSource::Delegated {
            from: granter.into(),
        };
        self
    }

    /// Find a caveat by name.
    pub fn caveat(&self, name: &str) -> Option<&Caveat> {
        self.caveats
            .iter()
            .find(|c| c.name.as_deref() == Some(name))
    }
}

/// A requested (or approved) capability for a single method.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestedPermission {
    /// Explicit method name; when present it must equal the map key.
    #[serde(
        rename = "parentCapability",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub method: Option<String>,

    /// Caveats to attach to the resulting permission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caveats: Option<Vec<Caveat>>,
}

impl RequestedPermission {
    /// A request with the given caveats.
    pub fn with_caveats(caveats: Vec<Caveat>) -> Self {
        Self {
            method: None,
            caveats: Some(caveats),
        }
    }
}

/// Method name to requested capability.
pub type RequestedPermissions = BTreeMap<String, RequestedPermission>;

/// Identifies the caller a dispatcher is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginMetadata {
    /// Origin string of the calling domain.
    pub origin: String,

    /// Request id to reuse for permission requests from this caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Human-readable title, shown when asking for approval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_title: Option<String>,
}

impl OriginMetadata {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            id: None,
            site_title: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_site_title(mut self, title: impl Into<String>) -> Self {
        self.site_title = Some(title.into());
        self
    }
}

impl From<&str> for OriginMetadata {
    fn from(origin: &str) -> Self {
        Self::new(origin)
    }
}

impl From<String> for OriginMetadata {
    fn from(origin: String) -> Self {
        Self::new(origin)
    }
}

/// Metadata of a pending permissions request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMetadata {
    pub id: String,
    pub origin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_title: Option<String>,
}

/// A permissions request awaiting user approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionsRequest {
    pub metadata: RequestMetadata,
    pub permissions: RequestedPermissions,
}

impl PermissionsRequest {
    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    pub fn origin(&self) -> &str {
        &self.metadata.origin
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_permission_new() {
        let perm = Permission::new("eth_accounts", "example.com");
        assert_eq!(perm.method, "eth_accounts");
        assert_eq!(perm.invoker, "example.com");
        assert!(perm.caveats.is_empty());
        assert!(perm.source.is_direct());
        assert_eq!(perm.context, vec![PERMISSION_CONTEXT.to_string()]);
    }

    #[test]
    fn test_permission_ids_are_unique() {
        let a = Permission::new("m", "d");
        let b = Permission::new("m", "d");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_permission_wire_shape() {
        let perm = Permission::new("eth_accounts", "example.com")
            .with_caveats(vec![Caveat::new("limitResponseLength", json!(1)).named("limit")]);
        let value = serde_json::to_value(&perm).unwrap();

        assert_eq!(value["parentCapability"], "eth_accounts");
        assert_eq!(value["invoker"], "example.com");
        assert!(value["date"].is_i64());
        assert_eq!(value["@context"][0], PERMISSION_CONTEXT);
        assert_eq!(value["caveats"][0]["type"], "limitResponseLength");
        assert_eq!(value["caveats"][0]["name"], "limit");
        // Direct grants carry no source field
        assert!(value.get("source").is_none());
        assert!(value.get("proof").is_none());
    }

    #[test]
    fn test_delegated_source_serializes() {
        let perm = Permission::new("m", "grantee").delegated_from("granter");
        let value = serde_json::to_value(&perm).unwrap();
        assert_eq!(value["source"], json!({"type": "delegated", "from": "granter"}));

        let parsed: Permission = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.source.granter(), Some("granter"));
    }

    #[test]
    fn test_permission_parses_minimal_json() {
        let parsed: Permission = serde_json::from_value(json!({
            "id": "abc",
            "parentCapability": "m",
            "invoker": "d",
            "date": 0
        }))
        .unwrap();
        assert!(parsed.caveats.is_empty());
        assert!(parsed.source.is_direct());
        assert_eq!(parsed.context.len(), 1);
    }

    #[test]
    fn test_caveat_lookup_by_name() {
        let perm = Permission::new("m", "d").with_caveats(vec![
            Caveat::new("forceParams", json!([1])),
            Caveat::new("filterResponse", json!([1])).named("b"),
        ]);
        assert_eq!(perm.caveat("b").unwrap().kind, "filterResponse");
        assert!(perm.caveat("a").is_none());
    }

    #[test]
    fn test_requested_permissions_parse() {
        let parsed: RequestedPermissions = serde_json::from_value(json!({
            "eth_accounts": {},
            "write": { "caveats": [{ "type": "forceParams", "value": [0] }] },
            "read": { "parentCapability": "read" }
        }))
        .unwrap();
        assert_eq!(parsed.len(), 3);
        assert!(parsed["eth_accounts"].caveats.is_none());
        assert_eq!(parsed["write"].caveats.as_ref().unwrap().len(), 1);
        assert_eq!(parsed["read"].method.as_deref(), Some("read"));
    }
}
