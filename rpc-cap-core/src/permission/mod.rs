//! Permission data model and storage.
//!
//! This module holds the records the controller reasons about and the
//! storage they live in:
//!
//! - **[`Permission`]**: An explicit grant for one domain to call one exact method
//! - **[`Caveat`]**: A typed attenuation attached to a permission
//! - **[`CapabilitiesState`]**: All domains and pending requests, with the pure store operations
//! - **[`StateStore`]**: Trait for persisting state
//! - **[`MemoryStateStore`]**: In-memory store (cleared on exit)
//! - **[`FileStateStore`]**: JSON file store
//! - **[`LookupStrategy`]**: Direct lookup or delegation-chain lookup
//!
//! # Invariants
//!
//! | Rule | Enforced by |
//! |------|-------------|
//! | At most one permission per (domain, method) | [`CapabilitiesState::add_permissions`] |
//! | Adding replaces, never merges caveats | [`CapabilitiesState::add_permissions`] |
//! | No domain entry with zero permissions | [`CapabilitiesState::set_domain`] |
//!
//! # Example
//!
//! ```rust
//! use rpc_cap_core::permission::{CapabilitiesState, Caveat, Permission};
//! use serde_json::json;
//!
//! let mut state = CapabilitiesState::default();
//! state.add_permissions("example.com", vec![Permission::new("eth_accounts", "example.com")]);
//!
//! // Granting again replaces the whole permission, caveats included
//! let limited = Permission::new("eth_accounts", "example.com")
//!     .with_caveats(vec![Caveat::new("limitResponseLength", json!(1))]);
//! state.add_permissions("example.com", vec![limited]);
//! assert_eq!(state.permissions_for("example.com").len(), 1);
//!
//! state.remove_permissions("example.com", &["eth_accounts"]);
//! assert!(state.domains.is_empty());
//! ```

mod delegation;
mod state;
mod store;
mod types;

pub use delegation::{delegation_root, ChainError, LookupStrategy};
pub use state::{CapabilitiesState, DomainEntry};
pub use store::{FileStateStore, MemoryStateStore, StateStore, StoreError};
pub use types::{
    Caveat, GrantSource, OriginMetadata, Permission, PermissionsRequest, Proof, ProofPurpose,
    RequestMetadata, RequestedPermission, RequestedPermissions, PERMISSION_CONTEXT,
};
