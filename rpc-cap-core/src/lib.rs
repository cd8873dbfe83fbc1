//! # rpc-cap
//!
//! Object-capability authorization for RPC method calls.
//!
//! A [`CapabilitiesController`] sits in a middleware chain and decides, per
//! calling domain, whether a method may run. Authority is held as explicit
//! [`Permission`]s, one per (domain, method), each optionally attenuated by
//! [`Caveat`]s that restrict params or filter results. Domains ask for new
//! permissions with `requestPermissions`, which the user approves or rejects
//! through a [`UserApproval`] callback.
//!
//! ## Quick Start
//!
//! ```rust
//! use rpc_cap_core::{
//!     CapabilitiesController, PermissionsRequest, Request, RequestedPermissions,
//!     RestrictedMethod, RpcError,
//! };
//! use serde_json::json;
//!
//! async fn approve_all(req: PermissionsRequest) -> Result<RequestedPermissions, RpcError> {
//!     Ok(req.permissions)
//! }
//!
//! # tokio_test::block_on(async {
//! let controller = CapabilitiesController::builder()
//!     .restricted_method(
//!         "eth_accounts",
//!         RestrictedMethod::from_fn("View your accounts", |_req| Ok(json!(["0xa", "0xb"]))),
//!     )
//!     .with_user_approval(approve_all)
//!     .build()
//!     .unwrap();
//!
//! let engine = controller.create_permissioned_engine("https://example.com");
//!
//! // No permission yet
//! let err = engine.handle(Request::new("eth_accounts")).await.unwrap_err();
//! assert!(err.is_unauthorized());
//!
//! // Ask for it, limited to a single account
//! engine
//!     .handle(Request::new("requestPermissions").with_params(json!([{
//!         "eth_accounts": { "caveats": [{ "type": "limitResponseLength", "value": 1 }] }
//!     }])))
//!     .await
//!     .unwrap();
//!
//! let accounts = engine.handle(Request::new("eth_accounts")).await.unwrap();
//! assert_eq!(accounts, json!(["0xa"]));
//! # });
//! ```
//!
//! ## Features
//!
//! - **Exact-method permissions**: a grant for `plugin_a` never covers `plugin_b`
//! - **Namespaced methods**: one handler can serve `plugin_` or `plugin_*`
//! - **Caveats**: built-in param and response restrictions, plus custom types
//! - **Approval workflow**: queued requests, optional timeout, guaranteed cleanup
//! - **Sub-dispatch**: handlers call other methods with the caller's authority
//! - **Persistence**: in-memory or JSON file state stores
//! - **Delegation**: optional domain-to-domain grants with chain validation

pub mod caveat;
pub mod controller;
pub mod engine;
pub mod error;
pub mod events;
pub mod method;
pub mod permission;
pub mod resolver;

pub use caveat::{CaveatError, CaveatRegistry};
pub use controller::{CapabilitiesBuilder, CapabilitiesController, DomainEngine, DomainMiddleware};
pub use engine::{Engine, Middleware, Next, Request, RpcResult};
pub use error::{ConfigError, Result, RpcError};
pub use events::{CapabilityEvent, CapabilityHook};
pub use method::{MethodHandler, RestrictedMethod, UserApproval};
pub use permission::{
    CapabilitiesState, Caveat, FileStateStore, GrantSource, LookupStrategy, MemoryStateStore,
    OriginMetadata, Permission, PermissionsRequest, RequestedPermission, RequestedPermissions,
    StateStore, StoreError,
};
pub use resolver::MethodResolver;
