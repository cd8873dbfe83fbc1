//! Caveat registry and pipeline construction.
//!
//! A caveat's `type` selects a constructor from the [`CaveatRegistry`]. The
//! constructor turns the caveat into a [`Middleware`] that runs in front of
//! the restricted method. Pre-phase caveats inspect or rewrite the request
//! before calling `next`; post-phase caveats transform the result after
//! `next` returns. Because every caveat wraps the rest of the pipeline, the
//! post-phases run in reverse order of the caveat list.
//!
//! The registry is owned by the controller that uses it. Custom caveat types
//! are added at construction time:
//!
//! ```rust
//! use std::sync::Arc;
//! use rpc_cap_core::caveat::CaveatRegistry;
//! use rpc_cap_core::engine::{Middleware, Next, Request, RpcResult};
//!
//! struct Passthrough;
//!
//! #[async_trait::async_trait]
//! impl Middleware for Passthrough {
//!     async fn call(&self, req: Request, next: Next<'_>) -> RpcResult {
//!         next.run(req).await
//!     }
//! }
//!
//! let mut registry = CaveatRegistry::builtin();
//! registry.register("noop", |_caveat| Ok(Arc::new(Passthrough) as Arc<dyn Middleware>));
//! assert!(registry.contains("noop"));
//! assert!(registry.contains("forceParams"));
//! ```

mod builtin;
mod structural;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde_json::json;

use crate::engine::Middleware;
use crate::error::RpcError;
use crate::permission::Caveat;

pub use builtin::{
    FilterResponse, ForceParams, LimitResponseLength, RequireParamsIsSubset,
    RequireParamsIsSuperset, FILTER_RESPONSE, FORCE_PARAMS, LIMIT_RESPONSE_LENGTH,
    REQUIRE_PARAMS_IS_SUBSET, REQUIRE_PARAMS_IS_SUPERSET,
};
pub use structural::is_subset;

/// Errors raised while validating or constructing caveats.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CaveatError {
    /// No constructor is registered for the type
    #[error("unknown caveat type '{0}'")]
    UnknownType(String),

    /// A caveat name was present but empty
    #[error("caveat names must not be empty")]
    EmptyName,

    /// Two caveats of one permission share a name
    #[error("duplicate caveat name '{0}'")]
    DuplicateName(String),

    /// Updated value has a different JSON type than the current one
    #[error("caveat '{name}' holds a {expected}, got a {actual}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// The permission has no caveat with the name
    #[error("No such caveat exists for the relevant permission: '{0}'")]
    NoSuchCaveat(String),

    /// The operation needs a named caveat
    #[error("Invalid caveat param. Must specify a name.")]
    NameRequired,

    /// The caveat's value cannot be interpreted by its type
    #[error("invalid value for caveat type '{kind}': {reason}")]
    InvalidValue { kind: String, reason: String },
}

impl From<CaveatError> for RpcError {
    fn from(err: CaveatError) -> Self {
        let data = match &err {
            CaveatError::UnknownType(kind) => Some(json!({ "type": kind })),
            CaveatError::DuplicateName(name)
            | CaveatError::NoSuchCaveat(name)
            | CaveatError::TypeMismatch { name, .. } => Some(json!({ "name": name })),
            _ => None,
        };
        RpcError::internal(err.to_string(), data)
    }
}

/// Builds the middleware for one caveat.
pub type CaveatConstructor =
    Arc<dyn Fn(&Caveat) -> Result<Arc<dyn Middleware>, CaveatError> + Send + Sync>;

/// Maps caveat types to their constructors.
#[derive(Clone)]
pub struct CaveatRegistry {
    constructors: HashMap<String, CaveatConstructor>,
}

impl CaveatRegistry {
    /// A registry with no caveat types at all.
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// A registry with the built-in caveat types.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(REQUIRE_PARAMS_IS_SUBSET, builtin::require_params_is_subset);
        registry.register(
            REQUIRE_PARAMS_IS_SUPERSET,
            builtin::require_params_is_superset,
        );
        registry.register(FORCE_PARAMS, builtin::force_params);
        registry.register(FILTER_RESPONSE, builtin::filter_response);
        registry.register(LIMIT_RESPONSE_LENGTH, builtin::limit_response_length);
        registry
    }

    /// Register a constructor, replacing any existing one for the type.
    pub fn register<F>(&mut self, kind: impl Into<String>, constructor: F)
    where
        F: Fn(&Caveat) -> Result<Arc<dyn Middleware>, CaveatError> + Send + Sync + 'static,
    {
        self.constructors.insert(kind.into(), Arc::new(constructor));
    }

    /// Returns true if the type has a constructor.
    pub fn contains(&self, kind: &str) -> bool {
        self.constructors.contains_key(kind)
    }

    /// Registered caveat types, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Check a single caveat: known type, a value its constructor accepts,
    /// and, if named, a non-empty name.
    pub fn validate_caveat(&self, caveat: &Caveat) -> Result<(), CaveatError> {
        if caveat.name.as_deref() == Some("") {
            return Err(CaveatError::EmptyName);
        }
        self.build(caveat).map(|_| ())
    }

    /// Check a caveat list: every member valid and names unique.
    pub fn validate_caveats(&self, caveats: &[Caveat]) -> Result<(), CaveatError> {
        let mut seen = HashSet::new();
        for caveat in caveats {
            self.validate_caveat(caveat)?;
            if let Some(name) = &caveat.name {
                if !seen.insert(name.as_str()) {
                    return Err(CaveatError::DuplicateName(name.clone()));
                }
            }
        }
        Ok(())
    }

    /// Construct the middleware for a caveat.
    pub fn build(&self, caveat: &Caveat) -> Result<Arc<dyn Middleware>, CaveatError> {
        let constructor = self
            .constructors
            .get(&caveat.kind)
            .ok_or_else(|| CaveatError::UnknownType(caveat.kind.clone()))?;
        constructor(caveat)
    }

    /// Construct the middleware for each caveat, in order.
    pub fn build_pipeline(
        &self,
        caveats: &[Caveat],
    ) -> Result<Vec<Arc<dyn Middleware>>, CaveatError> {
        caveats.iter().map(|caveat| self.build(caveat)).collect()
    }
}

impl Default for CaveatRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for CaveatRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaveatRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Name of the JSON type of a value, for mismatch reports.
pub(crate) fn json_kind(value: &serde_json::Value) -> &'static str {
    use serde_json::Value;
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, Next, Request, RpcResult};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    #[test]
    fn test_builtin_kinds() {
        let registry = CaveatRegistry::default();
        assert_eq!(
            registry.kinds(),
            vec![
                "filterResponse",
                "forceParams",
                "limitResponseLength",
                "requireParamsIsSubset",
                "requireParamsIsSuperset",
            ]
        );
        assert!(CaveatRegistry::empty().kinds().is_empty());
    }

    #[test]
    fn test_validate_caveat() {
        let registry = CaveatRegistry::builtin();
        assert!(registry
            .validate_caveat(&Caveat::new("forceParams", json!([])))
            .is_ok());
        assert_eq!(
            registry.validate_caveat(&Caveat::new("nope", json!([]))),
            Err(CaveatError::UnknownType("nope".into()))
        );
        assert_eq!(
            registry.validate_caveat(&Caveat::new("forceParams", json!([])).named("")),
            Err(CaveatError::EmptyName)
        );
        assert!(matches!(
            registry.validate_caveat(&Caveat::new("limitResponseLength", json!("two"))),
            Err(CaveatError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_validate_caveats_unique_names() {
        let registry = CaveatRegistry::builtin();
        let unnamed = vec![
            Caveat::new("forceParams", json!([])),
            Caveat::new("forceParams", json!([])),
        ];
        assert!(registry.validate_caveats(&unnamed).is_ok());

        let clash = vec![
            Caveat::new("forceParams", json!([])).named("a"),
            Caveat::new("filterResponse", json!([])).named("a"),
        ];
        assert_eq!(
            registry.validate_caveats(&clash),
            Err(CaveatError::DuplicateName("a".into()))
        );
    }

    #[test]
    fn test_caveat_error_maps_to_internal() {
        let err: RpcError = CaveatError::UnknownType("x".into()).into();
        assert!(err.is_internal());
        assert_eq!(err.data(), Some(&json!({"type": "x"})));
    }

    struct Echo;

    #[async_trait]
    impl Middleware for Echo {
        async fn call(&self, req: Request, _next: Next<'_>) -> RpcResult {
            Ok(req.params)
        }
    }

    #[tokio::test]
    async fn test_pipeline_post_phases_run_in_reverse() {
        // filter runs after limit has truncated, so the order is observable
        let registry = CaveatRegistry::builtin();
        let pipeline = registry
            .build_pipeline(&[
                Caveat::new("filterResponse", json!([2, 3])),
                Caveat::new("limitResponseLength", json!(2)),
            ])
            .unwrap();

        let mut engine = Engine::new();
        for mw in pipeline {
            engine.push_arc(mw);
        }
        engine.push(Echo);

        let res = engine
            .handle(Request::new("m").with_params(json!([1, 2, 3])))
            .await
            .unwrap();
        assert_eq!(res, json!([2]));
    }

    #[tokio::test]
    async fn test_custom_caveat_type() {
        struct Double;

        #[async_trait]
        impl Middleware for Double {
            async fn call(&self, req: Request, next: Next<'_>) -> RpcResult {
                match next.run(req).await? {
                    Value::Number(n) => Ok(json!(n.as_i64().unwrap_or(0) * 2)),
                    other => Ok(other),
                }
            }
        }

        let mut registry = CaveatRegistry::builtin();
        registry.register("double", |_c: &Caveat| {
            Ok(Arc::new(Double) as Arc<dyn Middleware>)
        });

        let mut engine = Engine::new();
        engine.push_arc(registry.build(&Caveat::new("double", Value::Null)).unwrap());
        engine.push(Echo);

        let res = engine
            .handle(Request::new("m").with_params(json!(21)))
            .await
            .unwrap();
        assert_eq!(res, json!(42));
    }

    #[test]
    fn test_json_kind() {
        assert_eq!(json_kind(&json!(1)), "number");
        assert_eq!(json_kind(&json!([])), "array");
        assert_eq!(json_kind(&json!({})), "object");
    }
}
