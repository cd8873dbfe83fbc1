//! Built-in caveat types.
//!
//! | Type | Phase | Effect |
//! |------|-------|--------|
//! | `requireParamsIsSubset` | pre | Reject unless params are a structural subset of the value |
//! | `requireParamsIsSuperset` | pre | Reject unless the value is a structural subset of params |
//! | `forceParams` | pre | Replace params with the value |
//! | `filterResponse` | post | Keep only array results equal to a member of the value |
//! | `limitResponseLength` | post | Truncate array results to the value |

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::structural::is_subset;
use super::CaveatError;
use crate::engine::{Middleware, Next, Request, RpcResult};
use crate::error::RpcError;
use crate::permission::Caveat;

pub const REQUIRE_PARAMS_IS_SUBSET: &str = "requireParamsIsSubset";
pub const REQUIRE_PARAMS_IS_SUPERSET: &str = "requireParamsIsSuperset";
pub const FORCE_PARAMS: &str = "forceParams";
pub const FILTER_RESPONSE: &str = "filterResponse";
pub const LIMIT_RESPONSE_LENGTH: &str = "limitResponseLength";

// Absent params compare as an empty list
fn params_of(req: &Request) -> Value {
    match &req.params {
        Value::Null => Value::Array(Vec::new()),
        other => other.clone(),
    }
}

/// Rejects calls whose params are not a subset of the allowed value.
pub struct RequireParamsIsSubset {
    allowed: Value,
}

#[async_trait]
impl Middleware for RequireParamsIsSubset {
    async fn call(&self, req: Request, next: Next<'_>) -> RpcResult {
        if !is_subset(&params_of(&req), &self.allowed) {
            log::debug!("params of '{}' exceed the permitted set", req.method);
            return Err(RpcError::unauthorized(Some(req.to_value())));
        }
        next.run(req).await
    }
}

/// Rejects calls whose params do not include the required value.
pub struct RequireParamsIsSuperset {
    required: Value,
}

#[async_trait]
impl Middleware for RequireParamsIsSuperset {
    async fn call(&self, req: Request, next: Next<'_>) -> RpcResult {
        if !is_subset(&self.required, &params_of(&req)) {
            log::debug!("params of '{}' miss required values", req.method);
            return Err(RpcError::unauthorized(Some(req.to_value())));
        }
        next.run(req).await
    }
}

/// Replaces the params unconditionally.
pub struct ForceParams {
    params: Value,
}

#[async_trait]
impl Middleware for ForceParams {
    async fn call(&self, mut req: Request, next: Next<'_>) -> RpcResult {
        req.params = self.params.clone();
        next.run(req).await
    }
}

/// Drops array result entries that are not in the allowed list.
pub struct FilterResponse {
    allowed: Vec<Value>,
}

#[async_trait]
impl Middleware for FilterResponse {
    async fn call(&self, req: Request, next: Next<'_>) -> RpcResult {
        match next.run(req).await? {
            Value::Array(items) => Ok(Value::Array(
                items
                    .into_iter()
                    .filter(|item| self.allowed.contains(item))
                    .collect(),
            )),
            other => Ok(other),
        }
    }
}

/// Truncates array results.
pub struct LimitResponseLength {
    limit: usize,
}

#[async_trait]
impl Middleware for LimitResponseLength {
    async fn call(&self, req: Request, next: Next<'_>) -> RpcResult {
        match next.run(req).await? {
            Value::Array(mut items) => {
                items.truncate(self.limit);
                Ok(Value::Array(items))
            }
            other => Ok(other),
        }
    }
}

pub(super) fn require_params_is_subset(
    caveat: &Caveat,
) -> Result<Arc<dyn Middleware>, CaveatError> {
    Ok(Arc::new(RequireParamsIsSubset {
        allowed: caveat.value.clone(),
    }))
}

pub(super) fn require_params_is_superset(
    caveat: &Caveat,
) -> Result<Arc<dyn Middleware>, CaveatError> {
    Ok(Arc::new(RequireParamsIsSuperset {
        required: caveat.value.clone(),
    }))
}

pub(super) fn force_params(caveat: &Caveat) -> Result<Arc<dyn Middleware>, CaveatError> {
    Ok(Arc::new(ForceParams {
        params: caveat.value.clone(),
    }))
}

pub(super) fn filter_response(caveat: &Caveat) -> Result<Arc<dyn Middleware>, CaveatError> {
    match &caveat.value {
        Value::Array(allowed) => Ok(Arc::new(FilterResponse {
            allowed: allowed.clone(),
        })),
        _ => Err(CaveatError::InvalidValue {
            kind: caveat.kind.clone(),
            reason: "expected an array".to_string(),
        }),
    }
}

pub(super) fn limit_response_length(
    caveat: &Caveat,
) -> Result<Arc<dyn Middleware>, CaveatError> {
    let limit = caveat
        .value
        .as_u64()
        .ok_or_else(|| CaveatError::InvalidValue {
            kind: caveat.kind.clone(),
            reason: "expected a non-negative integer".to_string(),
        })?;
    Ok(Arc::new(LimitResponseLength {
        limit: usize::try_from(limit).unwrap_or(usize::MAX),
    }))
}
