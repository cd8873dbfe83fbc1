//! Error types for the capabilities middleware
//!
//! [`RpcError`] is the error half of every dispatched call. It mirrors the
//! error taxonomy used by JSON-RPC providers so that callers can map it onto
//! a wire response without inspecting messages:
//!
//! - [`RpcError::Unauthorized`] - No permission for the method, or a caveat rejected the call
//! - [`RpcError::MethodNotFound`] - The method is not managed by this controller
//! - [`RpcError::InvalidRequest`] - The request was malformed
//! - [`RpcError::UserRejectedRequest`] - The user declined a permissions request
//! - [`RpcError::Internal`] - Validation or persistence failure inside the controller
//! - [`RpcError::Custom`] - Opaque error raised by a restricted method or approval prompt

use serde_json::{json, Value};
use thiserror::Error;

/// Error code for unauthorized calls.
pub const UNAUTHORIZED_CODE: i64 = 4100;

/// Error code for user-rejected requests.
pub const USER_REJECTED_CODE: i64 = 4001;

/// Error code for invalid requests.
pub const INVALID_REQUEST_CODE: i64 = -32600;

/// Error code for unknown methods.
pub const METHOD_NOT_FOUND_CODE: i64 = -32601;

/// Error code for internal errors.
pub const INTERNAL_ERROR_CODE: i64 = -32603;

const UNAUTHORIZED_MESSAGE: &str = "Unauthorized to perform action. Try requesting permission first using the `requestPermissions` method.";

/// Error produced by a dispatched call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RpcError {
    /// The calling domain holds no permission for the method, or a caveat rejected the call
    #[error("{message}")]
    Unauthorized {
        message: String,
        data: Option<Value>,
    },

    /// The method is not registered as a restricted method
    #[error("Method not found")]
    MethodNotFound { data: Option<Value> },

    /// The request was malformed
    #[error("Invalid request")]
    InvalidRequest { data: Option<Value> },

    /// The user rejected a permissions request
    #[error("User rejected the request.")]
    UserRejectedRequest { data: Option<Value> },

    /// Validation or persistence failure inside the controller
    #[error("{message}")]
    Internal {
        message: String,
        data: Option<Value>,
    },

    /// Opaque error raised by a restricted method or an approval prompt
    #[error("{message}")]
    Custom {
        code: i64,
        message: String,
        data: Option<Value>,
    },
}

impl RpcError {
    pub fn unauthorized(data: Option<Value>) -> Self {
        Self::Unauthorized {
            message: UNAUTHORIZED_MESSAGE.to_string(),
            data,
        }
    }

    pub fn method_not_found(data: Option<Value>) -> Self {
        Self::MethodNotFound { data }
    }

    pub fn invalid_request(data: Option<Value>) -> Self {
        Self::InvalidRequest { data }
    }

    pub fn user_rejected(data: Option<Value>) -> Self {
        Self::UserRejectedRequest { data }
    }

    pub fn internal(message: impl Into<String>, data: Option<Value>) -> Self {
        Self::Internal {
            message: message.into(),
            data,
        }
    }

    pub fn custom(code: i64, message: impl Into<String>) -> Self {
        Self::Custom {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attach (or replace) the data payload.
    pub fn with_data(mut self, value: Value) -> Self {
        match &mut self {
            Self::Unauthorized { data, .. }
            | Self::MethodNotFound { data }
            | Self::InvalidRequest { data }
            | Self::UserRejectedRequest { data }
            | Self::Internal { data, .. }
            | Self::Custom { data, .. } => *data = Some(value),
        }
        self
    }

    /// Numeric error code.
    pub fn code(&self) -> i64 {
        match self {
            Self::Unauthorized { .. } => UNAUTHORIZED_CODE,
            Self::MethodNotFound { .. } => METHOD_NOT_FOUND_CODE,
            Self::InvalidRequest { .. } => INVALID_REQUEST_CODE,
            Self::UserRejectedRequest { .. } => USER_REJECTED_CODE,
            Self::Internal { .. } => INTERNAL_ERROR_CODE,
            Self::Custom { code, .. } => *code,
        }
    }

    /// Data echoed with the error, usually the offending request.
    pub fn data(&self) -> Option<&Value> {
        match self {
            Self::Unauthorized { data, .. }
            | Self::MethodNotFound { data }
            | Self::InvalidRequest { data }
            | Self::UserRejectedRequest { data }
            | Self::Internal { data, .. }
            | Self::Custom { data, .. } => data.as_ref(),
        }
    }

    /// Render as a JSON-RPC error object.
    pub fn to_json(&self) -> Value {
        let mut obj = json!({
            "code": self.code(),
            "message": self.to_string(),
        });
        if let Some(data) = self.data() {
            obj["data"] = data.clone();
        }
        obj
    }

    /// Returns true if this is an authorization failure
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// Returns true if the method is not managed
    pub fn is_method_not_found(&self) -> bool {
        matches!(self, Self::MethodNotFound { .. })
    }

    /// Returns true if the request was malformed
    pub fn is_invalid_request(&self) -> bool {
        matches!(self, Self::InvalidRequest { .. })
    }

    /// Returns true if the user rejected a permissions request
    ///
    /// Rejection is a normal outcome of the approval workflow, not a fault.
    pub fn is_user_rejected(&self) -> bool {
        matches!(self, Self::UserRejectedRequest { .. })
    }

    /// Returns true if this is an internal error
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("serialization failed: {}", err), None)
    }
}

/// Errors raised while building a [`crate::CapabilitiesController`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No approval prompt was configured
    #[error("User approval prompt required.")]
    MissingUserApproval,

    /// A method name is claimed by more than one of the safe, internal and restricted tables
    #[error("method '{0}' is registered more than once")]
    ConflictingMethod(String),

    /// Loading persisted state failed
    #[error("failed to load persisted state: {0}")]
    Store(#[from] crate::permission::StoreError),
}

/// Result type for controller operations
pub type Result<T> = std::result::Result<T, RpcError>;
