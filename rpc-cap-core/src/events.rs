use crate::permission::Permission;

/// Events emitted by a [`crate::CapabilitiesController`]
///
/// These let observers track the approval workflow and authorization
/// decisions without wrapping the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum CapabilityEvent {
    // ===== Approval Workflow =====
    /// A permissions request was queued and handed to the approval callback
    RequestQueued {
        /// Request identifier
        request_id: String,
        /// Requesting domain
        origin: String,
        /// Requested method names
        methods: Vec<String>,
    },

    /// A permissions request left the queue
    RequestResolved {
        /// Request identifier
        request_id: String,
        /// Requesting domain
        origin: String,
        /// Whether any permission was granted
        approved: bool,
    },

    // ===== Permission Changes =====
    /// Permissions were committed for a domain
    PermissionsGranted {
        /// Receiving domain
        origin: String,
        /// The committed permissions
        permissions: Vec<Permission>,
    },

    /// Permissions were removed from a domain
    PermissionsRemoved {
        /// Affected domain
        origin: String,
        /// Removed method names
        methods: Vec<String>,
    },

    // ===== Dispatch =====
    /// A call was rejected for lack of permission
    CallDenied {
        /// Calling domain
        origin: String,
        /// Method that was called
        method: String,
    },
}

/// Hook for observing controller events
///
/// # Example
///
/// ```rust
/// use rpc_cap_core::{CapabilityEvent, CapabilityHook};
///
/// struct DenialLogger;
///
/// impl CapabilityHook for DenialLogger {
///     fn on_event(&self, event: &CapabilityEvent) {
///         if let CapabilityEvent::CallDenied { origin, method } = event {
///             println!("{} may not call {}", origin, method);
///         }
///     }
/// }
/// ```
pub trait CapabilityHook: Send + Sync {
    /// Called when an event occurs
    fn on_event(&self, event: &CapabilityEvent);
}

/// Blanket implementation for closures
impl<F> CapabilityHook for F
where
    F: Fn(&CapabilityEvent) + Send + Sync,
{
    fn on_event(&self, event: &CapabilityEvent) {
        self(event)
    }
}
