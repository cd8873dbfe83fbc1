//! State storage trait and implementations.

use std::path::PathBuf;

use parking_lot::RwLock;

use super::state::CapabilitiesState;

/// Errors that can occur in state store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Failed to write state to storage.
    #[error("Failed to write state: {0}")]
    Write(String),

    /// IO error during storage operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<StoreError> for crate::error::RpcError {
    fn from(err: StoreError) -> Self {
        crate::error::RpcError::internal(format!("failed to persist state: {}", err), None)
    }
}

/// Trait for persisting controller state.
///
/// The controller keeps the authoritative copy in memory and writes every
/// committed mutation through to the store before it becomes visible.
pub trait StateStore: Send + Sync {
    /// Load previously saved state, or `None` if nothing was saved yet.
    fn load(&self) -> Result<Option<CapabilitiesState>, StoreError>;

    /// Replace the saved state.
    fn save(&self, state: &CapabilitiesState) -> Result<(), StoreError>;
}

/// Shared stores, so the caller can keep a handle for inspection.
impl<T: StateStore + ?Sized> StateStore for std::sync::Arc<T> {
    fn load(&self) -> Result<Option<CapabilitiesState>, StoreError> {
        (**self).load()
    }

    fn save(&self, state: &CapabilitiesState) -> Result<(), StoreError> {
        (**self).save(state)
    }
}

/// In-memory state store.
///
/// State is lost when the process exits. This is the default store.
#[derive(Default)]
pub struct MemoryStateStore {
    state: RwLock<Option<CapabilitiesState>>,
}

impl MemoryStateStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a memory store pre-populated with state.
    pub fn with_state(state: CapabilitiesState) -> Self {
        Self {
            state: RwLock::new(Some(state)),
        }
    }

    /// Snapshot of the last saved state.
    pub fn snapshot(&self) -> Option<CapabilitiesState> {
        self.state.read().clone()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<Option<CapabilitiesState>, StoreError> {
        Ok(self.state.read().clone())
    }

    fn save(&self, state: &CapabilitiesState) -> Result<(), StoreError> {
        *self.state.write() = Some(state.clone());
        Ok(())
    }
}

/// File-based state store.
///
/// State is persisted as pretty-printed JSON. The file and its parent
/// directories are created when state is first saved.
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    /// Create a new file-based store at the given path.
    ///
    /// The file does not need to exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<Option<CapabilitiesState>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(None);
        }

        let state = serde_json::from_str(&contents)?;
        Ok(Some(state))
    }

    fn save(&self, state: &CapabilitiesState) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(state)?;

        // Write to a sibling file first so a crash never leaves a torn state file
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| StoreError::Write(format!("{}: {}", self.path.display(), e)))?;
        Ok(())
    }
}
