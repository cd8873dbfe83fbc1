mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use common::*;
use rpc_cap_core::{
    CapabilitiesState, Caveat, FileStateStore, MemoryStateStore, Permission, PermissionsRequest,
    Request, StateStore, StoreError,
};
use serde_json::json;
use tempfile::TempDir;

/// Memory store whose writes can be switched off.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStateStore,
    failing: AtomicBool,
}

impl StateStore for FlakyStore {
    fn load(&self) -> Result<Option<CapabilitiesState>, StoreError> {
        self.inner.load()
    }

    fn save(&self, state: &CapabilitiesState) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Write("disk full".into()));
        }
        self.inner.save(state)
    }
}

// ===== File Store Tests =====

#[tokio::test]
async fn test_permissions_survive_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("caps").join("state.json");

    {
        let controller = standard_builder()
            .with_user_approval(approve_all)
            .with_state_store(FileStateStore::new(&path))
            .build()
            .unwrap();
        let engine = controller.create_permissioned_engine("a.com");
        engine
            .handle(request_permissions(json!({
                "accounts": { "caveats": [{ "type": "limitResponseLength", "value": 1, "name": "one" }] }
            })))
            .await
            .unwrap();
    }
    assert!(path.exists());

    let controller = standard_builder()
        .with_user_approval(approve_all)
        .with_state_store(FileStateStore::new(&path))
        .build()
        .unwrap();
    assert!(controller.has_permission("a.com", "accounts"));
    assert_eq!(
        controller.get_caveat("a.com", "accounts", "one").unwrap(),
        Caveat::new("limitResponseLength", json!(1)).named("one")
    );

    let engine = controller.create_permissioned_engine("a.com");
    let res = engine.handle(Request::new("accounts")).await.unwrap();
    assert_eq!(res, json!([1]));
}

#[test]
fn test_stale_requests_discarded_on_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");

    let mut state = CapabilitiesState::default();
    state.add_permissions("a.com", vec![Permission::new("echo", "a.com")]);
    state.permissions_requests.push(
        serde_json::from_value::<PermissionsRequest>(json!({
            "metadata": { "id": "stale", "origin": "a.com" },
            "permissions": { "accounts": {} }
        }))
        .unwrap(),
    );
    FileStateStore::new(&path).save(&state).unwrap();

    let controller = standard_builder()
        .with_user_approval(approve_all)
        .with_state_store(FileStateStore::new(&path))
        .build()
        .unwrap();
    assert!(controller.get_permissions_requests().is_empty());
    assert!(controller.has_permission("a.com", "echo"));

    let reloaded = FileStateStore::new(&path).load().unwrap().unwrap();
    assert!(reloaded.permissions_requests.is_empty());
    assert_eq!(reloaded.permissions_for("a.com").len(), 1);
}

#[test]
fn test_empty_domain_entries_dropped_on_load() {
    let state: CapabilitiesState = serde_json::from_value(json!({
        "domains": {
            "a.com": { "permissions": [] },
            "b.com": { "permissions": [serde_json::to_value(Permission::new("echo", "b.com")).unwrap()] }
        }
    }))
    .unwrap();
    let store = Arc::new(MemoryStateStore::with_state(state));

    let controller = standard_builder()
        .with_user_approval(approve_all)
        .with_state_store(store.clone())
        .build()
        .unwrap();

    assert!(!controller.has_permissions("a.com"));
    assert!(!controller.get_domains().contains_key("a.com"));
    assert!(controller.get_permissions_for_domain("a.com").is_empty());
    assert!(controller.has_permission("b.com", "echo"));

    // The cleaned state is written back
    let saved = store.snapshot().unwrap();
    assert!(!saved.domains.contains_key("a.com"));
    assert!(saved.domains.contains_key("b.com"));
}

#[test]
fn test_state_file_is_readable_json() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");

    let controller = standard_builder()
        .with_user_approval(approve_all)
        .with_state_store(FileStateStore::new(&path))
        .build()
        .unwrap();
    controller
        .add_permissions_for("a.com", vec![Permission::new("echo", "a.com")])
        .unwrap();

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(
        raw["domains"]["a.com"]["permissions"][0]["parentCapability"],
        "echo"
    );
    assert_eq!(raw["permissionsRequests"], json!([]));
}

#[test]
fn test_corrupt_state_file_fails_build() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(&path, "{ not json").unwrap();

    let err = standard_builder()
        .with_user_approval(approve_all)
        .with_state_store(FileStateStore::new(&path))
        .build()
        .unwrap_err();
    assert!(err.to_string().starts_with("failed to load persisted state"));
}

// ===== Write Failure Tests =====

#[tokio::test]
async fn test_failed_write_leaves_state_unchanged() {
    let store = Arc::new(FlakyStore::default());
    let controller = standard_builder()
        .with_user_approval(approve_all)
        .with_state_store(store.clone())
        .build()
        .unwrap();
    controller
        .add_permissions_for(
            "a.com",
            vec![Permission::new("echo", "a.com")
                .with_caveats(vec![Caveat::new("forceParams", json!([1])).named("force")])],
        )
        .unwrap();
    let before = controller.serialize();

    store.failing.store(true, Ordering::SeqCst);

    let err = controller
        .add_permissions_for("a.com", vec![Permission::new("accounts", "a.com")])
        .unwrap_err();
    assert!(err.is_internal());
    assert!(controller
        .update_caveat_for("a.com", "echo", "force", json!([2]))
        .unwrap_err()
        .is_internal());
    assert!(controller.remove_permissions_for("a.com", &["echo"]).is_err());
    assert!(controller.clear_domains().is_err());

    let engine = controller.create_permissioned_engine("b.com");
    let err = engine
        .handle(request_permissions(json!({ "echo": {} })))
        .await
        .unwrap_err();
    assert!(err.is_internal());

    assert_eq!(controller.serialize(), before);
    assert_eq!(store.inner.snapshot(), Some(before));
}

#[test]
fn test_memory_store_tracks_commits() {
    let store = Arc::new(MemoryStateStore::new());
    let controller = standard_builder()
        .with_user_approval(approve_all)
        .with_state_store(store.clone())
        .build()
        .unwrap();
    assert!(store.snapshot().is_none());

    controller
        .grant_new_permissions("a.com", perms(&["echo"]))
        .unwrap();
    assert_eq!(store.snapshot().unwrap(), controller.serialize());

    controller.remove_permissions_for("a.com", &["echo"]).unwrap();
    assert!(store.snapshot().unwrap().domains.is_empty());
}
