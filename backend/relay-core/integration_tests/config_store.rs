use crate::helpers::token;

use relay_core::config::{CONFIG_FILE_NAME, ConfigPatch, ConfigStore, RelayConfig};

use tempfile::TempDir;

/// **VALUE**: A patch applied through the store is visible immediately and
/// lands on disk.
///
/// **WHY THIS MATTERS**: A delivered pairing token must survive a restart,
/// otherwise the user has to pair again every time the relay starts.
#[tokio::test]
async fn given_disk_store_when_pairing_set_then_visible_and_persisted() {
    // GIVEN: A store backed by a temp directory
    let dir = TempDir::new().expect("temp dir");
    let store = ConfigStore::new(dir.path().to_path_buf(), RelayConfig::default());

    // WHEN: A pairing is stored
    store
        .set(ConfigPatch::pairing(token("abc123"), Some("seed".to_string())))
        .await
        .expect("set");

    // THEN: Readers see it
    let current = store.get().await;
    assert_eq!(current.token, Some(token("abc123")));
    assert_eq!(current.session_seed.as_deref(), Some("seed"));

    // THEN: A fresh load from disk sees it too
    assert!(dir.path().join(CONFIG_FILE_NAME).exists());
    let reloaded = RelayConfig::load(dir.path()).expect("load");
    assert_eq!(reloaded.token, Some(token("abc123")));
    assert_eq!(reloaded.session_seed.as_deref(), Some("seed"));
}

/// **VALUE**: Forgetting a pairing clears both token and seed.
#[tokio::test]
async fn given_stored_pairing_when_forgotten_then_cleared() {
    let dir = TempDir::new().expect("temp dir");
    let store = ConfigStore::new(dir.path().to_path_buf(), RelayConfig::default());
    store
        .set(ConfigPatch::pairing(token("abc123"), Some("seed".to_string())))
        .await
        .expect("set");

    store.set(ConfigPatch::forget_pairing()).await.expect("forget");

    let reloaded = RelayConfig::load(dir.path()).expect("load");
    assert_eq!(reloaded.token, None);
    assert_eq!(reloaded.session_seed, None);
}

/// **VALUE**: Invalid patches are rejected and leave the config untouched.
///
/// **BUG THIS CATCHES**: Would catch a bad UI address being accepted and
/// breaking every later connection attempt.
#[tokio::test]
async fn given_invalid_address_when_set_then_rejected_and_unchanged() {
    let store = ConfigStore::in_memory(RelayConfig::default());
    let before = store.get().await;

    let result = store
        .set(ConfigPatch {
            ui_address: Some("not a host/with path".to_string()),
            ..Default::default()
        })
        .await;

    assert!(result.is_err());
    assert_eq!(store.get().await, before);
}

/// **VALUE**: Concurrent writers from cloned handles are all applied.
#[tokio::test]
async fn given_cloned_stores_when_set_concurrently_then_all_patches_applied() {
    let store = ConfigStore::in_memory(RelayConfig::default());
    let other = store.clone();

    let (first, second) = tokio::join!(
        store.set(ConfigPatch::pairing(token("abc123"), None)),
        other.set(ConfigPatch {
            integration_enabled: Some(false),
            ..Default::default()
        })
    );
    first.expect("first");
    second.expect("second");

    let current = store.get().await;
    assert_eq!(current.token, Some(token("abc123")));
    assert!(!current.integration_enabled);
}
