//! Integration coverage for the typed config store over the in-memory
//! gateway: lazy generation, default merging, unknown-field round-trips,
//! dotted field access and reloads.

mod common;

use bson::{doc, Bson};
use common::{MemoryStore, ServerConfig};
use mc_configs::{ConfigBundle, Error, MongoConfigs, Settings};

fn context(store: &std::sync::Arc<MemoryStore>) -> MongoConfigs {
    MongoConfigs::with_gateway(store.clone(), Settings::default())
}

#[tokio::test]
async fn get_or_generate_persists_the_factory_value() {
    let store = MemoryStore::new();
    let core = context(&store);

    let config: ServerConfig = core
        .configs()
        .get_or_generate(ServerConfig::defaults)
        .await
        .unwrap();
    assert_eq!(config, ServerConfig::defaults());

    let persisted = store
        .document(&ServerConfig::target(), "server-config")
        .expect("document was created");
    assert_eq!(persisted.get_i32("max_players").unwrap(), 100);
    assert_eq!(persisted.get_str("_id").unwrap(), "server-config");

    // Second call is a cache hit; nothing is re-fetched or re-written.
    let again: ServerConfig = core
        .configs()
        .get_or_generate(|| panic!("factory must not run twice"))
        .await
        .unwrap();
    assert_eq!(again, config);
}

#[tokio::test]
async fn strict_get_on_absent_record_is_not_found() {
    let store = MemoryStore::new();
    let core = context(&store);

    let result = core.configs().get::<ServerConfig>().await;
    assert!(matches!(
        result,
        Err(Error::NotFound { collection, .. }) if collection == "server-config"
    ));
}

#[tokio::test]
async fn partial_documents_are_filled_from_defaults() {
    let store = MemoryStore::new();
    store.seed(
        &ServerConfig::target(),
        "server-config",
        doc! { "max_players": 25 },
    );
    let core = context(&store);

    let config: ServerConfig = core.configs().get().await.unwrap();
    assert_eq!(config.max_players, 25);
    // Holes take declared defaults.
    assert_eq!(config.motd, "welcome");
    assert_eq!(config.limits.render_distance, 10);
}

#[tokio::test]
async fn round_trip_preserves_unknown_persisted_fields() {
    let store = MemoryStore::new();
    store.seed(
        &ServerConfig::target(),
        "server-config",
        doc! { "max_players": 25, "legacy_flag": true },
    );
    let core = context(&store);

    let mut config: ServerConfig = core.configs().get().await.unwrap();
    config.max_players = 200;
    core.configs().set(&config).await.unwrap();

    let persisted = store
        .document(&ServerConfig::target(), "server-config")
        .unwrap();
    assert_eq!(persisted.get_i32("max_players").unwrap(), 200);
    // The field no record type declares survives the write-back.
    assert!(persisted.get_bool("legacy_flag").unwrap());

    let read_back: ServerConfig = core.configs().get().await.unwrap();
    assert_eq!(read_back, config);
}

#[tokio::test]
async fn set_is_idempotent() {
    let store = MemoryStore::new();
    let core = context(&store);

    let config = ServerConfig::defaults();
    core.configs().set(&config).await.unwrap();
    let first = store
        .document(&ServerConfig::target(), "server-config")
        .unwrap();

    core.configs().set(&config).await.unwrap();
    let second = store
        .document(&ServerConfig::target(), "server-config")
        .unwrap();

    assert_eq!(first, second);
    let read_back: ServerConfig = core.configs().get().await.unwrap();
    assert_eq!(read_back, config);
}

#[tokio::test]
async fn dotted_field_access_without_full_decode() {
    let store = MemoryStore::new();
    let core = context(&store);

    core.configs()
        .set_field("gameplay", "arena-1", "rewards.win", 150)
        .await
        .unwrap();

    let value: Option<i32> = core
        .configs()
        .get_field("gameplay", "arena-1", "rewards.win")
        .await
        .unwrap();
    assert_eq!(value, Some(150));

    let missing: Option<i32> = core
        .configs()
        .get_field("gameplay", "arena-1", "rewards.loss")
        .await
        .unwrap();
    assert_eq!(missing, None);
}

#[tokio::test]
async fn dotted_paths_through_scalars_are_type_mismatches() {
    let store = MemoryStore::new();
    let core = context(&store);

    core.configs()
        .set_field("gameplay", "arena-1", "rewards", Bson::Int32(5))
        .await
        .unwrap();

    let result = core
        .configs()
        .set_field("gameplay", "arena-1", "rewards.win", 1)
        .await;
    assert!(matches!(result, Err(Error::TypeMismatch { .. })));
}

#[tokio::test]
async fn reload_collection_forces_a_refetch() {
    let store = MemoryStore::new();
    store.seed(
        &ServerConfig::target(),
        "server-config",
        doc! { "max_players": 25 },
    );
    let core = context(&store);

    let _: ServerConfig = core.configs().get().await.unwrap();
    let _: ServerConfig = core.configs().get().await.unwrap();
    assert_eq!(store.find_count(&ServerConfig::target(), "server-config"), 1);

    core.configs().reload_collection("server-config");
    let _: ServerConfig = core.configs().get().await.unwrap();
    assert_eq!(store.find_count(&ServerConfig::target(), "server-config"), 2);
}

#[tokio::test]
async fn delete_removes_document_and_cache_entry() {
    let store = MemoryStore::new();
    let core = context(&store);

    core.configs().set(&ServerConfig::defaults()).await.unwrap();
    assert!(core.configs().delete::<ServerConfig>().await.unwrap());
    assert!(store
        .document(&ServerConfig::target(), "server-config")
        .is_none());

    // The set's own change-stream echo may still be in flight; the
    // delete event behind it settles the cache.
    for _ in 0..200 {
        if matches!(
            core.configs().get::<ServerConfig>().await,
            Err(Error::NotFound { .. })
        ) {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("cache never settled to NotFound after delete");
}
