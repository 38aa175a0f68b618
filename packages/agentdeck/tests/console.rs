//! Whole-console wiring: configured backends, registry health, and a
//! workrooms engine surviving a restart of its snapshot backend.

use agentdeck::{
    AdapterConfig, Deck, HealthStatus, MessageOptions, RoomType, UserIdentity,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn snapshot_config(dir: &tempfile::TempDir) -> AdapterConfig {
    AdapterConfig::Snapshot {
        path: dir.path().join("deck.json"),
        autosave_secs: Some(3600),
        poll_secs: Some(3600),
    }
}

#[tokio::test]
async fn health_check_separates_reachable_from_unreachable() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();

    // A regular file where the tree backend expects its root directory.
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "not a directory").unwrap();

    let configs = vec![
        snapshot_config(&dir),
        AdapterConfig::Tree {
            root: blocker.join("docs"),
            watch: Some(false),
        },
    ];

    let deck = Deck::open(&configs, UserIdentity::agent("deck"))
        .await
        .unwrap();

    let reports = deck.registry().health_check().await;
    assert_eq!(reports.len(), 2);
    assert_eq!(reports["snapshot"].status, HealthStatus::Healthy);
    assert_eq!(reports["tree"].status, HealthStatus::Unhealthy);
    assert!(reports["tree"].error.is_some());

    deck.close().await.unwrap();
}

#[tokio::test]
async fn rooms_survive_a_console_restart() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let configs = vec![snapshot_config(&dir)];

    let room_id = {
        let deck = Deck::open(&configs, UserIdentity::human("alice"))
            .await
            .unwrap();
        let room = deck
            .engine()
            .create_room("ops", RoomType::Team, false)
            .await
            .unwrap();
        deck.engine()
            .send_message(&room.id, "first shift", MessageOptions::default())
            .await
            .unwrap();
        deck.close().await.unwrap();
        room.id
    };

    let deck = Deck::open(&configs, UserIdentity::human("alice"))
        .await
        .unwrap();
    let restored = deck.engine().room_by_id(&room_id).unwrap();
    assert_eq!(restored.name, "ops");
    assert_eq!(restored.message_count, 1);

    let messages = deck.engine().room_messages(&room_id);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].text, "first shift");
    deck.close().await.unwrap();
}

#[tokio::test]
async fn memory_backend_carries_a_full_session() {
    init_logging();
    let configs = vec![AdapterConfig::Memory];

    let deck = Deck::open(&configs, UserIdentity::agent("scout-1"))
        .await
        .unwrap();
    assert_eq!(deck.primary().unwrap().name(), "replicated");

    let created = deck.engine().seed_default_rooms(&["mesh"], &[]).await.unwrap();
    assert_eq!(created, 2);

    deck.engine()
        .send_message("room-global", "joined the mesh", MessageOptions::default())
        .await
        .unwrap();
    assert_eq!(deck.engine().room_messages("room-global").len(), 1);

    deck.close().await.unwrap();
}

#[tokio::test]
async fn open_fails_without_a_usable_primary() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "file").unwrap();

    let configs = vec![AdapterConfig::Tree {
        root: blocker.join("docs"),
        watch: Some(false),
    }];
    let err = Deck::open(&configs, UserIdentity::human("alice"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("failed to connect"));

    let none: Vec<AdapterConfig> = Vec::new();
    let err = Deck::open(&none, UserIdentity::human("alice"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no adapter configured"));
}
