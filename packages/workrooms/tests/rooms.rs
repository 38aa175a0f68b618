//! End-to-end room scenarios over a real snapshot-backed store.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use agentdeck_adapter::StorageAdapter;
use agentdeck_snapshot_store::{SnapshotConfig, SnapshotStore};
use agentdeck_workrooms::{
    EngineConfig, MessageOptions, RoomEvent, RoomEventKind, RoomType, UserIdentity,
    WorkroomCommand, WorkroomsEngine,
};

async fn open_store(dir: &tempfile::TempDir) -> Arc<dyn StorageAdapter> {
    let config = SnapshotConfig::new(dir.path().join("deck.json"))
        // Long timers so nothing fires mid-test; engines call refresh()
        // where they need a current view.
        .with_autosave_interval(Duration::from_secs(3600))
        .with_poll_interval(Duration::from_secs(3600));
    let store = Arc::new(SnapshotStore::new(config));
    store.connect().await.unwrap();
    store
}

#[tokio::test]
async fn two_users_exchange_ordered_messages() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;

    let alice = WorkroomsEngine::new(store.clone(), UserIdentity::human("alice"));
    let bot = WorkroomsEngine::new(store.clone(), UserIdentity::agent("relay-bot"));
    alice.start().await.unwrap();
    bot.start().await.unwrap();

    let room = alice
        .create_room("demo", RoomType::Project, false)
        .await
        .unwrap();

    bot.refresh().await.unwrap();
    bot.join_room(&room.id).await.unwrap();

    alice
        .send_message(&room.id, "morning", MessageOptions::default())
        .await
        .unwrap();
    bot.refresh().await.unwrap();
    bot.send_message(&room.id, "ack", MessageOptions::default())
        .await
        .unwrap();

    alice.refresh().await.unwrap();
    let messages = alice.room_messages(&room.id);
    assert_eq!(messages.len(), 2);
    assert!(messages[0].created_at <= messages[1].created_at);
    assert_ne!(messages[0].id, messages[1].id);
    assert_eq!(messages[0].sender_id, "alice");
    assert_eq!(messages[1].sender_id, "relay-bot");

    let members = alice.room_members(&room.id);
    assert!(members.contains(&"alice".to_string()));
    assert!(members.contains(&"relay-bot".to_string()));
}

#[tokio::test]
async fn non_member_send_is_rejected_without_counter_change() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;

    let alice = WorkroomsEngine::new(store.clone(), UserIdentity::human("alice"));
    let outsider = WorkroomsEngine::new(store.clone(), UserIdentity::agent("stray"));
    alice.start().await.unwrap();
    outsider.start().await.unwrap();

    let room = alice
        .create_room("private", RoomType::Team, true)
        .await
        .unwrap();

    outsider.refresh().await.unwrap();
    let err = outsider
        .send_message(&room.id, "let me in", MessageOptions::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not a member"));

    alice.refresh().await.unwrap();
    let current = alice.room_by_id(&room.id).unwrap();
    assert_eq!(current.message_count, 0);
    assert!(alice.room_messages(&room.id).is_empty());
}

#[tokio::test]
async fn typing_flag_clears_itself() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;

    let alice = WorkroomsEngine::with_config(
        store.clone(),
        UserIdentity::human("alice"),
        EngineConfig::default().typing_timeout(Duration::from_millis(50)),
    );
    alice.start().await.unwrap();

    let room = alice
        .create_room("hud", RoomType::Task, false)
        .await
        .unwrap();

    alice.set_typing(&room.id, true).await.unwrap();
    assert_eq!(alice.typing_users(&room.id), vec!["alice".to_string()]);

    // Well past the timeout.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(alice.typing_users(&room.id).is_empty());

    // An explicit clear afterwards is harmless.
    alice.set_typing(&room.id, false).await.unwrap();
    assert!(alice.typing_users(&room.id).is_empty());
}

#[tokio::test]
async fn seeding_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;

    let deck = WorkroomsEngine::new(store.clone(), UserIdentity::agent("deck"));
    deck.start().await.unwrap();

    let first = deck
        .seed_default_rooms(&["Mesh Relay"], &["ops"])
        .await
        .unwrap();
    assert_eq!(first, 3);

    let second = deck
        .seed_default_rooms(&["Mesh Relay"], &["ops"])
        .await
        .unwrap();
    assert_eq!(second, 0);

    let ids: Vec<String> = deck.rooms().into_iter().map(|r| r.id).collect();
    assert_eq!(
        ids,
        vec![
            "room-global".to_string(),
            "room-project-mesh-relay".to_string(),
            "room-team-ops".to_string(),
        ]
    );
}

#[tokio::test]
async fn events_reach_listeners_synchronously() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;

    let alice = WorkroomsEngine::new(store.clone(), UserIdentity::human("alice"));
    alice.start().await.unwrap();

    let seen: Arc<Mutex<Vec<RoomEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    alice.add_listener(Arc::new(move |event| sink.lock().unwrap().push(event)));

    let room = alice
        .create_room("wired", RoomType::Dm, false)
        .await
        .unwrap();
    alice
        .send_message(&room.id, "ping", MessageOptions::default())
        .await
        .unwrap();

    let kinds: Vec<RoomEventKind> = seen.lock().unwrap().iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            RoomEventKind::RoomCreated,
            RoomEventKind::Join,
            RoomEventKind::Message,
        ]
    );
}

#[tokio::test]
async fn failed_commands_come_back_as_data() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;

    let alice = WorkroomsEngine::new(store.clone(), UserIdentity::human("alice"));
    alice.start().await.unwrap();

    let outcome = alice
        .handle_command(WorkroomCommand::Join {
            room: "room-missing".into(),
        })
        .await;
    assert_eq!(outcome.action, "join");
    assert!(!outcome.ok);
    assert!(outcome.error.unwrap().contains("room-missing"));

    let created = alice
        .handle_command(WorkroomCommand::Create {
            name: "ops".into(),
            room_type: RoomType::Team,
            private: false,
        })
        .await;
    assert!(created.ok);
    let room_id = created.payload.unwrap()["id"].as_str().unwrap().to_string();

    let sent = alice
        .handle_command(WorkroomCommand::Message {
            room: room_id.clone(),
            text: "standup in 5".into(),
        })
        .await;
    assert!(sent.ok);

    let history = alice
        .handle_command(WorkroomCommand::History { room: room_id })
        .await;
    assert!(history.ok);
    assert_eq!(history.payload.unwrap().as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn leaving_removes_membership_and_presence() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;

    let alice = WorkroomsEngine::new(store.clone(), UserIdentity::human("alice"));
    let bob = WorkroomsEngine::new(store.clone(), UserIdentity::human("bob"));
    alice.start().await.unwrap();
    bob.start().await.unwrap();

    let room = alice
        .create_room("shared", RoomType::Project, false)
        .await
        .unwrap();
    bob.refresh().await.unwrap();
    bob.join_room(&room.id).await.unwrap();
    assert!(bob.online_users(&room.id).contains(&"bob".to_string()));

    bob.leave_room(&room.id).await.unwrap();
    assert!(!bob.room_members(&room.id).contains(&"bob".to_string()));
    assert!(!bob.online_users(&room.id).contains(&"bob".to_string()));

    // Alice's view converges after a refresh.
    alice.refresh().await.unwrap();
    assert!(!alice.room_members(&room.id).contains(&"bob".to_string()));
}
