use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use forge_comm_core::bus::{BusStore, CommHub, JsonFileStore, MessageStatus};
use tempfile::TempDir;
use uuid::Uuid;

fn file_hub(path: &std::path::Path) -> CommHub {
    CommHub::new(Arc::new(
        JsonFileStore::new(path).with_lock_timeout(Duration::from_secs(30)),
    ))
}

#[tokio::test]
async fn test_sequential_posts_are_all_kept() {
    let temp_dir = TempDir::new().unwrap();
    let hub = file_hub(&temp_dir.path().join("bus.json"));

    for i in 0..40 {
        hub.post("Adam", ["Elli", "Nova", "Orin"][i % 3], format!("message {}", i))
            .await
            .unwrap();
    }

    let state = hub.snapshot().await.unwrap();
    assert_eq!(state.messages.len(), 40);
    let bodies: Vec<String> = state.messages.iter().map(|m| m.body.clone()).collect();
    let expected: Vec<String> = (0..40).map(|i| format!("message {}", i)).collect();
    assert_eq!(bodies, expected);
}

#[tokio::test]
async fn test_ping_pong_through_the_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("forge_comm_bus.json");

    let adam = file_hub(&path);
    let elli = file_hub(&path);

    adam.post("Adam", "Elli", "ping").await.unwrap();

    let inbox = elli.fetch("elli").await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].status, MessageStatus::Delivered);
    assert!(elli.fetch("Elli").await.unwrap().is_empty());

    elli.reply("Elli", &inbox[0], "pong").await.unwrap();

    let stored = adam.get(inbox[0].id).await.unwrap().unwrap();
    assert_eq!(stored.status, MessageStatus::Replied);
    assert_eq!(stored.reply.unwrap().text, "pong");
}

#[tokio::test]
async fn test_reply_to_unknown_id_is_not_found() {
    let temp_dir = TempDir::new().unwrap();
    let hub = file_hub(&temp_dir.path().join("bus.json"));
    hub.post("Adam", "Elli", "ping").await.unwrap();

    let err = hub.reply_by_id("Elli", Uuid::new_v4(), "pong").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_persist_then_reload_preserves_everything() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("bus.json");

    let hub = file_hub(&path);
    hub.register_agent("Elli").await.unwrap();
    hub.post_with_priority("Adam", "Elli", "first", "high")
        .await
        .unwrap();
    hub.post("Nova", "Adam", "second").await.unwrap();
    let delivered = hub.fetch("Elli").await.unwrap();
    hub.reply("Elli", &delivered[0], "ack").await.unwrap();
    let before = hub.snapshot().await.unwrap();

    let store = JsonFileStore::new(&path);
    store.save(&before).await.unwrap();
    let after = JsonFileStore::new(&path).load().await.unwrap();

    assert_eq!(after, before);
    assert_eq!(after.messages[0].priority, "high");
    assert_eq!(after.messages[1].status, MessageStatus::Queued);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_fetchers_never_duplicate_delivery() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("bus.json");

    let producer = file_hub(&path);
    let mut posted = HashSet::new();
    for i in 0..30 {
        posted.insert(producer.post("Adam", "Elli", format!("job {}", i)).await.unwrap().id);
    }

    // Separate store handles share nothing but the lock file, like separate processes
    let mut fetchers = Vec::new();
    for _ in 0..8 {
        let hub = file_hub(&path);
        fetchers.push(tokio::spawn(async move {
            let mut seen = Vec::new();
            for _ in 0..5 {
                seen.extend(hub.fetch("Elli").await.unwrap().into_iter().map(|m| m.id));
                tokio::task::yield_now().await;
            }
            seen
        }));
    }

    let mut delivered = Vec::new();
    for fetcher in fetchers {
        delivered.extend(fetcher.await.unwrap());
    }

    let unique: HashSet<Uuid> = delivered.iter().copied().collect();
    assert_eq!(unique.len(), delivered.len(), "a message was delivered twice");
    assert_eq!(unique, posted);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_posts_lose_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("bus.json");

    let mut producers = Vec::new();
    for p in 0..6 {
        let hub = file_hub(&path);
        producers.push(tokio::spawn(async move {
            for i in 0..10 {
                hub.post(format!("producer-{}", p), "Elli", format!("{}-{}", p, i))
                    .await
                    .unwrap();
            }
        }));
    }
    for producer in producers {
        producer.await.unwrap();
    }

    let state = file_hub(&path).snapshot().await.unwrap();
    assert_eq!(state.messages.len(), 60);
}
