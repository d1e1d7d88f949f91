//! Session and client cache integration tests.

use std::sync::Arc;
use std::time::Duration;

use tidemark_coord::{
    CoordEndpoint, CoordPaths, CoordSessions, CoordStore, SimulatedConnector, SimulatedCoordStore,
};
use tidemark_core::ShardId;
use tidemark_source::{
    SimulatedLogSource, SimulatedSourceConnector, SourceClients, SourceIdentity,
};

use crate::scenarios::checkpoints::{LOGSTORE, PROJECT, ROOT};

fn endpoint() -> CoordEndpoint {
    CoordEndpoint::new("zk1:2181,zk2:2181", Duration::from_secs(30), None)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_session_concurrent_first_use_connects_once() {
    let connector = SimulatedConnector::new(SimulatedCoordStore::new(42));
    let sessions = Arc::new(CoordSessions::new(Arc::new(connector.clone())));

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let sessions = Arc::clone(&sessions);
        tasks.push(tokio::spawn(async move {
            sessions.session(&endpoint()).await.unwrap()
        }));
    }
    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap());
    }

    assert_eq!(connector.connect_count(), 1);
    assert!(handles.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_session_concurrent_lock_helpers_share_one_instance() {
    let connector = SimulatedConnector::new(SimulatedCoordStore::new(7));
    let sessions = Arc::new(CoordSessions::new(Arc::new(connector.clone())));
    let paths = CoordPaths::new(ROOT, PROJECT, LOGSTORE).unwrap();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let sessions = Arc::clone(&sessions);
        let paths = paths.clone();
        tasks.push(tokio::spawn(async move {
            sessions.shard_lock(&endpoint(), &paths).await.unwrap()
        }));
    }
    let mut locks = Vec::new();
    for task in tasks {
        locks.push(task.await.unwrap());
    }

    assert!(locks.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert_eq!(connector.connect_count(), 1);
    // A shared helper renews rather than contends with itself.
    assert!(locks[0].try_lock(ShardId::new(0), 30).await.unwrap());
    assert!(locks[1].try_lock(ShardId::new(0), 30).await.unwrap());
}

#[tokio::test]
async fn test_session_teardown_is_transparent_to_next_user() {
    let store = SimulatedCoordStore::new(42);
    let connector = SimulatedConnector::new(store.clone());
    let sessions = CoordSessions::new(Arc::new(connector.clone()));

    let first = sessions.session(&endpoint()).await.unwrap();
    sessions.teardown_all().await;
    assert_eq!(sessions.session_count().await, 0);
    assert!(first.exists("/").await.unwrap_err().is_unavailable());

    let second = sessions.session(&endpoint()).await.unwrap();
    assert!(second.exists("/").await.unwrap());
    assert_eq!(connector.connect_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_source_clients_keyed_by_credentials() {
    let connector = SimulatedSourceConnector::new(SimulatedLogSource::new(42));
    let clients = Arc::new(SourceClients::new(Arc::new(connector.clone())));

    let mut tasks = Vec::new();
    for i in 0..12 {
        let clients = Arc::clone(&clients);
        tasks.push(tokio::spawn(async move {
            let secret = if i % 2 == 0 { "old" } else { "rotated" };
            clients
                .client(&SourceIdentity::new("https://logs.example", "id", secret))
                .await
                .unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(connector.connect_count(), 2);
    assert_eq!(clients.client_count().await, 2);
}
