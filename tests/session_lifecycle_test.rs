use std::sync::Arc;
use std::time::Duration;

use k1s0_auth_session::{
    AuthSessionError, CreateSessionRequest, DeviceInfo, InMemoryStore, SessionManager, SharedStore,
};

fn manager(store: Arc<InMemoryStore>) -> SessionManager {
    SessionManager::new(store, Duration::from_secs(3600), 10)
}

#[tokio::test]
async fn test_create_session_indexes_user() {
    let store = Arc::new(InMemoryStore::new());
    let sm = manager(store.clone());

    let session = sm
        .create_session(
            CreateSessionRequest::new("user-1", "device-1")
                .with_device_info(DeviceInfo {
                    fingerprint: "fp".to_string(),
                    platform: "ios".to_string(),
                    device: "iPhone".to_string(),
                    browser: String::new(),
                })
                .with_client("10.0.0.1", "app/1.0"),
        )
        .await
        .unwrap();

    assert!(store.exists(&format!("session:{}", session.id)).await.unwrap());
    assert_eq!(
        store.smembers("user-sessions:user-1").await.unwrap(),
        vec![session.id.clone()]
    );
    assert!(sm.is_user_online("user-1").await.unwrap());

    let fetched = sm.get_session(&session.id).await.unwrap();
    assert_eq!(fetched.device_info.platform, "ios");
}

#[tokio::test]
async fn test_invalidate_session_twice_succeeds() {
    let sm = manager(Arc::new(InMemoryStore::new()));
    let session = sm
        .create_session(CreateSessionRequest::new("user-1", "device-1"))
        .await
        .unwrap();

    assert!(sm.invalidate_session(&session.id).await.is_ok());
    assert!(sm.invalidate_session(&session.id).await.is_ok());
    assert!(sm.invalidate_session("never-existed").await.is_ok());
}

#[tokio::test]
async fn test_invalidate_all_user_sessions() {
    let store = Arc::new(InMemoryStore::new());
    let sm = manager(store.clone());
    for device in ["d1", "d2", "d3"] {
        sm.create_session(CreateSessionRequest::new("user-1", device))
            .await
            .unwrap();
    }
    let other = sm
        .create_session(CreateSessionRequest::new("user-2", "d1"))
        .await
        .unwrap();

    assert_eq!(sm.invalidate_all_user_sessions("user-1").await.unwrap(), 3);
    assert!(sm.get_user_sessions("user-1").await.unwrap().is_empty());
    assert!(!sm.is_user_online("user-1").await.unwrap());
    assert!(sm.get_session(&other.id).await.is_ok());
    assert_eq!(sm.get_online_users().await.unwrap(), vec!["user-2".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_create_and_invalidate_all_keeps_live_sessions_indexed() {
    let store = Arc::new(InMemoryStore::new());
    let sm = Arc::new(manager(store.clone()));
    for device in ["d1", "d2"] {
        sm.create_session(CreateSessionRequest::new("user-1", device))
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for i in 0..8 {
        let sm = sm.clone();
        handles.push(tokio::spawn(async move {
            sm.create_session(CreateSessionRequest::new("user-1", format!("new-{i}")))
                .await
                .map(|s| s.id)
        }));
    }
    let invalidate = {
        let sm = sm.clone();
        tokio::spawn(async move { sm.invalidate_all_user_sessions("user-1").await })
    };

    let mut created = Vec::new();
    for handle in handles {
        created.push(handle.await.unwrap().unwrap());
    }
    invalidate.await.unwrap().unwrap();

    // 生き残ったセッションは必ず索引に載っている
    let indexed = store.smembers("user-sessions:user-1").await.unwrap();
    for id in created {
        if store.exists(&format!("session:{id}")).await.unwrap() {
            assert!(indexed.contains(&id), "live session {id} missing from index");
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_session_record_and_index_expire_with_ttl() {
    let store = Arc::new(InMemoryStore::new());
    let sm = SessionManager::new(store.clone(), Duration::from_secs(5), 10);
    let session = sm
        .create_session(CreateSessionRequest::new("user-1", "device-1"))
        .await
        .unwrap();

    tokio::time::advance(Duration::from_secs(6)).await;

    let err = sm.get_session(&session.id).await.unwrap_err();
    assert!(matches!(err, AuthSessionError::NotFound(_)));
    assert!(!store.exists("user-sessions:user-1").await.unwrap());
    assert!(!sm.is_user_online("user-1").await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_update_activity_slides_expiration() {
    let store = Arc::new(InMemoryStore::new());
    let sm = SessionManager::new(store.clone(), Duration::from_secs(10), 10);
    let session = sm
        .create_session(CreateSessionRequest::new("user-1", "device-1"))
        .await
        .unwrap();

    tokio::time::advance(Duration::from_secs(8)).await;
    sm.update_activity(&session.id).await.unwrap();
    tokio::time::advance(Duration::from_secs(8)).await;

    assert!(sm.get_session(&session.id).await.is_ok());
    assert!(sm.is_user_online("user-1").await.unwrap());
}

#[tokio::test]
async fn test_empty_identifiers_are_rejected() {
    let sm = manager(Arc::new(InMemoryStore::new()));
    assert!(matches!(
        sm.get_session("").await,
        Err(AuthSessionError::InvalidArgument(_))
    ));
    assert!(matches!(
        sm.invalidate_all_user_sessions("").await,
        Err(AuthSessionError::InvalidArgument(_))
    ));
    assert!(matches!(
        sm.create_session(CreateSessionRequest::new("user-1", "")).await,
        Err(AuthSessionError::InvalidArgument(_))
    ));
}
