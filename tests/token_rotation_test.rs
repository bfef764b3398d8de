use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use secrecy::SecretString;

use k1s0_auth_session::{
    AuthSessionError, CreateSessionRequest, InMemoryStore, JwtCredentialIssuer, SessionManager,
    TokenBlacklist, TokenManager, TokenPair, TokenSettings,
};

struct Harness {
    sessions: Arc<SessionManager>,
    blacklist: Arc<TokenBlacklist>,
    tokens: Arc<TokenManager>,
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let sessions = Arc::new(SessionManager::new(store.clone(), Duration::from_secs(3600), 10));
    let blacklist = Arc::new(TokenBlacklist::new(store));
    let issuer = Arc::new(JwtCredentialIssuer::new(
        &SecretString::new("integration-secret".to_string()),
        "k1s0-auth-session",
    ));
    let tokens = Arc::new(TokenManager::new(
        sessions.clone(),
        blacklist.clone(),
        issuer,
        TokenSettings::default(),
    ));
    Harness {
        sessions,
        blacklist,
        tokens,
    }
}

async fn login(h: &Harness, user_id: &str, device_id: &str) -> TokenPair {
    let session = h
        .sessions
        .create_session(CreateSessionRequest::new(user_id, device_id))
        .await
        .unwrap();
    h.tokens.issue_token_pair(&session).unwrap()
}

#[tokio::test]
async fn test_rotation_chain() {
    let h = harness();
    let mut pair = login(&h, "user-1", "device-1").await;

    for _ in 0..3 {
        let next = h.tokens.rotate_refresh_token(&pair.refresh_token).await.unwrap();
        assert!(h.tokens.rotate_refresh_token(&pair.refresh_token).await.is_err());
        h.tokens.validate_with_session(&next.access_token).await.unwrap();
        pair = next;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_rotation_yields_single_winner() {
    let h = harness();
    let pair = login(&h, "user-1", "device-1").await;

    let mut handles = Vec::new();
    for _ in 0..16 {
        let tokens = h.tokens.clone();
        let refresh = pair.refresh_token.clone();
        handles.push(tokio::spawn(async move {
            tokens.rotate_refresh_token(&refresh).await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(e) => assert!(matches!(e, AuthSessionError::TokenRevoked(_))),
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_session_liveness_coupling() {
    let h = harness();
    let a = login(&h, "user-1", "phone").await;
    let b = login(&h, "user-1", "laptop").await;
    let other = login(&h, "user-2", "phone").await;

    assert_eq!(h.tokens.invalidate_user_tokens("user-1").await.unwrap(), 2);

    for token in [&a.access_token, &b.access_token, &a.refresh_token] {
        let err = h.tokens.validate_with_session(token).await.unwrap_err();
        assert!(err.is_auth_failure());
        assert_eq!(err.public_message(), "unauthorized");
    }
    h.tokens.validate_with_session(&other.access_token).await.unwrap();
}

#[tokio::test]
async fn test_logout_is_terminal() {
    let h = harness();
    let pair = login(&h, "user-1", "device-1").await;
    h.tokens.logout(&pair.refresh_token).await.unwrap();

    assert!(h.tokens.rotate_refresh_token(&pair.refresh_token).await.is_err());
    assert!(h.tokens.validate_with_session(&pair.access_token).await.is_err());
    assert!(!h.sessions.is_user_online("user-1").await.unwrap());
}

#[tokio::test]
async fn test_blacklist_entry_self_expires() {
    let h = harness();
    let expires_at = Utc::now() + chrono::Duration::milliseconds(800);
    h.blacklist.add("short-lived", "logout", expires_at).await.unwrap();
    assert!(h.blacklist.contains("short-lived").await.unwrap());

    tokio::time::sleep(Duration::from_millis(1200)).await;

    assert!(!h.blacklist.contains("short-lived").await.unwrap());
    assert!(h.blacklist.get_entry("short-lived").await.unwrap().is_none());
}
