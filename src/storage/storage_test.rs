use super::*;
use chrono::Duration;

fn sample_client(id: &str) -> Client {
    Client {
        id: id.to_string(),
        name: "Test Client".to_string(),
        redirect_uris: vec!["https://client.example.com/callback".to_string()],
        is_confidential: false,
        hashed_secret: None,
        owner_user_id: Some(UserId(1)),
        created_at: Utc::now(),
    }
}

fn sample_user(login: &str) -> HostUser {
    HostUser {
        id: UserId(0),
        login: login.to_string(),
        display_name: login.to_uppercase(),
        email: format!("{}@example.com", login),
        password_hash: "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA".to_string(),
        capabilities: vec!["read".to_string()],
        created_at: Utc::now(),
    }
}

fn access_token(jti: &str, client_id: &str, expires_in: Duration) -> AccessToken {
    AccessToken {
        jti: jti.to_string(),
        client_id: client_id.to_string(),
        user_id: UserId(1),
        scopes: vec!["default".to_string()],
        expires_at: Utc::now() + expires_in,
        is_revoked: false,
    }
}

async fn test_client_operations<S: Storage>(storage: Arc<S>) {
    let client = sample_client("client-a");
    storage.save_client(&client).await.unwrap();

    let loaded = storage.get_client("client-a").await.unwrap().unwrap();
    assert_eq!(loaded.name, "Test Client");
    assert_eq!(loaded.redirect_uris, client.redirect_uris);
    assert!(!loaded.is_confidential);

    // Upsert
    let mut renamed = client.clone();
    renamed.name = "Renamed".to_string();
    storage.save_client(&renamed).await.unwrap();
    let loaded = storage.get_client("client-a").await.unwrap().unwrap();
    assert_eq!(loaded.name, "Renamed");

    storage.save_client(&sample_client("client-b")).await.unwrap();
    assert_eq!(storage.list_clients().await.unwrap().len(), 2);

    storage.delete_client("client-a").await.unwrap();
    assert!(storage.get_client("client-a").await.unwrap().is_none());
    assert!(storage.get_client("missing").await.unwrap().is_none());
}

async fn test_auth_code_single_use<S: Storage>(storage: Arc<S>) {
    storage.save_client(&sample_client("client-a")).await.unwrap();

    let code = AuthCode {
        code_id: "code-1".to_string(),
        client_id: "client-a".to_string(),
        user_id: UserId(1),
        redirect_uri: "https://client.example.com/callback".to_string(),
        scopes: vec!["default".to_string()],
        code_challenge: Some("challenge".to_string()),
        code_challenge_method: Some("S256".to_string()),
        expires_at: Utc::now() + Duration::minutes(10),
        is_revoked: false,
    };
    storage.save_auth_code(&code).await.unwrap();

    let loaded = storage.get_auth_code("code-1").await.unwrap().unwrap();
    assert_eq!(loaded.code_challenge.as_deref(), Some("challenge"));
    assert!(!loaded.is_revoked);

    assert!(storage.revoke_auth_code("code-1").await.unwrap());
    assert!(
        !storage.revoke_auth_code("code-1").await.unwrap(),
        "second revoke must lose"
    );
    assert!(!storage.revoke_auth_code("unknown").await.unwrap());
    assert!(storage.get_auth_code("code-1").await.unwrap().unwrap().is_revoked);
}

async fn test_token_operations<S: Storage>(storage: Arc<S>) {
    storage.save_client(&sample_client("client-a")).await.unwrap();
    storage.save_client(&sample_client("client-b")).await.unwrap();

    storage
        .save_access_token(&access_token("jti-a", "client-a", Duration::hours(1)))
        .await
        .unwrap();
    storage
        .save_access_token(&access_token("jti-b", "client-b", Duration::hours(1)))
        .await
        .unwrap();
    storage
        .save_refresh_token(&RefreshToken {
            token_id: "rt-a".to_string(),
            access_token_id: "jti-a".to_string(),
            expires_at: Utc::now() + Duration::days(30),
            is_revoked: false,
        })
        .await
        .unwrap();

    let loaded = storage.get_access_token("jti-a").await.unwrap().unwrap();
    assert_eq!(loaded.user_id, UserId(1));
    assert_eq!(loaded.scopes, vec!["default".to_string()]);

    assert!(storage.revoke_refresh_token("rt-a").await.unwrap());
    assert!(!storage.revoke_refresh_token("rt-a").await.unwrap());

    // Client-wide revocation touches only that client's tokens
    let revoked = storage.revoke_tokens_for_client("client-a").await.unwrap();
    assert_eq!(revoked, 1, "refresh token was already revoked");
    assert!(storage.get_access_token("jti-a").await.unwrap().unwrap().is_revoked);
    assert!(!storage.get_access_token("jti-b").await.unwrap().unwrap().is_revoked);

    assert!(storage.revoke_access_token("jti-b").await.unwrap());
    assert!(!storage.revoke_access_token("jti-b").await.unwrap());
}

async fn test_purge_expired<S: Storage>(storage: Arc<S>) {
    storage.save_client(&sample_client("client-a")).await.unwrap();
    storage
        .save_access_token(&access_token("old", "client-a", Duration::hours(-2)))
        .await
        .unwrap();
    storage
        .save_access_token(&access_token("fresh", "client-a", Duration::hours(1)))
        .await
        .unwrap();

    let purged = storage.purge_expired(Utc::now()).await.unwrap();
    assert_eq!(purged, 1);
    assert!(storage.get_access_token("old").await.unwrap().is_none());
    assert!(storage.get_access_token("fresh").await.unwrap().is_some());
}

async fn test_option_operations<S: Storage>(storage: Arc<S>) {
    assert!(storage.get_option("missing").await.unwrap().is_none());

    storage.set_option("site_name", "Demo").await.unwrap();
    assert_eq!(
        storage.get_option("site_name").await.unwrap().as_deref(),
        Some("Demo")
    );

    storage
        .set_options(&[("k1", "v1"), ("k2", "v2"), ("site_name", "Changed")])
        .await
        .unwrap();
    assert_eq!(storage.get_option("k1").await.unwrap().as_deref(), Some("v1"));
    assert_eq!(storage.get_option("k2").await.unwrap().as_deref(), Some("v2"));
    assert_eq!(
        storage.get_option("site_name").await.unwrap().as_deref(),
        Some("Changed")
    );

    storage.delete_option("k1").await.unwrap();
    assert!(storage.get_option("k1").await.unwrap().is_none());
}

async fn test_user_operations<S: Storage>(storage: Arc<S>) {
    let alice = storage.insert_user(&sample_user("alice")).await.unwrap();
    let bob = storage.insert_user(&sample_user("bob")).await.unwrap();
    assert_ne!(alice, bob);

    let loaded = storage.get_user(alice).await.unwrap().unwrap();
    assert_eq!(loaded.login, "alice");
    assert_eq!(loaded.id, alice);
    assert!(loaded.has_cap("read"));

    let by_login = storage.get_user_by_login("bob").await.unwrap().unwrap();
    assert_eq!(by_login.id, bob);

    assert!(
        storage.insert_user(&sample_user("alice")).await.is_err(),
        "duplicate login must be rejected"
    );

    assert_eq!(storage.list_users().await.unwrap().len(), 2);
    storage.delete_user(bob).await.unwrap();
    assert!(storage.get_user(bob).await.unwrap().is_none());
}

#[tokio::test]
async fn test_memory_storage_clients() {
    test_client_operations(Arc::new(MemoryStorage::new())).await;
}

#[tokio::test]
async fn test_memory_storage_auth_codes() {
    test_auth_code_single_use(Arc::new(MemoryStorage::new())).await;
}

#[tokio::test]
async fn test_memory_storage_tokens() {
    test_token_operations(Arc::new(MemoryStorage::new())).await;
}

#[tokio::test]
async fn test_memory_storage_purge() {
    test_purge_expired(Arc::new(MemoryStorage::new())).await;
}

#[tokio::test]
async fn test_memory_storage_options() {
    test_option_operations(Arc::new(MemoryStorage::new())).await;
}

#[tokio::test]
async fn test_memory_storage_users() {
    test_user_operations(Arc::new(MemoryStorage::new())).await;
}

async fn sqlite() -> Arc<SqliteStorage> {
    Arc::new(
        SqliteStorage::new(":memory:")
            .await
            .expect("SQLite creation failed"),
    )
}

#[tokio::test]
async fn test_sqlite_storage_clients() {
    test_client_operations(sqlite().await).await;
}

#[tokio::test]
async fn test_sqlite_storage_auth_codes() {
    test_auth_code_single_use(sqlite().await).await;
}

#[tokio::test]
async fn test_sqlite_storage_tokens() {
    test_token_operations(sqlite().await).await;
}

#[tokio::test]
async fn test_sqlite_storage_purge() {
    test_purge_expired(sqlite().await).await;
}

#[tokio::test]
async fn test_sqlite_storage_options() {
    test_option_operations(sqlite().await).await;
}

#[tokio::test]
async fn test_sqlite_storage_users() {
    test_user_operations(sqlite().await).await;
}
