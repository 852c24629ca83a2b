use super::*;
use crate::storage::MemoryStorage;
use chrono::Duration;

fn repositories() -> Repositories {
    Repositories::new(Arc::new(MemoryStorage::new()))
}

fn new_client(confidential: bool) -> NewClient {
    NewClient {
        name: "Assistant".to_string(),
        redirect_uris: vec!["https://assistant.example.com/callback".to_string()],
        is_confidential: confidential,
        owner_user_id: Some(UserId(1)),
    }
}

#[tokio::test]
async fn test_register_confidential_client_hashes_secret() {
    let repos = repositories();
    let (client, secret) = repos.clients.register(new_client(true)).await.unwrap();

    let secret = secret.expect("confidential clients get a secret");
    let hashed = client.hashed_secret.clone().unwrap();
    assert_ne!(hashed, secret, "secret must not be stored in clear");

    let valid = repos
        .clients
        .validate_client(&client.id, Some(&secret))
        .await
        .unwrap();
    assert!(valid.is_some());

    let wrong = repos
        .clients
        .validate_client(&client.id, Some("nope"))
        .await
        .unwrap();
    assert!(wrong.is_none());

    let missing = repos.clients.validate_client(&client.id, None).await.unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn test_public_client_secret_never_checked() {
    let repos = repositories();
    let (client, secret) = repos.clients.register(new_client(false)).await.unwrap();
    assert!(secret.is_none());
    assert!(client.hashed_secret.is_none());

    for presented in [None, Some("anything")] {
        let validated = repos
            .clients
            .validate_client(&client.id, presented)
            .await
            .unwrap();
        assert!(validated.is_some());
    }
}

#[tokio::test]
async fn test_unknown_client_is_not_validated() {
    let repos = repositories();
    assert!(
        repos
            .clients
            .validate_client("missing", Some("secret"))
            .await
            .unwrap()
            .is_none()
    );
    assert!(repos.clients.delete("missing").await.is_err());
}

#[test]
fn test_scope_repository_only_knows_default() {
    let scopes = ScopeRepository;
    assert_eq!(
        scopes.get_scope_entity_by_identifier("default"),
        Some(Scope::default_scope())
    );
    assert_eq!(scopes.get_scope_entity_by_identifier("admin"), None);

    let finalized = scopes.finalize_scopes(&[Scope::new("anything"), Scope::new("else")]);
    assert_eq!(finalized, vec![Scope::default_scope()]);
}

#[tokio::test]
async fn test_auth_code_consumed_once() {
    let repos = repositories();
    let code = AuthCode {
        code_id: "code".to_string(),
        client_id: "client".to_string(),
        user_id: UserId(1),
        redirect_uri: "https://assistant.example.com/callback".to_string(),
        scopes: vec!["default".to_string()],
        code_challenge: None,
        code_challenge_method: None,
        expires_at: Utc::now() + Duration::minutes(10),
        is_revoked: false,
    };
    repos.auth_codes.persist_new_auth_code(&code).await.unwrap();

    assert!(!repos.auth_codes.is_auth_code_revoked("code").await.unwrap());
    assert!(repos.auth_codes.consume_auth_code("code").await.unwrap());
    assert!(!repos.auth_codes.consume_auth_code("code").await.unwrap());
    assert!(repos.auth_codes.is_auth_code_revoked("code").await.unwrap());
    assert!(repos.auth_codes.is_auth_code_revoked("unknown").await.unwrap());
}

#[tokio::test]
async fn test_token_revocation_flags() {
    let repos = repositories();
    repos
        .access_tokens
        .persist_new_access_token(&AccessToken {
            jti: "jti".to_string(),
            client_id: "client".to_string(),
            user_id: UserId(2),
            scopes: vec!["default".to_string()],
            expires_at: Utc::now() + Duration::hours(1),
            is_revoked: false,
        })
        .await
        .unwrap();
    repos
        .refresh_tokens
        .persist_new_refresh_token(&RefreshToken {
            token_id: "rt".to_string(),
            access_token_id: "jti".to_string(),
            expires_at: Utc::now() + Duration::days(30),
            is_revoked: false,
        })
        .await
        .unwrap();

    assert!(!repos.access_tokens.is_access_token_revoked("jti").await.unwrap());
    assert!(repos.access_tokens.revoke_access_token("jti").await.unwrap());
    assert!(repos.access_tokens.is_access_token_revoked("jti").await.unwrap());
    assert!(repos.access_tokens.is_access_token_revoked("other").await.unwrap());

    assert!(!repos.refresh_tokens.is_refresh_token_revoked("rt").await.unwrap());
    assert!(repos.refresh_tokens.revoke_refresh_token("rt").await.unwrap());
    assert!(!repos.refresh_tokens.revoke_refresh_token("rt").await.unwrap());
}
