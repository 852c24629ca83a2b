use super::*;
use crate::auth::crypto::{AccessTokenClaims, sign_access_token};
use crate::auth::keys::KeyManager;
use crate::auth::resource::ResourceServerFactory;
use crate::model::{AccessToken, UserId};
use crate::storage::{MemoryStorage, TokenStorage, UserStorage};
use axum::http::HeaderValue;
use chrono::{Duration, Utc};

struct Fixture {
    storage: Arc<MemoryStorage>,
    keys: Arc<KeyManager>,
    validator: Arc<TokenValidator>,
    user: HostUser,
}

async fn fixture() -> Fixture {
    let storage = Arc::new(MemoryStorage::new());
    let keys = Arc::new(KeyManager::new(storage.clone()));
    let resource_server = ResourceServerFactory::create(storage.clone(), keys.clone());
    let validator = Arc::new(TokenValidator::new(resource_server, storage.clone()));

    let mut user = HostUser {
        id: UserId(0),
        login: "editor".to_string(),
        display_name: "Editor".to_string(),
        email: "editor@example.com".to_string(),
        password_hash: String::new(),
        capabilities: vec!["read".to_string(), "edit_posts".to_string()],
        created_at: Utc::now(),
    };
    user.id = storage.insert_user(&user).await.unwrap();

    Fixture {
        storage,
        keys,
        validator,
        user,
    }
}

async fn mint(f: &Fixture, sub: &str, scopes: &[&str], lifetime: Duration) -> String {
    let now = Utc::now();
    let jti = crate::auth::crypto::generate_identifier();
    let scopes: Vec<String> = scopes.iter().map(|s| s.to_string()).collect();

    f.storage
        .save_access_token(&AccessToken {
            jti: jti.clone(),
            client_id: "client".to_string(),
            user_id: f.user.id,
            scopes: scopes.clone(),
            expires_at: now + lifetime,
            is_revoked: false,
        })
        .await
        .unwrap();

    let claims = AccessTokenClaims {
        aud: "client".to_string(),
        jti,
        iat: now.timestamp(),
        nbf: now.timestamp(),
        exp: (now + lifetime).timestamp(),
        sub: sub.to_string(),
        scopes,
    };
    sign_access_token(&claims, &f.keys.get_private_key().await.unwrap()).unwrap()
}

fn bearer(token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
    );
    headers
}

#[test]
fn test_get_bearer_token() {
    let mut headers = HeaderMap::new();
    assert_eq!(TokenValidator::get_bearer_token(&headers), None);

    headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc123"));
    assert_eq!(TokenValidator::get_bearer_token(&headers), None);

    headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer xyz"));
    assert_eq!(TokenValidator::get_bearer_token(&headers).as_deref(), Some("xyz"));

    headers.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer xyz"));
    assert_eq!(TokenValidator::get_bearer_token(&headers).as_deref(), Some("xyz"));
}

#[tokio::test]
async fn test_validate_request_sets_current_user() {
    let f = fixture().await;
    let jwt = mint(&f, &f.user.id.to_string(), &["default"], Duration::hours(1)).await;
    let ctx = RequestContext::new();

    let user = f.validator.validate_request(&bearer(&jwt), &ctx).await.unwrap();

    assert_eq!(user.login, "editor");
    assert_eq!(ctx.current_user_id(), Some(f.user.id));
    assert!(f.validator.has_valid_token(&bearer(&jwt)).await);
}

#[tokio::test]
async fn test_validation_error_codes() {
    let f = fixture().await;
    let ctx = RequestContext::new();

    let err = f
        .validator
        .validate_request(&HeaderMap::new(), &ctx)
        .await
        .unwrap_err();
    assert_eq!((err.code.as_str(), err.status), ("oauth_missing_token", 401));

    let mut basic = HeaderMap::new();
    basic.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc123"));
    let err = f.validator.validate_request(&basic, &ctx).await.unwrap_err();
    assert_eq!((err.code.as_str(), err.status), ("oauth_access_denied", 401));

    let expired = mint(&f, &f.user.id.to_string(), &["default"], Duration::seconds(-5)).await;
    let err = f
        .validator
        .validate_request(&bearer(&expired), &ctx)
        .await
        .unwrap_err();
    assert_eq!((err.code.as_str(), err.status), ("oauth_invalid_token", 401));

    let no_subject = mint(&f, "", &["default"], Duration::hours(1)).await;
    let err = f
        .validator
        .validate_request(&bearer(&no_subject), &ctx)
        .await
        .unwrap_err();
    assert_eq!(err.code, "oauth_invalid_token");

    let ghost = mint(&f, "999", &["default"], Duration::hours(1)).await;
    let err = f
        .validator
        .validate_request(&bearer(&ghost), &ctx)
        .await
        .unwrap_err();
    assert_eq!((err.code.as_str(), err.status), ("oauth_user_not_found", 401));

    assert!(ctx.current_user().is_none());
}

#[tokio::test]
async fn test_deleted_user_is_not_found() {
    let f = fixture().await;
    let jwt = mint(&f, &f.user.id.to_string(), &["default"], Duration::hours(1)).await;
    f.storage.delete_user(f.user.id).await.unwrap();

    let err = f
        .validator
        .validate_request(&bearer(&jwt), &RequestContext::new())
        .await
        .unwrap_err();
    assert_eq!(err.code, "oauth_user_not_found");
}

#[tokio::test]
async fn test_get_token_metadata() {
    let f = fixture().await;
    let jwt = mint(&f, &f.user.id.to_string(), &["default"], Duration::hours(1)).await;

    let claims = f.validator.get_token_metadata(&bearer(&jwt)).await.unwrap();
    assert_eq!(claims.client_id, "client");
    assert_eq!(claims.user_id, Some(f.user.id));
    assert_eq!(claims.scopes, vec!["default".to_string()]);
    assert_eq!(claims.access_token_id.len(), 40);
}

#[tokio::test]
async fn test_permission_callback_falls_back_to_session() {
    let f = fixture().await;
    let guard = f.validator.permission_callback();

    // No token, no session
    let err = guard
        .authorize(&HeaderMap::new(), &RequestContext::new())
        .await
        .unwrap_err();
    assert_eq!(err.code, "oauth_missing_token");

    // No token, session present
    let ctx = RequestContext::with_session_user(f.user.clone());
    let user = guard.authorize(&HeaderMap::new(), &ctx).await.unwrap();
    assert_eq!(user.id, f.user.id);
    assert_eq!(ctx.current_user_id(), Some(f.user.id));

    // A non-Bearer Authorization header still falls back to the session
    let mut basic = HeaderMap::new();
    basic.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc123"));
    let ctx = RequestContext::with_session_user(f.user.clone());
    let user = guard.authorize(&basic, &ctx).await.unwrap();
    assert_eq!(user.id, f.user.id);
    assert_eq!(ctx.current_user_id(), Some(f.user.id));

    // A context already bound to someone else is not rebound
    let ctx = RequestContext::with_session_user(f.user.clone());
    let mut other = f.user.clone();
    other.id = UserId(f.user.id.as_u64() + 100);
    assert!(ctx.set_current_user(other));
    let err = guard.authorize(&HeaderMap::new(), &ctx).await.unwrap_err();
    assert_eq!(err.code, "oauth_error");
    assert_eq!(err.status, 500);

    // Without a session it reports the header problem
    let err = guard
        .authorize(&basic, &RequestContext::new())
        .await
        .unwrap_err();
    assert_eq!(err.code, "oauth_access_denied");

    // A bad token is not rescued by the session
    let ctx = RequestContext::with_session_user(f.user.clone());
    let err = guard.authorize(&bearer("garbage"), &ctx).await.unwrap_err();
    assert_eq!(err.code, "oauth_invalid_token");

    // Valid token
    let jwt = mint(&f, &f.user.id.to_string(), &["default"], Duration::hours(1)).await;
    let user = guard
        .authorize(&bearer(&jwt), &RequestContext::new())
        .await
        .unwrap();
    assert_eq!(user.id, f.user.id);
}

#[tokio::test]
async fn test_require_scopes() {
    let f = fixture().await;
    let jwt = mint(&f, &f.user.id.to_string(), &["default"], Duration::hours(1)).await;

    let ctx = RequestContext::new();
    let user = f
        .validator
        .require_scopes(&["default"])
        .authorize(&bearer(&jwt), &ctx)
        .await
        .unwrap();
    assert_eq!(user.id, f.user.id);
    assert_eq!(ctx.current_user_id(), Some(f.user.id));

    let ctx = RequestContext::new();
    let err = f
        .validator
        .require_scopes(&["default", "write", "admin"])
        .authorize(&bearer(&jwt), &ctx)
        .await
        .unwrap_err();
    assert_eq!(err.code, "oauth_insufficient_scope");
    assert_eq!(err.status, 403);
    assert!(err.message.contains("write"));
    assert!(ctx.current_user().is_none());
}
