use super::*;
use chrono::Duration;

fn sample_client(confidential: bool, secret: Option<&str>) -> Client {
    Client {
        id: "client-1".to_string(),
        name: "Claude".to_string(),
        redirect_uris: vec!["https://claude.ai/api/mcp/auth_callback".to_string()],
        is_confidential: confidential,
        hashed_secret: secret.map(String::from),
        owner_user_id: Some(UserId(1)),
        created_at: Utc::now(),
    }
}

#[test]
fn test_confidential_client_requires_secret() {
    assert!(sample_client(true, Some("abc")).validate().is_ok());
    assert!(sample_client(true, None).validate().is_err());
    assert!(sample_client(true, Some("")).validate().is_err());
    assert!(sample_client(false, None).validate().is_ok());
}

#[test]
fn test_client_without_redirect_uris_is_invalid() {
    let mut client = sample_client(false, None);
    client.redirect_uris.clear();
    assert!(client.validate().is_err());
}

#[test]
fn test_token_entity_expiry() {
    let now = Utc::now();
    let token = AccessToken {
        jti: "jti".to_string(),
        client_id: "c".to_string(),
        user_id: UserId(7),
        scopes: vec!["default".to_string()],
        expires_at: now + Duration::hours(1),
        is_revoked: false,
    };

    assert!(token.is_active_at(now));
    assert!(token.is_expired_at(now + Duration::hours(2)));

    let revoked = AccessToken {
        is_revoked: true,
        ..token
    };
    assert!(!revoked.is_active_at(now));
}

#[test]
fn test_user_id_parse() {
    assert_eq!(UserId::parse("42"), Some(UserId(42)));
    assert_eq!(UserId::parse(""), None);
    assert_eq!(UserId::parse("0"), None);
    assert_eq!(UserId::parse("abc"), None);
}

#[test]
fn test_host_user_password_hash_not_serialized() {
    let user = HostUser {
        id: UserId(1),
        login: "admin".to_string(),
        display_name: "Admin".to_string(),
        email: "admin@example.com".to_string(),
        password_hash: "$argon2id$secret".to_string(),
        capabilities: vec!["manage_options".to_string()],
        created_at: Utc::now(),
    };

    let json = serde_json::to_string(&user).unwrap();
    assert!(!json.contains("argon2"));
    assert!(user.has_cap("manage_options"));
    assert!(!user.has_cap("edit_posts"));
}
