use super::*;
use chrono::Duration;
use tempfile::TempDir;

fn client(id: &str) -> Client {
    Client {
        id: id.to_string(),
        name: "Persistent".to_string(),
        redirect_uris: vec![
            "https://a.example.com/cb".to_string(),
            "https://b.example.com/cb".to_string(),
        ],
        is_confidential: true,
        hashed_secret: Some("ab".repeat(32)),
        owner_user_id: None,
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_file_database_persists_across_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("nested").join("pressgate.db");
    let dsn = db_path.to_str().unwrap().to_string();

    {
        let storage = SqliteStorage::new(&dsn).await.unwrap();
        storage.save_client(&client("persisted")).await.unwrap();
        storage.set_option("oauth_public_key", "pem").await.unwrap();
    }

    let reopened = SqliteStorage::new(&dsn).await.unwrap();
    let loaded = reopened.get_client("persisted").await.unwrap().unwrap();
    assert_eq!(loaded.redirect_uris.len(), 2);
    assert!(loaded.is_confidential);
    assert_eq!(loaded.hashed_secret, Some("ab".repeat(32)));
    assert_eq!(
        reopened.get_option("oauth_public_key").await.unwrap().as_deref(),
        Some("pem")
    );
}

#[tokio::test]
async fn test_path_traversal_rejected() {
    let result = SqliteStorage::new("../outside.db").await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_concurrent_refresh_revocation_has_single_winner() {
    let temp_dir = TempDir::new().unwrap();
    let dsn = temp_dir.path().join("race.db").to_str().unwrap().to_string();
    let storage = Arc::new(SqliteStorage::new(&dsn).await.unwrap());

    storage.save_client(&client("c")).await.unwrap();
    storage
        .save_access_token(&AccessToken {
            jti: "jti".to_string(),
            client_id: "c".to_string(),
            user_id: UserId(3),
            scopes: vec!["default".to_string()],
            expires_at: Utc::now() + Duration::hours(1),
            is_revoked: false,
        })
        .await
        .unwrap();
    storage
        .save_refresh_token(&RefreshToken {
            token_id: "rt".to_string(),
            access_token_id: "jti".to_string(),
            expires_at: Utc::now() + Duration::days(30),
            is_revoked: false,
        })
        .await
        .unwrap();

    let mut handles = vec![];
    for _ in 0..10 {
        let storage = storage.clone();
        handles.push(tokio::spawn(async move {
            storage.revoke_refresh_token("rt").await.unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_delete_client_cascades() {
    let storage = SqliteStorage::new(":memory:").await.unwrap();
    storage.save_client(&client("c")).await.unwrap();
    storage
        .save_access_token(&AccessToken {
            jti: "jti".to_string(),
            client_id: "c".to_string(),
            user_id: UserId(3),
            scopes: vec![],
            expires_at: Utc::now() + Duration::hours(1),
            is_revoked: false,
        })
        .await
        .unwrap();
    storage
        .save_refresh_token(&RefreshToken {
            token_id: "rt".to_string(),
            access_token_id: "jti".to_string(),
            expires_at: Utc::now() + Duration::days(30),
            is_revoked: false,
        })
        .await
        .unwrap();

    storage.delete_client("c").await.unwrap();

    assert!(storage.get_access_token("jti").await.unwrap().is_none());
    assert!(storage.get_refresh_token("rt").await.unwrap().is_none());
}
