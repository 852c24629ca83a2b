//! Integration tests for guarded ability execution over HTTP
//!
//! Covers the Bearer gate on `/mcp`, the REST ability surface and the
//! before/after hooks observed through the shared hook bus.

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use chrono::Utc;
use pressgate::abilities::{AbilityEvent, HookBus};
use pressgate::auth::repository::NewClient;
use pressgate::auth::server::{AuthorizeParams, TokenRequest};
use pressgate::http::build_router;
use pressgate::http::session::SessionStore;
use pressgate::model::{HostUser, UserId};
use pressgate::utils::TestEnvironment;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

const REDIRECT_URI: &str = "http://localhost:7777/callback";
// plain PKCE: challenge == verifier
const VERIFIER: &str = "plain-verifier-0123456789-0123456789-0123456789";

async fn issue_token(env: &TestEnvironment) -> (HostUser, String) {
    let mut user = HostUser {
        id: UserId(0),
        login: "agent-owner".to_string(),
        display_name: "Agent Owner".to_string(),
        email: "owner@example.com".to_string(),
        password_hash: String::new(),
        capabilities: vec!["read".to_string()],
        created_at: Utc::now(),
    };
    user.id = env.deps.storage.insert_user(&user).await.unwrap();

    let server = &env.deps.authorization_server;
    let (client, _) = server
        .repositories()
        .clients
        .register(NewClient {
            name: "Agent".to_string(),
            redirect_uris: vec![REDIRECT_URI.to_string()],
            is_confidential: false,
            owner_user_id: None,
        })
        .await
        .unwrap();

    let request = server
        .validate_authorization_request(&AuthorizeParams {
            response_type: Some("code".to_string()),
            client_id: Some(client.id.clone()),
            redirect_uri: Some(REDIRECT_URI.to_string()),
            code_challenge: Some(VERIFIER.to_string()),
            code_challenge_method: Some("plain".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    let location = server
        .complete_authorization_request(&request, user.id, true)
        .await
        .unwrap();
    let code = url::Url::parse(&location)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.into_owned())
        .unwrap();

    let tokens = server
        .respond_to_access_token_request(
            &TokenRequest {
                grant_type: Some("authorization_code".to_string()),
                code: Some(code),
                redirect_uri: Some(REDIRECT_URI.to_string()),
                code_verifier: Some(VERIFIER.to_string()),
                client_id: Some(client.id),
                ..Default::default()
            },
            None,
        )
        .await
        .unwrap();

    (user, tokens.access_token)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn run_request(ability_path: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/api/abilities/{}/run", ability_path))
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap()
}

#[tokio::test]
async fn test_mcp_endpoint_advertises_resource_metadata() {
    let env = TestEnvironment::new().await;
    let app = build_router(&env.deps, Arc::new(SessionStore::new()));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/mcp")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let challenge = response.headers()[header::WWW_AUTHENTICATE]
        .to_str()
        .unwrap()
        .to_string();
    assert!(challenge.starts_with("Bearer realm=\"MCP\""));
    assert!(
        challenge.contains("resource=\"https://cms.example.com/.well-known/oauth-protected-resource\"")
    );
}

#[tokio::test]
async fn test_invalid_bearer_token_is_rejected() {
    let env = TestEnvironment::new().await;
    let app = build_router(&env.deps, Arc::new(SessionStore::new()));

    let response = app
        .oneshot(run_request("pressgate%2Fget-site-info", "not-a-jwt"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["code"], "oauth_invalid_token");
}

#[tokio::test]
async fn test_bearer_token_runs_ability_with_hooks() {
    let env = TestEnvironment::new().await;
    let (user, token) = issue_token(&env).await;

    let seen: Arc<Mutex<Vec<(String, Option<UserId>)>>> = Arc::new(Mutex::new(Vec::new()));
    for name in [
        "before_execute",
        "before_execute/pressgate/get-current-user",
        "after_execute/pressgate/get-current-user",
        "after_execute",
    ] {
        let seen = seen.clone();
        env.deps
            .hooks
            .on(
                name,
                Arc::new(move |event: &AbilityEvent| {
                    seen.lock().unwrap().push((event.name(), event.user_id()));
                }),
            )
            .await;
    }

    let app = build_router(&env.deps, Arc::new(SessionStore::new()));
    let response = app
        .oneshot(run_request("pressgate%2Fget-current-user", &token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["result"]["login"], "agent-owner");

    let seen = seen.lock().unwrap().clone();
    let names: Vec<&str> = seen.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "before_execute",
            "before_execute/pressgate/get-current-user",
            "after_execute",
            "after_execute/pressgate/get-current-user",
        ]
    );
    assert!(seen.iter().all(|(_, id)| *id == Some(user.id)));
}

#[tokio::test]
async fn test_disabled_ability_skips_hooks() {
    let env = TestEnvironment::new().await;
    let (_, token) = issue_token(&env).await;

    let fired = Arc::new(Mutex::new(0usize));
    {
        let fired = fired.clone();
        env.deps
            .hooks
            .on(
                "before_execute",
                Arc::new(move |_: &AbilityEvent| *fired.lock().unwrap() += 1),
            )
            .await;
    }

    env.deps
        .abilities
        .disable("pressgate/get-site-info")
        .await
        .unwrap();

    let app = build_router(&env.deps, Arc::new(SessionStore::new()));
    let response = app
        .clone()
        .oneshot(run_request("pressgate%2Fget-site-info", &token))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "ability_disabled");
    assert_eq!(*fired.lock().unwrap(), 0);

    env.deps
        .abilities
        .enable("pressgate/get-site-info")
        .await
        .unwrap();
    let response = app
        .oneshot(run_request("pressgate%2Fget-site-info", &token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(*fired.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_unknown_ability_is_not_found() {
    let env = TestEnvironment::new().await;
    let (_, token) = issue_token(&env).await;
    let app = build_router(&env.deps, Arc::new(SessionStore::new()));

    let response = app
        .oneshot(run_request("pressgate%2Fmissing", &token))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "ability_not_found");
}
