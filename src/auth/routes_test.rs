use super::*;
use crate::auth::crypto::hash_password;
use crate::auth::keys::KeyManager;
use crate::auth::server::AuthorizationServerFactory;
use crate::config::OAuthConfig;
use crate::http::session::{SessionLayerState, SessionStore, session_middleware};
use crate::model::UserId;
use crate::storage::{MemoryStorage, UserStorage};
use axum::body::Body;
use axum::http::Request;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};
use tower::ServiceExt;

const ISSUER: &str = "https://cms.example.com";
const REDIRECT_URI: &str = "https://assistant.example.com/callback";
const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";

struct TestApp {
    router: Router,
    storage: Arc<MemoryStorage>,
}

async fn test_app() -> TestApp {
    let storage = Arc::new(MemoryStorage::new());
    let keys = Arc::new(KeyManager::new(storage.clone()));
    let server =
        AuthorizationServerFactory::create(storage.clone(), keys, &OAuthConfig::default());

    storage
        .insert_user(&HostUser {
            id: UserId(0),
            login: "editor".to_string(),
            display_name: "Ed <Itor>".to_string(),
            email: "editor@example.com".to_string(),
            password_hash: hash_password("correct horse").unwrap(),
            capabilities: vec!["read".to_string()],
            created_at: chrono::Utc::now(),
        })
        .await
        .unwrap();

    let state = Arc::new(OAuthRouteState {
        authorization_server: server,
        storage: storage.clone(),
        issuer: ISSUER.to_string(),
        site_name: "Example Site".to_string(),
        allow_localhost_redirects: false,
        secure_cookies: false,
    });

    let sessions = Arc::new(SessionStore::new());
    let router = create_oauth_routes(state).layer(axum::middleware::from_fn_with_state(
        SessionLayerState {
            store: sessions,
            storage: storage.clone(),
        },
        session_middleware,
    ));

    TestApp { router, storage }
}

async fn send(app: &TestApp, request: Request<Body>) -> Response {
    app.router.clone().oneshot(request).await.unwrap()
}

async fn body_string(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_str(&body_string(response).await).unwrap()
}

fn form_post(uri: &str, cookie: Option<&str>, body: String) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body)).unwrap()
}

fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

/// `name=value` of the response's session cookie
fn cookie_from(response: &Response) -> String {
    response.headers()[header::SET_COOKIE]
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string()
}

fn csrf_from(html: &str) -> String {
    let marker = r#"name="csrf_token" value=""#;
    let start = html.find(marker).unwrap() + marker.len();
    let end = html[start..].find('"').unwrap();
    html[start..start + end].to_string()
}

async fn register_public_client(app: &TestApp) -> String {
    let response = send(
        app,
        Request::builder()
            .method("POST")
            .uri("/oauth/register")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({
                    "client_name": "Assistant",
                    "redirect_uris": [REDIRECT_URI],
                    "token_endpoint_auth_method": "none",
                })
                .to_string(),
            ))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert!(body.get("client_secret").is_none());
    body["client_id"].as_str().unwrap().to_string()
}

fn authorize_uri(client_id: &str) -> String {
    let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(VERIFIER.as_bytes()));
    format!(
        "/oauth/authorize?response_type=code&client_id={}&redirect_uri={}&state=st8&code_challenge={}&code_challenge_method=S256",
        client_id,
        urlencoding::encode(REDIRECT_URI),
        challenge
    )
}

/// Walk the browser flow up to the issued code
async fn obtain_code(app: &TestApp, client_id: &str) -> String {
    let response = send(app, get(&authorize_uri(client_id), None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = cookie_from(&response);
    let html = body_string(response).await;
    assert!(html.contains("action=\"/oauth/login\""));

    let login = format!(
        "login=editor&password={}&csrf_token={}",
        urlencoding::encode("correct horse"),
        urlencoding::encode(&csrf_from(&html))
    );
    let response = send(app, form_post("/oauth/login", Some(&cookie), login)).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers()[header::LOCATION], "/oauth/consent");

    // Login issues a new session id; the old one is gone
    let old_cookie = cookie;
    let cookie = cookie_from(&response);
    assert_ne!(cookie, old_cookie);
    let response = send(app, get("/oauth/consent", Some(&old_cookie))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(app, get("/oauth/consent", Some(&cookie))).await;
    let html = body_string(response).await;
    assert!(html.contains("Ed &lt;Itor&gt;"));

    let decision = format!(
        "action=approve&csrf_token={}",
        urlencoding::encode(&csrf_from(&html))
    );
    let response = send(app, form_post("/oauth/authorize", Some(&cookie), decision)).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let location = response.headers()[header::LOCATION].to_str().unwrap();
    assert!(location.starts_with(REDIRECT_URI));
    let url = url::Url::parse(location).unwrap();
    assert_eq!(
        url.query_pairs().find(|(k, _)| k == "state").unwrap().1,
        "st8"
    );
    url.query_pairs()
        .find(|(k, _)| k == "code")
        .unwrap()
        .1
        .into_owned()
}

#[tokio::test]
async fn test_metadata_documents() {
    let app = test_app().await;

    let response = send(&app, get("/.well-known/oauth-authorization-server", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let metadata = body_json(response).await;
    assert_eq!(metadata["issuer"], ISSUER);
    assert_eq!(metadata["token_endpoint"], "https://cms.example.com/oauth/token");
    assert_eq!(metadata["scopes_supported"], json!(["default"]));
    assert_eq!(metadata["code_challenge_methods_supported"], json!(["S256", "plain"]));

    let response = send(&app, get("/.well-known/oauth-protected-resource", None)).await;
    let resource = body_json(response).await;
    assert_eq!(resource["resource"], "https://cms.example.com/mcp");
    assert_eq!(resource["authorization_servers"], json!([ISSUER]));
}

#[tokio::test]
async fn test_registration_validation() {
    let app = test_app().await;

    let response = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/oauth/register")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({"client_name": "Bad", "redirect_uris": ["http://evil.example.com/cb"]})
                    .to_string(),
            ))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_redirect_uri");

    let response = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/oauth/register")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({"client_name": "Confidential", "redirect_uris": [REDIRECT_URI]})
                    .to_string(),
            ))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["token_endpoint_auth_method"], "client_secret_basic");
    assert!(body["client_secret"].as_str().is_some());
}

#[tokio::test]
async fn test_browser_flow_and_token_exchange() {
    let app = test_app().await;
    let client_id = register_public_client(&app).await;
    let code = obtain_code(&app, &client_id).await;

    let exchange = format!(
        "grant_type=authorization_code&code={}&redirect_uri={}&client_id={}&code_verifier={}",
        urlencoding::encode(&code),
        urlencoding::encode(REDIRECT_URI),
        client_id,
        VERIFIER
    );
    let response = send(&app, form_post("/oauth/token", None, exchange.clone())).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    let tokens = body_json(response).await;
    assert_eq!(tokens["token_type"], "Bearer");
    assert_eq!(tokens["expires_in"], 3600);
    assert!(tokens["refresh_token"].as_str().is_some());

    // Replaying the code fails
    let response = send(&app, form_post("/oauth/token", None, exchange)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_grant");

    // Revocation always answers 200
    let revoke = format!(
        "token={}&client_id={}",
        urlencoding::encode(tokens["refresh_token"].as_str().unwrap()),
        client_id
    );
    let response = send(&app, form_post("/oauth/revoke", None, revoke)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_login_rejects_bad_password_and_csrf() {
    let app = test_app().await;
    let client_id = register_public_client(&app).await;

    let response = send(&app, get(&authorize_uri(&client_id), None)).await;
    let cookie = cookie_from(&response);
    let csrf = csrf_from(&body_string(response).await);

    let response = send(
        &app,
        form_post(
            "/oauth/login",
            Some(&cookie),
            format!("login=editor&password=wrong&csrf_token={}", urlencoding::encode(&csrf)),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let html = body_string(response).await;
    assert!(html.contains("Invalid username or password"));

    let response = send(
        &app,
        form_post(
            "/oauth/login",
            Some(&cookie),
            "login=editor&password=correct+horse&csrf_token=forged".to_string(),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Approval without a logged-in session is refused
    let response = send(
        &app,
        form_post(
            "/oauth/authorize",
            Some(&cookie),
            format!("action=approve&csrf_token={}", urlencoding::encode(&csrf_from(&html))),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    assert!(app.storage.get_user_by_login("editor").await.unwrap().is_some());
}

#[tokio::test]
async fn test_authorize_rejects_unknown_client() {
    let app = test_app().await;
    let response = send(&app, get(&authorize_uri("nope"), None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "invalid_client");
}

#[tokio::test]
async fn test_pages_escape_client_name() {
    let app = test_app().await;
    let response = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/oauth/register")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({
                    "client_name": "<script>alert('x')</script>",
                    "redirect_uris": [REDIRECT_URI],
                    "token_endpoint_auth_method": "none",
                })
                .to_string(),
            ))
            .unwrap(),
    )
    .await;
    let client_id = body_json(response).await["client_id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = send(&app, get(&authorize_uri(&client_id), None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/html")
    );
    let html = body_string(response).await;
    assert!(html.contains("&lt;script&gt;"));
    assert!(!html.contains("<script>"));
    assert!(html.contains("Log in to Example Site"));
}
