//! MCP server implementation
//!
//! Exposes enabled abilities as MCP tools for AI assistants (Claude Desktop,
//! ChatGPT, etc.) using the official `rmcp` SDK. Every tool call goes through
//! [`AbilitiesManager::guarded_execute`] with a fresh per-call
//! [`AuthContext`] carrying the caller.

use crate::Result;
use crate::abilities::AbilitiesManager;
use crate::auth::{RequestContext as AuthContext, TokenValidator, protected_resource_metadata_url};
use crate::constants::{BEARER_REALM, MCP_TOOL_SEPARATOR};
use crate::error::AbilityError;
use crate::model::HostUser;
use crate::PressGateError;
use axum::{
    Router,
    extract::{Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::any,
};
use rmcp::{
    ErrorData as McpError,
    handler::server::ServerHandler,
    model::{
        CallToolRequestParam, CallToolResult, Content, Extensions, ListToolsResult,
        PaginatedRequestParam, ServerCapabilities, ServerInfo, Tool, ToolsCapability,
    },
    service::{RequestContext, RoleServer, ServiceExt},
    transport::streamable_http_server::{
        StreamableHttpServerConfig, StreamableHttpService, session::local::LocalSessionManager,
    },
};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Duration;

/// State required for MCP routes
#[derive(Clone)]
pub struct McpServerState {
    pub abilities: Arc<AbilitiesManager>,
    pub validator: Arc<TokenValidator>,
    pub issuer: String,
}

/// MCP server that exposes abilities as tools
#[derive(Clone)]
pub struct McpServer {
    abilities: Arc<AbilitiesManager>,
    /// Fixed caller for stdio, where there is no HTTP request to authenticate
    stdio_user: Option<HostUser>,
}

/// Tool name for an ability id (`pressgate/get-site-info` -> `pressgate-get-site-info`)
pub fn tool_name(ability_id: &str) -> String {
    ability_id.replace('/', MCP_TOOL_SEPARATOR)
}

impl McpServer {
    pub fn new(abilities: Arc<AbilitiesManager>) -> Self {
        Self {
            abilities,
            stdio_user: None,
        }
    }

    /// Server for stdio, running every call as `user`
    pub fn for_stdio_user(abilities: Arc<AbilitiesManager>, user: HostUser) -> Self {
        Self {
            abilities,
            stdio_user: Some(user),
        }
    }

    /// Serve over stdio (for Claude Desktop, etc.)
    pub async fn serve_stdio(&self) -> Result<()> {
        tracing::info!("Starting MCP server on stdio");

        let service = self
            .clone()
            .serve(rmcp::transport::io::stdio())
            .await
            .map_err(|e| PressGateError::mcp(format!("Failed to start MCP server: {}", e)))?;

        service
            .waiting()
            .await
            .map_err(|e| PressGateError::mcp(format!("MCP server error: {}", e)))?;

        tracing::info!("MCP server shutdown");
        Ok(())
    }

    /// Enabled abilities as tools, sorted by name
    pub async fn get_tools_list(&self) -> Result<Vec<Tool>> {
        let mut tools: Vec<Tool> = self
            .abilities
            .enabled_abilities()
            .await?
            .into_iter()
            .map(|ability| {
                let schema = match ability.input_schema() {
                    Value::Object(map) => map,
                    _ => Map::new(),
                };
                Tool::new(
                    tool_name(ability.id()),
                    ability.description().to_string(),
                    Arc::new(schema),
                )
            })
            .collect();

        tools.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tools)
    }

    /// Map a tool name back to its ability id
    ///
    /// Unknown names are passed through so the guard reports `ability_not_found`.
    fn resolve_ability_id(&self, name: &str) -> String {
        self.abilities
            .list_abilities()
            .into_iter()
            .map(|a| a.id().to_string())
            .find(|id| tool_name(id) == name || id == name)
            .unwrap_or_else(|| name.to_string())
    }

    /// The caller for this tool call
    fn caller(&self, extensions: &Extensions) -> Option<HostUser> {
        if let Some(user) = &self.stdio_user {
            return Some(user.clone());
        }

        // Inserted by `mcp_oauth_middleware`; rmcp carries the HTTP parts along
        extensions
            .get::<axum::http::request::Parts>()
            .and_then(|parts| parts.extensions.get::<HostUser>())
            .cloned()
    }

    /// Per-call auth context, bound to the caller when there is one
    fn call_context(&self, extensions: &Extensions) -> AuthContext {
        match self.caller(extensions) {
            Some(user) => AuthContext::for_user(user),
            None => AuthContext::new(),
        }
    }

    /// Run one tool call through the ability guard
    pub async fn execute_tool(
        &self,
        name: &str,
        arguments: Value,
        ctx: &AuthContext,
    ) -> CallToolResult {
        let ability_id = self.resolve_ability_id(name);

        tracing::debug!(tool = %name, ability = %ability_id, "Calling tool");

        match self
            .abilities
            .guarded_execute(&ability_id, arguments, ctx)
            .await
        {
            Ok(result) => {
                let result_text =
                    serde_json::to_string_pretty(&result).unwrap_or_else(|_| "{}".to_string());
                CallToolResult::success(vec![Content::text(result_text)])
            }
            Err(e) => CallToolResult::error(vec![Content::text(ability_error_text(&e))]),
        }
    }
}

fn ability_error_text(err: &AbilityError) -> String {
    let mut body = json!({"code": err.code, "message": err.message});
    if let Some(data) = &err.data {
        body["data"] = data.clone();
    }
    body.to_string()
}

impl ServerHandler for McpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability::default()),
                ..Default::default()
            },
            instructions: Some(
                "Tools run CMS abilities as the authenticated user.".to_string(),
            ),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> std::result::Result<ListToolsResult, McpError> {
        let tools = self.get_tools_list().await.map_err(|e| {
            tracing::error!("Failed to list tools: {}", e);
            McpError::internal_error("Failed to list tools", None)
        })?;

        Ok(ListToolsResult {
            tools,
            next_cursor: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, McpError> {
        let ctx = self.call_context(&context.extensions);
        let arguments = Value::Object(request.arguments.unwrap_or_default());

        Ok(self.execute_tool(request.name.as_ref(), arguments, &ctx).await)
    }
}

/// Bearer token gate for `/mcp`
///
/// On success the resolved [`HostUser`] is stored in the request extensions
/// for the tool handler. Failures answer with the structured error and a
/// `WWW-Authenticate` header pointing at the resource metadata.
pub async fn mcp_oauth_middleware(
    State(state): State<Arc<McpServerState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let ctx = AuthContext::new();

    match state
        .validator
        .validate_request(request.headers(), &ctx)
        .await
    {
        Ok(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(err) => {
            tracing::info!(code = %err.code, "MCP request rejected");
            let status = err.status_code();
            let mut response = err.into_response();
            if status == StatusCode::UNAUTHORIZED
                && let Ok(value) = HeaderValue::from_str(&www_authenticate(&state.issuer))
            {
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, value);
            }
            response
        }
    }
}

/// `Bearer realm="MCP", resource="<issuer>/.well-known/oauth-protected-resource"`
pub fn www_authenticate(issuer: &str) -> String {
    format!(
        "Bearer realm=\"{}\", resource=\"{}\"",
        BEARER_REALM,
        protected_resource_metadata_url(issuer)
    )
}

/// Create the `/mcp` endpoint (POST/GET/DELETE) behind the Bearer gate
pub fn create_mcp_routes(state: Arc<McpServerState>) -> Router {
    let mcp_server = McpServer::new(state.abilities.clone());
    let streamable_service = create_streamable_service(mcp_server);

    Router::new()
        .route(
            "/mcp",
            any(move |req| async move { streamable_service.clone().handle(req).await }),
        )
        .layer(axum::middleware::from_fn_with_state(
            state,
            mcp_oauth_middleware,
        ))
}

/// Create StreamableHttpService from McpServer
fn create_streamable_service(
    mcp_server: McpServer,
) -> StreamableHttpService<McpServer, LocalSessionManager> {
    let config = StreamableHttpServerConfig {
        sse_keep_alive: Some(Duration::from_secs(15)),
        stateful_mode: true,
    };

    StreamableHttpService::new(
        move || Ok(mcp_server.clone()),
        Arc::new(LocalSessionManager::default()),
        config,
    )
}
