//! MCP (Model Context Protocol) server exposing abilities as tools

mod server;

pub use server::{
    McpServer, McpServerState, create_mcp_routes, mcp_oauth_middleware, tool_name,
    www_authenticate,
};
