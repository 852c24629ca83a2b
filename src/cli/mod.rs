//! Command-line interface for PressGate
//!
//! Server startup plus the administrative commands for clients, keys, users
//! and abilities.

use crate::auth::crypto::hash_password;
use crate::auth::repository::NewClient;
use crate::auth::server::is_valid_redirect_uri;
use crate::config::Config;
use crate::core::{Dependencies, create_dependencies};
use crate::model::{HostUser, UserId};
use crate::{PressGateError, Result};
use chrono::Utc;
use clap::{Arg, ArgAction, ArgMatches, Command, ValueEnum};
use serde_json::json;
use std::sync::Arc;

/// MCP transport options
#[derive(ValueEnum, Clone, Debug)]
enum McpTransport {
    /// stdio transport for local process communication (Claude Desktop)
    Stdio,
    /// Streamable HTTP transport with OAuth
    Http,
}

/// Parse a comma-separated list from CLI arguments
fn parse_comma_list(matches: &ArgMatches, key: &str) -> Vec<String> {
    matches
        .get_one::<String>(key)
        .map(|s| {
            s.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Required string argument (clap enforces presence)
fn required_arg<'a>(matches: &'a ArgMatches, key: &str) -> Result<&'a str> {
    matches
        .get_one::<String>(key)
        .map(String::as_str)
        .ok_or_else(|| PressGateError::validation(format!("--{} is required", key)))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Main CLI entry point
pub async fn run() -> Result<()> {
    let matches = build_cli().get_matches();
    let config = load_config(&matches)?;

    match matches.subcommand() {
        Some(("serve", sub)) => handle_serve_command(config, sub).await,
        Some(("mcp", sub)) => match sub.subcommand() {
            Some(("serve", serve)) => handle_mcp_serve_command(config, serve).await,
            _ => Err(PressGateError::validation("Usage: pressgate mcp serve")),
        },
        Some(("oauth", sub)) => handle_oauth_command(config, sub).await,
        Some(("user", sub)) => handle_user_command(config, sub).await,
        Some(("abilities", sub)) => handle_abilities_command(config, sub).await,
        _ => {
            eprintln!("No command specified. Use --help for usage information.");
            std::process::exit(1);
        }
    }
}

fn load_config(matches: &ArgMatches) -> Result<Config> {
    match matches.get_one::<String>("config") {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
}

// ============================================================================
// CLI Building
// ============================================================================

fn json_flag() -> Arg {
    Arg::new("json")
        .long("json")
        .action(ArgAction::SetTrue)
        .help("Print JSON output")
}

fn host_port_args(command: Command) -> Command {
    command
        .arg(Arg::new("host").long("host").help("Server host"))
        .arg(
            Arg::new("port")
                .long("port")
                .short('p')
                .value_parser(clap::value_parser!(u16))
                .help("Server port"),
        )
        .arg(
            Arg::new("issuer")
                .long("issuer")
                .help("Public issuer URL (e.g. https://cms.example.com)"),
        )
}

fn build_cli() -> Command {
    Command::new("pressgate")
        .about("PressGate - OAuth-gated MCP ability server")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .env("PRESSGATE_CONFIG")
                .help("Config file (JSON or YAML)"),
        )
        .subcommand(host_port_args(
            Command::new("serve").about("Start the HTTP server (OAuth, MCP and REST)"),
        ))
        .subcommand(
            Command::new("mcp").about("MCP server").subcommand(host_port_args(
                Command::new("serve")
                    .about("Serve MCP")
                    .arg(
                        Arg::new("transport")
                            .long("transport")
                            .short('t')
                            .value_parser(clap::value_parser!(McpTransport))
                            .default_value("stdio")
                            .help("Transport"),
                    )
                    .arg(
                        Arg::new("user")
                            .long("user")
                            .short('u')
                            .help("User id or login the stdio session runs as"),
                    ),
            )),
        )
        .subcommand(
            Command::new("oauth")
                .about("OAuth client and key management")
                .subcommand(
                    Command::new("create-client")
                        .about("Register an OAuth client")
                        .arg(Arg::new("name").long("name").required(true))
                        .arg(
                            Arg::new("redirect-uris")
                                .long("redirect-uris")
                                .required(true)
                                .help("Comma-separated redirect URIs"),
                        )
                        .arg(
                            Arg::new("public")
                                .long("public")
                                .action(ArgAction::SetTrue)
                                .help("Public client (PKCE, no secret)"),
                        )
                        .arg(json_flag()),
                )
                .subcommand(
                    Command::new("list-clients")
                        .about("List OAuth clients")
                        .arg(json_flag()),
                )
                .subcommand(
                    Command::new("revoke-client")
                        .about("Delete a client and revoke its tokens")
                        .arg(Arg::new("client-id").required(true).index(1)),
                )
                .subcommand(
                    Command::new("regenerate-keys")
                        .about("Replace the signing and encryption keys (invalidates all tokens)"),
                ),
        )
        .subcommand(
            Command::new("user")
                .about("Host user management")
                .subcommand(
                    Command::new("create")
                        .about("Create a user")
                        .arg(Arg::new("login").long("login").required(true))
                        .arg(Arg::new("email").long("email").required(true))
                        .arg(Arg::new("display-name").long("display-name"))
                        .arg(
                            Arg::new("password")
                                .long("password")
                                .env("PRESSGATE_USER_PASSWORD")
                                .hide_env_values(true)
                                .required(true),
                        )
                        .arg(
                            Arg::new("capabilities")
                                .long("capabilities")
                                .default_value("read")
                                .help("Comma-separated capabilities"),
                        )
                        .arg(json_flag()),
                )
                .subcommand(Command::new("list").about("List users").arg(json_flag())),
        )
        .subcommand(
            Command::new("abilities")
                .about("Ability management")
                .subcommand(Command::new("list").about("List abilities").arg(json_flag()))
                .subcommand(
                    Command::new("enable")
                        .about("Enable an ability")
                        .arg(Arg::new("id").required(true).index(1)),
                )
                .subcommand(
                    Command::new("disable")
                        .about("Disable an ability")
                        .arg(Arg::new("id").required(true).index(1)),
                ),
        )
}

// ============================================================================
// Commands
// ============================================================================

/// Apply --host/--port/--issuer over the config
fn apply_http_overrides(config: &mut Config, matches: &ArgMatches) {
    let http = config.http.get_or_insert_with(Default::default);
    if let Some(host) = matches.get_one::<String>("host") {
        http.host = host.clone();
    }
    if let Some(port) = matches.get_one::<u16>("port") {
        http.port = *port;
    }
    if let Some(issuer) = matches.get_one::<String>("issuer") {
        http.issuer = Some(issuer.clone());
    }
}

async fn handle_serve_command(mut config: Config, matches: &ArgMatches) -> Result<()> {
    apply_http_overrides(&mut config, matches);
    let http = config.http_config();

    println!("🚀 Starting PressGate on {}:{}", http.host, http.port);
    println!("   Issuer: {}", http.issuer_url());
    println!("   MCP:    {}/mcp", http.issuer_url());
    println!("   Press Ctrl+C to stop\n");

    crate::http::start_server(config).await
}

async fn handle_mcp_serve_command(mut config: Config, matches: &ArgMatches) -> Result<()> {
    let transport = matches
        .get_one::<McpTransport>("transport")
        .cloned()
        .unwrap_or(McpTransport::Stdio);

    match transport {
        McpTransport::Stdio => {
            // stdout is reserved for JSON-RPC; diagnostics go to stderr
            let Some(user_ref) = matches.get_one::<String>("user") else {
                return Err(PressGateError::validation(
                    "--user is required for the stdio transport",
                ));
            };

            let deps = create_dependencies(&config).await?;
            let user = find_user(&deps, user_ref).await?;

            eprintln!("Starting MCP server (stdio transport) as '{}'", user.login);
            crate::mcp::McpServer::for_stdio_user(deps.abilities.clone(), user)
                .serve_stdio()
                .await
        }
        McpTransport::Http => {
            // The MCP endpoint needs the OAuth endpoints beside it
            apply_http_overrides(&mut config, matches);
            crate::http::start_server(config).await
        }
    }
}

/// Resolve a user by numeric id or login
async fn find_user(deps: &Dependencies, user_ref: &str) -> Result<HostUser> {
    let user = match UserId::parse(user_ref) {
        Some(id) => deps.storage.get_user(id).await?,
        None => deps.storage.get_user_by_login(user_ref).await?,
    };
    user.ok_or_else(|| PressGateError::not_found("User", user_ref))
}

async fn handle_oauth_command(config: Config, matches: &ArgMatches) -> Result<()> {
    let deps = create_dependencies(&config).await?;
    let allow_localhost = config.http_config().allow_localhost_redirects;

    match matches.subcommand() {
        Some(("create-client", sub)) => {
            let name = required_arg(sub, "name")?;
            let redirect_uris = parse_comma_list(sub, "redirect-uris");
            if let Some(uri) = redirect_uris
                .iter()
                .find(|uri| !is_valid_redirect_uri(uri, allow_localhost))
            {
                return Err(PressGateError::validation(format!(
                    "Invalid redirect URI: {}",
                    uri
                )));
            }

            let (client, secret) = deps
                .authorization_server
                .repositories()
                .clients
                .register(NewClient {
                    name: name.to_string(),
                    redirect_uris,
                    is_confidential: !sub.get_flag("public"),
                    owner_user_id: None,
                })
                .await?;

            if sub.get_flag("json") {
                print_json(&json!({
                    "client_id": client.id,
                    "client_secret": secret,
                }))?;
            } else {
                println!("\n✅ OAuth client created!");
                println!("Client ID:     {}", client.id);
                match secret {
                    Some(secret) => {
                        println!("Client Secret: {}", secret);
                        println!("\nThe secret is shown only once.");
                    }
                    None => println!("Public client: use PKCE, no secret"),
                }
            }
        }
        Some(("list-clients", sub)) => {
            let clients = deps.authorization_server.repositories().clients.list().await?;

            if sub.get_flag("json") {
                print_json(&clients)?;
            } else {
                println!("\nOAuth Clients:");
                for client in clients {
                    let kind = if client.is_confidential {
                        "confidential"
                    } else {
                        "public"
                    };
                    println!("  {} ({}, {})", client.name, client.id, kind);
                }
            }
        }
        Some(("revoke-client", sub)) => {
            let client_id = required_arg(sub, "client-id")?;
            let revoked = deps.storage.revoke_tokens_for_client(client_id).await?;
            deps.authorization_server
                .repositories()
                .clients
                .delete(client_id)
                .await?;
            println!("✅ Client '{}' revoked ({} tokens)", client_id, revoked);
        }
        Some(("regenerate-keys", _)) => {
            deps.keys.regenerate_keys().await?;
            println!("✅ Keys regenerated; every issued token is now invalid");
        }
        _ => {}
    }
    Ok(())
}

async fn handle_user_command(config: Config, matches: &ArgMatches) -> Result<()> {
    let storage = crate::storage::create_storage_from_config(&config.storage).await?;

    match matches.subcommand() {
        Some(("create", sub)) => {
            let login = required_arg(sub, "login")?;
            if storage.get_user_by_login(login).await?.is_some() {
                return Err(PressGateError::validation(format!(
                    "User '{}' already exists",
                    login
                )));
            }

            let password = required_arg(sub, "password")?;
            let user = HostUser {
                id: UserId(0),
                login: login.to_string(),
                display_name: sub
                    .get_one::<String>("display-name")
                    .cloned()
                    .unwrap_or_else(|| login.to_string()),
                email: required_arg(sub, "email")?.to_string(),
                password_hash: hash_password(password)?,
                capabilities: parse_comma_list(sub, "capabilities"),
                created_at: Utc::now(),
            };
            let id = storage.insert_user(&user).await?;

            if sub.get_flag("json") {
                print_json(&json!({ "id": id, "login": user.login }))?;
            } else {
                println!("✅ User '{}' created with id {}", user.login, id);
            }
        }
        Some(("list", sub)) => {
            let users = storage.list_users().await?;
            if sub.get_flag("json") {
                print_json(&users)?;
            } else {
                for user in users {
                    println!(
                        "  {:>4}  {} <{}> [{}]",
                        user.id.as_u64(),
                        user.login,
                        user.email,
                        user.capabilities.join(", ")
                    );
                }
            }
        }
        _ => {}
    }
    Ok(())
}

async fn handle_abilities_command(config: Config, matches: &ArgMatches) -> Result<()> {
    let deps = create_dependencies(&config).await?;
    let abilities = Arc::clone(&deps.abilities);

    match matches.subcommand() {
        Some(("list", sub)) => {
            let described = abilities.describe_abilities().await?;
            if sub.get_flag("json") {
                print_json(&described)?;
            } else {
                for ability in described {
                    let mark = if ability.enabled { "✓" } else { "✗" };
                    println!("  {} {}  {}", mark, ability.id, ability.description);
                }
            }
        }
        Some(("enable", sub)) => {
            let id = required_arg(sub, "id")?;
            abilities.enable(id).await?;
            println!("✅ Ability '{}' enabled", id);
        }
        Some(("disable", sub)) => {
            let id = required_arg(sub, "id")?;
            abilities.disable(id).await?;
            println!("✅ Ability '{}' disabled", id);
        }
        _ => {}
    }
    Ok(())
}
