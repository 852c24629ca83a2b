//! Shared service wiring
//!
//! Every presentation layer (HTTP, MCP, CLI) builds its components through
//! [`create_dependencies`] so they share one storage, one key manager and one
//! ability registry.

use crate::abilities::{AbilitiesManager, InProcHookBus, builtin::register_builtin_abilities};
use crate::auth::{
    AuthorizationServer, AuthorizationServerFactory, KeyManager, ResourceServer,
    ResourceServerFactory, TokenValidator,
};
use crate::config::Config;
use crate::storage::Storage;
use crate::Result;
use std::sync::Arc;

/// Components built once at startup and shared by `Arc`
#[derive(Clone)]
pub struct Dependencies {
    pub storage: Arc<dyn Storage>,
    pub keys: Arc<KeyManager>,
    pub authorization_server: Arc<AuthorizationServer>,
    pub resource_server: Arc<ResourceServer>,
    pub validator: Arc<TokenValidator>,
    pub hooks: Arc<InProcHookBus>,
    pub abilities: Arc<AbilitiesManager>,
    pub config: Arc<Config>,
}

/// Create Dependencies with storage from the config
pub async fn create_dependencies(config: &Config) -> Result<Dependencies> {
    let storage = crate::storage::create_storage_from_config(&config.storage).await?;
    create_dependencies_with_storage(config, storage)
}

/// Create Dependencies on top of an existing storage
pub fn create_dependencies_with_storage(
    config: &Config,
    storage: Arc<dyn Storage>,
) -> Result<Dependencies> {
    let keys = Arc::new(KeyManager::new(storage.clone()));
    let authorization_server =
        AuthorizationServerFactory::create(storage.clone(), keys.clone(), &config.oauth_config());
    let resource_server = ResourceServerFactory::create(storage.clone(), keys.clone());
    let validator = Arc::new(TokenValidator::new(
        resource_server.clone(),
        storage.clone(),
    ));

    let hooks = Arc::new(InProcHookBus::new());
    let abilities = Arc::new(AbilitiesManager::new(storage.clone(), hooks.clone()));
    register_builtin_abilities(&abilities, &config.site_config())?;

    Ok(Dependencies {
        storage,
        keys,
        authorization_server,
        resource_server,
        validator,
        hooks,
        abilities,
        config: Arc::new(config.clone()),
    })
}
