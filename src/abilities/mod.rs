//! Abilities and the guarded execution pipeline
//!
//! Every ability call, from MCP or REST, goes through
//! [`AbilitiesManager::guarded_execute`]:
//!
//! 1. disabled check (fresh read of the option store)
//! 2. `before_execute` then `before_execute/{id}`
//! 3. the ability's permission check
//! 4. `execute`
//! 5. `after_execute` then `after_execute/{id}`
//! 6. the result, unchanged
//!
//! A disabled or unknown ability fires no hooks. A failed permission check
//! fires no after-hooks.

pub mod builtin;
pub mod hooks;

pub use hooks::{AbilityEvent, AbilityOutcome, HookBus, HookCallback, InProcHookBus};

use crate::auth::RequestContext;
use crate::constants::{ERROR_ABILITY_DISABLED, ERROR_ABILITY_NOT_FOUND, OPTION_DISABLED_ABILITIES};
use crate::error::AbilityError;
use crate::storage::Storage;
use crate::{PressGateError, Result, telemetry};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// `namespace/name`, lowercase
static ABILITY_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9-]+/[a-z0-9-]+$").expect("Invalid ability id regex"));

/// A CMS operation exposed to assistants
#[async_trait]
pub trait Ability: Send + Sync {
    /// Namespaced id, e.g. `pressgate/get-site-info`
    fn id(&self) -> &str;

    fn label(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema of the accepted arguments
    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    /// Decide whether the context user may run this ability with `args`
    async fn check_permission(
        &self,
        ctx: &RequestContext,
        args: &Value,
    ) -> std::result::Result<(), AbilityError>;

    async fn execute(&self, ctx: &RequestContext, args: Value) -> AbilityOutcome;
}

/// Listing entry for an ability
#[derive(Debug, Clone, Serialize)]
pub struct AbilityInfo {
    pub id: String,
    pub label: String,
    pub description: String,
    pub input_schema: Value,
    pub enabled: bool,
}

/// Registry of abilities plus the enable/disable state
pub struct AbilitiesManager {
    abilities: RwLock<BTreeMap<String, Arc<dyn Ability>>>,
    storage: Arc<dyn Storage>,
    hooks: Arc<dyn HookBus>,
}

impl AbilitiesManager {
    pub fn new(storage: Arc<dyn Storage>, hooks: Arc<dyn HookBus>) -> Self {
        Self {
            abilities: RwLock::new(BTreeMap::new()),
            storage,
            hooks,
        }
    }

    pub fn hooks(&self) -> &Arc<dyn HookBus> {
        &self.hooks
    }

    /// Register an ability; ids are unique
    pub fn register(&self, ability: Arc<dyn Ability>) -> Result<()> {
        let id = ability.id().to_string();
        if !ABILITY_ID_PATTERN.is_match(&id) {
            return Err(PressGateError::validation(format!(
                "Invalid ability id '{}': expected namespace/name",
                id
            )));
        }

        let mut abilities = self.abilities.write();
        if abilities.contains_key(&id) {
            return Err(PressGateError::validation(format!(
                "Ability '{}' is already registered",
                id
            )));
        }
        tracing::debug!(ability = %id, "Registered ability");
        abilities.insert(id, ability);
        Ok(())
    }

    pub fn get(&self, ability_id: &str) -> Option<Arc<dyn Ability>> {
        self.abilities.read().get(ability_id).cloned()
    }

    /// All registered abilities, sorted by id
    pub fn list_abilities(&self) -> Vec<Arc<dyn Ability>> {
        self.abilities.read().values().cloned().collect()
    }

    /// Registered abilities that are not disabled
    pub async fn enabled_abilities(&self) -> Result<Vec<Arc<dyn Ability>>> {
        let disabled = self.disabled_abilities().await?;
        Ok(self
            .list_abilities()
            .into_iter()
            .filter(|a| !disabled.contains(a.id()))
            .collect())
    }

    /// Listing with enabled flags
    pub async fn describe_abilities(&self) -> Result<Vec<AbilityInfo>> {
        let disabled = self.disabled_abilities().await?;
        Ok(self
            .list_abilities()
            .into_iter()
            .map(|a| AbilityInfo {
                id: a.id().to_string(),
                label: a.label().to_string(),
                description: a.description().to_string(),
                input_schema: a.input_schema(),
                enabled: !disabled.contains(a.id()),
            })
            .collect())
    }

    /// Disabled ids, read fresh from the option store
    ///
    /// A missing or malformed option means nothing is disabled.
    pub async fn disabled_abilities(&self) -> Result<BTreeSet<String>> {
        let Some(raw) = self.storage.get_option(OPTION_DISABLED_ABILITIES).await? else {
            return Ok(BTreeSet::new());
        };

        match serde_json::from_str::<Vec<String>>(&raw) {
            Ok(ids) => Ok(ids.into_iter().collect()),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring malformed disabled abilities option");
                Ok(BTreeSet::new())
            }
        }
    }

    pub async fn is_enabled(&self, ability_id: &str) -> Result<bool> {
        Ok(!self.disabled_abilities().await?.contains(ability_id))
    }

    pub async fn disable(&self, ability_id: &str) -> Result<()> {
        if self.get(ability_id).is_none() {
            return Err(PressGateError::not_found("Ability", ability_id));
        }

        let mut disabled = self.disabled_abilities().await?;
        if disabled.insert(ability_id.to_string()) {
            self.save_disabled(&disabled).await?;
            tracing::info!(ability = %ability_id, "Ability disabled");
        }
        Ok(())
    }

    pub async fn enable(&self, ability_id: &str) -> Result<()> {
        let mut disabled = self.disabled_abilities().await?;
        if disabled.remove(ability_id) {
            self.save_disabled(&disabled).await?;
            tracing::info!(ability = %ability_id, "Ability enabled");
        }
        Ok(())
    }

    async fn save_disabled(&self, disabled: &BTreeSet<String>) -> Result<()> {
        let raw = serde_json::to_string(disabled)?;
        self.storage
            .set_option(OPTION_DISABLED_ABILITIES, &raw)
            .await
    }

    /// Metric label for an id; unregistered ids share `unknown`
    fn metric_label<'a>(&self, ability_id: &'a str) -> &'a str {
        if self.get(ability_id).is_some() {
            ability_id
        } else {
            "unknown"
        }
    }

    /// Run an ability through the guard
    pub async fn guarded_execute(
        &self,
        ability_id: &str,
        args: Value,
        ctx: &RequestContext,
    ) -> AbilityOutcome {
        let disabled = match self.is_enabled(ability_id).await {
            Ok(enabled) => !enabled,
            Err(e) => {
                tracing::error!(ability = %ability_id, error = %e, "Failed to read ability state");
                telemetry::record_ability_execution(self.metric_label(ability_id), "error");
                return Err(AbilityError::new(
                    "internal_error",
                    "Failed to read ability state",
                ));
            }
        };
        if disabled {
            tracing::info!(ability = %ability_id, "Blocked call to disabled ability");
            telemetry::record_ability_execution(self.metric_label(ability_id), "disabled");
            return Err(AbilityError::new(
                ERROR_ABILITY_DISABLED,
                format!("Ability '{}' is disabled", ability_id),
            )
            .with_data(json!({"ability": ability_id})));
        }

        let Some(ability) = self.get(ability_id) else {
            telemetry::record_ability_execution("unknown", "not_found");
            return Err(AbilityError::new(
                ERROR_ABILITY_NOT_FOUND,
                format!("Ability '{}' not found", ability_id),
            ));
        };

        let user_id = ctx.current_user_id();

        self.hooks
            .fire(AbilityEvent::BeforeExecute {
                ability_id: ability_id.to_string(),
                args: args.clone(),
                user_id,
            })
            .await;
        self.hooks
            .fire(AbilityEvent::BeforeAbility {
                ability_id: ability_id.to_string(),
                args: args.clone(),
                user_id,
            })
            .await;

        if let Err(e) = ability.check_permission(ctx, &args).await {
            tracing::warn!(ability = %ability_id, user_id = ?user_id, code = %e.code, "Ability permission denied");
            telemetry::record_ability_execution(ability_id, "forbidden");
            return Err(e);
        }

        let result = ability.execute(ctx, args.clone()).await;

        self.hooks
            .fire(AbilityEvent::AfterExecute {
                ability_id: ability_id.to_string(),
                args: args.clone(),
                result: result.clone(),
                user_id,
            })
            .await;
        self.hooks
            .fire(AbilityEvent::AfterAbility {
                ability_id: ability_id.to_string(),
                args,
                result: result.clone(),
                user_id,
            })
            .await;

        let outcome = if result.is_ok() { "success" } else { "error" };
        telemetry::record_ability_execution(ability_id, outcome);
        tracing::debug!(ability = %ability_id, outcome, "Ability executed");

        result
    }
}
