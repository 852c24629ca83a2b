//! Ability execution hooks
//!
//! Four events surround every ability call: the generic `before_execute` /
//! `after_execute` and the per-ability `before_execute/{id}` /
//! `after_execute/{id}`. They travel as one typed [`AbilityEvent`]; the
//! string name is only used for subscription and logging.

use crate::constants::{HOOK_AFTER_EXECUTE, HOOK_BEFORE_EXECUTE};
use crate::error::AbilityError;
use crate::model::UserId;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Result of an ability call as seen by after-hooks
pub type AbilityOutcome = std::result::Result<Value, AbilityError>;

/// Callback invoked synchronously when a hook fires
pub type HookCallback = Arc<dyn Fn(&AbilityEvent) + Send + Sync>;

/// An event fired around ability execution
#[derive(Debug, Clone)]
pub enum AbilityEvent {
    /// `before_execute`
    BeforeExecute {
        ability_id: String,
        args: Value,
        user_id: Option<UserId>,
    },
    /// `before_execute/{id}`
    BeforeAbility {
        ability_id: String,
        args: Value,
        user_id: Option<UserId>,
    },
    /// `after_execute`
    AfterExecute {
        ability_id: String,
        args: Value,
        result: AbilityOutcome,
        user_id: Option<UserId>,
    },
    /// `after_execute/{id}`
    AfterAbility {
        ability_id: String,
        args: Value,
        result: AbilityOutcome,
        user_id: Option<UserId>,
    },
}

impl AbilityEvent {
    /// Hook name, e.g. `before_execute` or `after_execute/pressgate/get-site-info`
    pub fn name(&self) -> String {
        match self {
            Self::BeforeExecute { .. } => HOOK_BEFORE_EXECUTE.to_string(),
            Self::AfterExecute { .. } => HOOK_AFTER_EXECUTE.to_string(),
            Self::BeforeAbility { ability_id, .. } => {
                format!("{}/{}", HOOK_BEFORE_EXECUTE, ability_id)
            }
            Self::AfterAbility { ability_id, .. } => {
                format!("{}/{}", HOOK_AFTER_EXECUTE, ability_id)
            }
        }
    }

    pub fn ability_id(&self) -> &str {
        match self {
            Self::BeforeExecute { ability_id, .. }
            | Self::BeforeAbility { ability_id, .. }
            | Self::AfterExecute { ability_id, .. }
            | Self::AfterAbility { ability_id, .. } => ability_id,
        }
    }

    pub fn args(&self) -> &Value {
        match self {
            Self::BeforeExecute { args, .. }
            | Self::BeforeAbility { args, .. }
            | Self::AfterExecute { args, .. }
            | Self::AfterAbility { args, .. } => args,
        }
    }

    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Self::BeforeExecute { user_id, .. }
            | Self::BeforeAbility { user_id, .. }
            | Self::AfterExecute { user_id, .. }
            | Self::AfterAbility { user_id, .. } => *user_id,
        }
    }

    /// The captured result, for after-events
    pub fn result(&self) -> Option<&AbilityOutcome> {
        match self {
            Self::AfterExecute { result, .. } | Self::AfterAbility { result, .. } => Some(result),
            _ => None,
        }
    }
}

/// Hook bus trait for firing and subscribing to ability events
#[async_trait]
pub trait HookBus: Send + Sync {
    /// Fire an event; callbacks run in registration order before this returns
    async fn fire(&self, event: AbilityEvent);

    /// Register a callback for a hook name
    async fn on(&self, name: &str, callback: HookCallback);

    /// Remove every callback for a hook name
    async fn off(&self, name: &str);
}

/// In-process hook bus
///
/// Named callbacks run synchronously; every fired event is also broadcast to
/// channel subscribers (log/audit observers).
pub struct InProcHookBus {
    callbacks: RwLock<HashMap<String, Vec<HookCallback>>>,
    sender: broadcast::Sender<AbilityEvent>,
}

impl InProcHookBus {
    pub fn new() -> Self {
        Self {
            callbacks: RwLock::new(HashMap::new()),
            sender: broadcast::channel(100).0,
        }
    }

    /// Receive a copy of every fired event
    pub fn subscribe(&self) -> broadcast::Receiver<AbilityEvent> {
        self.sender.subscribe()
    }

    pub fn listener_count(&self, name: &str) -> usize {
        self.callbacks.read().get(name).map_or(0, Vec::len)
    }
}

impl Default for InProcHookBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HookBus for InProcHookBus {
    async fn fire(&self, event: AbilityEvent) {
        let name = event.name();

        // Clone out so callbacks may register hooks themselves
        let callbacks = self.callbacks.read().get(&name).cloned();
        if let Some(callbacks) = callbacks {
            for callback in &callbacks {
                callback(&event);
            }
        }

        tracing::trace!(hook = %name, "Hook fired");

        // Ignore if no receivers
        let _ = self.sender.send(event);
    }

    async fn on(&self, name: &str, callback: HookCallback) {
        self.callbacks
            .write()
            .entry(name.to_string())
            .or_default()
            .push(callback);
    }

    async fn off(&self, name: &str) {
        self.callbacks.write().remove(name);
    }
}

#[cfg(test)]
mod hooks_test {
    include!("hooks_test.rs");
}
