//! Built-in abilities

use super::{AbilitiesManager, Ability, AbilityOutcome};
use crate::Result;
use crate::auth::RequestContext;
use crate::config::SiteConfig;
use crate::error::AbilityError;
use crate::model::HostUser;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;

/// Register every built-in ability
pub fn register_builtin_abilities(manager: &AbilitiesManager, site: &SiteConfig) -> Result<()> {
    manager.register(Arc::new(GetSiteInfo { site: site.clone() }))?;
    manager.register(Arc::new(GetCurrentUser))?;
    Ok(())
}

fn require_user(ctx: &RequestContext) -> std::result::Result<&HostUser, AbilityError> {
    ctx.current_user().ok_or_else(|| {
        AbilityError::new("permission_denied", "Sorry, you must be logged in.")
            .with_data(json!({"status": 401}))
    })
}

/// Basic information about the site
pub struct GetSiteInfo {
    site: SiteConfig,
}

impl GetSiteInfo {
    pub fn new(site: SiteConfig) -> Self {
        Self { site }
    }
}

#[async_trait]
impl Ability for GetSiteInfo {
    fn id(&self) -> &str {
        "pressgate/get-site-info"
    }

    fn label(&self) -> &str {
        "Get site info"
    }

    fn description(&self) -> &str {
        "Returns the site name, URL and server version."
    }

    async fn check_permission(
        &self,
        ctx: &RequestContext,
        _args: &Value,
    ) -> std::result::Result<(), AbilityError> {
        require_user(ctx).map(|_| ())
    }

    async fn execute(&self, _ctx: &RequestContext, _args: Value) -> AbilityOutcome {
        Ok(json!({
            "name": self.site.name,
            "url": self.site.url,
            "version": env!("CARGO_PKG_VERSION"),
        }))
    }
}

/// Profile of the user the call runs as
pub struct GetCurrentUser;

#[async_trait]
impl Ability for GetCurrentUser {
    fn id(&self) -> &str {
        "pressgate/get-current-user"
    }

    fn label(&self) -> &str {
        "Get current user"
    }

    fn description(&self) -> &str {
        "Returns the profile and capabilities of the authenticated user."
    }

    async fn check_permission(
        &self,
        ctx: &RequestContext,
        _args: &Value,
    ) -> std::result::Result<(), AbilityError> {
        let user = require_user(ctx)?;
        if !user.has_cap("read") {
            return Err(
                AbilityError::new("permission_denied", "Sorry, you are not allowed to do that.")
                    .with_data(json!({"status": 403})),
            );
        }
        Ok(())
    }

    async fn execute(&self, ctx: &RequestContext, _args: Value) -> AbilityOutcome {
        let user = require_user(ctx)?;
        Ok(json!({
            "id": user.id,
            "login": user.login,
            "display_name": user.display_name,
            "email": user.email,
            "capabilities": user.capabilities,
        }))
    }
}
