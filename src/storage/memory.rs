//! In-memory storage implementation
//!
//! Fast, non-persistent storage for development and testing.
//! Uses DashMap for concurrent access; revocation flips happen under the
//! entry's shard lock, so check-and-revoke is atomic within one process.
//!
//! **WARNING:** MemoryStorage is NOT recommended for production use:
//! - Data (including signing keys) is lost on process restart
//! - Does not coordinate state across multiple process instances
//!
//! For production deployments, use SqliteStorage.

use super::*;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// In-memory storage implementation
#[derive(Clone)]
pub struct MemoryStorage {
    clients: Arc<DashMap<String, Client>>,
    auth_codes: Arc<DashMap<String, AuthCode>>,
    access_tokens: Arc<DashMap<String, AccessToken>>,
    refresh_tokens: Arc<DashMap<String, RefreshToken>>,
    // RwLock rather than DashMap so multi-key writes are atomic
    options: Arc<RwLock<HashMap<String, String>>>,
    users: Arc<DashMap<u64, HostUser>>,
    next_user_id: Arc<AtomicU64>,
}

impl MemoryStorage {
    /// Create a new in-memory storage
    pub fn new() -> Self {
        Self {
            clients: Arc::new(DashMap::new()),
            auth_codes: Arc::new(DashMap::new()),
            access_tokens: Arc::new(DashMap::new()),
            refresh_tokens: Arc::new(DashMap::new()),
            options: Arc::new(RwLock::new(HashMap::new())),
            users: Arc::new(DashMap::new()),
            next_user_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Flip `is_revoked` under the entry lock; true only for the first caller
    fn revoke_entry<T>(map: &DashMap<String, T>, id: &str, flag: impl Fn(&mut T) -> &mut bool) -> bool {
        match map.get_mut(id) {
            Some(mut entry) => {
                let revoked = flag(entry.value_mut());
                if *revoked {
                    false
                } else {
                    *revoked = true;
                    true
                }
            }
            None => false,
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClientStorage for MemoryStorage {
    async fn save_client(&self, client: &Client) -> Result<()> {
        self.clients.insert(client.id.clone(), client.clone());
        Ok(())
    }

    async fn get_client(&self, id: &str) -> Result<Option<Client>> {
        Ok(self.clients.get(id).map(|c| c.clone()))
    }

    async fn list_clients(&self) -> Result<Vec<Client>> {
        let mut clients: Vec<Client> = self.clients.iter().map(|c| c.value().clone()).collect();
        clients.sort_unstable_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(clients)
    }

    async fn delete_client(&self, id: &str) -> Result<()> {
        self.clients.remove(id);
        self.auth_codes.retain(|_, code| code.client_id != id);

        let jtis: Vec<String> = self
            .access_tokens
            .iter()
            .filter(|t| t.client_id == id)
            .map(|t| t.jti.clone())
            .collect();
        self.access_tokens.retain(|_, token| token.client_id != id);
        self.refresh_tokens
            .retain(|_, token| !jtis.contains(&token.access_token_id));
        Ok(())
    }
}

#[async_trait]
impl TokenStorage for MemoryStorage {
    async fn save_auth_code(&self, code: &AuthCode) -> Result<()> {
        self.auth_codes.insert(code.code_id.clone(), code.clone());
        Ok(())
    }

    async fn get_auth_code(&self, code_id: &str) -> Result<Option<AuthCode>> {
        Ok(self.auth_codes.get(code_id).map(|c| c.clone()))
    }

    async fn revoke_auth_code(&self, code_id: &str) -> Result<bool> {
        Ok(Self::revoke_entry(&self.auth_codes, code_id, |c| {
            &mut c.is_revoked
        }))
    }

    async fn save_access_token(&self, token: &AccessToken) -> Result<()> {
        self.access_tokens.insert(token.jti.clone(), token.clone());
        Ok(())
    }

    async fn get_access_token(&self, jti: &str) -> Result<Option<AccessToken>> {
        Ok(self.access_tokens.get(jti).map(|t| t.clone()))
    }

    async fn revoke_access_token(&self, jti: &str) -> Result<bool> {
        Ok(Self::revoke_entry(&self.access_tokens, jti, |t| {
            &mut t.is_revoked
        }))
    }

    async fn save_refresh_token(&self, token: &RefreshToken) -> Result<()> {
        self.refresh_tokens
            .insert(token.token_id.clone(), token.clone());
        Ok(())
    }

    async fn get_refresh_token(&self, token_id: &str) -> Result<Option<RefreshToken>> {
        Ok(self.refresh_tokens.get(token_id).map(|t| t.clone()))
    }

    async fn revoke_refresh_token(&self, token_id: &str) -> Result<bool> {
        Ok(Self::revoke_entry(&self.refresh_tokens, token_id, |t| {
            &mut t.is_revoked
        }))
    }

    async fn revoke_tokens_for_client(&self, client_id: &str) -> Result<u64> {
        let mut count = 0u64;
        let mut jtis = Vec::new();

        for mut token in self.access_tokens.iter_mut() {
            if token.client_id == client_id {
                jtis.push(token.jti.clone());
                if !token.is_revoked {
                    token.is_revoked = true;
                    count += 1;
                }
            }
        }

        for mut token in self.refresh_tokens.iter_mut() {
            if jtis.contains(&token.access_token_id) && !token.is_revoked {
                token.is_revoked = true;
                count += 1;
            }
        }

        Ok(count)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let before = self.auth_codes.len() + self.access_tokens.len() + self.refresh_tokens.len();

        self.auth_codes.retain(|_, c| c.expires_at > now);
        self.access_tokens.retain(|_, t| t.expires_at > now);
        self.refresh_tokens.retain(|_, t| t.expires_at > now);

        let after = self.auth_codes.len() + self.access_tokens.len() + self.refresh_tokens.len();
        Ok(before.saturating_sub(after) as u64)
    }
}

#[async_trait]
impl OptionStorage for MemoryStorage {
    async fn get_option(&self, key: &str) -> Result<Option<String>> {
        Ok(self.options.read().get(key).cloned())
    }

    async fn set_option(&self, key: &str, value: &str) -> Result<()> {
        self.options
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn set_options(&self, entries: &[(&str, &str)]) -> Result<()> {
        let mut options = self.options.write();
        for (key, value) in entries {
            options.insert((*key).to_string(), (*value).to_string());
        }
        Ok(())
    }

    async fn delete_option(&self, key: &str) -> Result<()> {
        self.options.write().remove(key);
        Ok(())
    }
}

#[async_trait]
impl UserStorage for MemoryStorage {
    async fn insert_user(&self, user: &HostUser) -> Result<UserId> {
        if self.users.iter().any(|u| u.login == user.login) {
            return Err(crate::PressGateError::validation(format!(
                "user login already exists: {}",
                user.login
            )));
        }

        let id = self.next_user_id.fetch_add(1, Ordering::SeqCst);
        let mut stored = user.clone();
        stored.id = UserId(id);
        self.users.insert(id, stored);
        Ok(UserId(id))
    }

    async fn get_user(&self, id: UserId) -> Result<Option<HostUser>> {
        Ok(self.users.get(&id.as_u64()).map(|u| u.clone()))
    }

    async fn get_user_by_login(&self, login: &str) -> Result<Option<HostUser>> {
        Ok(self
            .users
            .iter()
            .find(|u| u.login == login)
            .map(|u| u.value().clone()))
    }

    async fn list_users(&self) -> Result<Vec<HostUser>> {
        let mut users: Vec<HostUser> = self.users.iter().map(|u| u.value().clone()).collect();
        users.sort_unstable_by_key(|u| u.id);
        Ok(users)
    }

    async fn delete_user(&self, id: UserId) -> Result<()> {
        self.users.remove(&id.as_u64());
        Ok(())
    }
}
