//! Account store seam.
//!
//! The account store is an external collaborator: it owns account
//! persistence and any per-account write serialization. This module defines
//! the interface the integration calls and an in-memory implementation for
//! tests and the CLI.
//!
//! - `MemoryAccountStore`: In-memory storage (single process only)

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::reconcile::{Account, Profile, ProfileChanges};

/// Result type for account store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors reported by the account store. Propagated unchanged.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Account not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Account store error: {0}")]
    Internal(String),
}

/// Parameters for provisioning a new local account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningParams {
    pub login: String,
    #[serde(default)]
    pub profile: Profile,
    /// Initial role, if one was computed before the account existed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get_account(&self, login: &str) -> StoreResult<Option<Account>>;
    async fn create_account(&self, params: ProvisioningParams) -> StoreResult<Account>;
    /// Replace the role set and overlay profile changes in one write.
    async fn update_account(
        &self,
        login: &str,
        roles: &[String],
        profile: &ProfileChanges,
    ) -> StoreResult<()>;
}

/// Type alias for a shared account store.
pub type SharedAccountStore = Arc<dyn AccountStore>;

/// In-memory account store.
#[derive(Default)]
pub struct MemoryAccountStore {
    accounts: RwLock<HashMap<String, Account>>,
    updates: AtomicUsize,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with existing accounts.
    pub fn with_accounts(accounts: impl IntoIterator<Item = Account>) -> Self {
        Self {
            accounts: RwLock::new(
                accounts
                    .into_iter()
                    .map(|account| (account.login.clone(), account))
                    .collect(),
            ),
            updates: AtomicUsize::new(0),
        }
    }

    /// Number of `update_account` calls served so far.
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn get_account(&self, login: &str) -> StoreResult<Option<Account>> {
        let accounts = self.accounts.read().await;
        Ok(accounts.get(login).cloned())
    }

    async fn create_account(&self, params: ProvisioningParams) -> StoreResult<Account> {
        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(&params.login) {
            return Err(StoreError::Conflict(format!(
                "account '{}' already exists",
                params.login
            )));
        }

        let account = Account {
            login: params.login.clone(),
            roles: params.role.into_iter().collect(),
            profile: params.profile,
        };
        accounts.insert(params.login, account.clone());
        Ok(account)
    }

    async fn update_account(
        &self,
        login: &str,
        roles: &[String],
        profile: &ProfileChanges,
    ) -> StoreResult<()> {
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .get_mut(login)
            .ok_or_else(|| StoreError::NotFound(login.to_string()))?;

        account.roles = roles.to_vec();
        profile.apply_to(&mut account.profile);
        self.updates.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
