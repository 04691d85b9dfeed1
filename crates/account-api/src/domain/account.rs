//! Account entity and the patch use case.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;

/// An account as stored by the service.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub email: String,
}

/// Use-case failures. Surfaced to clients as 422.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccountError {
    #[error("account id is required")]
    MissingId,

    #[error("invalid email address: {0}")]
    InvalidEmail(String),
}

/// Account use cases.
#[async_trait]
pub trait AccountService: Send + Sync {
    /// Apply the non-empty fields of `patch` to the account with `patch.id`,
    /// creating it if needed.
    async fn patch(&self, patch: Account) -> Result<(), AccountError>;
}

/// Account store held in process memory.
#[derive(Default)]
pub struct InMemoryAccounts {
    accounts: RwLock<HashMap<String, Account>>,
}

impl InMemoryAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<Account> {
        self.accounts.read().get(id).cloned()
    }
}

#[async_trait]
impl AccountService for InMemoryAccounts {
    async fn patch(&self, patch: Account) -> Result<(), AccountError> {
        if patch.id.is_empty() {
            return Err(AccountError::MissingId);
        }
        if !patch.email.is_empty() && !is_plausible_email(&patch.email) {
            return Err(AccountError::InvalidEmail(patch.email));
        }

        let mut accounts = self.accounts.write();
        let account = accounts.entry(patch.id.clone()).or_insert_with(|| Account {
            id: patch.id.clone(),
            ..Account::default()
        });
        if !patch.name.is_empty() {
            account.name = patch.name;
        }
        if !patch.email.is_empty() {
            account.email = patch.email;
        }
        Ok(())
    }
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.'),
        None => false,
    }
}
