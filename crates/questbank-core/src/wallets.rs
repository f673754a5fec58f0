use crate::error::CoreError;
use crate::types::{Wallet, WalletOwner};
use chrono::Utc;
use std::collections::HashMap;
use uuid::Uuid;

/// In-memory wallet table.
///
/// Balances are only ever changed through the engine's atomic operations:
/// validation (`prepare_*`) runs before any ledger entry is built, and the
/// matching `apply_*` runs after the batch has been durably committed,
/// all under the same state lock.
#[derive(Debug, Default, Clone)]
pub struct WalletStore {
    wallets: HashMap<String, Wallet>,
    by_owner: HashMap<(WalletOwner, String), String>,
}

impl WalletStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a wallet for an owner. Exactly one wallet per `(owner, owner_id)`.
    pub fn provision(
        &mut self,
        owner: WalletOwner,
        owner_id: impl Into<String>,
    ) -> Result<Wallet, CoreError> {
        let owner_id = owner_id.into();
        if owner_id.trim().is_empty() {
            return Err(CoreError::InvalidInput(
                "wallet owner id must not be empty".to_string(),
            ));
        }

        let key = (owner, owner_id.clone());
        if self.by_owner.contains_key(&key) {
            return Err(CoreError::AlreadyExists(format!(
                "{} wallet for '{}' already exists",
                owner.name(),
                owner_id
            )));
        }

        let wallet = Wallet {
            id: Uuid::new_v4().to_string(),
            owner,
            owner_id,
            balance: 0,
            updated_at: Utc::now(),
        };
        self.by_owner.insert(key, wallet.id.clone());
        self.wallets.insert(wallet.id.clone(), wallet.clone());
        Ok(wallet)
    }

    pub fn get(&self, wallet_id: &str) -> Result<&Wallet, CoreError> {
        self.wallets
            .get(wallet_id)
            .ok_or_else(|| CoreError::not_found("wallet", wallet_id))
    }

    pub fn find(&self, owner: WalletOwner, owner_id: &str) -> Result<&Wallet, CoreError> {
        let wallet_id = self
            .by_owner
            .get(&(owner, owner_id.to_string()))
            .ok_or_else(|| {
                CoreError::NotFound(format!("{} wallet for '{owner_id}' not found", owner.name()))
            })?;
        self.get(wallet_id)
    }

    pub fn balance(&self, wallet_id: &str) -> Result<u64, CoreError> {
        Ok(self.get(wallet_id)?.balance)
    }

    /// Validate a debit without applying it.
    pub fn prepare_debit(&self, wallet_id: &str, amount: u64) -> Result<(), CoreError> {
        if amount == 0 {
            return Err(CoreError::InvalidInput(
                "debit amount must be positive".to_string(),
            ));
        }
        let wallet = self.get(wallet_id)?;
        if wallet.balance < amount {
            return Err(CoreError::InsufficientFunds(format!(
                "{} wallet '{}' holds {} coins, cannot debit {}",
                wallet.owner.name(),
                wallet.owner_id,
                wallet.balance,
                amount
            )));
        }
        Ok(())
    }

    /// Validate a credit without applying it. Credits have no upper bound but
    /// still reject non-positive amounts and overflow.
    pub fn prepare_credit(&self, wallet_id: &str, amount: u64) -> Result<(), CoreError> {
        if amount == 0 {
            return Err(CoreError::InvalidInput(
                "credit amount must be positive".to_string(),
            ));
        }
        let wallet = self.get(wallet_id)?;
        if wallet.balance.checked_add(amount).is_none() {
            return Err(CoreError::InvalidInput(
                "credit would overflow wallet balance".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply a debit that `prepare_debit` already validated.
    pub fn apply_debit(&mut self, wallet_id: &str, amount: u64) {
        if let Some(wallet) = self.wallets.get_mut(wallet_id) {
            debug_assert!(wallet.balance >= amount, "debit applied without prepare");
            wallet.balance = wallet.balance.saturating_sub(amount);
            wallet.updated_at = Utc::now();
        }
    }

    /// Apply a credit that `prepare_credit` already validated.
    pub fn apply_credit(&mut self, wallet_id: &str, amount: u64) {
        if let Some(wallet) = self.wallets.get_mut(wallet_id) {
            wallet.balance = wallet.balance.saturating_add(amount);
            wallet.updated_at = Utc::now();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Wallet> {
        self.wallets.values()
    }
}
