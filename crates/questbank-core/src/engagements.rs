use crate::error::CoreError;
use crate::types::{Engagement, EngagementRecipient, EngagementStatus};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Engagement budget pools and their recipient lists.
///
/// Coin movements (funding and distribution) go through the engine so they
/// share an atomic unit with the wallet debits/credits; this module owns the
/// metadata and the distributed-once idempotency marker.
#[derive(Debug, Default, Clone)]
pub struct EngagementBook {
    engagements: HashMap<String, Engagement>,
    // BTreeMap keeps recipient ordering stable for deterministic payouts.
    recipients: HashMap<String, BTreeMap<String, EngagementRecipient>>,
}

impl EngagementBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(
        &mut self,
        org_id: &str,
        name: &str,
        wallet_id: &str,
    ) -> Result<Engagement, CoreError> {
        if name.trim().is_empty() {
            return Err(CoreError::InvalidInput(
                "engagement name must not be empty".to_string(),
            ));
        }

        let now = Utc::now();
        let engagement = Engagement {
            id: Uuid::new_v4().to_string(),
            org_id: org_id.to_string(),
            name: name.to_string(),
            budget_total: 0,
            total_distributed: 0,
            status: EngagementStatus::Active,
            wallet_id: wallet_id.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.engagements
            .insert(engagement.id.clone(), engagement.clone());
        self.recipients
            .insert(engagement.id.clone(), BTreeMap::new());
        Ok(engagement)
    }

    /// Attach the budget pool wallet created for this engagement.
    pub fn bind_wallet(
        &mut self,
        engagement_id: &str,
        wallet_id: &str,
    ) -> Result<Engagement, CoreError> {
        let engagement = self.get_mut(engagement_id)?;
        engagement.wallet_id = wallet_id.to_string();
        engagement.updated_at = Utc::now();
        Ok(engagement.clone())
    }

    pub fn get(&self, engagement_id: &str) -> Result<&Engagement, CoreError> {
        self.engagements
            .get(engagement_id)
            .ok_or_else(|| CoreError::not_found("engagement", engagement_id))
    }

    fn get_mut(&mut self, engagement_id: &str) -> Result<&mut Engagement, CoreError> {
        self.engagements
            .get_mut(engagement_id)
            .ok_or_else(|| CoreError::not_found("engagement", engagement_id))
    }

    /// Validate that an engagement can still accept funding.
    pub fn prepare_funding(&self, engagement_id: &str) -> Result<&Engagement, CoreError> {
        let engagement = self.get(engagement_id)?;
        if engagement.status == EngagementStatus::Distributed {
            return Err(CoreError::InvalidState(format!(
                "engagement '{engagement_id}' is already distributed"
            )));
        }
        Ok(engagement)
    }

    /// Record committed funding. Runs after the wallet transfer landed.
    pub fn apply_funding(&mut self, engagement_id: &str, amount: u64) -> Result<Engagement, CoreError> {
        let engagement = self.get_mut(engagement_id)?;
        engagement.budget_total = engagement.budget_total.saturating_add(amount);
        engagement.updated_at = Utc::now();
        Ok(engagement.clone())
    }

    pub fn upsert_recipient(
        &mut self,
        engagement_id: &str,
        user_id: &str,
        planned_amount: u64,
    ) -> Result<EngagementRecipient, CoreError> {
        if planned_amount == 0 {
            return Err(CoreError::InvalidInput(
                "planned_amount must be positive".to_string(),
            ));
        }

        let engagement = self.get(engagement_id)?;
        if engagement.status == EngagementStatus::Distributed {
            return Err(CoreError::InvalidState(format!(
                "engagement '{engagement_id}' is already distributed"
            )));
        }

        let recipient = EngagementRecipient {
            engagement_id: engagement_id.to_string(),
            user_id: user_id.to_string(),
            planned_amount,
            updated_at: Utc::now(),
        };
        self.recipients
            .entry(engagement_id.to_string())
            .or_default()
            .insert(user_id.to_string(), recipient.clone());
        Ok(recipient)
    }

    pub fn remove_recipient(
        &mut self,
        engagement_id: &str,
        user_id: &str,
    ) -> Result<(), CoreError> {
        let engagement = self.get(engagement_id)?;
        if engagement.status == EngagementStatus::Distributed {
            return Err(CoreError::InvalidState(format!(
                "engagement '{engagement_id}' is already distributed"
            )));
        }

        let removed = self
            .recipients
            .get_mut(engagement_id)
            .and_then(|list| list.remove(user_id));
        if removed.is_none() {
            return Err(CoreError::NotFound(format!(
                "recipient '{user_id}' not planned on engagement '{engagement_id}'"
            )));
        }
        Ok(())
    }

    pub fn recipients_of(&self, engagement_id: &str) -> Vec<EngagementRecipient> {
        self.recipients
            .get(engagement_id)
            .map(|list| list.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Validate a distribution and return the planned transfers plus total.
    ///
    /// The distributed-once marker doubles as the idempotency guard: a retry
    /// after success observes `Distributed` and fails `INVALID_STATE`.
    pub fn prepare_distribution(
        &self,
        engagement_id: &str,
    ) -> Result<(Engagement, Vec<EngagementRecipient>, u64), CoreError> {
        let engagement = self.get(engagement_id)?;
        if engagement.status == EngagementStatus::Distributed {
            return Err(CoreError::InvalidState(format!(
                "engagement '{engagement_id}' is already distributed"
            )));
        }

        let recipients = self.recipients_of(engagement_id);
        if recipients.is_empty() {
            return Err(CoreError::InvalidInput(format!(
                "engagement '{engagement_id}' has no planned recipients"
            )));
        }

        let total = recipients
            .iter()
            .try_fold(0u64, |acc, recipient| {
                acc.checked_add(recipient.planned_amount)
            })
            .ok_or_else(|| {
                CoreError::InvalidInput("planned amounts overflow the coin range".to_string())
            })?;

        if total > engagement.remaining() {
            return Err(CoreError::InsufficientFunds(format!(
                "planned total {} exceeds remaining budget {} on engagement '{engagement_id}'",
                total,
                engagement.remaining()
            )));
        }

        Ok((engagement.clone(), recipients, total))
    }

    /// Mark an engagement distributed. Runs after all transfers committed.
    pub fn apply_distribution(
        &mut self,
        engagement_id: &str,
        total: u64,
    ) -> Result<Engagement, CoreError> {
        let engagement = self.get_mut(engagement_id)?;
        engagement.total_distributed = engagement.total_distributed.saturating_add(total);
        engagement.status = EngagementStatus::Distributed;
        engagement.updated_at = Utc::now();
        Ok(engagement.clone())
    }
}
