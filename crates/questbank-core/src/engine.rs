use crate::auth::{self, PrincipalDirectory};
use crate::engagements::EngagementBook;
use crate::error::CoreError;
use crate::events::DomainEvent;
use crate::grading::SubmissionLog;
use crate::ledger::{EntryDirection, LedgerEntry};
use crate::quests::QuestBoard;
use crate::seats::EnrollmentBook;
use crate::storage::{LedgerStorageConfig, PersistentJournal};
use crate::types::{
    ApprovalOutcome, DistributionSummary, Engagement, EngagementRecipient, Enrollment,
    PlatformBalance, Principal, Quest, QuestDraft, RecipientTransfer, Role, Submission,
    SubmissionStatus, Wallet, WalletOwner,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex as AsyncMutex};

/// Actor id recorded on ledger rows written by the engine itself
/// (reward payouts, initial funding) rather than by a caller.
const SYSTEM_ACTOR: &str = "system";

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// User id registered as the first master admin at bootstrap.
    pub bootstrap_admin: String,
    /// Coins credited to the platform wallet at bootstrap.
    pub initial_platform_coins: u64,
    pub ledger_storage: LedgerStorageConfig,
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bootstrap_admin: "platform-root".to_string(),
            initial_platform_coins: 0,
            ledger_storage: LedgerStorageConfig::Memory,
            event_capacity: 64,
        }
    }
}

/// One page of a wallet's ledger, newest entries first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerPage {
    pub total: usize,
    pub entries: Vec<LedgerEntry>,
}

/// Result of a full ledger audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerAudit {
    pub chain_verified: bool,
    pub wallets_checked: usize,
    /// Wallet ids whose balance does not equal `credits - debits`.
    pub unbalanced_wallets: Vec<String>,
}

impl LedgerAudit {
    pub fn is_clean(&self) -> bool {
        self.chain_verified && self.unbalanced_wallets.is_empty()
    }
}

/// Single consistency domain: every mutable table of the coin economy,
/// guarded together so one lock acquisition is one transaction.
struct BankState {
    principals: PrincipalDirectory,
    wallets: crate::wallets::WalletStore,
    journal: PersistentJournal,
    quests: QuestBoard,
    enrollments: EnrollmentBook,
    submissions: SubmissionLog,
    engagements: EngagementBook,
    platform_wallet_id: String,
}

/// The coin economy engine.
///
/// Every mutating operation follows the same shape: take the state lock,
/// resolve the actor's role from the directory (inside the critical
/// section), validate every invariant, stage ledger entries, persist them,
/// apply all mutations, release the lock, then emit post-commit events.
/// Validation completes before the first mutation, so no operation can be
/// observed half-applied.
pub struct QuestBankEngine {
    state: AsyncMutex<BankState>,
    events: broadcast::Sender<DomainEvent>,
    backend_label: &'static str,
}

impl QuestBankEngine {
    pub async fn bootstrap(config: EngineConfig) -> Result<Self, CoreError> {
        let mut journal = PersistentJournal::bootstrap(config.ledger_storage.clone()).await?;
        let backend_label = journal.backend_label();

        let mut wallets = crate::wallets::WalletStore::new();
        let platform_wallet = wallets.provision(WalletOwner::Platform, "platform")?;

        if config.initial_platform_coins > 0 {
            let mut batch = journal.begin_batch();
            batch.push(
                &platform_wallet.id,
                EntryDirection::Credit,
                config.initial_platform_coins,
                "initial platform funding",
                None,
                SYSTEM_ACTOR,
            )?;
            journal.commit_batch(batch).await?;
            wallets.apply_credit(&platform_wallet.id, config.initial_platform_coins);
        }

        let mut principals = PrincipalDirectory::new();
        principals.upsert(config.bootstrap_admin.clone(), Role::MasterAdmin, None)?;

        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        Ok(Self {
            state: AsyncMutex::new(BankState {
                principals,
                wallets,
                journal,
                quests: QuestBoard::new(),
                enrollments: EnrollmentBook::new(),
                submissions: SubmissionLog::new(),
                engagements: EngagementBook::new(),
                platform_wallet_id: platform_wallet.id,
            }),
            events,
            backend_label,
        })
    }

    pub fn ledger_backend(&self) -> &'static str {
        self.backend_label
    }

    /// Subscribe to post-commit domain events.
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: DomainEvent) {
        // Nobody listening is fine; events are strictly best-effort.
        let _ = self.events.send(event);
    }

    // ----- principals & wallets -------------------------------------------

    /// Register or update a principal.
    ///
    /// Master admins may assign any role; org admins may register staff and
    /// students inside their own organization only.
    pub async fn register_principal(
        &self,
        actor: &str,
        user_id: &str,
        role: Role,
        org_id: Option<String>,
    ) -> Result<Principal, CoreError> {
        let mut state = self.state.lock().await;
        let caller = state.principals.resolve(actor)?;

        match caller.role {
            Role::MasterAdmin => {}
            Role::OrgAdmin => {
                if !matches!(role, Role::Staff | Role::Student) {
                    return Err(CoreError::forbidden(format!(
                        "org admin '{actor}' may only register staff and students"
                    )));
                }
                if org_id.as_deref() != caller.org_id.as_deref() {
                    return Err(CoreError::forbidden(format!(
                        "org admin '{actor}' may only register principals in their own organization"
                    )));
                }
                if let Some(existing) = state.principals.get(user_id) {
                    if existing.org_id.as_deref() != caller.org_id.as_deref() {
                        return Err(CoreError::forbidden(format!(
                            "principal '{user_id}' belongs to another organization"
                        )));
                    }
                }
            }
            _ => {
                return Err(CoreError::forbidden(format!(
                    "actor '{actor}' may not register principals"
                )))
            }
        }

        state.principals.upsert(user_id, role, org_id)
    }

    /// Provision an organization or student wallet.
    pub async fn provision_wallet(
        &self,
        actor: &str,
        owner: WalletOwner,
        owner_id: &str,
    ) -> Result<Wallet, CoreError> {
        let mut state = self.state.lock().await;
        let caller = state.principals.resolve(actor)?;
        auth::require_role(&caller, &[Role::MasterAdmin])?;

        if !matches!(owner, WalletOwner::Organization | WalletOwner::Student) {
            return Err(CoreError::InvalidInput(format!(
                "cannot provision a {} wallet directly",
                owner.name()
            )));
        }
        state.wallets.provision(owner, owner_id)
    }

    /// Move coins from the platform wallet into an organization wallet.
    pub async fn grant_to_org(
        &self,
        actor: &str,
        org_id: &str,
        amount: u64,
    ) -> Result<Wallet, CoreError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let caller = state.principals.resolve(actor)?;
        auth::require_role(&caller, &[Role::MasterAdmin])?;

        let platform_wallet_id = state.platform_wallet_id.clone();
        let org_wallet_id = state.wallets.find(WalletOwner::Organization, org_id)?.id.clone();
        state.wallets.prepare_debit(&platform_wallet_id, amount)?;
        state.wallets.prepare_credit(&org_wallet_id, amount)?;

        let mut batch = state.journal.begin_batch();
        batch.push(
            &platform_wallet_id,
            EntryDirection::Debit,
            amount,
            "platform grant",
            Some(org_id),
            actor,
        )?;
        batch.push(
            &org_wallet_id,
            EntryDirection::Credit,
            amount,
            "platform grant",
            Some(org_id),
            actor,
        )?;
        state.journal.commit_batch(batch).await?;
        state.wallets.apply_debit(&platform_wallet_id, amount);
        state.wallets.apply_credit(&org_wallet_id, amount);

        Ok(state.wallets.get(&org_wallet_id)?.clone())
    }

    /// The caller's own wallet, resolved by role.
    pub async fn my_wallet(&self, actor: &str) -> Result<Wallet, CoreError> {
        let state = self.state.lock().await;
        let caller = state.principals.resolve(actor)?;
        let wallet = Self::wallet_for_principal(&state, &caller)?;
        Ok(wallet.clone())
    }

    /// One page of the caller's own ledger, newest first.
    pub async fn my_ledger(
        &self,
        actor: &str,
        limit: usize,
        offset: usize,
    ) -> Result<LedgerPage, CoreError> {
        let state = self.state.lock().await;
        let caller = state.principals.resolve(actor)?;
        let wallet = Self::wallet_for_principal(&state, &caller)?;

        let mut entries = state.journal.entries_for_wallet(&wallet.id);
        entries.reverse();
        let total = entries.len();
        let entries = entries
            .into_iter()
            .skip(offset)
            .take(limit.min(1000))
            .collect();
        Ok(LedgerPage { total, entries })
    }

    pub async fn platform_balance(&self, actor: &str) -> Result<PlatformBalance, CoreError> {
        let state = self.state.lock().await;
        let caller = state.principals.resolve(actor)?;
        auth::require_role(&caller, &[Role::MasterAdmin])?;

        let wallet = state.wallets.get(&state.platform_wallet_id)?;
        Ok(PlatformBalance {
            balance: wallet.balance,
            updated_at: wallet.updated_at,
        })
    }

    /// Verify the hash chain and the per-wallet sum invariant
    /// (`balance == credits - debits` for every wallet).
    pub async fn audit_ledger(&self) -> LedgerAudit {
        let state = self.state.lock().await;
        let chain_verified = state.journal.verify_chain();

        let mut wallets_checked = 0;
        let mut unbalanced_wallets = Vec::new();
        for wallet in state.wallets.iter() {
            wallets_checked += 1;
            let (credits, debits) = state.journal.wallet_totals(&wallet.id);
            if credits < debits || credits - debits != wallet.balance {
                unbalanced_wallets.push(wallet.id.clone());
            }
        }

        LedgerAudit {
            chain_verified,
            wallets_checked,
            unbalanced_wallets,
        }
    }

    fn wallet_for_principal<'a>(
        state: &'a BankState,
        principal: &Principal,
    ) -> Result<&'a Wallet, CoreError> {
        match principal.role {
            Role::MasterAdmin => state.wallets.get(&state.platform_wallet_id),
            Role::OrgAdmin | Role::Staff => {
                let org_id = principal.org_id.as_deref().ok_or_else(|| {
                    CoreError::InvalidState(format!(
                        "principal '{}' has no organization",
                        principal.user_id
                    ))
                })?;
                state.wallets.find(WalletOwner::Organization, org_id)
            }
            Role::Student => state.wallets.find(WalletOwner::Student, &principal.user_id),
        }
    }

    // ----- quest lifecycle ------------------------------------------------

    pub async fn create_quest(&self, actor: &str, draft: QuestDraft) -> Result<Quest, CoreError> {
        let mut state = self.state.lock().await;
        let caller = state.principals.resolve(actor)?;
        auth::require_role(&caller, &[Role::OrgAdmin, Role::Staff])?;
        let org_id = caller.org_id.clone().unwrap_or_default();
        state.quests.create(&org_id, actor, draft)
    }

    pub async fn submit_quest(&self, actor: &str, quest_id: &str) -> Result<Quest, CoreError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let caller = state.principals.resolve(actor)?;
        auth::require_role(&caller, &[Role::OrgAdmin, Role::Staff])?;
        let org_id = state.quests.get(quest_id)?.org_id.clone();
        auth::require_org_access(&caller, &org_id)?;
        state.quests.submit(quest_id, actor)
    }

    pub async fn revise_quest(
        &self,
        actor: &str,
        quest_id: &str,
        draft: QuestDraft,
    ) -> Result<Quest, CoreError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let caller = state.principals.resolve(actor)?;
        auth::require_role(&caller, &[Role::OrgAdmin, Role::Staff])?;
        let org_id = state.quests.get(quest_id)?.org_id.clone();
        auth::require_org_access(&caller, &org_id)?;
        state.quests.revise(quest_id, actor, draft)
    }

    /// Approve a submitted quest, funding its reward from the platform
    /// wallet. The funding debit and the status change commit together; if
    /// the platform cannot cover the reward the quest stays `submitted`.
    pub async fn approve_quest(
        &self,
        actor: &str,
        quest_id: &str,
    ) -> Result<ApprovalOutcome, CoreError> {
        let (outcome, event) = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let caller = state.principals.resolve(actor)?;
            auth::require_role(&caller, &[Role::MasterAdmin])?;

            let reward_coins = state.quests.prepare_approval(quest_id)?.reward_coins;
            let platform_wallet_id = state.platform_wallet_id.clone();
            state.wallets.prepare_debit(&platform_wallet_id, reward_coins)?;

            let mut batch = state.journal.begin_batch();
            batch.push(
                &platform_wallet_id,
                EntryDirection::Debit,
                reward_coins,
                "quest approval funding",
                Some(quest_id),
                actor,
            )?;
            state.journal.commit_batch(batch).await?;
            state.wallets.apply_debit(&platform_wallet_id, reward_coins);

            let quest = state.quests.mark_approved(quest_id, actor)?;
            let platform_balance = state.wallets.balance(&platform_wallet_id)?;
            let event = DomainEvent::QuestApproved {
                quest_id: quest.id.clone(),
                approver: actor.to_string(),
                reward_coins,
            };
            (
                ApprovalOutcome {
                    quest,
                    platform_balance,
                },
                event,
            )
        };

        self.emit(event);
        Ok(outcome)
    }

    pub async fn reject_quest(
        &self,
        actor: &str,
        quest_id: &str,
        reason: &str,
    ) -> Result<Quest, CoreError> {
        let (quest, event) = {
            let mut state = self.state.lock().await;
            let caller = state.principals.resolve(actor)?;
            auth::require_role(&caller, &[Role::MasterAdmin])?;

            let quest = state.quests.mark_rejected(quest_id, reason)?;
            let event = DomainEvent::QuestRejected {
                quest_id: quest.id.clone(),
                reason: reason.to_string(),
            };
            (quest, event)
        };

        self.emit(event);
        Ok(quest)
    }

    pub async fn set_quest_active(
        &self,
        actor: &str,
        quest_id: &str,
        active: bool,
    ) -> Result<Quest, CoreError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let caller = state.principals.resolve(actor)?;
        auth::require_role(&caller, &[Role::MasterAdmin, Role::OrgAdmin, Role::Staff])?;
        let org_id = state.quests.get(quest_id)?.org_id.clone();
        auth::require_org_access(&caller, &org_id)?;
        state.quests.set_active(quest_id, active)
    }

    pub async fn get_quest(&self, quest_id: &str) -> Result<Quest, CoreError> {
        let state = self.state.lock().await;
        Ok(state.quests.get(quest_id)?.clone())
    }

    // ----- seats ----------------------------------------------------------

    /// Reserve one seat on a quest for the calling student.
    pub async fn reserve_seat(&self, actor: &str, quest_id: &str) -> Result<Enrollment, CoreError> {
        let (enrollment, event) = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let caller = state.principals.resolve(actor)?;
            auth::require_role(&caller, &[Role::Student])?;

            let quest = state.quests.get_mut(quest_id)?;
            let enrollment = state.enrollments.reserve(quest, actor)?;
            let event = DomainEvent::SeatReserved {
                quest_id: quest_id.to_string(),
                user_id: actor.to_string(),
            };
            (enrollment, event)
        };

        self.emit(event);
        Ok(enrollment)
    }

    pub async fn cancel_seat(&self, actor: &str, quest_id: &str) -> Result<(), CoreError> {
        let event = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let caller = state.principals.resolve(actor)?;
            auth::require_role(&caller, &[Role::Student])?;

            let quest = state.quests.get_mut(quest_id)?;
            state.enrollments.cancel(quest, actor)?;
            DomainEvent::SeatCancelled {
                quest_id: quest_id.to_string(),
                user_id: actor.to_string(),
            }
        };

        self.emit(event);
        Ok(())
    }

    // ----- grading --------------------------------------------------------

    /// Grade one MCQ answer. An accepted answer credits the student's
    /// wallet in the same atomic unit that records the submission, so a
    /// crash between grading and payout is impossible to observe.
    pub async fn submit_answer(
        &self,
        actor: &str,
        quest_id: &str,
        choice: u32,
    ) -> Result<Submission, CoreError> {
        let (submission, event) = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let caller = state.principals.resolve(actor)?;
            auth::require_role(&caller, &[Role::Student])?;

            let quest = state.quests.get(quest_id)?.clone();
            let submission = state.submissions.grade(&quest, actor, choice)?;

            let mut amount_credited = 0;
            if submission.status == SubmissionStatus::Accepted {
                let student_wallet_id =
                    state.wallets.find(WalletOwner::Student, actor)?.id.clone();
                state
                    .wallets
                    .prepare_credit(&student_wallet_id, quest.reward_coins)?;

                let mut batch = state.journal.begin_batch();
                batch.push(
                    &student_wallet_id,
                    EntryDirection::Credit,
                    quest.reward_coins,
                    "quest reward",
                    Some(quest_id),
                    SYSTEM_ACTOR,
                )?;
                state.journal.commit_batch(batch).await?;
                state.wallets.apply_credit(&student_wallet_id, quest.reward_coins);
                amount_credited = quest.reward_coins;
            }

            state.submissions.record(submission.clone());
            let event = DomainEvent::SubmissionGraded {
                quest_id: quest_id.to_string(),
                user_id: actor.to_string(),
                accepted: submission.status == SubmissionStatus::Accepted,
                amount_credited,
            };
            (submission, event)
        };

        self.emit(event);
        Ok(submission)
    }

    // ----- engagements ----------------------------------------------------

    /// Create an engagement and provision its budget pool wallet.
    pub async fn create_engagement(&self, actor: &str, name: &str) -> Result<Engagement, CoreError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let caller = state.principals.resolve(actor)?;
        auth::require_role(&caller, &[Role::OrgAdmin, Role::Staff])?;
        let org_id = caller.org_id.clone().unwrap_or_default();

        // Wallet id is derived after creation so the pool is addressable
        // by engagement id in the ledger.
        let placeholder = state.engagements.create(&org_id, name, "")?;
        let wallet = state
            .wallets
            .provision(WalletOwner::Engagement, &placeholder.id)?;
        let engagement = state
            .engagements
            .bind_wallet(&placeholder.id, &wallet.id)?;
        Ok(engagement)
    }

    /// Fund an engagement from its organization's wallet.
    pub async fn fund_engagement(
        &self,
        actor: &str,
        engagement_id: &str,
        amount: u64,
        reason: Option<&str>,
    ) -> Result<Engagement, CoreError> {
        let (engagement, event) = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let caller = state.principals.resolve(actor)?;
            auth::require_role(&caller, &[Role::MasterAdmin, Role::OrgAdmin, Role::Staff])?;

            let (org_id, engagement_wallet_id) = {
                let engagement = state.engagements.prepare_funding(engagement_id)?;
                (engagement.org_id.clone(), engagement.wallet_id.clone())
            };
            auth::require_org_access(&caller, &org_id)?;

            let org_wallet_id = state
                .wallets
                .find(WalletOwner::Organization, &org_id)?
                .id
                .clone();
            state.wallets.prepare_debit(&org_wallet_id, amount)?;
            state.wallets.prepare_credit(&engagement_wallet_id, amount)?;

            let reason = reason.unwrap_or("engagement funding");
            let mut batch = state.journal.begin_batch();
            batch.push(
                &org_wallet_id,
                EntryDirection::Debit,
                amount,
                reason,
                Some(engagement_id),
                actor,
            )?;
            batch.push(
                &engagement_wallet_id,
                EntryDirection::Credit,
                amount,
                reason,
                Some(engagement_id),
                actor,
            )?;
            state.journal.commit_batch(batch).await?;
            state.wallets.apply_debit(&org_wallet_id, amount);
            state.wallets.apply_credit(&engagement_wallet_id, amount);

            let engagement = state.engagements.apply_funding(engagement_id, amount)?;
            let event = DomainEvent::EngagementFunded {
                engagement_id: engagement_id.to_string(),
                amount,
            };
            (engagement, event)
        };

        self.emit(event);
        Ok(engagement)
    }

    pub async fn upsert_recipient(
        &self,
        actor: &str,
        engagement_id: &str,
        user_id: &str,
        planned_amount: u64,
    ) -> Result<EngagementRecipient, CoreError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let caller = state.principals.resolve(actor)?;
        auth::require_role(&caller, &[Role::MasterAdmin, Role::OrgAdmin, Role::Staff])?;
        let org_id = state.engagements.get(engagement_id)?.org_id.clone();
        auth::require_org_access(&caller, &org_id)?;

        state
            .engagements
            .upsert_recipient(engagement_id, user_id, planned_amount)
    }

    pub async fn remove_recipient(
        &self,
        actor: &str,
        engagement_id: &str,
        user_id: &str,
    ) -> Result<(), CoreError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let caller = state.principals.resolve(actor)?;
        auth::require_role(&caller, &[Role::MasterAdmin, Role::OrgAdmin, Role::Staff])?;
        let org_id = state.engagements.get(engagement_id)?.org_id.clone();
        auth::require_org_access(&caller, &org_id)?;

        state.engagements.remove_recipient(engagement_id, user_id)
    }

    /// Pay every planned recipient from the engagement's budget pool.
    ///
    /// All transfers for one call succeed or none do: every recipient wallet
    /// is checked before the first ledger entry is staged, and the whole
    /// batch commits as one unit.
    pub async fn distribute_engagement(
        &self,
        actor: &str,
        engagement_id: &str,
    ) -> Result<DistributionSummary, CoreError> {
        let (summary, event) = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let caller = state.principals.resolve(actor)?;
            auth::require_role(&caller, &[Role::MasterAdmin, Role::OrgAdmin, Role::Staff])?;

            let (engagement, recipients, total) =
                state.engagements.prepare_distribution(engagement_id)?;
            auth::require_org_access(&caller, &engagement.org_id)?;
            state.wallets.prepare_debit(&engagement.wallet_id, total)?;

            // Resolve every recipient wallet up front; a missing wallet
            // aborts before anything is staged.
            let mut transfers = Vec::with_capacity(recipients.len());
            for recipient in &recipients {
                let wallet_id = state
                    .wallets
                    .find(WalletOwner::Student, &recipient.user_id)?
                    .id
                    .clone();
                state
                    .wallets
                    .prepare_credit(&wallet_id, recipient.planned_amount)?;
                transfers.push((wallet_id, recipient.user_id.clone(), recipient.planned_amount));
            }

            let mut batch = state.journal.begin_batch();
            for (wallet_id, _, amount) in &transfers {
                batch.push(
                    &engagement.wallet_id,
                    EntryDirection::Debit,
                    *amount,
                    "engagement distribution",
                    Some(engagement_id),
                    actor,
                )?;
                batch.push(
                    wallet_id,
                    EntryDirection::Credit,
                    *amount,
                    "engagement distribution",
                    Some(engagement_id),
                    actor,
                )?;
            }
            state.journal.commit_batch(batch).await?;

            for (wallet_id, _, amount) in &transfers {
                state.wallets.apply_debit(&engagement.wallet_id, *amount);
                state.wallets.apply_credit(wallet_id, *amount);
            }
            state.engagements.apply_distribution(engagement_id, total)?;

            let summary = DistributionSummary {
                engagement_id: engagement_id.to_string(),
                transfers: transfers
                    .iter()
                    .map(|(_, user_id, amount)| RecipientTransfer {
                        user_id: user_id.clone(),
                        amount: *amount,
                    })
                    .collect(),
                total_amount: total,
                distributed_at: Utc::now(),
            };
            let event = DomainEvent::EngagementDistributed {
                engagement_id: engagement_id.to_string(),
                recipient_count: summary.transfers.len(),
                total_amount: total,
            };
            (summary, event)
        };

        self.emit(event);
        Ok(summary)
    }

    pub async fn get_engagement(&self, engagement_id: &str) -> Result<Engagement, CoreError> {
        let state = self.state.lock().await;
        Ok(state.engagements.get(engagement_id)?.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{QuestStatus, QuizConfig};
    use std::sync::Arc;

    const ROOT: &str = "root";

    async fn engine_with(coins: u64) -> QuestBankEngine {
        let engine = QuestBankEngine::bootstrap(EngineConfig {
            bootstrap_admin: ROOT.to_string(),
            initial_platform_coins: coins,
            ..EngineConfig::default()
        })
        .await
        .unwrap();

        engine
            .register_principal(ROOT, "orga", Role::OrgAdmin, Some("org-1".to_string()))
            .await
            .unwrap();
        engine
            .register_principal(ROOT, "staff-1", Role::Staff, Some("org-1".to_string()))
            .await
            .unwrap();
        engine
            .provision_wallet(ROOT, WalletOwner::Organization, "org-1")
            .await
            .unwrap();
        for student in ["alice", "bob", "carol"] {
            engine
                .register_principal(ROOT, student, Role::Student, Some("org-1".to_string()))
                .await
                .unwrap();
            engine
                .provision_wallet(ROOT, WalletOwner::Student, student)
                .await
                .unwrap();
        }
        engine
    }

    fn draft(reward_coins: u64, seats_total: u32) -> QuestDraft {
        QuestDraft {
            title: "Harbor cleanup".to_string(),
            description: "Pick up litter along the waterfront".to_string(),
            reward_coins,
            seats_total,
            quiz: None,
        }
    }

    fn quiz_draft(reward_coins: u64) -> QuestDraft {
        QuestDraft {
            title: "Tide tables".to_string(),
            description: "Read the chart and answer".to_string(),
            reward_coins,
            seats_total: 0,
            quiz: Some(QuizConfig {
                answer_key: 2,
                option_count: 4,
            }),
        }
    }

    async fn approved_quest(engine: &QuestBankEngine, draft: QuestDraft) -> Quest {
        let quest = engine.create_quest("staff-1", draft).await.unwrap();
        engine.submit_quest("staff-1", &quest.id).await.unwrap();
        engine.approve_quest(ROOT, &quest.id).await.unwrap().quest
    }

    #[tokio::test]
    async fn approval_with_insufficient_platform_funds_changes_nothing() {
        let engine = engine_with(500).await;
        let quest = engine.create_quest("staff-1", draft(1000, 0)).await.unwrap();
        engine.submit_quest("staff-1", &quest.id).await.unwrap();

        let err = engine.approve_quest(ROOT, &quest.id).await.unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_FUNDS");

        let quest = engine.get_quest(&quest.id).await.unwrap();
        assert_eq!(quest.status, QuestStatus::Submitted);
        assert!(quest.approver.is_none());
        assert_eq!(engine.platform_balance(ROOT).await.unwrap().balance, 500);
        assert!(engine.audit_ledger().await.is_clean());
    }

    #[tokio::test]
    async fn approval_debits_the_platform_exactly_once() {
        let engine = engine_with(10_000).await;
        let quest = engine.create_quest("staff-1", draft(150, 0)).await.unwrap();
        engine.submit_quest("staff-1", &quest.id).await.unwrap();

        let outcome = engine.approve_quest(ROOT, &quest.id).await.unwrap();
        assert_eq!(outcome.quest.status, QuestStatus::Approved);
        assert!(outcome.quest.active);
        assert_eq!(outcome.platform_balance, 9_850);

        let page = engine.my_ledger(ROOT, 10, 0).await.unwrap();
        let debits: Vec<_> = page
            .entries
            .iter()
            .filter(|entry| entry.direction == EntryDirection::Debit)
            .collect();
        assert_eq!(debits.len(), 1);
        assert_eq!(debits[0].amount, 150);
        assert_eq!(debits[0].linked_entity.as_deref(), Some(quest.id.as_str()));

        let err = engine.approve_quest(ROOT, &quest.id).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");
        assert_eq!(engine.platform_balance(ROOT).await.unwrap().balance, 9_850);
    }

    #[tokio::test]
    async fn two_seats_fill_and_the_third_student_is_turned_away() {
        let engine = engine_with(1_000).await;
        let quest = approved_quest(&engine, draft(100, 2)).await;

        engine.reserve_seat("alice", &quest.id).await.unwrap();
        engine.reserve_seat("bob", &quest.id).await.unwrap();

        let err = engine.reserve_seat("carol", &quest.id).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");
        assert_eq!(engine.get_quest(&quest.id).await.unwrap().seats_taken, 2);
    }

    #[tokio::test]
    async fn concurrent_reservations_for_the_last_seat_admit_exactly_one() {
        let engine = Arc::new(engine_with(1_000).await);
        let quest = approved_quest(&engine, draft(100, 1)).await;

        let first = {
            let engine = Arc::clone(&engine);
            let quest_id = quest.id.clone();
            tokio::spawn(async move { engine.reserve_seat("alice", &quest_id).await })
        };
        let second = {
            let engine = Arc::clone(&engine);
            let quest_id = quest.id.clone();
            tokio::spawn(async move { engine.reserve_seat("bob", &quest_id).await })
        };

        let results = [first.await.unwrap(), second.await.unwrap()];
        let admitted = results.iter().filter(|result| result.is_ok()).count();
        assert_eq!(admitted, 1);
        assert_eq!(
            results
                .iter()
                .filter_map(|result| result.as_ref().err())
                .next()
                .map(|err| err.code()),
            Some("INVALID_STATE")
        );
        assert_eq!(engine.get_quest(&quest.id).await.unwrap().seats_taken, 1);
    }

    #[tokio::test]
    async fn cancelling_a_seat_reopens_it() {
        let engine = engine_with(1_000).await;
        let quest = approved_quest(&engine, draft(100, 1)).await;

        engine.reserve_seat("alice", &quest.id).await.unwrap();
        engine.cancel_seat("alice", &quest.id).await.unwrap();
        engine.reserve_seat("bob", &quest.id).await.unwrap();
        assert_eq!(engine.get_quest(&quest.id).await.unwrap().seats_taken, 1);
    }

    #[tokio::test]
    async fn correct_answer_pays_the_reward_exactly_once() {
        let engine = engine_with(1_000).await;
        let quest = approved_quest(&engine, quiz_draft(100)).await;

        let submission = engine.submit_answer("alice", &quest.id, 2).await.unwrap();
        assert_eq!(submission.status, SubmissionStatus::Accepted);
        assert_eq!(engine.my_wallet("alice").await.unwrap().balance, 100);

        let err = engine.submit_answer("alice", &quest.id, 2).await.unwrap_err();
        assert_eq!(err.code(), "ALREADY_EXISTS");
        assert_eq!(engine.my_wallet("alice").await.unwrap().balance, 100);

        let page = engine.my_ledger("alice", 10, 0).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.entries[0].reason, "quest reward");
        assert_eq!(page.entries[0].actor, SYSTEM_ACTOR);
    }

    #[tokio::test]
    async fn wrong_answer_is_rejected_without_payout() {
        let engine = engine_with(1_000).await;
        let quest = approved_quest(&engine, quiz_draft(100)).await;

        let submission = engine.submit_answer("alice", &quest.id, 0).await.unwrap();
        assert_eq!(submission.status, SubmissionStatus::Rejected);
        assert_eq!(submission.score, Some(0));
        assert_eq!(engine.my_wallet("alice").await.unwrap().balance, 0);

        // The wrong attempt still consumed the single allowed submission.
        let err = engine.submit_answer("alice", &quest.id, 2).await.unwrap_err();
        assert_eq!(err.code(), "ALREADY_EXISTS");
    }

    #[tokio::test]
    async fn rejected_quest_can_be_revised_and_resubmitted() {
        let engine = engine_with(1_000).await;
        let quest = engine.create_quest("staff-1", draft(100, 0)).await.unwrap();
        engine.submit_quest("staff-1", &quest.id).await.unwrap();
        engine
            .reject_quest(ROOT, &quest.id, "reward too high")
            .await
            .unwrap();

        let revised = engine
            .revise_quest("staff-1", &quest.id, draft(50, 0))
            .await
            .unwrap();
        assert_eq!(revised.status, QuestStatus::Draft);
        assert!(revised.rejection_reason.is_none());

        engine.submit_quest("staff-1", &quest.id).await.unwrap();
        let outcome = engine.approve_quest(ROOT, &quest.id).await.unwrap();
        assert_eq!(outcome.quest.reward_coins, 50);
    }

    #[tokio::test]
    async fn students_cannot_create_or_approve_quests() {
        let engine = engine_with(1_000).await;
        let err = engine.create_quest("alice", draft(100, 0)).await.unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");

        let quest = engine.create_quest("staff-1", draft(100, 0)).await.unwrap();
        engine.submit_quest("staff-1", &quest.id).await.unwrap();
        let err = engine.approve_quest("orga", &quest.id).await.unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");
    }

    #[tokio::test]
    async fn role_downgrade_is_seen_by_the_very_next_operation() {
        let engine = engine_with(1_000).await;
        engine.create_quest("orga", draft(100, 0)).await.unwrap();

        engine
            .register_principal(ROOT, "orga", Role::Student, Some("org-1".to_string()))
            .await
            .unwrap();
        let err = engine.create_quest("orga", draft(100, 0)).await.unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");
    }

    #[tokio::test]
    async fn engagement_distribution_pays_every_recipient_once() {
        let engine = engine_with(10_000).await;
        engine.grant_to_org(ROOT, "org-1", 2_000).await.unwrap();

        let engagement = engine
            .create_engagement("orga", "Spring cohort")
            .await
            .unwrap();
        engine
            .fund_engagement("orga", &engagement.id, 500, None)
            .await
            .unwrap();
        engine
            .upsert_recipient("orga", &engagement.id, "alice", 300)
            .await
            .unwrap();
        engine
            .upsert_recipient("orga", &engagement.id, "bob", 150)
            .await
            .unwrap();

        let summary = engine
            .distribute_engagement("orga", &engagement.id)
            .await
            .unwrap();
        assert_eq!(summary.total_amount, 450);
        assert_eq!(summary.transfers.len(), 2);
        assert_eq!(engine.my_wallet("alice").await.unwrap().balance, 300);
        assert_eq!(engine.my_wallet("bob").await.unwrap().balance, 150);
        assert_eq!(engine.my_wallet("orga").await.unwrap().balance, 1_500);

        let engagement = engine.get_engagement(&engagement.id).await.unwrap();
        assert_eq!(engagement.status, crate::types::EngagementStatus::Distributed);
        assert_eq!(engagement.remaining(), 50);

        let err = engine
            .distribute_engagement("orga", &engagement.id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");
        assert_eq!(engine.my_wallet("alice").await.unwrap().balance, 300);
        assert!(engine.audit_ledger().await.is_clean());
    }

    #[tokio::test]
    async fn distribution_with_a_missing_recipient_wallet_moves_no_coins() {
        let engine = engine_with(10_000).await;
        engine.grant_to_org(ROOT, "org-1", 2_000).await.unwrap();
        engine
            .register_principal(ROOT, "dave", Role::Student, Some("org-1".to_string()))
            .await
            .unwrap();

        let engagement = engine
            .create_engagement("orga", "Spring cohort")
            .await
            .unwrap();
        engine
            .fund_engagement("orga", &engagement.id, 500, None)
            .await
            .unwrap();
        engine
            .upsert_recipient("orga", &engagement.id, "alice", 100)
            .await
            .unwrap();
        // dave has a principal but no wallet yet.
        engine
            .upsert_recipient("orga", &engagement.id, "dave", 100)
            .await
            .unwrap();

        let err = engine
            .distribute_engagement("orga", &engagement.id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
        assert_eq!(engine.my_wallet("alice").await.unwrap().balance, 0);

        let engagement_after = engine.get_engagement(&engagement.id).await.unwrap();
        assert_eq!(
            engagement_after.status,
            crate::types::EngagementStatus::Active
        );
        assert_eq!(engagement_after.remaining(), 500);
        assert!(engine.audit_ledger().await.is_clean());

        engine
            .provision_wallet(ROOT, WalletOwner::Student, "dave")
            .await
            .unwrap();
        let summary = engine
            .distribute_engagement("orga", &engagement.id)
            .await
            .unwrap();
        assert_eq!(summary.total_amount, 200);
    }

    #[tokio::test]
    async fn engagement_operations_are_org_scoped() {
        let engine = engine_with(10_000).await;
        engine.grant_to_org(ROOT, "org-1", 1_000).await.unwrap();
        engine
            .register_principal(ROOT, "outsider", Role::Staff, Some("org-2".to_string()))
            .await
            .unwrap();

        let engagement = engine
            .create_engagement("orga", "Spring cohort")
            .await
            .unwrap();
        let err = engine
            .fund_engagement("outsider", &engagement.id, 100, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");
        let err = engine
            .upsert_recipient("outsider", &engagement.id, "alice", 50)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");
    }

    #[tokio::test]
    async fn funding_beyond_the_org_balance_is_rejected() {
        let engine = engine_with(10_000).await;
        engine.grant_to_org(ROOT, "org-1", 100).await.unwrap();

        let engagement = engine
            .create_engagement("orga", "Spring cohort")
            .await
            .unwrap();
        let err = engine
            .fund_engagement("orga", &engagement.id, 500, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_FUNDS");
        assert_eq!(engine.my_wallet("orga").await.unwrap().balance, 100);
    }

    #[tokio::test]
    async fn ledger_stays_balanced_across_mixed_operations() {
        let engine = engine_with(10_000).await;
        engine.grant_to_org(ROOT, "org-1", 2_000).await.unwrap();

        let quest = approved_quest(&engine, quiz_draft(150)).await;
        engine.submit_answer("alice", &quest.id, 2).await.unwrap();

        let engagement = engine
            .create_engagement("orga", "Spring cohort")
            .await
            .unwrap();
        engine
            .fund_engagement("orga", &engagement.id, 400, Some("spring budget"))
            .await
            .unwrap();
        engine
            .upsert_recipient("orga", &engagement.id, "bob", 250)
            .await
            .unwrap();
        engine
            .distribute_engagement("orga", &engagement.id)
            .await
            .unwrap();

        let audit = engine.audit_ledger().await;
        assert!(audit.chain_verified);
        assert!(audit.unbalanced_wallets.is_empty());
        assert!(audit.wallets_checked >= 6);
    }

    #[tokio::test]
    async fn my_ledger_pages_newest_first() {
        let engine = engine_with(10_000).await;
        engine.grant_to_org(ROOT, "org-1", 100).await.unwrap();
        engine.grant_to_org(ROOT, "org-1", 200).await.unwrap();
        engine.grant_to_org(ROOT, "org-1", 300).await.unwrap();

        let page = engine.my_ledger("orga", 2, 0).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.entries.len(), 2);
        assert_eq!(page.entries[0].amount, 300);
        assert_eq!(page.entries[1].amount, 200);

        let tail = engine.my_ledger("orga", 2, 2).await.unwrap();
        assert_eq!(tail.entries.len(), 1);
        assert_eq!(tail.entries[0].amount, 100);
    }

    #[tokio::test]
    async fn org_admins_register_only_inside_their_org() {
        let engine = engine_with(1_000).await;

        engine
            .register_principal("orga", "newbie", Role::Student, Some("org-1".to_string()))
            .await
            .unwrap();

        let err = engine
            .register_principal("orga", "spy", Role::Student, Some("org-2".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");

        let err = engine
            .register_principal("orga", "usurper", Role::MasterAdmin, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");
    }

    #[tokio::test]
    async fn approval_emits_a_post_commit_event() {
        let engine = engine_with(1_000).await;
        let mut events = engine.subscribe();

        let quest = approved_quest(&engine, draft(100, 0)).await;
        loop {
            match events.recv().await.unwrap() {
                DomainEvent::QuestApproved {
                    quest_id,
                    reward_coins,
                    ..
                } => {
                    assert_eq!(quest_id, quest.id);
                    assert_eq!(reward_coins, 100);
                    break;
                }
                _ => continue,
            }
        }
    }
}
