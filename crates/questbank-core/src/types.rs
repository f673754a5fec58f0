use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed role set for the authorization gate.
///
/// Roles are resolved from the principal directory at call time inside each
/// operation's critical section, never cached across calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    MasterAdmin,
    OrgAdmin,
    Staff,
    Student,
}

impl Role {
    pub fn name(self) -> &'static str {
        match self {
            Self::MasterAdmin => "master_admin",
            Self::OrgAdmin => "org_admin",
            Self::Staff => "staff",
            Self::Student => "student",
        }
    }
}

/// A known caller identity with its current role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: String,
    pub role: Role,
    /// Present for org-scoped roles and students belonging to an org.
    pub org_id: Option<String>,
    pub registered_at: DateTime<Utc>,
}

/// Wallet owner kinds.
///
/// Engagement budget pools are wallets too, so every coin movement in the
/// system is a real debit/credit covered by the ledger sum invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletOwner {
    Platform,
    Organization,
    Student,
    Engagement,
}

impl WalletOwner {
    pub fn name(self) -> &'static str {
        match self {
            Self::Platform => "platform",
            Self::Organization => "organization",
            Self::Student => "student",
            Self::Engagement => "engagement",
        }
    }
}

/// A named non-negative coin balance. Never deleted once provisioned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub id: String,
    pub owner: WalletOwner,
    pub owner_id: String,
    pub balance: u64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestStatus {
    Draft,
    Submitted,
    Approved,
    Rejected,
}

impl QuestStatus {
    pub fn name(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

/// MCQ answer key for quests that carry a quiz assessment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QuizConfig {
    /// Zero-based index of the correct option.
    pub answer_key: u32,
    pub option_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quest {
    pub id: String,
    pub org_id: String,
    pub title: String,
    pub description: String,
    pub reward_coins: u64,
    pub status: QuestStatus,
    /// Grading only runs for approved quests that are also active.
    pub active: bool,
    /// `seats_total == 0` means unlimited capacity.
    pub seats_total: u32,
    pub seats_taken: u32,
    pub quiz: Option<QuizConfig>,
    pub creator: String,
    pub approver: Option<String>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Quest {
    pub fn unlimited_seats(&self) -> bool {
        self.seats_total == 0
    }
}

/// Creation/revision payload for a quest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestDraft {
    pub title: String,
    pub description: String,
    pub reward_coins: u64,
    pub seats_total: u32,
    pub quiz: Option<QuizConfig>,
}

/// A student's claim on one seat of a quest. Unique per `(quest, user)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub quest_id: String,
    pub user_id: String,
    pub reserved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Pending,
    Accepted,
    Rejected,
}

/// A graded attempt at a quest's assessment. Unique per `(quest, user)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: String,
    pub quest_id: String,
    pub user_id: String,
    pub choice: u32,
    pub status: SubmissionStatus,
    pub score: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementStatus {
    Active,
    Distributed,
}

/// Org-scoped budget pool earmarked for distribution to specific recipients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Engagement {
    pub id: String,
    pub org_id: String,
    pub name: String,
    pub budget_total: u64,
    pub total_distributed: u64,
    pub status: EngagementStatus,
    /// Budget pool wallet; its balance is the remaining budget.
    pub wallet_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Engagement {
    pub fn remaining(&self) -> u64 {
        self.budget_total.saturating_sub(self.total_distributed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementRecipient {
    pub engagement_id: String,
    pub user_id: String,
    pub planned_amount: u64,
    pub updated_at: DateTime<Utc>,
}

/// Result of `approve_quest`: the updated quest plus the remaining
/// platform balance after the funding debit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalOutcome {
    pub quest: Quest,
    pub platform_balance: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientTransfer {
    pub user_id: String,
    pub amount: u64,
}

/// Summary returned from a successful `distribute_engagement`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionSummary {
    pub engagement_id: String,
    pub transfers: Vec<RecipientTransfer>,
    pub total_amount: u64,
    pub distributed_at: DateTime<Utc>,
}

/// Platform balance snapshot for the master admin dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformBalance {
    pub balance: u64,
    pub updated_at: DateTime<Utc>,
}
