//! QuestBank core: coin economy and capacity engine.
//!
//! This crate enforces the economic invariants behind quests, seats, and
//! engagements: non-negative multi-tier wallets, a hash-chained append-only
//! coin ledger, role gating resolved inside each operation's critical
//! section, and all-or-nothing multi-entry transfers.

#![deny(unsafe_code)]

pub mod auth;
pub mod engagements;
pub mod engine;
pub mod error;
pub mod events;
pub mod grading;
pub mod ledger;
pub mod quests;
pub mod seats;
pub mod storage;
pub mod types;
pub mod wallets;

pub use auth::PrincipalDirectory;
pub use engagements::EngagementBook;
pub use engine::{EngineConfig, LedgerAudit, LedgerPage, QuestBankEngine};
pub use error::CoreError;
pub use events::{DomainEvent, NotificationSink};
pub use grading::SubmissionLog;
pub use ledger::{EntryDirection, LedgerBatch, LedgerEntry, LedgerJournal};
pub use quests::QuestBoard;
pub use seats::EnrollmentBook;
pub use storage::{LedgerStorageConfig, PersistentJournal};
pub use types::{
    ApprovalOutcome, DistributionSummary, Engagement, EngagementRecipient, EngagementStatus,
    Enrollment, PlatformBalance, Principal, Quest, QuestDraft, QuestStatus, QuizConfig,
    RecipientTransfer, Role, Submission, SubmissionStatus, Wallet, WalletOwner,
};
pub use wallets::WalletStore;
