use async_trait::async_trait;
use serde::Serialize;

/// Post-commit domain events.
///
/// Events are emitted strictly after the state lock is released, never
/// inside an atomic operation, so notification delivery can neither delay
/// nor roll back a committed transaction.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum DomainEvent {
    QuestApproved {
        quest_id: String,
        approver: String,
        reward_coins: u64,
    },
    QuestRejected {
        quest_id: String,
        reason: String,
    },
    SeatReserved {
        quest_id: String,
        user_id: String,
    },
    SeatCancelled {
        quest_id: String,
        user_id: String,
    },
    SubmissionGraded {
        quest_id: String,
        user_id: String,
        accepted: bool,
        amount_credited: u64,
    },
    EngagementFunded {
        engagement_id: String,
        amount: u64,
    },
    EngagementDistributed {
        engagement_id: String,
        recipient_count: usize,
        total_amount: u64,
    },
}

/// Out-of-band consumer of domain events (email, push, dashboards).
///
/// Sinks are best-effort: the core never waits on delivery and a failing
/// sink must not surface errors back into wallet/ledger/seat state.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: &DomainEvent);
}
