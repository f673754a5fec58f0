use crate::error::CoreError;
use crate::types::{Quest, QuestDraft, QuestStatus};
use chrono::Utc;
use std::collections::HashMap;
use uuid::Uuid;

/// Quest table plus the lifecycle state machine.
///
/// Transitions are explicit guarded methods so accidental skips cannot
/// happen silently: draft -> submitted -> approved | rejected, and
/// rejected -> draft when the creator revises. The platform funding debit
/// that accompanies approval is composed by the engine; `mark_approved`
/// only runs after that debit has been validated and committed.
#[derive(Debug, Default, Clone)]
pub struct QuestBoard {
    quests: HashMap<String, Quest>,
}

impl QuestBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(
        &mut self,
        org_id: &str,
        creator: &str,
        draft: QuestDraft,
    ) -> Result<Quest, CoreError> {
        validate_draft(&draft)?;

        let now = Utc::now();
        let quest = Quest {
            id: Uuid::new_v4().to_string(),
            org_id: org_id.to_string(),
            title: draft.title,
            description: draft.description,
            reward_coins: draft.reward_coins,
            status: QuestStatus::Draft,
            active: false,
            seats_total: draft.seats_total,
            seats_taken: 0,
            quiz: draft.quiz,
            creator: creator.to_string(),
            approver: None,
            rejection_reason: None,
            created_at: now,
            updated_at: now,
        };
        self.quests.insert(quest.id.clone(), quest.clone());
        Ok(quest)
    }

    pub fn get(&self, quest_id: &str) -> Result<&Quest, CoreError> {
        self.quests
            .get(quest_id)
            .ok_or_else(|| CoreError::not_found("quest", quest_id))
    }

    pub fn get_mut(&mut self, quest_id: &str) -> Result<&mut Quest, CoreError> {
        self.quests
            .get_mut(quest_id)
            .ok_or_else(|| CoreError::not_found("quest", quest_id))
    }

    /// Creator submits a draft for platform review.
    pub fn submit(&mut self, quest_id: &str, actor: &str) -> Result<Quest, CoreError> {
        let quest = self.get_mut(quest_id)?;
        if quest.creator != actor {
            return Err(CoreError::forbidden(format!(
                "only the creator may submit quest '{quest_id}'"
            )));
        }
        expect_status(quest, QuestStatus::Draft)?;
        quest.status = QuestStatus::Submitted;
        quest.updated_at = Utc::now();
        Ok(quest.clone())
    }

    /// Creator edits a draft or rejected quest; either way it lands back in draft.
    pub fn revise(
        &mut self,
        quest_id: &str,
        actor: &str,
        draft: QuestDraft,
    ) -> Result<Quest, CoreError> {
        validate_draft(&draft)?;

        let quest = self.get_mut(quest_id)?;
        if quest.creator != actor {
            return Err(CoreError::forbidden(format!(
                "only the creator may revise quest '{quest_id}'"
            )));
        }
        if !matches!(quest.status, QuestStatus::Draft | QuestStatus::Rejected) {
            return Err(CoreError::InvalidState(format!(
                "quest '{quest_id}' is {}, expected draft or rejected",
                quest.status.name()
            )));
        }
        if draft.seats_total != 0 && draft.seats_total < quest.seats_taken {
            return Err(CoreError::InvalidInput(format!(
                "seats_total {} is below {} seats already taken",
                draft.seats_total, quest.seats_taken
            )));
        }

        quest.title = draft.title;
        quest.description = draft.description;
        quest.reward_coins = draft.reward_coins;
        quest.seats_total = draft.seats_total;
        quest.quiz = draft.quiz;
        quest.status = QuestStatus::Draft;
        quest.rejection_reason = None;
        quest.updated_at = Utc::now();
        Ok(quest.clone())
    }

    /// Validate that a quest can be approved right now. Run before the
    /// funding debit; `mark_approved` runs after it.
    pub fn prepare_approval(&self, quest_id: &str) -> Result<&Quest, CoreError> {
        let quest = self.get(quest_id)?;
        expect_status(quest, QuestStatus::Submitted)?;
        Ok(quest)
    }

    pub fn mark_approved(&mut self, quest_id: &str, approver: &str) -> Result<Quest, CoreError> {
        let quest = self.get_mut(quest_id)?;
        expect_status(quest, QuestStatus::Submitted)?;
        quest.status = QuestStatus::Approved;
        quest.active = true;
        quest.approver = Some(approver.to_string());
        quest.updated_at = Utc::now();
        Ok(quest.clone())
    }

    pub fn mark_rejected(
        &mut self,
        quest_id: &str,
        reason: &str,
    ) -> Result<Quest, CoreError> {
        if reason.trim().is_empty() {
            return Err(CoreError::InvalidInput(
                "rejection reason must not be empty".to_string(),
            ));
        }
        let quest = self.get_mut(quest_id)?;
        expect_status(quest, QuestStatus::Submitted)?;
        quest.status = QuestStatus::Rejected;
        quest.rejection_reason = Some(reason.to_string());
        quest.updated_at = Utc::now();
        Ok(quest.clone())
    }

    pub fn set_active(&mut self, quest_id: &str, active: bool) -> Result<Quest, CoreError> {
        let quest = self.get_mut(quest_id)?;
        expect_status(quest, QuestStatus::Approved)?;
        quest.active = active;
        quest.updated_at = Utc::now();
        Ok(quest.clone())
    }
}

fn validate_draft(draft: &QuestDraft) -> Result<(), CoreError> {
    if draft.title.trim().is_empty() {
        return Err(CoreError::InvalidInput(
            "quest title must not be empty".to_string(),
        ));
    }
    if draft.reward_coins == 0 {
        return Err(CoreError::InvalidInput(
            "reward_coins must be positive".to_string(),
        ));
    }
    if let Some(quiz) = &draft.quiz {
        if quiz.option_count < 2 {
            return Err(CoreError::InvalidInput(
                "quiz must offer at least two options".to_string(),
            ));
        }
        if quiz.answer_key >= quiz.option_count {
            return Err(CoreError::InvalidInput(format!(
                "answer_key {} is out of range for {} options",
                quiz.answer_key, quiz.option_count
            )));
        }
    }
    Ok(())
}

fn expect_status(quest: &Quest, expected: QuestStatus) -> Result<(), CoreError> {
    if quest.status != expected {
        return Err(CoreError::InvalidState(format!(
            "quest '{}' is {}, expected {}",
            quest.id,
            quest.status.name(),
            expected.name()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> QuestDraft {
        QuestDraft {
            title: "Harbor cleanup".to_string(),
            description: "Collect 10 samples".to_string(),
            reward_coins: 150,
            seats_total: 2,
            quiz: None,
        }
    }

    #[test]
    fn lifecycle_happy_path() {
        let mut board = QuestBoard::new();
        let quest = board.create("org-1", "staff-1", draft()).unwrap();
        assert_eq!(quest.status, QuestStatus::Draft);

        board.submit(&quest.id, "staff-1").unwrap();
        board.prepare_approval(&quest.id).unwrap();
        let approved = board.mark_approved(&quest.id, "root").unwrap();
        assert_eq!(approved.status, QuestStatus::Approved);
        assert!(approved.active);
        assert_eq!(approved.approver.as_deref(), Some("root"));
    }

    #[test]
    fn only_creator_may_submit() {
        let mut board = QuestBoard::new();
        let quest = board.create("org-1", "staff-1", draft()).unwrap();

        let err = board.submit(&quest.id, "staff-2").unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");
    }

    #[test]
    fn approving_twice_is_invalid_state() {
        let mut board = QuestBoard::new();
        let quest = board.create("org-1", "staff-1", draft()).unwrap();
        board.submit(&quest.id, "staff-1").unwrap();
        board.mark_approved(&quest.id, "root").unwrap();

        let err = board.prepare_approval(&quest.id).unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");
    }

    #[test]
    fn rejected_quest_can_be_revised_and_resubmitted() {
        let mut board = QuestBoard::new();
        let quest = board.create("org-1", "staff-1", draft()).unwrap();
        board.submit(&quest.id, "staff-1").unwrap();
        board.mark_rejected(&quest.id, "reward too high").unwrap();

        let mut revision = draft();
        revision.reward_coins = 80;
        let revised = board.revise(&quest.id, "staff-1", revision).unwrap();
        assert_eq!(revised.status, QuestStatus::Draft);
        assert!(revised.rejection_reason.is_none());

        let submitted = board.submit(&quest.id, "staff-1").unwrap();
        assert_eq!(submitted.status, QuestStatus::Submitted);
    }

    #[test]
    fn zero_reward_is_invalid() {
        let mut board = QuestBoard::new();
        let mut bad = draft();
        bad.reward_coins = 0;
        let err = board.create("org-1", "staff-1", bad).unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[test]
    fn quiz_answer_key_must_be_in_range() {
        let mut board = QuestBoard::new();
        let mut bad = draft();
        bad.quiz = Some(crate::types::QuizConfig {
            answer_key: 4,
            option_count: 4,
        });
        let err = board.create("org-1", "staff-1", bad).unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }
}
