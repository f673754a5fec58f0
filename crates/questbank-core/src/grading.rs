use crate::error::CoreError;
use crate::types::{Quest, QuestStatus, Submission, SubmissionStatus};
use chrono::Utc;
use std::collections::HashMap;
use uuid::Uuid;

/// Submission log for MCQ quests.
///
/// Exactly one graded attempt per `(quest, user)`; the uniqueness guard is
/// what makes client retries idempotent-safe and rules out double payout.
/// `grade` validates and produces the graded row without recording it; the
/// engine records it together with the reward credit in one atomic unit.
#[derive(Debug, Default, Clone)]
pub struct SubmissionLog {
    submissions: HashMap<(String, String), Submission>,
}

impl SubmissionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grade one answer against the quest's configured key.
    pub fn grade(
        &self,
        quest: &Quest,
        user_id: &str,
        choice: u32,
    ) -> Result<Submission, CoreError> {
        let key = (quest.id.clone(), user_id.to_string());
        if self.submissions.contains_key(&key) {
            return Err(CoreError::AlreadyExists(format!(
                "user '{user_id}' already submitted an answer for quest '{}'",
                quest.id
            )));
        }

        if quest.status != QuestStatus::Approved || !quest.active {
            return Err(CoreError::InvalidState(format!(
                "quest '{}' is not open for submissions",
                quest.id
            )));
        }

        let quiz = quest.quiz.as_ref().ok_or_else(|| {
            CoreError::InvalidState(format!(
                "quest '{}' has no quiz configuration",
                quest.id
            ))
        })?;

        if choice >= quiz.option_count {
            return Err(CoreError::InvalidInput(format!(
                "choice {} is out of range for {} options",
                choice, quiz.option_count
            )));
        }

        let correct = choice == quiz.answer_key;
        let now = Utc::now();
        Ok(Submission {
            id: Uuid::new_v4().to_string(),
            quest_id: quest.id.clone(),
            user_id: user_id.to_string(),
            choice,
            status: if correct {
                SubmissionStatus::Accepted
            } else {
                SubmissionStatus::Rejected
            },
            score: Some(if correct { 100 } else { 0 }),
            created_at: now,
            reviewed_at: Some(now),
        })
    }

    /// Record a graded submission. Runs after any payout has been committed.
    pub fn record(&mut self, submission: Submission) {
        let key = (submission.quest_id.clone(), submission.user_id.clone());
        self.submissions.insert(key, submission);
    }

    pub fn get(&self, quest_id: &str, user_id: &str) -> Option<&Submission> {
        self.submissions
            .get(&(quest_id.to_string(), user_id.to_string()))
    }
}
