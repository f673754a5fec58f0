use crate::error::CoreError;
use crate::types::{Enrollment, Quest, QuestStatus};
use chrono::Utc;
use std::collections::HashMap;

/// Seat reservation book.
///
/// The capacity check and the `seats_taken` increment happen in the same
/// call while the engine holds the state lock, so two concurrent
/// reservations for the last seat can never both succeed: one observes the
/// incremented counter and fails with `INVALID_STATE`.
#[derive(Debug, Default, Clone)]
pub struct EnrollmentBook {
    enrollments: HashMap<(String, String), Enrollment>,
}

impl EnrollmentBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve one seat on a quest for a student.
    ///
    /// `seats_total == 0` means unlimited capacity: the check is skipped but
    /// the enrollment is still recorded for tracking.
    pub fn reserve(&mut self, quest: &mut Quest, user_id: &str) -> Result<Enrollment, CoreError> {
        if quest.status != QuestStatus::Approved {
            return Err(CoreError::InvalidState(format!(
                "quest '{}' is {}, only approved quests accept reservations",
                quest.id,
                quest.status.name()
            )));
        }

        let key = (quest.id.clone(), user_id.to_string());
        if self.enrollments.contains_key(&key) {
            return Err(CoreError::AlreadyExists(format!(
                "user '{user_id}' already holds a seat on quest '{}'",
                quest.id
            )));
        }

        if !quest.unlimited_seats() && quest.seats_taken >= quest.seats_total {
            return Err(CoreError::InvalidState(format!(
                "quest '{}' is full ({}/{} seats taken)",
                quest.id, quest.seats_taken, quest.seats_total
            )));
        }

        let enrollment = Enrollment {
            quest_id: quest.id.clone(),
            user_id: user_id.to_string(),
            reserved_at: Utc::now(),
        };
        self.enrollments.insert(key, enrollment.clone());
        quest.seats_taken += 1;
        Ok(enrollment)
    }

    /// Release a previously reserved seat. `seats_taken` is floored at zero.
    pub fn cancel(&mut self, quest: &mut Quest, user_id: &str) -> Result<(), CoreError> {
        let key = (quest.id.clone(), user_id.to_string());
        if self.enrollments.remove(&key).is_none() {
            return Err(CoreError::NotFound(format!(
                "no reservation for user '{user_id}' on quest '{}'",
                quest.id
            )));
        }
        quest.seats_taken = quest.seats_taken.saturating_sub(1);
        Ok(())
    }

    pub fn get(&self, quest_id: &str, user_id: &str) -> Option<&Enrollment> {
        self.enrollments
            .get(&(quest_id.to_string(), user_id.to_string()))
    }

    pub fn count_for_quest(&self, quest_id: &str) -> usize {
        self.enrollments
            .keys()
            .filter(|(quest, _)| quest == quest_id)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::QuestStatus;
    use chrono::Utc;

    fn approved_quest(seats_total: u32) -> Quest {
        let now = Utc::now();
        Quest {
            id: "quest-1".to_string(),
            org_id: "org-1".to_string(),
            title: "Harbor cleanup".to_string(),
            description: String::new(),
            reward_coins: 100,
            status: QuestStatus::Approved,
            active: true,
            seats_total,
            seats_taken: 0,
            quiz: None,
            creator: "staff-1".to_string(),
            approver: Some("root".to_string()),
            rejection_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn fills_seats_then_rejects_with_invalid_state() {
        let mut book = EnrollmentBook::new();
        let mut quest = approved_quest(2);

        book.reserve(&mut quest, "alice").unwrap();
        book.reserve(&mut quest, "bob").unwrap();
        assert_eq!(quest.seats_taken, 2);

        let err = book.reserve(&mut quest, "carol").unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");
        assert_eq!(quest.seats_taken, 2);
    }

    #[test]
    fn duplicate_reservation_is_already_exists() {
        let mut book = EnrollmentBook::new();
        let mut quest = approved_quest(2);

        book.reserve(&mut quest, "alice").unwrap();
        let err = book.reserve(&mut quest, "alice").unwrap_err();
        assert_eq!(err.code(), "ALREADY_EXISTS");
        assert_eq!(quest.seats_taken, 1);
    }

    #[test]
    fn zero_seats_total_is_unlimited_but_tracked() {
        let mut book = EnrollmentBook::new();
        let mut quest = approved_quest(0);

        for user in ["alice", "bob", "carol", "dave"] {
            book.reserve(&mut quest, user).unwrap();
        }
        assert_eq!(quest.seats_taken, 4);
        assert_eq!(book.count_for_quest(&quest.id), 4);
    }

    #[test]
    fn cancel_frees_the_seat() {
        let mut book = EnrollmentBook::new();
        let mut quest = approved_quest(1);

        book.reserve(&mut quest, "alice").unwrap();
        let err = book.reserve(&mut quest, "bob").unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");

        book.cancel(&mut quest, "alice").unwrap();
        assert_eq!(quest.seats_taken, 0);
        book.reserve(&mut quest, "bob").unwrap();
    }

    #[test]
    fn cancel_without_reservation_is_not_found() {
        let mut book = EnrollmentBook::new();
        let mut quest = approved_quest(1);

        let err = book.cancel(&mut quest, "alice").unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn draft_quest_rejects_reservations() {
        let mut book = EnrollmentBook::new();
        let mut quest = approved_quest(1);
        quest.status = QuestStatus::Draft;

        let err = book.reserve(&mut quest, "alice").unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");
    }
}
