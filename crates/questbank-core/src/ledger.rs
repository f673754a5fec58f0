use crate::error::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Direction of a balance change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryDirection {
    Debit,
    Credit,
}

impl EntryDirection {
    pub fn name(self) -> &'static str {
        match self {
            Self::Debit => "debit",
            Self::Credit => "credit",
        }
    }
}

/// Hash-chained, immutable audit record of one balance change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub index: u64,
    pub wallet_id: String,
    pub direction: EntryDirection,
    pub amount: u64,
    pub reason: String,
    /// Quest/engagement/submission id the movement is tied to, if any.
    pub linked_entity: Option<String>,
    pub actor: String,
    pub created_at: DateTime<Utc>,
    pub previous_hash: Option<String>,
    pub entry_hash: String,
}

/// Append-only ledger journal with hash-chain proofs.
///
/// No in-place mutation APIs are exposed. Every balance change becomes an
/// additional record, which preserves full historical accountability.
#[derive(Debug, Default, Clone)]
pub struct LedgerJournal {
    entries: Vec<LedgerEntry>,
}

impl LedgerJournal {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Rebuild a journal from persisted entries and verify hash-chain integrity.
    pub fn from_entries(entries: Vec<LedgerEntry>) -> Result<Self, CoreError> {
        let journal = Self { entries };

        for (expected_index, entry) in journal.entries.iter().enumerate() {
            if entry.index != expected_index as u64 {
                return Err(CoreError::Storage(format!(
                    "ledger index gap detected at position {} (found {})",
                    expected_index, entry.index
                )));
            }
        }

        if !journal.verify_chain() {
            return Err(CoreError::Storage(
                "persisted ledger hash-chain verification failed".to_string(),
            ));
        }

        Ok(journal)
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries touching one wallet, oldest first.
    pub fn entries_for_wallet(&self, wallet_id: &str) -> Vec<LedgerEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.wallet_id == wallet_id)
            .cloned()
            .collect()
    }

    /// Total credits and debits recorded against one wallet.
    pub fn wallet_totals(&self, wallet_id: &str) -> (u64, u64) {
        self.entries
            .iter()
            .filter(|entry| entry.wallet_id == wallet_id)
            .fold((0u64, 0u64), |(credits, debits), entry| {
                match entry.direction {
                    EntryDirection::Credit => (credits.saturating_add(entry.amount), debits),
                    EntryDirection::Debit => (credits, debits.saturating_add(entry.amount)),
                }
            })
    }

    pub fn verify_chain(&self) -> bool {
        let mut previous_hash: Option<String> = None;
        for entry in &self.entries {
            let expected_hash = compute_entry_hash(entry, previous_hash.as_deref());
            if entry.entry_hash != expected_hash {
                return false;
            }
            if entry.previous_hash != previous_hash {
                return false;
            }
            previous_hash = Some(entry.entry_hash.clone());
        }
        true
    }

    /// Start a batch chained onto the current journal tail.
    ///
    /// Entries built into the batch are not visible until `commit_batch`;
    /// the caller persists them externally first, then commits, so a failed
    /// persistence step leaves the in-memory chain untouched.
    pub fn begin_batch(&self) -> LedgerBatch {
        LedgerBatch {
            next_index: self.entries.len() as u64,
            previous_hash: self.entries.last().map(|entry| entry.entry_hash.clone()),
            entries: Vec::new(),
        }
    }

    /// Commit a pre-built batch after external durability succeeds.
    ///
    /// Index and chain continuity are rechecked entry by entry, so a batch
    /// built against a stale tail cannot land.
    pub fn commit_batch(&mut self, batch: LedgerBatch) -> Result<Vec<LedgerEntry>, CoreError> {
        let mut committed = Vec::with_capacity(batch.entries.len());
        for entry in batch.entries {
            self.commit_entry(entry.clone())?;
            committed.push(entry);
        }
        Ok(committed)
    }

    fn commit_entry(&mut self, entry: LedgerEntry) -> Result<(), CoreError> {
        let expected_index = self.entries.len() as u64;
        if entry.index != expected_index {
            return Err(CoreError::Storage(format!(
                "commit index mismatch: expected {}, got {}",
                expected_index, entry.index
            )));
        }

        let expected_previous_hash = self.entries.last().map(|e| e.entry_hash.clone());
        if entry.previous_hash != expected_previous_hash {
            return Err(CoreError::Storage(
                "commit previous hash mismatch".to_string(),
            ));
        }

        let expected_hash = compute_entry_hash(&entry, entry.previous_hash.as_deref());
        if entry.entry_hash != expected_hash {
            return Err(CoreError::Storage(
                "commit hash mismatch for ledger entry".to_string(),
            ));
        }

        self.entries.push(entry);
        Ok(())
    }
}

/// A sequence of ledger entries staged for one atomic operation.
#[derive(Debug, Clone)]
pub struct LedgerBatch {
    next_index: u64,
    previous_hash: Option<String>,
    entries: Vec<LedgerEntry>,
}

impl LedgerBatch {
    pub fn push(
        &mut self,
        wallet_id: &str,
        direction: EntryDirection,
        amount: u64,
        reason: &str,
        linked_entity: Option<&str>,
        actor: &str,
    ) -> Result<(), CoreError> {
        if amount == 0 {
            return Err(CoreError::InvalidInput(
                "ledger entry amount must be positive".to_string(),
            ));
        }

        let mut entry = LedgerEntry {
            id: Uuid::new_v4().to_string(),
            index: self.next_index,
            wallet_id: wallet_id.to_string(),
            direction,
            amount,
            reason: reason.to_string(),
            linked_entity: linked_entity.map(|value| value.to_string()),
            actor: actor.to_string(),
            created_at: Utc::now(),
            previous_hash: self.previous_hash.clone(),
            entry_hash: String::new(),
        };
        entry.entry_hash = compute_entry_hash(&entry, self.previous_hash.as_deref());

        self.next_index += 1;
        self.previous_hash = Some(entry.entry_hash.clone());
        self.entries.push(entry);
        Ok(())
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

fn compute_entry_hash(entry: &LedgerEntry, previous_hash: Option<&str>) -> String {
    let material = serde_json::json!({
        "index": entry.index,
        "wallet_id": entry.wallet_id,
        "direction": entry.direction.name(),
        "amount": entry.amount,
        "reason": entry.reason,
        "linked_entity": entry.linked_entity,
        "actor": entry.actor,
        "created_at": entry.created_at,
        "previous_hash": previous_hash,
    });

    let bytes = serde_json::to_vec(&material).unwrap_or_default();
    blake3::hash(&bytes).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_credit(journal: &mut LedgerJournal, wallet_id: &str, amount: u64) {
        let mut batch = journal.begin_batch();
        batch
            .push(wallet_id, EntryDirection::Credit, amount, "test credit", None, "tester")
            .unwrap();
        journal.commit_batch(batch).unwrap();
    }

    #[test]
    fn verifies_hash_chain() {
        let mut journal = LedgerJournal::new();
        push_credit(&mut journal, "wallet-a", 100);
        push_credit(&mut journal, "wallet-a", 40);

        assert_eq!(journal.len(), 2);
        assert!(journal.verify_chain());
    }

    #[test]
    fn detects_tampered_entries() {
        let mut journal = LedgerJournal::new();
        push_credit(&mut journal, "wallet-a", 100);

        let mut tampered = journal.clone();
        tampered.entries[0].amount = 1_000_000;

        assert!(!tampered.verify_chain());
    }

    #[test]
    fn rejects_zero_amount() {
        let journal = LedgerJournal::new();
        let mut batch = journal.begin_batch();
        let err = batch
            .push("wallet-a", EntryDirection::Debit, 0, "zero", None, "tester")
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[test]
    fn batch_entries_chain_through_each_other() {
        let mut journal = LedgerJournal::new();
        push_credit(&mut journal, "wallet-a", 100);

        let mut batch = journal.begin_batch();
        batch
            .push("wallet-a", EntryDirection::Debit, 30, "transfer", None, "tester")
            .unwrap();
        batch
            .push("wallet-b", EntryDirection::Credit, 30, "transfer", None, "tester")
            .unwrap();
        journal.commit_batch(batch).unwrap();

        assert_eq!(journal.len(), 3);
        assert!(journal.verify_chain());
        assert_eq!(journal.entries()[2].previous_hash.as_deref(), Some(journal.entries()[1].entry_hash.as_str()));
    }

    #[test]
    fn stale_batch_cannot_commit_after_interleaved_append() {
        let mut journal = LedgerJournal::new();
        let mut stale = journal.begin_batch();
        stale
            .push("wallet-a", EntryDirection::Credit, 10, "stale", None, "tester")
            .unwrap();

        push_credit(&mut journal, "wallet-a", 100);

        let err = journal.commit_batch(stale).unwrap_err();
        assert_eq!(err.code(), "STORAGE");
        assert_eq!(journal.len(), 1);
    }

    #[test]
    fn wallet_totals_sum_credits_and_debits() {
        let mut journal = LedgerJournal::new();
        push_credit(&mut journal, "wallet-a", 100);

        let mut batch = journal.begin_batch();
        batch
            .push("wallet-a", EntryDirection::Debit, 25, "spend", None, "tester")
            .unwrap();
        journal.commit_batch(batch).unwrap();

        let (credits, debits) = journal.wallet_totals("wallet-a");
        assert_eq!(credits, 100);
        assert_eq!(debits, 25);
        assert_eq!(journal.wallet_totals("wallet-b"), (0, 0));
    }

    #[test]
    fn from_entries_rehydrates_verified_chain() {
        let mut journal = LedgerJournal::new();
        push_credit(&mut journal, "wallet-a", 100);
        push_credit(&mut journal, "wallet-b", 50);

        let rehydrated = LedgerJournal::from_entries(journal.entries().to_vec()).unwrap();
        assert_eq!(rehydrated.len(), 2);
        assert!(rehydrated.verify_chain());
    }
}
