use crate::error::CoreError;
use crate::ledger::{EntryDirection, LedgerBatch, LedgerEntry, LedgerJournal};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

/// Ledger persistence backend configuration.
#[derive(Debug, Clone)]
pub enum LedgerStorageConfig {
    /// Keep all ledger entries in process memory only.
    Memory,
    /// Mirror every entry to PostgreSQL and hydrate the chain on startup.
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

impl LedgerStorageConfig {
    pub fn memory() -> Self {
        Self::Memory
    }

    pub fn postgres(database_url: impl Into<String>, max_connections: u32) -> Self {
        Self::Postgres {
            database_url: database_url.into(),
            max_connections,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres { .. } => "postgres",
        }
    }
}

impl Default for LedgerStorageConfig {
    fn default() -> Self {
        Self::Memory
    }
}

#[derive(Debug, Clone)]
enum JournalBackend {
    Memory,
    Postgres(PostgresLedgerStore),
}

/// Runtime journal wrapper that keeps an in-memory authoritative chain while
/// optionally mirroring each entry batch to PostgreSQL.
///
/// Invariant handling:
/// - Entry hashes and indexes are computed against the in-memory chain first.
/// - A batch is persisted (one database transaction) before it is committed
///   in memory, so a storage failure leaves no half-applied operation.
/// - On startup, persisted entries are hydrated and hash-verified.
#[derive(Debug, Clone)]
pub struct PersistentJournal {
    journal: LedgerJournal,
    backend: JournalBackend,
}

impl PersistentJournal {
    pub async fn bootstrap(config: LedgerStorageConfig) -> Result<Self, CoreError> {
        match config {
            LedgerStorageConfig::Memory => Ok(Self {
                journal: LedgerJournal::new(),
                backend: JournalBackend::Memory,
            }),
            LedgerStorageConfig::Postgres {
                database_url,
                max_connections,
            } => {
                let store = PostgresLedgerStore::connect(&database_url, max_connections).await?;
                store.ensure_schema().await?;
                let entries = store.load_entries().await?;
                let journal = LedgerJournal::from_entries(entries)?;
                Ok(Self {
                    journal,
                    backend: JournalBackend::Postgres(store),
                })
            }
        }
    }

    pub fn backend_label(&self) -> &'static str {
        match self.backend {
            JournalBackend::Memory => "memory",
            JournalBackend::Postgres(_) => "postgres",
        }
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        self.journal.entries()
    }

    pub fn entries_for_wallet(&self, wallet_id: &str) -> Vec<LedgerEntry> {
        self.journal.entries_for_wallet(wallet_id)
    }

    pub fn wallet_totals(&self, wallet_id: &str) -> (u64, u64) {
        self.journal.wallet_totals(wallet_id)
    }

    pub fn verify_chain(&self) -> bool {
        self.journal.verify_chain()
    }

    pub fn begin_batch(&self) -> LedgerBatch {
        self.journal.begin_batch()
    }

    /// Persist and commit one atomic batch of ledger entries.
    pub async fn commit_batch(
        &mut self,
        batch: LedgerBatch,
    ) -> Result<Vec<LedgerEntry>, CoreError> {
        if let JournalBackend::Postgres(store) = &self.backend {
            store.insert_entries(batch.entries()).await?;
        }
        self.journal.commit_batch(batch)
    }
}

#[derive(Debug, Clone)]
struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    async fn connect(database_url: &str, max_connections: u32) -> Result<Self, CoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .map_err(|e| CoreError::Storage(format!("postgres connect failed: {e}")))?;

        Ok(Self { pool })
    }

    async fn ensure_schema(&self) -> Result<(), CoreError> {
        // Single append-only table. The application controls deterministic
        // index/hash generation; the primary key rejects forked histories.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS questbank_ledger_entries (
                ledger_index BIGINT PRIMARY KEY,
                entry_id TEXT NOT NULL UNIQUE,
                wallet_id TEXT NOT NULL,
                direction TEXT NOT NULL,
                amount BIGINT NOT NULL CHECK (amount > 0),
                reason TEXT NOT NULL,
                linked_entity TEXT NULL,
                actor_id TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                previous_hash TEXT NULL,
                entry_hash TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::Storage(format!("postgres schema create failed: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_questbank_ledger_wallet_id ON questbank_ledger_entries (wallet_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::Storage(format!("postgres index create failed: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_questbank_ledger_linked_entity ON questbank_ledger_entries (linked_entity)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::Storage(format!("postgres index create failed: {e}")))?;

        Ok(())
    }

    async fn load_entries(&self) -> Result<Vec<LedgerEntry>, CoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                ledger_index,
                entry_id,
                wallet_id,
                direction,
                amount,
                reason,
                linked_entity,
                actor_id,
                created_at,
                previous_hash,
                entry_hash
            FROM questbank_ledger_entries
            ORDER BY ledger_index ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CoreError::Storage(format!("postgres load failed: {e}")))?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let direction_str: String = row
                .try_get("direction")
                .map_err(|e| CoreError::Storage(format!("postgres decode direction failed: {e}")))?;
            let direction = parse_direction(&direction_str)?;

            let index: i64 = row.try_get("ledger_index").map_err(|e| {
                CoreError::Storage(format!("postgres decode ledger_index failed: {e}"))
            })?;
            let amount: i64 = row
                .try_get("amount")
                .map_err(|e| CoreError::Storage(format!("postgres decode amount failed: {e}")))?;

            entries.push(LedgerEntry {
                id: row
                    .try_get("entry_id")
                    .map_err(|e| CoreError::Storage(format!("postgres decode entry_id failed: {e}")))?,
                index: index.try_into().map_err(|_| {
                    CoreError::Storage("negative ledger index in storage".to_string())
                })?,
                wallet_id: row.try_get("wallet_id").map_err(|e| {
                    CoreError::Storage(format!("postgres decode wallet_id failed: {e}"))
                })?,
                direction,
                amount: amount.try_into().map_err(|_| {
                    CoreError::Storage("negative ledger amount in storage".to_string())
                })?,
                reason: row
                    .try_get("reason")
                    .map_err(|e| CoreError::Storage(format!("postgres decode reason failed: {e}")))?,
                linked_entity: row.try_get("linked_entity").map_err(|e| {
                    CoreError::Storage(format!("postgres decode linked_entity failed: {e}"))
                })?,
                actor: row.try_get("actor_id").map_err(|e| {
                    CoreError::Storage(format!("postgres decode actor_id failed: {e}"))
                })?,
                created_at: row.try_get("created_at").map_err(|e| {
                    CoreError::Storage(format!("postgres decode created_at failed: {e}"))
                })?,
                previous_hash: row.try_get("previous_hash").map_err(|e| {
                    CoreError::Storage(format!("postgres decode previous_hash failed: {e}"))
                })?,
                entry_hash: row.try_get("entry_hash").map_err(|e| {
                    CoreError::Storage(format!("postgres decode entry_hash failed: {e}"))
                })?,
            });
        }

        Ok(entries)
    }

    /// Insert a batch inside one database transaction so a mid-batch failure
    /// leaves no partial audit trail behind.
    async fn insert_entries(&self, entries: &[LedgerEntry]) -> Result<(), CoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CoreError::Storage(format!("postgres begin failed: {e}")))?;

        for entry in entries {
            let index: i64 = entry.index.try_into().map_err(|_| {
                CoreError::Storage("ledger index exceeds postgres BIGINT range".to_string())
            })?;
            let amount: i64 = entry.amount.try_into().map_err(|_| {
                CoreError::Storage("ledger amount exceeds postgres BIGINT range".to_string())
            })?;

            sqlx::query(
                r#"
                INSERT INTO questbank_ledger_entries (
                    ledger_index,
                    entry_id,
                    wallet_id,
                    direction,
                    amount,
                    reason,
                    linked_entity,
                    actor_id,
                    created_at,
                    previous_hash,
                    entry_hash
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(index)
            .bind(&entry.id)
            .bind(&entry.wallet_id)
            .bind(entry.direction.name())
            .bind(amount)
            .bind(&entry.reason)
            .bind(&entry.linked_entity)
            .bind(&entry.actor)
            .bind(entry.created_at)
            .bind(&entry.previous_hash)
            .bind(&entry.entry_hash)
            .execute(&mut *tx)
            .await
            .map_err(|e| CoreError::Storage(format!("postgres insert failed: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| CoreError::Storage(format!("postgres commit failed: {e}")))?;

        Ok(())
    }
}

fn parse_direction(value: &str) -> Result<EntryDirection, CoreError> {
    match value {
        "debit" => Ok(EntryDirection::Debit),
        "credit" => Ok(EntryDirection::Credit),
        other => Err(CoreError::Storage(format!(
            "unknown ledger direction '{other}' in postgres"
        ))),
    }
}
