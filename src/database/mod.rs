//! Embedded SQLite store.
//!
//! One file-backed (or in-memory) connection guarded by a mutex: the write
//! path is sequential, readers tolerate a slightly stale view.  Two tables
//! belong to the core — `payment_audit` (tamper-evident payment trail) and
//! `llm_usage` (cost ledger).

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};
use thiserror::Error;

use crate::ai::cost::UsageRecord;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("payment record {0} not found")]
    PaymentNotFound(i64),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A row in the `payment_audit` table.
#[derive(Debug, Clone)]
pub struct PaymentRecord {
    pub id: i64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub tool_name: String,
    pub amount: f64,
    pub currency: String,
    pub recipient: String,
    pub payment_type: String,
    pub provider: Option<String>,
    pub chain: Option<String>,
    /// `pending`, `executed`, or `failed`.
    pub status: String,
    pub transaction_ref: Option<String>,
    pub error: Option<String>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS payment_audit (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp       TEXT NOT NULL,
    tool_name       TEXT NOT NULL,
    amount          REAL NOT NULL,
    currency        TEXT NOT NULL,
    recipient       TEXT NOT NULL,
    payment_type    TEXT NOT NULL,
    provider        TEXT,
    chain           TEXT,
    status          TEXT NOT NULL,
    transaction_ref TEXT,
    error           TEXT
);
CREATE INDEX IF NOT EXISTS idx_payment_audit_status_ts
    ON payment_audit (status, timestamp);

CREATE TABLE IF NOT EXISTS llm_usage (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    model         TEXT NOT NULL,
    provider      TEXT NOT NULL,
    input_tokens  INTEGER NOT NULL,
    output_tokens INTEGER NOT NULL,
    cost_usd      REAL NOT NULL,
    task_type     TEXT NOT NULL,
    created_at    TEXT NOT NULL
);
";

/// Process-wide embedded store.  Clone the surrounding `Arc`, not the store.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (and migrate) the store at `path`.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests and ephemeral runs.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Liveness probe used by `/health full`.
    pub fn ping(&self) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    // ── llm_usage ────────────────────────────────────────────────────────────

    pub fn insert_llm_usage(&self, record: &UsageRecord) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO llm_usage
             (model, provider, input_tokens, output_tokens, cost_usd, task_type, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.model,
                record.provider,
                record.input_tokens,
                record.output_tokens,
                record.cost,
                record.task_type,
                record.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn llm_usage_count(&self) -> StoreResult<i64> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        Ok(conn.query_row("SELECT COUNT(*) FROM llm_usage", [], |row| row.get(0))?)
    }

    // ── payment_audit ────────────────────────────────────────────────────────

    /// Insert an audit row.  Returns the new row id.
    pub fn insert_payment(&self, record: &PaymentRecord) -> StoreResult<i64> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO payment_audit
             (timestamp, tool_name, amount, currency, recipient, payment_type,
              provider, chain, status, transaction_ref, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.timestamp.to_rfc3339(),
                record.tool_name,
                record.amount,
                record.currency,
                record.recipient,
                record.payment_type,
                record.provider,
                record.chain,
                record.status,
                record.transaction_ref,
                record.error,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Update status (and optionally transaction ref / error) after execution.
    pub fn update_payment_status(
        &self,
        id: i64,
        status: &str,
        transaction_ref: Option<&str>,
        error: Option<&str>,
    ) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let changed = match transaction_ref {
            Some(r) => conn.execute(
                "UPDATE payment_audit SET status = ?1, transaction_ref = ?2, error = ?3 WHERE id = ?4",
                params![status, r, error, id],
            )?,
            None => conn.execute(
                "UPDATE payment_audit SET status = ?1, error = ?2 WHERE id = ?3",
                params![status, error, id],
            )?,
        };
        if changed == 0 {
            return Err(StoreError::PaymentNotFound(id));
        }
        Ok(())
    }

    pub fn get_payment(&self, id: i64) -> StoreResult<PaymentRecord> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let record = conn
            .query_row(
                "SELECT id, timestamp, tool_name, amount, currency, recipient, payment_type,
                        provider, chain, status, transaction_ref, error
                 FROM payment_audit WHERE id = ?1",
                params![id],
                row_to_payment,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::PaymentNotFound(id),
                other => StoreError::Sqlite(other),
            })?;
        Ok(record)
    }

    /// Most recent payments, optionally filtered by status.
    pub fn payment_history(
        &self,
        limit: usize,
        status: Option<&str>,
    ) -> StoreResult<Vec<PaymentRecord>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut out = Vec::new();
        match status {
            Some(s) => {
                let mut stmt = conn.prepare(
                    "SELECT id, timestamp, tool_name, amount, currency, recipient, payment_type,
                            provider, chain, status, transaction_ref, error
                     FROM payment_audit WHERE status = ?1
                     ORDER BY timestamp DESC LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![s, limit as i64], row_to_payment)?;
                for row in rows {
                    out.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, timestamp, tool_name, amount, currency, recipient, payment_type,
                            provider, chain, status, transaction_ref, error
                     FROM payment_audit ORDER BY timestamp DESC LIMIT ?1",
                )?;
                let rows = stmt.query_map(params![limit as i64], row_to_payment)?;
                for row in rows {
                    out.push(row?);
                }
            }
        }
        Ok(out)
    }

    /// Sum of executed amounts since `since` (rolling windows).
    pub fn executed_sum_since(&self, since: chrono::DateTime<chrono::Utc>) -> StoreResult<f64> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        Ok(conn.query_row(
            "SELECT COALESCE(SUM(amount), 0) FROM payment_audit
             WHERE status = 'executed' AND timestamp > ?1",
            params![since.to_rfc3339()],
            |row| row.get(0),
        )?)
    }

    /// Sum of executed amounts to `recipient` since `since`.
    pub fn executed_sum_recipient_since(
        &self,
        recipient: &str,
        since: chrono::DateTime<chrono::Utc>,
    ) -> StoreResult<f64> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        Ok(conn.query_row(
            "SELECT COALESCE(SUM(amount), 0) FROM payment_audit
             WHERE status = 'executed' AND recipient = ?1 AND timestamp > ?2",
            params![recipient, since.to_rfc3339()],
            |row| row.get(0),
        )?)
    }

    /// Count of executed transactions since `since`.
    pub fn executed_count_since(&self, since: chrono::DateTime<chrono::Utc>) -> StoreResult<i64> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM payment_audit
             WHERE status = 'executed' AND timestamp > ?1",
            params![since.to_rfc3339()],
            |row| row.get(0),
        )?)
    }

    /// True when an executed payment with the same amount and recipient
    /// exists after `since`.
    pub fn executed_duplicate_exists(
        &self,
        amount: f64,
        recipient: &str,
        since: chrono::DateTime<chrono::Utc>,
    ) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM payment_audit
             WHERE status = 'executed' AND amount = ?1 AND recipient = ?2 AND timestamp > ?3",
            params![amount, recipient, since.to_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

fn row_to_payment(row: &rusqlite::Row<'_>) -> rusqlite::Result<PaymentRecord> {
    let ts: String = row.get(1)?;
    let timestamp = chrono::DateTime::parse_from_rfc3339(&ts)
        .map(|t| t.with_timezone(&chrono::Utc))
        .unwrap_or_else(|_| chrono::Utc::now());
    Ok(PaymentRecord {
        id: row.get(0)?,
        timestamp,
        tool_name: row.get(2)?,
        amount: row.get(3)?,
        currency: row.get(4)?,
        recipient: row.get(5)?,
        payment_type: row.get(6)?,
        provider: row.get(7)?,
        chain: row.get(8)?,
        status: row.get(9)?,
        transaction_ref: row.get(10)?,
        error: row.get(11)?,
    })
}
