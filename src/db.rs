use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use rust_decimal::Decimal;

use crate::error::Result;

pub const DB_FILE: &str = "sacco.db";

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS period_years (
    id INTEGER PRIMARY KEY,
    organization_id INTEGER NOT NULL,
    year INTEGER NOT NULL,
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL,
    is_completed INTEGER NOT NULL DEFAULT 0,
    UNIQUE (organization_id, year)
);

CREATE TABLE IF NOT EXISTS periods (
    id INTEGER PRIMARY KEY,
    organization_id INTEGER NOT NULL,
    year_id INTEGER NOT NULL,
    year INTEGER NOT NULL,
    quarter_number INTEGER NOT NULL,
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 0,
    is_completed INTEGER NOT NULL DEFAULT 0,
    shareout_active INTEGER NOT NULL DEFAULT 0,
    created_at TEXT DEFAULT (datetime('now')),
    UNIQUE (organization_id, year, quarter_number),
    FOREIGN KEY (year_id) REFERENCES period_years(id)
);

CREATE TABLE IF NOT EXISTS members (
    id INTEGER PRIMARY KEY,
    organization_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    category TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    joined_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS committee_roles (
    id INTEGER PRIMARY KEY,
    organization_id INTEGER NOT NULL,
    member_id INTEGER NOT NULL,
    role TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    assigned_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (member_id) REFERENCES members(id)
);

CREATE UNIQUE INDEX IF NOT EXISTS committee_roles_active_role
    ON committee_roles (organization_id, role) WHERE is_active = 1;
CREATE UNIQUE INDEX IF NOT EXISTS committee_roles_active_member
    ON committee_roles (organization_id, member_id) WHERE is_active = 1;

CREATE TABLE IF NOT EXISTS loans (
    id INTEGER PRIMARY KEY,
    organization_id INTEGER NOT NULL,
    member_id INTEGER NOT NULL,
    period_id INTEGER NOT NULL,
    loan_number TEXT NOT NULL,
    loan_type TEXT NOT NULL,
    purpose TEXT,
    principal TEXT NOT NULL,
    interest_rate TEXT NOT NULL,
    total_amount TEXT NOT NULL,
    amount_paid TEXT NOT NULL,
    outstanding_balance TEXT NOT NULL,
    status TEXT NOT NULL,
    applied_date TEXT NOT NULL,
    approved_date TEXT,
    approved_by INTEGER,
    disbursed_date TEXT,
    expected_repayment_date TEXT NOT NULL,
    actual_repayment_date TEXT,
    repayment_period_months INTEGER NOT NULL,
    rejection_reason TEXT,
    UNIQUE (organization_id, loan_number),
    FOREIGN KEY (member_id) REFERENCES members(id),
    FOREIGN KEY (period_id) REFERENCES periods(id)
);

CREATE TABLE IF NOT EXISTS loan_repayments (
    id INTEGER PRIMARY KEY,
    loan_id INTEGER NOT NULL,
    amount TEXT NOT NULL,
    principal_portion TEXT NOT NULL,
    interest_portion TEXT NOT NULL,
    payment_date TEXT NOT NULL,
    payment_method TEXT NOT NULL,
    notes TEXT,
    created_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (loan_id) REFERENCES loans(id)
);

CREATE TABLE IF NOT EXISTS interest_distributions (
    id INTEGER PRIMARY KEY,
    organization_id INTEGER NOT NULL,
    period_year_id INTEGER NOT NULL,
    loan_id INTEGER,
    member_id INTEGER NOT NULL,
    amount TEXT NOT NULL,
    distribution_type TEXT NOT NULL,
    distributed_date TEXT NOT NULL,
    FOREIGN KEY (period_year_id) REFERENCES period_years(id),
    FOREIGN KEY (loan_id) REFERENCES loans(id),
    FOREIGN KEY (member_id) REFERENCES members(id)
);

CREATE UNIQUE INDEX IF NOT EXISTS interest_distributions_bearer_once
    ON interest_distributions (loan_id) WHERE distribution_type = 'bearer_return';

CREATE TABLE IF NOT EXISTS savings_targets (
    id INTEGER PRIMARY KEY,
    organization_id INTEGER NOT NULL,
    member_id INTEGER NOT NULL,
    period_id INTEGER NOT NULL,
    monthly_target TEXT NOT NULL,
    created_at TEXT DEFAULT (datetime('now')),
    UNIQUE (member_id, period_id),
    FOREIGN KEY (member_id) REFERENCES members(id),
    FOREIGN KEY (period_id) REFERENCES periods(id)
);

CREATE TABLE IF NOT EXISTS savings_entries (
    id INTEGER PRIMARY KEY,
    organization_id INTEGER NOT NULL,
    member_id INTEGER NOT NULL,
    period_id INTEGER NOT NULL,
    amount TEXT NOT NULL,
    month INTEGER NOT NULL,
    shared_out INTEGER NOT NULL DEFAULT 0,
    shared_out_date TEXT,
    created_at TEXT DEFAULT (datetime('now')),
    UNIQUE (member_id, period_id, month),
    FOREIGN KEY (member_id) REFERENCES members(id),
    FOREIGN KEY (period_id) REFERENCES periods(id)
);

CREATE TABLE IF NOT EXISTS shareout_decisions (
    id INTEGER PRIMARY KEY,
    organization_id INTEGER NOT NULL,
    member_id INTEGER NOT NULL,
    period_id INTEGER NOT NULL,
    wants_shareout INTEGER NOT NULL,
    savings_balance TEXT NOT NULL,
    interest_amount TEXT NOT NULL,
    shareout_completed INTEGER NOT NULL DEFAULT 0,
    decision_made_at TEXT NOT NULL DEFAULT (datetime('now')),
    shareout_completed_at TEXT,
    completed_by INTEGER,
    UNIQUE (member_id, period_id),
    FOREIGN KEY (member_id) REFERENCES members(id),
    FOREIGN KEY (period_id) REFERENCES periods(id)
);

CREATE TABLE IF NOT EXISTS year_distributions (
    id INTEGER PRIMARY KEY,
    organization_id INTEGER NOT NULL,
    year INTEGER NOT NULL,
    total_interest TEXT NOT NULL,
    available_for_distribution TEXT NOT NULL,
    committee_share TEXT NOT NULL,
    members_share TEXT NOT NULL,
    committee_count INTEGER NOT NULL,
    member_count INTEGER NOT NULL,
    per_committee_member TEXT NOT NULL,
    per_member TEXT NOT NULL,
    undistributed_remainder TEXT NOT NULL,
    completed_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (organization_id, year)
);

CREATE TABLE IF NOT EXISTS year_shares (
    id INTEGER PRIMARY KEY,
    organization_id INTEGER NOT NULL,
    year INTEGER NOT NULL,
    member_id INTEGER NOT NULL,
    pool TEXT NOT NULL,
    amount TEXT NOT NULL,
    UNIQUE (organization_id, year, member_id, pool),
    FOREIGN KEY (member_id) REFERENCES members(id)
);
";

/// How long a writer waits for another connection's write lock.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub fn get_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

/// Begin a write transaction holding the write lock from its first statement.
///
/// Concurrent writers queue behind it for up to [`BUSY_TIMEOUT`] and then see
/// its committed rows, so duplicate work surfaces as a `Conflict`.
pub fn write_tx(conn: &mut Connection) -> rusqlite::Result<Transaction<'_>> {
    conn.transaction_with_behavior(TransactionBehavior::Immediate)
}

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

pub fn get_metadata(conn: &Connection, key: &str) -> Option<String> {
    conn.query_row("SELECT value FROM metadata WHERE key = ?1", [key], |r| r.get(0))
        .optional()
        .ok()
        .flatten()
}

pub fn set_metadata(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO metadata (key, value) VALUES (?1, ?2) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        rusqlite::params![key, value],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Money columns
// ---------------------------------------------------------------------------

/// Money is stored as TEXT so no binary float ever touches a balance.
pub fn money_param(value: Decimal) -> String {
    value.round_dp(2).to_string()
}

/// Rate-like decimals keep their full scale.
pub fn decimal_param(value: Decimal) -> String {
    value.normalize().to_string()
}

pub fn get_decimal(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub fn sum_decimals<I: IntoIterator<Item = Decimal>>(values: I) -> Decimal {
    values.into_iter().fold(Decimal::ZERO, |acc, v| acc + v)
}
