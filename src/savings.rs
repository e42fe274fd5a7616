use chrono::Datelike;
use rusqlite::{Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::actor::Actor;
use crate::db::{get_decimal, money_param, sum_decimals, write_tx};
use crate::error::{conflict_on_unique, Result, SaccoError};
use crate::loans::require_cents;
use crate::members;
use crate::models::{Member, OperatingPeriod, SavingsEntry, SavingsTarget};
use crate::periods;
use crate::rules::min_monthly_savings;

fn target_from_row(row: &Row<'_>) -> rusqlite::Result<SavingsTarget> {
    Ok(SavingsTarget {
        id: row.get(0)?,
        member_id: row.get(1)?,
        period_id: row.get(2)?,
        monthly_target: get_decimal(row, 3)?,
    })
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<SavingsEntry> {
    Ok(SavingsEntry {
        id: row.get(0)?,
        member_id: row.get(1)?,
        period_id: row.get(2)?,
        amount: get_decimal(row, 3)?,
        month: row.get(4)?,
        shared_out: row.get(5)?,
        shared_out_date: row.get(6)?,
    })
}

const ENTRY_COLUMNS: &str = "id, member_id, period_id, amount, month, shared_out, shared_out_date";

// ---------------------------------------------------------------------------
// Targets
// ---------------------------------------------------------------------------

pub fn set_target(
    conn: &Connection,
    actor: &Actor,
    member_id: i64,
    period_id: i64,
    monthly_target: Decimal,
) -> Result<SavingsTarget> {
    actor.require_self_or_operator(member_id, "set a savings target")?;
    let org = actor.organization_id;
    require_cents(monthly_target, "monthly target")?;
    if monthly_target <= Decimal::ZERO {
        return Err(SaccoError::Validation("monthly target must be positive".into()));
    }
    let member = members::get(conn, org, member_id)?;
    if let Some(category) = member.category {
        let floor = min_monthly_savings(category);
        if monthly_target < floor {
            return Err(SaccoError::Validation(format!(
                "category {category} members must save at least {floor} a month, got {monthly_target}"
            )));
        }
    }
    let period = periods::get(conn, org, period_id)?;
    if period.is_completed {
        return Err(SaccoError::State(format!("period {} is completed", period.label())));
    }

    conn.execute(
        "INSERT INTO savings_targets (organization_id, member_id, period_id, monthly_target) \
         VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![org, member_id, period_id, money_param(monthly_target)],
    )
    .map_err(|e| {
        conflict_on_unique(e, format!("member {member_id} already has a target for {}", period.label()))
    })?;
    info!(organization_id = org, member_id, period_id, target = %monthly_target, "savings target set");
    Ok(SavingsTarget { id: conn.last_insert_rowid(), member_id, period_id, monthly_target })
}

pub fn target_for(
    conn: &Connection,
    organization_id: i64,
    member_id: i64,
    period_id: i64,
) -> Result<Option<SavingsTarget>> {
    let target = conn
        .query_row(
            "SELECT id, member_id, period_id, monthly_target FROM savings_targets \
             WHERE organization_id = ?1 AND member_id = ?2 AND period_id = ?3",
            rusqlite::params![organization_id, member_id, period_id],
            target_from_row,
        )
        .optional()?;
    Ok(target)
}

// ---------------------------------------------------------------------------
// Monthly batch
// ---------------------------------------------------------------------------

pub struct InitiationLine {
    pub member_id: i64,
    pub name: String,
    pub amount: Decimal,
}

/// What `initiate` would write for a month, and what would stop it.
pub struct InitiationPreview {
    pub period: OperatingPeriod,
    pub month: u32,
    pub lines: Vec<InitiationLine>,
    pub missing_targets: Vec<Member>,
    pub already_initiated: bool,
    pub total: Decimal,
}

impl InitiationPreview {
    pub fn is_ready(&self) -> bool {
        self.missing_targets.is_empty() && !self.already_initiated
    }
}

fn require_month_in(period: &OperatingPeriod, month: u32) -> Result<()> {
    if month < period.start_date.month() || month > period.end_date.month() {
        return Err(SaccoError::Validation(format!(
            "month {month} is not part of {}",
            period.label()
        )));
    }
    Ok(())
}

pub fn preview_initiation(
    conn: &Connection,
    organization_id: i64,
    period_id: i64,
    month: u32,
) -> Result<InitiationPreview> {
    let period = periods::get(conn, organization_id, period_id)?;
    require_month_in(&period, month)?;

    let mut lines = Vec::new();
    let mut missing_targets = Vec::new();
    for member in members::list_active(conn, organization_id)? {
        match target_for(conn, organization_id, member.id, period_id)? {
            Some(t) => lines.push(InitiationLine {
                member_id: member.id,
                name: member.name,
                amount: t.monthly_target,
            }),
            None => missing_targets.push(member),
        }
    }
    let already_initiated: bool = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM savings_entries \
         WHERE organization_id = ?1 AND period_id = ?2 AND month = ?3)",
        rusqlite::params![organization_id, period_id, month],
        |r| r.get(0),
    )?;
    let total = sum_decimals(lines.iter().map(|l| l.amount));
    Ok(InitiationPreview { period, month, lines, missing_targets, already_initiated, total })
}

/// Generate one savings entry per active member for `month`, all or nothing.
pub fn initiate(
    conn: &mut Connection,
    actor: &Actor,
    period_id: i64,
    month: u32,
) -> Result<Vec<SavingsEntry>> {
    actor.require_operator("initiate monthly savings")?;
    let org = actor.organization_id;

    let tx = write_tx(conn)?;
    let preview = preview_initiation(&tx, org, period_id, month)?;
    if preview.period.is_completed {
        return Err(SaccoError::State(format!("period {} is completed", preview.period.label())));
    }
    if preview.period.shareout_active {
        return Err(SaccoError::State(format!(
            "share-out is open for {}; no further savings can be initiated",
            preview.period.label()
        )));
    }
    if !preview.missing_targets.is_empty() {
        let names: Vec<&str> = preview.missing_targets.iter().map(|m| m.name.as_str()).collect();
        warn!(organization_id = org, period_id, month, missing = names.len(), "savings initiation refused");
        return Err(SaccoError::Conflict(format!(
            "members without a savings target: {}",
            names.join(", ")
        )));
    }
    if preview.already_initiated {
        warn!(organization_id = org, period_id, month, "savings month already initiated");
        return Err(SaccoError::Conflict(format!(
            "savings for month {month} of {} already initiated",
            preview.period.label()
        )));
    }

    for line in &preview.lines {
        tx.execute(
            "INSERT INTO savings_entries (organization_id, member_id, period_id, amount, month) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![org, line.member_id, period_id, money_param(line.amount), month],
        )
        .map_err(|e| {
            conflict_on_unique(e, format!("member {} already has an entry for month {month}", line.member_id))
        })?;
    }
    tx.commit()?;

    info!(
        organization_id = org,
        period_id,
        month,
        members = preview.lines.len(),
        total = %preview.total,
        "initiated monthly savings"
    );
    let created = entries(conn, org, period_id)?
        .into_iter()
        .filter(|e| e.month == month)
        .collect();
    Ok(created)
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

pub fn entries(conn: &Connection, organization_id: i64, period_id: i64) -> Result<Vec<SavingsEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ENTRY_COLUMNS} FROM savings_entries WHERE organization_id = ?1 AND period_id = ?2 \
         ORDER BY month, member_id"
    ))?;
    let rows = stmt
        .query_map(rusqlite::params![organization_id, period_id], entry_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Savings a member holds in a period that have not been shared out yet.
pub fn member_balance(
    conn: &Connection,
    organization_id: i64,
    member_id: i64,
    period_id: i64,
) -> Result<Decimal> {
    let mut stmt = conn.prepare(
        "SELECT amount FROM savings_entries WHERE organization_id = ?1 AND member_id = ?2 \
         AND period_id = ?3 AND shared_out = 0",
    )?;
    let amounts = stmt
        .query_map(rusqlite::params![organization_id, member_id, period_id], |r| get_decimal(r, 0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(sum_decimals(amounts))
}
