use rusqlite::{Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn};

use crate::actor::Actor;
use crate::db::{get_decimal, money_param, write_tx};
use crate::error::{conflict_on_unique, Result, SaccoError};
use crate::members;
use crate::models::{OperatingPeriod, ShareoutDecision};
use crate::periods;
use crate::savings;

/// Interest paid on savings withdrawn at share-out, percent of the balance.
pub const SHAREOUT_INTEREST_RATE: Decimal = dec!(5);

const DECISION_COLUMNS: &str = "id, member_id, period_id, wants_shareout, savings_balance, \
     interest_amount, shareout_completed, decision_made_at, shareout_completed_at, completed_by";

fn decision_from_row(row: &Row<'_>) -> rusqlite::Result<ShareoutDecision> {
    Ok(ShareoutDecision {
        id: row.get(0)?,
        member_id: row.get(1)?,
        period_id: row.get(2)?,
        wants_shareout: row.get(3)?,
        savings_balance: get_decimal(row, 4)?,
        interest_amount: get_decimal(row, 5)?,
        shareout_completed: row.get(6)?,
        decision_made_at: row.get(7)?,
        shareout_completed_at: row.get(8)?,
        completed_by: row.get(9)?,
    })
}

pub fn interest_on(balance: Decimal) -> Decimal {
    (balance * SHAREOUT_INTEREST_RATE / Decimal::ONE_HUNDRED).round_dp(2)
}

/// Open the share-out window for a period. Re-opening is a no-op.
pub fn activate(conn: &Connection, actor: &Actor, period_id: i64) -> Result<OperatingPeriod> {
    actor.require_operator("open share-out")?;
    let org = actor.organization_id;
    let period = periods::get(conn, org, period_id)?;
    if period.shareout_active {
        return Ok(period);
    }
    if period.is_completed {
        return Err(SaccoError::State(format!("period {} is completed", period.label())));
    }
    conn.execute(
        "UPDATE periods SET shareout_active = 1 WHERE organization_id = ?1 AND id = ?2",
        rusqlite::params![org, period_id],
    )?;
    info!(organization_id = org, period_id, "share-out opened");
    periods::get(conn, org, period_id)
}

pub fn get(conn: &Connection, organization_id: i64, decision_id: i64) -> Result<ShareoutDecision> {
    conn.query_row(
        &format!("SELECT {DECISION_COLUMNS} FROM shareout_decisions WHERE organization_id = ?1 AND id = ?2"),
        rusqlite::params![organization_id, decision_id],
        decision_from_row,
    )
    .optional()?
    .ok_or_else(|| SaccoError::NotFound(format!("share-out decision {decision_id}")))
}

pub fn decisions(conn: &Connection, organization_id: i64, period_id: i64) -> Result<Vec<ShareoutDecision>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {DECISION_COLUMNS} FROM shareout_decisions WHERE organization_id = ?1 AND period_id = ?2 \
         ORDER BY id"
    ))?;
    let rows = stmt
        .query_map(rusqlite::params![organization_id, period_id], decision_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Record whether a member takes their savings out this period.
pub fn record_decision(
    conn: &mut Connection,
    actor: &Actor,
    member_id: i64,
    period_id: i64,
    wants_shareout: bool,
) -> Result<ShareoutDecision> {
    actor.require_self_or_operator(member_id, "record a share-out decision")?;
    let org = actor.organization_id;

    let tx = write_tx(conn)?;
    let period = periods::get(&tx, org, period_id)?;
    if !period.shareout_active {
        return Err(SaccoError::State(format!("share-out is not open for {}", period.label())));
    }
    let member = members::get(&tx, org, member_id)?;
    if !member.is_active {
        return Err(SaccoError::State(format!("member {member_id} is inactive")));
    }
    let balance = savings::member_balance(&tx, org, member_id, period_id)?;
    let interest = interest_on(balance);

    tx.execute(
        "INSERT INTO shareout_decisions (organization_id, member_id, period_id, wants_shareout, \
         savings_balance, interest_amount) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![org, member_id, period_id, wants_shareout, money_param(balance), money_param(interest)],
    )
    .map_err(|e| {
        conflict_on_unique(e, format!("member {member_id} already decided for {}", period.label()))
    })?;
    let id = tx.last_insert_rowid();
    tx.commit()?;

    info!(organization_id = org, member_id, period_id, wants_shareout, balance = %balance, "share-out decision recorded");
    get(conn, org, id)
}

fn complete_in(conn: &Connection, actor: &Actor, decision_id: i64) -> Result<ShareoutDecision> {
    let org = actor.organization_id;
    let decision = get(conn, org, decision_id)?;
    if !decision.wants_shareout {
        return Err(SaccoError::Validation(format!(
            "member {} chose not to share out",
            decision.member_id
        )));
    }
    if decision.shareout_completed {
        return Err(SaccoError::State(format!("share-out {decision_id} is already completed")));
    }
    let balance = savings::member_balance(conn, org, decision.member_id, decision.period_id)?;
    if balance != decision.savings_balance {
        return Err(SaccoError::State(format!(
            "member {} now holds {balance}, not the {} recorded at decision time",
            decision.member_id, decision.savings_balance
        )));
    }
    conn.execute(
        "UPDATE savings_entries SET shared_out = 1, shared_out_date = datetime('now') \
         WHERE organization_id = ?1 AND member_id = ?2 AND period_id = ?3 AND shared_out = 0",
        rusqlite::params![org, decision.member_id, decision.period_id],
    )?;
    conn.execute(
        "UPDATE shareout_decisions SET shareout_completed = 1, shareout_completed_at = datetime('now'), \
         completed_by = ?1 WHERE id = ?2",
        rusqlite::params![actor.member_id, decision_id],
    )?;
    get(conn, org, decision_id)
}

/// Pay out one member's savings plus interest.
pub fn complete(conn: &mut Connection, actor: &Actor, decision_id: i64) -> Result<ShareoutDecision> {
    actor.require_operator("complete share-outs")?;
    let tx = write_tx(conn)?;
    let done = complete_in(&tx, actor, decision_id)?;
    tx.commit()?;
    info!(
        organization_id = actor.organization_id,
        decision_id,
        member_id = done.member_id,
        paid = %(done.savings_balance + done.interest_amount),
        "share-out completed"
    );
    Ok(done)
}

/// Complete several share-outs; if any one fails none are applied.
pub fn bulk_complete(
    conn: &mut Connection,
    actor: &Actor,
    decision_ids: &[i64],
) -> Result<Vec<ShareoutDecision>> {
    actor.require_operator("complete share-outs")?;
    let tx = write_tx(conn)?;
    let mut done = Vec::with_capacity(decision_ids.len());
    for &id in decision_ids {
        match complete_in(&tx, actor, id) {
            Ok(d) => done.push(d),
            Err(e) => {
                warn!(organization_id = actor.organization_id, decision_id = id, error = %e, "bulk share-out rolled back");
                return Err(e);
            }
        }
    }
    tx.commit()?;
    info!(organization_id = actor.organization_id, count = done.len(), "bulk share-out completed");
    Ok(done)
}
