use chrono::{Months, NaiveDate};
use rusqlite::{Connection, OptionalExtension, Row};
use tracing::info;

use crate::actor::Actor;
use crate::db::write_tx;
use crate::error::{conflict_on_unique, Result, SaccoError};
use crate::models::{OperatingPeriod, PeriodYear};

const PERIOD_COLUMNS: &str = "id, year_id, year, quarter_number, start_date, end_date, \
     is_active, is_completed, shareout_active";

fn period_from_row(row: &Row<'_>) -> rusqlite::Result<OperatingPeriod> {
    Ok(OperatingPeriod {
        id: row.get(0)?,
        year_id: row.get(1)?,
        year: row.get(2)?,
        quarter_number: row.get(3)?,
        start_date: row.get(4)?,
        end_date: row.get(5)?,
        is_active: row.get(6)?,
        is_completed: row.get(7)?,
        shareout_active: row.get(8)?,
    })
}

/// Last calendar day of `year`-`month`.
pub fn month_end(year: i32, month: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1)?
        .checked_add_months(Months::new(1))?
        .pred_opt()
}

/// First and last day spanned by a quarter.
pub fn quarter_bounds(year: i32, quarter_number: u32) -> Result<(NaiveDate, NaiveDate)> {
    if !(1..=4).contains(&quarter_number) {
        return Err(SaccoError::Validation(format!(
            "quarter must be between 1 and 4, got {quarter_number}"
        )));
    }
    if !(1900..=9999).contains(&year) {
        return Err(SaccoError::Validation(format!("year out of range: {year}")));
    }
    let first_month = (quarter_number - 1) * 3 + 1;
    let start = NaiveDate::from_ymd_opt(year, first_month, 1)
        .ok_or_else(|| SaccoError::Validation(format!("invalid quarter start for {year}")))?;
    let end = month_end(year, first_month + 2)
        .ok_or_else(|| SaccoError::Validation(format!("invalid quarter end for {year}")))?;
    Ok((start, end))
}

pub(crate) fn ensure_year(conn: &Connection, organization_id: i64, year: i32) -> Result<i64> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM period_years WHERE organization_id = ?1 AND year = ?2",
            rusqlite::params![organization_id, year],
            |r| r.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }
    let start = NaiveDate::from_ymd_opt(year, 1, 1)
        .ok_or_else(|| SaccoError::Validation(format!("year out of range: {year}")))?;
    let end = NaiveDate::from_ymd_opt(year, 12, 31)
        .ok_or_else(|| SaccoError::Validation(format!("year out of range: {year}")))?;
    conn.execute(
        "INSERT INTO period_years (organization_id, year, start_date, end_date) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![organization_id, year, start, end],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn create_period(
    conn: &mut Connection,
    actor: &Actor,
    year: i32,
    quarter_number: u32,
) -> Result<OperatingPeriod> {
    actor.require_operator("create periods")?;
    let (start, end) = quarter_bounds(year, quarter_number)?;
    let org = actor.organization_id;

    let tx = write_tx(conn)?;
    let year_id = ensure_year(&tx, org, year)?;
    tx.execute(
        "INSERT INTO periods (organization_id, year_id, year, quarter_number, start_date, end_date) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![org, year_id, year, quarter_number, start, end],
    )
    .map_err(|e| conflict_on_unique(e, format!("period {year} Q{quarter_number} already exists")))?;
    let id = tx.last_insert_rowid();
    tx.commit()?;

    info!(organization_id = org, year, quarter_number, period_id = id, "created period");
    get(conn, org, id)
}

pub fn get(conn: &Connection, organization_id: i64, period_id: i64) -> Result<OperatingPeriod> {
    conn.query_row(
        &format!("SELECT {PERIOD_COLUMNS} FROM periods WHERE organization_id = ?1 AND id = ?2"),
        rusqlite::params![organization_id, period_id],
        period_from_row,
    )
    .optional()?
    .ok_or_else(|| SaccoError::NotFound(format!("period {period_id}")))
}

pub fn list(conn: &Connection, organization_id: i64) -> Result<Vec<OperatingPeriod>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PERIOD_COLUMNS} FROM periods WHERE organization_id = ?1 \
         ORDER BY year, quarter_number"
    ))?;
    let rows = stmt
        .query_map([organization_id], period_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Make `period_id` the single active period of the organization.
pub fn activate(conn: &mut Connection, actor: &Actor, period_id: i64) -> Result<OperatingPeriod> {
    actor.require_operator("activate periods")?;
    let org = actor.organization_id;

    let tx = write_tx(conn)?;
    let target = get(&tx, org, period_id)?;
    if target.is_completed {
        return Err(SaccoError::State(format!("period {} is completed", target.label())));
    }
    tx.execute(
        "UPDATE periods SET is_active = 0 WHERE organization_id = ?1 AND id != ?2",
        rusqlite::params![org, period_id],
    )?;
    tx.execute(
        "UPDATE periods SET is_active = 1 WHERE organization_id = ?1 AND id = ?2",
        rusqlite::params![org, period_id],
    )?;
    tx.commit()?;

    info!(organization_id = org, period_id, "activated period");
    get(conn, org, period_id)
}

pub fn current_active(conn: &Connection, organization_id: i64) -> Result<Option<OperatingPeriod>> {
    let period = conn
        .query_row(
            &format!("SELECT {PERIOD_COLUMNS} FROM periods WHERE organization_id = ?1 AND is_active = 1"),
            [organization_id],
            period_from_row,
        )
        .optional()?;
    Ok(period)
}

/// Close a period. A completed period is inactive and cannot be reactivated.
pub fn complete(conn: &mut Connection, actor: &Actor, period_id: i64) -> Result<OperatingPeriod> {
    actor.require_operator("complete periods")?;
    let org = actor.organization_id;
    let period = get(conn, org, period_id)?;
    if period.is_completed {
        return Err(SaccoError::State(format!("period {} is already completed", period.label())));
    }
    conn.execute(
        "UPDATE periods SET is_completed = 1, is_active = 0 WHERE organization_id = ?1 AND id = ?2",
        rusqlite::params![org, period_id],
    )?;
    info!(organization_id = org, period_id, "completed period");
    get(conn, org, period_id)
}

pub fn get_year(conn: &Connection, organization_id: i64, year: i32) -> Result<PeriodYear> {
    conn.query_row(
        "SELECT id, year, start_date, end_date, is_completed FROM period_years \
         WHERE organization_id = ?1 AND year = ?2",
        rusqlite::params![organization_id, year],
        |row| {
            Ok(PeriodYear {
                id: row.get(0)?,
                year: row.get(1)?,
                start_date: row.get(2)?,
                end_date: row.get(3)?,
                is_completed: row.get(4)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| SaccoError::NotFound(format!("operating year {year}")))
}
