use chrono::{Datelike, NaiveDate};
use rusqlite::{Connection, Row};
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::info;

use crate::db::{get_decimal, money_param, sum_decimals};
use crate::error::{conflict_on_unique, Result, SaccoError};
use crate::loans;
use crate::models::{DistributionType, InterestDistribution, Loan, LoanStatus};
use crate::periods;

/// Borrower's share of the interest on a settled loan, as a fraction.
const BEARER_FRACTION: Decimal = rust_decimal_macros::dec!(0.5);

/// Split a loan's interest into (bearer return, pooled remainder).
///
/// The bearer half is truncated to cents so the two parts always add back up
/// to the interest exactly.
pub fn split_interest(interest: Decimal) -> (Decimal, Decimal) {
    let bearer = (interest * BEARER_FRACTION).round_dp_with_strategy(2, RoundingStrategy::ToZero);
    (bearer, interest - bearer)
}

fn distribution_from_row(row: &Row<'_>) -> rusqlite::Result<InterestDistribution> {
    Ok(InterestDistribution {
        id: row.get(0)?,
        period_year_id: row.get(1)?,
        loan_id: row.get(2)?,
        member_id: row.get(3)?,
        amount: get_decimal(row, 4)?,
        distribution_type: row.get(5)?,
        distributed_date: row.get(6)?,
    })
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn insert_distribution(
    conn: &Connection,
    organization_id: i64,
    period_year_id: i64,
    loan_id: Option<i64>,
    member_id: i64,
    amount: Decimal,
    distribution_type: DistributionType,
    on: NaiveDate,
) -> rusqlite::Result<InterestDistribution> {
    conn.execute(
        "INSERT INTO interest_distributions (organization_id, period_year_id, loan_id, member_id, \
         amount, distribution_type, distributed_date) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            organization_id,
            period_year_id,
            loan_id,
            member_id,
            money_param(amount),
            distribution_type,
            on
        ],
    )?;
    Ok(InterestDistribution {
        id: conn.last_insert_rowid(),
        period_year_id,
        loan_id,
        member_id,
        amount,
        distribution_type,
        distributed_date: on,
    })
}

/// Pay the borrower's half of a settled loan's interest.
///
/// Runs inside the repayment transaction that settled the loan. The other
/// half is left in the year pool for the year-end distribution.
pub fn distribute_on_repayment(
    conn: &Connection,
    organization_id: i64,
    loan: &Loan,
) -> Result<InterestDistribution> {
    if loan.status != LoanStatus::Repaid {
        return Err(SaccoError::State(format!(
            "loan {} is {}; interest is only distributed once it is repaid",
            loan.loan_number, loan.status
        )));
    }
    let on = loan
        .actual_repayment_date
        .ok_or_else(|| SaccoError::State(format!("loan {} has no repayment date", loan.loan_number)))?;
    let year_id = periods::ensure_year(conn, organization_id, on.year())?;
    if periods::get_year(conn, organization_id, on.year())?.is_completed {
        return Err(SaccoError::State(format!(
            "interest for {} was already distributed; loan {} cannot settle into it",
            on.year(),
            loan.loan_number
        )));
    }

    let (bearer, pooled) = split_interest(loan.total_interest());
    let dist = insert_distribution(
        conn,
        organization_id,
        year_id,
        Some(loan.id),
        loan.member_id,
        bearer,
        DistributionType::BearerReturn,
        on,
    )
    .map_err(|e| conflict_on_unique(e, format!("interest on loan {} already distributed", loan.loan_number)))?;

    info!(
        organization_id,
        loan_id = loan.id,
        bearer_return = %bearer,
        pooled = %pooled,
        "distributed loan interest"
    );
    Ok(dist)
}

/// Distributions of the organization, optionally limited to one year.
pub fn distributions(
    conn: &Connection,
    organization_id: i64,
    year: Option<i32>,
) -> Result<Vec<InterestDistribution>> {
    let mut stmt = conn.prepare(
        "SELECT d.id, d.period_year_id, d.loan_id, d.member_id, d.amount, d.distribution_type, \
         d.distributed_date FROM interest_distributions d \
         JOIN period_years y ON y.id = d.period_year_id \
         WHERE d.organization_id = ?1 AND (?2 IS NULL OR y.year = ?2) \
         ORDER BY d.distributed_date, d.id",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![organization_id, year], distribution_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Total interest earned on loans repaid during `year`.
pub fn year_interest(conn: &Connection, organization_id: i64, year: i32) -> Result<Decimal> {
    let repaid = loans::repaid_in_year(conn, organization_id, year)?;
    Ok(sum_decimals(repaid.iter().map(Loan::total_interest)))
}

/// Undistributed half of the year's interest, awaiting year end.
pub fn year_pool(conn: &Connection, organization_id: i64, year: i32) -> Result<Decimal> {
    let repaid = loans::repaid_in_year(conn, organization_id, year)?;
    Ok(sum_decimals(repaid.iter().map(|l| split_interest(l.total_interest()).1)))
}
