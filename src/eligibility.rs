use std::fmt;

use chrono::{Datelike, NaiveDate};
use rusqlite::Connection;

use crate::error::{Result, SaccoError};
use crate::models::{Category, LoanStatus, LoanType, Member};

pub use crate::rules::{limits_for, Limits};

/// Day of month from which a new obligation rolls into the following month.
pub const CUTOFF_DAY: u32 = 22;

/// Why a member may not take a given loan type right now.
#[derive(Debug, Clone, PartialEq)]
pub enum Ineligible {
    Inactive,
    NoCategory,
    NoRule { category: Category },
    NotOpenYet { start_month: u32 },
    ConflictingLoan { held: LoanType },
}

impl fmt::Display for Ineligible {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inactive => write!(f, "member is inactive"),
            Self::NoCategory => write!(f, "member has no category"),
            Self::NoRule { category } => write!(f, "no loan rule for category {category}"),
            Self::NotOpenYet { start_month } => {
                write!(f, "loan type opens in month {start_month} for this category")
            }
            Self::ConflictingLoan { held } => write!(f, "member already holds an active {held}"),
        }
    }
}

impl From<Ineligible> for SaccoError {
    fn from(reason: Ineligible) -> Self {
        match reason {
            Ineligible::ConflictingLoan { .. } => SaccoError::Conflict(reason.to_string()),
            _ => SaccoError::Validation(reason.to_string()),
        }
    }
}

/// True when the member holds an approved or disbursed loan of `loan_type`.
pub fn holds_active(
    conn: &Connection,
    organization_id: i64,
    member_id: i64,
    loan_type: LoanType,
) -> Result<bool> {
    let mut stmt = conn.prepare_cached(
        "SELECT 1 FROM loans WHERE organization_id = ?1 AND member_id = ?2 \
         AND loan_type = ?3 AND status IN (?4, ?5)",
    )?;
    Ok(stmt.exists(rusqlite::params![
        organization_id,
        member_id,
        loan_type,
        LoanStatus::Approved,
        LoanStatus::Disbursed
    ])?)
}

/// First failed eligibility precondition, if any.
pub fn check(
    conn: &Connection,
    organization_id: i64,
    member: &Member,
    loan_type: LoanType,
    as_of: NaiveDate,
) -> Result<Option<Ineligible>> {
    if !member.is_active {
        return Ok(Some(Ineligible::Inactive));
    }
    let Some(category) = member.category else {
        return Ok(Some(Ineligible::NoCategory));
    };
    let Some(limits) = limits_for(category, loan_type) else {
        return Ok(Some(Ineligible::NoRule { category }));
    };
    if as_of.month() < limits.start_month {
        return Ok(Some(Ineligible::NotOpenYet { start_month: limits.start_month }));
    }
    let held = loan_type.conflicting();
    if holds_active(conn, organization_id, member.id, held)? {
        return Ok(Some(Ineligible::ConflictingLoan { held }));
    }
    Ok(None)
}

pub fn is_eligible(
    conn: &Connection,
    organization_id: i64,
    member: &Member,
    loan_type: LoanType,
    as_of: NaiveDate,
) -> Result<bool> {
    Ok(check(conn, organization_id, member, loan_type, as_of)?.is_none())
}

/// Longest repayment term allowed for a loan taken on `as_of`.
///
/// Savings loans may not straddle two years: the term is capped at the months
/// left in the calendar year. In December a single month is still allowed
/// before the cutoff day; after it the loan cannot be taken (0).
pub fn max_repayment_months(loan_type: LoanType, category: Category, as_of: NaiveDate) -> u32 {
    let Some(limits) = limits_for(category, loan_type) else {
        return 0;
    };
    match loan_type {
        LoanType::SavingsLoan => {
            let remaining = 12 - as_of.month() as i32;
            let year_cap = if remaining > 0 {
                remaining as u32
            } else if as_of.day() < CUTOFF_DAY {
                1
            } else {
                0
            };
            year_cap.min(limits.max_repayment_months)
        }
        LoanType::YukonWelfareLoan => limits.max_repayment_months,
    }
}
