use std::collections::HashMap;

use chrono::{Datelike, NaiveDate};
use rusqlite::Connection;
use rust_decimal::Decimal;

use crate::db::sum_decimals;
use crate::error::Result;
use crate::interest;
use crate::loans::{self, LoanFilter};
use crate::members;
use crate::models::{DistributionType, LoanStatus, LoanType, OperatingPeriod, YearDistribution};
use crate::periods;
use crate::savings;
use crate::year_end;

fn member_names(conn: &Connection, organization_id: i64) -> Result<HashMap<i64, String>> {
    let mut stmt = conn.prepare("SELECT id, name FROM members WHERE organization_id = ?1")?;
    let rows = stmt
        .query_map([organization_id], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<std::result::Result<HashMap<_, _>, _>>()?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

pub struct StatusReport {
    pub active_period: Option<OperatingPeriod>,
    pub active_members: usize,
    pub committee_seats: usize,
    pub loans_by_status: Vec<(LoanStatus, usize)>,
    pub outstanding_total: Decimal,
}

pub fn get_status(conn: &Connection, organization_id: i64) -> Result<StatusReport> {
    let all = loans::list(conn, organization_id, LoanFilter::default())?;
    let mut loans_by_status: Vec<(LoanStatus, usize)> = Vec::new();
    for loan in &all {
        match loans_by_status.iter_mut().find(|(s, _)| *s == loan.status) {
            Some((_, n)) => *n += 1,
            None => loans_by_status.push((loan.status, 1)),
        }
    }
    let outstanding_total = sum_decimals(
        all.iter()
            .filter(|l| l.status == LoanStatus::Disbursed)
            .map(|l| l.outstanding_balance),
    );
    Ok(StatusReport {
        active_period: periods::current_active(conn, organization_id)?,
        active_members: members::list_active(conn, organization_id)?.len(),
        committee_seats: members::active_committee(conn, organization_id)?.len(),
        loans_by_status,
        outstanding_total,
    })
}

// ---------------------------------------------------------------------------
// Loan register
// ---------------------------------------------------------------------------

pub struct LoanRow {
    pub id: i64,
    pub loan_number: String,
    pub member: String,
    pub loan_type: LoanType,
    pub principal: Decimal,
    pub total_amount: Decimal,
    pub outstanding: Decimal,
    pub status: LoanStatus,
    pub due: NaiveDate,
}

pub struct LoanRegister {
    pub rows: Vec<LoanRow>,
    pub total_principal: Decimal,
    pub total_outstanding: Decimal,
}

pub fn get_loan_register(conn: &Connection, organization_id: i64, filter: LoanFilter) -> Result<LoanRegister> {
    let names = member_names(conn, organization_id)?;
    let rows: Vec<LoanRow> = loans::list(conn, organization_id, filter)?
        .into_iter()
        .map(|l| LoanRow {
            id: l.id,
            member: names.get(&l.member_id).cloned().unwrap_or_default(),
            loan_number: l.loan_number,
            loan_type: l.loan_type,
            principal: l.principal,
            total_amount: l.total_amount,
            outstanding: l.outstanding_balance,
            status: l.status,
            due: l.expected_repayment_date,
        })
        .collect();
    Ok(LoanRegister {
        total_principal: sum_decimals(rows.iter().map(|r| r.principal)),
        total_outstanding: sum_decimals(rows.iter().map(|r| r.outstanding)),
        rows,
    })
}

// ---------------------------------------------------------------------------
// Overdue
// ---------------------------------------------------------------------------

pub struct OverdueRow {
    pub id: i64,
    pub loan_number: String,
    pub member: String,
    pub outstanding: Decimal,
    pub due: NaiveDate,
    pub days_overdue: i64,
}

pub fn get_overdue(conn: &Connection, organization_id: i64, as_of: NaiveDate) -> Result<Vec<OverdueRow>> {
    let names = member_names(conn, organization_id)?;
    Ok(loans::overdue(conn, organization_id, as_of)?
        .into_iter()
        .map(|l| OverdueRow {
            id: l.id,
            member: names.get(&l.member_id).cloned().unwrap_or_default(),
            loan_number: l.loan_number,
            outstanding: l.outstanding_balance,
            due: l.expected_repayment_date,
            days_overdue: (as_of - l.expected_repayment_date).num_days(),
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Savings
// ---------------------------------------------------------------------------

pub struct SavingsRow {
    pub member_id: i64,
    pub member: String,
    pub monthly_target: Option<Decimal>,
    pub months_saved: usize,
    pub saved: Decimal,
    pub shared_out: Decimal,
}

pub struct SavingsSummary {
    pub period: OperatingPeriod,
    pub rows: Vec<SavingsRow>,
    pub total_saved: Decimal,
    pub total_shared_out: Decimal,
}

pub fn get_savings_summary(conn: &Connection, organization_id: i64, period_id: i64) -> Result<SavingsSummary> {
    let period = periods::get(conn, organization_id, period_id)?;
    let entries = savings::entries(conn, organization_id, period_id)?;
    let mut rows = Vec::new();
    for member in members::list_active(conn, organization_id)? {
        let own: Vec<_> = entries.iter().filter(|e| e.member_id == member.id).collect();
        rows.push(SavingsRow {
            member_id: member.id,
            monthly_target: savings::target_for(conn, organization_id, member.id, period_id)?
                .map(|t| t.monthly_target),
            months_saved: own.len(),
            saved: sum_decimals(own.iter().map(|e| e.amount)),
            shared_out: sum_decimals(own.iter().filter(|e| e.shared_out).map(|e| e.amount)),
            member: member.name,
        });
    }
    Ok(SavingsSummary {
        period,
        total_saved: sum_decimals(rows.iter().map(|r| r.saved)),
        total_shared_out: sum_decimals(rows.iter().map(|r| r.shared_out)),
        rows,
    })
}

// ---------------------------------------------------------------------------
// Interest distribution totals
// ---------------------------------------------------------------------------

pub struct DistributionTotals {
    pub year: i32,
    pub interest_earned: Decimal,
    pub bearer_returns: Decimal,
    pub committee_shares: Decimal,
    pub member_shares: Decimal,
    /// Pooled interest not yet paid out by a year-end run.
    pub pending_pool: Decimal,
    pub year_end: Option<YearDistribution>,
}

pub fn get_distribution_totals(conn: &Connection, organization_id: i64, year: Option<i32>) -> Result<DistributionTotals> {
    let year = year.unwrap_or_else(|| chrono::Local::now().year());
    let dists = interest::distributions(conn, organization_id, Some(year))?;
    let total_of = |kind: DistributionType| {
        sum_decimals(dists.iter().filter(|d| d.distribution_type == kind).map(|d| d.amount))
    };
    let year_end = year_end::get(conn, organization_id, year)?;
    let pending_pool = if year_end.is_some() {
        Decimal::ZERO
    } else {
        interest::year_pool(conn, organization_id, year)?
    };
    Ok(DistributionTotals {
        year,
        interest_earned: interest::year_interest(conn, organization_id, year)?,
        bearer_returns: total_of(DistributionType::BearerReturn),
        committee_shares: total_of(DistributionType::CommitteeShare),
        member_shares: total_of(DistributionType::MemberShare),
        pending_pool,
        year_end,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loans::{LoanApplication, Payment};
    use crate::models::{Category, PaymentMethod};
    use crate::test_support::{add_member, op, open_quarter, test_db, ymd};
    use rust_decimal_macros::dec;

    fn disbursed(conn: &mut Connection, member_id: i64, amount: Decimal, on: NaiveDate) -> i64 {
        let app = LoanApplication {
            member_id,
            loan_type: LoanType::SavingsLoan,
            amount,
            purpose: None,
            repayment_months: 1,
            applied_on: on,
        };
        let loan = loans::apply(conn, &op(), &app).unwrap();
        loans::approve(conn, &op(), loan.id, on).unwrap();
        loans::disburse(conn, &op(), loan.id, on).unwrap();
        loan.id
    }

    #[test]
    fn test_status_counts() {
        let (_dir, mut conn) = test_db();
        open_quarter(&mut conn, 2025, 3);
        let a = add_member(&conn, "Achieng", Some(Category::A));
        disbursed(&mut conn, a, dec!(1000), ymd(2025, 8, 1));
        let status = get_status(&conn, 1).unwrap();
        assert_eq!(status.active_members, 1);
        assert_eq!(status.loans_by_status, vec![(LoanStatus::Disbursed, 1)]);
        assert_eq!(status.outstanding_total, dec!(1100));
        assert_eq!(status.active_period.unwrap().quarter_number, 3);
    }

    #[test]
    fn test_loan_register_totals() {
        let (_dir, mut conn) = test_db();
        open_quarter(&mut conn, 2025, 3);
        let a = add_member(&conn, "Achieng", Some(Category::A));
        let b = add_member(&conn, "Baraka", Some(Category::A));
        disbursed(&mut conn, a, dec!(1000), ymd(2025, 8, 1));
        disbursed(&mut conn, b, dec!(2500.50), ymd(2025, 8, 2));
        let reg = get_loan_register(&conn, 1, LoanFilter::default()).unwrap();
        assert_eq!(reg.rows.len(), 2);
        assert_eq!(reg.rows[1].member, "Baraka");
        assert_eq!(reg.total_principal, dec!(3500.50));
    }

    #[test]
    fn test_overdue_days() {
        let (_dir, mut conn) = test_db();
        open_quarter(&mut conn, 2025, 3);
        let a = add_member(&conn, "Achieng", Some(Category::A));
        disbursed(&mut conn, a, dec!(1000), ymd(2025, 8, 1));
        let rows = get_overdue(&conn, 1, ymd(2025, 9, 10)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].days_overdue, 10);
        assert_eq!(rows[0].member, "Achieng");
    }

    #[test]
    fn test_savings_summary() {
        let (_dir, mut conn) = test_db();
        let p = open_quarter(&mut conn, 2025, 1);
        let a = add_member(&conn, "Achieng", Some(Category::C));
        savings::set_target(&conn, &op(), a, p.id, dec!(500)).unwrap();
        savings::initiate(&mut conn, &op(), p.id, 1).unwrap();
        savings::initiate(&mut conn, &op(), p.id, 2).unwrap();
        let summary = get_savings_summary(&conn, 1, p.id).unwrap();
        assert_eq!(summary.rows.len(), 1);
        assert_eq!(summary.rows[0].months_saved, 2);
        assert_eq!(summary.rows[0].monthly_target, Some(dec!(500)));
        assert_eq!(summary.total_saved, dec!(1000));
        assert_eq!(summary.total_shared_out, Decimal::ZERO);
    }

    #[test]
    fn test_distribution_totals_before_and_after_year_end() {
        let (_dir, mut conn) = test_db();
        open_quarter(&mut conn, 2025, 3);
        let a = add_member(&conn, "Achieng", Some(Category::A));
        let loan = disbursed(&mut conn, a, dec!(1000), ymd(2025, 8, 1));
        let payment = Payment { amount: dec!(1100), method: PaymentMethod::BankTransfer, notes: None, paid_on: ymd(2025, 8, 15) };
        loans::record_repayment(&mut conn, &op(), loan, &payment).unwrap();

        let before = get_distribution_totals(&conn, 1, Some(2025)).unwrap();
        assert_eq!(before.interest_earned, dec!(100));
        assert_eq!(before.bearer_returns, dec!(50));
        assert_eq!(before.pending_pool, dec!(50));
        assert!(before.year_end.is_none());

        year_end::calculate_and_distribute(&mut conn, &op(), 2025, ymd(2026, 1, 5)).unwrap();
        let after = get_distribution_totals(&conn, 1, Some(2025)).unwrap();
        assert_eq!(after.pending_pool, Decimal::ZERO);
        assert_eq!(after.member_shares, dec!(25));
        assert!(after.year_end.is_some());
    }
}
