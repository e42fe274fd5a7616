use chrono::{Datelike, Months, NaiveDate};
use rusqlite::{Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::actor::Actor;
use crate::db::{decimal_param, get_decimal, money_param, sum_decimals, write_tx};
use crate::eligibility::{self, CUTOFF_DAY};
use crate::error::{conflict_on_unique, Result, SaccoError};
use crate::interest;
use crate::members;
use crate::models::{InterestDistribution, Loan, LoanRepayment, LoanStatus, LoanType, PaymentMethod};
use crate::periods::{self, month_end};

const LOAN_COLUMNS: &str = "id, member_id, period_id, loan_number, loan_type, purpose, \
     principal, interest_rate, total_amount, amount_paid, outstanding_balance, status, \
     applied_date, approved_date, approved_by, disbursed_date, expected_repayment_date, \
     actual_repayment_date, repayment_period_months, rejection_reason";

fn loan_from_row(row: &Row<'_>) -> rusqlite::Result<Loan> {
    Ok(Loan {
        id: row.get(0)?,
        member_id: row.get(1)?,
        period_id: row.get(2)?,
        loan_number: row.get(3)?,
        loan_type: row.get(4)?,
        purpose: row.get(5)?,
        principal: get_decimal(row, 6)?,
        interest_rate: get_decimal(row, 7)?,
        total_amount: get_decimal(row, 8)?,
        amount_paid: get_decimal(row, 9)?,
        outstanding_balance: get_decimal(row, 10)?,
        status: row.get(11)?,
        applied_date: row.get(12)?,
        approved_date: row.get(13)?,
        approved_by: row.get(14)?,
        disbursed_date: row.get(15)?,
        expected_repayment_date: row.get(16)?,
        actual_repayment_date: row.get(17)?,
        repayment_period_months: row.get(18)?,
        rejection_reason: row.get(19)?,
    })
}

fn repayment_from_row(row: &Row<'_>) -> rusqlite::Result<LoanRepayment> {
    Ok(LoanRepayment {
        id: row.get(0)?,
        loan_id: row.get(1)?,
        amount: get_decimal(row, 2)?,
        principal_portion: get_decimal(row, 3)?,
        interest_portion: get_decimal(row, 4)?,
        payment_date: row.get(5)?,
        payment_method: row.get(6)?,
        notes: row.get(7)?,
    })
}

pub(crate) fn require_cents(amount: Decimal, what: &str) -> Result<()> {
    if amount.round_dp(2) != amount {
        return Err(SaccoError::Validation(format!(
            "{what} must have at most two decimal places, got {amount}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Due date
// ---------------------------------------------------------------------------

/// Due date under the 22nd-day rule.
///
/// A loan falls due at the end of the month `months` months after the
/// application month. A one-month loan applied for before the 22nd is due at
/// the end of the application month itself.
pub fn expected_repayment_date(applied_on: NaiveDate, months: u32) -> Result<NaiveDate> {
    if months == 0 {
        return Err(SaccoError::Validation("repayment period must be at least one month".into()));
    }
    let offset = if months == 1 && applied_on.day() < CUTOFF_DAY { 0 } else { months };
    let due_month = applied_on
        .with_day(1)
        .and_then(|first| first.checked_add_months(Months::new(offset)))
        .ok_or_else(|| SaccoError::Validation(format!("repayment date out of range for {applied_on}")))?;
    month_end(due_month.year(), due_month.month())
        .ok_or_else(|| SaccoError::Validation(format!("repayment date out of range for {applied_on}")))
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

pub fn get(conn: &Connection, organization_id: i64, loan_id: i64) -> Result<Loan> {
    conn.query_row(
        &format!("SELECT {LOAN_COLUMNS} FROM loans WHERE organization_id = ?1 AND id = ?2"),
        rusqlite::params![organization_id, loan_id],
        loan_from_row,
    )
    .optional()?
    .ok_or_else(|| SaccoError::NotFound(format!("loan {loan_id}")))
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LoanFilter {
    pub member_id: Option<i64>,
    pub status: Option<LoanStatus>,
}

pub fn list(conn: &Connection, organization_id: i64, filter: LoanFilter) -> Result<Vec<Loan>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {LOAN_COLUMNS} FROM loans WHERE organization_id = ?1 \
         AND (?2 IS NULL OR member_id = ?2) AND (?3 IS NULL OR status = ?3) \
         ORDER BY applied_date, id"
    ))?;
    let rows = stmt
        .query_map(
            rusqlite::params![organization_id, filter.member_id, filter.status],
            loan_from_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn repayments(conn: &Connection, organization_id: i64, loan_id: i64) -> Result<Vec<LoanRepayment>> {
    get(conn, organization_id, loan_id)?;
    let mut stmt = conn.prepare(
        "SELECT id, loan_id, amount, principal_portion, interest_portion, payment_date, \
         payment_method, notes FROM loan_repayments WHERE loan_id = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map([loan_id], repayment_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Disbursed loans past their due date with a balance left.
pub fn overdue(conn: &Connection, organization_id: i64, as_of: NaiveDate) -> Result<Vec<Loan>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {LOAN_COLUMNS} FROM loans WHERE organization_id = ?1 AND status = ?2 \
         AND expected_repayment_date < ?3 ORDER BY expected_repayment_date, id"
    ))?;
    let rows = stmt
        .query_map(
            rusqlite::params![organization_id, LoanStatus::Disbursed, as_of],
            loan_from_row,
        )?
        .collect::<std::result::Result<Vec<Loan>, _>>()?;
    Ok(rows.into_iter().filter(|l| l.outstanding_balance > Decimal::ZERO).collect())
}

/// Loans that reached `repaid` during calendar `year`.
pub fn repaid_in_year(conn: &Connection, organization_id: i64, year: i32) -> Result<Vec<Loan>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {LOAN_COLUMNS} FROM loans WHERE organization_id = ?1 AND status = ?2 \
         AND actual_repayment_date BETWEEN ?3 AND ?4 ORDER BY id"
    ))?;
    let rows = stmt
        .query_map(
            rusqlite::params![
                organization_id,
                LoanStatus::Repaid,
                format!("{year:04}-01-01"),
                format!("{year:04}-12-31")
            ],
            loan_from_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoanApplication {
    pub member_id: i64,
    pub loan_type: LoanType,
    pub amount: Decimal,
    pub purpose: Option<String>,
    pub repayment_months: u32,
    pub applied_on: NaiveDate,
}

fn next_loan_number(conn: &Connection, organization_id: i64, year: i32) -> Result<String> {
    let count: i64 = conn.query_row(
        "SELECT count(*) FROM loans WHERE organization_id = ?1 AND loan_number LIKE ?2",
        rusqlite::params![organization_id, format!("LN-{year}-%")],
        |r| r.get(0),
    )?;
    Ok(format!("LN-{year}-{:04}", count + 1))
}

pub fn apply(conn: &mut Connection, actor: &Actor, app: &LoanApplication) -> Result<Loan> {
    actor.require_self_or_operator(app.member_id, "apply for a loan")?;
    let org = actor.organization_id;
    require_cents(app.amount, "loan amount")?;

    let tx = write_tx(conn)?;
    let member = members::get(&tx, org, app.member_id)?;

    let period = periods::current_active(&tx, org)?
        .ok_or_else(|| SaccoError::Validation("no active period".into()))?;
    if !period.contains(app.applied_on) {
        return Err(SaccoError::Validation(format!(
            "application date {} is outside the active period {}",
            app.applied_on,
            period.label()
        )));
    }

    if let Some(reason) = eligibility::check(&tx, org, &member, app.loan_type, app.applied_on)? {
        warn!(member_id = member.id, loan_type = app.loan_type.key(), %reason, "loan application refused");
        return Err(reason.into());
    }
    let category = member
        .category
        .ok_or_else(|| SaccoError::Validation("member has no category".into()))?;
    let limits = eligibility::limits_for(category, app.loan_type)
        .ok_or_else(|| SaccoError::Validation(format!("no loan rule for category {category}")))?;

    if app.amount < limits.min_amount || app.amount > limits.max_amount {
        return Err(SaccoError::Validation(format!(
            "{} for category {category} must be between {} and {}, got {}",
            app.loan_type, limits.min_amount, limits.max_amount, app.amount
        )));
    }

    let max_months = eligibility::max_repayment_months(app.loan_type, category, app.applied_on);
    if max_months == 0 {
        return Err(SaccoError::Validation(format!(
            "a {} taken on {} would cross into the next year",
            app.loan_type, app.applied_on
        )));
    }
    if app.repayment_months == 0 || app.repayment_months > max_months {
        return Err(SaccoError::Validation(format!(
            "repayment period must be between 1 and {max_months} months, got {}",
            app.repayment_months
        )));
    }

    let open_same_type: bool = tx.query_row(
        "SELECT EXISTS (SELECT 1 FROM loans WHERE organization_id = ?1 AND member_id = ?2 \
         AND loan_type = ?3 AND status IN (?4, ?5, ?6))",
        rusqlite::params![
            org,
            member.id,
            app.loan_type,
            LoanStatus::Pending,
            LoanStatus::Approved,
            LoanStatus::Disbursed
        ],
        |r| r.get(0),
    )?;
    if open_same_type {
        warn!(member_id = member.id, loan_type = app.loan_type.key(), "duplicate open loan refused");
        return Err(SaccoError::Conflict(format!(
            "member {} already has an open {}",
            member.id, app.loan_type
        )));
    }

    let interest = (app.amount * limits.interest_rate / Decimal::ONE_HUNDRED).round_dp(2);
    let total = app.amount + interest;
    let due = expected_repayment_date(app.applied_on, app.repayment_months)?;
    let loan_number = next_loan_number(&tx, org, app.applied_on.year())?;

    tx.execute(
        "INSERT INTO loans (organization_id, member_id, period_id, loan_number, loan_type, purpose, \
         principal, interest_rate, total_amount, amount_paid, outstanding_balance, status, \
         applied_date, expected_repayment_date, repayment_period_months) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        rusqlite::params![
            org,
            member.id,
            period.id,
            loan_number,
            app.loan_type,
            app.purpose,
            money_param(app.amount),
            decimal_param(limits.interest_rate),
            money_param(total),
            money_param(Decimal::ZERO),
            money_param(total),
            LoanStatus::Pending,
            app.applied_on,
            due,
            app.repayment_months,
        ],
    )
    .map_err(|e| conflict_on_unique(e, format!("loan number {loan_number} already issued")))?;
    let id = tx.last_insert_rowid();
    tx.commit()?;

    info!(organization_id = org, loan_id = id, %loan_number, member_id = member.id, "loan application recorded");
    get(conn, org, id)
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

fn require_status(loan: &Loan, expected: LoanStatus, action: &str) -> Result<()> {
    if loan.status != expected {
        return Err(SaccoError::State(format!(
            "cannot {action} loan {} in status {}; it must be {}",
            loan.loan_number, loan.status, expected
        )));
    }
    Ok(())
}

pub fn approve(conn: &mut Connection, actor: &Actor, loan_id: i64, on: NaiveDate) -> Result<Loan> {
    actor.require_operator("approve loans")?;
    let org = actor.organization_id;

    let tx = write_tx(conn)?;
    let loan = get(&tx, org, loan_id)?;
    require_status(&loan, LoanStatus::Pending, "approve")?;
    let held = loan.loan_type.conflicting();
    if eligibility::holds_active(&tx, org, loan.member_id, held)? {
        warn!(loan_id, member_id = loan.member_id, "approval refused: conflicting active loan");
        return Err(SaccoError::Conflict(format!(
            "member {} already holds an active {held}",
            loan.member_id
        )));
    }
    tx.execute(
        "UPDATE loans SET status = ?1, approved_date = ?2, approved_by = ?3 WHERE id = ?4",
        rusqlite::params![LoanStatus::Approved, on, actor.member_id, loan_id],
    )?;
    tx.commit()?;

    info!(organization_id = org, loan_id, "loan approved");
    get(conn, org, loan_id)
}

pub fn reject(conn: &Connection, actor: &Actor, loan_id: i64, reason: &str) -> Result<Loan> {
    actor.require_operator("reject loans")?;
    let org = actor.organization_id;
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(SaccoError::Validation("a rejection reason is required".into()));
    }
    let loan = get(conn, org, loan_id)?;
    require_status(&loan, LoanStatus::Pending, "reject")?;
    conn.execute(
        "UPDATE loans SET status = ?1, rejection_reason = ?2 WHERE id = ?3",
        rusqlite::params![LoanStatus::Rejected, reason, loan_id],
    )?;
    info!(organization_id = org, loan_id, "loan rejected");
    get(conn, org, loan_id)
}

pub fn disburse(conn: &Connection, actor: &Actor, loan_id: i64, on: NaiveDate) -> Result<Loan> {
    actor.require_operator("disburse loans")?;
    let org = actor.organization_id;
    let loan = get(conn, org, loan_id)?;
    require_status(&loan, LoanStatus::Approved, "disburse")?;
    if on < loan.applied_date {
        return Err(SaccoError::Validation(format!(
            "disbursement date {on} precedes application date {}",
            loan.applied_date
        )));
    }
    conn.execute(
        "UPDATE loans SET status = ?1, disbursed_date = ?2 WHERE id = ?3",
        rusqlite::params![LoanStatus::Disbursed, on, loan_id],
    )?;
    info!(organization_id = org, loan_id, "loan disbursed");
    get(conn, org, loan_id)
}

pub fn mark_defaulted(conn: &Connection, actor: &Actor, loan_id: i64) -> Result<Loan> {
    actor.require_operator("mark loans defaulted")?;
    let org = actor.organization_id;
    let loan = get(conn, org, loan_id)?;
    require_status(&loan, LoanStatus::Disbursed, "default")?;
    conn.execute(
        "UPDATE loans SET status = ?1 WHERE id = ?2",
        rusqlite::params![LoanStatus::Defaulted, loan_id],
    )?;
    warn!(organization_id = org, loan_id, outstanding = %loan.outstanding_balance, "loan marked defaulted");
    get(conn, org, loan_id)
}

// ---------------------------------------------------------------------------
// Repayment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Payment {
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub notes: Option<String>,
    pub paid_on: NaiveDate,
}

#[derive(Debug)]
pub struct RepaymentOutcome {
    pub repayment: LoanRepayment,
    pub loan: Loan,
    /// Present when this payment settled the loan.
    pub bearer_return: Option<InterestDistribution>,
}

/// Record a payment, interest first. Settling the balance marks the loan
/// repaid and distributes its interest in the same transaction.
pub fn record_repayment(
    conn: &mut Connection,
    actor: &Actor,
    loan_id: i64,
    payment: &Payment,
) -> Result<RepaymentOutcome> {
    actor.require_operator("record repayments")?;
    let org = actor.organization_id;
    require_cents(payment.amount, "repayment amount")?;

    let tx = write_tx(conn)?;
    let loan = get(&tx, org, loan_id)?;
    require_status(&loan, LoanStatus::Disbursed, "repay")?;
    if payment.amount <= Decimal::ZERO {
        return Err(SaccoError::Validation("repayment amount must be positive".into()));
    }
    if payment.amount > loan.outstanding_balance {
        return Err(SaccoError::Validation(format!(
            "repayment {} exceeds outstanding balance {}",
            payment.amount, loan.outstanding_balance
        )));
    }

    let interest_paid = {
        let mut stmt = tx.prepare("SELECT interest_portion FROM loan_repayments WHERE loan_id = ?1")?;
        let portions = stmt
            .query_map([loan_id], |r| get_decimal(r, 0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        sum_decimals(portions)
    };
    let remaining_interest = (loan.total_interest() - interest_paid).max(Decimal::ZERO);
    let interest_portion = payment.amount.min(remaining_interest);
    let principal_portion = payment.amount - interest_portion;

    tx.execute(
        "INSERT INTO loan_repayments (loan_id, amount, principal_portion, interest_portion, \
         payment_date, payment_method, notes) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            loan_id,
            money_param(payment.amount),
            money_param(principal_portion),
            money_param(interest_portion),
            payment.paid_on,
            payment.method,
            payment.notes,
        ],
    )?;
    let repayment_id = tx.last_insert_rowid();

    let amount_paid = loan.amount_paid + payment.amount;
    let outstanding = loan.total_amount - amount_paid;
    let settled = outstanding.is_zero();
    tx.execute(
        "UPDATE loans SET amount_paid = ?1, outstanding_balance = ?2, status = ?3, \
         actual_repayment_date = ?4 WHERE id = ?5",
        rusqlite::params![
            money_param(amount_paid),
            money_param(outstanding),
            if settled { LoanStatus::Repaid } else { LoanStatus::Disbursed },
            settled.then_some(payment.paid_on),
            loan_id,
        ],
    )?;

    let loan = get(&tx, org, loan_id)?;
    let bearer_return = if settled {
        Some(interest::distribute_on_repayment(&tx, org, &loan)?)
    } else {
        None
    };
    let repayment = tx.query_row(
        "SELECT id, loan_id, amount, principal_portion, interest_portion, payment_date, \
         payment_method, notes FROM loan_repayments WHERE id = ?1",
        [repayment_id],
        repayment_from_row,
    )?;
    tx.commit()?;

    info!(
        organization_id = org,
        loan_id,
        amount = %payment.amount,
        outstanding = %loan.outstanding_balance,
        settled,
        "repayment recorded"
    );
    Ok(RepaymentOutcome { repayment, loan, bearer_return })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, DistributionType};
    use crate::test_support::{add_member, op, open_quarter, test_db, ymd};
    use rust_decimal_macros::dec;

    fn application(member_id: i64, loan_type: LoanType, amount: Decimal, months: u32, on: NaiveDate) -> LoanApplication {
        LoanApplication {
            member_id,
            loan_type,
            amount,
            purpose: Some("school fees".into()),
            repayment_months: months,
            applied_on: on,
        }
    }

    fn pay(amount: Decimal, on: NaiveDate) -> Payment {
        Payment { amount, method: PaymentMethod::Cash, notes: None, paid_on: on }
    }

    /// Apply, approve and disburse in one go.
    fn disbursed_loan(conn: &mut Connection, member_id: i64, loan_type: LoanType, amount: Decimal, on: NaiveDate) -> Loan {
        let loan = apply(conn, &op(), &application(member_id, loan_type, amount, 1, on)).unwrap();
        approve(conn, &op(), loan.id, on).unwrap();
        disburse(conn, &op(), loan.id, on).unwrap()
    }

    fn assert_balance_invariant(loan: &Loan) {
        assert_eq!(loan.outstanding_balance, loan.total_amount - loan.amount_paid);
        assert!(loan.outstanding_balance >= Decimal::ZERO);
    }

    #[test]
    fn test_22nd_day_rule() {
        let cases = [
            (ymd(2025, 8, 10), 1, ymd(2025, 8, 31)),
            (ymd(2025, 8, 22), 1, ymd(2025, 9, 30)),
            (ymd(2025, 8, 25), 1, ymd(2025, 9, 30)),
            (ymd(2025, 8, 10), 2, ymd(2025, 10, 31)),
            (ymd(2025, 8, 25), 3, ymd(2025, 11, 30)),
            (ymd(2025, 2, 15), 1, ymd(2025, 2, 28)),
            (ymd(2025, 2, 25), 1, ymd(2025, 3, 31)),
        ];
        for (applied, months, due) in cases {
            assert_eq!(
                expected_repayment_date(applied, months).unwrap(),
                due,
                "applied {applied}, {months} month(s)"
            );
        }
    }

    #[test]
    fn test_due_date_rejects_zero_months() {
        assert!(matches!(
            expected_repayment_date(ymd(2025, 8, 10), 0),
            Err(SaccoError::Validation(_))
        ));
    }

    #[test]
    fn test_longest_savings_loan_ends_in_december() {
        let due = expected_repayment_date(ymd(2025, 3, 10), 9).unwrap();
        assert_eq!(due, ymd(2025, 12, 31));
    }

    #[test]
    fn test_apply_computes_totals() {
        let (_dir, mut conn) = test_db();
        open_quarter(&mut conn, 2025, 3);
        let m = add_member(&conn, "Achieng", Some(Category::A));
        let loan = apply(&mut conn, &op(), &application(m, LoanType::SavingsLoan, dec!(1000), 2, ymd(2025, 8, 10))).unwrap();
        assert_eq!(loan.status, LoanStatus::Pending);
        assert_eq!(loan.interest_rate, dec!(10));
        assert_eq!(loan.total_amount, dec!(1100));
        assert_eq!(loan.outstanding_balance, dec!(1100));
        assert_eq!(loan.amount_paid, Decimal::ZERO);
        assert_eq!(loan.expected_repayment_date, ymd(2025, 10, 31));
        assert_eq!(loan.loan_number, "LN-2025-0001");
        assert_balance_invariant(&loan);
    }

    #[test]
    fn test_loan_numbers_increment() {
        let (_dir, mut conn) = test_db();
        open_quarter(&mut conn, 2025, 3);
        let a = add_member(&conn, "Achieng", Some(Category::A));
        let b = add_member(&conn, "Baraka", Some(Category::A));
        apply(&mut conn, &op(), &application(a, LoanType::SavingsLoan, dec!(1000), 1, ymd(2025, 8, 1))).unwrap();
        let second = apply(&mut conn, &op(), &application(b, LoanType::SavingsLoan, dec!(1000), 1, ymd(2025, 8, 1))).unwrap();
        assert_eq!(second.loan_number, "LN-2025-0002");
    }

    #[test]
    fn test_apply_requires_active_period_containing_date() {
        let (_dir, mut conn) = test_db();
        let m = add_member(&conn, "Achieng", Some(Category::A));
        let app = application(m, LoanType::SavingsLoan, dec!(1000), 1, ymd(2025, 8, 10));
        assert!(matches!(apply(&mut conn, &op(), &app), Err(SaccoError::Validation(_))));

        open_quarter(&mut conn, 2025, 1);
        assert!(matches!(apply(&mut conn, &op(), &app), Err(SaccoError::Validation(_))));
    }

    #[test]
    fn test_apply_amount_bounds() {
        let (_dir, mut conn) = test_db();
        open_quarter(&mut conn, 2025, 3);
        let m = add_member(&conn, "Achieng", Some(Category::B));
        for amount in [dec!(999.99), dec!(30000.01), dec!(-5)] {
            let err = apply(&mut conn, &op(), &application(m, LoanType::SavingsLoan, amount, 1, ymd(2025, 8, 1))).unwrap_err();
            assert!(matches!(err, SaccoError::Validation(_)), "amount {amount}");
        }
        let err = apply(&mut conn, &op(), &application(m, LoanType::SavingsLoan, dec!(1000.001), 1, ymd(2025, 8, 1))).unwrap_err();
        assert!(matches!(err, SaccoError::Validation(_)));
        assert!(list(&conn, 1, LoanFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn test_apply_repayment_months_capped() {
        let (_dir, mut conn) = test_db();
        open_quarter(&mut conn, 2025, 3);
        let m = add_member(&conn, "Achieng", Some(Category::A));
        // August: at most 4 months left in the year
        let err = apply(&mut conn, &op(), &application(m, LoanType::SavingsLoan, dec!(1000), 5, ymd(2025, 8, 1))).unwrap_err();
        assert!(matches!(err, SaccoError::Validation(_)));
        apply(&mut conn, &op(), &application(m, LoanType::SavingsLoan, dec!(1000), 4, ymd(2025, 8, 1))).unwrap();
    }

    #[test]
    fn test_late_december_savings_loan_refused() {
        let (_dir, mut conn) = test_db();
        open_quarter(&mut conn, 2025, 4);
        let m = add_member(&conn, "Achieng", Some(Category::A));
        let err = apply(&mut conn, &op(), &application(m, LoanType::SavingsLoan, dec!(1000), 1, ymd(2025, 12, 22))).unwrap_err();
        assert!(matches!(err, SaccoError::Validation(_)));
        let loan = apply(&mut conn, &op(), &application(m, LoanType::SavingsLoan, dec!(1000), 1, ymd(2025, 12, 21))).unwrap();
        assert_eq!(loan.expected_repayment_date, ymd(2025, 12, 31));
    }

    #[test]
    fn test_ineligible_member_refused() {
        let (_dir, mut conn) = test_db();
        open_quarter(&mut conn, 2025, 1);
        let none = add_member(&conn, "Kamau", None);
        let c = add_member(&conn, "Njeri", Some(Category::C));
        let err = apply(&mut conn, &op(), &application(none, LoanType::SavingsLoan, dec!(1000), 1, ymd(2025, 2, 1))).unwrap_err();
        assert!(matches!(err, SaccoError::Validation(_)));
        let err = apply(&mut conn, &op(), &application(c, LoanType::SavingsLoan, dec!(1000), 1, ymd(2025, 2, 1))).unwrap_err();
        assert!(matches!(err, SaccoError::Validation(_)));
    }

    #[test]
    fn test_member_cannot_apply_for_someone_else() {
        let (_dir, mut conn) = test_db();
        open_quarter(&mut conn, 2025, 3);
        let a = add_member(&conn, "Achieng", Some(Category::A));
        let b = add_member(&conn, "Baraka", Some(Category::A));
        let app = application(b, LoanType::SavingsLoan, dec!(1000), 1, ymd(2025, 8, 1));
        let err = apply(&mut conn, &Actor::member(1, a), &app).unwrap_err();
        assert!(matches!(err, SaccoError::Forbidden(_)));
        apply(&mut conn, &Actor::member(1, b), &app).unwrap();
    }

    #[test]
    fn test_conflict_rule_is_symmetric() {
        let (_dir, mut conn) = test_db();
        open_quarter(&mut conn, 2025, 3);
        let a = add_member(&conn, "Achieng", Some(Category::A));
        let b = add_member(&conn, "Baraka", Some(Category::A));

        disbursed_loan(&mut conn, a, LoanType::SavingsLoan, dec!(1000), ymd(2025, 8, 1));
        let err = apply(&mut conn, &op(), &application(a, LoanType::YukonWelfareLoan, dec!(500), 1, ymd(2025, 8, 2))).unwrap_err();
        assert!(matches!(err, SaccoError::Conflict(_)));

        let welfare = apply(&mut conn, &op(), &application(b, LoanType::YukonWelfareLoan, dec!(500), 1, ymd(2025, 8, 1))).unwrap();
        approve(&mut conn, &op(), welfare.id, ymd(2025, 8, 1)).unwrap();
        let err = apply(&mut conn, &op(), &application(b, LoanType::SavingsLoan, dec!(1000), 1, ymd(2025, 8, 2))).unwrap_err();
        assert!(matches!(err, SaccoError::Conflict(_)));
    }

    #[test]
    fn test_pending_loan_does_not_block_other_type_but_approval_rechecks() {
        let (_dir, mut conn) = test_db();
        open_quarter(&mut conn, 2025, 3);
        let a = add_member(&conn, "Achieng", Some(Category::A));
        let savings = apply(&mut conn, &op(), &application(a, LoanType::SavingsLoan, dec!(1000), 1, ymd(2025, 8, 1))).unwrap();
        let welfare = apply(&mut conn, &op(), &application(a, LoanType::YukonWelfareLoan, dec!(500), 1, ymd(2025, 8, 1))).unwrap();
        approve(&mut conn, &op(), savings.id, ymd(2025, 8, 2)).unwrap();
        let err = approve(&mut conn, &op(), welfare.id, ymd(2025, 8, 2)).unwrap_err();
        assert!(matches!(err, SaccoError::Conflict(_)));
        assert_eq!(get(&conn, 1, welfare.id).unwrap().status, LoanStatus::Pending);
    }

    #[test]
    fn test_second_open_loan_of_same_type_conflicts() {
        let (_dir, mut conn) = test_db();
        open_quarter(&mut conn, 2025, 3);
        let a = add_member(&conn, "Achieng", Some(Category::A));
        apply(&mut conn, &op(), &application(a, LoanType::SavingsLoan, dec!(1000), 1, ymd(2025, 8, 1))).unwrap();
        let err = apply(&mut conn, &op(), &application(a, LoanType::SavingsLoan, dec!(2000), 1, ymd(2025, 8, 2))).unwrap_err();
        assert!(matches!(err, SaccoError::Conflict(_)));
    }

    #[test]
    fn test_state_machine_guards() {
        let (_dir, mut conn) = test_db();
        open_quarter(&mut conn, 2025, 3);
        let a = add_member(&conn, "Achieng", Some(Category::A));
        let loan = apply(&mut conn, &op(), &application(a, LoanType::SavingsLoan, dec!(1000), 1, ymd(2025, 8, 1))).unwrap();

        assert!(matches!(disburse(&conn, &op(), loan.id, ymd(2025, 8, 2)), Err(SaccoError::State(_))));
        assert!(matches!(
            record_repayment(&mut conn, &op(), loan.id, &pay(dec!(10), ymd(2025, 8, 2))),
            Err(SaccoError::State(_))
        ));
        assert!(matches!(mark_defaulted(&conn, &op(), loan.id), Err(SaccoError::State(_))));

        let approved = approve(&mut conn, &op(), loan.id, ymd(2025, 8, 2)).unwrap();
        assert_eq!(approved.approved_date, Some(ymd(2025, 8, 2)));
        assert!(matches!(approve(&mut conn, &op(), loan.id, ymd(2025, 8, 2)), Err(SaccoError::State(_))));
        assert!(matches!(reject(&conn, &op(), loan.id, "late"), Err(SaccoError::State(_))));

        let disbursed = disburse(&conn, &op(), loan.id, ymd(2025, 8, 3)).unwrap();
        assert_eq!(disbursed.status, LoanStatus::Disbursed);
        assert_eq!(disbursed.disbursed_date, Some(ymd(2025, 8, 3)));
    }

    #[test]
    fn test_only_operator_approves() {
        let (_dir, mut conn) = test_db();
        open_quarter(&mut conn, 2025, 3);
        let a = add_member(&conn, "Achieng", Some(Category::A));
        let loan = apply(&mut conn, &Actor::member(1, a), &application(a, LoanType::SavingsLoan, dec!(1000), 1, ymd(2025, 8, 1))).unwrap();
        let err = approve(&mut conn, &Actor::member(1, a), loan.id, ymd(2025, 8, 2)).unwrap_err();
        assert!(matches!(err, SaccoError::Forbidden(_)));
        let approved = approve(&mut conn, &Actor::operator(1, Some(99)), loan.id, ymd(2025, 8, 2)).unwrap();
        assert_eq!(approved.approved_by, Some(99));
    }

    #[test]
    fn test_reject_stores_reason_and_frees_member() {
        let (_dir, mut conn) = test_db();
        open_quarter(&mut conn, 2025, 3);
        let a = add_member(&conn, "Achieng", Some(Category::A));
        let loan = apply(&mut conn, &op(), &application(a, LoanType::SavingsLoan, dec!(1000), 1, ymd(2025, 8, 1))).unwrap();
        assert!(matches!(reject(&conn, &op(), loan.id, "  "), Err(SaccoError::Validation(_))));
        let rejected = reject(&conn, &op(), loan.id, "insufficient guarantors").unwrap();
        assert_eq!(rejected.status, LoanStatus::Rejected);
        assert_eq!(rejected.rejection_reason.as_deref(), Some("insufficient guarantors"));
        apply(&mut conn, &op(), &application(a, LoanType::SavingsLoan, dec!(1000), 1, ymd(2025, 8, 2))).unwrap();
    }

    #[test]
    fn test_repayment_allocates_interest_first() {
        let (_dir, mut conn) = test_db();
        open_quarter(&mut conn, 2025, 3);
        let a = add_member(&conn, "Achieng", Some(Category::A));
        let loan = disbursed_loan(&mut conn, a, LoanType::SavingsLoan, dec!(1000), ymd(2025, 8, 1));

        let first = record_repayment(&mut conn, &op(), loan.id, &pay(dec!(60), ymd(2025, 8, 5))).unwrap();
        assert_eq!(first.repayment.interest_portion, dec!(60));
        assert_eq!(first.repayment.principal_portion, Decimal::ZERO);

        let second = record_repayment(&mut conn, &op(), loan.id, &pay(dec!(100), ymd(2025, 8, 6))).unwrap();
        assert_eq!(second.repayment.interest_portion, dec!(40));
        assert_eq!(second.repayment.principal_portion, dec!(60));
        assert_eq!(second.loan.amount_paid, dec!(160));
        assert_eq!(second.loan.outstanding_balance, dec!(940));
        assert!(second.bearer_return.is_none());
        assert_balance_invariant(&second.loan);

        for r in repayments(&conn, 1, loan.id).unwrap() {
            assert_eq!(r.amount, r.interest_portion + r.principal_portion);
        }
    }

    #[test]
    fn test_overpayment_rejected_without_change() {
        let (_dir, mut conn) = test_db();
        open_quarter(&mut conn, 2025, 3);
        let a = add_member(&conn, "Achieng", Some(Category::A));
        let loan = disbursed_loan(&mut conn, a, LoanType::SavingsLoan, dec!(1000), ymd(2025, 8, 1));
        for amount in [dec!(1100.01), dec!(0), dec!(-1)] {
            let err = record_repayment(&mut conn, &op(), loan.id, &pay(amount, ymd(2025, 8, 5))).unwrap_err();
            assert!(matches!(err, SaccoError::Validation(_)), "amount {amount}");
        }
        let after = get(&conn, 1, loan.id).unwrap();
        assert_eq!(after.outstanding_balance, dec!(1100));
        assert!(repayments(&conn, 1, loan.id).unwrap().is_empty());
    }

    #[test]
    fn test_full_repayment_distributes_half_interest_to_bearer() {
        let (_dir, mut conn) = test_db();
        open_quarter(&mut conn, 2025, 3);
        let a = add_member(&conn, "Achieng", Some(Category::A));
        let loan = disbursed_loan(&mut conn, a, LoanType::SavingsLoan, dec!(1000), ymd(2025, 8, 1));

        let out = record_repayment(&mut conn, &op(), loan.id, &pay(dec!(1100), ymd(2025, 8, 20))).unwrap();
        assert_eq!(out.loan.status, LoanStatus::Repaid);
        assert_eq!(out.loan.actual_repayment_date, Some(ymd(2025, 8, 20)));
        let bearer = out.bearer_return.unwrap();
        assert_eq!(bearer.amount, dec!(50));
        assert_eq!(bearer.member_id, a);
        assert_eq!(bearer.distribution_type, DistributionType::BearerReturn);

        let all = interest::distributions(&conn, 1, Some(2025)).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(interest::year_pool(&conn, 1, 2025).unwrap(), dec!(50));

        let err = record_repayment(&mut conn, &op(), loan.id, &pay(dec!(1), ymd(2025, 8, 21))).unwrap_err();
        assert!(matches!(err, SaccoError::State(_)));
    }

    #[test]
    fn test_end_to_end_savings_loan() {
        let (_dir, mut conn) = test_db();
        open_quarter(&mut conn, 2025, 1);
        let a = add_member(&conn, "Achieng", Some(Category::A));
        let loan = apply(&mut conn, &op(), &application(a, LoanType::SavingsLoan, dec!(5000), 9, ymd(2025, 3, 10))).unwrap();
        assert_eq!(loan.total_amount, dec!(5500));
        approve(&mut conn, &op(), loan.id, ymd(2025, 3, 11)).unwrap();
        disburse(&conn, &op(), loan.id, ymd(2025, 3, 12)).unwrap();

        let first = record_repayment(&mut conn, &op(), loan.id, &pay(dec!(2500), ymd(2025, 4, 30))).unwrap();
        assert_balance_invariant(&first.loan);
        let second = record_repayment(&mut conn, &op(), loan.id, &pay(dec!(2500), ymd(2025, 6, 30))).unwrap();
        assert_eq!(second.loan.outstanding_balance, dec!(500));
        assert_eq!(second.loan.status, LoanStatus::Disbursed);
        let last = record_repayment(&mut conn, &op(), loan.id, &pay(dec!(500), ymd(2025, 7, 31))).unwrap();

        assert_eq!(last.loan.status, LoanStatus::Repaid);
        assert_eq!(last.loan.outstanding_balance, Decimal::ZERO);
        assert_eq!(last.bearer_return.unwrap().amount, dec!(250));
        let bearer: Vec<_> = interest::distributions(&conn, 1, Some(2025))
            .unwrap()
            .into_iter()
            .filter(|d| d.distribution_type == DistributionType::BearerReturn)
            .collect();
        assert_eq!(bearer.len(), 1);
    }

    #[test]
    fn test_overdue_query_and_default() {
        let (_dir, mut conn) = test_db();
        open_quarter(&mut conn, 2025, 3);
        let a = add_member(&conn, "Achieng", Some(Category::A));
        let b = add_member(&conn, "Baraka", Some(Category::A));
        let late = disbursed_loan(&mut conn, a, LoanType::SavingsLoan, dec!(1000), ymd(2025, 8, 1));
        let paid = disbursed_loan(&mut conn, b, LoanType::SavingsLoan, dec!(1000), ymd(2025, 8, 1));
        record_repayment(&mut conn, &op(), paid.id, &pay(dec!(1100), ymd(2025, 8, 30))).unwrap();

        assert!(overdue(&conn, 1, ymd(2025, 8, 31)).unwrap().is_empty());
        let found = overdue(&conn, 1, ymd(2025, 9, 1)).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, late.id);
        // overdue is a query only
        assert_eq!(get(&conn, 1, late.id).unwrap().status, LoanStatus::Disbursed);

        let defaulted = mark_defaulted(&conn, &op(), late.id).unwrap();
        assert_eq!(defaulted.status, LoanStatus::Defaulted);
        assert!(overdue(&conn, 1, ymd(2025, 9, 1)).unwrap().is_empty());
    }

    #[test]
    fn test_list_filters() {
        let (_dir, mut conn) = test_db();
        open_quarter(&mut conn, 2025, 3);
        let a = add_member(&conn, "Achieng", Some(Category::A));
        let b = add_member(&conn, "Baraka", Some(Category::A));
        disbursed_loan(&mut conn, a, LoanType::SavingsLoan, dec!(1000), ymd(2025, 8, 1));
        apply(&mut conn, &op(), &application(b, LoanType::SavingsLoan, dec!(1000), 1, ymd(2025, 8, 1))).unwrap();

        let by_member = list(&conn, 1, LoanFilter { member_id: Some(a), status: None }).unwrap();
        assert_eq!(by_member.len(), 1);
        let pending = list(&conn, 1, LoanFilter { member_id: None, status: Some(LoanStatus::Pending) }).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].member_id, b);
        assert_eq!(list(&conn, 1, LoanFilter::default()).unwrap().len(), 2);
        assert!(list(&conn, 2, LoanFilter::default()).unwrap().is_empty());
    }
}
