use chrono::NaiveDate;
use colored::Colorize;
use comfy_table::{Cell, Table};
use rusqlite::Connection;

use crate::cli::{resolve_period, today, Session};
use crate::db::get_metadata;
use crate::error::Result;
use crate::fmt::money;
use crate::loans::LoanFilter;
use crate::models::LoanStatus;
use crate::reports;

fn with_header(conn: &Connection, body: String) -> String {
    match get_metadata(conn, "organization_name") {
        Some(name) if !name.is_empty() => format!("{}\n\n{body}", name.bold()),
        _ => body,
    }
}

pub fn loans(session: &Session, status: Option<LoanStatus>) -> Result<()> {
    let data = reports::get_loan_register(&session.conn, session.org(), LoanFilter { member_id: None, status })?;
    println!("{}", with_header(&session.conn, format_loan_register(&data)));
    Ok(())
}

pub fn overdue(session: &Session, as_of: Option<NaiveDate>) -> Result<()> {
    let text = overdue_text(&session.conn, session.org(), as_of.unwrap_or_else(today))?;
    println!("{}", with_header(&session.conn, text));
    Ok(())
}

pub fn savings(session: &Session, period: Option<i64>) -> Result<()> {
    let text = savings_text(&session.conn, session.org(), period)?;
    println!("{}", with_header(&session.conn, text));
    Ok(())
}

pub fn distributions(session: &Session, year: Option<i32>) -> Result<()> {
    let data = reports::get_distribution_totals(&session.conn, session.org(), year)?;
    println!("{}", with_header(&session.conn, format_distributions(&data)));
    Ok(())
}

pub(crate) fn overdue_text(conn: &Connection, org: i64, as_of: NaiveDate) -> Result<String> {
    Ok(format_overdue(&reports::get_overdue(conn, org, as_of)?, as_of))
}

pub(crate) fn savings_text(conn: &Connection, org: i64, period: Option<i64>) -> Result<String> {
    let period = resolve_period(conn, org, period)?;
    Ok(format_savings(&reports::get_savings_summary(conn, org, period.id)?))
}

// ---------------------------------------------------------------------------
// Pure formatting functions (report data → String)
// ---------------------------------------------------------------------------

pub fn format_loan_register(data: &reports::LoanRegister) -> String {
    let mut table = Table::new();
    table.set_header(vec!["Number", "Member", "Type", "Principal", "Total", "Outstanding", "Due", "Status"]);
    for r in &data.rows {
        table.add_row(vec![
            Cell::new(&r.loan_number),
            Cell::new(&r.member),
            Cell::new(r.loan_type.name()),
            Cell::new(money(r.principal)),
            Cell::new(money(r.total_amount)),
            Cell::new(money(r.outstanding)),
            Cell::new(r.due),
            Cell::new(r.status),
        ]);
    }
    table.add_row(vec![
        Cell::new("Total".bold()),
        Cell::new(""),
        Cell::new(""),
        Cell::new(money(data.total_principal)),
        Cell::new(""),
        Cell::new(money(data.total_outstanding)),
        Cell::new(""),
        Cell::new(""),
    ]);
    format!("Loan Register\n{table}")
}

pub fn format_overdue(rows: &[reports::OverdueRow], as_of: NaiveDate) -> String {
    if rows.is_empty() {
        return format!("No overdue loans as of {as_of}.");
    }
    let mut table = Table::new();
    table.set_header(vec!["Number", "Member", "Due", "Days", "Outstanding"]);
    for r in rows {
        table.add_row(vec![
            Cell::new(&r.loan_number),
            Cell::new(&r.member),
            Cell::new(r.due),
            Cell::new(r.days_overdue.to_string().red()),
            Cell::new(money(r.outstanding)),
        ]);
    }
    format!("Overdue Loans as of {as_of}\n{table}")
}

pub fn format_savings(data: &reports::SavingsSummary) -> String {
    let mut table = Table::new();
    table.set_header(vec!["Member", "Monthly Target", "Months", "Saved", "Shared Out"]);
    for r in &data.rows {
        let target = match r.monthly_target {
            Some(t) => money(t),
            None => "(none)".yellow().to_string(),
        };
        table.add_row(vec![
            Cell::new(&r.member),
            Cell::new(target),
            Cell::new(r.months_saved),
            Cell::new(money(r.saved)),
            Cell::new(money(r.shared_out)),
        ]);
    }
    table.add_row(vec![
        Cell::new("Total".bold()),
        Cell::new(""),
        Cell::new(""),
        Cell::new(money(data.total_saved)),
        Cell::new(money(data.total_shared_out)),
    ]);
    format!("Savings {}\n{table}", data.period.label())
}

pub fn format_distributions(data: &reports::DistributionTotals) -> String {
    let mut table = Table::new();
    table.set_header(vec!["Interest", "Amount"]);
    table.add_row(vec![Cell::new("Earned on repaid loans"), Cell::new(money(data.interest_earned))]);
    table.add_row(vec![Cell::new("  Bearer returns"), Cell::new(money(data.bearer_returns))]);
    table.add_row(vec![Cell::new("  Committee shares"), Cell::new(money(data.committee_shares))]);
    table.add_row(vec![Cell::new("  Member shares"), Cell::new(money(data.member_shares))]);
    if let Some(done) = &data.year_end {
        table.add_row(vec![Cell::new("  Undistributed"), Cell::new(money(done.undistributed_remainder))]);
    } else {
        table.add_row(vec![
            Cell::new("Pooled, awaiting year end".yellow()),
            Cell::new(money(data.pending_pool)),
        ]);
    }
    format!("Interest Distribution {}\n{table}", data.year)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LoanType;
    use crate::test_support::ymd;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    #[test]
    fn test_no_overdue_message() {
        assert_eq!(format_overdue(&[], ymd(2025, 9, 1)), "No overdue loans as of 2025-09-01.");
    }

    #[test]
    fn test_loan_register_lists_rows_and_totals() {
        let data = reports::LoanRegister {
            rows: vec![reports::LoanRow {
                id: 1,
                loan_number: "LN-2025-0001".into(),
                member: "Achieng".into(),
                loan_type: LoanType::SavingsLoan,
                principal: dec!(5000),
                total_amount: dec!(5500),
                outstanding: dec!(3000),
                status: LoanStatus::Disbursed,
                due: ymd(2025, 12, 31),
            }],
            total_principal: dec!(5000),
            total_outstanding: dec!(3000),
        };
        let out = format_loan_register(&data);
        assert!(out.contains("LN-2025-0001"));
        assert!(out.contains("Savings Loan"));
        assert!(out.contains("5,500.00"));
        assert!(out.contains("3,000.00"));
    }

    #[test]
    fn test_distributions_show_pending_pool_before_year_end() {
        let data = reports::DistributionTotals {
            year: 2025,
            interest_earned: dec!(100),
            bearer_returns: dec!(50),
            committee_shares: Decimal::ZERO,
            member_shares: Decimal::ZERO,
            pending_pool: dec!(50),
            year_end: None,
        };
        let out = format_distributions(&data);
        assert!(out.contains("Pooled, awaiting year end"));
        assert!(out.contains("Interest Distribution 2025"));
    }
}
