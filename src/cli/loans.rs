use chrono::NaiveDate;
use colored::Colorize;
use comfy_table::{Cell, Table};
use rust_decimal::Decimal;

use crate::cli::{today, Session};
use crate::eligibility;
use crate::error::{Result, SaccoError};
use crate::fmt::money;
use crate::loans::{self, LoanApplication, LoanFilter, Payment};
use crate::members;
use crate::models::{Loan, LoanStatus, LoanType, PaymentMethod};

fn status_cell(status: LoanStatus) -> Cell {
    let label = status.to_string();
    Cell::new(match status {
        LoanStatus::Repaid => label.green().to_string(),
        LoanStatus::Defaulted | LoanStatus::Rejected => label.red().to_string(),
        LoanStatus::Pending => label.yellow().to_string(),
        _ => label,
    })
}

fn print_loan(loan: &Loan) {
    println!("{} {}", loan.loan_number.bold(), loan.loan_type.name());
    println!("  Principal:    {}", money(loan.principal));
    println!("  Total due:    {} ({}% flat)", money(loan.total_amount), loan.interest_rate);
    println!("  Outstanding:  {}", money(loan.outstanding_balance));
    println!("  Due:          {}", loan.expected_repayment_date);
    println!("  Status:       {}", loan.status);
}

pub fn apply(
    session: &mut Session,
    member_id: i64,
    loan_type: LoanType,
    amount: Decimal,
    months: u32,
    purpose: Option<String>,
    date: Option<NaiveDate>,
) -> Result<()> {
    let app = LoanApplication {
        member_id,
        loan_type,
        amount,
        purpose,
        repayment_months: months,
        applied_on: date.unwrap_or_else(today),
    };
    let loan = loans::apply(&mut session.conn, &session.actor, &app)?;
    println!("Loan application recorded (id {})", loan.id);
    print_loan(&loan);
    Ok(())
}

pub fn approve(session: &mut Session, id: i64, date: Option<NaiveDate>) -> Result<()> {
    let loan = loans::approve(&mut session.conn, &session.actor, id, date.unwrap_or_else(today))?;
    println!("Approved {}", loan.loan_number);
    Ok(())
}

pub fn reject(session: &Session, id: i64, reason: &str) -> Result<()> {
    let loan = loans::reject(&session.conn, &session.actor, id, reason)?;
    println!("Rejected {}", loan.loan_number);
    Ok(())
}

pub fn disburse(session: &Session, id: i64, date: Option<NaiveDate>) -> Result<()> {
    let loan = loans::disburse(&session.conn, &session.actor, id, date.unwrap_or_else(today))?;
    println!("Disbursed {} ({})", loan.loan_number, money(loan.principal));
    Ok(())
}

pub fn repay(
    session: &mut Session,
    id: i64,
    amount: Decimal,
    method: PaymentMethod,
    notes: Option<String>,
    date: Option<NaiveDate>,
) -> Result<()> {
    let payment = Payment { amount, method, notes, paid_on: date.unwrap_or_else(today) };
    let out = loans::record_repayment(&mut session.conn, &session.actor, id, &payment)?;
    println!(
        "Recorded {} on {} (interest {}, principal {})",
        money(out.repayment.amount),
        out.loan.loan_number,
        money(out.repayment.interest_portion),
        money(out.repayment.principal_portion)
    );
    println!("Outstanding: {}", money(out.loan.outstanding_balance));
    if let Some(bearer) = out.bearer_return {
        println!("{} Bearer return of {} credited to member {}", "Repaid.".green().bold(), money(bearer.amount), bearer.member_id);
    }
    Ok(())
}

pub fn mark_defaulted(session: &Session, id: i64) -> Result<()> {
    let loan = loans::mark_defaulted(&session.conn, &session.actor, id)?;
    println!("{} {} with {} outstanding", "Defaulted".red(), loan.loan_number, money(loan.outstanding_balance));
    Ok(())
}

pub fn list(session: &Session, member_id: Option<i64>, status: Option<LoanStatus>) -> Result<()> {
    let all = loans::list(&session.conn, session.org(), LoanFilter { member_id, status })?;
    let mut table = Table::new();
    table.set_header(vec!["ID", "Number", "Member", "Type", "Principal", "Outstanding", "Due", "Status"]);
    for l in &all {
        table.add_row(vec![
            Cell::new(l.id),
            Cell::new(&l.loan_number),
            Cell::new(l.member_id),
            Cell::new(l.loan_type.name()),
            Cell::new(money(l.principal)),
            Cell::new(money(l.outstanding_balance)),
            Cell::new(l.expected_repayment_date),
            status_cell(l.status),
        ]);
    }
    println!("Loans\n{table}");
    Ok(())
}

pub fn show(session: &Session, id: i64) -> Result<()> {
    let loan = loans::get(&session.conn, session.org(), id)?;
    print_loan(&loan);
    if let Some(reason) = &loan.rejection_reason {
        println!("  Reason:       {reason}");
    }
    let repayments = loans::repayments(&session.conn, session.org(), id)?;
    if repayments.is_empty() {
        return Ok(());
    }
    let mut table = Table::new();
    table.set_header(vec!["Date", "Amount", "Interest", "Principal", "Method"]);
    for r in &repayments {
        table.add_row(vec![
            Cell::new(r.payment_date),
            Cell::new(money(r.amount)),
            Cell::new(money(r.interest_portion)),
            Cell::new(money(r.principal_portion)),
            Cell::new(r.payment_method),
        ]);
    }
    println!("\nRepayments\n{table}");
    Ok(())
}

pub fn overdue(session: &Session, as_of: Option<NaiveDate>) -> Result<()> {
    let text = crate::cli::report::overdue_text(&session.conn, session.org(), as_of.unwrap_or_else(today))?;
    println!("{text}");
    Ok(())
}

pub fn eligibility(session: &Session, member_id: i64, loan_type: LoanType, date: Option<NaiveDate>) -> Result<()> {
    let as_of = date.unwrap_or_else(today);
    let member = members::get(&session.conn, session.org(), member_id)?;
    if !eligibility::is_eligible(&session.conn, session.org(), &member, loan_type, as_of)? {
        let reason = eligibility::check(&session.conn, session.org(), &member, loan_type, as_of)?
            .map(|r| r.to_string())
            .unwrap_or_default();
        println!("{} {}: {reason}", member.name, "not eligible".red());
        return Ok(());
    }
    let category = member
        .category
        .ok_or_else(|| SaccoError::Validation("member has no category".into()))?;
    let limits = eligibility::limits_for(category, loan_type)
        .ok_or_else(|| SaccoError::Validation(format!("no loan rule for category {category}")))?;
    let months = eligibility::max_repayment_months(loan_type, category, as_of);
    if months == 0 {
        println!("{} {}: a {} taken on {as_of} would cross into the next year", member.name, "not eligible".red(), loan_type.name());
        return Ok(());
    }
    println!("{} {} for a {}", member.name, "eligible".green(), loan_type.name());
    println!("  Amount:       {} to {}", money(limits.min_amount), money(limits.max_amount));
    println!("  Interest:     {}% flat", limits.interest_rate);
    println!("  Max months:   {months}");
    Ok(())
}
