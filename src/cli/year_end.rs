use chrono::NaiveDate;
use comfy_table::{Cell, Table};

use crate::cli::{today, Session};
use crate::error::{Result, SaccoError};
use crate::fmt::money;
use crate::models::YearDistribution;
use crate::year_end;

pub fn run(session: &mut Session, year: i32, date: Option<NaiveDate>) -> Result<()> {
    let summary = year_end::calculate_and_distribute(&mut session.conn, &session.actor, year, date.unwrap_or_else(today))?;
    println!("{}", format_summary(&summary));
    Ok(())
}

pub fn show(session: &Session, year: i32) -> Result<()> {
    let summary = year_end::get(&session.conn, session.org(), year)?
        .ok_or_else(|| SaccoError::NotFound(format!("year-end distribution for {year}")))?;
    println!("{}", format_summary(&summary));

    let shares = year_end::shares(&session.conn, session.org(), year)?;
    let mut table = Table::new();
    table.set_header(vec!["Member ID", "Pool", "Amount"]);
    for s in &shares {
        table.add_row(vec![Cell::new(s.member_id), Cell::new(s.pool), Cell::new(money(s.amount))]);
    }
    println!("\nShares\n{table}");
    Ok(())
}

pub fn format_summary(d: &YearDistribution) -> String {
    let mut table = Table::new();
    table.set_header(vec!["", "Amount"]);
    table.add_row(vec![Cell::new("Interest earned"), Cell::new(money(d.total_interest))]);
    table.add_row(vec![Cell::new("Pooled for distribution"), Cell::new(money(d.available_for_distribution))]);
    table.add_row(vec![
        Cell::new(format!("Committee ({} x {})", d.committee_count, money(d.per_committee_member))),
        Cell::new(money(d.committee_share)),
    ]);
    table.add_row(vec![
        Cell::new(format!("Members ({} x {})", d.member_count, money(d.per_member))),
        Cell::new(money(d.members_share)),
    ]);
    table.add_row(vec![Cell::new("Undistributed"), Cell::new(money(d.undistributed_remainder))]);
    format!("Year-end distribution {}\n{table}", d.year)
}
