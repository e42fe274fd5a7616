use colored::Colorize;
use comfy_table::{Cell, Table};
use rust_decimal::Decimal;

use crate::cli::{resolve_period, Session};
use crate::error::Result;
use crate::fmt::money;
use crate::savings;

pub fn target(session: &Session, member_id: i64, amount: Decimal, period: Option<i64>) -> Result<()> {
    let period = resolve_period(&session.conn, session.org(), period)?;
    let t = savings::set_target(&session.conn, &session.actor, member_id, period.id, amount)?;
    println!("Member {member_id} saves {} a month in {}", money(t.monthly_target), period.label());
    Ok(())
}

pub fn preview(session: &Session, month: u32, period: Option<i64>) -> Result<()> {
    let period = resolve_period(&session.conn, session.org(), period)?;
    let p = savings::preview_initiation(&session.conn, session.org(), period.id, month)?;

    let mut table = Table::new();
    table.set_header(vec!["Member ID", "Name", "Amount"]);
    for line in &p.lines {
        table.add_row(vec![Cell::new(line.member_id), Cell::new(&line.name), Cell::new(money(line.amount))]);
    }
    table.add_row(vec![Cell::new(""), Cell::new("Total".bold()), Cell::new(money(p.total))]);
    println!("Savings for month {month} of {}\n{table}", p.period.label());

    if p.already_initiated {
        println!("{}", "This month has already been initiated.".yellow());
    }
    if !p.missing_targets.is_empty() {
        println!("{}", "Members without a target:".yellow());
        for m in &p.missing_targets {
            println!("  {} (id {})", m.name, m.id);
        }
    }
    if p.is_ready() {
        println!("Ready to initiate.");
    }
    Ok(())
}

pub fn initiate(session: &mut Session, month: u32, period: Option<i64>) -> Result<()> {
    let period = resolve_period(&session.conn, session.org(), period)?;
    let created = savings::initiate(&mut session.conn, &session.actor, period.id, month)?;
    let total: Decimal = created.iter().map(|e| e.amount).sum();
    println!(
        "Initiated month {month} of {}: {} entries, {}",
        period.label(),
        created.len(),
        money(total)
    );
    Ok(())
}

pub fn summary(session: &Session, period: Option<i64>) -> Result<()> {
    let text = crate::cli::report::savings_text(&session.conn, session.org(), period)?;
    println!("{text}");
    Ok(())
}
