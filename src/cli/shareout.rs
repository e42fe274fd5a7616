use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::cli::{resolve_period, Session};
use crate::error::Result;
use crate::fmt::money;
use crate::shareout::{self, SHAREOUT_INTEREST_RATE};

pub fn open(session: &Session, period: Option<i64>) -> Result<()> {
    let period = resolve_period(&session.conn, session.org(), period)?;
    let p = shareout::activate(&session.conn, &session.actor, period.id)?;
    println!("Share-out open for {}", p.label());
    Ok(())
}

pub fn decide(session: &mut Session, member_id: i64, withdraw: bool, period: Option<i64>) -> Result<()> {
    let period = resolve_period(&session.conn, session.org(), period)?;
    let d = shareout::record_decision(&mut session.conn, &session.actor, member_id, period.id, withdraw)?;
    if d.wants_shareout {
        println!(
            "Member {member_id} withdraws {} plus {} interest (decision {})",
            money(d.savings_balance),
            money(d.interest_amount),
            d.id
        );
    } else {
        println!("Member {member_id} keeps {} saved (decision {})", money(d.savings_balance), d.id);
    }
    Ok(())
}

pub fn complete(session: &mut Session, ids: &[i64]) -> Result<()> {
    let done = match ids {
        [one] => vec![shareout::complete(&mut session.conn, &session.actor, *one)?],
        many => shareout::bulk_complete(&mut session.conn, &session.actor, many)?,
    };
    for d in &done {
        println!(
            "{} member {}: {}",
            "Paid".green(),
            d.member_id,
            money(d.savings_balance + d.interest_amount)
        );
    }
    Ok(())
}

pub fn list(session: &Session, period: Option<i64>) -> Result<()> {
    let period = resolve_period(&session.conn, session.org(), period)?;
    let decisions = shareout::decisions(&session.conn, session.org(), period.id)?;
    let mut table = Table::new();
    table.set_header(vec!["ID", "Member ID", "Decision", "Savings", "Interest", "Paid"]);
    for d in &decisions {
        table.add_row(vec![
            Cell::new(d.id),
            Cell::new(d.member_id),
            Cell::new(if d.wants_shareout { "withdraw" } else { "stay" }),
            Cell::new(money(d.savings_balance)),
            Cell::new(money(d.interest_amount)),
            Cell::new(d.shareout_completed_at.as_deref().unwrap_or("")),
        ]);
    }
    println!("Share-out decisions for {} ({}% interest)\n{table}", period.label(), SHAREOUT_INTEREST_RATE);
    Ok(())
}
