use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::cli::Session;
use crate::error::Result;
use crate::models::OperatingPeriod;
use crate::periods;

pub fn create(session: &mut Session, year: i32, quarter: u32) -> Result<()> {
    let p = periods::create_period(&mut session.conn, &session.actor, year, quarter)?;
    println!("Created period {} ({} to {}), id {}", p.label(), p.start_date, p.end_date, p.id);
    Ok(())
}

pub fn list(session: &Session) -> Result<()> {
    let all = periods::list(&session.conn, session.org())?;
    println!("Periods\n{}", format_periods(&all));
    Ok(())
}

pub fn activate(session: &mut Session, id: i64) -> Result<()> {
    let p = periods::activate(&mut session.conn, &session.actor, id)?;
    println!("Active period: {}", p.label().green());
    Ok(())
}

pub fn complete(session: &mut Session, id: i64) -> Result<()> {
    let p = periods::complete(&mut session.conn, &session.actor, id)?;
    println!("Completed period {}", p.label());
    Ok(())
}

pub fn format_periods(periods: &[OperatingPeriod]) -> String {
    let mut table = Table::new();
    table.set_header(vec!["ID", "Period", "Start", "End", "State"]);
    for p in periods {
        let state = if p.is_completed {
            "completed".dimmed().to_string()
        } else if p.is_active && p.shareout_active {
            "active, share-out open".green().to_string()
        } else if p.is_active {
            "active".green().bold().to_string()
        } else {
            String::new()
        };
        table.add_row(vec![
            Cell::new(p.id),
            Cell::new(p.label()),
            Cell::new(p.start_date),
            Cell::new(p.end_date),
            Cell::new(state),
        ]);
    }
    table.to_string()
}
