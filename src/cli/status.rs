use crate::cli::{open_session, GlobalArgs};
use crate::db::{get_metadata, DB_FILE};
use crate::error::Result;
use crate::fmt::{format_bytes, money};
use crate::reports;
use crate::settings::load_settings;

pub fn run(globals: &GlobalArgs) -> Result<()> {
    let settings = load_settings();
    let data_dir = std::path::PathBuf::from(&settings.data_dir);
    let db_path = data_dir.join(DB_FILE);

    println!("Data dir:   {}", data_dir.display());
    println!("Database:   {}", db_path.display());

    if !db_path.exists() {
        println!();
        println!("Database not found. Run `sacco init` to set up.");
        return Ok(());
    }

    let size = std::fs::metadata(&db_path)?.len();
    println!("DB size:    {}", format_bytes(size));

    let session = open_session(globals)?;
    let name = get_metadata(&session.conn, "organization_name");
    println!("SACCO:      {}", name.as_deref().unwrap_or("(not set)"));
    println!("Org ID:     {}", session.org());

    let status = reports::get_status(&session.conn, session.org())?;
    println!();
    match &status.active_period {
        Some(p) if p.shareout_active => println!("Period:        {} (share-out open)", p.label()),
        Some(p) => println!("Period:        {}", p.label()),
        None => println!("Period:        (none active)"),
    }
    println!("Members:       {}", status.active_members);
    println!("Committee:     {}/4", status.committee_seats);
    for (loan_status, count) in &status.loans_by_status {
        println!("Loans {:<9} {count}", format!("{loan_status}:"));
    }
    println!("Outstanding:   {}", money(status.outstanding_total));
    Ok(())
}
