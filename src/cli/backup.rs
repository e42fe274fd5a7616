use std::path::PathBuf;
use std::time::Duration;

use rusqlite::backup::Backup;
use tracing::info;

use crate::db::{get_connection, get_metadata, set_metadata, DB_FILE};
use crate::error::{Result, SaccoError};
use crate::fmt::format_bytes;
use crate::settings::get_data_dir;

/// Copy the live database page by page, then stamp the source with the time.
pub fn run(output: Option<String>) -> Result<()> {
    let data_dir = get_data_dir();
    let db_path = data_dir.join(DB_FILE);
    if !db_path.exists() {
        return Err(SaccoError::Settings(format!("no database at {}", db_path.display())));
    }
    let conn = get_connection(&db_path)?;
    let previous = get_metadata(&conn, "last_backup_at");

    let dest_path = output.map(PathBuf::from).unwrap_or_else(|| {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        data_dir.join("backups").join(format!("sacco-{stamp}.db"))
    });
    if let Some(parent) = dest_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    {
        let mut dest = rusqlite::Connection::open(&dest_path)?;
        Backup::new(&conn, &mut dest)?.run_to_completion(100, Duration::from_millis(10), None)?;
    }
    set_metadata(&conn, "last_backup_at", &chrono::Local::now().to_rfc3339())?;

    let size = std::fs::metadata(&dest_path)?.len();
    info!(path = %dest_path.display(), size, "database backed up");
    println!("Backup saved to {} ({})", dest_path.display(), format_bytes(size));
    if let Some(prev) = previous {
        println!("Previous backup: {prev}");
    }
    Ok(())
}
