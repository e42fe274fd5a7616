//! Shared fixtures for the per-module test suites.

use chrono::NaiveDate;
use rusqlite::Connection;

use crate::actor::Actor;
use crate::db::{get_connection, init_db};
use crate::members;
use crate::models::{Category, OperatingPeriod};
use crate::periods;

pub fn test_db() -> (tempfile::TempDir, Connection) {
    let dir = tempfile::tempdir().unwrap();
    let conn = get_connection(&dir.path().join("test.db")).unwrap();
    init_db(&conn).unwrap();
    (dir, conn)
}

pub fn op() -> Actor {
    Actor::operator(1, None)
}

pub fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn add_member(conn: &Connection, name: &str, category: Option<Category>) -> i64 {
    members::add_member(conn, &op(), name, category).unwrap().id
}

/// Create and activate a quarter.
pub fn open_quarter(conn: &mut Connection, year: i32, quarter: u32) -> OperatingPeriod {
    let p = periods::create_period(conn, &op(), year, quarter).unwrap();
    periods::activate(conn, &op(), p.id).unwrap()
}
