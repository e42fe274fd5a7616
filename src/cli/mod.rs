pub mod backup;
pub mod init;
pub mod loans;
pub mod members;
pub mod periods;
pub mod report;
pub mod savings;
pub mod shareout;
pub mod status;
pub mod year_end;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use rusqlite::Connection;
use rust_decimal::Decimal;

use crate::actor::Actor;
use crate::db::{get_connection, DB_FILE};
use crate::error::{Result, SaccoError};
use crate::models::{Category, CommitteeRoleKind, LoanStatus, LoanType, OperatingPeriod, PaymentMethod};
use crate::periods as period_ledger;
use crate::settings::{get_data_dir, load_settings};

#[derive(Parser)]
#[command(name = "sacco", about = "Savings-and-credit cooperative accounting: loans, savings, share-outs.")]
pub struct Cli {
    #[command(flatten)]
    pub globals: GlobalArgs,
    #[command(subcommand)]
    pub command: Commands,
}

/// Who the command runs as. Defaults come from settings.json.
#[derive(Args, Clone, Default)]
pub struct GlobalArgs {
    /// Organization to work in
    #[arg(long, global = true)]
    pub org: Option<i64>,
    /// Act as this member (member role unless --operator is also given)
    #[arg(long = "as-member", global = true)]
    pub as_member: Option<i64>,
    /// Act with operator rights
    #[arg(long, global = true)]
    pub operator: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Set up sacco: choose a data directory and initialize the database.
    Init {
        /// Path for sacco data (default: ~/Documents/sacco)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
        /// Organization name recorded in the database
        #[arg(long)]
        name: Option<String>,
    },
    /// Show current database and summary statistics.
    Status,
    /// Back up the database.
    Backup {
        /// Output path (default: <data_dir>/backups/sacco-YYYYMMDD-HHMMSS.db)
        #[arg(long)]
        output: Option<String>,
    },
    /// Manage operating periods (quarters).
    Period {
        #[command(subcommand)]
        command: PeriodCommands,
    },
    /// Manage members and the committee.
    Member {
        #[command(subcommand)]
        command: MemberCommands,
    },
    /// Loan applications, approvals and repayments.
    Loan {
        #[command(subcommand)]
        command: LoanCommands,
    },
    /// Savings targets and monthly contributions.
    Savings {
        #[command(subcommand)]
        command: SavingsCommands,
    },
    /// Period share-out decisions and payouts.
    Shareout {
        #[command(subcommand)]
        command: ShareoutCommands,
    },
    /// Year-end interest distribution.
    #[command(name = "year-end")]
    YearEnd {
        #[command(subcommand)]
        command: YearEndCommands,
    },
    /// Generate reports.
    Report {
        #[command(subcommand)]
        command: ReportCommands,
    },
}

#[derive(Subcommand)]
pub enum PeriodCommands {
    /// Create a quarter.
    Create {
        year: i32,
        /// Quarter number, 1-4
        quarter: u32,
    },
    /// List all periods.
    List,
    /// Make a period the active one.
    Activate { id: i64 },
    /// Close a period.
    Complete { id: i64 },
}

#[derive(Subcommand)]
pub enum MemberCommands {
    /// Register a member.
    Add {
        name: String,
        /// Category: A, B or C
        #[arg(long)]
        category: Option<Category>,
    },
    /// List active members.
    List,
    /// Set or clear a member's category.
    Category {
        id: i64,
        /// New category; omit to clear
        category: Option<Category>,
    },
    /// Deactivate a member and vacate any committee seat.
    Deactivate { id: i64 },
    /// Give a member a committee role: chair, secretary, treasurer, disburser.
    Assign { id: i64, role: CommitteeRoleKind },
    /// Vacate a committee role.
    Revoke { role: CommitteeRoleKind },
    /// Show the active committee.
    Committee,
}

#[derive(Subcommand)]
pub enum LoanCommands {
    /// Apply for a loan.
    Apply {
        /// Borrowing member ID
        member: i64,
        /// Loan type: savings_loan, yukon_welfare_loan
        #[arg(long = "type")]
        loan_type: LoanType,
        #[arg(long)]
        amount: Decimal,
        /// Repayment period in months
        #[arg(long)]
        months: u32,
        #[arg(long)]
        purpose: Option<String>,
        /// Application date (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Approve a pending loan.
    Approve {
        id: i64,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Reject a pending loan.
    Reject {
        id: i64,
        #[arg(long)]
        reason: String,
    },
    /// Mark an approved loan as paid out.
    Disburse {
        id: i64,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Record a repayment.
    Repay {
        id: i64,
        #[arg(long)]
        amount: Decimal,
        /// cash, mobile_money, bank_transfer, cheque
        #[arg(long, default_value = "cash")]
        method: PaymentMethod,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Mark a disbursed loan as defaulted.
    #[command(name = "default")]
    MarkDefaulted { id: i64 },
    /// List loans.
    List {
        #[arg(long)]
        member: Option<i64>,
        #[arg(long)]
        status: Option<LoanStatus>,
    },
    /// Show a loan and its repayments.
    Show { id: i64 },
    /// List disbursed loans past their due date.
    Overdue {
        #[arg(long = "as-of")]
        as_of: Option<NaiveDate>,
    },
    /// Check whether a member may take a loan type and for how long.
    Eligibility {
        member: i64,
        #[arg(long = "type")]
        loan_type: LoanType,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

#[derive(Subcommand)]
pub enum SavingsCommands {
    /// Set a member's monthly savings target.
    Target {
        member: i64,
        #[arg(long)]
        amount: Decimal,
        /// Period ID (default: active period)
        #[arg(long)]
        period: Option<i64>,
    },
    /// Show what initiating a month would create.
    Preview {
        /// Calendar month, 1-12
        month: u32,
        #[arg(long)]
        period: Option<i64>,
    },
    /// Create the month's savings entries for every active member.
    Initiate {
        month: u32,
        #[arg(long)]
        period: Option<i64>,
    },
    /// Savings per member for a period.
    Summary {
        #[arg(long)]
        period: Option<i64>,
    },
}

#[derive(Subcommand)]
pub enum ShareoutCommands {
    /// Open share-out for a period.
    Open {
        #[arg(long)]
        period: Option<i64>,
    },
    /// Record a member's decision.
    Decide {
        member: i64,
        /// The member withdraws their savings
        #[arg(long, conflicts_with = "stay", required_unless_present = "stay")]
        withdraw: bool,
        /// The member keeps their savings in
        #[arg(long)]
        stay: bool,
        #[arg(long)]
        period: Option<i64>,
    },
    /// Pay out one or more decisions; all succeed or none do.
    Complete {
        #[arg(required = true)]
        ids: Vec<i64>,
    },
    /// List decisions for a period.
    List {
        #[arg(long)]
        period: Option<i64>,
    },
}

#[derive(Subcommand)]
pub enum YearEndCommands {
    /// Distribute the year's pooled interest.
    Run {
        year: i32,
        /// Distribution date (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Show a completed distribution.
    Show { year: i32 },
}

#[derive(Subcommand)]
pub enum ReportCommands {
    /// Loan register.
    Loans {
        #[arg(long)]
        status: Option<LoanStatus>,
    },
    /// Overdue loans.
    Overdue {
        #[arg(long = "as-of")]
        as_of: Option<NaiveDate>,
    },
    /// Savings per member for a period.
    Savings {
        #[arg(long)]
        period: Option<i64>,
    },
    /// Interest earned and distributed in a year.
    Distributions {
        #[arg(long)]
        year: Option<i32>,
    },
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// An open database and the actor every command runs as.
pub struct Session {
    pub conn: Connection,
    pub actor: Actor,
}

impl Session {
    pub fn org(&self) -> i64 {
        self.actor.organization_id
    }
}

pub(crate) fn resolve_actor(globals: &GlobalArgs) -> Result<Actor> {
    let settings = load_settings();
    let org = globals.org.unwrap_or(settings.organization_id);
    let (member_id, operator) = match globals.as_member {
        Some(id) => (Some(id), globals.operator),
        None => (settings.actor_member_id, settings.operator || globals.operator),
    };
    if operator {
        return Ok(Actor::operator(org, member_id));
    }
    member_id
        .map(|id| Actor::member(org, id))
        .ok_or_else(|| SaccoError::Settings("acting as a member requires --as-member <ID>".into()))
}

pub(crate) fn open_session(globals: &GlobalArgs) -> Result<Session> {
    let db_path = get_data_dir().join(DB_FILE);
    if !db_path.exists() {
        return Err(SaccoError::Settings(format!(
            "no database at {}; run `sacco init` first",
            db_path.display()
        )));
    }
    Ok(Session { conn: get_connection(&db_path)?, actor: resolve_actor(globals)? })
}

pub(crate) fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// The given period, or the active one.
pub(crate) fn resolve_period(conn: &Connection, org: i64, period: Option<i64>) -> Result<OperatingPeriod> {
    match period {
        Some(id) => period_ledger::get(conn, org, id),
        None => period_ledger::current_active(conn, org)?
            .ok_or_else(|| SaccoError::Validation("no active period; pass --period".into())),
    }
}
