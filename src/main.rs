mod actor;
mod cli;
mod db;
mod eligibility;
mod error;
mod fmt;
mod interest;
mod loans;
mod members;
mod models;
mod periods;
mod reports;
mod rules;
mod savings;
mod settings;
mod shareout;
#[cfg(test)]
mod test_support;
mod year_end;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{
    open_session, Cli, Commands, LoanCommands, MemberCommands, PeriodCommands, ReportCommands,
    SavingsCommands, ShareoutCommands, YearEndCommands,
};
use error::Result;

fn init_logging() {
    let filter = EnvFilter::try_from_env("SACCO_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let globals = cli.globals;
    match cli.command {
        Commands::Init { data_dir, name } => cli::init::run(data_dir, name),
        Commands::Status => cli::status::run(&globals),
        Commands::Backup { output } => cli::backup::run(output),
        Commands::Period { command } => {
            let mut s = open_session(&globals)?;
            match command {
                PeriodCommands::Create { year, quarter } => cli::periods::create(&mut s, year, quarter),
                PeriodCommands::List => cli::periods::list(&s),
                PeriodCommands::Activate { id } => cli::periods::activate(&mut s, id),
                PeriodCommands::Complete { id } => cli::periods::complete(&mut s, id),
            }
        }
        Commands::Member { command } => {
            let mut s = open_session(&globals)?;
            match command {
                MemberCommands::Add { name, category } => cli::members::add(&s, &name, category),
                MemberCommands::List => cli::members::list(&s),
                MemberCommands::Category { id, category } => cli::members::set_category(&s, id, category),
                MemberCommands::Deactivate { id } => cli::members::deactivate(&mut s, id),
                MemberCommands::Assign { id, role } => cli::members::assign(&s, id, role),
                MemberCommands::Revoke { role } => cli::members::revoke(&s, role),
                MemberCommands::Committee => cli::members::committee(&s),
            }
        }
        Commands::Loan { command } => {
            let mut s = open_session(&globals)?;
            match command {
                LoanCommands::Apply {
                    member,
                    loan_type,
                    amount,
                    months,
                    purpose,
                    date,
                } => cli::loans::apply(&mut s, member, loan_type, amount, months, purpose, date),
                LoanCommands::Approve { id, date } => cli::loans::approve(&mut s, id, date),
                LoanCommands::Reject { id, reason } => cli::loans::reject(&s, id, &reason),
                LoanCommands::Disburse { id, date } => cli::loans::disburse(&s, id, date),
                LoanCommands::Repay {
                    id,
                    amount,
                    method,
                    notes,
                    date,
                } => cli::loans::repay(&mut s, id, amount, method, notes, date),
                LoanCommands::MarkDefaulted { id } => cli::loans::mark_defaulted(&s, id),
                LoanCommands::List { member, status } => cli::loans::list(&s, member, status),
                LoanCommands::Show { id } => cli::loans::show(&s, id),
                LoanCommands::Overdue { as_of } => cli::loans::overdue(&s, as_of),
                LoanCommands::Eligibility {
                    member,
                    loan_type,
                    date,
                } => cli::loans::eligibility(&s, member, loan_type, date),
            }
        }
        Commands::Savings { command } => {
            let mut s = open_session(&globals)?;
            match command {
                SavingsCommands::Target { member, amount, period } => {
                    cli::savings::target(&s, member, amount, period)
                }
                SavingsCommands::Preview { month, period } => cli::savings::preview(&s, month, period),
                SavingsCommands::Initiate { month, period } => cli::savings::initiate(&mut s, month, period),
                SavingsCommands::Summary { period } => cli::savings::summary(&s, period),
            }
        }
        Commands::Shareout { command } => {
            let mut s = open_session(&globals)?;
            match command {
                ShareoutCommands::Open { period } => cli::shareout::open(&s, period),
                ShareoutCommands::Decide {
                    member,
                    withdraw,
                    stay: _,
                    period,
                } => cli::shareout::decide(&mut s, member, withdraw, period),
                ShareoutCommands::Complete { ids } => cli::shareout::complete(&mut s, &ids),
                ShareoutCommands::List { period } => cli::shareout::list(&s, period),
            }
        }
        Commands::YearEnd { command } => {
            let mut s = open_session(&globals)?;
            match command {
                YearEndCommands::Run { year, date } => cli::year_end::run(&mut s, year, date),
                YearEndCommands::Show { year } => cli::year_end::show(&s, year),
            }
        }
        Commands::Report { command } => {
            let s = open_session(&globals)?;
            match command {
                ReportCommands::Loans { status } => cli::report::loans(&s, status),
                ReportCommands::Overdue { as_of } => cli::report::overdue(&s, as_of),
                ReportCommands::Savings { period } => cli::report::savings(&s, period),
                ReportCommands::Distributions { year } => cli::report::distributions(&s, year),
            }
        }
    }
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
