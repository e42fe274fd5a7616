use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

use crate::error::SaccoError;

/// Stores a string-keyed enum as TEXT using its `key()` and `FromStr`.
macro_rules! text_column {
    ($ty:ty) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.key()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: SaccoError| FromSqlError::Other(Box::new(e)))
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.key())
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// Member tier. Controls loan limits, eligibility windows and savings minimums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    A,
    B,
    C,
}

impl Category {
    pub fn key(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
        }
    }
}

impl FromStr for Category {
    type Err = SaccoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            "C" => Ok(Self::C),
            other => Err(SaccoError::Validation(format!("unknown category: {other}"))),
        }
    }
}

text_column!(Category);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoanType {
    SavingsLoan,
    YukonWelfareLoan,
}

pub const ALL_LOAN_TYPES: &[LoanType] = &[LoanType::SavingsLoan, LoanType::YukonWelfareLoan];

impl LoanType {
    pub fn key(&self) -> &'static str {
        match self {
            Self::SavingsLoan => "savings_loan",
            Self::YukonWelfareLoan => "yukon_welfare_loan",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SavingsLoan => "Savings Loan",
            Self::YukonWelfareLoan => "Yukon Welfare Loan",
        }
    }

    /// The loan type a member may not hold concurrently with this one.
    pub fn conflicting(&self) -> LoanType {
        match self {
            Self::SavingsLoan => Self::YukonWelfareLoan,
            Self::YukonWelfareLoan => Self::SavingsLoan,
        }
    }
}

impl FromStr for LoanType {
    type Err = SaccoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_LOAN_TYPES
            .iter()
            .find(|t| t.key() == s.trim())
            .copied()
            .ok_or_else(|| SaccoError::Validation(format!("unknown loan type: {s}")))
    }
}

text_column!(LoanType);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoanStatus {
    Pending,
    Approved,
    Disbursed,
    Repaid,
    Defaulted,
    Rejected,
}

impl LoanStatus {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Disbursed => "disbursed",
            Self::Repaid => "repaid",
            Self::Defaulted => "defaulted",
            Self::Rejected => "rejected",
        }
    }

    #[allow(dead_code)]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Repaid | Self::Defaulted | Self::Rejected)
    }
}

impl FromStr for LoanStatus {
    type Err = SaccoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "disbursed" => Ok(Self::Disbursed),
            "repaid" => Ok(Self::Repaid),
            "defaulted" => Ok(Self::Defaulted),
            "rejected" => Ok(Self::Rejected),
            other => Err(SaccoError::Validation(format!("unknown loan status: {other}"))),
        }
    }
}

text_column!(LoanStatus);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentMethod {
    Cash,
    MobileMoney,
    BankTransfer,
    Cheque,
}

impl PaymentMethod {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Cash => "cash",
            Self::MobileMoney => "mobile_money",
            Self::BankTransfer => "bank_transfer",
            Self::Cheque => "cheque",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = SaccoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cash" => Ok(Self::Cash),
            "mobile_money" => Ok(Self::MobileMoney),
            "bank_transfer" => Ok(Self::BankTransfer),
            "cheque" => Ok(Self::Cheque),
            other => Err(SaccoError::Validation(format!("unknown payment method: {other}"))),
        }
    }
}

text_column!(PaymentMethod);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributionType {
    BearerReturn,
    CommitteeShare,
    MemberShare,
}

impl DistributionType {
    pub fn key(&self) -> &'static str {
        match self {
            Self::BearerReturn => "bearer_return",
            Self::CommitteeShare => "committee_share",
            Self::MemberShare => "member_share",
        }
    }
}

impl FromStr for DistributionType {
    type Err = SaccoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bearer_return" => Ok(Self::BearerReturn),
            "committee_share" => Ok(Self::CommitteeShare),
            "member_share" => Ok(Self::MemberShare),
            other => Err(SaccoError::Validation(format!("unknown distribution type: {other}"))),
        }
    }
}

text_column!(DistributionType);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitteeRoleKind {
    Chair,
    Secretary,
    Treasurer,
    Disburser,
}

impl CommitteeRoleKind {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Chair => "chair",
            Self::Secretary => "secretary",
            Self::Treasurer => "treasurer",
            Self::Disburser => "disburser",
        }
    }
}

impl FromStr for CommitteeRoleKind {
    type Err = SaccoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chair" => Ok(Self::Chair),
            "secretary" => Ok(Self::Secretary),
            "treasurer" => Ok(Self::Treasurer),
            "disburser" => Ok(Self::Disburser),
            other => Err(SaccoError::Validation(format!("unknown committee role: {other}"))),
        }
    }
}

text_column!(CommitteeRoleKind);

/// Which half of the year-end pool a share was paid from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharePool {
    Committee,
    Members,
}

impl SharePool {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Committee => "committee",
            Self::Members => "members",
        }
    }
}

impl FromStr for SharePool {
    type Err = SaccoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "committee" => Ok(Self::Committee),
            "members" => Ok(Self::Members),
            other => Err(SaccoError::Validation(format!("unknown share pool: {other}"))),
        }
    }
}

text_column!(SharePool);

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PeriodYear {
    pub id: i64,
    pub year: i32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub is_completed: bool,
}

/// A quarter of an operating year.
#[derive(Debug, Clone)]
pub struct OperatingPeriod {
    pub id: i64,
    pub year_id: i64,
    pub year: i32,
    pub quarter_number: u32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub is_active: bool,
    pub is_completed: bool,
    pub shareout_active: bool,
}

impl OperatingPeriod {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }

    pub fn label(&self) -> String {
        format!("{} Q{}", self.year, self.quarter_number)
    }
}

#[derive(Debug, Clone)]
pub struct Member {
    pub id: i64,
    pub name: String,
    pub category: Option<Category>,
    pub is_active: bool,
}

#[derive(Debug, Clone)]
pub struct Loan {
    pub id: i64,
    pub member_id: i64,
    pub period_id: i64,
    pub loan_number: String,
    pub loan_type: LoanType,
    pub purpose: Option<String>,
    pub principal: Decimal,
    pub interest_rate: Decimal,
    pub total_amount: Decimal,
    pub amount_paid: Decimal,
    pub outstanding_balance: Decimal,
    pub status: LoanStatus,
    pub applied_date: NaiveDate,
    pub approved_date: Option<NaiveDate>,
    pub approved_by: Option<i64>,
    pub disbursed_date: Option<NaiveDate>,
    pub expected_repayment_date: NaiveDate,
    pub actual_repayment_date: Option<NaiveDate>,
    pub repayment_period_months: u32,
    pub rejection_reason: Option<String>,
}

impl Loan {
    pub fn total_interest(&self) -> Decimal {
        self.total_amount - self.principal
    }
}

#[derive(Debug, Clone)]
pub struct LoanRepayment {
    pub id: i64,
    pub loan_id: i64,
    pub amount: Decimal,
    pub principal_portion: Decimal,
    pub interest_portion: Decimal,
    pub payment_date: NaiveDate,
    pub payment_method: PaymentMethod,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InterestDistribution {
    pub id: i64,
    pub period_year_id: i64,
    pub loan_id: Option<i64>,
    pub member_id: i64,
    pub amount: Decimal,
    pub distribution_type: DistributionType,
    pub distributed_date: NaiveDate,
}

#[derive(Debug, Clone)]
pub struct SavingsTarget {
    pub id: i64,
    pub member_id: i64,
    pub period_id: i64,
    pub monthly_target: Decimal,
}

#[derive(Debug, Clone)]
pub struct SavingsEntry {
    pub id: i64,
    pub member_id: i64,
    pub period_id: i64,
    pub amount: Decimal,
    pub month: u32,
    pub shared_out: bool,
    pub shared_out_date: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ShareoutDecision {
    pub id: i64,
    pub member_id: i64,
    pub period_id: i64,
    pub wants_shareout: bool,
    pub savings_balance: Decimal,
    pub interest_amount: Decimal,
    pub shareout_completed: bool,
    pub decision_made_at: String,
    pub shareout_completed_at: Option<String>,
    pub completed_by: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct CommitteeRole {
    pub id: i64,
    pub member_id: i64,
    pub role: CommitteeRoleKind,
    pub is_active: bool,
}

#[derive(Debug, Clone)]
pub struct YearDistribution {
    pub id: i64,
    pub year: i32,
    pub total_interest: Decimal,
    pub available_for_distribution: Decimal,
    pub committee_share: Decimal,
    pub members_share: Decimal,
    pub committee_count: u32,
    pub member_count: u32,
    pub per_committee_member: Decimal,
    pub per_member: Decimal,
    pub undistributed_remainder: Decimal,
    pub completed_at: String,
}

#[derive(Debug, Clone)]
pub struct IndividualYearShare {
    pub id: i64,
    pub year: i32,
    pub member_id: i64,
    pub pool: SharePool,
    pub amount: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loan_type_keys_parse_back() {
        for t in ALL_LOAN_TYPES {
            assert_eq!(t.key().parse::<LoanType>().unwrap(), *t);
        }
        assert!("payday_loan".parse::<LoanType>().is_err());
    }

    #[test]
    fn test_loan_types_conflict_symmetrically() {
        assert_eq!(LoanType::SavingsLoan.conflicting(), LoanType::YukonWelfareLoan);
        assert_eq!(LoanType::YukonWelfareLoan.conflicting(), LoanType::SavingsLoan);
    }

    #[test]
    fn test_category_parse_is_case_insensitive() {
        assert_eq!("b".parse::<Category>().unwrap(), Category::B);
        assert!(matches!("D".parse::<Category>(), Err(SaccoError::Validation(_))));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(LoanStatus::Repaid.is_terminal());
        assert!(LoanStatus::Defaulted.is_terminal());
        assert!(LoanStatus::Rejected.is_terminal());
        assert!(!LoanStatus::Pending.is_terminal());
        assert!(!LoanStatus::Disbursed.is_terminal());
    }

    #[test]
    fn test_period_contains_is_inclusive() {
        let p = OperatingPeriod {
            id: 1,
            year_id: 1,
            year: 2025,
            quarter_number: 1,
            start_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2025, 3, 31).unwrap(),
            is_active: true,
            is_completed: false,
            shareout_active: false,
        };
        assert!(p.contains(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()));
        assert!(p.contains(NaiveDate::from_ymd_opt(2025, 3, 31).unwrap()));
        assert!(!p.contains(NaiveDate::from_ymd_opt(2025, 4, 1).unwrap()));
        assert_eq!(p.label(), "2025 Q1");
    }
}
