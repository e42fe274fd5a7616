use std::collections::HashMap;
use std::sync::OnceLock;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::models::{Category, LoanType};

/// Borrowing limits for one category and loan type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    pub min_amount: Decimal,
    pub max_amount: Decimal,
    /// Flat rate, percent of principal, charged once per loan.
    pub interest_rate: Decimal,
    /// First calendar month (1-12) in which the loan type opens for the category.
    pub start_month: u32,
    pub max_repayment_months: u32,
}

// (category, loan type, min, max, rate %, start month, max repayment months)
const LOAN_LIMITS: &[(Category, LoanType, Decimal, Decimal, Decimal, u32, u32)] = &[
    (Category::A, LoanType::SavingsLoan, dec!(1000), dec!(50000), dec!(10), 1, 12),
    (Category::A, LoanType::YukonWelfareLoan, dec!(500), dec!(20000), dec!(5), 1, 6),
    (Category::B, LoanType::SavingsLoan, dec!(1000), dec!(30000), dec!(10), 3, 9),
    (Category::B, LoanType::YukonWelfareLoan, dec!(500), dec!(10000), dec!(5), 3, 6),
    (Category::C, LoanType::SavingsLoan, dec!(500), dec!(15000), dec!(10), 6, 6),
    (Category::C, LoanType::YukonWelfareLoan, dec!(500), dec!(5000), dec!(5), 6, 3),
];

// Smallest monthly savings target a member of each category may declare.
const MIN_MONTHLY_SAVINGS: &[(Category, Decimal)] = &[
    (Category::A, dec!(2000)),
    (Category::B, dec!(1000)),
    (Category::C, dec!(500)),
];

/// Immutable lookup of the category rules, built once per process.
#[derive(Debug)]
pub struct RuleBook {
    limits: HashMap<(Category, LoanType), Limits>,
    min_savings: HashMap<Category, Decimal>,
}

impl RuleBook {
    fn build() -> Self {
        let limits = LOAN_LIMITS
            .iter()
            .map(|&(cat, ty, min_amount, max_amount, interest_rate, start_month, max_repayment_months)| {
                (
                    (cat, ty),
                    Limits { min_amount, max_amount, interest_rate, start_month, max_repayment_months },
                )
            })
            .collect();
        let min_savings = MIN_MONTHLY_SAVINGS.iter().copied().collect();
        Self { limits, min_savings }
    }

    pub fn standard() -> &'static RuleBook {
        static BOOK: OnceLock<RuleBook> = OnceLock::new();
        BOOK.get_or_init(RuleBook::build)
    }

    pub fn limits_for(&self, category: Category, loan_type: LoanType) -> Option<Limits> {
        self.limits.get(&(category, loan_type)).copied()
    }

    pub fn min_monthly_savings(&self, category: Category) -> Decimal {
        self.min_savings.get(&category).copied().unwrap_or(Decimal::ZERO)
    }
}

pub fn limits_for(category: Category, loan_type: LoanType) -> Option<Limits> {
    RuleBook::standard().limits_for(category, loan_type)
}

pub fn min_monthly_savings(category: Category) -> Decimal {
    RuleBook::standard().min_monthly_savings(category)
}
