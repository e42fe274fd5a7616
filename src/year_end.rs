use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, Row};
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{info, warn};

use crate::actor::Actor;
use crate::db::{get_decimal, money_param, write_tx};
use crate::error::{conflict_on_unique, Result, SaccoError};
use crate::interest::{self, insert_distribution};
use crate::members;
use crate::models::{DistributionType, IndividualYearShare, SharePool, YearDistribution};
use crate::periods;

const SUMMARY_COLUMNS: &str = "id, year, total_interest, available_for_distribution, committee_share, \
     members_share, committee_count, member_count, per_committee_member, per_member, \
     undistributed_remainder, completed_at";

fn summary_from_row(row: &Row<'_>) -> rusqlite::Result<YearDistribution> {
    Ok(YearDistribution {
        id: row.get(0)?,
        year: row.get(1)?,
        total_interest: get_decimal(row, 2)?,
        available_for_distribution: get_decimal(row, 3)?,
        committee_share: get_decimal(row, 4)?,
        members_share: get_decimal(row, 5)?,
        committee_count: row.get(6)?,
        member_count: row.get(7)?,
        per_committee_member: get_decimal(row, 8)?,
        per_member: get_decimal(row, 9)?,
        undistributed_remainder: get_decimal(row, 10)?,
        completed_at: row.get(11)?,
    })
}

fn cents_down(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::ToZero)
}

/// Equal share of `pool` for each of `count` recipients, in whole cents.
fn per_head(pool: Decimal, count: usize) -> Decimal {
    if count == 0 {
        Decimal::ZERO
    } else {
        cents_down(pool / Decimal::from(count))
    }
}

pub fn get(conn: &Connection, organization_id: i64, year: i32) -> Result<Option<YearDistribution>> {
    let summary = conn
        .query_row(
            &format!("SELECT {SUMMARY_COLUMNS} FROM year_distributions WHERE organization_id = ?1 AND year = ?2"),
            rusqlite::params![organization_id, year],
            summary_from_row,
        )
        .optional()?;
    Ok(summary)
}

pub fn shares(conn: &Connection, organization_id: i64, year: i32) -> Result<Vec<IndividualYearShare>> {
    let mut stmt = conn.prepare(
        "SELECT id, year, member_id, pool, amount FROM year_shares \
         WHERE organization_id = ?1 AND year = ?2 ORDER BY pool, member_id",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![organization_id, year], |row| {
            Ok(IndividualYearShare {
                id: row.get(0)?,
                year: row.get(1)?,
                member_id: row.get(2)?,
                pool: row.get(3)?,
                amount: get_decimal(row, 4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Split the year's pooled interest between the committee and the members.
///
/// Half of the pool goes to the committee in equal parts per active role
/// holder, half to every active member (committee included) in equal parts.
/// Cents that cannot be split evenly are kept as `undistributed_remainder`.
pub fn calculate_and_distribute(
    conn: &mut Connection,
    actor: &Actor,
    year: i32,
    on: NaiveDate,
) -> Result<YearDistribution> {
    actor.require_operator("run the year-end distribution")?;
    let org = actor.organization_id;

    let tx = write_tx(conn)?;
    let period_year = periods::get_year(&tx, org, year)?;
    if on <= period_year.end_date {
        return Err(SaccoError::State(format!(
            "{year} is not over on {on}; year-end runs after {}",
            period_year.end_date
        )));
    }
    if get(&tx, org, year)?.is_some() {
        warn!(organization_id = org, year, "year-end distribution already done");
        return Err(SaccoError::Conflict(format!("interest for {year} was already distributed")));
    }

    let total_interest = interest::year_interest(&tx, org, year)?;
    let available = interest::year_pool(&tx, org, year)?;
    let committee_share = cents_down(available / Decimal::TWO);
    let members_share = available - committee_share;

    let committee = members::active_committee(&tx, org)?;
    let roster = members::list_active(&tx, org)?;
    let per_committee_member = per_head(committee_share, committee.len());
    let per_member = per_head(members_share, roster.len());
    let paid = per_committee_member * Decimal::from(committee.len())
        + per_member * Decimal::from(roster.len());
    let remainder = available - paid;

    let mut payouts = Vec::with_capacity(committee.len() + roster.len());
    payouts.extend(committee.iter().map(|c| (c.member_id, SharePool::Committee, per_committee_member)));
    payouts.extend(roster.iter().map(|m| (m.id, SharePool::Members, per_member)));

    for (member_id, pool, amount) in payouts {
        tx.execute(
            "INSERT INTO year_shares (organization_id, year, member_id, pool, amount) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![org, year, member_id, pool, money_param(amount)],
        )
        .map_err(|e| conflict_on_unique(e, format!("member {member_id} already has a {pool} share for {year}")))?;
        let kind = match pool {
            SharePool::Committee => DistributionType::CommitteeShare,
            SharePool::Members => DistributionType::MemberShare,
        };
        insert_distribution(&tx, org, period_year.id, None, member_id, amount, kind, on)?;
    }

    tx.execute(
        "INSERT INTO year_distributions (organization_id, year, total_interest, \
         available_for_distribution, committee_share, members_share, committee_count, member_count, \
         per_committee_member, per_member, undistributed_remainder) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        rusqlite::params![
            org,
            year,
            money_param(total_interest),
            money_param(available),
            money_param(committee_share),
            money_param(members_share),
            committee.len() as u32,
            roster.len() as u32,
            money_param(per_committee_member),
            money_param(per_member),
            money_param(remainder),
        ],
    )
    .map_err(|e| conflict_on_unique(e, format!("interest for {year} was already distributed")))?;
    tx.execute(
        "UPDATE period_years SET is_completed = 1 WHERE id = ?1",
        [period_year.id],
    )?;
    tx.commit()?;

    info!(
        organization_id = org,
        year,
        available = %available,
        committee = committee.len(),
        members = roster.len(),
        remainder = %remainder,
        "year-end distribution completed"
    );
    get(conn, org, year)?.ok_or_else(|| SaccoError::NotFound(format!("distribution for {year}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sum_decimals;
    use crate::loans::{self, LoanApplication, Payment};
    use crate::models::{Category, CommitteeRoleKind, LoanStatus, LoanType, PaymentMethod};
    use crate::test_support::{add_member, op, open_quarter, test_db, ymd};
    use rust_decimal_macros::dec;

    fn settle(conn: &mut Connection, member_id: i64, principal: Decimal, on: NaiveDate) {
        let app = LoanApplication {
            member_id,
            loan_type: LoanType::SavingsLoan,
            amount: principal,
            purpose: None,
            repayment_months: 1,
            applied_on: on,
        };
        let loan = loans::apply(conn, &op(), &app).unwrap();
        loans::approve(conn, &op(), loan.id, on).unwrap();
        loans::disburse(conn, &op(), loan.id, on).unwrap();
        let payment = Payment { amount: loan.total_amount, method: PaymentMethod::Cash, notes: None, paid_on: on };
        loans::record_repayment(conn, &op(), loan.id, &payment).unwrap();
    }

    #[test]
    fn test_per_head_truncates() {
        assert_eq!(per_head(dec!(100), 3), dec!(33.33));
        assert_eq!(per_head(dec!(100), 0), Decimal::ZERO);
    }

    #[test]
    fn test_unknown_year_not_found() {
        let (_dir, mut conn) = test_db();
        let err = calculate_and_distribute(&mut conn, &op(), 2030, ymd(2031, 1, 5)).unwrap_err();
        assert!(matches!(err, SaccoError::NotFound(_)));
    }

    #[test]
    fn test_distribution_conserves_pool() {
        let (_dir, mut conn) = test_db();
        open_quarter(&mut conn, 2025, 2);
        let chair = add_member(&conn, "Achieng", Some(Category::A));
        let treasurer = add_member(&conn, "Baraka", Some(Category::A));
        let plain = add_member(&conn, "Chebet", Some(Category::A));
        members::assign_role(&conn, &op(), chair, CommitteeRoleKind::Chair).unwrap();
        members::assign_role(&conn, &op(), treasurer, CommitteeRoleKind::Treasurer).unwrap();

        // 1000 at 10%: 100 interest, 50 pooled. 2000: 200 interest, 100 pooled.
        settle(&mut conn, plain, dec!(1000), ymd(2025, 5, 5));
        settle(&mut conn, chair, dec!(2000), ymd(2025, 5, 6));

        let summary = calculate_and_distribute(&mut conn, &op(), 2025, ymd(2026, 1, 5)).unwrap();
        assert_eq!(summary.total_interest, dec!(300));
        assert_eq!(summary.available_for_distribution, dec!(150));
        assert_eq!(summary.committee_share, dec!(75));
        assert_eq!(summary.members_share, dec!(75));
        assert_eq!(summary.committee_count, 2);
        assert_eq!(summary.member_count, 3);
        assert_eq!(summary.per_committee_member, dec!(37.50));
        assert_eq!(summary.per_member, dec!(25));
        assert_eq!(summary.undistributed_remainder, Decimal::ZERO);

        let all = shares(&conn, 1, 2025).unwrap();
        assert_eq!(all.len(), 5);
        let chair_total = sum_decimals(all.iter().filter(|s| s.member_id == chair).map(|s| s.amount));
        assert_eq!(chair_total, dec!(62.50));

        let paid = sum_decimals(all.iter().map(|s| s.amount));
        assert_eq!(paid + summary.undistributed_remainder, summary.available_for_distribution);

        let bearer: Decimal = interest::distributions(&conn, 1, Some(2025))
            .unwrap()
            .iter()
            .filter(|d| d.distribution_type == DistributionType::BearerReturn)
            .map(|d| d.amount)
            .sum();
        assert_eq!(bearer + summary.available_for_distribution, summary.total_interest);
        assert!(periods::get_year(&conn, 1, 2025).unwrap().is_completed);
    }

    #[test]
    fn test_uneven_split_keeps_remainder() {
        let (_dir, mut conn) = test_db();
        open_quarter(&mut conn, 2025, 2);
        let a = add_member(&conn, "Achieng", Some(Category::A));
        add_member(&conn, "Baraka", Some(Category::A));
        add_member(&conn, "Chebet", Some(Category::A));
        members::assign_role(&conn, &op(), a, CommitteeRoleKind::Secretary).unwrap();
        settle(&mut conn, a, dec!(1000), ymd(2025, 5, 5));

        let summary = calculate_and_distribute(&mut conn, &op(), 2025, ymd(2026, 1, 5)).unwrap();
        // pool 50: committee 25 to one holder, members 25 over three
        assert_eq!(summary.per_committee_member, dec!(25));
        assert_eq!(summary.per_member, dec!(8.33));
        assert_eq!(summary.undistributed_remainder, dec!(0.01));
    }

    #[test]
    fn test_no_committee_leaves_committee_half_undistributed() {
        let (_dir, mut conn) = test_db();
        open_quarter(&mut conn, 2025, 2);
        let a = add_member(&conn, "Achieng", Some(Category::A));
        settle(&mut conn, a, dec!(1000), ymd(2025, 5, 5));

        let summary = calculate_and_distribute(&mut conn, &op(), 2025, ymd(2026, 1, 5)).unwrap();
        assert_eq!(summary.committee_count, 0);
        assert_eq!(summary.per_committee_member, Decimal::ZERO);
        assert_eq!(summary.per_member, dec!(25));
        assert_eq!(summary.undistributed_remainder, dec!(25));
    }

    #[test]
    fn test_second_run_conflicts() {
        let (_dir, mut conn) = test_db();
        open_quarter(&mut conn, 2025, 2);
        add_member(&conn, "Achieng", Some(Category::A));
        calculate_and_distribute(&mut conn, &op(), 2025, ymd(2026, 1, 5)).unwrap();
        let before = shares(&conn, 1, 2025).unwrap().len();
        let err = calculate_and_distribute(&mut conn, &op(), 2025, ymd(2026, 1, 5)).unwrap_err();
        assert!(matches!(err, SaccoError::Conflict(_)));
        assert_eq!(shares(&conn, 1, 2025).unwrap().len(), before);
    }

    #[test]
    fn test_year_end_waits_for_the_year_to_close() {
        let (_dir, mut conn) = test_db();
        open_quarter(&mut conn, 2025, 2);
        let a = add_member(&conn, "Achieng", Some(Category::A));
        settle(&mut conn, a, dec!(1000), ymd(2025, 5, 5));

        for on in [ymd(2025, 6, 1), ymd(2025, 12, 31)] {
            let err = calculate_and_distribute(&mut conn, &op(), 2025, on).unwrap_err();
            assert!(matches!(err, SaccoError::State(_)), "{on}");
        }
        assert!(get(&conn, 1, 2025).unwrap().is_none());
        assert!(!periods::get_year(&conn, 1, 2025).unwrap().is_completed);
        assert_eq!(interest::year_pool(&conn, 1, 2025).unwrap(), dec!(50));
    }

    #[test]
    fn test_repayment_into_distributed_year_refused() {
        let (_dir, mut conn) = test_db();
        open_quarter(&mut conn, 2025, 2);
        let a = add_member(&conn, "Achieng", Some(Category::A));
        let app = LoanApplication {
            member_id: a,
            loan_type: LoanType::SavingsLoan,
            amount: dec!(1000),
            purpose: None,
            repayment_months: 1,
            applied_on: ymd(2025, 6, 2),
        };
        let loan = loans::apply(&mut conn, &op(), &app).unwrap();
        loans::approve(&mut conn, &op(), loan.id, ymd(2025, 6, 2)).unwrap();
        loans::disburse(&conn, &op(), loan.id, ymd(2025, 6, 2)).unwrap();
        calculate_and_distribute(&mut conn, &op(), 2025, ymd(2026, 1, 5)).unwrap();

        let backdated = Payment { amount: dec!(1100), method: PaymentMethod::Cash, notes: None, paid_on: ymd(2025, 6, 20) };
        let err = loans::record_repayment(&mut conn, &op(), loan.id, &backdated).unwrap_err();
        assert!(matches!(err, SaccoError::State(_)));
        let unchanged = loans::get(&conn, 1, loan.id).unwrap();
        assert_eq!(unchanged.status, LoanStatus::Disbursed);
        assert_eq!(unchanged.outstanding_balance, dec!(1100));
        assert!(loans::repayments(&conn, 1, loan.id).unwrap().is_empty());

        let current = Payment { paid_on: ymd(2026, 1, 10), ..backdated };
        loans::record_repayment(&mut conn, &op(), loan.id, &current).unwrap();
        assert_eq!(interest::year_pool(&conn, 1, 2026).unwrap(), dec!(50));
    }

    #[test]
    fn test_member_cannot_run_year_end() {
        let (_dir, mut conn) = test_db();
        open_quarter(&mut conn, 2025, 2);
        let err = calculate_and_distribute(&mut conn, &Actor::member(1, 1), 2025, ymd(2026, 1, 5)).unwrap_err();
        assert!(matches!(err, SaccoError::Forbidden(_)));
    }
}
