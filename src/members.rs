use rusqlite::{Connection, OptionalExtension, Row};
use tracing::info;

use crate::actor::Actor;
use crate::db::write_tx;
use crate::error::{conflict_on_unique, Result, SaccoError};
use crate::models::{Category, CommitteeRole, CommitteeRoleKind, Member};

fn member_from_row(row: &Row<'_>) -> rusqlite::Result<Member> {
    Ok(Member {
        id: row.get(0)?,
        name: row.get(1)?,
        category: row.get(2)?,
        is_active: row.get(3)?,
    })
}

pub fn add_member(
    conn: &Connection,
    actor: &Actor,
    name: &str,
    category: Option<Category>,
) -> Result<Member> {
    actor.require_operator("register members")?;
    let name = name.trim();
    if name.is_empty() {
        return Err(SaccoError::Validation("member name is required".into()));
    }
    conn.execute(
        "INSERT INTO members (organization_id, name, category) VALUES (?1, ?2, ?3)",
        rusqlite::params![actor.organization_id, name, category],
    )?;
    let id = conn.last_insert_rowid();
    info!(organization_id = actor.organization_id, member_id = id, "registered member");
    get(conn, actor.organization_id, id)
}

pub fn get(conn: &Connection, organization_id: i64, member_id: i64) -> Result<Member> {
    conn.query_row(
        "SELECT id, name, category, is_active FROM members WHERE organization_id = ?1 AND id = ?2",
        rusqlite::params![organization_id, member_id],
        member_from_row,
    )
    .optional()?
    .ok_or_else(|| SaccoError::NotFound(format!("member {member_id}")))
}

/// Active members ordered by id.
pub fn list_active(conn: &Connection, organization_id: i64) -> Result<Vec<Member>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, category, is_active FROM members \
         WHERE organization_id = ?1 AND is_active = 1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map([organization_id], member_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn set_category(
    conn: &Connection,
    actor: &Actor,
    member_id: i64,
    category: Option<Category>,
) -> Result<Member> {
    actor.require_operator("change member categories")?;
    get(conn, actor.organization_id, member_id)?;
    conn.execute(
        "UPDATE members SET category = ?1 WHERE organization_id = ?2 AND id = ?3",
        rusqlite::params![category, actor.organization_id, member_id],
    )?;
    get(conn, actor.organization_id, member_id)
}

pub fn deactivate(conn: &mut Connection, actor: &Actor, member_id: i64) -> Result<()> {
    actor.require_operator("deactivate members")?;
    let org = actor.organization_id;
    let tx = write_tx(conn)?;
    get(&tx, org, member_id)?;
    tx.execute(
        "UPDATE members SET is_active = 0 WHERE organization_id = ?1 AND id = ?2",
        rusqlite::params![org, member_id],
    )?;
    tx.execute(
        "UPDATE committee_roles SET is_active = 0 WHERE organization_id = ?1 AND member_id = ?2",
        rusqlite::params![org, member_id],
    )?;
    tx.commit()?;
    info!(organization_id = org, member_id, "deactivated member");
    Ok(())
}

// ---------------------------------------------------------------------------
// Committee
// ---------------------------------------------------------------------------

/// Give `member_id` a committee seat. Each role has one holder and each
/// member holds at most one role, so at most four roles are ever active.
pub fn assign_role(
    conn: &Connection,
    actor: &Actor,
    member_id: i64,
    role: CommitteeRoleKind,
) -> Result<CommitteeRole> {
    actor.require_operator("assign committee roles")?;
    let member = get(conn, actor.organization_id, member_id)?;
    if !member.is_active {
        return Err(SaccoError::State(format!("member {member_id} is inactive")));
    }
    conn.execute(
        "INSERT INTO committee_roles (organization_id, member_id, role) VALUES (?1, ?2, ?3)",
        rusqlite::params![actor.organization_id, member_id, role],
    )
    .map_err(|e| {
        conflict_on_unique(e, format!("{role} seat or member {member_id} already on the committee"))
    })?;
    let id = conn.last_insert_rowid();
    info!(organization_id = actor.organization_id, member_id, role = role.key(), "assigned committee role");
    Ok(CommitteeRole { id, member_id, role, is_active: true })
}

pub fn revoke_role(conn: &Connection, actor: &Actor, role: CommitteeRoleKind) -> Result<()> {
    actor.require_operator("revoke committee roles")?;
    let changed = conn.execute(
        "UPDATE committee_roles SET is_active = 0 \
         WHERE organization_id = ?1 AND role = ?2 AND is_active = 1",
        rusqlite::params![actor.organization_id, role],
    )?;
    if changed == 0 {
        return Err(SaccoError::NotFound(format!("active {role}")));
    }
    Ok(())
}

pub fn active_committee(conn: &Connection, organization_id: i64) -> Result<Vec<CommitteeRole>> {
    let mut stmt = conn.prepare(
        "SELECT cr.id, cr.member_id, cr.role, cr.is_active FROM committee_roles cr \
         JOIN members m ON m.id = cr.member_id \
         WHERE cr.organization_id = ?1 AND cr.is_active = 1 AND m.is_active = 1 \
         ORDER BY cr.id",
    )?;
    let rows = stmt
        .query_map([organization_id], |row| {
            Ok(CommitteeRole {
                id: row.get(0)?,
                member_id: row.get(1)?,
                role: row.get(2)?,
                is_active: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
