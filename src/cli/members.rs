use comfy_table::{Cell, Table};

use crate::cli::Session;
use crate::error::Result;
use crate::members;
use crate::models::{Category, CommitteeRoleKind};

pub fn add(session: &Session, name: &str, category: Option<Category>) -> Result<()> {
    let m = members::add_member(&session.conn, &session.actor, name, category)?;
    println!("Added member {} (id {})", m.name, m.id);
    Ok(())
}

pub fn list(session: &Session) -> Result<()> {
    let all = members::list_active(&session.conn, session.org())?;
    let committee = members::active_committee(&session.conn, session.org())?;
    let mut table = Table::new();
    table.set_header(vec!["ID", "Name", "Category", "Committee"]);
    for m in &all {
        let role = committee
            .iter()
            .find(|c| c.member_id == m.id)
            .map(|c| c.role.to_string())
            .unwrap_or_default();
        table.add_row(vec![
            Cell::new(m.id),
            Cell::new(&m.name),
            Cell::new(m.category.map(|c| c.to_string()).unwrap_or_else(|| "-".into())),
            Cell::new(role),
        ]);
    }
    println!("Members\n{table}");
    Ok(())
}

pub fn set_category(session: &Session, id: i64, category: Option<Category>) -> Result<()> {
    let m = members::set_category(&session.conn, &session.actor, id, category)?;
    match m.category {
        Some(c) => println!("{} is now category {c}", m.name),
        None => println!("{} no longer has a category", m.name),
    }
    Ok(())
}

pub fn deactivate(session: &mut Session, id: i64) -> Result<()> {
    members::deactivate(&mut session.conn, &session.actor, id)?;
    println!("Deactivated member {id}");
    Ok(())
}

pub fn assign(session: &Session, id: i64, role: CommitteeRoleKind) -> Result<()> {
    members::assign_role(&session.conn, &session.actor, id, role)?;
    println!("Member {id} is now {role}");
    Ok(())
}

pub fn revoke(session: &Session, role: CommitteeRoleKind) -> Result<()> {
    members::revoke_role(&session.conn, &session.actor, role)?;
    println!("Vacated {role}");
    Ok(())
}

pub fn committee(session: &Session) -> Result<()> {
    let roles = members::active_committee(&session.conn, session.org())?;
    let mut table = Table::new();
    table.set_header(vec!["Role", "Member ID", "Name"]);
    for r in &roles {
        let name = members::get(&session.conn, session.org(), r.member_id)?.name;
        table.add_row(vec![Cell::new(r.role), Cell::new(r.member_id), Cell::new(name)]);
    }
    println!("Committee ({}/4)\n{table}", roles.len());
    Ok(())
}
