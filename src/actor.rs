use crate::error::{Result, SaccoError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Member,
    Operator,
}

/// The authenticated caller, as supplied by the identity layer.
///
/// Every mutating operation takes one explicitly; the organization it carries
/// scopes every read and write.
#[derive(Debug, Clone, Copy)]
pub struct Actor {
    pub organization_id: i64,
    pub member_id: Option<i64>,
    pub role: Role,
}

impl Actor {
    pub fn operator(organization_id: i64, member_id: Option<i64>) -> Self {
        Self { organization_id, member_id, role: Role::Operator }
    }

    pub fn member(organization_id: i64, member_id: i64) -> Self {
        Self { organization_id, member_id: Some(member_id), role: Role::Member }
    }

    pub fn is_operator(&self) -> bool {
        self.role == Role::Operator
    }

    pub fn require_operator(&self, action: &str) -> Result<()> {
        if self.is_operator() {
            Ok(())
        } else {
            Err(SaccoError::Forbidden(format!("only an operator may {action}")))
        }
    }

    /// Members may act for themselves; operators for anyone.
    pub fn require_self_or_operator(&self, member_id: i64, action: &str) -> Result<()> {
        if self.is_operator() || self.member_id == Some(member_id) {
            Ok(())
        } else {
            Err(SaccoError::Forbidden(format!(
                "member {} may not {action} for member {member_id}",
                self.member_id.map(|id| id.to_string()).unwrap_or_else(|| "(anonymous)".into())
            )))
        }
    }
}
