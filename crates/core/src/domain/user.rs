use serde::{Deserialize, Serialize};

use crate::domain::approval::ApprovalLevel;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

/// Closed role set. Authorization checks match on this exhaustively so an
/// unrecognized role can never fall through to a permissive default.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Employee,
    ApproverL1,
    ApproverL2,
    Admin,
}

impl Role {
    /// The approval level this role is entitled to decide, if any.
    pub fn approval_level(self) -> Option<ApprovalLevel> {
        match self {
            Role::ApproverL1 => Some(ApprovalLevel::First),
            Role::ApproverL2 => Some(ApprovalLevel::Second),
            Role::Employee | Role::Admin => None,
        }
    }

    pub fn is_admin(self) -> bool {
        matches!(self, Role::Admin)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    pub role: Role,
    pub department: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::{ApprovalLevel, Role};

    #[test]
    fn only_approver_roles_carry_a_level() {
        assert_eq!(Role::ApproverL1.approval_level(), Some(ApprovalLevel::First));
        assert_eq!(Role::ApproverL2.approval_level(), Some(ApprovalLevel::Second));
        assert_eq!(Role::Employee.approval_level(), None);
        assert_eq!(Role::Admin.approval_level(), None);
    }
}
