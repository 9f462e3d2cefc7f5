use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::booking::BookingId;
use crate::domain::user::UserId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalId(pub String);

/// The two sequential approval stages. Level two is intended to follow level
/// one, though a level-two decision recorded early is accepted (the booking
/// simply stays below `approved` until level one catches up).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalLevel {
    First,
    Second,
}

impl ApprovalLevel {
    pub fn number(self) -> u8 {
        match self {
            ApprovalLevel::First => 1,
            ApprovalLevel::Second => 2,
        }
    }

    pub fn from_number(value: i64) -> Option<Self> {
        match value {
            1 => Some(ApprovalLevel::First),
            2 => Some(ApprovalLevel::Second),
            _ => None,
        }
    }

    pub fn sibling(self) -> Self {
        match self {
            ApprovalLevel::First => ApprovalLevel::Second,
            ApprovalLevel::Second => ApprovalLevel::First,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

/// One level's decision record for a booking. Exactly one row exists per
/// `(booking, level)` pair, created together with the booking itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub id: ApprovalId,
    pub booking_id: BookingId,
    /// Pre-assigned approver, or the deciding actor once a decision lands.
    pub approver: Option<UserId>,
    pub level: ApprovalLevel,
    pub status: ApprovalStatus,
    pub comments: Option<String>,
    /// Set only when the decision is an approval; rejections leave it unset.
    pub decided_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Approval {
    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }
}
