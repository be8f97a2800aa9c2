//! Role records and the status state machine.
//!
//! Each node keeps one record per role name it has heard about. Records are
//! created the first time the node votes for a candidate or learns of one
//! via gossip, and are never removed: a recalled record is what lets a later
//! election see the role as vacant rather than unknown.

use std::fmt;

use crate::time::LamportTime;

/// Sentinel holder name meaning "no holder known".
pub const NO_HOLDER: &str = "-";

/// Where a role stands in the election lifecycle.
///
/// The discriminants are the wire encoding and must not be reordered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RoleStatus {
    /// Never filled, or only known from a peer's empty answer.
    #[default]
    Invalid = 0,
    /// A candidate has been voted for but not yet confirmed.
    Running = 1,
    /// The holder gathered a quorum and broadcast confirmation.
    Confirmed = 2,
    /// A recall vote has started against the holder.
    Impeached = 3,
    /// The recall was confirmed; the role is vacated.
    Recalled = 4,
}

impl RoleStatus {
    /// True if an election may claim the role.
    pub fn vacant(self) -> bool {
        matches!(self, RoleStatus::Invalid | RoleStatus::Recalled)
    }

    /// True if two peer answers with these statuses describe the same
    /// underlying story.
    ///
    /// `Confirmed` and `Impeached` are the end-phase pair (same holder,
    /// before and during its removal); the transient and vacated states
    /// accept each other.
    pub fn agrees_with(self, other: RoleStatus) -> bool {
        match self {
            RoleStatus::Confirmed | RoleStatus::Impeached => {
                matches!(other, RoleStatus::Confirmed | RoleStatus::Impeached)
            }
            RoleStatus::Recalled | RoleStatus::Running | RoleStatus::Invalid => matches!(
                other,
                RoleStatus::Running | RoleStatus::Recalled | RoleStatus::Impeached
            ),
        }
    }

    /// True if an unsolicited state update may overwrite this status with
    /// `next`.
    ///
    /// Only forward steps are accepted: a running candidate may become
    /// confirmed, an impeached holder may become recalled, and a repeated
    /// confirmation is idempotent. Everything else is a regression and is
    /// dropped by the handler.
    pub fn advances_to(self, next: RoleStatus) -> bool {
        match self {
            RoleStatus::Running => next == RoleStatus::Confirmed,
            RoleStatus::Impeached => next == RoleStatus::Recalled,
            RoleStatus::Confirmed => next == RoleStatus::Confirmed,
            _ => false,
        }
    }

    /// Wire decoding; the inverse of `code`.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(RoleStatus::Invalid),
            1 => Some(RoleStatus::Running),
            2 => Some(RoleStatus::Confirmed),
            3 => Some(RoleStatus::Impeached),
            4 => Some(RoleStatus::Recalled),
            _ => None,
        }
    }

    /// Wire encoding.
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for RoleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoleStatus::Invalid => "invalid",
            RoleStatus::Running => "running",
            RoleStatus::Confirmed => "confirmed",
            RoleStatus::Impeached => "impeached",
            RoleStatus::Recalled => "recalled",
        };
        f.write_str(name)
    }
}

/// A node's local knowledge about one role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleRecord {
    /// Current or prospective occupant; [`NO_HOLDER`] when unknown.
    pub holder: String,
    pub status: RoleStatus,
    /// When this record was last touched by a protocol event.
    pub time: LamportTime,
}

impl RoleRecord {
    pub fn new(holder: impl Into<String>, status: RoleStatus, time: LamportTime) -> Self {
        Self {
            holder: holder.into(),
            status,
            time,
        }
    }

    /// A record for a role that was recalled before this node ever saw a
    /// holder.
    pub fn vacated(time: LamportTime) -> Self {
        Self::new(NO_HOLDER, RoleStatus::Recalled, time)
    }
}
