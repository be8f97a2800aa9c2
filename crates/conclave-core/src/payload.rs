//! Wire payloads for the election protocol.
//!
//! Everything on the wire is UTF-8 text with whitespace-separated fields,
//! carried opaquely by the gossip layer. Node names never contain
//! whitespace; role names may, so they are always the trailing or
//! middle remainder of a payload rather than a single token.
//!
//! Replies carry the responder's current member count as the final field.
//! That count feeds the dynamic quorum: every reply lets the asking side
//! re-derive how many votes it actually needs.

use bytes::Bytes;
use thiserror::Error;

use crate::role::RoleStatus;
use crate::time::LamportTime;

/// Query name for starting an election round.
pub const ELECTION_BEGIN: &str = "polity.election.begin";
/// Query name for broadcasting an election result.
pub const ELECTION_CONFIRM: &str = "polity.election.confirm";
/// Query name for starting a recall round.
pub const RECALL_BEGIN: &str = "polity.recall.begin";
/// Query name for broadcasting a recall result.
pub const RECALL_CONFIRM: &str = "polity.recall.confirm";
/// Query name for asking peers who holds a role.
pub const QUERY: &str = "polity.query";
/// User-event name for unsolicited role state updates.
pub const UPDATE_TIME: &str = "polity.updateTime";

const YES: &str = "YES";
const NO: &str = "NO";

/// Errors from decoding an inbound payload.
///
/// Gossip is best-effort: handlers log these and skip the message rather
/// than failing the dispatcher.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PayloadError {
    /// Payload bytes are not valid UTF-8.
    #[error("payload is not utf-8")]
    NotUtf8,

    /// A required field is missing.
    #[error("truncated payload: missing {0}")]
    Missing(&'static str),

    /// The vote field was neither YES nor NO.
    #[error("invalid ballot: {0:?}")]
    InvalidBallot(String),

    /// The status field was not a known status code.
    #[error("invalid status: {0:?}")]
    InvalidStatus(String),

    /// A numeric field failed to parse.
    #[error("invalid number: {0:?}")]
    InvalidNumber(String),
}

fn text(payload: &[u8]) -> Result<&str, PayloadError> {
    std::str::from_utf8(payload).map_err(|_| PayloadError::NotUtf8)
}

fn parse_usize(s: &str) -> Result<usize, PayloadError> {
    s.parse().map_err(|_| PayloadError::InvalidNumber(s.into()))
}

fn parse_status(s: &str) -> Result<RoleStatus, PayloadError> {
    s.parse::<u8>()
        .ok()
        .and_then(RoleStatus::from_code)
        .ok_or_else(|| PayloadError::InvalidStatus(s.into()))
}

/// `election.begin` / `election.confirm` request: `candidate role`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteRequest {
    pub candidate: String,
    pub role: String,
}

impl VoteRequest {
    pub fn new(candidate: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            role: role.into(),
        }
    }

    pub fn encode(&self) -> Bytes {
        Bytes::from(format!("{} {}", self.candidate, self.role))
    }

    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        let text = text(payload)?;
        let mut parts = text.trim().splitn(2, char::is_whitespace);
        let candidate = parts.next().filter(|s| !s.is_empty());
        let role = parts.next().map(str::trim).filter(|s| !s.is_empty());
        match (candidate, role) {
            (Some(candidate), Some(role)) => Ok(Self::new(candidate, role)),
            (None, _) => Err(PayloadError::Missing("candidate")),
            (_, None) => Err(PayloadError::Missing("role")),
        }
    }
}

/// Reply to `election.begin` or `recall.begin`: `YES|NO holder members`.
///
/// For elections the holder echoes the candidate on YES and names the
/// incumbent on NO. For recalls the ballot is always YES and the holder is
/// whoever this peer believes occupies the role, or the vacant sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteReply {
    pub granted: bool,
    pub holder: String,
    pub members: usize,
}

impl VoteReply {
    pub fn yes(holder: impl Into<String>, members: usize) -> Self {
        Self {
            granted: true,
            holder: holder.into(),
            members,
        }
    }

    pub fn no(holder: impl Into<String>, members: usize) -> Self {
        Self {
            granted: false,
            holder: holder.into(),
            members,
        }
    }

    pub fn encode(&self) -> Bytes {
        let ballot = if self.granted { YES } else { NO };
        Bytes::from(format!("{} {} {}", ballot, self.holder, self.members))
    }

    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        let text = text(payload)?;
        let mut parts = text.split_whitespace();
        let ballot = parts.next().ok_or(PayloadError::Missing("ballot"))?;
        let granted = match ballot {
            YES => true,
            NO => false,
            other => return Err(PayloadError::InvalidBallot(other.into())),
        };
        let holder = parts.next().ok_or(PayloadError::Missing("holder"))?;
        let members = parse_usize(parts.next().ok_or(PayloadError::Missing("members"))?)?;
        Ok(Self {
            granted,
            holder: holder.into(),
            members,
        })
    }
}

/// Reply to `query`: `holder status time members`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleReply {
    pub holder: String,
    pub status: RoleStatus,
    pub time: LamportTime,
    pub members: usize,
}

impl RoleReply {
    pub fn encode(&self) -> Bytes {
        Bytes::from(format!(
            "{} {} {} {}",
            self.holder,
            self.status.code(),
            self.time,
            self.members
        ))
    }

    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        let text = text(payload)?;
        let mut parts = text.split_whitespace();
        let holder = parts.next().ok_or(PayloadError::Missing("holder"))?;
        let status = parse_status(parts.next().ok_or(PayloadError::Missing("status"))?)?;
        let time = parts.next().ok_or(PayloadError::Missing("time"))?;
        let time = time
            .parse()
            .map_err(|_| PayloadError::InvalidNumber(time.into()))?;
        let members = parse_usize(parts.next().ok_or(PayloadError::Missing("members"))?)?;
        Ok(Self {
            holder: holder.into(),
            status,
            time,
            members,
        })
    }
}

/// `updateTime` user event: `holder role status`.
///
/// Broadcast by a driver after a successful confirmation so peers that
/// missed the round still converge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub holder: String,
    pub role: String,
    pub status: RoleStatus,
}

impl StatusUpdate {
    pub fn encode(&self) -> Bytes {
        Bytes::from(format!(
            "{} {} {}",
            self.holder,
            self.role,
            self.status.code()
        ))
    }

    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        let text = text(payload)?.trim();
        let mut parts = text.splitn(2, char::is_whitespace);
        let holder = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or(PayloadError::Missing("holder"))?;
        let rest = parts.next().unwrap_or("").trim();
        // the role is everything between the holder and the final token
        let (role, status) = match rest.rsplit_once(char::is_whitespace) {
            Some((role, status)) if !role.trim().is_empty() => (role.trim(), status),
            _ => return Err(PayloadError::Missing("role")),
        };
        Ok(Self {
            holder: holder.into(),
            role: role.into(),
            status: parse_status(status)?,
        })
    }
}
