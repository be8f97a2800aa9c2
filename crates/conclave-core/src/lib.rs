//! conclave-core: quorum-based role elections over gossip.
//!
//! A *polity* lets any node in a loosely-coupled cluster claim a named,
//! cluster-unique role (`leader`, `recover:host-42`, …), recall such a
//! claim later, and ask which node currently holds a role — with
//! quorum-based agreement but without a replicated log. It is meant for
//! coordination of modest frequency: leases, recovery locks, singleton
//! worker assignment.
//!
//! # Architecture
//!
//! The coordinator sits on top of an opaque gossip transport and is built
//! from a few cooperating pieces:
//!
//! - **Role store**: per-role `(holder, status, lamport time)` records
//!   behind one mutex
//! - **Inbound handlers**: advance the role state machine in response to
//!   election, recall, query, and update traffic
//! - **Election drivers**: the outbound two-phase protocol — gather YES
//!   votes, then broadcast confirmation until a quorum echoes it
//! - **Quorum policy**: population → votes required, a simple majority
//!   with a floor of three by default
//! - **Role resolver**: folds divergent peer answers through a Lamport
//!   window so stale views lose to fresher ones
//!
//! # Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use conclave_core::{Polity, PolityConfig};
//!
//! // `transport` is any gossip layer implementing the Transport trait;
//! // `events` is its inbound event channel.
//! let polity = Polity::create(transport, events, PolityConfig::default());
//!
//! polity.run_election("leader").await?;
//! assert_eq!(polity.query_role("leader").await?, polity.local_name());
//! polity.run_recall_election("leader").await?;
//! ```

mod error;
mod payload;
mod polity;
mod quorum;
mod resolve;
mod role;
mod tally;
mod time;
mod transport;

pub use error::PolityError;
pub use payload::{
    PayloadError, RoleReply, StatusUpdate, VoteReply, VoteRequest, ELECTION_BEGIN,
    ELECTION_CONFIRM, QUERY, RECALL_BEGIN, RECALL_CONFIRM, UPDATE_TIME,
};
pub use polity::{Polity, PolityConfig};
pub use quorum::{quorum_percentage, simple_majority, QuorumFn, MAJORITY_FLOOR};
pub use resolve::RoleResolver;
pub use role::{RoleRecord, RoleStatus, NO_HOLDER};
pub use tally::VoteTally;
pub use time::{LamportTime, LamportWindow};
pub use transport::{
    GossipEvent, QueryEvent, QueryHandle, QueryOptions, QueryResponse, ReplySink, Transport,
    TransportError, UserEvent,
};
