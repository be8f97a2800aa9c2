//! Error types for election operations.

use thiserror::Error;

use crate::transport::TransportError;

/// Errors that can surface from elections, recalls, and role queries.
#[derive(Debug, Error)]
pub enum PolityError {
    /// A quorum of affirmative responses was not reached.
    ///
    /// Returned by both election drivers when the vote-gathering phase
    /// drains without enough YES votes, and by `query_role` when no quorum
    /// of peers agrees on a holder within the query window.
    #[error("lost election: quorum not reached")]
    LostElection,

    /// The confirmation phase was cancelled by the local controller.
    #[error("election aborted during confirmation")]
    Aborted,

    /// A recall was attempted for a role this node has never seen filled.
    ///
    /// This is a local pre-check only; it does not consult the cluster.
    #[error("cannot recall unfilled role")]
    RoleUnfilled,

    /// The gossip layer failed; surfaced verbatim.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
