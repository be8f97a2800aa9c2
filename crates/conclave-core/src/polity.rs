//! The per-node election coordinator.
//!
//! A `Polity` owns this node's role knowledge and speaks the election
//! protocol over a gossip transport. Inbound traffic arrives on an event
//! channel and is dispatched to handlers that mutate the role store;
//! outbound elections run as two-phase broadcasts (gather votes, then
//! confirm until a quorum echoes the result).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::error::PolityError;
use crate::payload::{
    RoleReply, StatusUpdate, VoteReply, VoteRequest, ELECTION_BEGIN, ELECTION_CONFIRM, QUERY,
    RECALL_BEGIN, RECALL_CONFIRM, UPDATE_TIME,
};
use crate::quorum::{simple_majority, QuorumFn};
use crate::resolve::RoleResolver;
use crate::role::{RoleRecord, RoleStatus, NO_HOLDER};
use crate::tally::VoteTally;
use crate::transport::{GossipEvent, QueryEvent, QueryOptions, Transport, UserEvent};

/// Protocol timing.
#[derive(Debug, Clone)]
pub struct PolityConfig {
    /// How long a vote-gathering broadcast stays open.
    pub gather_timeout: Duration,
    /// How long each confirmation broadcast stays open.
    pub confirm_timeout: Duration,
    /// How long a role query stays open.
    pub resolve_timeout: Duration,
    /// How often the confirmation loop re-checks its exit conditions, so a
    /// stalled transport cannot wedge it.
    pub poll_interval: Duration,
}

impl Default for PolityConfig {
    fn default() -> Self {
        Self {
            gather_timeout: Duration::from_secs(5),
            confirm_timeout: Duration::from_secs(15),
            resolve_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(50),
        }
    }
}

/// The local election coordinator on one node.
///
/// Created with [`create`](Polity::create), which also starts the inbound
/// event dispatcher. All methods take `&self`; the role store is guarded by
/// one coarse mutex because transitions are short and every response
/// payload must reflect the store at the moment it is formatted.
pub struct Polity {
    transport: Arc<dyn Transport>,
    local: String,
    config: PolityConfig,
    roles: Mutex<HashMap<String, RoleRecord>>,
    quorum: Mutex<QuorumFn>,
    abort_tx: watch::Sender<bool>,
}

impl Polity {
    /// Builds a polity on top of a gossip transport and starts the
    /// dispatcher consuming `events`.
    ///
    /// The dispatcher runs until the event channel closes or the transport
    /// signals shutdown; in-flight elections keep running until their
    /// broadcasts fail or complete.
    pub fn create(
        transport: Arc<dyn Transport>,
        events: mpsc::Receiver<GossipEvent>,
        config: PolityConfig,
    ) -> Arc<Self> {
        let (abort_tx, _) = watch::channel(false);
        let polity = Arc::new(Self {
            local: transport.local_name(),
            transport,
            config,
            roles: Mutex::new(HashMap::new()),
            quorum: Mutex::new(simple_majority()),
            abort_tx,
        });
        tokio::spawn(Self::dispatch(Arc::clone(&polity), events));
        polity
    }

    /// This node's member name.
    pub fn local_name(&self) -> &str {
        &self.local
    }

    /// Replaces the quorum policy. Rounds already in flight keep the
    /// requirement they started with.
    pub fn set_quorum_fn(&self, quorum: QuorumFn) {
        *self.quorum.lock().unwrap() = quorum;
    }

    /// Cancels every outstanding confirmation loop on this node. The
    /// signal is one-shot and shared: confirmations started after an abort
    /// fail immediately too. Intended for shutdown.
    pub fn abort_confirmations(&self) {
        self.abort_tx.send_replace(true);
    }

    fn votes_required(&self, population: usize) -> usize {
        (self.quorum.lock().unwrap())(population)
    }

    // -- outbound drivers --

    /// Runs an election for `role` with this node as the candidate.
    ///
    /// Phase one broadcasts the candidacy and counts YES votes against a
    /// quorum requirement that widens with every response. Phase two
    /// broadcasts the result until a quorum of peers echoes it, retrying
    /// indefinitely; [`abort_confirmations`](Polity::abort_confirmations)
    /// is the way to give up.
    ///
    /// Concurrent elections for the same role from the same node are not
    /// prevented, but their store writes will interleave; run one at a
    /// time.
    pub async fn run_election(&self, role: &str) -> Result<(), PolityError> {
        info!("{} running for role {:?}", self.local, role);

        let request = VoteRequest::new(&self.local, role).encode();
        let required = self.gather_votes(ELECTION_BEGIN, request.clone()).await?;
        self.run_confirmation(ELECTION_CONFIRM, request, role, required)
            .await
    }

    /// Runs a recall vote to empty `role`.
    ///
    /// Fails fast with [`PolityError::RoleUnfilled`] if this node has never
    /// seen the role filled; otherwise the two phases mirror an election.
    /// Peers always consent to a recall, so phase one is in effect a
    /// liveness check that a quorum is reachable.
    pub async fn run_recall_election(&self, role: &str) -> Result<(), PolityError> {
        if !self.roles.lock().unwrap().contains_key(role) {
            return Err(PolityError::RoleUnfilled);
        }

        info!("{} starting recall of role {:?}", self.local, role);

        let request = Bytes::from(role.to_owned());
        let required = self.gather_votes(RECALL_BEGIN, request.clone()).await?;
        self.run_confirmation(RECALL_CONFIRM, request, role, required)
            .await
    }

    /// Phase one: broadcast `name` and count YES votes until quorum or the
    /// stream drains. Returns the final (widened) requirement.
    async fn gather_votes(&self, name: &str, request: Bytes) -> Result<usize, PolityError> {
        let opts = QueryOptions {
            timeout: self.config.gather_timeout,
        };
        let mut handle = self.transport.query(name, request, opts).await?;

        // seeded from the smallest population the policy can accept; every
        // response widens it from the responder's own member count
        let mut tally = VoteTally::new(self.votes_required(3));

        while let Some(rsp) = handle.recv().await {
            let reply = match VoteReply::parse(&rsp.payload) {
                Ok(reply) => reply,
                Err(e) => {
                    warn!("{}: discarding malformed vote from {}: {e}", self.local, rsp.from);
                    continue;
                }
            };

            debug!(
                "{}: got {} vote from {} on {name}",
                self.local,
                if reply.granted { "YES" } else { "NO" },
                rsp.from
            );

            if tally.record(reply.granted, self.votes_required(reply.members)) {
                handle.close();
            }
        }

        info!(
            "{}: received {} votes, {} required",
            self.local,
            tally.yes_votes(),
            tally.required()
        );

        if !tally.reached() {
            return Err(PolityError::LostElection);
        }
        Ok(tally.required())
    }

    /// Phase two: broadcast the result until a quorum of distinct peers has
    /// echoed it.
    ///
    /// A round that ends short of quorum is retried with a fresh broadcast,
    /// indefinitely, so a flapping cluster converges instead of bubbling
    /// errors up. Exits early once every known member has answered. On
    /// success the role's final state is announced as a user event for
    /// nodes that missed the round.
    async fn run_confirmation(
        &self,
        name: &str,
        request: Bytes,
        role: &str,
        votes_required: usize,
    ) -> Result<(), PolityError> {
        let mut abort = self.abort_tx.subscribe();
        if *abort.borrow() {
            return Err(PolityError::Aborted);
        }
        let mut abort_alive = true;

        'attempt: loop {
            let opts = QueryOptions {
                timeout: self.config.confirm_timeout,
            };
            let mut handle = self.transport.query(name, request.clone(), opts).await?;
            let mut confirmed: HashSet<String> = HashSet::new();
            // first poll only after a full interval, so buffered responses
            // are seen before any retry decision
            let mut ticker = tokio::time::interval_at(
                tokio::time::Instant::now() + self.config.poll_interval,
                self.config.poll_interval,
            );
            let mut drained = false;

            loop {
                tokio::select! {
                    changed = abort.changed(), if abort_alive => {
                        match changed {
                            Ok(()) if *abort.borrow() => return Err(PolityError::Aborted),
                            Ok(()) => {}
                            Err(_) => abort_alive = false,
                        }
                    }

                    rsp = handle.recv(), if !drained => {
                        match rsp {
                            Some(rsp) => {
                                if !rsp.from.is_empty() && confirmed.insert(rsp.from.clone()) {
                                    debug!("{}: {} confirmed {name}", self.local, rsp.from);
                                }
                                if handle.finished() && confirmed.len() >= votes_required {
                                    break 'attempt;
                                }
                                if confirmed.len() >= self.transport.num_members() {
                                    handle.close();
                                    break 'attempt;
                                }
                            }
                            None => drained = true,
                        }
                    }

                    _ = ticker.tick() => {
                        if confirmed.len() >= self.transport.num_members() {
                            handle.close();
                            break 'attempt;
                        }
                        if handle.finished() {
                            if confirmed.len() >= votes_required {
                                break 'attempt;
                            }
                            debug!(
                                "{}: {name} round ended with {} of {votes_required} confirmations, retrying",
                                self.local,
                                confirmed.len()
                            );
                            continue 'attempt;
                        }
                    }
                }
            }
        }

        self.broadcast_role_update(role).await
    }

    /// Announces a role's current state so peers that missed the
    /// confirmation round still converge.
    async fn broadcast_role_update(&self, role: &str) -> Result<(), PolityError> {
        let update = {
            let roles = self.roles.lock().unwrap();
            roles.get(role).map(|r| StatusUpdate {
                holder: r.holder.clone(),
                role: role.to_owned(),
                status: r.status,
            })
        };

        let Some(update) = update else {
            debug!("{}: no local record for {:?}, skipping announcement", self.local, role);
            return Ok(());
        };

        self.transport
            .user_event(UPDATE_TIME, update.encode(), false)
            .await?;
        Ok(())
    }

    /// Asks the cluster which node, if any, holds `role`.
    ///
    /// Peer answers are folded through a Lamport window so that stale
    /// minority views are discarded and fresher ones preferred; the call
    /// resolves once a quorum of consistent answers has arrived, and fails
    /// with [`PolityError::LostElection`] if the query drains first.
    pub async fn query_role(&self, role: &str) -> Result<String, PolityError> {
        let opts = QueryOptions {
            timeout: self.config.resolve_timeout,
        };
        let mut handle = self
            .transport
            .query(QUERY, Bytes::from(role.to_owned()), opts)
            .await?;

        let mut resolver = RoleResolver::new(self.votes_required(3));

        while let Some(rsp) = handle.recv().await {
            let reply = match RoleReply::parse(&rsp.payload) {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(
                        "{}: discarding malformed query answer from {}: {e}",
                        self.local, rsp.from
                    );
                    continue;
                }
            };

            if let Some(holder) = resolver.observe(&reply, self.votes_required(reply.members)) {
                handle.close();
                return Ok(holder);
            }
        }

        Err(PolityError::LostElection)
    }

    // -- inbound dispatch --

    async fn dispatch(self: Arc<Self>, mut events: mpsc::Receiver<GossipEvent>) {
        let mut shutdown = self.transport.shutdown_rx();
        loop {
            tokio::select! {
                evt = events.recv() => match evt {
                    Some(evt) => {
                        let polity = Arc::clone(&self);
                        // one task per event so a slow handler never
                        // head-of-line-blocks the channel
                        tokio::spawn(async move { polity.handle_event(evt) });
                    }
                    None => break,
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("{}: event dispatcher stopped", self.local);
    }

    fn handle_event(&self, evt: GossipEvent) {
        match evt {
            GossipEvent::Query(mut q) => match q.name.as_str() {
                ELECTION_BEGIN => self.handle_vote(&mut q),
                ELECTION_CONFIRM => self.handle_confirm_election(&mut q),
                RECALL_BEGIN => self.handle_recall_vote(&mut q),
                RECALL_CONFIRM => self.handle_confirm_recall(&mut q),
                QUERY => self.handle_role_query(&mut q),
                other => debug!("{}: ignoring unknown query {other:?}", self.local),
            },
            GossipEvent::User(u) => {
                if u.name == UPDATE_TIME {
                    self.handle_status_update(&u);
                }
            }
        }
    }

    // -- inbound handlers --
    //
    // Each handler holds the store mutex across decision, mutation, and
    // response formatting. Response sends are synchronous channel pushes,
    // never I/O.

    /// `election.begin`: vote YES and tentatively seat the candidate when
    /// the role is vacant, or when the confirmed holder is re-announcing
    /// itself; vote NO naming the incumbent otherwise.
    fn handle_vote(&self, q: &mut QueryEvent) {
        let req = match VoteRequest::parse(&q.payload) {
            Ok(req) => req,
            Err(e) => {
                warn!("{}: discarding malformed election request: {e}", self.local);
                return;
            }
        };

        let members = self.transport.num_members();
        let mut roles = self.roles.lock().unwrap();

        let grant = match roles.get(&req.role) {
            None => true,
            Some(r) if r.status.vacant() => true,
            // the incumbent rerunning is a no-op, not a loss
            Some(r) => r.status == RoleStatus::Confirmed && r.holder == req.candidate,
        };

        let reply = if grant {
            debug!(
                "{}: voting yes on candidate {} for role {:?}",
                self.local, req.candidate, req.role
            );
            roles.insert(
                req.role.clone(),
                RoleRecord::new(&req.candidate, RoleStatus::Running, q.time),
            );
            VoteReply::yes(req.candidate, members)
        } else {
            let holder = roles[&req.role].holder.clone();
            debug!(
                "{}: voting no on role {:?}, held by {}",
                self.local, req.role, holder
            );
            VoteReply::no(holder, members)
        };

        if let Err(e) = q.respond(reply.encode()) {
            debug!("{}: could not send vote: {e}", self.local);
        }
    }

    /// `election.confirm`: overwrite unconditionally. Only a candidate
    /// that already gathered a majority broadcasts this; peers that voted
    /// NO accept the result to preserve agreement.
    fn handle_confirm_election(&self, q: &mut QueryEvent) {
        let req = match VoteRequest::parse(&q.payload) {
            Ok(req) => req,
            Err(e) => {
                warn!("{}: discarding malformed confirmation: {e}", self.local);
                return;
            }
        };

        let mut roles = self.roles.lock().unwrap();
        roles.insert(
            req.role,
            RoleRecord::new(req.candidate, RoleStatus::Confirmed, q.time),
        );

        if let Err(e) = q.respond(Bytes::new()) {
            debug!("{}: could not acknowledge confirmation: {e}", self.local);
        }
    }

    /// `recall.begin`: always YES. The quorum requirement in the driver is
    /// what prevents a single-node coup, not the vote itself.
    fn handle_recall_vote(&self, q: &mut QueryEvent) {
        let Some(role) = role_name(&q.payload) else {
            warn!("{}: discarding malformed recall request", self.local);
            return;
        };

        let members = self.transport.num_members();
        let mut roles = self.roles.lock().unwrap();

        let reply = match roles.get_mut(role) {
            Some(existing) => {
                existing.status = RoleStatus::Impeached;
                existing.time = q.time;
                VoteReply::yes(existing.holder.clone(), members)
            }
            None => VoteReply::yes(NO_HOLDER, members),
        };

        if let Err(e) = q.respond(reply.encode()) {
            debug!("{}: could not send recall vote: {e}", self.local);
        }
    }

    /// `recall.confirm`: vacate the role. An absent role still gets a
    /// recalled record so later resolvers see "explicitly vacated" rather
    /// than "never heard of it".
    fn handle_confirm_recall(&self, q: &mut QueryEvent) {
        let Some(role) = role_name(&q.payload) else {
            warn!("{}: discarding malformed recall confirmation", self.local);
            return;
        };

        let mut roles = self.roles.lock().unwrap();
        match roles.get_mut(role) {
            Some(existing) => {
                existing.status = RoleStatus::Recalled;
                existing.time = q.time;
            }
            None => {
                roles.insert(role.to_owned(), RoleRecord::vacated(q.time));
            }
        }

        if let Err(e) = q.respond(Bytes::new()) {
            debug!("{}: could not acknowledge recall: {e}", self.local);
        }
    }

    /// `query`: report the local view without mutating it.
    fn handle_role_query(&self, q: &mut QueryEvent) {
        let Some(role) = role_name(&q.payload) else {
            warn!("{}: discarding malformed role query", self.local);
            return;
        };

        let members = self.transport.num_members();
        let roles = self.roles.lock().unwrap();

        let reply = match roles.get(role) {
            Some(existing) => RoleReply {
                holder: existing.holder.clone(),
                status: existing.status,
                time: existing.time,
                members,
            },
            None => RoleReply {
                holder: NO_HOLDER.to_owned(),
                status: RoleStatus::Invalid,
                time: q.time,
                members,
            },
        };

        if let Err(e) = q.respond(reply.encode()) {
            debug!("{}: could not answer role query: {e}", self.local);
        }
    }

    /// `updateTime`: fill in a missing record, or advance an existing one
    /// when the update names the same holder and moves the state machine
    /// forward. Regressions and holder conflicts are dropped.
    fn handle_status_update(&self, u: &UserEvent) {
        let update = match StatusUpdate::parse(&u.payload) {
            Ok(update) => update,
            Err(e) => {
                warn!("{}: discarding malformed status update: {e}", self.local);
                return;
            }
        };

        let mut roles = self.roles.lock().unwrap();
        match roles.get_mut(&update.role) {
            Some(existing) => {
                if existing.holder == update.holder && existing.status.advances_to(update.status) {
                    existing.status = update.status;
                    existing.time = u.time;
                }
            }
            None => {
                roles.insert(
                    update.role,
                    RoleRecord::new(update.holder, update.status, u.time),
                );
            }
        }
    }
}

/// Extracts a role name from a single-field payload.
fn role_name(payload: &[u8]) -> Option<&str> {
    let text = std::str::from_utf8(payload).ok()?.trim();
    (!text.is_empty()).then_some(text)
}
