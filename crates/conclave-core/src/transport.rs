//! The gossip transport contract.
//!
//! The coordinator does not do networking. It consumes an opaque membership
//! layer that can broadcast queries, stream back per-node responses, fire
//! user events, and report a population estimate — and it receives inbound
//! traffic as [`GossipEvent`]s on a channel. Anything with these
//! capabilities can drive a polity; the testkit mesh is one implementation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::time::LamportTime;

/// Errors surfaced by the gossip layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The transport has terminated and can carry no more traffic.
    #[error("gossip transport is shut down")]
    Shutdown,

    /// The querying side stopped listening before the response was sent.
    #[error("query response could not be delivered")]
    ResponseDropped,

    /// Any other transport-level failure, surfaced verbatim.
    #[error("{0}")]
    Other(String),
}

/// Parameters for a broadcast query.
#[derive(Debug, Clone, Copy)]
pub struct QueryOptions {
    /// How long the transport keeps the query open for responses.
    pub timeout: Duration,
}

/// One peer's answer to a broadcast query.
#[derive(Debug, Clone)]
pub struct QueryResponse {
    /// Responding member's name.
    pub from: String,
    pub payload: Bytes,
    /// Logical time the transport stamped on the response.
    pub time: LamportTime,
}

/// The response stream for an outbound query.
///
/// Yields responses until the query period ends or [`close`] is called.
/// [`finished`] reports whether the transport considers the query over;
/// responses may still be buffered after it flips.
///
/// [`close`]: QueryHandle::close
/// [`finished`]: QueryHandle::finished
pub struct QueryHandle {
    responses: mpsc::UnboundedReceiver<QueryResponse>,
    finished: Arc<AtomicBool>,
}

impl QueryHandle {
    /// Builds a handle from the receiving half of a response channel and
    /// the transport's finished flag. Called by transport implementations.
    pub fn new(responses: mpsc::UnboundedReceiver<QueryResponse>, finished: Arc<AtomicBool>) -> Self {
        Self { responses, finished }
    }

    /// Waits for the next response; `None` once the stream is exhausted.
    pub async fn recv(&mut self) -> Option<QueryResponse> {
        self.responses.recv().await
    }

    /// True once the transport has ended the query period.
    pub fn finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Terminates the query early. No further responses are accepted;
    /// already-buffered ones still drain through [`recv`](Self::recv).
    pub fn close(&mut self) {
        self.finished.store(true, Ordering::Release);
        self.responses.close();
    }
}

/// Callback a transport installs on a [`QueryEvent`] to route the
/// handler's answer back to the asking node.
pub type ReplySink = Box<dyn FnOnce(Bytes) -> Result<(), TransportError> + Send>;

/// An inbound query delivered to this node.
pub struct QueryEvent {
    /// Protocol event name, e.g. `polity.election.begin`.
    pub name: String,
    pub payload: Bytes,
    /// Logical time the transport stamped on the query.
    pub time: LamportTime,
    reply: Option<ReplySink>,
}

impl QueryEvent {
    pub fn new(
        name: impl Into<String>,
        payload: Bytes,
        time: LamportTime,
        reply: ReplySink,
    ) -> Self {
        Self {
            name: name.into(),
            payload,
            time,
            reply: Some(reply),
        }
    }

    /// Sends this node's answer. A query is answered at most once; a
    /// second call reports the response as undeliverable.
    pub fn respond(&mut self, payload: Bytes) -> Result<(), TransportError> {
        match self.reply.take() {
            Some(reply) => reply(payload),
            None => Err(TransportError::ResponseDropped),
        }
    }
}

impl std::fmt::Debug for QueryEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEvent")
            .field("name", &self.name)
            .field("time", &self.time)
            .field("answered", &self.reply.is_none())
            .finish_non_exhaustive()
    }
}

/// An inbound fire-and-forget broadcast.
#[derive(Debug, Clone)]
pub struct UserEvent {
    pub name: String,
    pub payload: Bytes,
    pub time: LamportTime,
}

/// Inbound gossip traffic, as delivered on the event channel passed to
/// [`Polity::create`](crate::Polity::create).
#[derive(Debug)]
pub enum GossipEvent {
    Query(QueryEvent),
    User(UserEvent),
}

/// The membership and broadcast capabilities the coordinator requires.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// This node's member name.
    fn local_name(&self) -> String;

    /// Current population estimate, including this node.
    fn num_members(&self) -> usize;

    /// Broadcasts a named query to every member (this node included) and
    /// returns the response stream.
    async fn query(
        &self,
        name: &str,
        payload: Bytes,
        opts: QueryOptions,
    ) -> Result<QueryHandle, TransportError>;

    /// Broadcasts a fire-and-forget user event. `coalesce` lets the
    /// transport collapse bursts of same-named events.
    async fn user_event(
        &self,
        name: &str,
        payload: Bytes,
        coalesce: bool,
    ) -> Result<(), TransportError>;

    /// A signal that flips to `true` when the transport terminates.
    fn shutdown_rx(&self) -> watch::Receiver<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn handle_yields_responses_then_none() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut handle = QueryHandle::new(rx, Arc::new(AtomicBool::new(false)));

        tx.send(QueryResponse {
            from: "a".into(),
            payload: Bytes::from_static(b"hi"),
            time: LamportTime(1),
        })
        .unwrap();
        drop(tx);

        let rsp = handle.recv().await.unwrap();
        assert_eq!(rsp.from, "a");
        assert!(handle.recv().await.is_none());
    }

    #[tokio::test]
    async fn close_marks_finished_and_stops_senders() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut handle = QueryHandle::new(rx, Arc::new(AtomicBool::new(false)));
        assert!(!handle.finished());

        handle.close();
        assert!(handle.finished());
        assert!(tx
            .send(QueryResponse {
                from: "a".into(),
                payload: Bytes::new(),
                time: LamportTime(1),
            })
            .is_err());
    }

    #[test]
    fn query_event_responds_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink: ReplySink = Box::new(move |payload| {
            tx.send(payload).map_err(|_| TransportError::ResponseDropped)
        });
        let mut evt = QueryEvent::new("q", Bytes::new(), LamportTime(1), sink);

        evt.respond(Bytes::from_static(b"YES")).unwrap();
        assert_eq!(&rx.try_recv().unwrap()[..], b"YES");
        assert_eq!(
            evt.respond(Bytes::new()),
            Err(TransportError::ResponseDropped)
        );
    }
}
