//! An in-memory gossip mesh.
//!
//! Implements the coordinator's transport contract without networking:
//! every node registered on a [`Mesh`] shares one Lamport clock, and
//! queries and user events are fanned out over per-node channels. The mesh
//! also exposes the failure controls the end-to-end scenarios need —
//! crashing a node and partitioning one off.
//!
//! # Population semantics
//!
//! A crashed node stops receiving and responding but **stays in the
//! member count**. Real membership layers take a while to reap dead peers,
//! and election behavior in that window is exactly what the failure
//! scenarios exercise. An isolated node likewise stays counted; it simply
//! cannot be reached until it rejoins.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use conclave_core::{
    GossipEvent, LamportTime, QueryEvent, QueryHandle, QueryOptions, QueryResponse, ReplySink,
    Transport, TransportError, UserEvent,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A shared in-memory cluster that nodes join by name.
#[derive(Clone)]
pub struct Mesh {
    inner: Arc<MeshInner>,
}

struct MeshInner {
    /// Cluster-wide logical clock; stamps every query, response, and
    /// user event. Starts at one so zero stays "never witnessed".
    clock: AtomicU64,
    nodes: Mutex<HashMap<String, NodeSlot>>,
}

struct NodeSlot {
    events: mpsc::Sender<GossipEvent>,
    alive: bool,
    reachable: bool,
    shutdown: watch::Sender<bool>,
}

impl Mesh {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MeshInner {
                clock: AtomicU64::new(0),
                nodes: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Registers a node and returns its transport handle plus the event
    /// channel to feed into the coordinator.
    ///
    /// # Panics
    ///
    /// Panics if `name` is already registered; scenario code picks unique
    /// names.
    pub fn join(&self, name: &str) -> (MeshTransport, mpsc::Receiver<GossipEvent>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);

        let mut nodes = self.inner.nodes.lock().unwrap();
        let previous = nodes.insert(
            name.to_owned(),
            NodeSlot {
                events: event_tx,
                alive: true,
                reachable: true,
                shutdown: shutdown_tx,
            },
        );
        assert!(previous.is_none(), "node {name:?} joined the mesh twice");

        let transport = MeshTransport {
            inner: Arc::clone(&self.inner),
            name: name.to_owned(),
        };
        (transport, event_rx)
    }

    /// Crashes a node: no more deliveries or responses, shutdown signal
    /// raised. The node stays in the population count (see module docs).
    pub fn shutdown(&self, name: &str) {
        let mut nodes = self.inner.nodes.lock().unwrap();
        let slot = nodes.get_mut(name).expect("unknown node");
        slot.alive = false;
        slot.shutdown.send_replace(true);
        debug!("mesh: node {name} shut down");
    }

    /// Partitions a live node off: nothing is delivered to it and its own
    /// broadcasts reach only itself.
    pub fn isolate(&self, name: &str) {
        let mut nodes = self.inner.nodes.lock().unwrap();
        nodes.get_mut(name).expect("unknown node").reachable = false;
        debug!("mesh: node {name} isolated");
    }

    /// Heals a partition created with [`isolate`](Mesh::isolate).
    pub fn rejoin(&self, name: &str) {
        let mut nodes = self.inner.nodes.lock().unwrap();
        nodes.get_mut(name).expect("unknown node").reachable = true;
        debug!("mesh: node {name} rejoined");
    }

    /// Current population, crashed nodes included.
    pub fn num_members(&self) -> usize {
        self.inner.nodes.lock().unwrap().len()
    }
}

impl Default for Mesh {
    fn default() -> Self {
        Self::new()
    }
}

impl MeshInner {
    fn tick(&self) -> LamportTime {
        LamportTime(self.clock.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Live delivery targets as seen from `from`, including `from` itself.
    /// An isolated sender reaches only itself; everyone else reaches every
    /// live, reachable node.
    fn targets_from(
        &self,
        from: &str,
    ) -> Result<Vec<(String, mpsc::Sender<GossipEvent>)>, TransportError> {
        let nodes = self.nodes.lock().unwrap();
        let me = nodes.get(from).ok_or(TransportError::Shutdown)?;
        if !me.alive {
            return Err(TransportError::Shutdown);
        }
        let sender_isolated = !me.reachable;

        Ok(nodes
            .iter()
            .filter(|(name, slot)| {
                slot.alive
                    && if sender_isolated {
                        name.as_str() == from
                    } else {
                        slot.reachable
                    }
            })
            .map(|(name, slot)| (name.clone(), slot.events.clone()))
            .collect())
    }
}

/// One node's handle onto the mesh.
pub struct MeshTransport {
    inner: Arc<MeshInner>,
    name: String,
}

#[async_trait]
impl Transport for MeshTransport {
    fn local_name(&self) -> String {
        self.name.clone()
    }

    fn num_members(&self) -> usize {
        self.inner.nodes.lock().unwrap().len()
    }

    async fn query(
        &self,
        name: &str,
        payload: Bytes,
        opts: QueryOptions,
    ) -> Result<QueryHandle, TransportError> {
        let targets = self.inner.targets_from(&self.name)?;
        let time = self.inner.tick();

        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let finished = Arc::new(AtomicBool::new(false));

        for (target, events) in targets {
            let inner = Arc::clone(&self.inner);
            let response_tx = response_tx.clone();
            let sink: ReplySink = Box::new(move |payload| {
                response_tx
                    .send(QueryResponse {
                        from: target,
                        payload,
                        time: inner.tick(),
                    })
                    .map_err(|_| TransportError::ResponseDropped)
            });
            let evt = GossipEvent::Query(QueryEvent::new(name, payload.clone(), time, sink));
            // a full or closed inbox means the message is lost, as gossip
            // messages can be
            let _ = events.try_send(evt);
        }
        // only the reply sinks keep the stream open now; it closes as soon
        // as every delivered copy has been answered or dropped
        drop(response_tx);

        let deadline = Arc::clone(&finished);
        let timeout = opts.timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            deadline.store(true, Ordering::Release);
        });

        Ok(QueryHandle::new(response_rx, finished))
    }

    async fn user_event(
        &self,
        name: &str,
        payload: Bytes,
        _coalesce: bool,
    ) -> Result<(), TransportError> {
        let targets = self.inner.targets_from(&self.name)?;
        let time = self.inner.tick();

        for (_, events) in targets {
            let evt = GossipEvent::User(UserEvent {
                name: name.to_owned(),
                payload: payload.clone(),
                time,
            });
            let _ = events.try_send(evt);
        }
        Ok(())
    }

    fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.inner
            .nodes
            .lock()
            .unwrap()
            .get(&self.name)
            .expect("node was registered at join")
            .shutdown
            .subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Spawns a task that answers every query a node receives by echoing
    /// the query payload back.
    fn echo_responder(mut events: mpsc::Receiver<GossipEvent>) {
        tokio::spawn(async move {
            while let Some(evt) = events.recv().await {
                if let GossipEvent::Query(mut q) = evt {
                    let payload = q.payload.clone();
                    let _ = q.respond(payload);
                }
            }
        });
    }

    fn options() -> QueryOptions {
        QueryOptions {
            timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn query_reaches_every_node_including_self() {
        let mesh = Mesh::new();
        let (a, a_events) = mesh.join("a");
        let (_b, b_events) = mesh.join("b");
        let (_c, c_events) = mesh.join("c");
        for events in [a_events, b_events, c_events] {
            echo_responder(events);
        }

        let mut handle = a
            .query("test.echo", Bytes::from_static(b"hi"), options())
            .await
            .unwrap();

        let mut from = Vec::new();
        while let Some(rsp) = handle.recv().await {
            assert_eq!(&rsp.payload[..], b"hi");
            from.push(rsp.from);
        }
        from.sort();
        assert_eq!(from, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn responses_carry_increasing_lamport_times() {
        let mesh = Mesh::new();
        let (a, a_events) = mesh.join("a");
        let (_b, b_events) = mesh.join("b");
        echo_responder(a_events);
        echo_responder(b_events);

        let mut handle = a.query("test.echo", Bytes::new(), options()).await.unwrap();
        let mut times = Vec::new();
        while let Some(rsp) = handle.recv().await {
            times.push(rsp.time);
        }
        assert_eq!(times.len(), 2);
        assert!(times[0] > LamportTime(0), "clock must never stamp zero");
        assert_ne!(times[0], times[1]);
    }

    #[tokio::test]
    async fn crashed_node_stops_answering_but_stays_counted() {
        let mesh = Mesh::new();
        let (a, a_events) = mesh.join("a");
        let (b, b_events) = mesh.join("b");
        echo_responder(a_events);
        echo_responder(b_events);

        mesh.shutdown("b");
        assert!(*b.shutdown_rx().borrow(), "shutdown signal should be raised");
        assert_eq!(a.num_members(), 2);

        let mut handle = a.query("test.echo", Bytes::new(), options()).await.unwrap();
        let mut from = Vec::new();
        while let Some(rsp) = handle.recv().await {
            from.push(rsp.from);
        }
        assert_eq!(from, ["a"]);
    }

    #[tokio::test]
    async fn crashed_node_cannot_query() {
        let mesh = Mesh::new();
        let (a, _a_events) = mesh.join("a");
        mesh.shutdown("a");

        assert!(matches!(
            a.query("test.echo", Bytes::new(), options()).await,
            Err(TransportError::Shutdown)
        ));
    }

    #[tokio::test]
    async fn isolated_node_reaches_only_itself() {
        let mesh = Mesh::new();
        let (a, a_events) = mesh.join("a");
        let (b, b_events) = mesh.join("b");
        echo_responder(a_events);
        echo_responder(b_events);

        mesh.isolate("b");

        // the partitioned node only hears itself
        let mut handle = b.query("test.echo", Bytes::new(), options()).await.unwrap();
        let mut from = Vec::new();
        while let Some(rsp) = handle.recv().await {
            from.push(rsp.from);
        }
        assert_eq!(from, ["b"]);

        // and the rest of the cluster cannot reach it
        let mut handle = a.query("test.echo", Bytes::new(), options()).await.unwrap();
        let mut from = Vec::new();
        while let Some(rsp) = handle.recv().await {
            from.push(rsp.from);
        }
        assert_eq!(from, ["a"]);

        // healing the partition restores symmetric delivery
        mesh.rejoin("b");
        let mut handle = a.query("test.echo", Bytes::new(), options()).await.unwrap();
        let mut from = Vec::new();
        while let Some(rsp) = handle.recv().await {
            from.push(rsp.from);
        }
        from.sort();
        assert_eq!(from, ["a", "b"]);
    }

    #[tokio::test]
    async fn user_events_fan_out() {
        let mesh = Mesh::new();
        let (a, _a_events) = mesh.join("a");
        let (_b, mut b_events) = mesh.join("b");

        a.user_event("test.note", Bytes::from_static(b"x"), false)
            .await
            .unwrap();

        match b_events.recv().await {
            Some(GossipEvent::User(u)) => {
                assert_eq!(u.name, "test.note");
                assert_eq!(&u.payload[..], b"x");
                assert!(u.time > LamportTime(0));
            }
            other => panic!("expected user event, got {other:?}"),
        }
    }
}
