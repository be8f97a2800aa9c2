//! conclave-testkit: an in-memory cluster for exercising polities.
//!
//! Provides a [`Mesh`] that stands in for a real gossip membership layer:
//! nodes join by name, share a cluster-wide Lamport clock, and exchange
//! queries and user events over channels. Failure controls (crash,
//! partition) make the election failure scenarios deterministic.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use conclave_core::{Polity, PolityConfig};
//! use conclave_testkit::Mesh;
//!
//! # async fn demo() {
//! let mesh = Mesh::new();
//! let (transport, events) = mesh.join("A");
//! let polity = Polity::create(Arc::new(transport), events, PolityConfig::default());
//! # }
//! ```

mod mesh;

pub use mesh::{Mesh, MeshTransport};
