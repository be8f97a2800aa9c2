//! Test helpers for spawning a mesh of polities.

use std::sync::Arc;
use std::sync::Once;
use std::time::Duration;

use conclave_core::{Polity, PolityConfig};
use conclave_testkit::Mesh;

/// Single-letter node names, in join order.
pub const NAMES: [&str; 7] = ["A", "B", "C", "D", "E", "F", "G"];

/// A mesh with one polity per node.
pub struct TestCluster {
    pub mesh: Mesh,
    pub polities: Vec<Arc<Polity>>,
}

impl TestCluster {
    /// Spawns `n` joined nodes named from [`NAMES`].
    pub fn spawn(n: usize) -> Self {
        assert!(n <= NAMES.len(), "not enough names for {n} nodes");
        init_tracing();

        let mesh = Mesh::new();
        let polities = NAMES[..n]
            .iter()
            .map(|name| {
                let (transport, events) = mesh.join(name);
                Polity::create(Arc::new(transport), events, test_config())
            })
            .collect();

        Self { mesh, polities }
    }

    /// The polity named `name`.
    pub fn node(&self, name: &str) -> &Arc<Polity> {
        self.polities
            .iter()
            .find(|p| p.local_name() == name)
            .unwrap_or_else(|| panic!("no node named {name:?}"))
    }
}

/// Protocol timeouts shrunk so failing rounds end in milliseconds, not
/// seconds. Semantics are unchanged.
fn test_config() -> PolityConfig {
    PolityConfig {
        gather_timeout: Duration::from_millis(300),
        confirm_timeout: Duration::from_millis(300),
        resolve_timeout: Duration::from_millis(300),
        poll_interval: Duration::from_millis(10),
    }
}

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "conclave=warn".into()),
            )
            .with_test_writer()
            .try_init();
    });
}
