//! Elections under node failures.
//!
//! The mesh keeps crashed nodes in the population count, which is the
//! window real membership layers sit in before reaping dead peers: quorum
//! requirements stay pinned to the old cluster size while fewer nodes can
//! actually answer.

use conclave_core::PolityError;

use crate::helpers::TestCluster;

#[tokio::test]
async fn quorum_survives_one_crashed_node() {
    let cluster = TestCluster::spawn(7);

    cluster.node("A").run_election("leader").await.unwrap();
    cluster.node("B").run_recall_election("leader").await.unwrap();

    cluster.mesh.shutdown("G");

    // six of seven can still clear the majority requirement of four
    cluster.node("C").run_election("leader").await.unwrap();
    assert_eq!(cluster.node("D").query_role("leader").await.unwrap(), "C");
}

#[tokio::test]
async fn minority_partition_loses_the_election() {
    let cluster = TestCluster::spawn(7);

    cluster.node("A").run_election("leader").await.unwrap();
    cluster.node("B").run_recall_election("leader").await.unwrap();

    for name in ["D", "E", "F", "G"] {
        cluster.mesh.shutdown(name);
    }

    // three survivors still believe in a 7-node cluster, so they need
    // four YES votes and can only ever gather three
    assert!(matches!(
        cluster.node("A").run_election("leader").await,
        Err(PolityError::LostElection)
    ));
}

#[tokio::test]
async fn crashed_node_cannot_start_an_election() {
    let cluster = TestCluster::spawn(3);
    cluster.mesh.shutdown("C");

    assert!(matches!(
        cluster.node("C").run_election("leader").await,
        Err(PolityError::Transport(_))
    ));
}
