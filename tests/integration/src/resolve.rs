//! Role resolution with divergent peer views.

use conclave_core::PolityError;

use crate::helpers::TestCluster;

#[tokio::test]
async fn stale_peer_cannot_flip_the_consensus() {
    let cluster = TestCluster::spawn(5);

    cluster.node("A").run_election("leader").await.unwrap();

    // E misses the recall behind a partition, so it still believes the
    // role is confirmed with an old Lamport time
    cluster.mesh.isolate("E");
    cluster.node("B").run_recall_election("leader").await.unwrap();
    cluster.mesh.rejoin("E");

    // the majority's fresher story wins regardless of E's stale answer
    assert_eq!(cluster.node("D").query_role("leader").await.unwrap(), "A");

    // a new election overrides E's stale view: E votes NO but the quorum
    // passes without it, and the confirmation brings E back in line
    cluster.node("C").run_election("leader").await.unwrap();
    assert_eq!(cluster.node("B").query_role("leader").await.unwrap(), "C");
    assert_eq!(cluster.node("E").query_role("leader").await.unwrap(), "C");
}

#[tokio::test]
async fn unknown_role_resolves_to_nothing() {
    let cluster = TestCluster::spawn(3);

    // every peer answers with the no-holder sentinel, which never counts
    // toward quorum
    assert!(matches!(
        cluster.node("A").query_role("never-elected").await,
        Err(PolityError::LostElection)
    ));
}

#[tokio::test]
async fn recalled_role_still_resolves_to_its_last_holder() {
    let cluster = TestCluster::spawn(3);

    cluster.node("A").run_election("leader").await.unwrap();
    cluster.node("B").run_recall_election("leader").await.unwrap();

    // peers keep the vacated record; consensus names the last holder even
    // though an election would treat the role as vacant
    assert_eq!(cluster.node("C").query_role("leader").await.unwrap(), "A");
}
