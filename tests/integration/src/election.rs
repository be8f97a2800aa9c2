//! Election and recall round trips on healthy clusters.

use conclave_core::PolityError;

use crate::helpers::TestCluster;

#[tokio::test]
async fn elect_query_recall() {
    let cluster = TestCluster::spawn(3);

    cluster.node("A").run_election("leader").await.unwrap();

    // any other live node resolves the elected holder
    let leader = cluster.node("B").query_role("leader").await.unwrap();
    assert_eq!(leader, "A");

    // a different node can recall the role
    cluster.node("B").run_recall_election("leader").await.unwrap();
}

#[tokio::test]
async fn reelection_by_incumbent_is_a_noop() {
    let cluster = TestCluster::spawn(3);
    let a = cluster.node("A");

    a.run_election("leader").await.unwrap();
    // running again must not demote the incumbent
    a.run_election("leader").await.unwrap();

    assert_eq!(cluster.node("C").query_role("leader").await.unwrap(), "A");
}

#[tokio::test]
async fn recalled_role_is_vacant_for_the_next_candidate() {
    let cluster = TestCluster::spawn(3);

    cluster.node("A").run_election("leader").await.unwrap();
    cluster.node("B").run_recall_election("leader").await.unwrap();

    // a recalled role behaves like an absent one: a new candidate wins
    cluster.node("C").run_election("leader").await.unwrap();
    assert_eq!(cluster.node("A").query_role("leader").await.unwrap(), "C");
}

#[tokio::test]
async fn occupied_role_rejects_other_candidates() {
    let cluster = TestCluster::spawn(3);

    cluster.node("A").run_election("leader").await.unwrap();

    assert!(matches!(
        cluster.node("B").run_election("leader").await,
        Err(PolityError::LostElection)
    ));
    // the incumbent is untouched
    assert_eq!(cluster.node("C").query_role("leader").await.unwrap(), "A");
}

#[tokio::test]
async fn single_node_cluster_cannot_elect() {
    let cluster = TestCluster::spawn(1);

    // the majority floor demands three votes no matter how small the
    // population looks
    assert!(matches!(
        cluster.node("A").run_election("leader").await,
        Err(PolityError::LostElection)
    ));
}

#[tokio::test]
async fn distinct_roles_elect_independently() {
    let cluster = TestCluster::spawn(3);

    cluster.node("A").run_election("leader").await.unwrap();
    cluster.node("B").run_election("recover:host-42").await.unwrap();

    assert_eq!(cluster.node("C").query_role("leader").await.unwrap(), "A");
    assert_eq!(
        cluster.node("C").query_role("recover:host-42").await.unwrap(),
        "B"
    );
}

#[tokio::test]
async fn recall_of_never_filled_role_fails_locally() {
    let cluster = TestCluster::spawn(3);

    assert!(matches!(
        cluster.node("A").run_recall_election("leader").await,
        Err(PolityError::RoleUnfilled)
    ));
}
