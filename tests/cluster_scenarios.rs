//! Multi-node scenarios driven straight from the concrete cases: several
//! `Cluster` instances wired together through one shared in-memory
//! transport, so membership converges deterministically without binding a
//! single socket.

use ringcensus_core::{ClusterConfig, Endpoint};
use ringcensus_net::{LocalTransport, Transport};
use ringcensus_service::{Cluster, ClusterOptions, Event};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn endpoint(port: u16) -> Endpoint {
    Endpoint::new("127.0.0.1", port)
}

fn fast_config() -> ClusterConfig {
    // Shrink the fast-path window and probe interval so scenarios converge
    // quickly under test, without changing the watermark/quorum arithmetic.
    ClusterConfig::builder()
        .probe_interval(Duration::from_millis(50))
        .failure_threshold(2)
        .max_retries(5)
        .build()
        .unwrap()
}

fn duelling_config() -> ClusterConfig {
    // A fast-path window short enough that two observers proposing
    // different endpoint sets at nearly the same instant reliably miss
    // quorum, and a tiny Paxos backoff base so the nacked proposer's retry
    // lands well within the test's poll budget.
    ClusterConfig::builder()
        .probe_interval(Duration::from_millis(50))
        .failure_threshold(2)
        .max_retries(5)
        .fast_path_window(Duration::from_millis(5))
        .paxos_base_timeout(Duration::from_millis(5))
        .build()
        .unwrap()
}

async fn start_seed_with(config: ClusterConfig, shared: &Arc<dyn Transport>, port: u16) -> Cluster {
    let options = ClusterOptions::builder().transport(shared.clone()).build();
    Cluster::start(endpoint(port), config, options).await.unwrap()
}

async fn join_with(config: ClusterConfig, shared: &Arc<dyn Transport>, port: u16, seed_port: u16) -> Cluster {
    let options = ClusterOptions::builder().transport(shared.clone()).build();
    Cluster::join(endpoint(port), endpoint(seed_port), config, options).await.unwrap()
}

async fn start_seed(shared: &Arc<dyn Transport>, port: u16) -> Cluster {
    let options = ClusterOptions::builder().transport(shared.clone()).build();
    Cluster::start(endpoint(port), fast_config(), options).await.unwrap()
}

async fn join(shared: &Arc<dyn Transport>, port: u16, seed_port: u16) -> Cluster {
    let options = ClusterOptions::builder().transport(shared.clone()).build();
    Cluster::join(endpoint(port), endpoint(seed_port), fast_config(), options).await.unwrap()
}

#[tokio::test]
async fn seed_only_start_has_a_single_deterministic_member() {
    let cluster = start_seed(&(Arc::new(LocalTransport::new()) as Arc<dyn Transport>), 1000).await;
    assert_eq!(cluster.member_list().await, vec![endpoint(1000)]);
    assert_eq!(cluster.membership_size().await, 1);
    cluster.shutdown().await;
}

#[tokio::test]
async fn single_join_converges_both_sides_on_the_same_configuration() {
    let shared: Arc<dyn Transport> = Arc::new(LocalTransport::new());
    let seed = start_seed(&shared, 2000).await;
    let joiner = join(&shared, 2001, 2000).await;

    let mut expected = vec![endpoint(2000), endpoint(2001)];
    expected.sort();
    assert_eq!(joiner.member_list().await, expected);

    // The seed learns the decision asynchronously, off the broadcast the
    // joiner's winning observer sends as part of its own consensus round.
    for _ in 0..50 {
        if seed.member_list().await == expected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(seed.member_list().await, expected);

    seed.shutdown().await;
    joiner.shutdown().await;
}

#[tokio::test]
async fn parallel_join_of_three_lands_in_one_configuration() {
    let shared: Arc<dyn Transport> = Arc::new(LocalTransport::new());
    let seed = start_seed(&shared, 3000).await;

    let (b, c, d) = tokio::join!(join(&shared, 3001, 3000), join(&shared, 3002, 3000), join(&shared, 3003, 3000));

    let mut expected = vec![endpoint(3000), endpoint(3001), endpoint(3002), endpoint(3003)];
    expected.sort();

    for node in [&seed, &b, &c, &d] {
        for _ in 0..100 {
            if node.member_list().await == expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(node.member_list().await, expected);
    }

    seed.shutdown().await;
    b.shutdown().await;
    c.shutdown().await;
    d.shutdown().await;
}

#[tokio::test]
async fn view_change_subscriber_observes_the_new_member() {
    let shared: Arc<dyn Transport> = Arc::new(LocalTransport::new());
    let seed = start_seed(&shared, 4000).await;

    let fired = Arc::new(AtomicUsize::new(0));
    let counted = fired.clone();
    seed.subscribe(
        Event::ViewChange,
        Box::new(move |payload| {
            if let Some(view) = &payload.view {
                if view.members().contains(&endpoint(4001)) {
                    counted.fetch_add(1, Ordering::SeqCst);
                }
            }
        }),
    );

    let joiner = join(&shared, 4001, 4000).await;

    for _ in 0..50 {
        if fired.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(fired.load(Ordering::SeqCst) > 0, "seed never observed a VIEW_CHANGE naming the joiner");

    seed.shutdown().await;
    joiner.shutdown().await;
}

#[tokio::test]
async fn observer_detected_failure_removes_the_dead_node() {
    let local = Arc::new(LocalTransport::new());
    let shared: Arc<dyn Transport> = local.clone();
    let seed = start_seed(&shared, 5000).await;
    let victim = join(&shared, 5001, 5000).await;

    let mut expected = vec![endpoint(5000), endpoint(5001)];
    expected.sort();
    for _ in 0..50 {
        if seed.member_list().await == expected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(seed.member_list().await, expected);

    // Drop the victim's outbound traffic by unregistering it, simulating a
    // dead process that never answers a probe again.
    local.unregister(&endpoint(5001)).await;

    for _ in 0..100 {
        if seed.member_list().await == vec![endpoint(5000)] {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(seed.member_list().await, vec![endpoint(5000)]);

    seed.shutdown().await;
    victim.shutdown().await;
}

#[tokio::test]
async fn duelling_proposals_fall_back_to_classic_paxos_and_still_converge() {
    // Four nodes join a seed at once with a fast-path window too short for
    // every observer's proposal to line up: several of them race each other
    // into classic Paxos, nack each other's ballots, and fall back to the
    // randomized backoff retry. The scenario is only exercised correctly if
    // a majority-accepted ballot is decided by every node that saw it (not
    // only the one that started the winning round) and a nacked proposer's
    // retry actually restarts its round instead of stalling.
    let shared: Arc<dyn Transport> = Arc::new(LocalTransport::new());
    let seed = start_seed_with(duelling_config(), &shared, 6000).await;

    let fallbacks = Arc::new(AtomicUsize::new(0));
    let counted = fallbacks.clone();
    seed.subscribe(
        Event::ViewChangeOneStepFailed,
        Box::new(move |_payload| {
            counted.fetch_add(1, Ordering::SeqCst);
        }),
    );

    let (a, b, c, d) = tokio::join!(
        join_with(duelling_config(), &shared, 6001, 6000),
        join_with(duelling_config(), &shared, 6002, 6000),
        join_with(duelling_config(), &shared, 6003, 6000),
        join_with(duelling_config(), &shared, 6004, 6000),
    );

    let mut expected = vec![endpoint(6000), endpoint(6001), endpoint(6002), endpoint(6003), endpoint(6004)];
    expected.sort();

    for node in [&seed, &a, &b, &c, &d] {
        for _ in 0..200 {
            if node.member_list().await == expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(node.member_list().await, expected);
    }
    assert!(
        fallbacks.load(Ordering::SeqCst) > 0,
        "expected the tight fast-path window to force at least one classic-Paxos fallback"
    );

    seed.shutdown().await;
    a.shutdown().await;
    b.shutdown().await;
    c.shutdown().await;
    d.shutdown().await;
}
