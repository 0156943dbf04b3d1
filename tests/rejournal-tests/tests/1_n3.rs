use anyhow::Result;
use rejournal::process::Role;
use rejournal_tests::*;
use serial_test::serial;
use std::time::Duration;

const ALL: [u8; 3] = [0, 1, 2];

fn others(leader: u8) -> Vec<u8> {
    ALL.into_iter().filter(|&x| x != leader).collect()
}

#[serial]
#[tokio::test(flavor = "multi_thread")]
async fn n3_single_write() -> Result<()> {
    let cluster = Cluster::new(3).await?;
    let leader = cluster.wait_leader(&ALL).await?;

    let (index, old) = cluster.fetch_add(7).await?;
    assert_eq!(old, 0);

    for id in ALL {
        cluster.wait_applied(id, index).await?;
        let st = cluster.status(id).await?;
        assert!(st.commit_index >= index);
        let (_, app) = cluster.user().read_local(&cluster.address(id)).await?;
        assert_eq!(app.counter, 7);
        // Applied exactly once everywhere.
        assert_eq!(app.n_applied, 1);
        if id != leader {
            assert_eq!(st.role, Role::Follower);
        }
    }
    Ok(())
}

#[serial]
#[tokio::test(flavor = "multi_thread")]
async fn n3_client_follows_redirect() -> Result<()> {
    let cluster = Cluster::new(3).await?;
    let leader = cluster.wait_leader(&ALL).await?;

    // Only knows a follower at first.
    let follower = others(leader)[0];
    let user = cluster.user_to(&[follower]);
    assert_eq!(user.fetch_add(1).await?, 0);
    assert_eq!(user.read().await?.counter, 1);
    Ok(())
}

#[serial]
#[tokio::test(flavor = "multi_thread")]
async fn n3_leader_failure() -> Result<()> {
    let mut cluster = Cluster::new(3).await?;
    let leader = cluster.wait_leader(&ALL).await?;
    let term = cluster.status(leader).await?.term;

    let mut cur = 0;
    for i in 1..=5 {
        assert_eq!(cluster.fetch_add(i).await?.1, cur);
        cur += i;
    }

    cluster.stop(leader);
    let rest = others(leader);
    let new_leader = cluster.wait_leader(&rest).await?;
    assert_ne!(new_leader, leader);
    assert!(cluster.status(new_leader).await?.term > term);

    // Everything committed survives the failover.
    assert_eq!(cluster.user_to(&rest).read().await?.counter, cur);

    let (index, old) = cluster.user_to(&rest).fetch_add_at(100).await?;
    assert_eq!(old, cur);
    cur += 100;

    // The old leader comes back as a follower and catches up.
    cluster.start(leader, &ALL).await?;
    cluster.wait_applied(leader, index).await?;
    let (_, app) = cluster.user().read_local(&cluster.address(leader)).await?;
    assert_eq!(app.counter, cur);
    assert_eq!(app.n_applied, 6);
    assert_ne!(cluster.status(leader).await?.role, Role::Leader);
    Ok(())
}

#[serial]
#[tokio::test(flavor = "multi_thread")]
async fn n3_isolated_leader_loses_uncommitted_tail() -> Result<()> {
    let mut cluster = Cluster::new(3).await?;
    let old_leader = cluster.wait_leader(&ALL).await?;

    for _ in 0..3 {
        cluster.fetch_add(1).await?;
    }
    let old_term = cluster.status(old_leader).await?.term;

    // Cut the leader off from the majority. Its write cannot commit.
    let rest = others(old_leader);
    for &id in &rest {
        cluster.stop(id);
    }
    let isolated = testapp::Client::new(cluster.env().client_to(&[old_leader]).max_retries(0));
    let r = isolated.fetch_add(1000).await;
    assert!(r.is_err());

    // The majority comes back without it and moves on.
    cluster.stop(old_leader);
    for &id in &rest {
        cluster.start(id, &ALL).await?;
    }
    let new_leader = cluster.wait_leader(&rest).await?;
    let mut last = 0;
    for _ in 0..3 {
        let (index, _) = cluster.user_to(&rest).fetch_add_at(10).await?;
        last = index;
    }
    assert!(cluster.status(new_leader).await?.term > old_term);

    // The old leader rejoins, steps down and replaces its tail.
    cluster.start(old_leader, &ALL).await?;
    cluster.wait_applied(old_leader, last).await?;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let leader = cluster.wait_leader(&ALL).await?;
    let leader_st = cluster.status(leader).await?;
    let st = cluster.status(old_leader).await?;
    assert_eq!(st.term, leader_st.term);
    for id in ALL {
        let (_, app) = cluster.user().read_local(&cluster.address(id)).await?;
        assert_eq!(app.counter, 33, "node(id={id})");
    }
    Ok(())
}

#[serial]
#[tokio::test(flavor = "multi_thread")]
async fn n3_parallel_writes() -> Result<()> {
    let cluster = Cluster::new(3).await?;
    cluster.wait_leader(&ALL).await?;

    let user = std::sync::Arc::new(cluster.user());
    let mut futs = vec![];
    for _ in 0..50 {
        let user = user.clone();
        futs.push(async move { user.fetch_add(2).await });
    }
    let mut olds = futures::future::try_join_all(futs).await?;
    olds.sort();
    let expected: Vec<u64> = (0..50).map(|i| i * 2).collect();
    assert_eq!(olds, expected);

    let st = user.read().await?;
    assert_eq!(st.counter, 100);
    assert_eq!(st.n_applied, 50);
    Ok(())
}
