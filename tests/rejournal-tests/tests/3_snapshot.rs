use anyhow::Result;
use rejournal_tests::*;
use serial_test::serial;

const ALL: [u8; 3] = [0, 1, 2];

#[serial]
#[tokio::test(flavor = "multi_thread")]
async fn lagging_follower_installs_snapshot() -> Result<()> {
    let mut cluster = Cluster::builder().snapshot_interval(5).build(3).await?;
    let leader = cluster.wait_leader(&ALL).await?;

    let lagging = ALL.into_iter().find(|&x| x != leader).unwrap();
    cluster.stop(lagging);

    let rest: Vec<u8> = ALL.into_iter().filter(|&x| x != lagging).collect();
    let user = cluster.user_to(&rest);
    let mut last = 0;
    for _ in 0..30 {
        let (index, _) = user.fetch_add_at(1).await?;
        last = index;
    }

    // The leader has compacted its log past what the stopped follower has.
    let st = cluster.status(leader).await?;
    assert!(st.first_index > 1, "{st:?}");

    cluster.start(lagging, &ALL).await?;
    cluster.wait_applied(lagging, last).await?;
    let (_, app) = cluster.user().read_local(&cluster.address(lagging)).await?;
    assert_eq!(app.counter, 30);
    assert_eq!(app.n_applied, 30);

    let st = cluster.status(lagging).await?;
    assert!(st.first_index > 1, "{st:?}");
    Ok(())
}

#[serial]
#[tokio::test(flavor = "multi_thread")]
async fn whole_cluster_restarts_from_snapshots() -> Result<()> {
    let mut cluster = Cluster::builder().snapshot_interval(4).build(3).await?;
    cluster.wait_leader(&ALL).await?;

    for _ in 0..17 {
        cluster.fetch_add(2).await?;
    }

    for id in ALL {
        cluster.stop(id);
    }
    for id in ALL {
        cluster.start(id, &ALL).await?;
    }
    cluster.wait_leader(&ALL).await?;

    let st = cluster.user().read().await?;
    assert_eq!(st.counter, 34);
    assert_eq!(st.n_applied, 17);

    assert_eq!(cluster.fetch_add(1).await?.1, 34);
    Ok(())
}
