use anyhow::Result;
use rejournal::process::Role;
use rejournal::Error;
use rejournal_tests::*;
use serial_test::serial;
use std::time::{Duration, Instant};
use testapp::{AppEvent, AppWriteRequest};

#[serial]
#[tokio::test(flavor = "multi_thread")]
async fn n1_elects_itself() -> Result<()> {
    let cluster = Cluster::new(1).await?;
    assert_eq!(cluster.wait_leader(&[0]).await?, 0);

    let st = cluster.status(0).await?;
    assert_eq!(st.role, Role::Leader);
    assert!(st.term >= 1);

    let servers = cluster.admin().get_servers(&cluster.address(0)).await?;
    assert_eq!(servers.leader, Some(cluster.address(0)));
    assert_eq!(servers.voters, vec![cluster.address(0)]);
    assert_eq!(servers.joint_voters, None);
    Ok(())
}

#[serial]
#[tokio::test(flavor = "multi_thread")]
async fn n1_write_and_read() -> Result<()> {
    let cluster = Cluster::new(1).await?;
    cluster.wait_leader(&[0]).await?;

    let user = cluster.user();
    let mut cur = 0;
    for i in 1..=10 {
        let old = user.fetch_add(i).await?;
        assert_eq!(old, cur);
        cur += i;
    }

    let st = user.read().await?;
    assert_eq!(st.counter, cur);
    assert_eq!(st.n_applied, 10);

    let st = user.read_lease().await?;
    assert_eq!(st.counter, cur);

    let (index, st) = user.read_local(&cluster.address(0)).await?;
    assert_eq!(st.counter, cur);
    assert_eq!(index, cluster.admin().last_applied(&cluster.address(0)).await?);
    Ok(())
}

#[serial]
#[tokio::test(flavor = "multi_thread")]
async fn n1_rejected_command_keeps_state() -> Result<()> {
    let cluster = Cluster::new(1).await?;
    cluster.wait_leader(&[0]).await?;

    let user = cluster.user();
    user.fetch_add(5).await?;

    let r = cluster
        .admin()
        .update(AppWriteRequest::Fail.serialize())
        .await;
    assert!(matches!(r, Err(Error::StateMachine(_))), "{r:?}");

    // The rejected entry is still committed and applied.
    assert_eq!(user.fetch_add(1).await?, 5);
    assert_eq!(user.read().await?.n_applied, 2);
    Ok(())
}

#[serial]
#[tokio::test(flavor = "multi_thread")]
async fn n1_restart_recovers_state() -> Result<()> {
    let mut cluster = Cluster::new(1).await?;
    cluster.wait_leader(&[0]).await?;

    let user = cluster.user();
    for _ in 0..20 {
        user.fetch_add(3).await?;
    }
    let term = cluster.status(0).await?.term;

    cluster.stop(0);
    cluster.start(0, &[0]).await?;
    cluster.wait_leader(&[0]).await?;

    let st = cluster.status(0).await?;
    assert!(st.term > term);
    let st = cluster.user().read().await?;
    assert_eq!(st.counter, 60);
    assert_eq!(st.n_applied, 20);
    Ok(())
}

#[serial]
#[tokio::test(flavor = "multi_thread")]
async fn n1_lost_ballot_does_not_reuse_terms() -> Result<()> {
    let mut cluster = Cluster::new(1).await?;
    cluster.wait_leader(&[0]).await?;

    let user = cluster.user();
    user.fetch_add(1).await?;
    let term = cluster.status(0).await?.term;

    cluster.stop(0);
    let ballot = cluster.env().data_dir(0).join("meta").join("ballot.redb");
    std::fs::remove_file(ballot)?;
    cluster.start(0, &[0]).await?;
    cluster.wait_leader(&[0]).await?;

    assert!(cluster.status(0).await?.term > term);
    user.fetch_add(2).await?;
    assert_eq!(cluster.user().read().await?.counter, 3);
    Ok(())
}

#[serial]
#[tokio::test(flavor = "multi_thread")]
async fn n1_watch_flow() -> Result<()> {
    let cluster = Cluster::new(1).await?;
    cluster.wait_leader(&[0]).await?;

    let admin = cluster.admin();
    let server = cluster.address(0);
    let sub = admin.add_pull_watch(&server).await?;
    assert!(sub.watch_timeout_ms > 0);

    let user = cluster.user();
    for n in [1, 2, 3] {
        user.fetch_add(n).await?;
    }

    let resp = admin
        .pull_events(&server, sub.subscriber_id, 0, Duration::from_secs(5))
        .await?;
    assert!(!resp.resync_required);
    let ids: Vec<u64> = resp.events.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    let values: Vec<(u64, u64)> = resp
        .events
        .iter()
        .map(|e| {
            let e = AppEvent::deserialize(&e.payload).unwrap();
            (e.old, e.new)
        })
        .collect();
    assert_eq!(values, vec![(0, 1), (1, 3), (3, 6)]);

    // Nothing new: the pull waits out `max_wait` and returns empty.
    let t = Instant::now();
    let resp = admin
        .pull_events(&server, sub.subscriber_id, 3, Duration::from_secs(1))
        .await?;
    assert!(resp.events.is_empty());
    assert!(t.elapsed() >= Duration::from_millis(900));

    // A pending pull wakes up on the next event.
    let pull = admin.pull_events(&server, sub.subscriber_id, 3, Duration::from_secs(5));
    let write = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        user.fetch_add(10).await
    };
    let (resp, _) = tokio::try_join!(
        async { pull.await.map_err(anyhow::Error::from) },
        write
    )?;
    assert_eq!(resp.events.len(), 1);
    assert_eq!(resp.events[0].id, 4);

    admin
        .remove_pull_watch(&server, sub.subscriber_id)
        .await?;
    let r = admin
        .pull_events(&server, sub.subscriber_id, 4, Duration::from_millis(10))
        .await;
    assert_eq!(r, Err(Error::WatchNotFound));
    Ok(())
}
