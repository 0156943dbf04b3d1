use anyhow::Result;
use rejournal::process::Role;
use rejournal::{Error, NodeAddress};
use rejournal_tests::*;
use serial_test::serial;
use std::time::Duration;

fn addrs(cluster: &Cluster, ids: &[u8]) -> Vec<NodeAddress> {
    ids.iter().map(|&x| cluster.address(x)).collect()
}

fn sorted(mut xs: Vec<NodeAddress>) -> Vec<NodeAddress> {
    xs.sort();
    xs
}

#[serial]
#[tokio::test(flavor = "multi_thread")]
async fn add_voter_through_joint_consensus() -> Result<()> {
    let mut cluster = Cluster::new(3).await?;
    cluster.wait_leader(&[0, 1, 2]).await?;
    cluster.fetch_add(1).await?;

    // The newcomer starts knowing the current voters, so it never campaigns on its own.
    cluster.env().reserve(3)?;
    cluster.start(3, &[0, 1, 2]).await?;
    assert_eq!(cluster.status(3).await?.role, Role::Observer);

    cluster
        .admin()
        .update_voters(addrs(&cluster, &[0, 1, 2]), addrs(&cluster, &[0, 1, 2, 3]))
        .await?;

    for id in 0..4 {
        let servers = cluster.admin().get_servers(&cluster.address(id)).await;
        // The new configuration reaches everyone with the next heartbeat.
        let servers = match servers {
            Ok(x) if x.joint_voters.is_none() && x.voters.len() == 4 => x,
            _ => {
                tokio::time::sleep(Duration::from_millis(500)).await;
                cluster.admin().get_servers(&cluster.address(id)).await?
            }
        };
        assert_eq!(servers.joint_voters, None);
        assert_eq!(sorted(servers.voters), sorted(addrs(&cluster, &[0, 1, 2, 3])));
    }

    let (index, old) = cluster.fetch_add(1).await?;
    assert_eq!(old, 1);
    cluster.wait_applied(3, index).await?;
    let (_, app) = cluster.user().read_local(&cluster.address(3)).await?;
    assert_eq!(app.counter, 2);
    assert_eq!(cluster.status(3).await?.role, Role::Follower);

    // With four voters a quorum is three: one failure is still tolerated.
    let leader = cluster.wait_leader(&[0, 1, 2, 3]).await?;
    let down = if leader == 0 { 1 } else { 0 };
    cluster.stop(down);
    let (_, old) = cluster.fetch_add(1).await?;
    assert_eq!(old, 2);
    Ok(())
}

#[serial]
#[tokio::test(flavor = "multi_thread")]
async fn remove_voter() -> Result<()> {
    let mut cluster = Cluster::new(3).await?;
    let leader = cluster.wait_leader(&[0, 1, 2]).await?;
    cluster.fetch_add(1).await?;

    // Remove the leader itself. It hands over once the change is committed.
    let remain: Vec<u8> = [0, 1, 2].into_iter().filter(|&x| x != leader).collect();
    cluster
        .admin()
        .update_voters(addrs(&cluster, &[0, 1, 2]), addrs(&cluster, &remain))
        .await?;

    let new_leader = cluster.wait_leader(&remain).await?;
    assert_ne!(new_leader, leader);
    let servers = cluster
        .admin()
        .get_servers(&cluster.address(new_leader))
        .await?;
    assert_eq!(sorted(servers.voters), sorted(addrs(&cluster, &remain)));

    // The removed server learned the commit of the new configuration before it was dropped.
    let servers = cluster.admin().get_servers(&cluster.address(leader)).await?;
    assert_eq!(servers.joint_voters, None);
    assert_eq!(sorted(servers.voters), sorted(addrs(&cluster, &remain)));
    assert_ne!(cluster.status(leader).await?.role, Role::Leader);

    cluster.stop(leader);
    let (_, old) = cluster.user_to(&remain).fetch_add_at(1).await?;
    assert_eq!(old, 1);
    Ok(())
}

#[serial]
#[tokio::test(flavor = "multi_thread")]
async fn stale_old_voters_are_rejected() -> Result<()> {
    let cluster = Cluster::new(3).await?;
    cluster.wait_leader(&[0, 1, 2]).await?;

    let r = cluster
        .admin()
        .update_voters(addrs(&cluster, &[0, 1]), addrs(&cluster, &[0]))
        .await;
    assert!(matches!(r, Err(Error::Protocol(_))), "{r:?}");

    let r = cluster
        .admin()
        .update_voters(addrs(&cluster, &[0, 1, 2]), vec![])
        .await;
    assert!(matches!(r, Err(Error::Protocol(_))), "{r:?}");

    // Same voters: nothing to do.
    cluster
        .admin()
        .update_voters(addrs(&cluster, &[0, 1, 2]), addrs(&cluster, &[2, 1, 0]))
        .await?;
    Ok(())
}
