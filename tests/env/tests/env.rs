use anyhow::Result;
use serial_test::serial;

#[serial]
#[tokio::test(flavor = "multi_thread")]
async fn create() -> Result<()> {
    let mut env = env::Env::new(false);
    env.start_node(0, &[0]).await?;
    assert!(env.is_running(0));
    Ok(())
}

#[serial]
#[tokio::test(flavor = "multi_thread")]
async fn create_remove() -> Result<()> {
    let mut env = env::Env::new(false);
    env.start_node(0, &[0]).await?;

    let cli = env.client();
    cli.server_status(&env.address(0)).await?;

    env.stop_node(0);
    assert!(!env.is_running(0));
    assert!(cli.server_status(&env.address(0)).await.is_err());

    Ok(())
}

#[serial]
#[tokio::test(flavor = "multi_thread")]
async fn restart_keeps_address() -> Result<()> {
    let mut env = env::Env::new(false);
    env.start_node(0, &[0]).await?;
    let addr = env.address(0);
    env.stop_node(0);
    env.start_node(0, &[0]).await?;
    assert_eq!(env.address(0), addr);
    env.client().server_status(&addr).await?;
    Ok(())
}

#[serial]
#[tokio::test(flavor = "multi_thread")]
async fn drop_env() -> Result<()> {
    for _ in 0..10 {
        let mut env = env::Env::new(false);
        env.start_node(0, &[0]).await?;
    }

    Ok(())
}
