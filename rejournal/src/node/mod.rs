use super::*;

use crate::config::NodeConfig;
use crate::dispatcher::Dispatcher;
use crate::process::{RaftProcess, StateMachine, ThreadHandle};
use crate::storage::{LogOptions, RaftStorage};
use crate::transport::{self, ConnectionPool, TransportOptions};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

mod communicator;
pub use communicator::Communicator;

/// `RaftHandle` is how a `RaftProcess` reaches the other servers.
#[derive(Clone)]
pub struct RaftHandle {
    pub self_address: NodeAddress,
    pool: ConnectionPool,
}

impl RaftHandle {
    pub fn new(self_address: NodeAddress, pool: ConnectionPool) -> Self {
        Self { self_address, pool }
    }

    pub fn connect(&self, peer: &NodeAddress) -> Communicator {
        Communicator::new(self.pool.clone(), peer.clone())
    }
}

/// A running journal server.
///
/// The node owns the process and the dispatcher. The accept loop only holds
/// a weak reference to the dispatcher, so dropping the node stops everything.
pub struct RaftNode {
    process: Arc<RaftProcess>,
    _dispatcher: Arc<Dispatcher>,
    local_addr: SocketAddr,
    _server: ThreadHandle,
}

impl RaftNode {
    /// Binds `config.listen_addr` and starts serving.
    pub async fn start(config: NodeConfig, app: impl StateMachine) -> Result<Self> {
        let listener = TcpListener::bind(config.listen_addr)
            .await
            .with_context(|| format!("failed to bind {}", config.listen_addr))?;
        Self::start_with_listener(config, app, listener).await
    }

    pub async fn start_with_listener(
        config: NodeConfig,
        app: impl StateMachine,
        listener: TcpListener,
    ) -> Result<Self> {
        config.validate()?;
        let self_address = config.self_address()?.clone();

        let storage = RaftStorage::open(
            &config.data_dir,
            LogOptions {
                segment_size: config.segment_size,
                fsync: config.fsync_policy,
            },
        )?;
        let options = TransportOptions::from_config(&config);
        let io = RaftHandle::new(self_address.clone(), ConnectionPool::new(options.clone()));
        let process = Arc::new(RaftProcess::new(app, storage, &config, io).await?);

        let dispatcher = Arc::new(service::new(process.clone()));
        let local_addr = listener.local_addr()?;
        let server = transport::serve(listener, Arc::downgrade(&dispatcher), options);
        let hdl = tokio::spawn(async move {
            if let Err(e) = server.await {
                tracing::error!("accept loop stopped: {e:#}");
            }
        })
        .abort_handle();

        info!("journal server {self_address} is listening on {local_addr}");
        Ok(Self {
            process,
            _dispatcher: dispatcher,
            local_addr,
            _server: ThreadHandle(hdl),
        })
    }

    pub fn process(&self) -> &Arc<RaftProcess> {
        &self.process
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
