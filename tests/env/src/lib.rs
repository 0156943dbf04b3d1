use anyhow::{bail, Context, Result};
use rejournal::transport::TransportOptions;
use rejournal::{JournalClient, NodeAddress, NodeConfig, RaftNode};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Once;
use std::time::Duration;
use tracing::info;

static INIT: Once = Once::new();

/// Timing of the test clusters. Short enough for elections to settle in well under a second.
pub fn test_config(self_address: NodeAddress, data_dir: PathBuf) -> NodeConfig {
    let mut config = NodeConfig::new(self_address, data_dir)
        .election_timeout(Duration::from_millis(300))
        .heartbeat_interval(Duration::from_millis(50))
        .watch_timeout(Duration::from_secs(10));
    config.rpc_timeout = Duration::from_millis(1000);
    config.connect_timeout = Duration::from_millis(200);
    config.clock_skew = Duration::from_millis(20);
    config
}

struct Node {
    abort_tx0: Option<tokio::sync::oneshot::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}
impl Node {
    /// Runs a server on its own thread and runtime, like a separate process.
    async fn new(id: u8, listener: std::net::TcpListener, config: NodeConfig) -> Result<Self> {
        let port = listener.local_addr()?.port();
        let nd_tag = format!("ND{port}>");
        let (tx, rx) = tokio::sync::oneshot::channel();
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();

        let thread = std::thread::Builder::new()
            .name(nd_tag.clone())
            .spawn(move || {
                let svc_task = async move {
                    info!("add (id={id})");
                    let node = match start(listener, config).await {
                        Ok(node) => {
                            ready_tx.send(Ok(())).ok();
                            node
                        }
                        Err(e) => {
                            ready_tx.send(Err(e)).ok();
                            return;
                        }
                    };
                    rx.await.ok();
                    info!("remove (id={id})");
                    drop(node);
                };
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .thread_name(nd_tag)
                    .enable_all()
                    .build()
                    .unwrap();
                runtime.block_on(svc_task);
            })?;

        let node = Self {
            abort_tx0: Some(tx),
            thread: Some(thread),
        };
        ready_rx
            .await
            .context("node thread died before starting")??;
        Ok(node)
    }
}
async fn start(listener: std::net::TcpListener, config: NodeConfig) -> Result<RaftNode> {
    listener.set_nonblocking(true)?;
    let listener = tokio::net::TcpListener::from_std(listener)?;
    RaftNode::start_with_listener(config, testapp::CounterApp::new(), listener).await
}
impl Drop for Node {
    fn drop(&mut self) {
        if let Some(tx) = self.abort_tx0.take() {
            tx.send(()).ok();
        }
        // The data directory must be released before the node can be restarted.
        if let Some(thread) = self.thread.take() {
            thread.join().ok();
        }
    }
}

struct Slot {
    port: u16,
    /// Bound at reservation and handed to the first start.
    listener: Option<std::net::TcpListener>,
}

/// A set of journal servers on the loopback interface.
///
/// A node keeps its port and data directory across `stop_node` and
/// `start_node`, so a restart looks like a crashed server coming back.
pub struct Env {
    root: tempfile::TempDir,
    slots: HashMap<u8, Slot>,
    nodes: HashMap<u8, Node>,
}
impl Env {
    pub fn new(with_logging: bool) -> Self {
        INIT.call_once(|| {
            // On terminating the tokio runtime,
            // flooding stack traces are printed and they are super noisy.
            std::panic::set_hook(Box::new(|_info| {}));

            if with_logging {
                let format = tracing_subscriber::fmt::format()
                    .with_target(false)
                    .with_thread_names(true)
                    .compact();
                tracing_subscriber::fmt().event_format(format).init();
            }
        });
        Self {
            root: tempfile::tempdir().unwrap(),
            slots: HashMap::new(),
            nodes: HashMap::new(),
        }
    }

    /// Allocates a port for node `id`.
    pub fn reserve(&mut self, id: u8) -> Result<NodeAddress> {
        if !self.slots.contains_key(&id) {
            let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
            let port = listener.local_addr()?.port();
            self.slots.insert(
                id,
                Slot {
                    port,
                    listener: Some(listener),
                },
            );
        }
        Ok(self.address(id))
    }

    pub fn address(&self, id: u8) -> NodeAddress {
        let port = self.slots.get(&id).unwrap().port;
        format!("http://127.0.0.1:{port}").parse().unwrap()
    }

    pub fn data_dir(&self, id: u8) -> PathBuf {
        self.root.path().join(format!("nd{id}"))
    }

    /// Starts node `id` whose initial voters are `voters`.
    pub async fn start_node(&mut self, id: u8, voters: &[u8]) -> Result<()> {
        self.start_node_with(id, voters, |c| c).await
    }

    pub async fn start_node_with(
        &mut self,
        id: u8,
        voters: &[u8],
        tune: impl FnOnce(NodeConfig) -> NodeConfig,
    ) -> Result<()> {
        if self.nodes.contains_key(&id) {
            bail!("node(id={id}) is running");
        }
        self.reserve(id)?;
        let voters: Vec<NodeAddress> = voters.iter().map(|&x| self.address(x)).collect();
        let config = test_config(self.address(id), self.data_dir(id)).voters(voters);
        let config = tune(config);

        let slot = self.slots.get_mut(&id).unwrap();
        let listener = match slot.listener.take() {
            Some(listener) => listener,
            None => rebind(slot.port).await?,
        };
        let node = Node::new(id, listener, config).await?;
        self.nodes.insert(id, node);
        Ok(())
    }

    /// Stops node `id`. The port and the data directory are kept for a restart.
    pub fn stop_node(&mut self, id: u8) {
        if let Some(_node) = self.nodes.remove(&id) {
            // node is dropped
        }
    }

    pub fn is_running(&self, id: u8) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn running(&self) -> Vec<u8> {
        let mut out: Vec<u8> = self.nodes.keys().copied().collect();
        out.sort();
        out
    }

    /// A client that knows every reserved server.
    pub fn client(&self) -> JournalClient {
        let mut ids: Vec<u8> = self.slots.keys().copied().collect();
        ids.sort();
        self.client_to(&ids)
    }

    pub fn client_to(&self, ids: &[u8]) -> JournalClient {
        let servers = ids.iter().map(|&x| self.address(x)).collect();
        let options = TransportOptions {
            rpc_timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_millis(200),
            ..TransportOptions::default()
        };
        JournalClient::new(servers, options)
    }
}

/// The port of a stopped node may linger for a moment.
async fn rebind(port: u16) -> Result<std::net::TcpListener> {
    for _ in 0..50 {
        match std::net::TcpListener::bind(("127.0.0.1", port)) {
            Ok(x) => return Ok(x),
            Err(_) => tokio::time::sleep(Duration::from_millis(100)).await,
        }
    }
    bail!("failed to rebind port {port}");
}
