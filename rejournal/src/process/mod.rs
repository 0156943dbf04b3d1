use super::*;

use crate::message;
use crate::node::RaftHandle;
use crate::storage::RaftStorage;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::{mpsc, watch as tokio_watch, RwLock};
use tracing::{debug, error, info, warn};

mod thread;
pub use thread::ThreadHandle;
mod command;
use command::Command;
pub mod membership;
pub use membership::ClusterConfiguration;
mod completion;
use completion::*;
mod control;
use control::{Control, ControlMessage, ControlState};
mod app;
use app::{AppHost, AppMessage};
pub mod watch;
use watch::WatchRegistry;
mod raft_process;
pub use raft_process::RaftProcess;

pub(crate) use app::Sessions;

/// Election term.
/// Only one leader can be elected in a term.
pub type Term = u64;

/// Log index. The first entry is at 1.
pub type LogIndex = u64;

/// Position of a log entry.
/// Two entries at the same clock are the same entry.
#[derive(
    Clone, Copy, PartialEq, Eq, Debug, Default, serde::Serialize, serde::Deserialize,
)]
pub struct Clock {
    pub term: Term,
    pub index: LogIndex,
}

/// Log entry. The payload is an encoded `Command`.
#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
    pub index: LogIndex,
    pub term: Term,
    pub payload: Bytes,
}

impl Entry {
    pub fn clock(&self) -> Clock {
        Clock {
            term: self.term,
            index: self.index,
        }
    }
}

/// Ballot in election.
#[derive(Clone, Debug, PartialEq)]
pub struct Ballot {
    pub cur_term: Term,
    pub voted_for: Option<NodeAddress>,
}

impl Ballot {
    pub fn new() -> Self {
        Self {
            cur_term: 0,
            voted_for: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Follower = 0,
    Candidate = 1,
    Leader = 2,
    /// Replicates but neither votes nor campaigns.
    Observer = 3,
}

/// Snapshot is transferred as a stream of bytes.
pub type SnapshotStream =
    std::pin::Pin<Box<dyn futures::stream::Stream<Item = anyhow::Result<Bytes>> + Send>>;

pub type Actor<T> = Arc<RwLock<T>>;

/// The replicated state machine driven by a `RaftProcess`.
#[async_trait::async_trait]
pub trait StateMachine: Sync + Send + 'static {
    /// Apply a committed command.
    /// This must be deterministic: every server applies the same commands in the same order.
    async fn apply(&self, index: LogIndex, command: &[u8], events: &EventSink) -> Result<Bytes>;

    /// Answer a query. This must not change the state.
    async fn read(&self, query: &[u8]) -> Result<Bytes>;

    /// Serialize the current state.
    /// The stream must reflect the state after the last `apply` call.
    async fn snapshot(&self) -> Result<SnapshotStream>;

    /// Replace the whole state with the one in the stream.
    async fn restore(&self, snapshot: SnapshotStream) -> Result<()>;
}

pub use watch::EventSink;
