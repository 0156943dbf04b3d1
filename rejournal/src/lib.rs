#![deny(unused_must_use)]

//! A replicated journal.
//!
//! Every node runs a Raft process that replicates opaque commands into
//! a segment-file log and applies the committed ones to a user-supplied
//! [`StateMachine`]. Nodes and clients talk over a framed binary protocol
//! on TCP.

mod error;
pub use error::{Error, Status};

/// Big-endian encodings shared by every wire payload.
pub mod codec;

/// Node configuration.
pub mod config;

/// Request/response payloads of every command.
pub mod message;

/// Framed TCP transport: frames, multiplexed connections and the accept loop.
pub mod transport;

/// Routing of inbound frames to handlers.
pub mod dispatcher;

/// Durable state: ballot, log segments, snapshots and the membership pointer.
pub mod storage;

/// Implementation of `RaftProcess`.
pub mod process;

/// Handlers bound to the dispatcher.
pub mod service;

/// Implementation of a Raft node.
pub mod node;

/// Typed client of the journal service.
pub mod client;

pub use client::JournalClient;
pub use config::{BackPressure, FsyncPolicy, NodeConfig, RolePreference};
pub use node::RaftNode;
pub use process::{
    watch::EventSink, Entry, LogIndex, RaftProcess, SnapshotStream, StateMachine, Term,
};

use anyhow::{bail, ensure, Context, Result};
use bytes::Bytes;
use derive_more::{Display, FromStr};
use http::Uri;
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// Identifier of a journal server. `http://host:port`.
#[derive(
    serde::Serialize, serde::Deserialize, Clone, PartialEq, Eq, Hash, Debug, Display, FromStr,
)]
pub struct NodeAddress(#[serde(with = "http_serde::uri")] Uri);

impl NodeAddress {
    pub fn new(uri: Uri) -> Self {
        Self(uri)
    }

    pub fn uri(&self) -> &Uri {
        &self.0
    }

    /// `host:port` to dial.
    pub fn authority(&self) -> Result<String> {
        let host = self.0.host().context(Error::Protocol(format!(
            "address {} has no host",
            self.0
        )))?;
        let port = self.0.port_u16().unwrap_or(80);
        Ok(format!("{host}:{port}"))
    }
}

impl PartialOrd for NodeAddress {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NodeAddress {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.to_string().cmp(&other.0.to_string())
    }
}
