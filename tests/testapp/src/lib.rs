use anyhow::Result;
use bytes::Bytes;
use rejournal::message::ReadConsistency;
use rejournal::{JournalClient, LogIndex, NodeAddress};

pub mod counter;
pub use counter::CounterApp;

#[derive(serde::Serialize, serde::Deserialize, Debug)]
pub enum AppWriteRequest {
    /// Adds `n` and returns the value before the addition.
    FetchAdd { n: u64 },
    /// Always rejected by the state machine.
    Fail,
}
impl AppWriteRequest {
    pub fn serialize(self) -> Bytes {
        bincode::serialize(&self).unwrap().into()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[derive(serde::Serialize, serde::Deserialize, Debug)]
pub enum AppReadRequest {
    Read,
}
impl AppReadRequest {
    pub fn serialize(self) -> Bytes {
        bincode::serialize(&self).unwrap().into()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[derive(serde::Serialize, serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct AppState {
    pub counter: u64,
    /// Number of `FetchAdd` applied so far.
    pub n_applied: u64,
}
impl AppState {
    pub fn serialize(&self) -> Bytes {
        bincode::serialize(&self).unwrap().into()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Published for every applied `FetchAdd`.
#[derive(serde::Serialize, serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct AppEvent {
    pub index: LogIndex,
    pub old: u64,
    pub new: u64,
}
impl AppEvent {
    pub fn serialize(&self) -> Bytes {
        bincode::serialize(&self).unwrap().into()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

pub struct Client {
    cli: JournalClient,
}
impl Client {
    pub fn new(cli: JournalClient) -> Self {
        Self { cli }
    }

    pub fn inner(&self) -> &JournalClient {
        &self.cli
    }

    pub async fn fetch_add(&self, n: u64) -> Result<u64> {
        let (_, old) = self.fetch_add_at(n).await?;
        Ok(old)
    }

    /// Like `fetch_add` but also returns the index the addition was applied at.
    pub async fn fetch_add_at(&self, n: u64) -> Result<(LogIndex, u64)> {
        let (index, resp) = self
            .cli
            .update(AppWriteRequest::FetchAdd { n }.serialize())
            .await?;
        let old: u64 = bincode::deserialize(&resp)?;
        Ok((index, old))
    }

    pub async fn read(&self) -> Result<AppState> {
        let (_, resp) = self
            .cli
            .query(ReadConsistency::ReadIndex, AppReadRequest::Read.serialize())
            .await?;
        AppState::deserialize(&resp)
    }

    pub async fn read_lease(&self) -> Result<AppState> {
        let (_, resp) = self
            .cli
            .query(ReadConsistency::Lease, AppReadRequest::Read.serialize())
            .await?;
        AppState::deserialize(&resp)
    }

    /// Reads the state machine of `server` without asking the leader.
    pub async fn read_local(&self, server: &NodeAddress) -> Result<(LogIndex, AppState)> {
        let (index, resp) = self
            .cli
            .query_local(server, AppReadRequest::Read.serialize())
            .await?;
        Ok((index, AppState::deserialize(&resp)?))
    }
}
