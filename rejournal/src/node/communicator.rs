use super::*;

use crate::message::{
    AppendEntries, AppendEntriesResponse, CommandType, InstallSnapshot, InstallSnapshotResponse,
    RequestVote, RequestVoteResponse,
};

/// Raft RPCs to one peer.
pub struct Communicator {
    pool: ConnectionPool,
    peer: NodeAddress,
}

impl Communicator {
    pub fn new(pool: ConnectionPool, peer: NodeAddress) -> Self {
        Self { pool, peer }
    }

    pub async fn request_vote(&self, req: RequestVote) -> Result<RequestVoteResponse, Error> {
        self.pool
            .call(&self.peer, CommandType::RequestVote, &req)
            .await
    }

    pub async fn append_entries(&self, req: AppendEntries) -> Result<AppendEntriesResponse, Error> {
        self.pool
            .call(&self.peer, CommandType::AppendEntries, &req)
            .await
    }

    pub async fn install_snapshot(
        &self,
        req: InstallSnapshot,
    ) -> Result<InstallSnapshotResponse, Error> {
        self.pool
            .call(&self.peer, CommandType::InstallSnapshot, &req)
            .await
    }
}
