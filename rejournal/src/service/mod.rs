use crate::codec::{Decode, Encode};
use crate::dispatcher::{Dispatcher, HandlerResult};
use crate::message::*;
use crate::process::RaftProcess;
use bytes::Bytes;
use std::sync::Arc;

fn reply(x: impl Encode) -> HandlerResult {
    Ok(Some(x.to_bytes()))
}

async fn update_cluster_state(process: Arc<RaftProcess>, payload: Bytes) -> HandlerResult {
    let req = UpdateClusterState::from_bytes(payload)?;
    let (index, result) = process
        .process_write(req.client_id, req.sequence, &req.command)
        .await?;
    reply(UpdateClusterStateResponse { index, result })
}

async fn query_cluster_state(process: Arc<RaftProcess>, payload: Bytes) -> HandlerResult {
    let req = QueryClusterState::from_bytes(payload)?;
    let (index, result) = process.process_read(req.consistency, req.query).await?;
    reply(QueryResponse { index, result })
}

async fn query_server_state(process: Arc<RaftProcess>, payload: Bytes) -> HandlerResult {
    let req = QueryServerState::from_bytes(payload)?;
    let (index, result) = process.process_local_read(req.query).await?;
    reply(QueryResponse { index, result })
}

async fn last_applied(process: Arc<RaftProcess>, payload: Bytes) -> HandlerResult {
    <()>::from_bytes(payload)?;
    reply(LastAppliedResponse {
        last_applied: process.last_applied(),
    })
}

async fn get_servers(process: Arc<RaftProcess>, payload: Bytes) -> HandlerResult {
    <()>::from_bytes(payload)?;
    reply(process.get_servers())
}

async fn get_server_status(process: Arc<RaftProcess>, payload: Bytes) -> HandlerResult {
    <()>::from_bytes(payload)?;
    reply(process.status().await)
}

async fn update_voters(process: Arc<RaftProcess>, payload: Bytes) -> HandlerResult {
    let req = UpdateVoters::from_bytes(payload)?;
    process.update_voters(req.old_voters, req.new_voters).await?;
    reply(())
}

async fn add_pull_watch(process: Arc<RaftProcess>, payload: Bytes) -> HandlerResult {
    <()>::from_bytes(payload)?;
    reply(process.add_pull_watch())
}

async fn remove_pull_watch(process: Arc<RaftProcess>, payload: Bytes) -> HandlerResult {
    let req = RemovePullWatch::from_bytes(payload)?;
    process.remove_pull_watch(&req.subscriber_id)?;
    reply(())
}

async fn pull_events(process: Arc<RaftProcess>, payload: Bytes) -> HandlerResult {
    let req = PullEvents::from_bytes(payload)?;
    reply(process.pull_events(req).await?)
}

async fn request_vote(process: Arc<RaftProcess>, payload: Bytes) -> HandlerResult {
    let req = RequestVote::from_bytes(payload)?;
    reply(process.request_vote(req).await?)
}

async fn append_entries(process: Arc<RaftProcess>, payload: Bytes) -> HandlerResult {
    let req = AppendEntries::from_bytes(payload)?;
    reply(process.append_entries(req).await?)
}

async fn install_snapshot(process: Arc<RaftProcess>, payload: Bytes) -> HandlerResult {
    let req = InstallSnapshot::from_bytes(payload)?;
    reply(process.install_snapshot(req).await?)
}

/// Binds every command type to the process.
pub fn new(process: Arc<RaftProcess>) -> Dispatcher {
    let mut d = Dispatcher::new();
    macro_rules! bind {
        ($t:expr, $f:ident) => {{
            let process = process.clone();
            d.register($t, move |payload| $f(process.clone(), payload));
        }};
    }
    bind!(CommandType::UpdateClusterState, update_cluster_state);
    bind!(CommandType::QueryClusterState, query_cluster_state);
    bind!(CommandType::QueryServerState, query_server_state);
    bind!(CommandType::LastApplied, last_applied);
    bind!(CommandType::GetServers, get_servers);
    bind!(CommandType::GetServerStatus, get_server_status);
    bind!(CommandType::UpdateVoters, update_voters);
    bind!(CommandType::AddPullWatch, add_pull_watch);
    bind!(CommandType::RemovePullWatch, remove_pull_watch);
    bind!(CommandType::PullEvents, pull_events);
    bind!(CommandType::RequestVote, request_vote);
    bind!(CommandType::AppendEntries, append_entries);
    bind!(CommandType::InstallSnapshot, install_snapshot);
    d
}
