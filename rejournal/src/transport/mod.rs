use crate::codec::{Decode, Encode};
use crate::config::{BackPressure, NodeConfig};
use crate::message::{self, CommandType};
use crate::{Error, NodeAddress};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

mod frame;
pub use frame::{Frame, FrameCodec, FLAG_ONEWAY, HEADER_LEN, MAGIC, VERSION};
mod connection;
pub use connection::Connection;
mod pool;
pub use pool::ConnectionPool;
mod server;
pub use server::serve;

#[derive(Clone, Debug)]
pub struct TransportOptions {
    pub connect_timeout: Duration,
    pub rpc_timeout: Duration,
    pub idle_timeout: Duration,
    pub send_queue_capacity: usize,
    pub back_pressure: BackPressure,
    pub max_frame_size: usize,
    /// Requests of one inbound connection handled at the same time.
    pub max_in_flight: usize,
}

impl TransportOptions {
    pub fn from_config(config: &NodeConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            rpc_timeout: config.rpc_timeout,
            idle_timeout: config.connection_idle_timeout,
            send_queue_capacity: config.send_queue_capacity,
            back_pressure: config.back_pressure,
            max_frame_size: config.max_frame_size,
            max_in_flight: config.max_in_flight_requests,
        }
    }
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self::from_config(&NodeConfig::default())
    }
}

/// Sends a typed request and decodes the typed response.
pub async fn call<Req: Encode, Resp: Decode>(
    conn: &Connection,
    command_type: CommandType,
    req: &Req,
    timeout: Duration,
) -> Result<Resp, Error> {
    let frame = Frame::request(command_type, req.to_bytes());
    let resp = conn.send(frame, timeout).await?;
    if resp.command_type != command_type.response_code() {
        return Err(Error::Protocol(format!(
            "response type {} does not answer {command_type:?}",
            resp.command_type
        )));
    }
    let body = message::decode_response(resp.payload)?;
    Resp::from_bytes(body)
}
