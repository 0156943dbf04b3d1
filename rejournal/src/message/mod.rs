use crate::codec::{self, Decode, Encode};
use crate::process::{Entry, LogIndex, Role, Term};
use crate::{Error, NodeAddress};
use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;

mod client;
pub use client::*;
mod raft;
pub use raft::*;
mod watch;
pub use watch::*;

/// Command type codes. The response to a request carries `code + 1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CommandType {
    UpdateClusterState = 1,
    QueryClusterState = 3,
    QueryServerState = 5,
    LastApplied = 7,
    GetServers = 9,
    AddPullWatch = 11,
    RemovePullWatch = 13,
    PullEvents = 15,
    RequestVote = 17,
    AppendEntries = 19,
    InstallSnapshot = 21,
    UpdateVoters = 23,
    GetServerStatus = 25,
}

impl CommandType {
    pub const ALL: [CommandType; 13] = [
        Self::UpdateClusterState,
        Self::QueryClusterState,
        Self::QueryServerState,
        Self::LastApplied,
        Self::GetServers,
        Self::AddPullWatch,
        Self::RemovePullWatch,
        Self::PullEvents,
        Self::RequestVote,
        Self::AppendEntries,
        Self::InstallSnapshot,
        Self::UpdateVoters,
        Self::GetServerStatus,
    ];

    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn response_code(self) -> u32 {
        self as u32 + 1
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|x| x.code() == code)
    }
}

/// The response code paired with any request code, known or not.
pub fn response_code(request_code: u32) -> u32 {
    request_code.wrapping_add(1)
}

/// Wraps a handler result into a response payload: status byte, then body.
pub fn encode_response(result: &Result<Bytes, Error>) -> Bytes {
    let mut buf = BytesMut::new();
    match result {
        Ok(body) => {
            buf.put_u8(crate::Status::Ok as u8);
            buf.put_slice(body);
        }
        Err(e) => e.encode(&mut buf),
    }
    buf.freeze()
}

/// Splits a response payload into the body or the remote error.
pub fn decode_response(mut payload: Bytes) -> Result<Bytes, Error> {
    let status = codec::get_u8(&mut payload)?;
    let status = crate::Status::from_u8(status)
        .ok_or_else(|| Error::Protocol(format!("unknown status {status}")))?;
    if status == crate::Status::Ok {
        return Ok(payload);
    }
    Err(Error::decode(status, &mut payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_codes() {
        for t in CommandType::ALL {
            assert_eq!(t.code() % 2, 1);
            assert_eq!(CommandType::from_code(t.code()), Some(t));
            assert_eq!(CommandType::from_code(t.response_code()), None);
        }
        assert_eq!(CommandType::from_code(99), None);
        assert_eq!(response_code(99), 100);
    }

    #[test]
    fn test_response_envelope() {
        let ok = encode_response(&Ok(Bytes::from_static(b"body")));
        assert_eq!(decode_response(ok).unwrap(), Bytes::from_static(b"body"));

        let err = encode_response(&Err(Error::Overloaded));
        assert_eq!(decode_response(err), Err(Error::Overloaded));

        assert!(matches!(
            decode_response(Bytes::from_static(&[200])),
            Err(Error::Protocol(_))
        ));
    }
}
