use crate::codec;
use crate::process::{LogIndex, Term};
use crate::NodeAddress;
use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("request timed out")]
    Timeout,
    #[error("connection closed")]
    ConnectionLost,
    #[error("connection reset by peer")]
    PeerReset,
    #[error("not the leader (leader={leader:?})")]
    NotLeader { leader: Option<NodeAddress> },
    #[error("stale term (current_term={0})")]
    TermStale(Term),
    #[error("log mismatch (hint_term={hint_term}, hint_index={hint_index})")]
    LogMismatch { hint_term: Term, hint_index: LogIndex },
    #[error("send queue is full")]
    Overloaded,
    #[error("unknown command type {0}")]
    UnknownCommand(u32),
    #[error("storage failure: {0}")]
    StorageFailure(String),
    #[error("snapshot required")]
    SnapshotRequired,
    #[error("cancelled")]
    Cancelled,
    #[error("state machine failed: {0}")]
    StateMachine(String),
    #[error("membership change in progress")]
    MembershipChangeInProgress,
    #[error("watch subscription not found")]
    WatchNotFound,
    #[error("refusing to truncate committed entries (from={from}, commit_index={commit_index})")]
    TruncateCommitted {
        from: LogIndex,
        commit_index: LogIndex,
    },
    #[error("entry not found at index {0}")]
    EntryNotFound(LogIndex),
    #[error("node is stopped")]
    NodeStopped,
    #[error("{0}")]
    Internal(String),
}

/// Leading byte of every response payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Ok = 0,
    Protocol = 1,
    Timeout = 2,
    ConnectionLost = 3,
    NotLeader = 4,
    TermStale = 5,
    LogMismatch = 6,
    Overloaded = 7,
    UnknownCommand = 8,
    StorageFailure = 9,
    SnapshotRequired = 10,
    Cancelled = 11,
    StateMachine = 12,
    MembershipChangeInProgress = 13,
    WatchNotFound = 14,
    Internal = 15,
}

impl Status {
    pub fn from_u8(x: u8) -> Option<Self> {
        let out = match x {
            0 => Self::Ok,
            1 => Self::Protocol,
            2 => Self::Timeout,
            3 => Self::ConnectionLost,
            4 => Self::NotLeader,
            5 => Self::TermStale,
            6 => Self::LogMismatch,
            7 => Self::Overloaded,
            8 => Self::UnknownCommand,
            9 => Self::StorageFailure,
            10 => Self::SnapshotRequired,
            11 => Self::Cancelled,
            12 => Self::StateMachine,
            13 => Self::MembershipChangeInProgress,
            14 => Self::WatchNotFound,
            15 => Self::Internal,
            _ => return None,
        };
        Some(out)
    }
}

impl Error {
    pub fn kind(&self) -> Status {
        match self {
            Error::Protocol(_) => Status::Protocol,
            Error::Timeout => Status::Timeout,
            Error::ConnectionLost | Error::PeerReset => Status::ConnectionLost,
            Error::NotLeader { .. } => Status::NotLeader,
            Error::TermStale(_) => Status::TermStale,
            Error::LogMismatch { .. } => Status::LogMismatch,
            Error::Overloaded => Status::Overloaded,
            Error::UnknownCommand(_) => Status::UnknownCommand,
            Error::StorageFailure(_) => Status::StorageFailure,
            Error::SnapshotRequired => Status::SnapshotRequired,
            Error::Cancelled => Status::Cancelled,
            Error::StateMachine(_) => Status::StateMachine,
            Error::MembershipChangeInProgress => Status::MembershipChangeInProgress,
            Error::WatchNotFound => Status::WatchNotFound,
            Error::TruncateCommitted { .. }
            | Error::EntryNotFound(_)
            | Error::NodeStopped
            | Error::Internal(_) => Status::Internal,
        }
    }

    /// Errors worth retrying against the same or another server.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Timeout
                | Error::ConnectionLost
                | Error::PeerReset
                | Error::Overloaded
                | Error::NotLeader { .. }
                | Error::MembershipChangeInProgress
                | Error::NodeStopped
        )
    }

    /// Recovers the typed error from an `anyhow::Error` raised inside the process.
    pub fn from_anyhow(e: anyhow::Error) -> Self {
        match e.downcast::<Error>() {
            Ok(e) => e,
            Err(e) => Error::Internal(format!("{e:#}")),
        }
    }

    pub fn storage(e: impl std::fmt::Display) -> Self {
        Error::StorageFailure(e.to_string())
    }

    /// The text carried after the status byte. Variants that wrap a message
    /// send it bare so that decoding doesn't prefix it twice.
    fn message(&self) -> String {
        match self {
            Error::Protocol(msg)
            | Error::StorageFailure(msg)
            | Error::StateMachine(msg)
            | Error::Internal(msg) => msg.clone(),
            _ => self.to_string(),
        }
    }

    /// Writes the status byte followed by the kind-specific body.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.kind() as u8);
        codec::put_string(buf, &self.message());
        match self {
            Error::NotLeader { leader } => codec::put_uri(buf, leader.as_ref()),
            Error::TermStale(term) => buf.put_u64(*term),
            Error::LogMismatch {
                hint_term,
                hint_index,
            } => {
                buf.put_u64(*hint_term);
                buf.put_u64(*hint_index);
            }
            Error::UnknownCommand(code) => buf.put_u32(*code),
            _ => {}
        }
    }

    /// Inverse of [`Error::encode`] after the status byte has been consumed.
    pub fn decode(status: Status, buf: &mut Bytes) -> Result<Self, Error> {
        let message = codec::get_string(buf)?;
        let e = match status {
            Status::Ok => {
                return Err(Error::Protocol("decoding an error from an OK status".into()))
            }
            Status::Protocol => Error::Protocol(message),
            Status::Timeout => Error::Timeout,
            Status::ConnectionLost => Error::ConnectionLost,
            Status::NotLeader => Error::NotLeader {
                leader: codec::get_uri(buf)?,
            },
            Status::TermStale => Error::TermStale(codec::get_u64(buf)?),
            Status::LogMismatch => Error::LogMismatch {
                hint_term: codec::get_u64(buf)?,
                hint_index: codec::get_u64(buf)?,
            },
            Status::Overloaded => Error::Overloaded,
            Status::UnknownCommand => Error::UnknownCommand(codec::get_u32(buf)?),
            Status::StorageFailure => Error::StorageFailure(message),
            Status::SnapshotRequired => Error::SnapshotRequired,
            Status::Cancelled => Error::Cancelled,
            Status::StateMachine => Error::StateMachine(message),
            Status::MembershipChangeInProgress => Error::MembershipChangeInProgress,
            Status::WatchNotFound => Error::WatchNotFound,
            Status::Internal => Error::Internal(message),
        };
        Ok(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::ConnectionReset | ErrorKind::BrokenPipe => Error::PeerReset,
            ErrorKind::TimedOut => Error::Timeout,
            _ => Error::ConnectionLost,
        }
    }
}

/// Maps I/O failures of durable state to [`Error::StorageFailure`].
pub trait StorageResultExt<T> {
    fn storage(self) -> Result<T, Error>;
}

impl<T, E: std::fmt::Display> StorageResultExt<T> for Result<T, E> {
    fn storage(self) -> Result<T, Error> {
        self.map_err(Error::storage)
    }
}
