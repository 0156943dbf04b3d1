use super::*;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a log entry carries.
#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub enum Command<'a> {
    /// Appended by a new leader. Entries of earlier terms commit together with it
    /// and reads are not served before it is applied.
    Barrier(Term),
    /// Takes effect as soon as it is appended.
    ClusterConfiguration(ClusterConfiguration),
    Execute {
        #[serde(with = "serde_bytes")]
        message: &'a [u8],
        client_id: Option<Uuid>,
        sequence: u64,
    },
}

impl<'a> Command<'a> {
    pub fn serialize(&self) -> Result<Bytes> {
        let bin = bincode::serialize(self)?;
        Ok(bin.into())
    }

    pub fn deserialize(x: &'a [u8]) -> Result<Command<'a>> {
        let out = bincode::deserialize(x).context(Error::StorageFailure(
            "undecodable log entry".to_owned(),
        ))?;
        Ok(out)
    }
}
