//! ```text
//! {data_dir}/
//!   meta/ballot.redb
//!   log/head
//!   log/segments/{first_index}.log + .idx
//!   snapshots/{index}-{term}/data + meta
//!   config/cluster
//! ```

use super::*;

use crate::config::FsyncPolicy;
use crate::error::StorageResultExt;
use crate::process::{Ballot, Clock, ClusterConfiguration, Entry, LogIndex, Term};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

mod ballot;
pub use ballot::BallotStore;
pub mod log;
pub use log::{Log, LogOptions};
mod snapshot;
pub use snapshot::{SnapshotMeta, SnapshotReceiver, SnapshotStore};
mod membership;
pub use membership::{MembershipRecord, MembershipStore};

/// Writes `bin` to `path` through a temporary file and a rename.
fn write_atomically(path: &Path, bin: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    {
        let mut f = std::fs::File::create(&tmp).storage()?;
        std::io::Write::write_all(&mut f, bin).storage()?;
        f.sync_all().storage()?;
    }
    std::fs::rename(&tmp, path).storage()?;
    Ok(())
}

/// All the durable state of a server.
pub struct RaftStorage {
    pub ballot: BallotStore,
    pub log: Log,
    pub snapshots: Arc<SnapshotStore>,
    pub membership: MembershipStore,
}

impl RaftStorage {
    pub fn open(dir: &Path, options: LogOptions) -> Result<Self> {
        for sub in ["meta", "log", "snapshots", "config"] {
            std::fs::create_dir_all(dir.join(sub)).storage()?;
        }
        let ballot = BallotStore::open(&dir.join("meta").join("ballot.redb"))?;
        let log = Log::open(&dir.join("log"), options)?;
        let snapshots = SnapshotStore::open(&dir.join("snapshots"))?;
        let membership = MembershipStore::new(&dir.join("config"));
        Ok(Self {
            ballot,
            log,
            snapshots: Arc::new(snapshots),
            membership,
        })
    }
}
