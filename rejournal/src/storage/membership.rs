use super::*;

use std::collections::BTreeMap;

/// What `config/cluster` holds.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MembershipRecord {
    /// The latest configuration this server adopted.
    pub latest: ClusterConfiguration,
    /// Configuration entries in the log after its compaction anchor.
    pub entries: BTreeMap<LogIndex, ClusterConfiguration>,
    /// `entries` lists every configuration entry up to this position.
    pub covered: Clock,
}

/// `config/cluster`: the latest configuration and where the configuration
/// entries are in the log.
pub struct MembershipStore {
    path: PathBuf,
}

impl MembershipStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join("cluster"),
        }
    }

    pub fn save(&self, record: &MembershipRecord) -> Result<()> {
        let bin = bincode::serialize(record)?;
        write_atomically(&self.path, &bin)
    }

    pub fn load(&self) -> Result<Option<MembershipRecord>> {
        match std::fs::read(&self.path) {
            Ok(bin) => {
                let record = bincode::deserialize(&bin).storage()?;
                Ok(Some(record))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => bail!(Error::storage(e)),
        }
    }
}
