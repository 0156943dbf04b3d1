use super::*;

use redb::{Database, ReadableTableMetadata, TableDefinition};

mod value {
    use super::*;

    #[derive(serde::Deserialize, serde::Serialize)]
    struct OnDiskStruct {
        term: u64,
        voted_for: Option<NodeAddress>,
    }

    pub fn ser(x: Ballot) -> Result<Vec<u8>> {
        let x = OnDiskStruct {
            term: x.cur_term,
            voted_for: x.voted_for,
        };
        let bin = bincode::serialize(&x)?;
        Ok(bin)
    }

    pub fn desr(bin: &[u8]) -> Result<Ballot> {
        let x: OnDiskStruct = bincode::deserialize(bin)?;
        Ok(Ballot {
            cur_term: x.term,
            voted_for: x.voted_for,
        })
    }
}

const TABLE: TableDefinition<(), Vec<u8>> = TableDefinition::new("ballot");

/// `(current_term, voted_for)` in `meta/ballot.redb`.
/// Every save is a committed redb transaction, so it is durable on return.
pub struct BallotStore {
    db: Database,
}

impl BallotStore {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).storage()?;
        Self::init(db)
    }

    #[cfg(test)]
    pub fn memory() -> Result<Self> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .storage()?;
        Self::init(db)
    }

    fn init(db: Database) -> Result<Self> {
        // Insert the initial value if not exists.
        let tx = db.begin_write().storage()?;
        {
            let mut tbl = tx.open_table(TABLE).storage()?;
            if tbl.is_empty().storage()? {
                tbl.insert((), value::ser(Ballot::new())?).storage()?;
            }
        }
        tx.commit().storage()?;
        Ok(Self { db })
    }

    pub async fn save_ballot(&self, ballot: Ballot) -> Result<()> {
        let bin = value::ser(ballot)?;
        let tx = self.db.begin_write().storage()?;
        {
            let mut tbl = tx.open_table(TABLE).storage()?;
            tbl.insert((), bin).storage()?;
        }
        tx.commit().storage()?;
        Ok(())
    }

    pub async fn load_ballot(&self) -> Result<Ballot> {
        let tx = self.db.begin_read().storage()?;
        let tbl = tx.open_table(TABLE).storage()?;
        match tbl.get(()).storage()? {
            Some(bin) => value::desr(&bin.value()),
            None => bail!(Error::StorageFailure("no ballot".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ballot_survives_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("ballot.redb");
        let candidate: NodeAddress = "http://n2:7000".parse()?;

        {
            let store = BallotStore::open(&path)?;
            assert_eq!(store.load_ballot().await?, Ballot::new());
            store
                .save_ballot(Ballot {
                    cur_term: 5,
                    voted_for: Some(candidate.clone()),
                })
                .await?;
        }

        let store = BallotStore::open(&path)?;
        let ballot = store.load_ballot().await?;
        assert_eq!(ballot.cur_term, 5);
        assert_eq!(ballot.voted_for, Some(candidate));
        Ok(())
    }
}
