use super::*;

use crate::process::{Sessions, SnapshotStream};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

const READ_CHUNK: usize = 64 << 10;

/// Everything but the state machine image.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub index: LogIndex,
    pub term: Term,
    /// Membership as of `index`.
    pub configuration: ClusterConfiguration,
    /// Client sessions as of `index`.
    pub sessions: Sessions,
}

impl SnapshotMeta {
    pub fn clock(&self) -> Clock {
        Clock {
            term: self.term,
            index: self.index,
        }
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        let bin = bincode::serialize(self)?;
        Ok(bin.into())
    }

    pub fn from_bytes(bin: &[u8]) -> Result<Self> {
        let out = bincode::deserialize(bin).storage()?;
        Ok(out)
    }
}

fn dir_name(clock: Clock) -> String {
    format!("{}-{}", clock.index, clock.term)
}

fn parse_dir_name(name: &str) -> Option<Clock> {
    let (index, term) = name.split_once('-')?;
    Some(Clock {
        index: index.parse().ok()?,
        term: term.parse().ok()?,
    })
}

/// Snapshots under `snapshots/{index}-{term}/`.
///
/// A snapshot is written into a temporary directory and renamed into place,
/// so a directory with a final name is always complete. Only the latest one
/// is kept.
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).storage()?;
        for dent in std::fs::read_dir(dir).storage()? {
            let dent = dent.storage()?;
            let name = dent.file_name();
            if name.to_string_lossy().contains(".tmp") {
                warn!("removing incomplete snapshot {}", dent.path().display());
                std::fs::remove_dir_all(dent.path()).storage()?;
            }
        }
        Ok(Self {
            dir: dir.to_owned(),
        })
    }

    fn path(&self, clock: Clock) -> PathBuf {
        self.dir.join(dir_name(clock))
    }

    fn list(&self) -> Result<Vec<Clock>> {
        let mut out = vec![];
        for dent in std::fs::read_dir(&self.dir).storage()? {
            let dent = dent.storage()?;
            let name = dent.file_name();
            if let Some(clock) = name.to_str().and_then(parse_dir_name) {
                out.push(clock);
            }
        }
        out.sort_unstable_by_key(|c| c.index);
        Ok(out)
    }

    pub fn latest(&self) -> Result<Option<SnapshotMeta>> {
        let Some(clock) = self.list()?.pop() else {
            return Ok(None);
        };
        let bin = std::fs::read(self.path(clock).join("meta")).storage()?;
        let meta = SnapshotMeta::from_bytes(&bin)?;
        ensure!(meta.clock() == clock, "snapshot meta disagrees with {clock:?}");
        Ok(Some(meta))
    }

    /// Saves a snapshot and deletes the older ones.
    pub async fn save(&self, meta: &SnapshotMeta, mut st: SnapshotStream) -> Result<()> {
        let mut receiver = self.receiver(meta.clone()).await?;
        while let Some(chunk) = st.next().await {
            let chunk = chunk?;
            let offset = receiver.offset;
            receiver.write(offset, &chunk).await?;
        }
        receiver.finish(self).await?;
        Ok(())
    }

    /// Starts receiving a snapshot chunk by chunk.
    pub async fn receiver(&self, meta: SnapshotMeta) -> Result<SnapshotReceiver> {
        let tmp = self
            .dir
            .join(format!("{}.tmp-{}", dir_name(meta.clock()), uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&tmp).await.storage()?;
        let file = tokio::fs::File::create(tmp.join("data")).await.storage()?;
        Ok(SnapshotReceiver {
            meta,
            tmp,
            file,
            offset: 0,
            finished: false,
        })
    }

    pub async fn open_data(&self, clock: Clock) -> Result<SnapshotStream> {
        let mut f = tokio::fs::File::open(self.path(clock).join("data"))
            .await
            .storage()?;
        let st = async_stream::stream! {
            loop {
                let mut buf = vec![0u8; READ_CHUNK];
                match f.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        buf.truncate(n);
                        yield Ok(Bytes::from(buf));
                    }
                    Err(e) => {
                        yield Err(anyhow::Error::new(Error::storage(e)));
                        break;
                    }
                }
            }
        };
        Ok(Box::pin(st))
    }

    /// Reads up to `len` bytes of the image at `offset`. The flag is true if the chunk ends the image.
    pub async fn read_chunk(&self, clock: Clock, offset: u64, len: usize) -> Result<(Bytes, bool)> {
        let path = self.path(clock).join("data");
        let mut f = tokio::fs::File::open(&path).await.storage()?;
        let total = f.metadata().await.storage()?.len();
        ensure!(offset <= total, "offset {offset} is past the snapshot size {total}");
        f.seek(std::io::SeekFrom::Start(offset)).await.storage()?;

        let n = std::cmp::min(len as u64, total - offset) as usize;
        let mut buf = vec![0u8; n];
        f.read_exact(&mut buf).await.storage()?;
        let done = offset + n as u64 == total;
        Ok((Bytes::from(buf), done))
    }

    /// Deletes every snapshot older than `index`.
    pub fn delete_before(&self, index: LogIndex) -> Result<()> {
        for clock in self.list()? {
            if clock.index < index {
                debug!("delete snapshot {clock:?}");
                std::fs::remove_dir_all(self.path(clock)).storage()?;
            }
        }
        Ok(())
    }
}

/// A snapshot being written.
pub struct SnapshotReceiver {
    meta: SnapshotMeta,
    tmp: PathBuf,
    file: tokio::fs::File,
    offset: u64,
    finished: bool,
}

impl SnapshotReceiver {
    pub fn meta(&self) -> &SnapshotMeta {
        &self.meta
    }

    /// Bytes received so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Chunks must arrive in order.
    pub async fn write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        ensure!(
            offset == self.offset,
            Error::Protocol(format!(
                "snapshot chunk at {offset} but expected {}",
                self.offset
            ))
        );
        self.file.write_all(data).await.storage()?;
        self.offset += data.len() as u64;
        Ok(())
    }

    pub async fn finish(mut self, store: &SnapshotStore) -> Result<SnapshotMeta> {
        self.file.sync_all().await.storage()?;
        let meta_bin = self.meta.to_bytes()?;
        tokio::fs::write(self.tmp.join("meta"), &meta_bin)
            .await
            .storage()?;
        tokio::fs::File::open(self.tmp.join("meta"))
            .await
            .storage()?
            .sync_all()
            .await
            .storage()?;

        let dest = store.path(self.meta.clock());
        if tokio::fs::try_exists(&dest).await.storage()? {
            // The same snapshot was saved before.
            tokio::fs::remove_dir_all(&self.tmp).await.storage()?;
        } else {
            tokio::fs::rename(&self.tmp, &dest).await.storage()?;
        }
        self.finished = true;

        info!(
            "saved snapshot at {:?} ({} bytes)",
            self.meta.clock(),
            self.offset
        );
        store.delete_before(self.meta.index)?;
        Ok(self.meta.clone())
    }
}

impl Drop for SnapshotReceiver {
    fn drop(&mut self) {
        if !self.finished {
            std::fs::remove_dir_all(&self.tmp).ok();
        }
    }
}
