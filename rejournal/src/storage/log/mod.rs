//! The replicated log as a sequence of segment files.
//!
//! ```text
//! log/
//!   head                          first retained position after compaction
//!   segments/
//!     00000000000000000001.log    index | term | length | payload | crc32
//!     00000000000000000001.idx    u64 byte offset per record
//!     00000000000000004097.log
//!     ...
//! ```

use super::*;

use parking_lot::Mutex;

mod fsync;
use fsync::Flusher;
mod segment;
use segment::Segment;

#[derive(Clone, Debug)]
pub struct LogOptions {
    pub segment_size: u64,
    pub fsync: FsyncPolicy,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            segment_size: 64 << 20,
            fsync: FsyncPolicy::PerAppend,
        }
    }
}

pub struct Log {
    dir: PathBuf,
    segments: Vec<Segment>,
    /// The position just before the first retained entry.
    prev: Clock,
    last_index: LogIndex,
    commit_index: LogIndex,
    options: LogOptions,
    flusher: Option<Flusher>,
    poisoned: Option<String>,
}

fn read_head(path: &Path) -> Result<Option<Clock>> {
    match std::fs::read(path) {
        Ok(bin) => {
            let clock = bincode::deserialize(&bin).storage()?;
            Ok(Some(clock))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => bail!(Error::storage(e)),
    }
}

impl Log {
    /// Opens the log under `dir`, recovering the tail segment.
    pub fn open(dir: &Path, options: LogOptions) -> Result<Self> {
        let seg_dir = dir.join("segments");
        std::fs::create_dir_all(&seg_dir).storage()?;
        let prev = read_head(&dir.join("head"))?.unwrap_or(Clock { term: 0, index: 0 });

        let mut firsts = vec![];
        for dent in std::fs::read_dir(&seg_dir).storage()? {
            let dent = dent.storage()?;
            let name = dent.file_name();
            if let Some(first) = name.to_str().and_then(segment::parse_log_file_name) {
                firsts.push(first);
            }
        }
        firsts.sort_unstable();

        let mut segments: Vec<Segment> = vec![];
        let n = firsts.len();
        let mut iter = firsts.into_iter().enumerate();
        while let Some((i, first)) = iter.next() {
            let seg = Segment::open(&seg_dir, first, i + 1 == n)?;

            // Compacted away before a crash.
            if seg.last_index().is_some_and(|last| last <= prev.index) {
                seg.remove()?;
                continue;
            }

            let expected = match segments.last() {
                Some(last) => last.next_index(),
                None => prev.index + 1,
            };
            let contiguous = if segments.is_empty() {
                seg.first_index <= expected
            } else {
                seg.first_index == expected
            };
            if !contiguous || (segments.is_empty() && seg.next_index() <= expected) {
                warn!(
                    "segment at {} leaves a gap (expected {expected}). dropping the rest",
                    seg.first_index
                );
                seg.remove()?;
                for (_, first) in iter.by_ref() {
                    Segment::open(&seg_dir, first, true)?.remove()?;
                }
                break;
            }
            segments.push(seg);
        }

        let last_index = segments
            .last()
            .and_then(|s| s.last_index())
            .unwrap_or(prev.index)
            .max(prev.index);

        let flusher = match options.fsync {
            FsyncPolicy::OsOnly => None,
            policy => Some(Flusher::spawn(policy)),
        };

        info!(
            "opened log at {} (first={}, last={last_index}, segments={})",
            dir.display(),
            prev.index + 1,
            segments.len()
        );

        Ok(Self {
            dir: dir.to_owned(),
            segments,
            prev,
            last_index,
            commit_index: prev.index,
            options,
            flusher,
            poisoned: None,
        })
    }

    fn seg_dir(&self) -> PathBuf {
        self.dir.join("segments")
    }

    fn check_poisoned(&self) -> Result<()> {
        if let Some(cause) = &self.poisoned {
            bail!(Error::StorageFailure(format!("log is poisoned: {cause}")));
        }
        if self.flusher.as_ref().is_some_and(|f| f.failed()) {
            bail!(Error::StorageFailure("background fsync failed".into()));
        }
        Ok(())
    }

    fn poison(&mut self, e: &anyhow::Error) {
        error!("log poisoned: {e:#}");
        self.poisoned = Some(format!("{e:#}"));
    }

    pub fn first_index(&self) -> LogIndex {
        self.prev.index + 1
    }

    pub fn last_index(&self) -> LogIndex {
        self.last_index
    }

    /// The position the log starts after. `(0, 0)` for a log never compacted.
    pub fn prev_clock(&self) -> Clock {
        self.prev
    }

    pub fn last_clock(&self) -> Clock {
        Clock {
            index: self.last_index,
            term: self.last_term(),
        }
    }

    pub fn last_term(&self) -> Term {
        self.term_at(self.last_index).unwrap_or(self.prev.term)
    }

    pub fn commit_index(&self) -> LogIndex {
        self.commit_index
    }

    /// Never moves backwards.
    pub fn set_commit_index(&mut self, index: LogIndex) {
        self.commit_index = self.commit_index.max(index);
    }

    fn find_segment(&self, index: LogIndex) -> Option<&Segment> {
        let i = self.segments.partition_point(|s| s.first_index <= index);
        if i == 0 {
            return None;
        }
        self.segments.get(i - 1)
    }

    /// Term of the entry at `index`, including the compaction anchor.
    pub fn term_at(&self, index: LogIndex) -> Option<Term> {
        if index == self.prev.index {
            return Some(self.prev.term);
        }
        if index < self.prev.index || index > self.last_index {
            return None;
        }
        self.find_segment(index)?.term(index)
    }

    pub fn entry(&self, index: LogIndex) -> Result<Entry> {
        if index <= self.prev.index {
            bail!(Error::SnapshotRequired);
        }
        if index > self.last_index {
            bail!(Error::EntryNotFound(index));
        }
        let Some(seg) = self.find_segment(index) else {
            bail!(Error::EntryNotFound(index));
        };
        seg.read(index)
    }

    /// Entries from `from` until the payloads add up to `max_bytes`.
    /// At least one entry is returned if `from` exists.
    pub fn entries(&self, from: LogIndex, max_bytes: usize) -> Result<Vec<Entry>> {
        let mut out = vec![];
        let mut bytes = 0;
        for index in from..=self.last_index {
            let e = self.entry(index)?;
            bytes += e.payload.len();
            out.push(e);
            if bytes >= max_bytes {
                break;
            }
        }
        Ok(out)
    }

    /// The greatest index holding `term`.
    pub fn last_index_of_term(&self, term: Term) -> Option<LogIndex> {
        let mut i = self.last_index;
        loop {
            let t = self.term_at(i)?;
            if t == term {
                return Some(i);
            }
            if t < term || i == 0 {
                return None;
            }
            i -= 1;
        }
    }

    /// The first index of the run of `term` ending at `index`.
    pub fn first_index_of_term(&self, term: Term, index: LogIndex) -> LogIndex {
        let mut i = index;
        while i > self.first_index() && self.term_at(i - 1) == Some(term) {
            i -= 1;
        }
        i
    }

    fn roll(&mut self, first_index: LogIndex) -> Result<()> {
        if let Some(tail) = self.segments.last() {
            tail.sync()?;
        }
        let seg = Segment::create(&self.seg_dir(), first_index)?;
        debug!("rolled a new segment at {first_index}");
        self.segments.push(seg);
        Ok(())
    }

    /// Appends entries at `last_index + 1`.
    ///
    /// Under the per-append policy this returns after the records are on
    /// disk and rolls them back if the fsync fails. A failure under any
    /// other policy poisons the log.
    pub async fn append(&mut self, entries: Vec<Entry>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        self.check_poisoned()?;

        let first = entries[0].index;
        ensure!(
            first == self.last_index + 1,
            "append at {first} leaves a hole after {}",
            self.last_index
        );
        let mut term = self.last_term();
        for (i, e) in entries.iter().enumerate() {
            ensure!(e.index == first + i as u64, "entries are not dense");
            ensure!(e.term >= term, "term goes backwards at {}", e.index);
            term = e.term;
        }

        match self.write(&entries) {
            Ok(dirty) => {
                self.last_index = first + entries.len() as u64 - 1;
                if let Err(e) = self.sync(dirty, entries.len()).await {
                    if matches!(self.options.fsync, FsyncPolicy::PerAppend) {
                        warn!("rolling back entries from {first}: {e:#}");
                        if let Err(e) = self.cut(first) {
                            self.poison(&e);
                        }
                    } else {
                        self.poison(&e);
                    }
                    return Err(e);
                }
                Ok(())
            }
            Err(e) => {
                self.poison(&e);
                Err(e)
            }
        }
    }

    fn write(&mut self, entries: &[Entry]) -> Result<Vec<Arc<std::fs::File>>> {
        let mut dirty: Vec<Arc<std::fs::File>> = vec![];
        let mut i = 0;
        while i < entries.len() {
            let need_roll = match self.segments.last() {
                None => true,
                Some(tail) => !tail.is_empty() && tail.size() >= self.options.segment_size,
            };
            if need_roll {
                self.roll(entries[i].index)?;
            }
            let Some(tail) = self.segments.last_mut() else {
                bail!(Error::StorageFailure("no tail segment".into()));
            };

            // Fill the tail up to the segment size, at least one record.
            let mut room = self.options.segment_size.saturating_sub(tail.size());
            let mut n = 0;
            for e in &entries[i..] {
                let size = (segment::RECORD_HEADER_LEN
                    + e.payload.len()
                    + segment::RECORD_TRAILER_LEN) as u64;
                if n > 0 && size > room {
                    break;
                }
                room = room.saturating_sub(size);
                n += 1;
            }
            tail.append(&entries[i..i + n])?;
            let f = tail.log_file();
            if !dirty.iter().any(|x| Arc::ptr_eq(x, &f)) {
                dirty.push(f);
            }
            i += n;
        }
        Ok(dirty)
    }

    async fn sync(&self, files: Vec<Arc<std::fs::File>>, n_entries: usize) -> Result<()> {
        let Some(flusher) = &self.flusher else {
            return Ok(());
        };
        match self.options.fsync {
            FsyncPolicy::PerAppend => {
                let mut waits = vec![];
                for f in files {
                    waits.push(flusher.sync(f, n_entries));
                }
                for w in waits {
                    match w.await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => bail!(Error::StorageFailure(e)),
                        Err(_) => bail!(Error::StorageFailure("flusher is gone".into())),
                    }
                }
            }
            _ => {
                for f in files {
                    flusher.sync_lazily(f, n_entries);
                }
            }
        }
        Ok(())
    }

    /// Physically removes entries at and after `from`.
    fn cut(&mut self, from: LogIndex) -> Result<()> {
        while let Some(tail) = self.segments.last_mut() {
            if tail.first_index >= from {
                if let Some(seg) = self.segments.pop() {
                    seg.remove()?;
                }
            } else {
                tail.truncate(from)?;
                break;
            }
        }
        self.last_index = (from - 1).max(self.prev.index);
        Ok(())
    }

    /// Removes the suffix starting at `from`. Committed entries are never removed.
    pub fn truncate_tail(&mut self, from: LogIndex) -> Result<()> {
        self.check_poisoned()?;
        if from <= self.commit_index {
            bail!(Error::TruncateCommitted {
                from,
                commit_index: self.commit_index,
            });
        }
        if from > self.last_index {
            return Ok(());
        }
        ensure!(from > self.prev.index);
        info!("truncate log tail from {from} (last={})", self.last_index);
        if let Err(e) = self.cut(from) {
            self.poison(&e);
            return Err(e);
        }
        Ok(())
    }

    fn write_head(&self, prev: Clock) -> Result<()> {
        let bin = bincode::serialize(&prev).storage()?;
        write_atomically(&self.dir.join("head"), &bin)
    }

    /// Discards entries before `up_to`. Segments lying wholly below it are deleted.
    pub fn compact(&mut self, up_to: LogIndex) -> Result<()> {
        if up_to <= self.first_index() {
            return Ok(());
        }
        ensure!(
            up_to <= self.last_index + 1,
            "compaction to {up_to} passes the last index {}",
            self.last_index
        );
        let Some(term) = self.term_at(up_to - 1) else {
            bail!(Error::EntryNotFound(up_to - 1));
        };
        let prev = Clock {
            index: up_to - 1,
            term,
        };
        self.write_head(prev)?;
        self.prev = prev;

        let mut n = 0;
        while let Some(head) = self.segments.first() {
            match head.last_index() {
                Some(last) if last < up_to => {
                    let seg = self.segments.remove(0);
                    seg.remove()?;
                    n += 1;
                }
                _ => break,
            }
        }
        info!("compacted log up to {up_to} ({n} segments deleted)");
        Ok(())
    }

    /// Drops every entry and restarts the log right after `anchor`.
    pub fn reset(&mut self, anchor: Clock) -> Result<()> {
        self.write_head(anchor)?;
        for seg in self.segments.drain(..) {
            seg.remove()?;
        }
        self.prev = anchor;
        self.last_index = anchor.index;
        self.commit_index = self.commit_index.max(anchor.index);
        self.poisoned = None;
        info!("reset log at {anchor:?}");
        Ok(())
    }
}
