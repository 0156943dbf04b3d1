use super::*;

use bytes::{Buf, BufMut, BytesMut};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};

/// index(8) | term(8) | length(4)
pub const RECORD_HEADER_LEN: usize = 20;
/// crc32 over header and payload.
pub const RECORD_TRAILER_LEN: usize = 4;

pub fn file_stem(first_index: LogIndex) -> String {
    format!("{first_index:020}")
}

/// Parses `00000000000000000042.log` into 42.
pub fn parse_log_file_name(name: &str) -> Option<LogIndex> {
    let stem = name.strip_suffix(".log")?;
    if stem.len() != 20 {
        return None;
    }
    stem.parse().ok()
}

pub fn encode_record(e: &Entry, buf: &mut BytesMut) {
    let start = buf.len();
    buf.put_u64(e.index);
    buf.put_u64(e.term);
    buf.put_u32(e.payload.len() as u32);
    buf.put_slice(&e.payload);
    let crc = crc32fast::hash(&buf[start..]);
    buf.put_u32(crc);
}

/// One `.log` file and its `.idx` sidecar holding the byte offset of every record.
pub struct Segment {
    pub first_index: LogIndex,
    log_path: PathBuf,
    idx_path: PathBuf,
    log_file: Arc<File>,
    idx_file: File,
    reader: Mutex<File>,
    offsets: Vec<u64>,
    terms: Vec<Term>,
    size: u64,
}

fn open_append(path: &Path, truncate: bool) -> Result<File> {
    let f = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .storage()?;
    if truncate {
        f.set_len(0).storage()?;
    }
    Ok(f)
}

impl Segment {
    pub fn create(dir: &Path, first_index: LogIndex) -> Result<Self> {
        let stem = file_stem(first_index);
        let log_path = dir.join(format!("{stem}.log"));
        let idx_path = dir.join(format!("{stem}.idx"));
        let log_file = open_append(&log_path, true)?;
        let idx_file = open_append(&idx_path, true)?;
        let reader = File::open(&log_path).storage()?;
        Ok(Self {
            first_index,
            log_path,
            idx_path,
            log_file: Arc::new(log_file),
            idx_file,
            reader: Mutex::new(reader),
            offsets: vec![],
            terms: vec![],
            size: 0,
        })
    }

    /// Opens an existing segment.
    ///
    /// The tail segment is recovered by scanning: the first short or corrupt
    /// record and everything after it are cut off and the sidecar is rebuilt.
    /// Sealed segments trust their sidecar and fall back to a scan if it is
    /// unusable, but any corruption inside them is an error.
    pub fn open(dir: &Path, first_index: LogIndex, is_tail: bool) -> Result<Self> {
        let stem = file_stem(first_index);
        let log_path = dir.join(format!("{stem}.log"));
        let idx_path = dir.join(format!("{stem}.idx"));
        let log_file = open_append(&log_path, false)?;
        let idx_file = open_append(&idx_path, false)?;
        let reader = File::open(&log_path).storage()?;
        let size = log_file.metadata().storage()?.len();

        let mut this = Self {
            first_index,
            log_path,
            idx_path,
            log_file: Arc::new(log_file),
            idx_file,
            reader: Mutex::new(reader),
            offsets: vec![],
            terms: vec![],
            size,
        };

        if is_tail || this.load_sidecar().is_err() {
            this.recover(is_tail)?;
        }
        Ok(this)
    }

    fn load_sidecar(&mut self) -> Result<()> {
        let mut bin = vec![];
        File::open(&self.idx_path)
            .storage()?
            .read_to_end(&mut bin)
            .storage()?;
        ensure!(bin.len() % 8 == 0, "torn sidecar");
        let mut buf = &bin[..];
        let mut offsets = Vec::with_capacity(bin.len() / 8);
        while buf.has_remaining() {
            offsets.push(buf.get_u64());
        }
        ensure!(!offsets.is_empty(), "empty sidecar");

        let mut terms = Vec::with_capacity(offsets.len());
        let mut reader = self.reader.lock();
        let min_len = (RECORD_HEADER_LEN + RECORD_TRAILER_LEN) as u64;
        for (i, &off) in offsets.iter().enumerate() {
            ensure!(off + min_len <= self.size);
            if i > 0 {
                ensure!(off >= offsets[i - 1] + min_len, "sidecar offsets overlap");
            }
            let mut header = [0u8; RECORD_HEADER_LEN];
            reader.seek(SeekFrom::Start(off)).storage()?;
            reader.read_exact(&mut header).storage()?;
            let mut h = &header[..];
            let index = h.get_u64();
            let term = h.get_u64();
            ensure!(index == self.first_index + i as u64, "sidecar out of sync");
            terms.push(term);
        }
        drop(reader);

        self.offsets = offsets;
        self.terms = terms;
        Ok(())
    }

    fn recover(&mut self, is_tail: bool) -> Result<()> {
        let mut bin = vec![];
        {
            let mut reader = self.reader.lock();
            reader.seek(SeekFrom::Start(0)).storage()?;
            reader.read_to_end(&mut bin).storage()?;
        }

        let mut offsets = vec![];
        let mut terms = vec![];
        let mut pos = 0usize;
        while pos + RECORD_HEADER_LEN + RECORD_TRAILER_LEN <= bin.len() {
            let mut h = &bin[pos..pos + RECORD_HEADER_LEN];
            let index = h.get_u64();
            let term = h.get_u64();
            let len = h.get_u32() as usize;
            let end = pos + RECORD_HEADER_LEN + len;
            if end + RECORD_TRAILER_LEN > bin.len() {
                break;
            }
            let crc = (&bin[end..end + RECORD_TRAILER_LEN]).get_u32();
            if crc != crc32fast::hash(&bin[pos..end]) {
                break;
            }
            if index != self.first_index + offsets.len() as u64 {
                break;
            }
            offsets.push(pos as u64);
            terms.push(term);
            pos = end + RECORD_TRAILER_LEN;
        }

        if pos < bin.len() {
            if !is_tail {
                bail!(Error::StorageFailure(format!(
                    "corrupt record at offset {pos} in sealed segment {}",
                    self.log_path.display()
                )));
            }
            warn!(
                "cut {} bytes of torn tail from {}",
                bin.len() - pos,
                self.log_path.display()
            );
            self.log_file.set_len(pos as u64).storage()?;
            self.log_file.sync_all().storage()?;
        }

        let mut idx = BytesMut::with_capacity(offsets.len() * 8);
        for &off in &offsets {
            idx.put_u64(off);
        }
        self.idx_file.set_len(0).storage()?;
        (&self.idx_file).write_all(&idx).storage()?;
        self.idx_file.sync_all().storage()?;

        self.offsets = offsets;
        self.terms = terms;
        self.size = pos as u64;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// The index the next appended record must carry.
    pub fn next_index(&self) -> LogIndex {
        self.first_index + self.offsets.len() as u64
    }

    pub fn last_index(&self) -> Option<LogIndex> {
        if self.is_empty() {
            None
        } else {
            Some(self.next_index() - 1)
        }
    }

    pub fn log_file(&self) -> Arc<File> {
        self.log_file.clone()
    }

    pub fn term(&self, index: LogIndex) -> Option<Term> {
        let i = index.checked_sub(self.first_index)? as usize;
        self.terms.get(i).copied()
    }

    pub fn read(&self, index: LogIndex) -> Result<Entry> {
        let Some(i) = index.checked_sub(self.first_index) else {
            bail!(Error::EntryNotFound(index));
        };
        let i = i as usize;
        let Some(&off) = self.offsets.get(i) else {
            bail!(Error::EntryNotFound(index));
        };
        let end = self.offsets.get(i + 1).copied().unwrap_or(self.size);
        let min_len = (RECORD_HEADER_LEN + RECORD_TRAILER_LEN) as u64;
        if end.checked_sub(off).map_or(true, |n| n < min_len) {
            bail!(Error::StorageFailure(format!(
                "record of index {index} at [{off}, {end}) is too short in {}",
                self.log_path.display()
            )));
        }

        let mut bin = vec![0u8; (end - off) as usize];
        {
            let mut reader = self.reader.lock();
            reader.seek(SeekFrom::Start(off)).storage()?;
            reader.read_exact(&mut bin).storage()?;
        }

        let body_end = bin.len() - RECORD_TRAILER_LEN;
        let crc = (&bin[body_end..]).get_u32();
        if crc != crc32fast::hash(&bin[..body_end]) {
            bail!(Error::StorageFailure(format!(
                "crc mismatch at index {index} in {}",
                self.log_path.display()
            )));
        }

        let mut h = &bin[..RECORD_HEADER_LEN];
        let stored_index = h.get_u64();
        let term = h.get_u64();
        let len = h.get_u32() as usize;
        ensure!(stored_index == index);
        ensure!(RECORD_HEADER_LEN + len == body_end);
        let payload = Bytes::copy_from_slice(&bin[RECORD_HEADER_LEN..body_end]);
        Ok(Entry {
            index,
            term,
            payload,
        })
    }

    /// Writes the records without forcing them to disk.
    pub fn append(&mut self, entries: &[Entry]) -> Result<()> {
        let mut buf = BytesMut::new();
        let mut idx = BytesMut::with_capacity(entries.len() * 8);
        let mut offsets = Vec::with_capacity(entries.len());
        let mut terms = Vec::with_capacity(entries.len());
        for (i, e) in entries.iter().enumerate() {
            ensure!(e.index == self.next_index() + i as u64);
            let off = self.size + buf.len() as u64;
            offsets.push(off);
            terms.push(e.term);
            idx.put_u64(off);
            encode_record(e, &mut buf);
        }

        (&*self.log_file).write_all(&buf).storage()?;
        (&self.idx_file).write_all(&idx).storage()?;

        self.size += buf.len() as u64;
        self.offsets.extend(offsets);
        self.terms.extend(terms);
        Ok(())
    }

    /// Drops every record at or after `from`.
    pub fn truncate(&mut self, from: LogIndex) -> Result<()> {
        let keep = from.saturating_sub(self.first_index) as usize;
        if keep >= self.len() {
            return Ok(());
        }
        let new_size = self.offsets[keep];
        self.log_file.set_len(new_size).storage()?;
        self.idx_file.set_len(keep as u64 * 8).storage()?;
        self.sync()?;
        self.offsets.truncate(keep);
        self.terms.truncate(keep);
        self.size = new_size;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.log_file.sync_data().storage()?;
        self.idx_file.sync_data().storage()?;
        Ok(())
    }

    pub fn remove(self) -> Result<()> {
        let Self {
            log_path, idx_path, ..
        } = self;
        std::fs::remove_file(&log_path).storage()?;
        match std::fs::remove_file(&idx_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => bail!(Error::storage(e)),
        }
        Ok(())
    }
}
