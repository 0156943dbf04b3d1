use super::*;

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::fs::File;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

pub type SyncResult = std::result::Result<(), String>;

pub struct SyncRequest {
    file: Arc<File>,
    n_entries: usize,
    notifier: Option<oneshot::Sender<SyncResult>>,
}

/// Background thread that fsyncs segment files.
///
/// Requests that queue up while a sync is running are served by a single
/// fsync per file. Under a batched policy the thread keeps collecting
/// requests until enough entries are pending or the delay expires.
pub struct Flusher {
    tx: Sender<SyncRequest>,
    failed: Arc<AtomicBool>,
    _kill_tx: Sender<()>,
}

impl Flusher {
    pub fn spawn(policy: FsyncPolicy) -> Self {
        let (tx, rx) = crossbeam::channel::unbounded();
        let (kill_tx, kill_rx) = crossbeam::channel::bounded::<()>(0);
        let failed = Arc::new(AtomicBool::new(false));

        let syncer = Syncer {
            rx,
            policy,
            failed: failed.clone(),
        };
        std::thread::spawn(move || loop {
            if let Err(TryRecvError::Disconnected) = kill_rx.try_recv() {
                break;
            }
            syncer.reap().ok();
        });

        Self {
            tx,
            failed,
            _kill_tx: kill_tx,
        }
    }

    /// True once any fsync has failed.
    pub fn failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn sync(&self, file: Arc<File>, n_entries: usize) -> oneshot::Receiver<SyncResult> {
        let (notifier, rx) = oneshot::channel();
        let req = SyncRequest {
            file,
            n_entries,
            notifier: Some(notifier),
        };
        // The receiver reports an error if the thread is gone.
        self.tx.send(req).ok();
        rx
    }

    pub fn sync_lazily(&self, file: Arc<File>, n_entries: usize) {
        let req = SyncRequest {
            file,
            n_entries,
            notifier: None,
        };
        self.tx.send(req).ok();
    }
}

struct Syncer {
    rx: Receiver<SyncRequest>,
    policy: FsyncPolicy,
    failed: Arc<AtomicBool>,
}

impl Syncer {
    fn reap(&self) -> std::result::Result<(), RecvTimeoutError> {
        // Blocked until the first element is received.
        let head = self.rx.recv_timeout(Duration::from_millis(100))?;
        let mut n = head.n_entries;
        let mut reqs = vec![head];

        match self.policy {
            FsyncPolicy::Batched {
                max_entries,
                max_delay,
            } => {
                let deadline = Instant::now() + max_delay;
                while n < max_entries {
                    match self.rx.recv_deadline(deadline) {
                        Ok(req) => {
                            n += req.n_entries;
                            reqs.push(req);
                        }
                        Err(_) => break,
                    }
                }
            }
            _ => {
                let k = self.rx.len();
                for _ in 0..k {
                    match self.rx.try_recv() {
                        Ok(req) => reqs.push(req),
                        Err(_) => break,
                    }
                }
            }
        }

        let mut files: Vec<Arc<File>> = vec![];
        for req in &reqs {
            if !files.iter().any(|f| Arc::ptr_eq(f, &req.file)) {
                files.push(req.file.clone());
            }
        }

        let mut result = Ok(());
        for f in files {
            if let Err(e) = f.sync_data() {
                error!("fsync failed: {e}");
                self.failed.store(true, Ordering::SeqCst);
                result = Err(e.to_string());
                break;
            }
        }

        for req in reqs {
            if let Some(notifier) = req.notifier {
                notifier.send(result.clone()).ok();
            }
        }
        Ok(())
    }
}
