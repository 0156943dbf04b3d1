use super::*;

use tokio::sync::oneshot;

/// Result of an applied write or a served read: the index it was applied at and the response.
pub type Applied = std::result::Result<(LogIndex, Bytes), Error>;

pub struct AppCompletion(oneshot::Sender<Applied>);
impl AppCompletion {
    pub fn complete_with(self, x: Applied) {
        self.0.send(x).ok();
    }
}

pub fn prepare_app_completion() -> (AppCompletion, oneshot::Receiver<Applied>) {
    let (tx, rx) = oneshot::channel();
    (AppCompletion(tx), rx)
}

pub struct KernCompletion(oneshot::Sender<std::result::Result<(), Error>>);
impl KernCompletion {
    pub fn complete(self) {
        self.0.send(Ok(())).ok();
    }

    pub fn fail(self, e: Error) {
        self.0.send(Err(e)).ok();
    }
}

pub fn prepare_kern_completion() -> (
    KernCompletion,
    oneshot::Receiver<std::result::Result<(), Error>>,
) {
    let (tx, rx) = oneshot::channel();
    (KernCompletion(tx), rx)
}

/// Reply channel of a request handled by the consensus task.
pub type Reply<T> = oneshot::Sender<std::result::Result<T, Error>>;

/// Waits for a completion. A dropped sender means the process went away.
pub async fn wait<T>(rx: oneshot::Receiver<std::result::Result<T, Error>>) -> std::result::Result<T, Error> {
    match rx.await {
        Ok(x) => x,
        Err(_) => Err(Error::NodeStopped),
    }
}

struct WriteWaiter {
    term: Term,
    completion: AppCompletion,
}

/// Writes waiting to be applied, keyed by the index their entry was appended at.
///
/// The consensus task inserts a waiter when it appends the entry and the apply
/// task completes it. A waiter whose entry turns out to be of a different term
/// was overwritten by another leader.
#[derive(Default)]
pub struct WriteWaiters {
    inner: parking_lot::Mutex<BTreeMap<LogIndex, WriteWaiter>>,
}

impl WriteWaiters {
    pub fn register(&self, index: LogIndex, term: Term, completion: AppCompletion) {
        self.inner
            .lock()
            .insert(index, WriteWaiter { term, completion });
    }

    /// Completes the waiter of the applied entry at `clock`.
    pub fn complete(&self, clock: Clock, result: std::result::Result<Bytes, Error>) {
        let Some(w) = self.inner.lock().remove(&clock.index) else {
            return;
        };
        if w.term == clock.term {
            w.completion.complete_with(result.map(|x| (clock.index, x)));
        } else {
            w.completion
                .complete_with(Err(Error::NotLeader { leader: None }));
        }
    }

    /// Fails the waiters at `from` and after.
    pub fn fail_from(&self, from: LogIndex, e: Error) {
        let waiters = self.inner.lock().split_off(&from);
        for (_, w) in waiters {
            w.completion.complete_with(Err(e.clone()));
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }
}
