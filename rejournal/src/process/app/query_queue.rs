use super::*;

pub struct Query {
    pub message: Bytes,
    pub completion: AppCompletion,
}

/// Queries parked until the state machine has applied their read index.
pub struct WaitQueue<T> {
    inner: BTreeMap<LogIndex, Vec<T>>,
}
impl<T> WaitQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: BTreeMap::new(),
        }
    }

    pub fn push(&mut self, index: LogIndex, q: T) {
        self.inner.entry(index).or_default().push(q);
    }

    pub fn pop(&mut self, upto: LogIndex) -> Vec<(LogIndex, T)> {
        let rest = self.inner.split_off(&(upto + 1));
        let ready = std::mem::replace(&mut self.inner, rest);

        let mut out = vec![];
        for (i, qs) in ready {
            for q in qs {
                out.push((i, q));
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.inner.values().map(|x| x.len()).sum()
    }
}
