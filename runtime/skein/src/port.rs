use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::blob::Blob;

/// Outcome of pushing a blob to an output port.
#[derive(Debug)]
pub enum SendStatus {
    Success,
    /// Every bound subscriber was full; the blob is handed back so the
    /// producer can retry or discard without losing it.
    PortFullTimeout(Blob),
    /// Some (but not all) fan-out subscribers were full within the timeout;
    /// the blob was discarded for those subscribers only.
    PortFullDiscarded,
    /// The output port has no binding; the blob is handed back.
    NullPort(Blob),
}

impl SendStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, SendStatus::Success)
    }
}

pub(crate) enum PushOutcome {
    Pushed,
    Full(Blob),
    Shutdown(Blob),
}

/// Bounded FIFO of blobs attached to one node input port.
///
/// Uses a mutex plus two condition variables: producers wait on `not_full`,
/// consumers on `not_empty`. Consumers may pop selectively (the first blob
/// matching a predicate) which is what stream-bound workers and the
/// multi-input aligner need; FIFO order among matching blobs is preserved.
pub(crate) struct PortQueue {
    inner: Mutex<QueueInner>,
    not_empty: Condvar,
    not_full: Condvar,
}

struct QueueInner {
    items: VecDeque<Blob>,
    capacity: usize,
    shutdown: bool,
}

impl PortQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity),
                capacity,
                shutdown: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    pub(crate) fn push_timeout(&self, blob: Blob, timeout: Duration) -> PushOutcome {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.shutdown {
                return PushOutcome::Shutdown(blob);
            }
            if inner.items.len() < inner.capacity {
                inner.items.push_back(blob);
                self.not_empty.notify_one();
                return PushOutcome::Pushed;
            }
            let now = Instant::now();
            if now >= deadline {
                return PushOutcome::Full(blob);
            }
            let (guard, _result) = self
                .not_full
                .wait_timeout(inner, deadline - now)
                .unwrap();
            inner = guard;
        }
    }

    /// Pop the first blob satisfying `pred`, waiting up to `timeout` for one
    /// to arrive. Returns `None` on timeout or shutdown.
    pub(crate) fn pop_where(
        &self,
        pred: impl Fn(&Blob) -> bool,
        timeout: Duration,
    ) -> Option<Blob> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(pos) = inner.items.iter().position(&pred) {
                let blob = inner.items.remove(pos).unwrap();
                self.not_full.notify_one();
                return Some(blob);
            }
            if inner.shutdown {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _result) = self
                .not_empty
                .wait_timeout(inner, deadline - now)
                .unwrap();
            inner = guard;
        }
    }

    /// Non-blocking variant of [`PortQueue::pop_where`].
    pub(crate) fn try_pop_where(&self, pred: impl Fn(&Blob) -> bool) -> Option<Blob> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(pos) = inner.items.iter().position(pred) {
            let blob = inner.items.remove(pos).unwrap();
            self.not_full.notify_one();
            Some(blob)
        } else {
            None
        }
    }

    /// Wake every waiter; subsequent pushes and pops fail fast.
    pub(crate) fn shutdown(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.shutdown = true;
        drop(inner);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::Blob;
    use std::sync::Arc;

    fn blob(stream: u32, frame: u32) -> Blob {
        Blob::new(stream, frame)
    }

    #[test]
    fn fifo_and_capacity() {
        let q = PortQueue::new(2);
        assert!(matches!(
            q.push_timeout(blob(0, 0), Duration::from_millis(1)),
            PushOutcome::Pushed
        ));
        assert!(matches!(
            q.push_timeout(blob(0, 1), Duration::from_millis(1)),
            PushOutcome::Pushed
        ));
        // full: the blob comes back
        match q.push_timeout(blob(0, 2), Duration::from_millis(5)) {
            PushOutcome::Full(b) => assert_eq!(b.frame_id, 2),
            _ => panic!("expected Full"),
        }
        let first = q.pop_where(|_| true, Duration::from_millis(1)).unwrap();
        assert_eq!(first.frame_id, 0);
    }

    #[test]
    fn selective_pop_preserves_order_per_stream() {
        let q = PortQueue::new(8);
        for (s, f) in [(1, 0), (2, 0), (1, 1), (2, 1)] {
            q.push_timeout(blob(s, f), Duration::from_millis(1));
        }
        let a = q
            .pop_where(|b| b.stream_id == 2, Duration::from_millis(1))
            .unwrap();
        assert_eq!((a.stream_id, a.frame_id), (2, 0));
        let b = q
            .pop_where(|b| b.stream_id == 2, Duration::from_millis(1))
            .unwrap();
        assert_eq!((b.stream_id, b.frame_id), (2, 1));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn shutdown_wakes_blocked_consumer() {
        let q = Arc::new(PortQueue::new(1));
        let q2 = q.clone();
        let handle = std::thread::spawn(move || q2.pop_where(|_| true, Duration::from_secs(30)));
        std::thread::sleep(Duration::from_millis(20));
        q.shutdown();
        assert!(handle.join().unwrap().is_none());
    }
}
