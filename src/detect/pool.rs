use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use anyhow::{anyhow, Result};

use crate::error::PipelineError;

use super::backend::DetectorBackend;

/// Default number of requests allowed to wait for a detector instance.
pub const DEFAULT_MAX_QUEUE: usize = 32;

/// Bounded pool of detector instances.
///
/// Each instance is checked out by at most one request at a time, so the number of parallel
/// `detect` calls never exceeds the number of instances the pool was built with. Requests
/// that find no idle instance wait in a queue of at most `max_queue` entries; a request
/// arriving at a full queue is rejected with `PipelineError::DetectorBusy` instead of piling
/// up behind the model.
pub struct DetectorPool {
    state: Mutex<PoolState>,
    available: Condvar,
    capacity: usize,
    max_queue: usize,
}

struct PoolState {
    idle: Vec<Box<dyn DetectorBackend>>,
    waiting: usize,
}

impl DetectorPool {
    pub fn new(backends: Vec<Box<dyn DetectorBackend>>, max_queue: usize) -> Result<Self> {
        if backends.is_empty() {
            return Err(anyhow!("detector pool needs at least one backend instance"));
        }
        let capacity = backends.len();
        Ok(Self {
            state: Mutex::new(PoolState {
                idle: backends,
                waiting: 0,
            }),
            available: Condvar::new(),
            capacity,
            max_queue,
        })
    }

    /// Pool around a single instance with the default queue bound.
    pub fn single<B: DetectorBackend + 'static>(backend: B) -> Self {
        Self {
            state: Mutex::new(PoolState {
                idle: vec![Box::new(backend)],
                waiting: 0,
            }),
            available: Condvar::new(),
            capacity: 1,
            max_queue: DEFAULT_MAX_QUEUE,
        }
    }

    pub fn with_max_queue(mut self, max_queue: usize) -> Self {
        self.max_queue = max_queue;
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_queue(&self) -> usize {
        self.max_queue
    }

    /// Number of requests currently blocked in `acquire`.
    pub fn waiting(&self) -> usize {
        self.lock_state().waiting
    }

    pub fn idle(&self) -> usize {
        self.lock_state().idle.len()
    }

    /// Check out an instance, blocking while all instances are busy.
    pub fn acquire(&self) -> Result<PooledDetector<'_>, PipelineError> {
        let mut state = self.lock_state();
        if let Some(backend) = state.idle.pop() {
            return Ok(PooledDetector::new(self, backend));
        }
        if state.waiting >= self.max_queue {
            log::warn!(
                "detector queue full: {} waiting, {} instances busy",
                state.waiting,
                self.capacity
            );
            return Err(PipelineError::DetectorBusy {
                waiting: state.waiting,
            });
        }

        state.waiting += 1;
        loop {
            state = self
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(backend) = state.idle.pop() {
                state.waiting -= 1;
                return Ok(PooledDetector::new(self, backend));
            }
        }
    }

    /// Run `warm_up` on every idle instance.
    pub fn warm_up(&self) -> Result<()> {
        let mut state = self.lock_state();
        for backend in state.idle.iter_mut() {
            log::debug!("warming up detector backend '{}'", backend.name());
            backend.warm_up()?;
        }
        Ok(())
    }

    fn release(&self, backend: Box<dyn DetectorBackend>) {
        self.lock_state().idle.push(backend);
        self.available.notify_one();
    }

    // The guarded state is a plain vector and counter, both valid after any panic.
    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A detector instance checked out of a `DetectorPool`. Returned to the pool on drop.
pub struct PooledDetector<'a> {
    pool: &'a DetectorPool,
    backend: Option<Box<dyn DetectorBackend>>,
}

impl<'a> PooledDetector<'a> {
    fn new(pool: &'a DetectorPool, backend: Box<dyn DetectorBackend>) -> Self {
        Self {
            pool,
            backend: Some(backend),
        }
    }
}

impl Deref for PooledDetector<'_> {
    type Target = dyn DetectorBackend;

    fn deref(&self) -> &Self::Target {
        match &self.backend {
            Some(backend) => backend.as_ref(),
            None => unreachable!("pooled detector used after release"),
        }
    }
}

impl DerefMut for PooledDetector<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.backend {
            Some(backend) => backend.as_mut(),
            None => unreachable!("pooled detector used after release"),
        }
    }
}

impl Drop for PooledDetector<'_> {
    fn drop(&mut self) {
        if let Some(backend) = self.backend.take() {
            self.pool.release(backend);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::RawPrediction;
    use crate::frame::Frame;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc};
    use std::time::Duration;

    struct CountingBackend {
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl DetectorBackend for CountingBackend {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn detect(&mut self, _frame: &Frame) -> anyhow::Result<Vec<RawPrediction>> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(2));
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    fn counting() -> (CountingBackend, Arc<AtomicUsize>) {
        let peak = Arc::new(AtomicUsize::new(0));
        let backend = CountingBackend {
            active: Arc::new(AtomicUsize::new(0)),
            peak: peak.clone(),
        };
        (backend, peak)
    }

    #[test]
    fn empty_pool_is_rejected() {
        assert!(DetectorPool::new(Vec::new(), 4).is_err());
    }

    #[test]
    fn single_instance_serializes_detect_calls() {
        let (backend, peak) = counting();
        let pool = DetectorPool::single(backend).with_max_queue(64);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..5 {
                        let frame = Frame::rgb(vec![0u8; 3], 1, 1, 1).unwrap();
                        let mut detector = pool.acquire().expect("acquire");
                        detector.detect(&frame).expect("detect");
                    }
                });
            }
        });

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(pool.idle(), 1);
        assert_eq!(pool.waiting(), 0);
    }

    #[test]
    fn full_queue_rejects_with_busy() {
        let (backend, _) = counting();
        let pool = DetectorPool::single(backend).with_max_queue(0);

        let held = pool.acquire().expect("first acquire");
        match pool.acquire() {
            Err(PipelineError::DetectorBusy { waiting }) => assert_eq!(waiting, 0),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("second acquire should have been rejected"),
        }
        drop(held);
        assert!(pool.acquire().is_ok());
    }

    #[test]
    fn queued_request_proceeds_after_release() {
        let (backend, _) = counting();
        let pool = DetectorPool::single(backend).with_max_queue(1);
        let (tx, rx) = mpsc::channel();

        std::thread::scope(|scope| {
            let held = pool.acquire().expect("first acquire");
            let pool_ref = &pool;
            scope.spawn(move || {
                let got = pool_ref.acquire().is_ok();
                tx.send(got).unwrap();
            });

            while pool.waiting() == 0 {
                std::thread::yield_now();
            }
            assert!(rx.try_recv().is_err());
            drop(held);
            assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        });
    }
}
