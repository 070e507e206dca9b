//! Single-flight scheduling of integration preview computations
//!
//! Submissions go to the front of a de-duplicating queue, so the request that
//! changed last is served first. A resizable pool of tokio tasks drains the
//! queue. A request id is claimed before its job runs; a worker that pops an
//! id which is already claimed skips it and asks the running job to go again
//! once it finishes, so the final preview always reflects the newest trigger.

use crate::error::{Error, Result};
use crate::types::RequestId;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, error, warn};

/// Work executed for a request id
#[async_trait]
pub trait PreviewJob: Send + Sync + 'static {
    /// Compute for `id`. Errors are logged by the scheduler.
    async fn run(&self, id: RequestId) -> Result<()>;
}

struct Shared {
    job: Arc<dyn PreviewJob>,
    runtime: Handle,
    queue: Mutex<VecDeque<RequestId>>,
    /// Claimed ids, mapped to whether a rerun was requested meanwhile
    in_flight: Mutex<HashMap<RequestId, bool>>,
    work: Notify,
    idle: Notify,
    target_workers: AtomicUsize,
    live_workers: AtomicUsize,
    shutdown: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Guarded sections never panic midway, the data is always consistent
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    /// Pop the next id and try to claim it, as one step so the scheduler
    /// never looks idle in between. The flag is `false` when the id was
    /// already running; that computation is flagged for a rerun instead.
    fn next(&self) -> Option<(RequestId, bool)> {
        let mut queue = lock(&self.queue);
        let id = queue.pop_front()?;
        let mut in_flight = lock(&self.in_flight);
        if let Some(rerun) = in_flight.get_mut(&id) {
            *rerun = true;
            Some((id, false))
        } else {
            in_flight.insert(id, false);
            Some((id, true))
        }
    }

    /// Release `id` unless a rerun was requested, in which case the claim is
    /// kept and `true` returned
    fn finish(&self, id: RequestId) -> bool {
        let mut in_flight = lock(&self.in_flight);
        match in_flight.get_mut(&id) {
            Some(rerun) if *rerun => {
                *rerun = false;
                true
            }
            _ => {
                in_flight.remove(&id);
                false
            }
        }
    }

    fn is_idle(&self) -> bool {
        lock(&self.queue).is_empty() && lock(&self.in_flight).is_empty()
    }

    /// Whether this worker should exit; decrements the live count if so
    fn retire(&self) -> bool {
        let mut live = self.live_workers.load(Ordering::SeqCst);
        loop {
            let surplus = self.shutdown.load(Ordering::SeqCst)
                || live > self.target_workers.load(Ordering::SeqCst);
            if !surplus {
                return false;
            }
            match self.live_workers.compare_exchange(
                live,
                live - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => live = actual,
            }
        }
    }

    async fn execute(&self, id: RequestId) {
        loop {
            let job = Arc::clone(&self.job);
            // Own task so a panicking job can't take the worker down
            match self.runtime.spawn(async move { job.run(id).await }).await {
                Ok(Ok(())) => debug!(request_id = %id, "preview job finished"),
                Ok(Err(e)) => error!(request_id = %id, error = %e, "preview job failed"),
                Err(e) => error!(request_id = %id, error = %e, "preview job panicked"),
            }
            if !self.finish(id) {
                break;
            }
            debug!(request_id = %id, "rerunning preview job");
        }
        if self.is_idle() {
            self.idle.notify_waiters();
        }
    }
}

async fn worker_loop(shared: Arc<Shared>) {
    loop {
        let notified = shared.work.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if shared.retire() {
            debug!("preview worker retiring");
            return;
        }
        match shared.next() {
            Some((id, true)) => {
                shared.execute(id).await;
                continue;
            }
            Some((id, false)) => {
                warn!(request_id = %id, "preview already computing, rerun requested");
                continue;
            }
            None => {}
        }
        notified.await;
    }
}

/// Bounded worker pool with a coalescing, newest-first queue
pub struct SingleFlightScheduler {
    shared: Arc<Shared>,
}

impl SingleFlightScheduler {
    /// Start a scheduler with `workers` workers (at least one).
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(job: Arc<dyn PreviewJob>, workers: usize) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Internal(format!("scheduler needs a tokio runtime: {e}")))?;
        Ok(Self::with_runtime(job, workers, runtime))
    }

    /// Start a scheduler whose workers run on `runtime`
    pub fn with_runtime(job: Arc<dyn PreviewJob>, workers: usize, runtime: Handle) -> Self {
        let scheduler = Self {
            shared: Arc::new(Shared {
                job,
                runtime,
                queue: Mutex::new(VecDeque::new()),
                in_flight: Mutex::new(HashMap::new()),
                work: Notify::new(),
                idle: Notify::new(),
                target_workers: AtomicUsize::new(0),
                live_workers: AtomicUsize::new(0),
                shutdown: AtomicBool::new(false),
            }),
        };
        scheduler.set_workers(workers);
        scheduler
    }

    /// Queue a computation for `id` ahead of everything else, replacing any
    /// queued one for the same id
    pub fn submit(&self, id: RequestId) {
        {
            let mut queue = lock(&self.shared.queue);
            queue.retain(|queued| *queued != id);
            queue.push_front(id);
        }
        debug!(request_id = %id, "preview submitted");
        self.shared.work.notify_one();
    }

    /// Resize the pool. Queued work is kept; surplus workers exit once their
    /// current job is done.
    pub fn set_workers(&self, workers: usize) {
        let workers = workers.max(1);
        let previous = self.shared.target_workers.swap(workers, Ordering::SeqCst);
        if previous != workers {
            debug!(previous, workers, "resizing preview worker pool");
        }

        loop {
            let live = self.shared.live_workers.load(Ordering::SeqCst);
            if live >= workers {
                break;
            }
            if self
                .shared
                .live_workers
                .compare_exchange(live, live + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                self.shared.runtime.spawn(worker_loop(Arc::clone(&self.shared)));
            }
        }
        // Wake idle workers so surplus ones notice and exit
        self.shared.work.notify_waiters();
    }

    /// Configured pool size
    pub fn workers(&self) -> usize {
        self.shared.target_workers.load(Ordering::SeqCst)
    }

    /// Queued ids, next to run first
    pub fn pending(&self) -> Vec<RequestId> {
        lock(&self.shared.queue).iter().copied().collect()
    }

    /// Whether a computation for `id` is running
    pub fn is_computing(&self, id: RequestId) -> bool {
        lock(&self.shared.in_flight).contains_key(&id)
    }

    /// Whether the queue is empty and nothing is running
    pub fn is_idle(&self) -> bool {
        self.shared.is_idle()
    }

    /// Wait until the queue is empty and nothing is running
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.shared.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Stop all workers once their current job is done. Queued work is dropped.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        lock(&self.shared.queue).clear();
        self.shared.work.notify_waiters();
        self.shared.idle.notify_waiters();
    }
}

impl Drop for SingleFlightScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    /// Records order and concurrency of runs
    #[derive(Default)]
    struct Probe {
        order: Mutex<Vec<RequestId>>,
        running: Mutex<HashMap<RequestId, u32>>,
        max_concurrent_same_id: AtomicU32,
        delay: Duration,
        fail: Option<RequestId>,
        panic: Option<RequestId>,
    }

    #[async_trait]
    impl PreviewJob for Probe {
        async fn run(&self, id: RequestId) -> Result<()> {
            {
                let mut running = self.running.lock().unwrap();
                let count = running.entry(id).or_default();
                *count += 1;
                self.max_concurrent_same_id.fetch_max(*count, Ordering::SeqCst);
            }
            tokio::time::sleep(self.delay).await;
            self.order.lock().unwrap().push(id);
            *self.running.lock().unwrap().get_mut(&id).unwrap() -= 1;

            if self.panic == Some(id) {
                panic!("boom");
            }
            if self.fail == Some(id) {
                return Err(Error::Internal("failed".to_string()));
            }
            Ok(())
        }
    }

    #[test]
    fn test_new_outside_runtime_fails() {
        let probe = Arc::new(Probe::default());
        assert!(SingleFlightScheduler::new(probe, 1).is_err());
    }

    #[tokio::test]
    async fn test_newest_submission_runs_first() {
        let probe = Arc::new(Probe::default());
        let scheduler = SingleFlightScheduler::new(probe, 1).unwrap();

        // Workers don't get to run before the test yields
        scheduler.submit(RequestId(1));
        scheduler.submit(RequestId(2));
        scheduler.submit(RequestId(3));
        scheduler.submit(RequestId(1));
        assert_eq!(
            scheduler.pending(),
            vec![RequestId(1), RequestId(3), RequestId(2)]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_id_never_runs_concurrently() {
        let probe = Arc::new(Probe {
            delay: Duration::from_millis(30),
            ..Probe::default()
        });
        let scheduler = SingleFlightScheduler::new(probe.clone(), 4).unwrap();

        for _ in 0..5 {
            scheduler.submit(RequestId(1));
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        scheduler.wait_idle().await;

        assert_eq!(probe.max_concurrent_same_id.load(Ordering::SeqCst), 1);
        // The first run plus at least one rerun for triggers that arrived meanwhile
        assert!(probe.order.lock().unwrap().len() >= 2);
        assert!(!scheduler.is_computing(RequestId(1)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failures_and_panics_release_claim() {
        let probe = Arc::new(Probe {
            fail: Some(RequestId(1)),
            panic: Some(RequestId(2)),
            ..Probe::default()
        });
        let scheduler = SingleFlightScheduler::new(probe.clone(), 1).unwrap();

        scheduler.submit(RequestId(1));
        scheduler.submit(RequestId(2));
        scheduler.wait_idle().await;
        assert!(!scheduler.is_computing(RequestId(1)));
        assert!(!scheduler.is_computing(RequestId(2)));

        // The worker survived and keeps serving
        scheduler.submit(RequestId(3));
        scheduler.wait_idle().await;
        assert!(probe.order.lock().unwrap().contains(&RequestId(3)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_resize_keeps_queued_work() {
        let probe = Arc::new(Probe {
            delay: Duration::from_millis(10),
            ..Probe::default()
        });
        let scheduler = SingleFlightScheduler::new(probe.clone(), 2).unwrap();
        assert_eq!(scheduler.workers(), 2);

        for id in 1..=6 {
            scheduler.submit(RequestId(id));
        }
        scheduler.set_workers(1);
        assert_eq!(scheduler.workers(), 1);
        scheduler.set_workers(3);
        scheduler.wait_idle().await;

        let mut ran = probe.order.lock().unwrap().clone();
        ran.sort();
        assert_eq!(ran, (1..=6).map(RequestId).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_zero_workers_means_one() {
        let scheduler = SingleFlightScheduler::new(Arc::new(Probe::default()), 0).unwrap();
        assert_eq!(scheduler.workers(), 1);
    }
}
