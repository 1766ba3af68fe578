//! Bounded worker pool for background cache rebuilds
//!
//! Core workers start with the scheduler and pull jobs from a bounded queue.
//! When the queue is full an overflow worker is started, up to
//! `max_workers`; overflow workers exit after `keep_alive` without work. Once
//! every worker is busy and the queue is full, the job runs on the submitting
//! task instead of being dropped.

use crate::config::schema::RebuildConfig;
use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinSet;
use tracing::{debug, error, info_span, warn, Instrument};

/// A deferred rebuild, already bound to its key, loader and write parameters
pub type RebuildJob = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// What happened to a submitted job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Placed on the queue for an idle worker
    Queued,
    /// Queue was full; handed to a newly started overflow worker
    OverflowWorker,
    /// Pool saturated; ran to completion on the submitting task
    CallerRan,
    /// Scheduler is shut down; the job was dropped
    Rejected,
}

/// Point-in-time counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub workers: usize,
    pub queued: usize,
    pub pending: usize,
    pub completed: u64,
    pub panicked: u64,
    pub caller_ran: u64,
    pub rejected: u64,
}

struct Shared {
    receiver: Mutex<mpsc::Receiver<RebuildJob>>,
    workers: AtomicUsize,
    pending: AtomicUsize,
    completed: AtomicU64,
    panicked: AtomicU64,
    caller_ran: AtomicU64,
    rejected: AtomicU64,
    idle: Notify,
}

impl Shared {
    async fn execute(&self, job: RebuildJob) {
        match AssertUnwindSafe(job).catch_unwind().await {
            Ok(()) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.panicked.fetch_add(1, Ordering::Relaxed);
                error!("Rebuild job panicked");
            }
        }
        self.finish_one();
    }

    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }

    async fn next_job(&self, idle_timeout: Option<Duration>) -> Option<RebuildJob> {
        let recv = async { self.receiver.lock().await.recv().await };
        match idle_timeout {
            None => recv.await,
            Some(timeout) => tokio::time::timeout(timeout, recv).await.ok().flatten(),
        }
    }
}

/// Bounded rebuild worker pool with caller-runs backpressure
pub struct RebuildScheduler {
    config: RebuildConfig,
    sender: Mutex<Option<mpsc::Sender<RebuildJob>>>,
    shared: Arc<Shared>,
    tasks: Mutex<JoinSet<()>>,
    next_worker_id: AtomicUsize,
}

impl RebuildScheduler {
    /// Start the core workers. Must be called from within a tokio runtime.
    pub fn new(config: RebuildConfig) -> Self {
        let config = config.normalized();
        let (sender, receiver) = mpsc::channel(config.queue_capacity);

        let shared = Arc::new(Shared {
            receiver: Mutex::new(receiver),
            workers: AtomicUsize::new(config.core_workers),
            pending: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            panicked: AtomicU64::new(0),
            caller_ran: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            idle: Notify::new(),
        });

        let mut tasks = JoinSet::new();
        for id in 1..=config.core_workers {
            let name = format!("{}{}", config.worker_name_prefix, id);
            tasks.spawn(worker(Arc::clone(&shared), name, None, None));
        }

        debug!(
            "Rebuild scheduler started: core={}, max={}, queue={}",
            config.core_workers, config.max_workers, config.queue_capacity
        );

        Self {
            next_worker_id: AtomicUsize::new(config.core_workers + 1),
            config,
            sender: Mutex::new(Some(sender)),
            shared,
            tasks: Mutex::new(tasks),
        }
    }

    /// The effective configuration
    pub fn config(&self) -> &RebuildConfig {
        &self.config
    }

    /// Submit a rebuild job without waiting for it, unless the pool is saturated
    pub async fn submit(&self, job: RebuildJob) -> SubmitOutcome {
        let Some(sender) = self.sender.lock().await.clone() else {
            return self.reject();
        };

        self.shared.pending.fetch_add(1, Ordering::AcqRel);

        match sender.try_send(job) {
            Ok(()) => SubmitOutcome::Queued,
            Err(TrySendError::Full(job)) => {
                drop(sender);
                if self.reserve_overflow_worker() {
                    let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
                    let name = format!("{}{}", self.config.worker_name_prefix, id);
                    let overflow = worker(
                        Arc::clone(&self.shared),
                        name,
                        Some(job),
                        Some(self.config.keep_alive()),
                    );
                    self.tasks.lock().await.spawn(overflow);
                    SubmitOutcome::OverflowWorker
                } else {
                    debug!("Rebuild pool saturated, running job on caller");
                    self.shared.caller_ran.fetch_add(1, Ordering::Relaxed);
                    self.shared.execute(job).await;
                    SubmitOutcome::CallerRan
                }
            }
            Err(TrySendError::Closed(_)) => {
                self.shared.finish_one();
                self.reject()
            }
        }
    }

    /// Wait until every submitted job has finished
    pub async fn wait_idle(&self) {
        loop {
            let idle = self.shared.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();

            if self.shared.pending.load(Ordering::Acquire) == 0 {
                return;
            }
            idle.await;
        }
    }

    /// Stop accepting jobs, drain the queue and join all workers
    pub async fn shutdown(&self) {
        self.sender.lock().await.take();

        let mut tasks = self.tasks.lock().await;
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                warn!("Rebuild worker ended abnormally: {}", e);
            }
        }
        debug!("Rebuild scheduler shut down");
    }

    /// Current counters
    pub fn stats(&self) -> SchedulerStats {
        let queued = self
            .sender
            .try_lock()
            .ok()
            .and_then(|s| s.as_ref().map(|s| s.max_capacity() - s.capacity()))
            .unwrap_or(0);

        SchedulerStats {
            workers: self.shared.workers.load(Ordering::Relaxed),
            queued,
            pending: self.shared.pending.load(Ordering::Relaxed),
            completed: self.shared.completed.load(Ordering::Relaxed),
            panicked: self.shared.panicked.load(Ordering::Relaxed),
            caller_ran: self.shared.caller_ran.load(Ordering::Relaxed),
            rejected: self.shared.rejected.load(Ordering::Relaxed),
        }
    }

    fn reject(&self) -> SubmitOutcome {
        warn!("Rebuild scheduler is shut down, dropping job");
        self.shared.rejected.fetch_add(1, Ordering::Relaxed);
        SubmitOutcome::Rejected
    }

    fn reserve_overflow_worker(&self) -> bool {
        let max = self.config.max_workers;
        self.shared
            .workers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .is_ok()
    }
}

fn worker(
    shared: Arc<Shared>,
    name: String,
    first: Option<RebuildJob>,
    idle_timeout: Option<Duration>,
) -> impl Future<Output = ()> + Send + 'static {
    async move {
        if let Some(job) = first {
            shared.execute(job).await;
        }
        while let Some(job) = shared.next_job(idle_timeout).await {
            shared.execute(job).await;
        }
        shared.workers.fetch_sub(1, Ordering::AcqRel);
        debug!("Worker exiting");
    }
    .instrument(info_span!("rebuild_worker", worker = %name))
}
