//! Bounded dispatch queue and its single consumer.

use super::stats::DispatchStats;
use super::{DispatchConfig, DispatchItem};
use crate::error::{HuskyError, HuskyResult};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// How long a dequeue may wait for an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Wait up to the given duration.
    Timeout(Duration),
    /// Return immediately.
    Poll,
    /// Block until an item arrives or every producer is gone.
    Forever,
}

/// Create a dispatch queue: a cloneable producer handle and the one worker.
pub fn dispatch_queue(config: DispatchConfig) -> (Dispatcher, DispatchWorker) {
    let (tx, rx) = mpsc::channel(config.capacity.max(1));
    let stats = config
        .telemetry
        .then(|| DispatchStats::new(config.report_interval));
    let worker = DispatchWorker {
        rx,
        batch: config.batch.max(1),
        tick: config.tick,
        slow_threshold: config.slow_threshold,
        stats,
    };
    (Dispatcher { tx }, worker)
}

/// Producer side of the dispatch queue.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<DispatchItem>,
}

impl Dispatcher {
    /// Append an item, waiting while the queue is full.
    pub async fn enqueue(&self, item: DispatchItem) -> HuskyResult<()> {
        self.tx.send(item).await.map_err(|_| HuskyError::QueueClosed)
    }

    /// Append an item from outside the async runtime, blocking the thread
    /// while the queue is full.
    pub fn blocking_enqueue(&self, item: DispatchItem) -> HuskyResult<()> {
        self.tx.blocking_send(item).map_err(|_| HuskyError::QueueClosed)
    }

    /// Items currently waiting in the queue.
    pub fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

/// Consumer side of the dispatch queue. There is exactly one per queue.
pub struct DispatchWorker {
    rx: mpsc::Receiver<DispatchItem>,
    batch: usize,
    tick: Duration,
    slow_threshold: Duration,
    stats: Option<DispatchStats>,
}

impl DispatchWorker {
    /// Take the next item, waiting according to `wait`.
    pub async fn dequeue(&mut self, wait: Wait) -> Option<DispatchItem> {
        match wait {
            Wait::Timeout(d) => tokio::time::timeout(d, self.rx.recv()).await.ok().flatten(),
            Wait::Poll => self.rx.try_recv().ok(),
            Wait::Forever => self.rx.recv().await,
        }
    }

    /// Drain up to one batch, each dequeue bounded by the tick budget.
    /// Returns the number of items executed.
    pub async fn run_once(&mut self) -> usize {
        let mut done = 0;
        while done < self.batch {
            let Some(item) = self.dequeue(Wait::Timeout(self.tick)).await else {
                break;
            };
            self.execute(item);
            done += 1;
        }
        if let Some(stats) = self.stats.as_mut() {
            stats.maybe_report(Instant::now());
        }
        done
    }

    /// Run one item in isolation: a panicking hook or handler is logged and
    /// does not take the worker down.
    pub fn execute(&mut self, item: DispatchItem) {
        let id = item.id().to_string();
        let started = Instant::now();

        if let Err(panic) = catch_unwind(AssertUnwindSafe(move || item.run())) {
            error!(msg_id = %id, panic = %panic_message(&*panic), "handler panicked");
        }

        let elapsed = started.elapsed();
        if elapsed > self.slow_threshold {
            warn!(msg_id = %id, elapsed_ms = elapsed.as_millis() as u64, "slow handler");
        }
        if let Some(stats) = self.stats.as_mut() {
            stats.record(&id, elapsed);
        }
    }

    /// Loop until shutdown is signalled or every producer is dropped, then
    /// run whatever is already queued.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(batch = self.batch, tick_ms = self.tick.as_millis() as u64, "dispatch worker started");
        loop {
            if self.rx.is_closed() && self.rx.is_empty() {
                break;
            }
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = self.run_once() => {}
            }
        }

        let mut drained = 0;
        while let Some(item) = self.dequeue(Wait::Poll).await {
            self.execute(item);
            drained += 1;
        }
        debug!(drained, "dispatch worker drained");
        info!("dispatch worker stopped");
    }

    pub fn stats(&self) -> Option<&DispatchStats> {
        self.stats.as_ref()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
