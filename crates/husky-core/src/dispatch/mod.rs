//! Dispatch engine: a bounded FIFO of work items drained by one worker.
//!
//! # Model
//!
//! - Many producers (one reader task per connection) call
//!   [`Dispatcher::enqueue`]; a full queue makes them wait.
//! - Exactly one [`DispatchWorker`] drains the queue in batches. Items run in
//!   enqueue order, hook first, then the handler unless the hook failed the
//!   context.
//! - The worker owns its telemetry ([`stats::DispatchStats`]), so no other
//!   task ever touches it.

pub mod queue;
pub mod stats;

pub use queue::{dispatch_queue, DispatchWorker, Dispatcher, Wait};
pub use stats::DispatchStats;

use crate::context::Context;
use crate::registry::Hook;
use std::time::Duration;

/// Default queue capacity.
pub const DEFAULT_CAPACITY: usize = 16 << 10;
/// Default number of items drained per tick.
pub const DEFAULT_BATCH: usize = 256;
/// Default wait budget of each dequeue within a tick.
pub const DEFAULT_TICK: Duration = Duration::from_millis(40);
/// Default telemetry reporting window.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(10 * 60);
/// Default threshold above which a single item is logged as slow.
pub const DEFAULT_SLOW_THRESHOLD: Duration = Duration::from_millis(100);

/// Dispatch engine tuning.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub capacity: usize,
    pub batch: usize,
    pub tick: Duration,
    /// Track per-message cost and call rate.
    pub telemetry: bool,
    pub report_interval: Duration,
    pub slow_threshold: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            batch: DEFAULT_BATCH,
            tick: DEFAULT_TICK,
            telemetry: false,
            report_interval: DEFAULT_REPORT_INTERVAL,
            slow_threshold: DEFAULT_SLOW_THRESHOLD,
        }
    }
}

type Job = Box<dyn FnOnce(&mut Context) + Send>;

/// One unit of work: a context, an optional hook and a handler with its
/// arguments already bound.
pub struct DispatchItem {
    id: String,
    hook: Option<Hook>,
    handler: Job,
    ctx: Context,
}

impl DispatchItem {
    /// Wrap `handler` for `ctx`. The item is tracked under `ctx.msg_id`.
    pub fn new<F>(ctx: Context, handler: F) -> Self
    where
        F: FnOnce(&mut Context) + Send + 'static,
    {
        Self {
            id: ctx.msg_id.clone(),
            hook: None,
            handler: Box::new(handler),
            ctx,
        }
    }

    pub fn with_hook(mut self, hook: Hook) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Message id used for telemetry.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Run the hook, then the handler unless the hook failed the context.
    pub(crate) fn run(self) {
        let DispatchItem {
            hook,
            handler,
            mut ctx,
            ..
        } = self;
        if let Some(hook) = hook {
            hook(&mut ctx);
        }
        if !ctx.is_failed() {
            handler(&mut ctx);
        }
    }
}
