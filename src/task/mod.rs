// Background task engine.
//
// Every user-visible operation against the remote service or the player
// file runs as one spawned task built on this module: a `Task` impl driven
// by `run_task`, reporting through a generation-tagged mpsc channel and
// cancelled cooperatively through a shared atomic flag.
//
// The flag and the event channel are the only signals that cross the task
// boundary. Cancellation is polled at loop-iteration boundaries and inside
// every pacing sleep; in-flight network calls are bounded by the HTTP
// client's own timeout, so observing a cancel request never takes longer
// than one sleep slice plus one request timeout.

pub mod add;
pub mod games;
pub mod load;
pub mod refresh;
pub mod remove;

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::api::RateLimitInfo;
use crate::config::Config;
use crate::protocol::{DetailInfo, GamesSummary, RowState, TaskEvent, TaskOutcome};

/// Pacing sleeps are cut into this many slices with a cancellation check
/// before each, so a cancel request is honored within one slice.
const SLEEP_SLICES: u32 = 10;

/// Upper bound on one sleep slice, keeping cancellation latency small even
/// when a pacing interval is configured long.
const MAX_SLEEP_SLICE: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// CancelToken
// ---------------------------------------------------------------------------

/// Cooperative cancellation flag, shared between the app loop and one task.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    /// Request cancellation. Callable from any context, any number of times.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// TaskContext
// ---------------------------------------------------------------------------

/// Everything a task body needs from its environment: pacing intervals,
/// the event channel, the cancellation flag, and its generation tag.
pub struct TaskContext {
    single_interval: Duration,
    group_interval: Duration,
    events: mpsc::Sender<TaskEvent>,
    cancel: CancelToken,
    generation: u64,
}

impl TaskContext {
    pub fn new(
        config: &Config,
        events: mpsc::Sender<TaskEvent>,
        cancel: CancelToken,
        generation: u64,
    ) -> Self {
        TaskContext {
            single_interval: config.single_request_interval(),
            group_interval: config.group_request_interval(),
            events,
            cancel,
            generation,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Sleep for `duration`, checking for cancellation before every slice.
    /// Returns `false` as soon as cancellation is observed.
    pub async fn sleep_cancellable(&self, duration: Duration) -> bool {
        let slice = (duration / SLEEP_SLICES).min(MAX_SLEEP_SLICE);
        let mut remaining = duration;
        while !remaining.is_zero() {
            if self.cancel.is_cancelled() {
                return false;
            }
            if slice.is_zero() {
                break;
            }
            let step = remaining.min(slice);
            tokio::time::sleep(step).await;
            remaining -= step;
        }
        !self.cancel.is_cancelled()
    }

    /// Rate-limit pause between consecutive remote calls.
    pub async fn pace_single(&self) -> bool {
        self.sleep_cancellable(self.single_interval).await
    }

    /// Longer pause between logical groups of calls (pages).
    pub async fn pace_group(&self) -> bool {
        self.sleep_cancellable(self.group_interval).await
    }

    pub async fn progress(&self, current: usize, maximum: usize) {
        let _ = self
            .events
            .send(TaskEvent::Progress {
                current,
                maximum,
                generation: self.generation,
            })
            .await;
    }

    pub async fn row(&self, index: usize, state: RowState) {
        let _ = self
            .events
            .send(TaskEvent::Row {
                index,
                state,
                generation: self.generation,
            })
            .await;
    }

    /// Forward rate-limit headers when the remote call carried them.
    pub async fn rate_limit(&self, info: Option<RateLimitInfo>) {
        if let Some(info) = info {
            let _ = self
                .events
                .send(TaskEvent::RateLimit {
                    remaining: info.remaining,
                    limit: info.limit,
                    generation: self.generation,
                })
                .await;
        }
    }

    pub async fn games(&self, summary: GamesSummary) {
        let _ = self
            .events
            .send(TaskEvent::Games {
                summary,
                generation: self.generation,
            })
            .await;
    }

    pub async fn detail(&self, info: DetailInfo) {
        let _ = self
            .events
            .send(TaskEvent::Detail {
                info,
                generation: self.generation,
            })
            .await;
    }
}

// ---------------------------------------------------------------------------
// Task trait and driver
// ---------------------------------------------------------------------------

/// One cancellable background job.
///
/// Bodies must poll `ctx.is_cancelled()` at every loop-iteration boundary
/// and use the context's pacing sleeps, and must treat cancellation as a
/// controlled return carrying the counts of work actually attempted.
#[async_trait]
pub trait Task: Send {
    /// Short description announced when the task starts.
    fn label(&self) -> String;

    async fn run(&mut self, ctx: &TaskContext) -> TaskOutcome;
}

/// Drive one task to completion: announce it, run the body, and emit the
/// terminal event exactly once, whether the body returned normally,
/// returned early on cancellation, or panicked.
pub async fn run_task(mut task: Box<dyn Task>, ctx: TaskContext) {
    let label = task.label();
    let generation = ctx.generation;
    info!("task started: {label} (gen {generation})");

    let _ = ctx
        .events
        .send(TaskEvent::Started {
            label: label.clone(),
            generation,
        })
        .await;

    let outcome = match AssertUnwindSafe(task.run(&ctx)).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(_) => {
            error!("task panicked: {label}");
            TaskOutcome::new(format!("{label} failed unexpectedly"), 0, 1)
        }
    };

    info!(
        "task finished: {label}: {} ({}/{})",
        outcome.message, outcome.success, outcome.total
    );
    let _ = ctx
        .events
        .send(TaskEvent::Finished {
            outcome,
            generation,
        })
        .await;
}

/// Spawn a task onto the runtime. The returned handle is for liveness
/// checks; cancellation goes through the `CancelToken`, never `abort`.
pub fn spawn(task: impl Task + 'static, ctx: TaskContext) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run_task(Box::new(task), ctx))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn test_context(
        cancel: CancelToken,
        intervals_secs: f64,
    ) -> (TaskContext, mpsc::Receiver<TaskEvent>) {
        let mut config = Config::default();
        config.tracker.single_request_interval = intervals_secs;
        config.tracker.group_request_interval = intervals_secs;
        let (tx, rx) = mpsc::channel(64);
        (TaskContext::new(&config, tx, cancel, 1), rx)
    }

    #[test]
    fn cancel_token_flips_once_set() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
        // Clones observe the same flag.
        let clone = token.clone();
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn sleep_completes_when_not_cancelled() {
        let (ctx, _rx) = test_context(CancelToken::new(), 0.0);
        assert!(ctx.sleep_cancellable(Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn zero_sleep_returns_immediately() {
        let (ctx, _rx) = test_context(CancelToken::new(), 0.0);
        assert!(ctx.sleep_cancellable(Duration::ZERO).await);
    }

    #[tokio::test]
    async fn pre_cancelled_sleep_returns_false_without_sleeping() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let (ctx, _rx) = test_context(cancel, 0.0);

        let start = Instant::now();
        assert!(!ctx.sleep_cancellable(Duration::from_secs(10)).await);
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn sleep_observes_cancellation_within_one_slice() {
        let cancel = CancelToken::new();
        let (ctx, _rx) = test_context(cancel.clone(), 0.0);

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let start = Instant::now();
        // A full sleep would be 2 s; slices are capped at 100 ms. The
        // cancel lands at ~20 ms, so the sleep must end shortly after.
        assert!(!ctx.sleep_cancellable(Duration::from_secs(2)).await);
        assert!(
            start.elapsed() < Duration::from_millis(1000),
            "cancel was not honored within a slice: {:?}",
            start.elapsed()
        );

        canceller.await.unwrap();
    }

    // -- run_task driver --

    struct ScriptedTask {
        outcome: TaskOutcome,
        poll_cancel: bool,
    }

    #[async_trait]
    impl Task for ScriptedTask {
        fn label(&self) -> String {
            "scripted".into()
        }

        async fn run(&mut self, ctx: &TaskContext) -> TaskOutcome {
            if self.poll_cancel && ctx.is_cancelled() {
                return TaskOutcome::new("cancelled", 0, 0);
            }
            ctx.progress(1, 1).await;
            self.outcome.clone()
        }
    }

    struct PanickingTask;

    #[async_trait]
    impl Task for PanickingTask {
        fn label(&self) -> String {
            "doomed".into()
        }

        async fn run(&mut self, _ctx: &TaskContext) -> TaskOutcome {
            panic!("body blew up");
        }
    }

    async fn drain(mut rx: mpsc::Receiver<TaskEvent>) -> Vec<TaskEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn driver_emits_started_then_finished_exactly_once() {
        let (ctx, rx) = test_context(CancelToken::new(), 0.0);
        let task = ScriptedTask {
            outcome: TaskOutcome::new("done", 1, 1),
            poll_cancel: false,
        };

        run_task(Box::new(task), ctx).await;
        let events = drain(rx).await;

        assert!(matches!(events[0], TaskEvent::Started { .. }));
        assert!(matches!(events.last(), Some(TaskEvent::Finished { .. })));
        let finished = events
            .iter()
            .filter(|e| matches!(e, TaskEvent::Finished { .. }))
            .count();
        assert_eq!(finished, 1);
    }

    #[tokio::test]
    async fn driver_emits_finished_once_under_cancellation() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let (ctx, rx) = test_context(cancel, 0.0);
        let task = ScriptedTask {
            outcome: TaskOutcome::new("done", 1, 1),
            poll_cancel: true,
        };

        run_task(Box::new(task), ctx).await;
        let events = drain(rx).await;

        let finished: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                TaskEvent::Finished { outcome, .. } => Some(outcome.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].message, "cancelled");
    }

    #[tokio::test]
    async fn driver_emits_failure_outcome_when_body_panics() {
        let (ctx, rx) = test_context(CancelToken::new(), 0.0);

        run_task(Box::new(PanickingTask), ctx).await;
        let events = drain(rx).await;

        match events.last() {
            Some(TaskEvent::Finished { outcome, .. }) => {
                assert_eq!(outcome.success, 0);
                assert_eq!(outcome.total, 1);
                assert!(outcome.message.contains("failed unexpectedly"));
            }
            other => panic!("expected Finished, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn events_carry_the_context_generation() {
        let (ctx, rx) = test_context(CancelToken::new(), 0.0);
        let task = ScriptedTask {
            outcome: TaskOutcome::new("done", 1, 1),
            poll_cancel: false,
        };

        run_task(Box::new(task), ctx).await;
        for event in drain(rx).await {
            assert_eq!(event.generation(), 1);
        }
    }
}
