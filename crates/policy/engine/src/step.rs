//! Dispatch-step tracking for one event propagation wave.
//!
//! Every edge traversal increments the step's counter on entry and decrements
//! it on exit. Revisiting a `(tag, input event)` pair that is still on the
//! in-flight path raises a cycle error; a diamond graph, where the same block
//! is reached twice over disjoint paths, does not. When the counter returns
//! to zero a debounce timer fires the completion callback exactly once, so a
//! burst of nested propagation collapses into one downstream notification.

use chrono::{DateTime, Utc};
use policy_types::{BlockTag, InputEvent, PolicyError, PolicyResult};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Default debounce window before the completion callback fires.
pub const FINISH_DEBOUNCE: Duration = Duration::from_secs(1);

type FinishCallback = Box<dyn FnOnce() + Send + 'static>;

struct StepInner {
    counter: i64,
    /// Bumped on every zero-crossing so stale debounce timers no-op
    epoch: u64,
    visited: HashSet<(BlockTag, InputEvent)>,
}

/// Coordination token for one wave of event propagation.
pub struct DispatchStep {
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// Deliver actions inline rather than queueing them
    pub sync_actions: bool,
    /// Record traversed edges for replay tooling
    pub with_history: bool,
    debounce: Duration,
    inner: Mutex<StepInner>,
    finished: AtomicBool,
    on_finish: Mutex<Option<FinishCallback>>,
    history: Mutex<Vec<(BlockTag, InputEvent)>>,
}

impl DispatchStep {
    pub fn new(on_finish: FinishCallback) -> Arc<Self> {
        Self::with_debounce(FINISH_DEBOUNCE, false, on_finish)
    }

    /// A step that records every traversed edge, for replay tooling.
    pub fn recording(on_finish: FinishCallback) -> Arc<Self> {
        Self::with_debounce(FINISH_DEBOUNCE, true, on_finish)
    }

    pub fn with_debounce(
        debounce: Duration,
        with_history: bool,
        on_finish: FinishCallback,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            sync_actions: true,
            with_history,
            debounce,
            inner: Mutex::new(StepInner {
                counter: 0,
                epoch: 0,
                visited: HashSet::new(),
            }),
            finished: AtomicBool::new(false),
            on_finish: Mutex::new(Some(on_finish)),
            history: Mutex::new(Vec::new()),
        })
    }

    /// Guard the root of a wave: counts like an edge, no cycle entry.
    pub fn begin(&self) {
        let mut inner = self.inner.lock().expect("step lock poisoned");
        inner.counter += 1;
    }

    /// Close the root guard; schedules the debounce when the wave drained.
    pub fn end(self: &Arc<Self>) {
        self.decrement();
    }

    /// Enter one edge. Fails on a revisit that is still in flight.
    pub fn enter(&self, tag: &BlockTag, event: InputEvent) -> PolicyResult<()> {
        let mut inner = self.inner.lock().expect("step lock poisoned");
        if !inner.visited.insert((tag.clone(), event)) {
            return Err(PolicyError::EventLoop {
                tag: tag.clone(),
                event: event.as_str().to_string(),
            });
        }
        inner.counter += 1;
        drop(inner);

        if self.with_history {
            self.history
                .lock()
                .expect("history lock poisoned")
                .push((tag.clone(), event));
        }
        Ok(())
    }

    /// Leave one edge; the pair becomes revisitable again.
    pub fn exit(self: &Arc<Self>, tag: &BlockTag, event: InputEvent) {
        {
            let mut inner = self.inner.lock().expect("step lock poisoned");
            inner.visited.remove(&(tag.clone(), event));
        }
        self.decrement();
    }

    fn decrement(self: &Arc<Self>) {
        let epoch = {
            let mut inner = self.inner.lock().expect("step lock poisoned");
            inner.counter -= 1;
            if inner.counter > 0 {
                return;
            }
            inner.epoch += 1;
            inner.epoch
        };

        let step = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(step.debounce).await;
            let still_idle = {
                let inner = step.inner.lock().expect("step lock poisoned");
                inner.counter == 0 && inner.epoch == epoch
            };
            if still_idle {
                step.finish();
            }
        });
    }

    /// Fire the completion callback. Safe to call any number of times; only
    /// the first call does anything.
    pub fn finish(&self) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        let callback = self
            .on_finish
            .lock()
            .expect("finish lock poisoned")
            .take();
        if let Some(callback) = callback {
            callback();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Edges traversed so far, when history recording is on.
    pub fn history(&self) -> Vec<(BlockTag, InputEvent)> {
        self.history.lock().expect("history lock poisoned").clone()
    }
}
