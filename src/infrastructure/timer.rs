use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

/// Cancelable one-shot/periodic scheduler.
///
/// A `Timer` owns at most one pending firing at a time: arming it again
/// cancels whatever was previously scheduled. The retry counter `tries`
/// increments each time a scheduled one-shot fires and is zeroed by
/// [`reset`](Self::reset); backoff callers receive the 1-based attempt
/// number about to run.
///
/// Clones share the same underlying timer.
#[derive(Clone, Default)]
pub struct Timer {
    inner: Arc<Mutex<TimerInner>>,
}

#[derive(Default)]
struct TimerInner {
    tries: u32,
    handle: Option<JoinHandle<()>>,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times a scheduled one-shot has fired since the last reset.
    pub fn tries(&self) -> u32 {
        self.inner.lock().unwrap().tries
    }

    /// Cancel any pending firing and zero the retry counter.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.tries = 0;
        if let Some(handle) = inner.handle.take() {
            handle.abort();
        }
    }

    /// Arm a one-shot firing of `f` after `backoff(attempt)`, where `attempt`
    /// is the 1-based attempt number. Re-arming from within `f` is how
    /// unbounded retry-with-backoff loops are built; callers are responsible
    /// for eventually calling [`reset`](Self::reset).
    pub fn schedule<F, B>(&self, f: F, backoff: B)
    where
        F: FnOnce() + Send + 'static,
        B: FnOnce(u32) -> Duration,
    {
        let mut inner = self.inner.lock().unwrap();
        if let Some(handle) = inner.handle.take() {
            handle.abort();
        }

        let attempt = inner.tries + 1;
        let delay = backoff(attempt);
        let shared = Arc::clone(&self.inner);
        inner.handle = Some(tokio::spawn(async move {
            time::sleep(delay).await;
            shared.lock().unwrap().tries = attempt;
            f();
        }));
    }

    /// Arm a fixed-period repeating firing of `f`. The period is sampled
    /// once at arm time, not per tick.
    pub fn interval<F, P>(&self, f: F, period: P)
    where
        F: Fn() + Send + 'static,
        P: FnOnce() -> Duration,
    {
        let mut inner = self.inner.lock().unwrap();
        if let Some(handle) = inner.handle.take() {
            handle.abort();
        }

        let period = period();
        inner.handle = Some(tokio::spawn(async move {
            let start = time::Instant::now() + period;
            let mut ticker = time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                f();
            }
        }));
    }
}

impl Drop for TimerInner {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
