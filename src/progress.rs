//! Progress events and the single-channel reporter both executors share.
//!
//! Inject an [`Arc<dyn CompressionProgressCallback>`] per call (or as the
//! config default via
//! [`crate::config::CompressorConfigBuilder::progress_callback`]) to receive
//! [`ProgressEvent`]s as a compression runs.
//!
//! # Ordering guarantees
//!
//! The [`ProgressReporter`] sits between the executors and the caller's
//! callback and enforces, per invocation:
//!
//! * within one attempt, `percent` never decreases and stays below 100;
//! * a fallback attempt starts a fresh counter with a different `mode` tag,
//!   and late reports from the abandoned attempt are dropped;
//! * the terminal 100% event is emitted exactly once, by the dispatcher,
//!   after the result has been normalised;
//! * once the reporter is closed (failure or abort) nothing else is forwarded.
//!
//! Callbacks are delivered one at a time. [`ProgressReporter::close`] and
//! [`ProgressReporter::finish`] wait for a delivery in flight on another
//! thread, so no stale event can arrive after them.
//!
//! # Example
//!
//! ```rust
//! use convertmorph_compress::{progress_fn, ProgressEvent};
//!
//! let cb = progress_fn(|e: &ProgressEvent| {
//!     eprintln!("[{}] {:>3}% {}", e.mode, e.percent, e.message);
//! });
//! # let _ = cb;
//! ```

use crate::pipeline::classify::ExecutionMode;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// One normalised progress update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Execution mode of the attempt that produced this event.
    pub mode: ExecutionMode,
    /// 0–100, non-decreasing within one attempt.
    pub percent: u8,
    /// Human-readable stage description.
    pub message: String,
    /// Rough remaining time, e.g. `"12s"`. Absent until some progress exists.
    pub estimated_time_remaining: Option<String>,
    /// True for events from the fallback attempt.
    pub is_fallback: bool,
}

/// Receives progress from the dispatcher.
///
/// Implementations must be `Send + Sync`: the local executor reports from a
/// blocking worker thread. All methods have default no-op implementations.
pub trait CompressionProgressCallback: Send + Sync {
    /// Called for every forwarded progress event.
    fn on_progress(&self, event: &ProgressEvent) {
        let _ = event;
    }

    /// Called once when the first attempt failed and the other mode is tried.
    ///
    /// # Arguments
    /// * `from`   — mode of the failed attempt
    /// * `to`     — mode of the fallback attempt
    /// * `reason` — display form of the first attempt's error
    fn on_fallback(&self, from: ExecutionMode, to: ExecutionMode, reason: &str) {
        let _ = (from, to, reason);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl CompressionProgressCallback for NoopProgressCallback {}

/// Convenience alias for the shared callback type.
pub type ProgressCallback = Arc<dyn CompressionProgressCallback>;

/// Adapts a closure into a [`ProgressCallback`].
pub struct FnProgressCallback<F>(F);

impl<F> CompressionProgressCallback for FnProgressCallback<F>
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: &ProgressEvent) {
        (self.0)(event)
    }
}

/// Wrap a closure as a progress callback.
pub fn progress_fn<F>(f: F) -> ProgressCallback
where
    F: Fn(&ProgressEvent) + Send + Sync + 'static,
{
    Arc::new(FnProgressCallback(f))
}

// ── Reporter ─────────────────────────────────────────────────────────────

struct ReporterState {
    generation: u64,
    mode: ExecutionMode,
    is_fallback: bool,
    attempt_started: Instant,
    last_percent: Option<u8>,
    finished: bool,
    closed: bool,
    /// Thread currently inside the callback, if any.
    emitter: Option<ThreadId>,
}

struct Shared {
    callback: ProgressCallback,
    state: Mutex<ReporterState>,
    /// Held for the whole of one callback delivery.
    emit: Mutex<()>,
}

/// Clears [`ReporterState::emitter`] even if the callback panics.
struct Emitting<'a>(&'a ProgressReporter);

impl Drop for Emitting<'_> {
    fn drop(&mut self) {
        self.0.lock().emitter = None;
    }
}

/// Per-invocation progress channel.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ProgressReporter {
    shared: Arc<Shared>,
}

impl ProgressReporter {
    pub fn new(callback: ProgressCallback) -> Self {
        Self {
            shared: Arc::new(Shared {
                callback,
                state: Mutex::new(ReporterState {
                    generation: 0,
                    mode: ExecutionMode::Local,
                    is_fallback: false,
                    attempt_started: Instant::now(),
                    last_percent: None,
                    finished: false,
                    closed: false,
                    emitter: None,
                }),
                emit: Mutex::new(()),
            }),
        }
    }

    /// A reporter that forwards nowhere.
    pub fn noop() -> Self {
        Self::new(Arc::new(NoopProgressCallback))
    }

    fn lock(&self) -> MutexGuard<'_, ReporterState> {
        // A panicking callback must not wedge every later report.
        self.shared.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Wait for this thread's turn to deliver. `None` when the callback is
    /// already running on this thread and calls back into the reporter.
    fn emit_turn(&self) -> Option<MutexGuard<'_, ()>> {
        if self.lock().emitter == Some(thread::current().id()) {
            return None;
        }
        Some(self.shared.emit.lock().unwrap_or_else(|p| p.into_inner()))
    }

    /// Build an item under the state lock and hand it to the callback while
    /// holding the delivery turn.
    fn emit<T>(
        &self,
        build: impl FnOnce(&mut ReporterState) -> Option<T>,
        deliver: impl FnOnce(&dyn CompressionProgressCallback, &T),
    ) {
        let turn = self.emit_turn();
        let item = {
            let mut st = self.lock();
            let Some(item) = build(&mut st) else {
                return;
            };
            if turn.is_some() {
                st.emitter = Some(thread::current().id());
            }
            item
        };
        let _emitting = turn.as_ref().map(|_| Emitting(self));
        deliver(self.shared.callback.as_ref(), &item);
    }

    /// Start a new attempt: resets the percent counter and retags events.
    ///
    /// Handles from earlier attempts stop forwarding.
    pub fn begin_attempt(&self, mode: ExecutionMode, is_fallback: bool) -> AttemptProgress {
        let mut st = self.lock();
        st.generation += 1;
        st.mode = mode;
        st.is_fallback = is_fallback;
        st.attempt_started = Instant::now();
        st.last_percent = None;
        AttemptProgress {
            reporter: self.clone(),
            generation: st.generation,
            mode,
        }
    }

    /// Notify the callback that the dispatcher is switching modes.
    pub fn fallback(&self, from: ExecutionMode, to: ExecutionMode, reason: &str) {
        self.emit(
            |st| (!st.closed).then_some(()),
            |cb, _| cb.on_fallback(from, to, reason),
        );
    }

    /// Emit the terminal 100% event. Only the first call has any effect.
    pub fn finish(&self, message: impl Into<String>) {
        let message = message.into();
        self.emit(
            |st| {
                if st.finished || st.closed {
                    return None;
                }
                st.finished = true;
                st.last_percent = Some(100);
                Some(ProgressEvent {
                    mode: st.mode,
                    percent: 100,
                    message,
                    estimated_time_remaining: None,
                    is_fallback: st.is_fallback,
                })
            },
            |cb, event| cb.on_progress(event),
        );
    }

    /// Stop forwarding events for good.
    ///
    /// Returns once any delivery running on another thread has completed.
    pub fn close(&self) {
        let _turn = self.emit_turn();
        self.lock().closed = true;
    }

    /// Close the reporter when the returned guard is dropped.
    pub(crate) fn close_on_drop(&self) -> CloseOnDrop {
        CloseOnDrop(self.clone())
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn report(&self, generation: u64, percent: u8, message: String) {
        self.emit(
            |st| {
                if st.closed || st.finished || st.generation != generation {
                    return None;
                }
                let floor = st.last_percent.unwrap_or(0);
                let percent = percent.min(99).max(floor);
                st.last_percent = Some(percent);
                Some(ProgressEvent {
                    mode: st.mode,
                    percent,
                    message,
                    estimated_time_remaining: estimate_remaining(st.attempt_started.elapsed(), percent)
                        .map(format_eta),
                    is_fallback: st.is_fallback,
                })
            },
            |cb, event| cb.on_progress(event),
        );
    }

    fn is_current(&self, generation: u64) -> bool {
        let st = self.lock();
        !st.closed && !st.finished && st.generation == generation
    }
}

/// Closes a [`ProgressReporter`] on drop, e.g. when a compression future is
/// dropped mid-attempt.
pub(crate) struct CloseOnDrop(ProgressReporter);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Progress handle for one executor attempt.
#[derive(Clone)]
pub struct AttemptProgress {
    reporter: ProgressReporter,
    generation: u64,
    mode: ExecutionMode,
}

impl AttemptProgress {
    /// A handle whose reports go nowhere; handy when driving an executor directly.
    pub fn detached(mode: ExecutionMode) -> Self {
        ProgressReporter::noop().begin_attempt(mode, false)
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// True once the invocation was closed or finished, or a newer attempt
    /// has started. Long-running executors poll this to stop early.
    pub fn is_cancelled(&self) -> bool {
        !self.reporter.is_current(self.generation)
    }

    /// Report progress. Values are clamped to the attempt's running maximum
    /// and capped at 99; 100 is reserved for the dispatcher.
    pub fn report(&self, percent: u8, message: impl Into<String>) {
        self.reporter.report(self.generation, percent, message.into());
    }

    /// Report a fraction `done / total` mapped onto the `[from, to]` percent band.
    pub fn report_fraction(&self, from: u8, to: u8, done: u64, total: u64, message: impl Into<String>) {
        let span = to.saturating_sub(from) as u64;
        let offset = if total == 0 { span } else { span * done.min(total) / total };
        self.report(from.saturating_add(offset as u8), message);
    }
}

/// Linear extrapolation of the remaining time from elapsed time and percent.
pub fn estimate_remaining(elapsed: Duration, percent: u8) -> Option<Duration> {
    if percent == 0 || percent >= 100 {
        return None;
    }
    let p = percent as u32;
    Some(elapsed * (100 - p) / p)
}

/// Render a remaining-time estimate for display.
pub fn format_eta(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 1 {
        "less than a second".to_string()
    } else if secs < 60 {
        format!("{secs}s")
    } else {
        format!("{}m {:02}s", secs / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::OnceCell;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<ProgressEvent>>,
        fallbacks: AtomicUsize,
    }

    impl CompressionProgressCallback for Recorder {
        fn on_progress(&self, event: &ProgressEvent) {
            self.events.lock().unwrap().push(event.clone());
        }

        fn on_fallback(&self, _from: ExecutionMode, _to: ExecutionMode, _reason: &str) {
            self.fallbacks.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn percents(r: &Recorder) -> Vec<u8> {
        r.events.lock().unwrap().iter().map(|e| e.percent).collect()
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_progress(&ProgressEvent {
            mode: ExecutionMode::Local,
            percent: 10,
            message: "x".into(),
            estimated_time_remaining: None,
            is_fallback: false,
        });
        cb.on_fallback(ExecutionMode::Local, ExecutionMode::Remote, "boom");
    }

    #[test]
    fn percent_is_clamped_monotonic_and_below_100() {
        let rec = Arc::new(Recorder::default());
        let reporter = ProgressReporter::new(rec.clone());
        let attempt = reporter.begin_attempt(ExecutionMode::Local, false);
        attempt.report(0, "start");
        attempt.report(40, "mid");
        attempt.report(20, "regressed");
        attempt.report(100, "executor claims done");
        assert_eq!(percents(&rec), vec![0, 40, 40, 99]);
    }

    #[test]
    fn finish_emits_exactly_once() {
        let rec = Arc::new(Recorder::default());
        let reporter = ProgressReporter::new(rec.clone());
        let attempt = reporter.begin_attempt(ExecutionMode::Remote, false);
        attempt.report(50, "half");
        reporter.finish("done");
        reporter.finish("done again");
        attempt.report(60, "late");
        assert_eq!(percents(&rec), vec![50, 100]);
        let last = rec.events.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last.mode, ExecutionMode::Remote);
        assert!(last.estimated_time_remaining.is_none());
    }

    #[test]
    fn new_attempt_resets_counter_and_drops_stale_reports() {
        let rec = Arc::new(Recorder::default());
        let reporter = ProgressReporter::new(rec.clone());
        let first = reporter.begin_attempt(ExecutionMode::Local, false);
        first.report(70, "local progress");
        reporter.fallback(ExecutionMode::Local, ExecutionMode::Remote, "parse error");
        let second = reporter.begin_attempt(ExecutionMode::Remote, true);
        second.report(5, "uploading");
        first.report(90, "stale local progress");
        second.report(45, "processing");

        let events = rec.events.lock().unwrap().clone();
        let tagged: Vec<(ExecutionMode, u8, bool)> =
            events.iter().map(|e| (e.mode, e.percent, e.is_fallback)).collect();
        assert_eq!(
            tagged,
            vec![
                (ExecutionMode::Local, 70, false),
                (ExecutionMode::Remote, 5, true),
                (ExecutionMode::Remote, 45, true),
            ]
        );
        assert_eq!(rec.fallbacks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn closed_reporter_forwards_nothing() {
        let rec = Arc::new(Recorder::default());
        let reporter = ProgressReporter::new(rec.clone());
        let attempt = reporter.begin_attempt(ExecutionMode::Local, false);
        attempt.report(10, "a");
        reporter.close();
        attempt.report(20, "b");
        reporter.finish("never");
        reporter.fallback(ExecutionMode::Local, ExecutionMode::Remote, "x");
        assert_eq!(percents(&rec), vec![10]);
        assert_eq!(rec.fallbacks.load(Ordering::SeqCst), 0);
        assert!(reporter.is_closed());
    }

    #[test]
    fn attempt_sees_cancellation() {
        let reporter = ProgressReporter::noop();
        let first = reporter.begin_attempt(ExecutionMode::Local, false);
        assert!(!first.is_cancelled());

        let second = reporter.begin_attempt(ExecutionMode::Remote, true);
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());

        reporter.close();
        assert!(second.is_cancelled());

        let done = ProgressReporter::noop();
        let attempt = done.begin_attempt(ExecutionMode::Local, false);
        done.finish("ok");
        assert!(attempt.is_cancelled());
    }

    #[test]
    fn close_waits_for_an_event_in_flight() {
        let (entered_tx, entered_rx) = mpsc::channel::<()>();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let entered_tx = Mutex::new(entered_tx);
        let release_rx = Mutex::new(release_rx);
        let log = Arc::new(Mutex::new(Vec::<String>::new()));

        let l = Arc::clone(&log);
        let cb = progress_fn(move |e| {
            entered_tx.lock().unwrap().send(()).unwrap();
            release_rx.lock().unwrap().recv().unwrap();
            l.lock().unwrap().push(format!("event {}", e.percent));
        });
        let reporter = ProgressReporter::new(cb);
        let attempt = reporter.begin_attempt(ExecutionMode::Local, false);

        let worker = {
            let attempt = attempt.clone();
            thread::spawn(move || attempt.report(30, "page 1"))
        };
        entered_rx.recv().unwrap();

        let closer = {
            let reporter = reporter.clone();
            let log = Arc::clone(&log);
            thread::spawn(move || {
                reporter.close();
                log.lock().unwrap().push("closed".to_string());
            })
        };
        thread::sleep(Duration::from_millis(30));
        assert!(log.lock().unwrap().is_empty(), "close returned during a delivery");

        release_tx.send(()).unwrap();
        worker.join().unwrap();
        closer.join().unwrap();
        attempt.report(60, "late");

        assert_eq!(*log.lock().unwrap(), vec!["event 30".to_string(), "closed".to_string()]);
    }

    #[test]
    fn callback_may_close_its_own_reporter() {
        let slot: Arc<OnceCell<ProgressReporter>> = Arc::new(OnceCell::new());
        let seen = Arc::new(AtomicUsize::new(0));

        let (s, n) = (Arc::clone(&slot), Arc::clone(&seen));
        let reporter = ProgressReporter::new(progress_fn(move |_e| {
            n.fetch_add(1, Ordering::SeqCst);
            if let Some(r) = s.get() {
                r.close();
            }
        }));
        let _ = slot.set(reporter.clone());

        let attempt = reporter.begin_attempt(ExecutionMode::Local, false);
        attempt.report(10, "first");
        attempt.report(20, "second");
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(attempt.is_cancelled());
    }

    #[test]
    fn report_fraction_maps_into_band() {
        let rec = Arc::new(Recorder::default());
        let reporter = ProgressReporter::new(rec.clone());
        let attempt = reporter.begin_attempt(ExecutionMode::Remote, false);
        attempt.report_fraction(5, 40, 0, 4, "u");
        attempt.report_fraction(5, 40, 2, 4, "u");
        attempt.report_fraction(5, 40, 4, 4, "u");
        attempt.report_fraction(70, 95, 10, 0, "unknown total");
        assert_eq!(percents(&rec), vec![5, 22, 40, 95]);
    }

    #[test]
    fn eta_estimation_and_formatting() {
        assert_eq!(estimate_remaining(Duration::from_secs(10), 0), None);
        assert_eq!(estimate_remaining(Duration::from_secs(10), 100), None);
        assert_eq!(
            estimate_remaining(Duration::from_secs(10), 50),
            Some(Duration::from_secs(10))
        );
        assert_eq!(
            estimate_remaining(Duration::from_secs(10), 25),
            Some(Duration::from_secs(30))
        );
        assert_eq!(format_eta(Duration::from_millis(300)), "less than a second");
        assert_eq!(format_eta(Duration::from_secs(12)), "12s");
        assert_eq!(format_eta(Duration::from_secs(185)), "3m 05s");
    }

    #[test]
    fn closure_adapter_forwards() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let cb = progress_fn(move |_e| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let reporter = ProgressReporter::new(cb);
        let attempt = reporter.begin_attempt(ExecutionMode::Local, false);
        attempt.report(1, "x");
        attempt.report(2, "y");
        reporter.finish("z");
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
