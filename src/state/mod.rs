// Run state module
//
// This module provides the RunContext shared by the planner and every worker:
// directory layout, resolver, the progress counter pair, metrics and a broadcast
// channel of run events. Nothing here is global; main builds one context per run.

use crate::metrics::RunMetrics;
use crate::models::BatchSettings;
use crate::services::group_key::GroupKeyResolver;
use camino::{Utf8Path, Utf8PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Events emitted while a run progresses
///
/// Subscribers are optional; the console output does not depend on them.
#[derive(Clone, Debug, PartialEq)]
pub enum RunEvent {
    /// Planning finished and the pool is about to start
    RunStarted { total: usize, workers: usize },

    /// A worker took a task; `ordinal` is its progress number
    TaskStarted {
        ordinal: usize,
        total: usize,
        file_name: String,
    },

    /// A worker finished a task
    TaskFinished { file_name: String, success: bool },

    /// Every worker has been joined
    RunFinished { succeeded: usize, failed: usize },
}

/// Working directories of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub root: Utf8PathBuf,
    pub input_dir: Utf8PathBuf,
    pub output_dir: Utf8PathBuf,
    pub pack_dir: Utf8PathBuf,
}

impl Layout {
    /// `In/`, `Out/` and `Pack/` under the given root.
    pub fn new<P: AsRef<Utf8Path>>(root: P) -> Self {
        Self::from_settings(root, &BatchSettings::default())
    }

    /// Layout with the directory names from the batch settings.
    pub fn from_settings<P: AsRef<Utf8Path>>(root: P, settings: &BatchSettings) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            input_dir: root.join(&settings.input_dir),
            output_dir: root.join(&settings.output_dir),
            pack_dir: root.join(&settings.pack_dir),
            root,
        }
    }
}

/// Receives one line per task taken by a worker.
///
/// Called while the progress lock is held, so implementations see the
/// progress numbers in strictly increasing order.
pub trait ProgressSink: Send + Sync {
    fn report(&self, completed: usize, total: usize, file_name: &str);
}

/// Prints `[completed/total] fileName` on stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn report(&self, completed: usize, total: usize, file_name: &str) {
        println!("{}", format_progress_line(completed, total, file_name));
    }
}

/// The console progress format.
pub fn format_progress_line(completed: usize, total: usize, file_name: &str) -> String {
    format!("[{}/{}] {}", completed, total, file_name)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Counts {
    completed: usize,
    total: usize,
}

/// `completed` / `total` pair shared by all workers.
///
/// Both fields sit behind one mutex so increment-then-report is a single
/// critical section.
#[derive(Debug, Default)]
pub struct ProgressCounters {
    counts: Mutex<Counts>,
}

impl ProgressCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix the total and reset `completed` before the pool starts.
    pub fn set_total(&self, total: usize) {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        counts.completed = 0;
        counts.total = total;
    }

    /// Increment `completed` and hand the new value to `sink` under the lock.
    ///
    /// Returns the progress number assigned to this task.
    pub fn advance(&self, file_name: &str, sink: &dyn ProgressSink) -> usize {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        counts.completed += 1;
        sink.report(counts.completed, counts.total, file_name);
        counts.completed
    }

    pub fn completed(&self) -> usize {
        self.counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .completed
    }

    pub fn total(&self) -> usize {
        self.counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .total
    }
}

/// Everything a run shares between the planner and the workers.
pub struct RunContext {
    pub layout: Layout,
    pub resolver: GroupKeyResolver,
    pub progress: ProgressCounters,
    pub metrics: RunMetrics,
    sink: Box<dyn ProgressSink>,
    events_tx: broadcast::Sender<RunEvent>,
    started_at: Instant,
}

impl RunContext {
    /// Create a context printing progress to the console.
    ///
    /// The run clock starts here.
    pub fn new(layout: Layout, resolver: GroupKeyResolver) -> Self {
        Self::with_sink(layout, resolver, Box::new(ConsoleProgress))
    }

    /// Create a context with a custom progress sink
    ///
    /// The broadcast channel buffers 100 events.
    pub fn with_sink(
        layout: Layout,
        resolver: GroupKeyResolver,
        sink: Box<dyn ProgressSink>,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(100);
        Self {
            layout,
            resolver,
            progress: ProgressCounters::new(),
            metrics: RunMetrics::new(),
            sink,
            events_tx,
            started_at: Instant::now(),
        }
    }

    /// Take the next progress number for `file_name` and report it.
    pub fn begin_task(&self, file_name: &str) -> usize {
        let ordinal = self.progress.advance(file_name, self.sink.as_ref());
        self.emit(RunEvent::TaskStarted {
            ordinal,
            total: self.progress.total(),
            file_name: file_name.to_string(),
        });
        ordinal
    }

    /// Subscribe to run events
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.events_tx.subscribe()
    }

    /// Send an event; it's OK if no one is listening.
    pub fn emit(&self, event: RunEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Time since the context was created.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[derive(Default)]
    struct RecordingSink {
        lines: Mutex<Vec<(usize, usize, String)>>,
    }

    impl ProgressSink for RecordingSink {
        fn report(&self, completed: usize, total: usize, file_name: &str) {
            self.lines
                .lock()
                .unwrap()
                .push((completed, total, file_name.to_string()));
        }
    }

    impl ProgressSink for Arc<RecordingSink> {
        fn report(&self, completed: usize, total: usize, file_name: &str) {
            self.as_ref().report(completed, total, file_name);
        }
    }

    #[test]
    fn test_layout_defaults() {
        let layout = Layout::new("/work");
        assert_eq!(layout.input_dir, Utf8PathBuf::from("/work/In"));
        assert_eq!(layout.output_dir, Utf8PathBuf::from("/work/Out"));
        assert_eq!(layout.pack_dir, Utf8PathBuf::from("/work/Pack"));
    }

    #[test]
    fn test_format_progress_line() {
        assert_eq!(format_progress_line(3, 10, "Chest.sbfres"), "[3/10] Chest.sbfres");
    }

    #[test]
    fn test_set_total_resets_completed() {
        let counters = ProgressCounters::new();
        let sink = RecordingSink::default();

        counters.set_total(2);
        counters.advance("a.sbfres", &sink);
        assert_eq!(counters.completed(), 1);

        counters.set_total(5);
        assert_eq!(counters.completed(), 0);
        assert_eq!(counters.total(), 5);
    }

    #[test]
    fn test_concurrent_advance_is_gap_free() {
        let counters = Arc::new(ProgressCounters::new());
        let sink = Arc::new(RecordingSink::default());
        counters.set_total(800);

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let counters = Arc::clone(&counters);
                let sink = Arc::clone(&sink);
                thread::spawn(move || {
                    for i in 0..100 {
                        counters.advance(&format!("w{}-{}.sbfres", worker, i), &sink);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let lines = sink.lines.lock().unwrap();
        let observed: Vec<usize> = lines.iter().map(|(n, _, _)| *n).collect();
        let expected: Vec<usize> = (1..=800).collect();
        assert_eq!(observed, expected);
        assert!(lines.iter().all(|(_, total, _)| *total == 800));
    }

    #[test]
    fn test_begin_task_emits_event() {
        let ctx = RunContext::with_sink(
            Layout::new("/work"),
            GroupKeyResolver::default(),
            Box::new(RecordingSink::default()),
        );
        let mut rx = ctx.subscribe();
        ctx.progress.set_total(1);

        assert_eq!(ctx.begin_task("Chest.sbfres"), 1);

        let event = rx.try_recv().unwrap();
        assert_eq!(
            event,
            RunEvent::TaskStarted {
                ordinal: 1,
                total: 1,
                file_name: "Chest.sbfres".to_string(),
            }
        );
    }
}
