use crate::models::ConversionTask;
use crate::services::conversion::{ConversionService, StageStatus, TaskOutcome, ToolRunner};
use crate::state::{RunContext, RunEvent};
use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};

/// Executes a single conversion task
pub trait TaskExecutor: Send + Sync + 'static {
    fn execute(&self, task: &ConversionTask) -> impl Future<Output = TaskOutcome> + Send;
}

impl<R: ToolRunner + 'static> TaskExecutor for ConversionService<R> {
    fn execute(&self, task: &ConversionTask) -> impl Future<Output = TaskOutcome> + Send {
        self.convert(task)
    }
}

/// Outcomes of a finished run
#[derive(Debug, Clone)]
pub struct RunReport {
    /// One outcome per task, in completion order
    pub outcomes: Vec<TaskOutcome>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn failures(&self) -> Vec<&TaskOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success()).collect()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(|o| !o.is_success())
    }

    /// One line per failed stage, empty when everything succeeded
    pub fn failure_summary(&self) -> Vec<String> {
        let failures = self.failures();
        if failures.is_empty() {
            return Vec::new();
        }

        let mut lines = vec![format!(
            "{} of {} tasks failed:",
            failures.len(),
            self.outcomes.len()
        )];
        for outcome in failures {
            for stage in outcome.failed_stages() {
                lines.push(format!(
                    "  {} [{}] {}",
                    outcome.file_name, stage.stage, stage.status
                ));
                if let Some(last) = stage.stderr.lines().last() {
                    lines.push(format!("    {}", last));
                }
            }
        }
        lines
    }
}

/// Line announcing the size of the run
pub fn format_start_line(tasks: usize, workers: usize) -> String {
    format!("{} tasks use {} workers", tasks, workers)
}

/// Final timing line
pub fn format_elapsed_line(elapsed: Duration) -> String {
    format!("all tasks taken: {:.2} seconds.", elapsed.as_secs_f64())
}

/// Fixed set of worker loops fed from a bounded queue
///
/// Each task goes to exactly one worker. A worker takes its progress number
/// from the run context before executing, so the reported numbers are exactly
/// `1..=total` whatever the worker count.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    /// Pool with `workers` loops; 0 is treated as 1
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run every task to completion and join all workers
    pub async fn run<E: TaskExecutor>(
        &self,
        tasks: Vec<ConversionTask>,
        ctx: Arc<RunContext>,
        executor: Arc<E>,
    ) -> Result<RunReport> {
        ctx.emit(RunEvent::RunStarted {
            total: tasks.len(),
            workers: self.workers,
        });

        let (tx, rx) = mpsc::channel::<ConversionTask>(self.workers * 2);
        let rx = Arc::new(Mutex::new(rx));

        let mut handles = Vec::with_capacity(self.workers);
        for worker_id in 0..self.workers {
            let rx = Arc::clone(&rx);
            let ctx = Arc::clone(&ctx);
            let executor = Arc::clone(&executor);
            handles.push(tokio::spawn(worker_loop(worker_id, rx, ctx, executor)));
        }

        // Workers stop once the sender is dropped and the queue drains
        for task in tasks {
            if tx.send(task).await.is_err() {
                tracing::error!("All workers exited before the queue was drained");
                break;
            }
        }
        drop(tx);

        let mut outcomes = Vec::new();
        for handle in handles {
            let worker_outcomes = handle.await.context("Worker task panicked")?;
            outcomes.extend(worker_outcomes);
        }

        let report = RunReport {
            outcomes,
            elapsed: ctx.elapsed(),
        };

        ctx.emit(RunEvent::RunFinished {
            succeeded: report.succeeded(),
            failed: report.failures().len(),
        });

        Ok(report)
    }
}

async fn worker_loop<E: TaskExecutor>(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<ConversionTask>>>,
    ctx: Arc<RunContext>,
    executor: Arc<E>,
) -> Vec<TaskOutcome> {
    let mut outcomes = Vec::new();

    loop {
        let next = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(task) = next else {
            break;
        };

        let ordinal = ctx.begin_task(&task.file_name);
        tracing::debug!("Worker {} took task {} ({})", worker_id, ordinal, task.file_name);

        let outcome = executor.execute(&task).await;
        record_outcome(&ctx, &outcome);

        ctx.emit(RunEvent::TaskFinished {
            file_name: outcome.file_name.clone(),
            success: outcome.is_success(),
        });
        outcomes.push(outcome);
    }

    tracing::debug!("Worker {} finished", worker_id);
    outcomes
}

fn record_outcome(ctx: &RunContext, outcome: &TaskOutcome) {
    let metrics = &ctx.metrics;

    metrics.record_stage_time(outcome.import.duration + outcome.export.duration);
    if outcome.import.status.is_failure() {
        metrics.record_import_failed();
    }
    if outcome.export.status.is_failure() {
        metrics.record_export_failed();
    }
    if matches!(outcome.export.status, StageStatus::Skipped { .. }) {
        metrics.record_export_skipped();
    }

    if outcome.is_success() {
        metrics.record_task_succeeded();
    } else {
        metrics.record_task_failed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AssetKind;
    use crate::services::conversion::{Stage, StageOutcome};
    use crate::services::group_key::GroupKeyResolver;
    use crate::state::{Layout, ProgressSink};
    use camino::Utf8PathBuf;
    use std::collections::HashSet;
    use std::sync::atomic::Ordering;

    #[derive(Default)]
    struct RecordingSink {
        ordinals: std::sync::Mutex<Vec<usize>>,
    }

    impl ProgressSink for Arc<RecordingSink> {
        fn report(&self, completed: usize, _total: usize, _file_name: &str) {
            self.ordinals.lock().unwrap().push(completed);
        }
    }

    /// Succeeds unless the file name contains "Broken"
    struct FakeExecutor;

    impl TaskExecutor for FakeExecutor {
        async fn execute(&self, task: &ConversionTask) -> TaskOutcome {
            tokio::task::yield_now().await;
            let status = if task.file_name.contains("Broken") {
                StageStatus::Failed { exit_code: Some(1) }
            } else {
                StageStatus::Succeeded
            };
            TaskOutcome {
                file_name: task.file_name.clone(),
                group_key: task.group_key.clone(),
                import: StageOutcome {
                    stage: Stage::Import,
                    status,
                    duration: Duration::from_millis(2),
                    stderr: "bad header".to_string(),
                },
                export: StageOutcome::skipped(Stage::Export, "texture"),
            }
        }
    }

    fn tasks(count: usize) -> Vec<ConversionTask> {
        (0..count)
            .map(|i| ConversionTask {
                output_dir: Utf8PathBuf::from("/work/Out/Obj"),
                file_name: format!("Obj{:03}.sbfres", i),
                base_name: format!("Obj{:03}", i),
                group_key: "Obj".to_string(),
                kind: AssetKind::Plain,
            })
            .collect()
    }

    fn context(sink: Arc<RecordingSink>, total: usize) -> Arc<RunContext> {
        let ctx = RunContext::with_sink(
            Layout::new("/work"),
            GroupKeyResolver::default(),
            Box::new(sink),
        );
        ctx.progress.set_total(total);
        Arc::new(ctx)
    }

    async fn run_with_workers(workers: usize, count: usize) -> (Vec<usize>, RunReport) {
        let sink = Arc::new(RecordingSink::default());
        let ctx = context(Arc::clone(&sink), count);
        let report = WorkerPool::new(workers)
            .run(tasks(count), ctx, Arc::new(FakeExecutor))
            .await
            .unwrap();
        let ordinals = sink.ordinals.lock().unwrap().clone();
        (ordinals, report)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_progress_is_gap_free_for_any_worker_count() {
        for workers in [1, 2, 4, 8] {
            let (ordinals, report) = run_with_workers(workers, 50).await;
            assert_eq!(ordinals, (1..=50).collect::<Vec<_>>());
            assert_eq!(report.outcomes.len(), 50);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_each_task_runs_once() {
        let (_, report) = run_with_workers(4, 30).await;
        let names: HashSet<&str> = report.outcomes.iter().map(|o| o.file_name.as_str()).collect();
        assert_eq!(names.len(), 30);
    }

    #[tokio::test]
    async fn test_empty_task_list() {
        let (ordinals, report) = run_with_workers(3, 0).await;
        assert!(ordinals.is_empty());
        assert!(report.outcomes.is_empty());
        assert!(!report.has_failures());
    }

    #[tokio::test]
    async fn test_failures_are_reported_and_counted() {
        let sink = Arc::new(RecordingSink::default());
        let mut work = tasks(3);
        work[1].file_name = "Broken.sbfres".to_string();
        let ctx = context(sink, work.len());

        let report = WorkerPool::new(2)
            .run(work, Arc::clone(&ctx), Arc::new(FakeExecutor))
            .await
            .unwrap();

        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failures().len(), 1);
        assert_eq!(ctx.metrics.tasks_failed.load(Ordering::Relaxed), 1);
        assert_eq!(ctx.metrics.imports_failed.load(Ordering::Relaxed), 1);
        assert_eq!(ctx.metrics.exports_skipped.load(Ordering::Relaxed), 3);

        let summary = report.failure_summary();
        assert_eq!(summary[0], "1 of 3 tasks failed:");
        assert_eq!(summary[1], "  Broken.sbfres [import] exit code 1");
        assert_eq!(summary[2], "    bad header");
    }

    #[tokio::test]
    async fn test_run_events() {
        let sink = Arc::new(RecordingSink::default());
        let ctx = context(sink, 2);
        let mut rx = ctx.subscribe();

        WorkerPool::new(1)
            .run(tasks(2), Arc::clone(&ctx), Arc::new(FakeExecutor))
            .await
            .unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            RunEvent::RunStarted {
                total: 2,
                workers: 1
            }
        );
        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            last = Some(event);
        }
        assert_eq!(
            last,
            Some(RunEvent::RunFinished {
                succeeded: 2,
                failed: 0
            })
        );
    }

    /// Blocks any task named "Hung" until released; records completion order
    #[derive(Default)]
    struct HangingExecutor {
        release: tokio::sync::Notify,
        finished: std::sync::Mutex<Vec<String>>,
    }

    impl TaskExecutor for HangingExecutor {
        async fn execute(&self, task: &ConversionTask) -> TaskOutcome {
            if task.file_name.starts_with("Hung") {
                self.release.notified().await;
            }
            let outcome = FakeExecutor.execute(task).await;
            self.finished.lock().unwrap().push(task.file_name.clone());
            outcome
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_hung_task_stalls_only_its_worker() {
        let sink = Arc::new(RecordingSink::default());
        let mut work = tasks(6);
        work[0].file_name = "Hung.sbfres".to_string();
        let ctx = context(sink, work.len());
        let executor = Arc::new(HangingExecutor::default());

        let run = tokio::spawn({
            let executor = Arc::clone(&executor);
            async move { WorkerPool::new(2).run(work, ctx, executor).await }
        });

        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let done = executor.finished.lock().unwrap().len();
                if done == 5 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("remaining tasks waited behind the hung one");
        assert!(!executor.finished.lock().unwrap().iter().any(|n| n == "Hung.sbfres"));

        executor.release.notify_one();
        let report = run.await.unwrap().unwrap();

        assert_eq!(report.outcomes.len(), 6);
        assert_eq!(
            executor.finished.lock().unwrap().last().map(String::as_str),
            Some("Hung.sbfres")
        );
    }

    #[test]
    fn test_worker_count_floor() {
        assert_eq!(WorkerPool::new(0).workers(), 1);
        assert_eq!(WorkerPool::new(6).workers(), 6);
    }

    #[test]
    fn test_console_lines() {
        assert_eq!(format_start_line(12, 4), "12 tasks use 4 workers");
        assert_eq!(
            format_elapsed_line(Duration::from_millis(1234)),
            "all tasks taken: 1.23 seconds."
        );
    }

    #[test]
    fn test_run_blocking_with_tokio_test() {
        let (ordinals, _) = tokio_test::block_on(run_with_workers(1, 3));
        assert_eq!(ordinals, vec![1, 2, 3]);
    }
}
