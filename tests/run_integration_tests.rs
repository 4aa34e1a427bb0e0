//! Integration tests for planning and scheduling a run
//!
//! These tests verify:
//! - The planner's grouping and exclusions against a real input directory
//! - Progress numbering across worker counts
//! - Identical task partitioning regardless of worker count
//! - Run events seen by a subscriber

use bfres_batch::services::{
    Stage, StageOutcome, StageStatus, TaskExecutor, TaskOutcome, TaskPlanner, WorkerPool,
};
use bfres_batch::services::group_key::GroupKeyResolver;
use bfres_batch::state::ProgressSink;
use bfres_batch::{ConversionTask, Layout, RunContext, RunEvent};
use camino::Utf8PathBuf;
use std::collections::BTreeMap;
use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

#[derive(Default)]
struct CollectingSink {
    lines: Mutex<Vec<(usize, usize, String)>>,
}

struct SharedSink(Arc<CollectingSink>);

impl ProgressSink for SharedSink {
    fn report(&self, completed: usize, total: usize, file_name: &str) {
        self.0
            .lines
            .lock()
            .unwrap()
            .push((completed, total, file_name.to_string()));
    }
}

/// Records which output directory each task targeted
#[derive(Default)]
struct RecordingExecutor {
    seen: Mutex<Vec<(String, Utf8PathBuf)>>,
}

impl TaskExecutor for RecordingExecutor {
    async fn execute(&self, task: &ConversionTask) -> TaskOutcome {
        tokio::time::sleep(Duration::from_millis(1)).await;
        self.seen
            .lock()
            .unwrap()
            .push((task.file_name.clone(), task.output_dir.clone()));

        let export = if task.needs_export() {
            StageOutcome {
                stage: Stage::Export,
                status: StageStatus::Succeeded,
                duration: Duration::from_millis(1),
                stderr: String::new(),
            }
        } else {
            StageOutcome::skipped(Stage::Export, "texture")
        };

        TaskOutcome {
            file_name: task.file_name.clone(),
            group_key: task.group_key.clone(),
            import: StageOutcome {
                stage: Stage::Import,
                status: StageStatus::Succeeded,
                duration: Duration::from_millis(1),
                stderr: String::new(),
            },
            export,
        }
    }
}

fn create_root(files: &[&str]) -> (TempDir, Utf8PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
    let layout = Layout::new(&root);
    fs::create_dir_all(&layout.input_dir).unwrap();
    fs::create_dir_all(&layout.output_dir).unwrap();
    for file in files {
        fs::write(layout.input_dir.join(file), b"FRES").unwrap();
    }
    (temp_dir, root)
}

fn context(root: &Utf8PathBuf, sink: Arc<CollectingSink>) -> Arc<RunContext> {
    Arc::new(RunContext::with_sink(
        Layout::new(root),
        GroupKeyResolver::default(),
        Box::new(SharedSink(sink)),
    ))
}

async fn run(root: &Utf8PathBuf, workers: usize) -> (Vec<(usize, usize, String)>, BTreeMap<String, Utf8PathBuf>) {
    let sink = Arc::new(CollectingSink::default());
    let ctx = context(root, Arc::clone(&sink));
    let plan = TaskPlanner::new().plan(&ctx).unwrap();

    let executor = Arc::new(RecordingExecutor::default());
    let report = WorkerPool::new(workers)
        .run(plan.tasks, Arc::clone(&ctx), Arc::clone(&executor))
        .await
        .unwrap();
    assert!(!report.has_failures());

    let partition = executor.seen.lock().unwrap().iter().cloned().collect();
    let lines = sink.lines.lock().unwrap().clone();
    (lines, partition)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_chest_scenario() {
    let (_temp_dir, root) = create_root(&[
        "Chest_Animation.sbfres",
        "Chest.Tex1.sbfres",
        "Chest.Tex2.sbfres",
        "Armor_Helmet.sbfres",
    ]);

    let (lines, partition) = run(&root, 4).await;

    assert_eq!(lines.len(), 2);
    assert!(lines.iter().all(|(_, total, _)| *total == 2));
    assert_eq!(partition.len(), 2);
    assert!(partition.values().all(|dir| *dir == root.join("Out/Chest")));
    assert!(!root.join("Out/Armor_Helmet").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_progress_sequence_for_one_and_four_workers() {
    let files: Vec<String> = (0..40).map(|i| format!("FldObj_Rock{:02}.sbfres", i)).collect();
    let names: Vec<&str> = files.iter().map(String::as_str).collect();
    let (_temp_dir, root) = create_root(&names);

    for workers in [1, 4] {
        let (lines, _) = run(&root, workers).await;
        let ordinals: Vec<usize> = lines.iter().map(|(n, _, _)| *n).collect();
        assert_eq!(ordinals, (1..=40).collect::<Vec<_>>());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_partition_independent_of_worker_count() {
    let (_temp_dir, root) = create_root(&[
        "TwnObj_House.sbfres",
        "TwnObj_House-01.sbfres",
        "TwnObj_House-02.sbfres",
        "TwnObj_House_Animation.sbfres",
        "FldObj_Tree.Tex1.sbfres",
        "FldObj_Tree.sbfres",
        "Npc_Guard.sbfres",
    ]);

    let (serial_lines, serial) = run(&root, 1).await;
    let (_, parallel) = run(&root, 4).await;

    assert_eq!(serial, parallel);
    assert_eq!(serial["TwnObj_House-02.sbfres"], root.join("Out/TwnObj_House"));
    assert_eq!(serial["FldObj_Tree.Tex1.sbfres"], root.join("Out/FldObj_Tree"));

    // Serial execution follows the sorted file order
    let order: Vec<&str> = serial_lines.iter().map(|(_, _, name)| name.as_str()).collect();
    let mut sorted = order.clone();
    sorted.sort();
    assert_eq!(order, sorted);
}

#[tokio::test]
async fn test_run_events_observed_by_subscriber() {
    let (_temp_dir, root) = create_root(&["Chest.sbfres", "Chest.Tex1.sbfres"]);
    let ctx = context(&root, Arc::new(CollectingSink::default()));
    let mut rx = ctx.subscribe();

    let plan = TaskPlanner::new().plan(&ctx).unwrap();
    WorkerPool::new(2)
        .run(plan.tasks, Arc::clone(&ctx), Arc::new(RecordingExecutor::default()))
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }

    assert_eq!(events.first(), Some(&RunEvent::RunStarted { total: 2, workers: 2 }));
    assert_eq!(events.last(), Some(&RunEvent::RunFinished { succeeded: 2, failed: 0 }));
    let started = events
        .iter()
        .filter(|e| matches!(e, RunEvent::TaskStarted { .. }))
        .count();
    assert_eq!(started, 2);
}
