use crate::models::{ConversionTask, FailurePolicy};
use camino::{Utf8Path, Utf8PathBuf};
use std::fmt;
use std::future::Future;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;

/// Flag selecting triangulated output in the exporter.
pub const TRIANGULATE_FLAG: &str = "-t";

/// Number of stderr lines kept per stage for the failure summary.
const STDERR_TAIL_LINES: usize = 20;

/// Errors from starting or awaiting a converter process
#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to wait for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Which external tool an invocation belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Extract,
    Import,
    Export,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Extract => f.write_str("extract"),
            Stage::Import => f.write_str("import"),
            Stage::Export => f.write_str("export"),
        }
    }
}

/// A program plus its explicit argument list. Never passed through a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: Utf8PathBuf,
    pub args: Vec<String>,
}

impl ToolInvocation {
    pub fn new<P: AsRef<Utf8Path>>(program: P, args: Vec<String>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args,
        }
    }
}

impl fmt::Display for ToolInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.program)?;
        for arg in &self.args {
            write!(f, " \"{}\"", arg)?;
        }
        Ok(())
    }
}

/// How a stage ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageStatus {
    Succeeded,
    /// Exited non-zero; `None` when terminated by a signal
    Failed { exit_code: Option<i32> },
    /// The process could not be started or awaited
    SpawnFailed { message: String },
    /// Not run
    Skipped { reason: String },
}

impl StageStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, StageStatus::Failed { .. } | StageStatus::SpawnFailed { .. })
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageStatus::Succeeded => f.write_str("ok"),
            StageStatus::Failed {
                exit_code: Some(code),
            } => write!(f, "exit code {}", code),
            StageStatus::Failed { exit_code: None } => f.write_str("terminated by signal"),
            StageStatus::SpawnFailed { message } => write!(f, "not started: {}", message),
            StageStatus::Skipped { reason } => write!(f, "skipped ({})", reason),
        }
    }
}

/// Result of one external tool invocation
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub stage: Stage,
    pub status: StageStatus,
    pub duration: Duration,
    /// Last lines of the tool's stderr
    pub stderr: String,
}

impl StageOutcome {
    pub fn skipped(stage: Stage, reason: &str) -> Self {
        Self {
            stage,
            status: StageStatus::Skipped {
                reason: reason.to_string(),
            },
            duration: Duration::ZERO,
            stderr: String::new(),
        }
    }
}

/// Result of one conversion task
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub file_name: String,
    pub group_key: String,
    pub import: StageOutcome,
    pub export: StageOutcome,
}

impl TaskOutcome {
    /// No stage failed. Skipped stages count as success.
    pub fn is_success(&self) -> bool {
        !self.import.status.is_failure() && !self.export.status.is_failure()
    }

    /// Stages that failed, in pipeline order
    pub fn failed_stages(&self) -> Vec<&StageOutcome> {
        [&self.import, &self.export]
            .into_iter()
            .filter(|outcome| outcome.status.is_failure())
            .collect()
    }
}

/// Runs one external tool invocation to completion.
///
/// The seam between the pipeline and the operating system; tests substitute a
/// recording implementation.
pub trait ToolRunner: Send + Sync {
    fn run(
        &self,
        stage: Stage,
        invocation: &ToolInvocation,
    ) -> impl Future<Output = StageOutcome> + Send;
}

/// Runs tools as child processes and captures their exit status and output.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl ProcessRunner {
    async fn spawn_and_wait(
        invocation: &ToolInvocation,
    ) -> Result<std::process::Output, ConversionError> {
        let child = Command::new(invocation.program.as_std_path())
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ConversionError::Spawn {
                program: invocation.program.to_string(),
                source,
            })?;

        child
            .wait_with_output()
            .await
            .map_err(|source| ConversionError::Wait {
                program: invocation.program.to_string(),
                source,
            })
    }
}

impl ToolRunner for ProcessRunner {
    async fn run(&self, stage: Stage, invocation: &ToolInvocation) -> StageOutcome {
        tracing::debug!("Executing {}: {}", stage, invocation);

        let start = Instant::now();
        let result = Self::spawn_and_wait(invocation).await;
        let duration = start.elapsed();

        match result {
            Ok(output) => {
                for line in String::from_utf8_lossy(&output.stdout).lines() {
                    tracing::trace!("{} stdout: {}", stage, line);
                }

                let status = if output.status.success() {
                    StageStatus::Succeeded
                } else {
                    StageStatus::Failed {
                        exit_code: output.status.code(),
                    }
                };

                tracing::debug!(
                    "{} completed in {:.2}s: {}",
                    stage,
                    duration.as_secs_f32(),
                    status
                );

                StageOutcome {
                    stage,
                    status,
                    duration,
                    stderr: tail_lines(&String::from_utf8_lossy(&output.stderr), STDERR_TAIL_LINES),
                }
            }
            Err(e) => {
                tracing::warn!("{}", e);
                StageOutcome {
                    stage,
                    status: StageStatus::SpawnFailed {
                        message: e.to_string(),
                    },
                    duration,
                    stderr: String::new(),
                }
            }
        }
    }
}

/// Keep the last `count` lines of `text`.
fn tail_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}

/// Drives a task through the import and export tools
///
/// - Import always runs: `importer <input>/<file> <group dir>/`
/// - Export runs unless the file is a texture container:
///   `exporter <group dir>/<base>.xml <group dir>/ -t`
///
/// Exit codes never abort the pipeline; they are recorded in the
/// [`TaskOutcome`]. Intermediate descriptors are left in place.
pub struct ConversionService<R = ProcessRunner> {
    importer: Utf8PathBuf,
    exporter: Utf8PathBuf,
    input_dir: Utf8PathBuf,
    policy: FailurePolicy,
    runner: R,
}

impl ConversionService<ProcessRunner> {
    /// Create a service running the tools as child processes
    pub fn new<P: AsRef<Utf8Path>>(importer: P, exporter: P, input_dir: P) -> Self {
        Self::with_runner(importer, exporter, input_dir, ProcessRunner)
    }
}

impl<R: ToolRunner> ConversionService<R> {
    pub fn with_runner<P: AsRef<Utf8Path>>(
        importer: P,
        exporter: P,
        input_dir: P,
        runner: R,
    ) -> Self {
        Self {
            importer: importer.as_ref().to_path_buf(),
            exporter: exporter.as_ref().to_path_buf(),
            input_dir: input_dir.as_ref().to_path_buf(),
            policy: FailurePolicy::default(),
            runner,
        }
    }

    /// Set what happens to the export stage after a failed import
    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Build the importer invocation for a task
    pub fn import_invocation(&self, task: &ConversionTask) -> ToolInvocation {
        ToolInvocation::new(
            &self.importer,
            vec![
                task.source_path(&self.input_dir).to_string(),
                task.output_dir_arg(),
            ],
        )
    }

    /// Build the exporter invocation, or `None` for texture containers
    pub fn export_invocation(&self, task: &ConversionTask) -> Option<ToolInvocation> {
        if !task.needs_export() {
            return None;
        }

        Some(ToolInvocation::new(
            &self.exporter,
            vec![
                task.intermediate_path().to_string(),
                task.output_dir_arg(),
                TRIANGULATE_FLAG.to_string(),
            ],
        ))
    }

    /// Run both stages of a task, in order
    pub async fn convert(&self, task: &ConversionTask) -> TaskOutcome {
        let import = self
            .runner
            .run(Stage::Import, &self.import_invocation(task))
            .await;

        if import.status.is_failure() {
            tracing::warn!("Import of {} failed: {}", task.file_name, import.status);
        }

        let export = match self.export_invocation(task) {
            None => StageOutcome::skipped(Stage::Export, "texture"),
            Some(_)
                if import.status.is_failure()
                    && self.policy == FailurePolicy::SkipExportOnImportFailure =>
            {
                StageOutcome::skipped(Stage::Export, "import failed")
            }
            Some(invocation) => {
                let export = self.runner.run(Stage::Export, &invocation).await;
                if export.status.is_failure() {
                    tracing::warn!("Export of {} failed: {}", task.file_name, export.status);
                }
                export
            }
        };

        TaskOutcome {
            file_name: task.file_name.clone(),
            group_key: task.group_key.clone(),
            import,
            export,
        }
    }
}
