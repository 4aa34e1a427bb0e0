//! Services module - the stages of a batch conversion run.
//!
//! Each service is free of global state; everything a run shares lives in
//! [`RunContext`](crate::state::RunContext).
//!
//! # Components
//!
//! - [`Preparer`]: creates the working directories, prunes empty output
//!   directories, extracts staged `.pack` archives and moves their assets into
//!   the input directory
//! - [`GroupKeyResolver`]: maps an asset file name to its group key and decides
//!   whether the file is converted at all
//! - [`TaskPlanner`]: lists the input directory and builds the [`Plan`],
//!   creating one output directory per group
//! - [`WorkerPool`]: runs the tasks on a fixed number of worker loops and
//!   collects a [`RunReport`]
//! - [`ConversionService`]: runs the importer and exporter for one task
//!
//! # Usage Example
//!
//! ```ignore
//! use bfres_batch::services::{ConversionService, TaskPlanner, WorkerPool};
//!
//! let plan = TaskPlanner::new().plan(&ctx)?;
//! let service = Arc::new(ConversionService::new(&importer, &exporter, &ctx.layout.input_dir));
//! let report = WorkerPool::new(4).run(plan.tasks, ctx.clone(), service).await?;
//! println!("{}", format_elapsed_line(report.elapsed));
//! ```

pub mod conversion;
pub mod group_key;
pub mod planner;
pub mod preparer;
pub mod scheduler;

pub use conversion::{
    ConversionError, ConversionService, ProcessRunner, Stage, StageOutcome, StageStatus,
    TaskOutcome, ToolInvocation, ToolRunner,
};
pub use group_key::{ExclusionReason, GroupKeyResolver, Resolution, derive_group_key};
pub use planner::{Plan, TaskPlanner};
pub use preparer::{ExtractionSummary, PrepareError, PrepareSummary, Preparer};
pub use scheduler::{
    RunReport, TaskExecutor, WorkerPool, format_elapsed_line, format_start_line,
};
