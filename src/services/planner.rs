use crate::models::{ASSET_EXTENSION, ConversionTask};
use crate::services::group_key::ExclusionReason;
use crate::state::RunContext;
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::fs;

/// The work found in the input directory
#[derive(Debug, Default, Clone)]
pub struct Plan {
    /// Tasks in file-name order
    pub tasks: Vec<ConversionTask>,
    /// Group key to output directory, in first-seen order
    pub groups: IndexMap<String, Utf8PathBuf>,
    pub excluded: Vec<(String, ExclusionReason)>,
}

impl Plan {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Turns the contents of the input directory into conversion tasks
#[derive(Debug, Default, Clone, Copy)]
pub struct TaskPlanner;

impl TaskPlanner {
    pub fn new() -> Self {
        Self
    }

    /// Build the task list for a run
    ///
    /// Creates one output directory per group before returning and fixes the
    /// progress total. Filesystem errors abort planning.
    pub fn plan(&self, ctx: &RunContext) -> Result<Plan> {
        let input_dir = &ctx.layout.input_dir;
        let mut plan = Plan::default();

        for file_name in sorted_asset_names(input_dir)? {
            let resolution = ctx.resolver.resolve(&file_name);

            if let Some(reason) = resolution.exclusion.clone() {
                tracing::debug!("Excluding {}: {}", file_name, reason);
                plan.excluded.push((file_name, reason));
                continue;
            }

            let Some(asset) = resolution.into_asset(&file_name) else {
                continue;
            };

            let output_dir = match plan.groups.get(&asset.group_key) {
                Some(dir) => dir.clone(),
                None => {
                    let dir = ctx.layout.output_dir.join(&asset.group_key);
                    fs::create_dir_all(&dir)
                        .with_context(|| format!("Failed to create output directory: {}", dir))?;
                    plan.groups.insert(asset.group_key.clone(), dir.clone());
                    dir
                }
            };

            tracing::debug!("Planned {} ({}) -> {}", file_name, asset.kind, output_dir);
            plan.tasks.push(ConversionTask::new(asset, output_dir));
        }

        ctx.progress.set_total(plan.tasks.len());

        tracing::info!(
            "Planned {} tasks in {} groups ({} files excluded)",
            plan.tasks.len(),
            plan.groups.len(),
            plan.excluded.len()
        );

        Ok(plan)
    }
}

/// Names of the asset files directly inside `input_dir`, sorted
fn sorted_asset_names(input_dir: &Utf8Path) -> Result<Vec<String>> {
    let mut names = Vec::new();

    for entry in fs::read_dir(input_dir)
        .with_context(|| format!("Failed to read input directory: {}", input_dir))?
    {
        let entry = entry.with_context(|| format!("Failed to read entry in {}", input_dir))?;
        let file_type = entry
            .file_type()
            .with_context(|| format!("Failed to stat {}", entry.path().display()))?;
        if !file_type.is_file() {
            continue;
        }

        match entry.file_name().into_string() {
            Ok(name) if name.ends_with(ASSET_EXTENSION) => names.push(name),
            Ok(_) => {}
            Err(name) => tracing::warn!("Skipping non UTF-8 file name {:?}", name),
        }
    }

    names.sort();
    Ok(names)
}
