use crate::models::{ASSET_EXTENSION, BatchSettings};
use crate::services::conversion::{ProcessRunner, Stage, ToolInvocation, ToolRunner};
use crate::state::Layout;
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use thiserror::Error;
use walkdir::WalkDir;

/// Extension of the archive containers dropped into the staging directory.
pub const ARCHIVE_EXTENSION: &str = "pack";

#[derive(Error, Debug)]
pub enum PrepareError {
    /// An asset with the same name is already in the input directory
    #[error("Cannot move {file}: {destination} already exists")]
    MoveConflict {
        file: Utf8PathBuf,
        destination: Utf8PathBuf,
    },

    #[error("Path is not valid UTF-8: {0}")]
    NonUtf8Path(String),
}

/// Archive extraction results
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtractionSummary {
    pub extracted: Vec<Utf8PathBuf>,
    /// Archives whose sibling directory already existed
    pub skipped: Vec<Utf8PathBuf>,
    pub failed: Vec<Utf8PathBuf>,
}

/// What a full preparation pass did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PrepareSummary {
    pub pruned_dirs: usize,
    pub extraction: ExtractionSummary,
    pub collected: Vec<Utf8PathBuf>,
}

/// Gets the working directories ready for planning
///
/// Creates the layout, removes empty output directories left by earlier runs,
/// unpacks staged archives and moves their assets into the input directory.
pub struct Preparer<R = ProcessRunner> {
    extractor: Utf8PathBuf,
    extractor_args: Vec<String>,
    runner: R,
}

impl Preparer<ProcessRunner> {
    pub fn new(settings: &BatchSettings) -> Self {
        Self::with_runner(
            &settings.extractor_exe,
            settings.extractor_args.clone(),
            ProcessRunner,
        )
    }
}

impl<R: ToolRunner> Preparer<R> {
    pub fn with_runner<P: AsRef<Utf8Path>>(extractor: P, extractor_args: Vec<String>, runner: R) -> Self {
        Self {
            extractor: extractor.as_ref().to_path_buf(),
            extractor_args,
            runner,
        }
    }

    /// Run every preparation step in order
    pub async fn prepare(&self, layout: &Layout) -> Result<PrepareSummary> {
        ensure_directories(layout)?;
        let pruned_dirs = prune_empty_dirs(&layout.output_dir)?;
        let extraction = self.extract_archives(&layout.pack_dir).await?;
        let collected = collect_assets(&layout.pack_dir, &layout.input_dir)?;

        tracing::info!(
            "Preparation done: {} empty dirs pruned, {} archives extracted, {} assets collected",
            pruned_dirs,
            extraction.extracted.len(),
            collected.len()
        );

        Ok(PrepareSummary {
            pruned_dirs,
            extraction,
            collected,
        })
    }

    /// Build the extractor invocation for one archive
    pub fn extract_invocation(&self, archive: &Utf8Path) -> ToolInvocation {
        let mut args = self.extractor_args.clone();
        args.push(archive.to_string());
        ToolInvocation::new(&self.extractor, args)
    }

    /// Extract every archive in `staging` that has not been extracted yet
    ///
    /// An archive counts as extracted when a directory named after it (without
    /// the extension) sits next to it. Failures are logged and counted only.
    pub async fn extract_archives(&self, staging: &Utf8Path) -> Result<ExtractionSummary> {
        let mut summary = ExtractionSummary::default();

        for archive in sorted_archives(staging)? {
            let target = archive.with_extension("");
            if target.exists() {
                tracing::debug!("Skipping {}: {} already exists", archive, target);
                summary.skipped.push(archive);
                continue;
            }

            tracing::info!("Extracting {}", archive);
            let outcome = self
                .runner
                .run(Stage::Extract, &self.extract_invocation(&archive))
                .await;

            if outcome.status.is_failure() {
                tracing::warn!("Extraction of {} failed: {}", archive, outcome.status);
                summary.failed.push(archive);
            } else {
                summary.extracted.push(archive);
            }
        }

        Ok(summary)
    }
}

/// Create the input, output and staging directories if missing
pub fn ensure_directories(layout: &Layout) -> Result<()> {
    for dir in [&layout.input_dir, &layout.output_dir, &layout.pack_dir] {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create directory: {}", dir))?;
    }
    Ok(())
}

/// Remove every empty directory below `output_root`
///
/// Children are visited before their parents, so chains of empty directories
/// disappear in one pass. The root itself is kept. Returns the number removed.
pub fn prune_empty_dirs(output_root: &Utf8Path) -> Result<usize> {
    if !output_root.is_dir() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in WalkDir::new(output_root).min_depth(1).contents_first(true) {
        let entry = entry.with_context(|| format!("Failed to walk {}", output_root))?;
        if !entry.file_type().is_dir() {
            continue;
        }

        let path = entry.path();
        let is_empty = fs::read_dir(path)
            .with_context(|| format!("Failed to read directory: {}", path.display()))?
            .next()
            .is_none();

        if is_empty {
            fs::remove_dir(path)
                .with_context(|| format!("Failed to remove empty directory: {}", path.display()))?;
            tracing::debug!("Removed empty directory {}", path.display());
            removed += 1;
        }
    }

    Ok(removed)
}

/// Move every asset found anywhere under `staging` into `input_dir`
///
/// Returns the new paths. Refuses to overwrite an asset already present in the
/// input directory.
pub fn collect_assets(staging: &Utf8Path, input_dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>> {
    let mut collected = Vec::new();

    for entry in WalkDir::new(staging).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", staging))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let source = Utf8PathBuf::try_from(entry.into_path())
            .map_err(|e| PrepareError::NonUtf8Path(e.into_path_buf().display().to_string()))?;
        let Some(file_name) = source.file_name() else {
            continue;
        };
        if !file_name.ends_with(ASSET_EXTENSION) {
            continue;
        }

        let destination = input_dir.join(file_name);
        if destination.exists() {
            return Err(PrepareError::MoveConflict {
                file: source,
                destination,
            }
            .into());
        }

        tracing::info!("moving {}...", file_name);
        move_file(&source, &destination)?;
        collected.push(destination);
    }

    Ok(collected)
}

/// Rename, falling back to copy and delete across filesystems
fn move_file(source: &Utf8Path, destination: &Utf8Path) -> Result<()> {
    if fs::rename(source, destination).is_ok() {
        return Ok(());
    }

    fs::copy(source, destination)
        .with_context(|| format!("Failed to copy {} to {}", source, destination))?;
    fs::remove_file(source).with_context(|| format!("Failed to remove {}", source))?;
    Ok(())
}

/// `*.pack` files directly inside `staging`, sorted by name
fn sorted_archives(staging: &Utf8Path) -> Result<Vec<Utf8PathBuf>> {
    let mut archives = Vec::new();

    for entry in staging
        .read_dir_utf8()
        .with_context(|| format!("Failed to read staging directory: {}", staging))?
    {
        let entry = entry.with_context(|| format!("Failed to read entry in {}", staging))?;
        let path = entry.path();
        if path.is_file() && path.extension() == Some(ARCHIVE_EXTENSION) {
            archives.push(path.to_path_buf());
        }
    }

    archives.sort();
    Ok(archives)
}
