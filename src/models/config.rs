use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

/// Batch configuration from `Batch Config.yaml`
///
/// Contains the worker settings, the group-key allow-list and the paths of the
/// external tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(rename = "Batch_Settings", default)]
    pub batch_settings: BatchSettings,
}

/// What a worker does with a task whose import stage failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Run the export stage anyway and record the failure
    #[default]
    Permissive,
    /// Skip the export stage when the import stage failed
    SkipExportOnImportFailure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSettings {
    #[serde(rename = "Parallel", default = "default_parallel")]
    pub parallel: bool,

    /// Worker count; 0 means one per available processing unit
    #[serde(rename = "Workers", default)]
    pub workers: usize,

    /// Allow-list of group-key prefixes; empty allows everything
    #[serde(rename = "Prefix Filters", default)]
    pub prefix_filters: Vec<String>,

    #[serde(rename = "Build Config", default = "default_build_config")]
    pub build_config: String,

    #[serde(rename = "Importer EXE", default)]
    pub importer_exe: String,

    #[serde(rename = "Exporter EXE", default)]
    pub exporter_exe: String,

    #[serde(rename = "Extractor EXE", default = "default_extractor_exe")]
    pub extractor_exe: String,

    #[serde(rename = "Extractor Args", default = "default_extractor_args")]
    pub extractor_args: Vec<String>,

    #[serde(rename = "Input Dir", default = "default_input_dir")]
    pub input_dir: String,

    #[serde(rename = "Output Dir", default = "default_output_dir")]
    pub output_dir: String,

    #[serde(rename = "Pack Dir", default = "default_pack_dir")]
    pub pack_dir: String,

    #[serde(rename = "Failure Policy", default)]
    pub failure_policy: FailurePolicy,

    #[serde(rename = "Debug Mode", default)]
    pub debug_mode: bool,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            parallel: true,
            workers: 0,
            prefix_filters: Vec::new(),
            build_config: default_build_config(),
            importer_exe: String::new(),
            exporter_exe: String::new(),
            extractor_exe: default_extractor_exe(),
            extractor_args: default_extractor_args(),
            input_dir: default_input_dir(),
            output_dir: default_output_dir(),
            pack_dir: default_pack_dir(),
            failure_policy: FailurePolicy::Permissive,
            debug_mode: false,
        }
    }
}

fn default_parallel() -> bool {
    true
}

fn default_build_config() -> String {
    "Release".to_string()
}

fn default_extractor_exe() -> String {
    "sarc".to_string()
}

fn default_extractor_args() -> Vec<String> {
    vec!["extract".to_string()]
}

fn default_input_dir() -> String {
    "In".to_string()
}

fn default_output_dir() -> String {
    "Out".to_string()
}

fn default_pack_dir() -> String {
    "Pack".to_string()
}

impl BatchSettings {
    /// Number of worker loops for this run.
    ///
    /// Serial mode always yields 1; a configured count of 0 falls back to the
    /// available parallelism of the machine.
    pub fn effective_workers(&self) -> usize {
        if !self.parallel {
            return 1;
        }
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Importer executable, defaulting to `<root>/Importer/<build>/BFRESImporter.exe`
    pub fn importer_path(&self, root: &Utf8Path) -> Utf8PathBuf {
        if self.importer_exe.is_empty() {
            root.join("Importer")
                .join(&self.build_config)
                .join("BFRESImporter.exe")
        } else {
            resolve_against(root, &self.importer_exe)
        }
    }

    /// Exporter executable, defaulting to `<root>/Exporter/<build>/FBXExporter.exe`
    pub fn exporter_path(&self, root: &Utf8Path) -> Utf8PathBuf {
        if self.exporter_exe.is_empty() {
            root.join("Exporter")
                .join(&self.build_config)
                .join("FBXExporter.exe")
        } else {
            resolve_against(root, &self.exporter_exe)
        }
    }
}

/// Relative paths are taken from the working root; absolute ones are kept.
fn resolve_against(root: &Utf8Path, path: &str) -> Utf8PathBuf {
    let path = Utf8Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
