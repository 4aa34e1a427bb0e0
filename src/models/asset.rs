use camino::{Utf8Path, Utf8PathBuf};
use std::fmt;

/// Extension shared by every asset file the importer accepts.
pub const ASSET_EXTENSION: &str = ".sbfres";

/// Extension of the intermediate descriptor written by the importer.
pub const INTERMEDIATE_EXTENSION: &str = ".xml";

/// Suffix marking skeletal animation containers.
pub const ANIMATION_SUFFIX: &str = "_Animation.sbfres";

/// Suffix of the first texture container kind.
pub const TEXTURE1_SUFFIX: &str = ".Tex1.sbfres";

/// Suffix of the second texture container kind. These are never converted.
pub const TEXTURE2_SUFFIX: &str = ".Tex2.sbfres";

/// Classification of an asset file by its name.
///
/// The set is closed: every file with the asset extension falls into exactly
/// one of these, with [`AssetKind::Plain`] as the catch-all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    Plain,
    Animation,
    Texture1,
    Texture2,
    NumberedVariant,
}

impl AssetKind {
    /// Textures have no scene representation, so the export stage is skipped.
    pub fn is_texture(self) -> bool {
        matches!(self, AssetKind::Texture1 | AssetKind::Texture2)
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AssetKind::Plain => "plain",
            AssetKind::Animation => "animation",
            AssetKind::Texture1 => "texture-1",
            AssetKind::Texture2 => "texture-2",
            AssetKind::NumberedVariant => "numbered-variant",
        };
        f.write_str(name)
    }
}

/// An asset file discovered in the input directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetFile {
    pub file_name: String,
    pub kind: AssetKind,
    pub group_key: String,
    pub base_name: String,
}

/// One asset file's trip through the import/export pipeline.
///
/// Built by the planner, consumed exactly once by a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionTask {
    /// Per-group output directory; exists before the task is scheduled
    pub output_dir: Utf8PathBuf,
    pub file_name: String,
    pub base_name: String,
    pub group_key: String,
    pub kind: AssetKind,
}

impl ConversionTask {
    pub fn new(asset: AssetFile, output_dir: Utf8PathBuf) -> Self {
        Self {
            output_dir,
            file_name: asset.file_name,
            base_name: asset.base_name,
            group_key: asset.group_key,
            kind: asset.kind,
        }
    }

    /// Full path of the source asset inside the input directory.
    pub fn source_path(&self, input_dir: &Utf8Path) -> Utf8PathBuf {
        input_dir.join(&self.file_name)
    }

    /// Path of the descriptor the importer writes for this task.
    pub fn intermediate_path(&self) -> Utf8PathBuf {
        self.output_dir
            .join(format!("{}{}", self.base_name, INTERMEDIATE_EXTENSION))
    }

    /// Output directory rendered with a trailing separator.
    ///
    /// The converter tools join file names onto this string themselves.
    pub fn output_dir_arg(&self) -> String {
        with_trailing_separator(&self.output_dir)
    }

    /// Whether the export stage runs for this task. Textures are import-only.
    pub fn needs_export(&self) -> bool {
        !self.kind.is_texture()
    }
}

/// Render a directory path with exactly one trailing `/`.
pub fn with_trailing_separator(dir: &Utf8Path) -> String {
    let rendered = dir.as_str();
    if rendered.ends_with('/') || rendered.ends_with('\\') {
        rendered.to_string()
    } else {
        format!("{}/", rendered)
    }
}
