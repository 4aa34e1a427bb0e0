//! Group-key resolution for asset file names.
//!
//! Files that belong to the same model (its animations, its first texture
//! container, its numbered variants) are exported into one output directory.
//! The directory name is the *group key*, derived from the file name alone by an
//! ordered list of [`GroupRule`]s; the first rule whose predicate matches wins.
//!
//! | Priority | Rule               | Example                     | Group key |
//! |----------|--------------------|-----------------------------|-----------|
//! | 1        | `animation`        | `Chest_Animation.sbfres`    | `Chest`   |
//! | 2        | `texture-1`        | `Chest.Tex1.sbfres`         | `Chest`   |
//! | 3        | `texture-2`        | `Chest.Tex2.sbfres`         | `Chest` (excluded) |
//! | 4        | `numbered-variant` | `Chest-01.sbfres`           | `Chest`   |
//! | 5        | `plain`            | `Chest.sbfres`              | `Chest`   |
//!
//! After the key is derived, two prefix filters run on the key: the reserved
//! deny-list and the optional allow-list.
//!
//! # Examples
//!
//! ```
//! use bfres_batch::services::GroupKeyResolver;
//!
//! let resolver = GroupKeyResolver::new(Vec::new());
//! let resolution = resolver.resolve("Chest-01.sbfres");
//! assert!(resolution.include);
//! assert_eq!(resolution.group_key, "Chest");
//! assert_eq!(resolution.base_name, "Chest-01");
//! ```

use crate::models::{
    ANIMATION_SUFFIX, ASSET_EXTENSION, AssetFile, AssetKind, TEXTURE1_SUFFIX, TEXTURE2_SUFFIX,
};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

/// Group-key prefixes that are never converted (demo content, armor, weapons,
/// player models, costume assets).
pub const RESERVED_PREFIXES: [&str; 5] = ["Demo", "Armor_", "Weapon_", "Player", "UMii_"];

/// `<base>-NN.sbfres`, with exactly two digits.
static NUMBERED_VARIANT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+)-[0-9]{2}\.sbfres$").expect("Invalid numbered variant regex")
});

/// A named file-name rule: predicate plus transform to the group key.
pub struct GroupRule {
    pub name: &'static str,
    pub kind: AssetKind,
    /// Derives the group key, or `None` when the rule does not apply
    derive: fn(&str) -> Option<String>,
}

impl GroupRule {
    /// Apply this rule to a file name.
    pub fn apply(&self, file_name: &str) -> Option<String> {
        (self.derive)(file_name)
    }
}

impl fmt::Debug for GroupRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupRule")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

fn strip(file_name: &str, suffix: &str) -> Option<String> {
    file_name.strip_suffix(suffix).map(str::to_string)
}

fn animation_key(file_name: &str) -> Option<String> {
    strip(file_name, ANIMATION_SUFFIX)
}

fn texture1_key(file_name: &str) -> Option<String> {
    strip(file_name, TEXTURE1_SUFFIX)
}

fn texture2_key(file_name: &str) -> Option<String> {
    strip(file_name, TEXTURE2_SUFFIX)
}

fn numbered_variant_key(file_name: &str) -> Option<String> {
    NUMBERED_VARIANT
        .captures(file_name)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn plain_key(file_name: &str) -> Option<String> {
    Some(
        file_name
            .strip_suffix(ASSET_EXTENSION)
            .unwrap_or(file_name)
            .to_string(),
    )
}

/// The rules in priority order. `plain` always matches, so it must stay last.
pub static GROUP_RULES: [GroupRule; 5] = [
    GroupRule {
        name: "animation",
        kind: AssetKind::Animation,
        derive: animation_key,
    },
    GroupRule {
        name: "texture-1",
        kind: AssetKind::Texture1,
        derive: texture1_key,
    },
    GroupRule {
        name: "texture-2",
        kind: AssetKind::Texture2,
        derive: texture2_key,
    },
    GroupRule {
        name: "numbered-variant",
        kind: AssetKind::NumberedVariant,
        derive: numbered_variant_key,
    },
    GroupRule {
        name: "plain",
        kind: AssetKind::Plain,
        derive: plain_key,
    },
];

/// Run the rule list on a file name and return the matching kind and group key.
pub fn derive_group_key(file_name: &str) -> (AssetKind, String) {
    for rule in &GROUP_RULES {
        if let Some(key) = rule.apply(file_name) {
            return (rule.kind, key);
        }
    }
    // unreachable in practice: `plain` always matches
    (AssetKind::Plain, file_name.to_string())
}

/// Why a file was left out of the task list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExclusionReason {
    /// Second texture container kind, never converted
    TextureType2,
    /// Group key starts with a reserved prefix
    Reserved { prefix: String },
    /// Allow-list configured and no prefix matched
    NotAllowed,
    /// Key is empty, `.` or `..`, or contains a path separator; it would not
    /// name a directory inside the output root
    InvalidGroupKey,
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExclusionReason::TextureType2 => f.write_str("texture-2 file"),
            ExclusionReason::Reserved { prefix } => write!(f, "reserved prefix {}", prefix),
            ExclusionReason::NotAllowed => f.write_str("not in prefix filters"),
            ExclusionReason::InvalidGroupKey => f.write_str("invalid group key"),
        }
    }
}

/// Outcome of resolving one file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub include: bool,
    pub group_key: String,
    pub base_name: String,
    pub kind: AssetKind,
    pub exclusion: Option<ExclusionReason>,
}

impl Resolution {
    /// Convert an included resolution into an [`AssetFile`].
    pub fn into_asset(self, file_name: &str) -> Option<AssetFile> {
        if !self.include {
            return None;
        }
        Some(AssetFile {
            file_name: file_name.to_string(),
            kind: self.kind,
            group_key: self.group_key,
            base_name: self.base_name,
        })
    }
}

/// Resolves file names to group keys and applies the prefix filters.
///
/// Holds only the allow-list; resolution itself is a pure function of the name.
#[derive(Debug, Clone, Default)]
pub struct GroupKeyResolver {
    allow_prefixes: Vec<String>,
}

impl GroupKeyResolver {
    /// Create a resolver with the given allow-list (empty allows every key).
    pub fn new(allow_prefixes: Vec<String>) -> Self {
        Self { allow_prefixes }
    }

    pub fn allow_prefixes(&self) -> &[String] {
        &self.allow_prefixes
    }

    /// Resolve a file name into its group key and inclusion decision.
    pub fn resolve(&self, file_name: &str) -> Resolution {
        let (kind, group_key) = derive_group_key(file_name);
        let base_name = file_name
            .strip_suffix(ASSET_EXTENSION)
            .unwrap_or(file_name)
            .to_string();

        let exclusion = self.exclusion_for(kind, &group_key);

        Resolution {
            include: exclusion.is_none(),
            group_key,
            base_name,
            kind,
            exclusion,
        }
    }

    fn exclusion_for(&self, kind: AssetKind, group_key: &str) -> Option<ExclusionReason> {
        if kind == AssetKind::Texture2 {
            return Some(ExclusionReason::TextureType2);
        }

        if !is_valid_directory_name(group_key) {
            return Some(ExclusionReason::InvalidGroupKey);
        }

        if let Some(prefix) = RESERVED_PREFIXES
            .iter()
            .copied()
            .find(|prefix| group_key.starts_with(prefix))
        {
            return Some(ExclusionReason::Reserved {
                prefix: prefix.to_string(),
            });
        }

        if !self.allow_prefixes.is_empty()
            && !self
                .allow_prefixes
                .iter()
                .any(|prefix| group_key.starts_with(prefix.as_str()))
        {
            return Some(ExclusionReason::NotAllowed);
        }

        None
    }
}

/// A group key becomes one directory directly below the output root.
fn is_valid_directory_name(group_key: &str) -> bool {
    !matches!(group_key, "" | "." | "..") && !group_key.contains(['/', '\\'])
}
