//! # Conversion recipes
//! The registry mapping a media type to its conversion recipe, loaded once
//! from `converters.yml` and immutable for the rest of the run.
//!
//! A base recipe may carry overrides keyed by format identifier (`puid`) or
//! by source extension; an override merges field-wise on top of the base
//! recipe before any decision is taken.
use std::{collections::HashMap, path::Path, process};

use serde::{Deserialize, Deserializer};

/// The acceptance rule of a recipe.
///
/// In YAML this is either the literal `true` (everything with this media
/// type is already archival) or a table of version or encoding names which
/// are acceptable as-is.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Accept {
    All(bool),
    Rules(AcceptRules),
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AcceptRules {
    #[serde(default)]
    pub version: Vec<String>,
    #[serde(default)]
    pub encoding: Vec<String>,
}

/// Distinguishes an absent key from an explicit `~` (null) value, which for
/// `dest-ext` mean "reuse the source extension" and "no extension".
fn double_option<'de, D>(de: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Deserialize::deserialize(de).map(Some)
}

/// The overridable subset of a recipe, used in `puid:` and `source-ext:`
/// tables.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct RecipeOverride {
    pub command: Option<String>,
    pub ext: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub dest_ext: Option<Option<String>>,
    pub accept: Option<Accept>,
    pub keep: Option<bool>,
    pub timeout: Option<u64>,
}

/// A conversion recipe for one media type.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct Recipe {
    /// Shell command template. Absent means "no conversion".
    pub command: Option<String>,
    /// Canonical extension for the media type, used when renaming originals.
    pub ext: Option<String>,
    /// Extension appended to the destination artifact. Absent: reuse the
    /// source extension. Null: no extension.
    #[serde(default, deserialize_with = "double_option")]
    pub dest_ext: Option<Option<String>>,
    pub accept: Option<Accept>,
    /// Retain the original even after a successful conversion.
    pub keep: Option<bool>,
    /// Per-recipe override of the default command timeout, in seconds.
    pub timeout: Option<u64>,
    /// Refinements applied when the record's format identifier matches.
    #[serde(default)]
    pub puid: HashMap<String, RecipeOverride>,
    /// Refinements applied when the source extension matches.
    #[serde(default)]
    pub source_ext: HashMap<String, RecipeOverride>,
}

impl Recipe {
    /// Return a copy of this recipe with any matching `puid` or source
    /// extension override merged on top. A `puid` match takes precedence.
    pub fn refine(&self, puid: Option<&str>, ext: Option<&str>) -> Self {
        let over = puid
            .and_then(|p| self.puid.get(p))
            .or_else(|| ext.and_then(|e| self.source_ext.get(e)));
        let Some(over) = over else {
            return self.clone();
        };
        Self {
            command: over.command.clone().or_else(|| self.command.clone()),
            ext: over.ext.clone().or_else(|| self.ext.clone()),
            dest_ext: over.dest_ext.clone().or_else(|| self.dest_ext.clone()),
            accept: over.accept.clone().or_else(|| self.accept.clone()),
            keep: over.keep.or(self.keep),
            timeout: over.timeout.or(self.timeout),
            puid: HashMap::new(),
            source_ext: HashMap::new(),
        }
    }

    /// Does the acceptance rule match the identified version or encoding?
    pub fn accepts(&self, version: Option<&str>, encoding: Option<&str>) -> bool {
        match &self.accept {
            Some(Accept::All(all)) => *all,
            Some(Accept::Rules(rules)) => {
                if !rules.version.is_empty() {
                    version.is_some_and(|v| rules.version.iter().any(|r| r == v))
                } else if !rules.encoding.is_empty() {
                    encoding.is_some_and(|e| rules.encoding.iter().any(|r| r == e))
                } else {
                    false
                }
            }
            None => false,
        }
    }

    /// The extension to append to the destination artifact.
    ///
    /// `source_ext` is the record's current extension including the leading
    /// dot, or empty. In `orig_ext` mode a differing destination extension
    /// is stacked on top of the source extension (`.docx.pdf`).
    pub fn dest_ext(&self, source_ext: &str, orig_ext: bool) -> String {
        let mut dest = match &self.dest_ext {
            None => source_ext.to_owned(),
            Some(None) => String::new(),
            Some(Some(e)) => format!(".{}", e.trim_matches('.')),
        };
        if orig_ext && dest != source_ext {
            dest = format!("{source_ext}{dest}");
        }
        dest
    }

    /// Render the command template for a concrete invocation, shell-quoting
    /// every substituted path.
    pub fn render_command(
        &self,
        source: &Path,
        dest: &Path,
        temp: &Path,
        stem: &str,
    ) -> Option<String> {
        let template = self.command.as_deref()?;
        let quote = |p: &Path| shell_words::quote(&p.to_string_lossy()).into_owned();

        let mut cmd = template.to_owned();
        cmd = cmd.replace("<source-parent>", &quote(source.parent().unwrap_or(source)));
        cmd = cmd.replace("<dest-parent>", &quote(dest.parent().unwrap_or(dest)));
        cmd = cmd.replace("<source>", &quote(source));
        cmd = cmd.replace("<dest>", &quote(dest));
        cmd = cmd.replace("<temp>", &quote(temp));
        cmd = cmd.replace("<pid>", &process::id().to_string());
        cmd = cmd.replace("<stem>", &shell_words::quote(stem));
        Some(cmd)
    }
}

/// The immutable recipe registry, keyed by media type.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    recipes: HashMap<String, Recipe>,
}

impl Registry {
    pub fn new(recipes: HashMap<String, Recipe>) -> Self {
        Self { recipes }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml).map(Self::new)
    }

    pub fn get(&self, mime: &str) -> Option<&Recipe> {
        self.recipes.get(mime)
    }

    /// Whether any recipe command mentions the given needle. Used to decide
    /// whether the office server is required for this run.
    pub fn any_command_contains(&self, needle: &str) -> bool {
        self.recipes
            .values()
            .filter_map(|r| r.command.as_deref())
            .any(|c| c.contains(needle))
    }
}
