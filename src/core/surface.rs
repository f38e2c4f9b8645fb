/// Surface resolution maps beat and bridge identifiers to literal lines.
///
/// The pipeline only depends on [`SurfaceResolver`]; [`SurfaceTable`] is the
/// RON-backed implementation shipped with the crate.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}

/// Context tags sent with every lookup: `mood`, `pov`, `time`, `terrain`
/// and the step's codebook tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SurfaceContext {
    tags: BTreeMap<String, String>,
}

impl SurfaceContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: &str) {
        self.tags.insert(key.to_string(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

/// Anything that can turn an identifier plus context into text.
///
/// An empty string means "nothing to say"; callers skip the line.
pub trait SurfaceResolver {
    fn resolve(&self, id: &str, ctx: &SurfaceContext) -> String;
}

impl<F> SurfaceResolver for F
where
    F: Fn(&str, &SurfaceContext) -> String,
{
    fn resolve(&self, id: &str, ctx: &SurfaceContext) -> String {
        self(id, ctx)
    }
}

/// A context-gated wording of a surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    /// Tags that must equal the context's. Tags not listed match anything.
    #[serde(default)]
    pub when: BTreeMap<String, String>,
    pub text: String,
}

impl Variant {
    pub fn matches(&self, ctx: &SurfaceContext) -> bool {
        self.when
            .iter()
            .all(|(k, v)| ctx.get(k) == Some(v.as_str()))
    }
}

/// All wordings of one identifier.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Surface {
    #[serde(default)]
    pub variants: Vec<Variant>,
    #[serde(default)]
    pub default: String,
}

/// Identifier-keyed surface table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SurfaceTable {
    pub surfaces: HashMap<String, Surface>,
}

impl SurfaceTable {
    /// Parse a table from RON: a map of identifier to `(variants, default)`.
    pub fn parse_ron(input: &str) -> Result<SurfaceTable, SurfaceError> {
        let surfaces: HashMap<String, Surface> = ron::from_str(input)?;
        Ok(SurfaceTable { surfaces })
    }

    pub fn load_from_ron(path: &Path) -> Result<SurfaceTable, SurfaceError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }

    /// The surfaces shipped with the crate.
    pub fn reference() -> Result<SurfaceTable, SurfaceError> {
        Self::parse_ron(crate::story_data::SURFACES)
    }

    /// Merge another table into this one. Entries from `other` replace
    /// entries with the same identifier.
    pub fn merge(&mut self, other: SurfaceTable) {
        for (id, surface) in other.surfaces {
            self.surfaces.insert(id, surface);
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.surfaces.contains_key(id)
    }
}

impl SurfaceResolver for SurfaceTable {
    /// First matching variant in declared order, else the default line,
    /// else empty.
    fn resolve(&self, id: &str, ctx: &SurfaceContext) -> String {
        let Some(surface) = self.surfaces.get(id) else {
            return String::new();
        };
        surface
            .variants
            .iter()
            .find(|v| v.matches(ctx))
            .map(|v| v.text.clone())
            .unwrap_or_else(|| surface.default.clone())
    }
}
