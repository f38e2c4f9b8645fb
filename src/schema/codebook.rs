use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum CodebookError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("JSON deserialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported codebook format: {0}")]
    UnknownFormat(String),
}

/// Rolling window sizes.
///
/// `variance` is accepted for compatibility with existing codebooks but the
/// deriver uses `trend` for both rolling trend and rolling variance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Windows {
    pub trend: usize,
    #[serde(default)]
    pub variance: Option<usize>,
}

impl Default for Windows {
    fn default() -> Self {
        Self {
            trend: 5,
            variance: None,
        }
    }
}

/// A bin applies when the value is `<= max`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bin {
    pub id: String,
    pub max: f64,
}

/// A categorical tag rule: resolve `from`, then map it through the ordered
/// `(match, label)` pairs. First match wins; no match passes the raw value
/// through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NcvRule {
    pub from: String,
    #[serde(default)]
    pub map: Vec<(String, String)>,
}

impl NcvRule {
    pub fn label_for(&self, source: &str) -> String {
        self.map
            .iter()
            .find(|(matched, _)| matched == source)
            .map(|(_, label)| label.clone())
            .unwrap_or_else(|| source.to_string())
    }
}

/// A threshold rule: when the expression holds, emit the listed beats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRule {
    #[serde(rename = "if")]
    pub condition: String,
    #[serde(rename = "then", default)]
    pub emit: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Functions {
    #[serde(default)]
    pub thresholds: Vec<ThresholdRule>,
}

/// Static per-domain configuration of the state deriver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Codebook {
    pub entity: String,
    pub channels: Vec<String>,
    #[serde(default)]
    pub windows: Windows,
    #[serde(default)]
    pub bins: BTreeMap<String, Vec<Bin>>,
    #[serde(default)]
    pub ncv: BTreeMap<String, NcvRule>,
    #[serde(default)]
    pub functions: Functions,
}

impl Codebook {
    /// Parse a codebook from a JSON string.
    pub fn parse_json(input: &str) -> Result<Codebook, CodebookError> {
        Ok(serde_json::from_str(input)?)
    }

    /// Parse a codebook from a RON string.
    pub fn parse_ron(input: &str) -> Result<Codebook, CodebookError> {
        Ok(ron::from_str(input)?)
    }

    /// Load a codebook, choosing the format by file extension.
    pub fn load(path: &Path) -> Result<Codebook, CodebookError> {
        let contents = std::fs::read_to_string(path)?;
        match path.extension().and_then(|s| s.to_str()) {
            Some("json") => Self::parse_json(&contents),
            Some("ron") => Self::parse_ron(&contents),
            other => Err(CodebookError::UnknownFormat(
                other.unwrap_or("<none>").to_string(),
            )),
        }
    }

    /// The single window applied to every rolling statistic.
    pub fn window(&self) -> usize {
        self.windows.trend.max(1)
    }

    pub fn bins_for(&self, channel: &str) -> Option<&[Bin]> {
        self.bins.get(channel).map(Vec::as_slice)
    }
}

/// Codebooks keyed by entity name.
#[derive(Debug, Clone, Default)]
pub struct CodebookRegistry {
    codebooks: HashMap<String, Codebook>,
}

impl CodebookRegistry {
    pub fn new() -> Self {
        Self {
            codebooks: HashMap::new(),
        }
    }

    /// Register a codebook. A later codebook for the same entity replaces
    /// the earlier one.
    pub fn register(&mut self, codebook: Codebook) {
        for (channel, bins) in &codebook.bins {
            if bins.windows(2).any(|w| w[1].max < w[0].max) {
                warn!(entity = %codebook.entity, channel = %channel, "bins not in ascending order; first match wins");
            }
        }
        self.codebooks.insert(codebook.entity.clone(), codebook);
    }

    pub fn get(&self, entity: &str) -> Option<&Codebook> {
        self.codebooks.get(entity)
    }

    /// Entity names in sorted order.
    pub fn entities(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.codebooks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Load a codebook file, or every `.json`/`.ron` file in a directory.
    pub fn load_path(&mut self, path: &Path) -> Result<(), CodebookError> {
        if path.is_dir() {
            let mut paths = Vec::new();
            for entry in std::fs::read_dir(path)? {
                let entry_path = entry?.path();
                if matches!(
                    entry_path.extension().and_then(|s| s.to_str()),
                    Some("json") | Some("ron")
                ) {
                    paths.push(entry_path);
                }
            }
            paths.sort();
            for p in paths {
                self.register(Codebook::load(&p)?);
            }
        } else {
            self.register(Codebook::load(path)?);
        }
        Ok(())
    }

    /// The codebooks shipped with the crate.
    pub fn reference() -> Result<CodebookRegistry, CodebookError> {
        let mut registry = Self::new();
        registry.register(Codebook::parse_json(crate::story_data::GEOLOGY_CODEBOOK)?);
        registry.register(Codebook::parse_json(crate::story_data::BOTANY_CODEBOOK)?);
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_JSON: &str = r#"{
        "entity": "test",
        "channels": ["a"],
        "windows": { "trend": 3, "variance": 7 },
        "bins": { "a": [ { "id": "lo", "max": 5 }, { "id": "hi", "max": 10 } ] },
        "ncv": { "mood": { "from": "a.bin", "map": [["lo", "calm"]] } },
        "functions": { "thresholds": [ { "if": "a.bin == 'hi'", "then": ["alarm"] } ] }
    }"#;

    #[test]
    fn parse_json_codebook() {
        let cb = Codebook::parse_json(MINIMAL_JSON).unwrap();
        assert_eq!(cb.entity, "test");
        assert_eq!(cb.windows.trend, 3);
        assert_eq!(cb.windows.variance, Some(7));
        assert_eq!(cb.window(), 3);
        assert_eq!(cb.bins_for("a").unwrap().len(), 2);
        assert!(cb.bins_for("b").is_none());
        assert_eq!(cb.functions.thresholds[0].condition, "a.bin == 'hi'");
        assert_eq!(cb.functions.thresholds[0].emit, vec!["alarm".to_string()]);
    }

    #[test]
    fn parse_ron_codebook_with_defaults() {
        let input = r#"(
            entity: "ron_test",
            channels: ["x"],
            bins: { "x": [(id: "only", max: 1.0)] },
        )"#;
        let cb = Codebook::parse_ron(input).unwrap();
        assert_eq!(cb.entity, "ron_test");
        assert_eq!(cb.windows, Windows::default());
        assert!(cb.ncv.is_empty());
        assert!(cb.functions.thresholds.is_empty());
    }

    #[test]
    fn ncv_first_match_and_pass_through() {
        let rule = NcvRule {
            from: "a.var".to_string(),
            map: vec![
                ("low".to_string(), "still".to_string()),
                ("low".to_string(), "shadowed".to_string()),
            ],
        };
        assert_eq!(rule.label_for("low"), "still");
        assert_eq!(rule.label_for("high"), "high");
    }

    #[test]
    fn zero_window_is_clamped() {
        let mut cb = Codebook::parse_json(MINIMAL_JSON).unwrap();
        cb.windows.trend = 0;
        assert_eq!(cb.window(), 1);
    }

    #[test]
    fn registry_override_and_listing() {
        let mut registry = CodebookRegistry::new();
        let mut first = Codebook::parse_json(MINIMAL_JSON).unwrap();
        first.channels = vec!["old".to_string()];
        registry.register(first);
        registry.register(Codebook::parse_json(MINIMAL_JSON).unwrap());
        assert_eq!(registry.get("test").unwrap().channels, vec!["a".to_string()]);
        assert_eq!(registry.entities(), vec!["test"]);
    }

    #[test]
    fn reference_registry_loads() {
        let registry = CodebookRegistry::reference().unwrap();
        assert_eq!(registry.entities(), vec!["botany", "geology"]);
    }

    #[test]
    fn unknown_extension_rejected() {
        let err = Codebook::load(Path::new("Cargo.toml")).unwrap_err();
        assert!(matches!(err, CodebookError::UnknownFormat(ext) if ext == "toml"));
    }
}
