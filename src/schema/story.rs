use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("story declares no regimes")]
    NoRegimes,
    #[error("unknown regime '{0}' referenced in {1}")]
    UnknownRegime(String, &'static str),
    #[error("unknown side-quest node '{0}'")]
    UnknownNode(String),
    #[error("palette entry '{0}' has no beat definition")]
    UnknownBeat(String),
}

/// The six beat categories of a palette, in pool order.
pub const CATEGORIES: [&str; 6] = [
    "movement",
    "environment",
    "challenge",
    "support",
    "maintenance",
    "reflection",
];

/// An additive contribution to one regime's instantaneous weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub regime: String,
    pub weight: f64,
    pub when: String,
}

/// Beats a regime offers, grouped by category.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Palette {
    pub regime: String,
    #[serde(default)]
    pub movement: Vec<String>,
    #[serde(default)]
    pub environment: Vec<String>,
    #[serde(default)]
    pub challenge: Vec<String>,
    #[serde(default)]
    pub support: Vec<String>,
    #[serde(default)]
    pub maintenance: Vec<String>,
    #[serde(default)]
    pub reflection: Vec<String>,
}

impl Palette {
    /// All beats in category order, duplicates kept at first position.
    pub fn beats(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for list in [
            &self.movement,
            &self.environment,
            &self.challenge,
            &self.support,
            &self.maintenance,
            &self.reflection,
        ] {
            for beat in list {
                if !out.contains(&beat.as_str()) {
                    out.push(beat);
                }
            }
        }
        out
    }

    pub fn contains(&self, beat: &str) -> bool {
        self.beats().contains(&beat)
    }
}

/// Token preconditions and effects of one beat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeatDef {
    pub id: String,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub grants: Vec<String>,
}

/// A score increment for `beat` when `when` holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bonus {
    pub beat: String,
    pub bonus: f64,
    pub when: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerSettings {
    pub beats_per_step: usize,
    pub history_len: usize,
    pub cooldown_window: usize,
    pub cooldown_factor: f64,
    pub native_score: f64,
    pub foreign_score: f64,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            beats_per_step: 3,
            history_len: 16,
            cooldown_window: 4,
            cooldown_factor: 0.4,
            native_score: 1.0,
            foreign_score: 0.2,
        }
    }
}

/// An allowed regime transition and the line that marks it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bridge {
    pub from: String,
    pub to: String,
    pub id: String,
    /// Used when the surface table has nothing for `id`.
    #[serde(default)]
    pub line: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestNode {
    pub id: String,
    #[serde(default)]
    pub edges: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestOverride {
    pub node: String,
    /// Only override when the classified regime is this one.
    #[serde(default)]
    pub when_regime: Option<String>,
    pub force: String,
}

/// The side-quest graph and how it steers the middle of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SideQuest {
    pub nodes: Vec<QuestNode>,
    pub entry: String,
    pub terminal: String,
    /// `(from, to)`: taken instead of the first edge when the signal
    /// exceeds the threshold.
    pub special_edge: (String, String),
    pub signal: String,
    pub threshold: f64,
    #[serde(default = "default_slice")]
    pub slice: (f64, f64),
    #[serde(default)]
    pub overrides: Vec<QuestOverride>,
}

fn default_slice() -> (f64, f64) {
    (0.15, 0.85)
}

impl SideQuest {
    pub fn node(&self, id: &str) -> Option<&QuestNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// A labelled band: applies when the value is `<= max`. The last band of a
/// list catches everything above.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub label: String,
    pub max: f64,
}

/// Picks the first band whose `max` is at least `value`, else the last.
pub fn band_for(bands: &[Band], value: f64) -> Option<&str> {
    bands
        .iter()
        .find(|b| value <= b.max)
        .or_else(|| bands.last())
        .map(|b| b.label.as_str())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerrainSettings {
    pub signal: String,
    pub bands: Vec<Band>,
}

/// Fixed lines and beats that frame every narrative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anchors {
    pub opening: String,
    pub closing: String,
    pub call: String,
    #[serde(rename = "return")]
    pub return_beat: String,
}

/// Everything the regime, planner and bridge stages need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryConfig {
    /// Declaration order breaks ties between regimes.
    pub regimes: Vec<String>,
    #[serde(default = "default_smoothing")]
    pub smoothing: f64,
    #[serde(default)]
    pub contributions: Vec<Contribution>,
    pub palettes: Vec<Palette>,
    pub beats: Vec<BeatDef>,
    #[serde(default)]
    pub bonuses: Vec<Bonus>,
    #[serde(default)]
    pub planner: PlannerSettings,
    #[serde(default)]
    pub initial_tokens: Vec<String>,
    #[serde(default)]
    pub bridges: Vec<Bridge>,
    pub side_quest: SideQuest,
    /// Band labels for `step % 10`; `max` is the last step of each band.
    pub time_bands: Vec<Band>,
    pub terrain: TerrainSettings,
    pub anchors: Anchors,
    #[serde(default = "default_pov")]
    pub pov: String,
}

fn default_smoothing() -> f64 {
    0.7
}

fn default_pov() -> String {
    "third".to_string()
}

impl StoryConfig {
    /// Parse and validate a story from a RON string.
    pub fn parse_ron(input: &str) -> Result<StoryConfig, StoryError> {
        let story: StoryConfig = ron::from_str(input)?;
        story.validate()?;
        Ok(story)
    }

    pub fn load_from_ron(path: &Path) -> Result<StoryConfig, StoryError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }

    /// The story shipped with the crate.
    pub fn reference() -> Result<StoryConfig, StoryError> {
        Self::parse_ron(crate::story_data::STORY)
    }

    pub fn palette(&self, regime: &str) -> Option<&Palette> {
        self.palettes.iter().find(|p| p.regime == regime)
    }

    pub fn beat(&self, id: &str) -> Option<&BeatDef> {
        self.beats.iter().find(|b| b.id == id)
    }

    fn has_regime(&self, name: &str) -> bool {
        self.regimes.iter().any(|r| r == name)
    }

    /// Check cross references. Dangling regime, node or beat names are
    /// configuration errors rather than silent no-ops.
    pub fn validate(&self) -> Result<(), StoryError> {
        if self.regimes.is_empty() {
            return Err(StoryError::NoRegimes);
        }
        for c in &self.contributions {
            if !self.has_regime(&c.regime) {
                return Err(StoryError::UnknownRegime(c.regime.clone(), "contributions"));
            }
        }
        for p in &self.palettes {
            if !self.has_regime(&p.regime) {
                return Err(StoryError::UnknownRegime(p.regime.clone(), "palettes"));
            }
            for beat in p.beats() {
                if self.beat(beat).is_none() {
                    return Err(StoryError::UnknownBeat(beat.to_string()));
                }
            }
        }
        for b in &self.bridges {
            for regime in [&b.from, &b.to] {
                if !self.has_regime(regime) {
                    return Err(StoryError::UnknownRegime(regime.clone(), "bridges"));
                }
            }
        }
        let quest = &self.side_quest;
        for id in [&quest.entry, &quest.terminal, &quest.special_edge.0, &quest.special_edge.1] {
            if quest.node(id).is_none() {
                return Err(StoryError::UnknownNode(id.clone()));
            }
        }
        for node in &quest.nodes {
            for edge in &node.edges {
                if quest.node(edge).is_none() {
                    return Err(StoryError::UnknownNode(edge.clone()));
                }
            }
        }
        for o in &quest.overrides {
            if quest.node(&o.node).is_none() {
                return Err(StoryError::UnknownNode(o.node.clone()));
            }
            if !self.has_regime(&o.force) {
                return Err(StoryError::UnknownRegime(o.force.clone(), "side_quest overrides"));
            }
            if let Some(ref r) = o.when_regime {
                if !self.has_regime(r) {
                    return Err(StoryError::UnknownRegime(r.clone(), "side_quest overrides"));
                }
            }
        }
        Ok(())
    }
}
