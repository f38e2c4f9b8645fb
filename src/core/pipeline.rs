/// The narrative pipeline: Table → States → Regimes → Beats → Lines.
///
/// Wires together table parsing, state derivation, regime classification,
/// side-quest steering, bridge insertion, beat planning and surface lookup.
/// A run is a pure function of its inputs: the engine holds no run state,
/// so identical inputs always produce identical lines.

use serde::Serialize;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::core::bridge::{BridgeTable, BridgeTracker};
use crate::core::context::NarrativeContext;
use crate::core::expr::{Bindings, Expr};
use crate::core::planner::BeatPlanner;
use crate::core::regime::RegimeClassifier;
use crate::core::sidequest::QuestPath;
use crate::core::state::{compute_states, State};
use crate::core::surface::{SurfaceContext, SurfaceError, SurfaceResolver, SurfaceTable};
use crate::core::table::parse_table;
use crate::schema::codebook::{Codebook, CodebookError, CodebookRegistry};
use crate::schema::record::Record;
use crate::schema::story::{band_for, StoryConfig, StoryError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("codebook error: {0}")]
    Codebook(#[from] CodebookError),
    #[error("story error: {0}")]
    Story(#[from] StoryError),
    #[error("surface error: {0}")]
    Surface(#[from] SurfaceError),
    #[error("no data: the input table has no records")]
    NoData,
    #[error("no codebook configured")]
    MissingCodebook,
    #[error("no codebook for domain: {0}")]
    UnknownDomain(String),
}

/// What happened at one step, for inspection and tooling.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepTrace {
    pub index: usize,
    /// Regime chosen by the classifier.
    pub classified: String,
    /// Regime used for planning after side-quest steering.
    pub regime: String,
    pub quest_node: Option<String>,
    pub bridge: Option<String>,
    pub beats: Vec<String>,
    pub threshold_beats: Vec<String>,
    pub time: Option<String>,
    pub terrain: Option<String>,
}

/// A complete run: the output lines and the per-step decisions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Narrative {
    pub lines: Vec<String>,
    pub steps: Vec<StepTrace>,
}

#[derive(Debug, Clone)]
struct ThresholdRule {
    when: Option<Expr>,
    emit: Vec<String>,
}

/// Everything compiled once from the configuration.
#[derive(Debug, Clone)]
struct Compiled {
    classifier: RegimeClassifier,
    planner: BeatPlanner,
    bridges: BridgeTable,
    thresholds: Vec<ThresholdRule>,
}

impl Compiled {
    fn new(codebook: &Codebook, story: &StoryConfig) -> Compiled {
        let thresholds = codebook
            .functions
            .thresholds
            .iter()
            .map(|rule| {
                let when = match Expr::parse(&rule.condition) {
                    Ok(e) => Some(e),
                    Err(e) => {
                        warn!(entity = %codebook.entity, expr = %rule.condition, error = %e, "threshold rule skipped");
                        None
                    }
                };
                ThresholdRule {
                    when,
                    emit: rule.emit.clone(),
                }
            })
            .collect();

        Compiled {
            classifier: RegimeClassifier::new(story),
            planner: BeatPlanner::new(story),
            bridges: BridgeTable::new(story),
            thresholds,
        }
    }
}

/// Narrate a table with explicit configuration and any surface resolver.
pub fn narrate_with(
    table: &str,
    codebook: &Codebook,
    story: &StoryConfig,
    surfaces: &dyn SurfaceResolver,
) -> Result<Vec<String>, PipelineError> {
    let records = parse_table(table);
    let compiled = Compiled::new(codebook, story);
    assemble(&records, codebook, story, &compiled, surfaces).map(|n| n.lines)
}

/// The top-level engine. Built via `NarrativeEngine::builder()`.
pub struct NarrativeEngine {
    codebook: Codebook,
    story: StoryConfig,
    compiled: Compiled,
    surfaces: Box<dyn SurfaceResolver>,
}

/// Builder for constructing a `NarrativeEngine`.
#[derive(Default)]
pub struct NarrativeEngineBuilder {
    domain: Option<String>,
    codebook_path: Option<String>,
    story_path: Option<String>,
    surfaces_path: Option<String>,
    /// Directly provided codebook (for use without files).
    codebook: Option<Codebook>,
    /// Directly provided story (for use without files).
    story: Option<StoryConfig>,
    /// Directly provided surface table (for use without files).
    surfaces: Option<SurfaceTable>,
    /// A custom resolver; replaces any surface table.
    resolver: Option<Box<dyn SurfaceResolver>>,
}

impl NarrativeEngine {
    pub fn builder() -> NarrativeEngineBuilder {
        NarrativeEngineBuilder::default()
    }

    pub fn codebook(&self) -> &Codebook {
        &self.codebook
    }

    pub fn story(&self) -> &StoryConfig {
        &self.story
    }

    /// Narrate delimited table text.
    pub fn narrate(&self, table: &str) -> Result<Vec<String>, PipelineError> {
        self.narrate_records(&parse_table(table))
    }

    /// Narrate already-parsed records.
    pub fn narrate_records(&self, records: &[Record]) -> Result<Vec<String>, PipelineError> {
        self.generate(records).map(|n| n.lines)
    }

    /// Narrate records and keep the per-step decisions.
    pub fn generate(&self, records: &[Record]) -> Result<Narrative, PipelineError> {
        assemble(
            records,
            &self.codebook,
            &self.story,
            &self.compiled,
            self.surfaces.as_ref(),
        )
    }
}

fn push_line(lines: &mut Vec<String>, text: String) {
    if !text.is_empty() {
        lines.push(text);
    }
}

fn surface_context(state: &State, regime: &str, pov: &str) -> SurfaceContext {
    let mut ctx = SurfaceContext::new();
    for (name, value) in &state.tags {
        ctx.insert(name, value);
    }
    ctx.insert("mood", regime);
    ctx.insert("pov", pov);
    ctx
}

/// Ids emitted by every threshold rule that holds, in rule order.
fn fired_thresholds(rules: &[ThresholdRule], bindings: &Bindings) -> Vec<String> {
    let mut fired = Vec::new();
    for rule in rules {
        let Some(ref when) = rule.when else { continue };
        match when.holds(bindings) {
            Ok(true) => fired.extend(rule.emit.iter().cloned()),
            Ok(false) => {}
            Err(e) => trace!(error = %e, "threshold rule skipped"),
        }
    }
    fired
}

fn assemble(
    records: &[Record],
    codebook: &Codebook,
    story: &StoryConfig,
    compiled: &Compiled,
    surfaces: &dyn SurfaceResolver,
) -> Result<Narrative, PipelineError> {
    if records.is_empty() {
        return Err(PipelineError::NoData);
    }
    info!(entity = %codebook.entity, steps = records.len(), "narrating");

    let mut states = compute_states(records, codebook);
    let quest = &story.side_quest;
    let path = QuestPath::compute(quest, &states);
    debug!(start = path.start, end = path.end, nodes = ?path.nodes, "side-quest path");

    let mut classifier = compiled.classifier.clone();
    let mut run = NarrativeContext::new(&story.initial_tokens, compiled.planner.settings().history_len);
    let mut tracker = BridgeTracker::new(&compiled.bridges);
    let mut lines = Vec::new();
    let mut steps = Vec::with_capacity(states.len());

    let anchor_ctx = SurfaceContext::new().with("pov", &story.pov);
    push_line(&mut lines, story.anchors.opening.clone());
    push_line(&mut lines, surfaces.resolve(&story.anchors.call, &anchor_ctx));

    for state in states.iter_mut() {
        let i = state.index;

        let time = band_for(&story.time_bands, (i % 10) as f64).map(str::to_string);
        if let Some(ref t) = time {
            state.merge_tag("time", t);
        }
        let terrain_signal = state.bindings().number(&story.terrain.signal);
        let terrain = band_for(&story.terrain.bands, terrain_signal).map(str::to_string);
        if let Some(ref t) = terrain {
            state.merge_tag("terrain", t);
        }
        let bindings = state.bindings();

        let classification = classifier.classify(&bindings);
        let bridge = tracker.advance(&classification.regime);
        let regime = path.steer(quest, i, &classification.regime).to_string();
        let ctx = surface_context(state, &regime, &story.pov);

        if let Some(b) = bridge {
            let text = surfaces.resolve(&b.id, &ctx);
            push_line(&mut lines, if text.is_empty() { b.line.clone() } else { text });
        }

        let beats = compiled.planner.plan(&regime, &bindings, &mut run);
        for beat in &beats {
            push_line(&mut lines, surfaces.resolve(beat, &ctx));
        }

        let threshold_beats = fired_thresholds(&compiled.thresholds, &bindings);
        if let Some(text) = threshold_beats
            .iter()
            .map(|id| surfaces.resolve(id, &ctx))
            .find(|text| !text.is_empty())
        {
            lines.push(text);
        }

        debug!(
            step = i,
            classified = %classification.regime,
            regime = %regime,
            bridge = bridge.map(|b| b.id.as_str()),
            beats = ?beats,
            "step planned"
        );

        steps.push(StepTrace {
            index: i,
            classified: classification.regime,
            regime,
            quest_node: path.node_at(i).map(str::to_string),
            bridge: bridge.map(|b| b.id.clone()),
            beats,
            threshold_beats,
            time,
            terrain,
        });
    }

    push_line(&mut lines, surfaces.resolve(&story.anchors.return_beat, &anchor_ctx));
    push_line(&mut lines, story.anchors.closing.clone());

    info!(lines = lines.len(), tokens = run.tokens.len(), "narrative complete");
    Ok(Narrative { lines, steps })
}

impl NarrativeEngineBuilder {
    /// Use a built-in reference codebook by entity name.
    pub fn domain(mut self, entity: &str) -> Self {
        self.domain = Some(entity.to_string());
        self
    }

    pub fn codebook_path(mut self, path: &str) -> Self {
        self.codebook_path = Some(path.to_string());
        self
    }

    pub fn story_path(mut self, path: &str) -> Self {
        self.story_path = Some(path.to_string());
        self
    }

    /// Surfaces from this file are merged over the base table.
    pub fn surfaces_path(mut self, path: &str) -> Self {
        self.surfaces_path = Some(path.to_string());
        self
    }

    /// Provide a codebook directly (for use without files).
    pub fn with_codebook(mut self, codebook: Codebook) -> Self {
        self.codebook = Some(codebook);
        self
    }

    /// Provide a story directly (for use without files).
    pub fn with_story(mut self, story: StoryConfig) -> Self {
        self.story = Some(story);
        self
    }

    /// Provide the base surface table directly (for use without files).
    pub fn with_surfaces(mut self, surfaces: SurfaceTable) -> Self {
        self.surfaces = Some(surfaces);
        self
    }

    /// Resolve text with a custom resolver instead of a surface table.
    pub fn with_resolver(mut self, resolver: impl SurfaceResolver + 'static) -> Self {
        self.resolver = Some(Box::new(resolver));
        self
    }

    pub fn build(self) -> Result<NarrativeEngine, PipelineError> {
        // Explicit codebook, then file, then built-in domain.
        let codebook = if let Some(codebook) = self.codebook {
            codebook
        } else if let Some(ref path) = self.codebook_path {
            Codebook::load(Path::new(path))?
        } else if let Some(ref entity) = self.domain {
            CodebookRegistry::reference()?
                .get(entity)
                .cloned()
                .ok_or_else(|| PipelineError::UnknownDomain(entity.clone()))?
        } else {
            return Err(PipelineError::MissingCodebook);
        };

        let story = match (self.story, self.story_path) {
            (Some(story), _) => {
                story.validate()?;
                story
            }
            (None, Some(path)) => StoryConfig::load_from_ron(Path::new(&path))?,
            (None, None) => StoryConfig::reference()?,
        };

        let surfaces: Box<dyn SurfaceResolver> = match self.resolver {
            Some(resolver) => resolver,
            None => {
                let mut table = match self.surfaces {
                    Some(table) => table,
                    None => SurfaceTable::reference()?,
                };
                if let Some(ref path) = self.surfaces_path {
                    table.merge(SurfaceTable::load_from_ron(Path::new(path))?);
                }
                Box::new(table)
            }
        };

        let compiled = Compiled::new(&codebook, &story);
        Ok(NarrativeEngine {
            codebook,
            story,
            compiled,
            surfaces,
        })
    }
}
