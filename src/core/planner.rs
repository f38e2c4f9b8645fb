/// Beat planning. Picks a step's beats under token preconditions, palette
/// affinity, data-driven bonuses and a repetition cooldown.
use rustc_hash::FxHashMap;
use tracing::{trace, warn};

use crate::core::context::NarrativeContext;
use crate::core::expr::{Bindings, Expr};
use crate::schema::story::{BeatDef, PlannerSettings, StoryConfig};

#[derive(Debug, Clone)]
struct CompiledBonus {
    beat: String,
    bonus: f64,
    when: Expr,
}

/// Planner compiled from a story. Holds no run state.
#[derive(Debug, Clone)]
pub struct BeatPlanner {
    settings: PlannerSettings,
    beats: FxHashMap<String, BeatDef>,
    /// Regime name and its palette beats in category order, in regime
    /// declaration order.
    palettes: Vec<(String, Vec<String>)>,
    bonuses: Vec<CompiledBonus>,
}

impl BeatPlanner {
    pub fn new(story: &StoryConfig) -> BeatPlanner {
        let beats = story
            .beats
            .iter()
            .map(|b| (b.id.clone(), b.clone()))
            .collect();

        let palettes = story
            .regimes
            .iter()
            .map(|regime| {
                let list = story
                    .palette(regime)
                    .map(|p| p.beats().into_iter().map(str::to_string).collect())
                    .unwrap_or_default();
                (regime.clone(), list)
            })
            .collect();

        let bonuses = story
            .bonuses
            .iter()
            .filter_map(|b| match Expr::parse(&b.when) {
                Ok(when) => Some(CompiledBonus {
                    beat: b.beat.clone(),
                    bonus: b.bonus,
                    when,
                }),
                Err(e) => {
                    warn!(beat = %b.beat, expr = %b.when, error = %e, "bonus never applies");
                    None
                }
            })
            .collect();

        BeatPlanner {
            settings: story.planner.clone(),
            beats,
            palettes,
            bonuses,
        }
    }

    pub fn settings(&self) -> &PlannerSettings {
        &self.settings
    }

    fn palette(&self, regime: &str) -> &[String] {
        self.palettes
            .iter()
            .find(|(r, _)| r == regime)
            .map(|(_, list)| list.as_slice())
            .unwrap_or(&[])
    }

    /// The active regime's palette first, then every other palette in
    /// declaration order, without duplicates.
    ///
    /// Beats from other regimes' palettes are candidates too, so the foreign
    /// score applies and a foreign beat carrying a bonus can outrank a cooled
    /// native one.
    pub fn candidate_pool(&self, regime: &str) -> Vec<&str> {
        let mut pool: Vec<&str> = self.palette(regime).iter().map(String::as_str).collect();
        for (other, list) in &self.palettes {
            if other == regime {
                continue;
            }
            for beat in list {
                if !pool.contains(&beat.as_str()) {
                    pool.push(beat);
                }
            }
        }
        pool
    }

    /// Whether every precondition of `beat` holds.
    pub fn is_feasible(&self, beat: &str, ctx: &NarrativeContext) -> bool {
        self.beats
            .get(beat)
            .map_or(true, |def| ctx.tokens.satisfies(&def.requires))
    }

    /// Palette affinity plus bonuses, scaled down when recently used.
    pub fn score(&self, beat: &str, regime: &str, bindings: &Bindings, ctx: &NarrativeContext) -> f64 {
        let mut score = if self.palette(regime).iter().any(|b| b == beat) {
            self.settings.native_score
        } else {
            self.settings.foreign_score
        };
        for bonus in self.bonuses.iter().filter(|b| b.beat == beat) {
            match bonus.when.holds(bindings) {
                Ok(true) => score += bonus.bonus,
                Ok(false) => {}
                Err(e) => trace!(beat, error = %e, "bonus skipped"),
            }
        }
        if ctx.history.recently_used(beat, self.settings.cooldown_window) {
            score *= self.settings.cooldown_factor;
        }
        score
    }

    /// Plan one step. Every candidate is scored once against the history as
    /// it stood when the step began, then candidates are taken in stable
    /// descending score order. Feasibility is rechecked before each pick, so
    /// a beat unlocked by an earlier pick's effects can still be taken.
    /// Returns fewer beats than requested when fewer are feasible.
    pub fn plan(&self, regime: &str, bindings: &Bindings, ctx: &mut NarrativeContext) -> Vec<String> {
        let mut ranked: Vec<(&str, f64)> = self
            .candidate_pool(regime)
            .into_iter()
            .map(|beat| (beat, self.score(beat, regime, bindings, ctx)))
            .collect();
        // Stable: equal scores keep pool order.
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        let mut chosen: Vec<String> = Vec::with_capacity(self.settings.beats_per_step);
        while chosen.len() < self.settings.beats_per_step {
            let next = ranked
                .iter()
                .map(|&(beat, _)| beat)
                .find(|&beat| !chosen.iter().any(|c| c == beat) && self.is_feasible(beat, ctx));
            let Some(beat) = next else { break };

            if let Some(def) = self.beats.get(beat) {
                ctx.tokens.grant(&def.grants);
            }
            ctx.history.record(beat);
            chosen.push(beat.to_string());
        }

        chosen
    }
}
