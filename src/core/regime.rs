/// Regime classifier: a smoothed weighted vote over narrative tones.

use tracing::{trace, warn};

use crate::core::expr::{Bindings, Expr};
use crate::schema::story::StoryConfig;

/// A normalized weight per regime, in declaration order.
///
/// Always sums to 1; a vector with no mass falls back to uniform.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightVector {
    entries: Vec<(String, f64)>,
}

impl WeightVector {
    pub fn uniform(regimes: &[String]) -> WeightVector {
        let w = if regimes.is_empty() {
            0.0
        } else {
            1.0 / regimes.len() as f64
        };
        WeightVector {
            entries: regimes.iter().map(|r| (r.clone(), w)).collect(),
        }
    }

    /// Normalize raw weights. Negative and non-finite weights count as 0;
    /// zero total mass yields the uniform vector.
    pub fn normalized(regimes: &[String], raw: &[f64]) -> WeightVector {
        let clean: Vec<f64> = regimes
            .iter()
            .enumerate()
            .map(|(i, _)| raw.get(i).copied().filter(|w| w.is_finite()).unwrap_or(0.0).max(0.0))
            .collect();
        let total: f64 = clean.iter().sum();
        if total <= 0.0 || !total.is_finite() {
            return Self::uniform(regimes);
        }
        WeightVector {
            entries: regimes
                .iter()
                .zip(clean)
                .map(|(r, w)| (r.clone(), w / total))
                .collect(),
        }
    }

    /// `alpha * previous + (1 - alpha) * current`, renormalized.
    pub fn blend(previous: &WeightVector, current: &WeightVector, alpha: f64) -> WeightVector {
        let regimes: Vec<String> = previous.entries.iter().map(|(r, _)| r.clone()).collect();
        let raw: Vec<f64> = previous
            .entries
            .iter()
            .map(|(r, p)| alpha * p + (1.0 - alpha) * current.get(r))
            .collect();
        Self::normalized(&regimes, &raw)
    }

    pub fn get(&self, regime: &str) -> f64 {
        self.entries
            .iter()
            .find(|(r, _)| r == regime)
            .map(|(_, w)| *w)
            .unwrap_or(0.0)
    }

    /// The heaviest regime; ties go to the earliest declared.
    pub fn dominant(&self) -> Option<&str> {
        let mut best: Option<(&str, f64)> = None;
        for (r, w) in &self.entries {
            if best.map_or(true, |(_, bw)| *w > bw) {
                best = Some((r, *w));
            }
        }
        best.map(|(r, _)| r)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(r, w)| (r.as_str(), *w))
    }

    pub fn total(&self) -> f64 {
        self.entries.iter().map(|(_, w)| w).sum()
    }
}

/// One compiled contribution rule.
#[derive(Debug, Clone)]
struct Contribution {
    regime_index: usize,
    weight: f64,
    when: Option<Expr>,
}

/// Result of classifying one step.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub regime: String,
    pub instantaneous: WeightVector,
    pub running: WeightVector,
}

/// Stateful classifier for one run. Carries the smoothed vector forward.
#[derive(Debug, Clone)]
pub struct RegimeClassifier {
    regimes: Vec<String>,
    contributions: Vec<Contribution>,
    alpha: f64,
    running: WeightVector,
}

impl RegimeClassifier {
    /// Compile the story's contribution rules. A rule whose expression does
    /// not compile is kept but never fires.
    pub fn new(story: &StoryConfig) -> RegimeClassifier {
        let contributions = story
            .contributions
            .iter()
            .filter_map(|c| {
                let regime_index = story.regimes.iter().position(|r| *r == c.regime)?;
                let when = match Expr::parse(&c.when) {
                    Ok(e) => Some(e),
                    Err(e) => {
                        warn!(regime = %c.regime, expr = %c.when, error = %e, "contribution never fires");
                        None
                    }
                };
                Some(Contribution {
                    regime_index,
                    weight: c.weight,
                    when,
                })
            })
            .collect();

        RegimeClassifier {
            regimes: story.regimes.clone(),
            contributions,
            alpha: story.smoothing,
            running: WeightVector::uniform(&story.regimes),
        }
    }

    /// Instantaneous vote for one step's signals.
    pub fn instantaneous(&self, bindings: &Bindings) -> WeightVector {
        let mut raw = vec![0.0; self.regimes.len()];
        for c in &self.contributions {
            let Some(ref expr) = c.when else { continue };
            match expr.holds(bindings) {
                Ok(true) => raw[c.regime_index] += c.weight,
                Ok(false) => {}
                Err(e) => trace!(regime = %self.regimes[c.regime_index], error = %e, "contribution skipped"),
            }
        }
        WeightVector::normalized(&self.regimes, &raw)
    }

    /// Classify the next step and advance the running vector.
    pub fn classify(&mut self, bindings: &Bindings) -> Classification {
        let instantaneous = self.instantaneous(bindings);
        self.running = WeightVector::blend(&self.running, &instantaneous, self.alpha);
        let regime = self
            .running
            .dominant()
            .or_else(|| self.regimes.first().map(String::as_str))
            .unwrap_or_default()
            .to_string();
        Classification {
            regime,
            instantaneous,
            running: self.running.clone(),
        }
    }

    pub fn running(&self) -> &WeightVector {
        &self.running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::expr::Value;
    use crate::schema::story::Contribution as Rule;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn story_with(rules: Vec<Rule>) -> StoryConfig {
        let mut story = StoryConfig::reference().unwrap();
        story.regimes = names(&["calm", "storm", "dream"]);
        story.contributions = rules;
        story
    }

    fn rule(regime: &str, weight: f64, when: &str) -> Rule {
        Rule {
            regime: regime.to_string(),
            weight,
            when: when.to_string(),
        }
    }

    fn bindings(var: f64) -> Bindings {
        let mut b = Bindings::default();
        b.insert("x.var", Value::Number(var));
        b
    }

    #[test]
    fn zero_mass_is_uniform() {
        let regimes = names(&["a", "b", "c", "d", "e"]);
        let v = WeightVector::normalized(&regimes, &[0.0; 5]);
        for (_, w) in v.iter() {
            assert_eq!(w, 0.2);
        }
        let neg = WeightVector::normalized(&regimes, &[-1.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(neg, WeightVector::uniform(&regimes));
    }

    #[test]
    fn normalization_sums_to_one() {
        let regimes = names(&["a", "b"]);
        let v = WeightVector::normalized(&regimes, &[3.0, 1.0]);
        assert_eq!(v.get("a"), 0.75);
        assert_eq!(v.get("b"), 0.25);
        assert!((v.total() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn ties_go_to_first_declared() {
        let regimes = names(&["a", "b", "c"]);
        assert_eq!(WeightVector::uniform(&regimes).dominant(), Some("a"));
        let v = WeightVector::normalized(&regimes, &[1.0, 2.0, 2.0]);
        assert_eq!(v.dominant(), Some("b"));
    }

    #[test]
    fn blend_keeps_history() {
        let regimes = names(&["a", "b"]);
        let prev = WeightVector::normalized(&regimes, &[1.0, 0.0]);
        let cur = WeightVector::normalized(&regimes, &[0.0, 1.0]);
        let mixed = WeightVector::blend(&prev, &cur, 0.7);
        assert!((mixed.get("a") - 0.7).abs() < 1e-12);
        assert!((mixed.get("b") - 0.3).abs() < 1e-12);
    }

    #[test]
    fn inertia_delays_regime_switch() {
        let story = story_with(vec![rule("storm", 1.0, "x.var > 0.5")]);
        let mut classifier = RegimeClassifier::new(&story);

        // Uniform start and no votes: first declared regime.
        assert_eq!(classifier.classify(&bindings(0.0)).regime, "calm");

        // One storm step: running = 0.7 * 1/3 + 0.3 * 1 for storm.
        let c = classifier.classify(&bindings(1.0));
        assert_eq!(c.instantaneous.get("storm"), 1.0);
        assert!((c.running.get("storm") - (0.7 / 3.0 + 0.3)).abs() < 1e-12);
        assert_eq!(c.regime, "storm");
        assert!((c.running.total() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn smoothing_resists_single_spike() {
        let story = story_with(vec![
            rule("calm", 1.0, "x.var < 0.5"),
            rule("storm", 1.0, "x.var > 0.5"),
        ]);
        let mut classifier = RegimeClassifier::new(&story);
        for _ in 0..5 {
            assert_eq!(classifier.classify(&bindings(0.0)).regime, "calm");
        }
        // A single storm step does not outweigh five calm ones.
        assert_eq!(classifier.classify(&bindings(1.0)).regime, "calm");
    }

    #[test]
    fn failing_rules_contribute_nothing() {
        let story = story_with(vec![
            rule("storm", 1.0, "missing.signal > 1"),
            rule("dream", 1.0, "x.var >"),
        ]);
        let classifier = RegimeClassifier::new(&story);
        let v = classifier.instantaneous(&bindings(2.0));
        assert_eq!(v, WeightVector::uniform(&story.regimes));
    }

    #[test]
    fn contributions_accumulate() {
        let story = story_with(vec![
            rule("dream", 0.5, "x.var > 0"),
            rule("dream", 0.5, "x.var > 1"),
            rule("storm", 1.0, "x.var > 1"),
        ]);
        let classifier = RegimeClassifier::new(&story);
        let v = classifier.instantaneous(&bindings(2.0));
        assert_eq!(v.get("dream"), 0.5);
        assert_eq!(v.get("storm"), 0.5);
        assert_eq!(v.get("calm"), 0.0);
    }
}
