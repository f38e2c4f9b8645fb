/// Deriving per-record symbolic state from raw channels.
///
/// Binning, rolling statistics, the fixed setpoint/relative tags and the
/// codebook's categorical (NCV) tags. Pure and total: missing channels and
/// non-numeric cells never fail, they default to 0 or leave a tag absent.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::core::expr::{Bindings, Value};
use crate::schema::codebook::{Bin, Codebook};
use crate::schema::record::Record;

/// Rolling variance below this is "low".
pub const VARIANCE_LOW: f64 = 0.0001;
/// Rolling variance below this (and not low) is "med".
pub const VARIANCE_MED: f64 = 0.005;
/// Absolute rolling trend above this is "up"/"down".
pub const TREND_EPSILON: f64 = 0.01;
/// Margin for the lum/transpiration dominance tag.
pub const RELATIVE_MARGIN: f64 = 0.1;

/// Key of the lum vs. transpiration tag under `relative.`.
pub const RELATIVE_LUM_TRANSPIRATION: &str = "lum_transpiration";

/// Rolling statistics of one channel over the trailing window.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ChannelStats {
    pub mean: f64,
    pub variance: f64,
    pub trend: f64,
}

impl ChannelStats {
    /// Statistics over `window`: mean, population variance and
    /// `last - first` (0 for a single value).
    pub fn over(window: &[f64]) -> ChannelStats {
        if window.is_empty() {
            return ChannelStats::default();
        }
        let count = window.len() as f64;
        let mean = window.iter().sum::<f64>() / count;
        let variance = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count;
        let trend = if window.len() > 1 {
            window[window.len() - 1] - window[0]
        } else {
            0.0
        };
        ChannelStats {
            mean,
            variance,
            trend,
        }
    }

    pub fn variance_tag(&self) -> &'static str {
        variance_tag(self.variance)
    }

    pub fn trend_tag(&self) -> &'static str {
        trend_tag(self.trend)
    }
}

pub fn variance_tag(variance: f64) -> &'static str {
    if variance < VARIANCE_LOW {
        "low"
    } else if variance < VARIANCE_MED {
        "med"
    } else {
        "high"
    }
}

pub fn trend_tag(trend: f64) -> &'static str {
    if trend > TREND_EPSILON {
        "up"
    } else if trend < -TREND_EPSILON {
        "down"
    } else {
        "flat"
    }
}

/// First bin whose `max` is at least `value`; the last bin otherwise.
/// Bins are scanned in the order given and never sorted here.
pub fn assign_bin(bins: &[Bin], value: f64) -> Option<&str> {
    bins.iter()
        .find(|b| b.max >= value)
        .or_else(|| bins.last())
        .map(|b| b.id.as_str())
}

/// Derived state of one time step.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct State {
    pub index: usize,
    /// Current value of each tracked channel, coerced to a number.
    pub values: BTreeMap<String, f64>,
    pub bins: BTreeMap<String, String>,
    pub stats: BTreeMap<String, ChannelStats>,
    pub setpoints: BTreeMap<String, String>,
    pub relative: BTreeMap<String, String>,
    /// Codebook tags, plus `time` and `terrain` once the assembler adds them.
    pub tags: BTreeMap<String, String>,
}

impl State {
    pub fn bin(&self, channel: &str) -> Option<&str> {
        self.bins.get(channel).map(String::as_str)
    }

    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags.get(name).map(String::as_str)
    }

    /// Merge a late tag such as `time` or `terrain`.
    pub fn merge_tag(&mut self, name: &str, value: &str) {
        self.tags.insert(name.to_string(), value.to_string());
    }

    /// Resolve an NCV source path against this state.
    ///
    /// `<ch>.var` and `<ch>.trend` give the bucketed statistic,
    /// `setpoint.<key>` and `relative.<key>` the stored tag, `<ch>.bin` the
    /// bin id. Unknown shapes and untracked channels resolve to `None`.
    pub fn resolve_source(&self, path: &str) -> Option<String> {
        if let Some(channel) = path.strip_suffix(".var") {
            return self.stats.get(channel).map(|s| s.variance_tag().to_string());
        }
        if let Some(channel) = path.strip_suffix(".trend") {
            return self.stats.get(channel).map(|s| s.trend_tag().to_string());
        }
        if let Some(key) = path.strip_prefix("setpoint.") {
            return self.setpoints.get(key).cloned();
        }
        if let Some(key) = path.strip_prefix("relative.") {
            return self.relative.get(key).cloned();
        }
        if let Some(channel) = path.strip_suffix(".bin") {
            return self.bins.get(channel).cloned();
        }
        None
    }

    /// Named signals visible to threshold expressions.
    pub fn bindings(&self) -> Bindings {
        let mut b = Bindings::default();
        for (channel, value) in &self.values {
            b.insert(format!("{channel}.value"), Value::Number(*value));
        }
        for (channel, stats) in &self.stats {
            b.insert(format!("{channel}.mean"), Value::Number(stats.mean));
            b.insert(format!("{channel}.var"), Value::Number(stats.variance));
            b.insert(format!("{channel}.trend"), Value::Number(stats.trend));
        }
        for (channel, bin) in &self.bins {
            b.insert(format!("{channel}.bin"), Value::Text(bin.clone()));
        }
        for (key, tag) in &self.setpoints {
            b.insert(format!("setpoint.{key}"), Value::Text(tag.clone()));
        }
        for (key, tag) in &self.relative {
            b.insert(format!("relative.{key}"), Value::Text(tag.clone()));
        }
        for (name, tag) in &self.tags {
            b.insert(format!("tag.{name}"), Value::Text(tag.clone()));
        }
        b
    }
}

/// Derive one state per record, in order.
pub fn compute_states(records: &[Record], codebook: &Codebook) -> Vec<State> {
    let window = codebook.window();

    // Column-wise numeric series of every tracked channel.
    let series: Vec<(&str, Vec<f64>)> = codebook
        .channels
        .iter()
        .map(|ch| (ch.as_str(), records.iter().map(|r| r.number(ch)).collect()))
        .collect();

    records
        .iter()
        .enumerate()
        .map(|(i, record)| {
            let mut state = State {
                index: i,
                ..State::default()
            };
            let start = (i + 1).saturating_sub(window);

            for (channel, values) in &series {
                let value = values[i];
                state.values.insert(channel.to_string(), value);
                state
                    .stats
                    .insert(channel.to_string(), ChannelStats::over(&values[start..=i]));
                if let Some(bin) = codebook.bins_for(channel).and_then(|b| assign_bin(b, value)) {
                    state.bins.insert(channel.to_string(), bin.to_string());
                }
            }

            if let Some(temp) = state.bins.get("temp").cloned() {
                state.setpoints.insert("temp".to_string(), temp);
            }

            if record.has("lum") && record.has("transpiration") {
                let diff = record.number("lum") - record.number("transpiration");
                let tag = if diff > RELATIVE_MARGIN {
                    "lum_dominant"
                } else if -diff > RELATIVE_MARGIN {
                    "transpiration_dominant"
                } else {
                    "balanced"
                };
                state
                    .relative
                    .insert(RELATIVE_LUM_TRANSPIRATION.to_string(), tag.to_string());
            }

            for (name, rule) in &codebook.ncv {
                if let Some(source) = state.resolve_source(&rule.from) {
                    let label = rule.label_for(&source);
                    state.tags.insert(name.clone(), label);
                }
            }

            state
        })
        .collect()
}
