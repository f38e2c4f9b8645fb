/// Side-quest path: a deterministic walk through a small directed graph
/// that steers the regime over the middle slice of a run.
use crate::core::state::State;
use crate::schema::story::SideQuest;

/// A computed path and the steps it covers.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestPath {
    /// First step of the slice (inclusive).
    pub start: usize,
    /// End of the slice (exclusive).
    pub end: usize,
    pub nodes: Vec<String>,
}

/// Step range `[floor(n * lo), floor(n * hi))` for a run of `n` steps.
pub fn slice_bounds(total: usize, (lo, hi): (f64, f64)) -> (usize, usize) {
    let start = (total as f64 * lo).floor().max(0.0) as usize;
    let end = ((total as f64 * hi).floor().max(0.0) as usize).min(total);
    (start.min(end), end)
}

impl QuestPath {
    /// Walk the graph once over the slice of `states`.
    ///
    /// The walk starts at the entry node. At slice step `k` it reads the
    /// quest signal of that step: from the special edge's source node it
    /// takes the special edge when the signal exceeds the threshold,
    /// otherwise every node follows its first listed edge. The walk stops
    /// at the terminal node, at a node with no edges, or when the path
    /// covers the slice; the terminal node is appended if the walk did not
    /// end there.
    pub fn compute(quest: &SideQuest, states: &[State]) -> QuestPath {
        let (start, end) = slice_bounds(states.len(), quest.slice);
        let slice_len = end - start;
        let mut nodes = vec![quest.entry.clone()];

        for k in 0..slice_len {
            if nodes.len() >= slice_len {
                break;
            }
            let current = nodes[nodes.len() - 1].as_str();
            if current == quest.terminal {
                break;
            }
            let signal = states[start + k].bindings().number(&quest.signal);
            let (ref special_from, ref special_to) = quest.special_edge;
            let next = if current == special_from && signal > quest.threshold {
                Some(special_to.clone())
            } else {
                quest
                    .node(current)
                    .and_then(|n| n.edges.first())
                    .cloned()
            };
            match next {
                Some(node) => nodes.push(node),
                None => break,
            }
        }

        if nodes.last() != Some(&quest.terminal) {
            nodes.push(quest.terminal.clone());
        }

        QuestPath { start, end, nodes }
    }

    /// The node active at `step`, or `None` outside the slice.
    pub fn node_at(&self, step: usize) -> Option<&str> {
        if step < self.start || step >= self.end {
            return None;
        }
        let k = step - self.start;
        self.nodes
            .get(k)
            .or_else(|| self.nodes.last())
            .map(String::as_str)
    }

    /// The regime to plan with at `step`: the first matching override of the
    /// active node, else `classified` unchanged.
    pub fn steer<'a>(&self, quest: &'a SideQuest, step: usize, classified: &'a str) -> &'a str {
        let Some(node) = self.node_at(step) else {
            return classified;
        };
        quest
            .overrides
            .iter()
            .find(|o| {
                o.node == node
                    && o.when_regime
                        .as_deref()
                        .map_or(true, |r| r == classified)
            })
            .map(|o| o.force.as_str())
            .unwrap_or(classified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::ChannelStats;
    use crate::schema::story::{QuestNode, QuestOverride};

    fn node(id: &str, edges: &[&str]) -> QuestNode {
        QuestNode {
            id: id.to_string(),
            edges: edges.iter().map(|e| e.to_string()).collect(),
        }
    }

    fn quest() -> SideQuest {
        SideQuest {
            nodes: vec![
                node("gate", &["trials"]),
                node("trials", &["trials", "inmost"]),
                node("inmost", &["reward"]),
                node("reward", &["exit"]),
                node("exit", &[]),
            ],
            entry: "gate".to_string(),
            terminal: "exit".to_string(),
            special_edge: ("trials".to_string(), "inmost".to_string()),
            signal: "seismic.var".to_string(),
            threshold: 0.001,
            slice: (0.15, 0.85),
            overrides: vec![
                QuestOverride {
                    node: "inmost".to_string(),
                    when_regime: None,
                    force: "shamanic".to_string(),
                },
                QuestOverride {
                    node: "trials".to_string(),
                    when_regime: Some("fairytale".to_string()),
                    force: "trickster".to_string(),
                },
            ],
        }
    }

    fn states(vars: &[f64]) -> Vec<State> {
        vars.iter()
            .enumerate()
            .map(|(i, v)| {
                let mut s = State {
                    index: i,
                    ..State::default()
                };
                s.stats.insert(
                    "seismic".to_string(),
                    ChannelStats {
                        mean: 0.0,
                        variance: *v,
                        trend: 0.0,
                    },
                );
                s
            })
            .collect()
    }

    #[test]
    fn slice_uses_floor_of_fractions() {
        assert_eq!(slice_bounds(6, (0.15, 0.85)), (0, 5));
        assert_eq!(slice_bounds(20, (0.15, 0.85)), (3, 17));
        assert_eq!(slice_bounds(0, (0.15, 0.85)), (0, 0));
        assert_eq!(slice_bounds(10, (0.9, 0.2)), (2, 2));
    }

    #[test]
    fn quiet_signal_loops_in_trials() {
        let q = quest();
        let path = QuestPath::compute(&q, &states(&[0.0; 20]));
        assert_eq!((path.start, path.end), (3, 17));
        assert_eq!(path.nodes.len(), 15);
        assert_eq!(path.nodes[0], "gate");
        assert!(path.nodes[1..14].iter().all(|n| n == "trials"));
        assert_eq!(path.nodes.last().map(String::as_str), Some("exit"));
    }

    #[test]
    fn spike_takes_special_edge() {
        let q = quest();
        let mut vars = vec![0.0; 20];
        vars[6] = 0.01; // slice step 3
        let path = QuestPath::compute(&q, &states(&vars));
        assert_eq!(
            &path.nodes[..7],
            &["gate", "trials", "trials", "trials", "inmost", "reward", "exit"]
        );
        assert_eq!(path.nodes.len(), 7);
    }

    #[test]
    fn signal_at_threshold_does_not_fire() {
        let q = quest();
        let path = QuestPath::compute(&q, &states(&[0.001; 20]));
        assert!(!path.nodes.iter().any(|n| n == "inmost"));
    }

    #[test]
    fn node_lookup_inside_and_outside_slice() {
        let q = quest();
        let path = QuestPath::compute(&q, &states(&[0.0; 20]));
        assert_eq!(path.node_at(2), None);
        assert_eq!(path.node_at(3), Some("gate"));
        assert_eq!(path.node_at(4), Some("trials"));
        assert_eq!(path.node_at(17), None);
    }

    #[test]
    fn short_path_holds_last_node() {
        let q = quest();
        let mut vars = vec![0.01; 20];
        vars[3] = 0.0;
        let path = QuestPath::compute(&q, &states(&vars));
        assert_eq!(path.nodes, vec!["gate", "trials", "inmost", "reward", "exit"]);
        assert_eq!(path.node_at(16), Some("exit"));
    }

    #[test]
    fn overrides_steer_regime() {
        let q = quest();
        let path = QuestPath {
            start: 0,
            end: 3,
            nodes: vec!["trials".to_string(), "inmost".to_string(), "exit".to_string()],
        };
        assert_eq!(path.steer(&q, 0, "fairytale"), "trickster");
        assert_eq!(path.steer(&q, 0, "gothic"), "gothic");
        assert_eq!(path.steer(&q, 1, "gothic"), "shamanic");
        assert_eq!(path.steer(&q, 2, "fairytale"), "fairytale");
        assert_eq!(path.steer(&q, 5, "fairytale"), "fairytale");
    }

    #[test]
    fn empty_run_still_has_terminal() {
        let path = QuestPath::compute(&quest(), &[]);
        assert_eq!(path.nodes, vec!["gate", "exit"]);
        assert_eq!(path.node_at(0), None);
    }
}
