/// Transition lines between consecutive regimes.
use crate::schema::story::{Bridge, StoryConfig};

/// Allow-list of regime transitions.
#[derive(Debug, Clone, Default)]
pub struct BridgeTable {
    bridges: Vec<Bridge>,
}

impl BridgeTable {
    pub fn new(story: &StoryConfig) -> Self {
        Self {
            bridges: story.bridges.clone(),
        }
    }

    /// The bridge for `previous -> current`, if listed. Self-transitions
    /// and unlisted pairs have none. First listed pair wins.
    pub fn lookup(&self, previous: &str, current: &str) -> Option<&Bridge> {
        if previous == current {
            return None;
        }
        self.bridges
            .iter()
            .find(|b| b.from == previous && b.to == current)
    }
}

/// Tracks the previous step's regime and reports listed transitions.
#[derive(Debug, Clone)]
pub struct BridgeTracker<'a> {
    table: &'a BridgeTable,
    previous: Option<String>,
}

impl<'a> BridgeTracker<'a> {
    pub fn new(table: &'a BridgeTable) -> Self {
        Self {
            table,
            previous: None,
        }
    }

    /// Record `regime` for this step and return the bridge to insert before
    /// it, if the regime changed along an allowed pair. The first step never
    /// bridges.
    pub fn advance(&mut self, regime: &str) -> Option<&'a Bridge> {
        let bridge = match self.previous.as_deref() {
            Some(prev) => self.table.lookup(prev, regime),
            None => None,
        };
        self.previous = Some(regime.to_string());
        bridge
    }

    pub fn previous(&self) -> Option<&str> {
        self.previous.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> BridgeTable {
        BridgeTable {
            bridges: vec![
                Bridge {
                    from: "fairytale".to_string(),
                    to: "gothic".to_string(),
                    id: "bridge_shadow".to_string(),
                    line: "The light thinned.".to_string(),
                },
                Bridge {
                    from: "fairytale".to_string(),
                    to: "gothic".to_string(),
                    id: "bridge_duplicate".to_string(),
                    line: String::new(),
                },
            ],
        }
    }

    #[test]
    fn listed_pair_bridges_once() {
        let t = table();
        assert_eq!(t.lookup("fairytale", "gothic").map(|b| b.id.as_str()), Some("bridge_shadow"));
    }

    #[test]
    fn unlisted_and_reverse_pairs_are_silent() {
        let t = table();
        assert!(t.lookup("gothic", "fairytale").is_none());
        assert!(t.lookup("heroic", "gothic").is_none());
    }

    #[test]
    fn self_transition_never_bridges() {
        let mut t = table();
        t.bridges.push(Bridge {
            from: "gothic".to_string(),
            to: "gothic".to_string(),
            id: "loop".to_string(),
            line: String::new(),
        });
        assert!(t.lookup("gothic", "gothic").is_none());
    }

    #[test]
    fn tracker_follows_sequence() {
        let t = table();
        let mut tracker = BridgeTracker::new(&t);
        assert!(tracker.advance("fairytale").is_none());
        assert!(tracker.advance("fairytale").is_none());
        assert_eq!(tracker.advance("gothic").map(|b| b.id.as_str()), Some("bridge_shadow"));
        assert!(tracker.advance("gothic").is_none());
        assert!(tracker.advance("fairytale").is_none());
        assert_eq!(tracker.previous(), Some("fairytale"));
    }
}
