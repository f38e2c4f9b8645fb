/// Run-scoped narrative context: the token set and recent-beat history.
///
/// One instance per generation run, threaded explicitly through planning.
use rustc_hash::FxHashSet;
use std::collections::VecDeque;

/// Facts established so far in a run. Tokens are only ever added.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenSet {
    tokens: FxHashSet<String>,
}

impl TokenSet {
    pub fn new<I, S>(initial: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: initial.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, token: &str) -> bool {
        self.tokens.contains(token)
    }

    /// True when every token in `required` is present.
    pub fn satisfies(&self, required: &[String]) -> bool {
        required.iter().all(|t| self.tokens.contains(t))
    }

    pub fn grant<'a>(&mut self, tokens: impl IntoIterator<Item = &'a String>) {
        self.tokens.extend(tokens.into_iter().cloned());
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Tokens in sorted order.
    pub fn sorted(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.tokens.iter().map(String::as_str).collect();
        out.sort_unstable();
        out
    }
}

/// Sliding window of the most recently emitted beats, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct BeatHistory {
    beats: VecDeque<String>,
    capacity: usize,
}

impl BeatHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            beats: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a beat, dropping the oldest when full.
    pub fn record(&mut self, beat: &str) {
        if self.capacity == 0 {
            return;
        }
        if self.beats.len() == self.capacity {
            self.beats.pop_front();
        }
        self.beats.push_back(beat.to_string());
    }

    /// Whether `beat` is among the last `window` emitted beats.
    pub fn recently_used(&self, beat: &str, window: usize) -> bool {
        self.beats.iter().rev().take(window).any(|b| b == beat)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.beats.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.beats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beats.is_empty()
    }
}

/// Mutable state owned by a single run.
#[derive(Debug, Clone, PartialEq)]
pub struct NarrativeContext {
    pub tokens: TokenSet,
    pub history: BeatHistory,
}

impl NarrativeContext {
    pub fn new(initial_tokens: &[String], history_len: usize) -> Self {
        Self {
            tokens: TokenSet::new(initial_tokens.iter().cloned()),
            history: BeatHistory::new(history_len),
        }
    }
}
