//! Phase inference from free-text status messages.
//!
//! The wire carries no phase field, only prose such as
//! `"Found 30 locations, deduplicating..."`. Each pipeline keeps its matching
//! rules in one [`PhaseRules`] table so a wording change on the backend shows
//! up as a failing rule test rather than a silently stuck progress display.
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

/// Tracks pipeline phase and counters from the ordered event sequence.
///
/// One tracker exists per session; it starts from `Default` at session start.
pub trait PhaseTracker: Default + Clone + fmt::Debug + Send + Sync + 'static {
    type Event;
    type Phase: Copy + Eq + fmt::Debug + Send + Sync;

    /// Applies one delivered event.
    fn observe(&mut self, event: &Self::Event);

    /// Current phase.
    fn phase(&self) -> Self::Phase;

    /// Every phase entered so far, starting with the initial one, without repeats.
    fn history(&self) -> &[Self::Phase];
}

/// Current phase plus the ordered list of phases entered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PhaseLog<P> {
    current: P,
    history: Vec<P>,
}

impl<P: Copy + Ord> PhaseLog<P> {
    pub fn new(initial: P) -> Self {
        Self {
            current: initial,
            history: vec![initial],
        }
    }

    pub fn current(&self) -> P {
        self.current
    }

    pub fn history(&self) -> &[P] {
        &self.history
    }

    /// Moves forward to `next`; backward or repeated transitions are ignored.
    pub fn advance(&mut self, next: P) -> bool {
        if next <= self.current {
            return false;
        }
        self.enter(next);
        true
    }

    /// Moves to `next` regardless of ordering (terminal overrides).
    pub fn force(&mut self, next: P) -> bool {
        if next == self.current {
            return false;
        }
        self.enter(next);
        true
    }

    fn enter(&mut self, next: P) {
        self.current = next;
        self.history.push(next);
    }
}

/// Effect of a matched rule: receives the first integer found in the message.
pub type RuleEffect<S> = fn(&mut S, Option<usize>);

struct PhaseRule<S> {
    name: &'static str,
    pattern: Regex,
    effect: RuleEffect<S>,
}

/// Ordered table of status-message rules for one tracker type.
pub struct PhaseRules<S> {
    rules: Vec<PhaseRule<S>>,
}

impl<S> PhaseRules<S> {
    /// Compiles a table of `(name, pattern, effect)` rules.
    ///
    /// Patterns are fixed at compile time, so an invalid one is a programming
    /// error.
    pub fn new(table: &[(&'static str, &'static str, RuleEffect<S>)]) -> Self {
        let rules = table
            .iter()
            .map(|&(name, pattern, effect)| PhaseRule {
                name,
                pattern: Regex::new(pattern)
                    .unwrap_or_else(|e| panic!("phase rule `{name}` has invalid pattern: {e}")),
                effect,
            })
            .collect();
        Self { rules }
    }

    /// Applies every matching rule in table order and returns their names.
    pub fn apply(&self, state: &mut S, message: &str) -> Vec<&'static str> {
        let count = first_count(message);
        let mut matched = Vec::new();
        for rule in &self.rules {
            if rule.pattern.is_match(message) {
                (rule.effect)(state, count);
                matched.push(rule.name);
            }
        }
        matched
    }

    /// Rule names in evaluation order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.rules.iter().map(|rule| rule.name)
    }
}

static COUNT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("count pattern"));

/// First unsigned integer in `message`, if any.
pub fn first_count(message: &str) -> Option<usize> {
    COUNT_RE
        .find(message)
        .and_then(|m| m.as_str().parse::<usize>().ok())
}
