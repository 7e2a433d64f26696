//! Declarative transition tables.
//!
//! Each saga kind is defined as a table of
//! `(current state, incoming event type) → next state` rows plus a set of
//! terminal states. The engine evaluates the table generically; the rows
//! are the whole state machine, written out longhand.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Event type delivered when a bus-scheduled saga timeout fires.
///
/// Timeouts are routed through the same transition table as regular
/// events; by convention they share a row with the explicit failure event
/// and lead into the compensation path.
pub const TIMEOUT_FIRED: &str = "TimeoutFired";

/// Transition table for one saga kind.
///
/// `start` rows create a new instance from an initial event; `on` rows
/// advance an existing one. There are deliberately no rows out of a
/// terminal state, and the engine refuses to apply events to a finished
/// instance regardless of the table contents.
#[derive(Debug, Clone)]
pub struct TransitionTable<S> {
    initial: HashMap<&'static str, S>,
    transitions: HashMap<(S, &'static str), S>,
    terminal: HashSet<S>,
}

impl<S: Copy + Eq + Hash> TransitionTable<S> {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            initial: HashMap::new(),
            transitions: HashMap::new(),
            terminal: HashSet::new(),
        }
    }

    /// Adds an initial row: `event_type` creates a new instance in `next`.
    pub fn start(mut self, event_type: &'static str, next: S) -> Self {
        self.initial.insert(event_type, next);
        self
    }

    /// Adds a transition row.
    pub fn on(mut self, from: S, event_type: &'static str, next: S) -> Self {
        self.transitions.insert((from, event_type), next);
        self
    }

    /// Flags a state as terminal.
    pub fn terminal(mut self, state: S) -> Self {
        self.terminal.insert(state);
        self
    }

    /// Looks up the state a new instance enters for an initial event.
    pub fn initial_state(&self, event_type: &str) -> Option<S> {
        self.initial.get(event_type).copied()
    }

    /// Looks up the next state for `(current, event_type)`.
    pub fn next_state(&self, current: S, event_type: &str) -> Option<S> {
        self.transitions.get(&(current, event_type)).copied()
    }

    /// Returns true if `state` is terminal.
    pub fn is_terminal(&self, state: S) -> bool {
        self.terminal.contains(&state)
    }
}

impl<S: Copy + Eq + Hash> Default for TransitionTable<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum State {
        Working,
        Cleanup,
        Done,
        Dead,
    }

    fn table() -> TransitionTable<State> {
        TransitionTable::new()
            .start("Begin", State::Working)
            .on(State::Working, "Finished", State::Done)
            .on(State::Working, "Broke", State::Cleanup)
            .on(State::Working, TIMEOUT_FIRED, State::Cleanup)
            .on(State::Cleanup, "CleanedUp", State::Dead)
            .terminal(State::Done)
            .terminal(State::Dead)
    }

    #[test]
    fn initial_events_create_instances() {
        let table = table();
        assert_eq!(table.initial_state("Begin"), Some(State::Working));
        assert_eq!(table.initial_state("Finished"), None);
    }

    #[test]
    fn lookup_follows_defined_edges_only() {
        let table = table();
        assert_eq!(
            table.next_state(State::Working, "Finished"),
            Some(State::Done)
        );
        assert_eq!(
            table.next_state(State::Working, TIMEOUT_FIRED),
            Some(State::Cleanup)
        );
        assert_eq!(table.next_state(State::Cleanup, "Finished"), None);
        assert_eq!(table.next_state(State::Done, "Broke"), None);
    }

    #[test]
    fn terminal_flags() {
        let table = table();
        assert!(table.is_terminal(State::Done));
        assert!(table.is_terminal(State::Dead));
        assert!(!table.is_terminal(State::Working));
    }
}
