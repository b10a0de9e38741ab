use super::ValueSet;
use crate::net::PartyId;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Notify;

/// Vote bookkeeping for one agreement round. All sender sets are append-only;
/// a sender appears at most once per (phase, value), duplicates are rejected
/// by the handlers before they reach this state.
#[derive(Default)]
pub struct RoundState {
    // value => senders whose EST(r, value) has been accepted
    pub est_values: [HashSet<PartyId>; 2],
    // value => whether this party has itself broadcast EST(r, value)
    pub est_sent: [bool; 2],
    // values that reached the 2f+1 EST threshold this round
    pub bin_values: HashSet<bool>,
    // value => senders whose AUX(r, value) has been accepted
    pub aux_values: [HashSet<PartyId>; 2],
    // value set => senders whose CONF(r, set) has been accepted
    pub conf_values: HashMap<ValueSet, HashSet<PartyId>>,
    // value set => whether this party has broadcast CONF(r, set)
    pub conf_sent: HashMap<ValueSet, bool>,
}

impl RoundState {
    /// Check if a sender has already sent an estimate for a value this round.
    pub fn has_est(&self, sender: PartyId, value: bool) -> bool {
        self.est_values[value as usize].contains(&sender)
    }

    /// Check if a sender has already sent an aux vote for a value this round.
    pub fn has_aux(&self, sender: PartyId, value: bool) -> bool {
        self.aux_values[value as usize].contains(&sender)
    }

    /// Check if a sender has already sent a conf vote for a value set.
    pub fn has_conf(&self, sender: PartyId, values: ValueSet) -> bool {
        self.conf_values
            .get(&values)
            .map(|senders| senders.contains(&sender))
            .unwrap_or(false)
    }

    /// Record a conf vote from a sender.
    pub fn insert_conf(&mut self, sender: PartyId, values: ValueSet) {
        self.conf_values
            .entry(values)
            .or_insert_with(HashSet::new)
            .insert(sender);
    }

    /// Check if this party already broadcast a conf message for a value set.
    pub fn conf_sent(&self, values: ValueSet) -> bool {
        self.conf_sent.get(&values).copied().unwrap_or(false)
    }

    /// Mark a conf message as broadcast for a value set.
    pub fn mark_conf_sent(&mut self, values: ValueSet) {
        self.conf_sent.insert(values, true);
    }

    /// The AUX-phase exit condition: at least n - f aux votes compatible with
    /// the current bin_values. A single value wins outright when n - f
    /// senders voted for it; otherwise the combined count over bin_values
    /// decides.
    pub fn aux_outcome(&self, n: usize, f: usize) -> Option<ValueSet> {
        if self.bin_values.contains(&true) && self.aux_values[1].len() >= n - f {
            return Some(ValueSet::One);
        }
        if self.bin_values.contains(&false) && self.aux_values[0].len() >= n - f {
            return Some(ValueSet::Zero);
        }
        let combined: usize = self
            .bin_values
            .iter()
            .map(|&v| self.aux_values[v as usize].len())
            .sum();
        if combined >= n - f {
            return Some(ValueSet::Both);
        }
        None
    }

    /// The CONF-phase exit condition, re-deriving the candidate set against
    /// conf votes. Counting every vote whose value set is a subset of the
    /// current bin_values keeps this robust against bin_values growing after
    /// the AUX phase finished.
    pub fn conf_outcome(&self, n: usize, f: usize) -> Option<ValueSet> {
        let count = |values: ValueSet| {
            self.conf_values
                .get(&values)
                .map(|senders| senders.len())
                .unwrap_or(0)
        };
        if self.bin_values.contains(&true) && count(ValueSet::One) >= n - f {
            return Some(ValueSet::One);
        }
        if self.bin_values.contains(&false) && count(ValueSet::Zero) >= n - f {
            return Some(ValueSet::Zero);
        }
        let subset_total: usize = self
            .conf_values
            .iter()
            .filter(|(values, senders)| !senders.is_empty() && values.is_subset(&self.bin_values))
            .map(|(_, senders)| senders.len())
            .sum();
        if subset_total >= n - f {
            return Some(ValueSet::Both);
        }
        None
    }
}

/// Stores the internal state for one binary agreement session at a party.
#[derive(Default)]
pub struct BaStore {
    pub rounds: HashMap<u32, RoundState>, // round => vote bookkeeping
    pub input: Option<bool>,              // the initial estimate, set once
    pub decided: Option<bool>,            // the decided bit, set once
    pub flagged: HashSet<PartyId>,        // senders caught equivocating
    // Each signal has exactly one waiting task, so notify_one's stored
    // permit makes the wait-then-recheck loops lossless.
    pub bv_signal: Arc<Notify>,       // set on every vote-state mutation
    pub input_signal: Arc<Notify>,    // set when the input arrives
    pub decision_signal: Arc<Notify>, // set when the decision is recorded
}

impl BaStore {
    /// The bookkeeping for a round, created on first access.
    pub fn round_mut(&mut self, round: u32) -> &mut RoundState {
        self.rounds.entry(round).or_default()
    }

    pub fn round(&self, round: u32) -> Option<&RoundState> {
        self.rounds.get(&round)
    }

    /// Sets the initial estimate. Returns false if an input was already
    /// provided, in which case the new value is ignored.
    pub fn set_input(&mut self, value: bool) -> bool {
        if self.input.is_some() {
            return false;
        }
        self.input = Some(value);
        self.input_signal.notify_one();
        true
    }

    /// Records the decision and wakes the decision waiter. Idempotent; the
    /// first recorded value stays.
    pub fn set_decided(&mut self, value: bool) {
        if self.decided.is_none() {
            self.decided = Some(value);
            self.decision_signal.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aux_outcome_single_value() {
        let mut state = RoundState::default();
        state.bin_values.insert(true);
        for i in 0..3 {
            state.aux_values[1].insert(i);
        }
        assert_eq!(state.aux_outcome(4, 1), Some(ValueSet::One));
    }

    #[test]
    fn test_aux_outcome_needs_bin_value() {
        // AUX votes for a value outside bin_values do not count.
        let mut state = RoundState::default();
        state.bin_values.insert(false);
        for i in 0..3 {
            state.aux_values[1].insert(i);
        }
        assert_eq!(state.aux_outcome(4, 1), None);
    }

    #[test]
    fn test_aux_outcome_both() {
        let mut state = RoundState::default();
        state.bin_values.insert(false);
        state.bin_values.insert(true);
        state.aux_values[0].insert(0);
        state.aux_values[0].insert(1);
        state.aux_values[1].insert(2);
        assert_eq!(state.aux_outcome(4, 1), Some(ValueSet::Both));
    }

    #[test]
    fn test_conf_outcome_subset_counting() {
        let mut state = RoundState::default();
        state.bin_values.insert(false);
        state.bin_values.insert(true);
        state.insert_conf(0, ValueSet::Zero);
        state.insert_conf(1, ValueSet::One);
        state.insert_conf(2, ValueSet::Both);
        // No single set has n-f votes, but all three are subsets of {0,1}.
        assert_eq!(state.conf_outcome(4, 1), Some(ValueSet::Both));
    }

    #[test]
    fn test_conf_outcome_ignores_incompatible_sets() {
        let mut state = RoundState::default();
        state.bin_values.insert(false);
        state.insert_conf(0, ValueSet::One);
        state.insert_conf(1, ValueSet::One);
        state.insert_conf(2, ValueSet::One);
        assert_eq!(state.conf_outcome(4, 1), None);
    }

    #[test]
    fn test_input_set_once() {
        let mut store = BaStore::default();
        assert!(store.set_input(true));
        assert!(!store.set_input(false));
        assert_eq!(store.input, Some(true));
    }

    #[test]
    fn test_decision_set_once() {
        let mut store = BaStore::default();
        store.set_decided(false);
        store.set_decided(true);
        assert_eq!(store.decided, Some(false));
    }
}
