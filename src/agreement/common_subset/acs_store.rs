use std::collections::HashMap;

/// Stores the result slots of one common subset run at a party.
#[derive(Default)]
pub struct AcsStore {
    pub rbc_values: HashMap<usize, Vec<u8>>, // slot => delivered broadcast value
    pub aba_values: HashMap<usize, bool>,    // slot => agreement decision
    pub aba_inputted: HashMap<usize, bool>,  // slot => agreement input already fed
}

impl AcsStore {
    /// Checks if the agreement instance of a slot was already given an input.
    pub fn has_aba_inputted(&self, slot: usize) -> bool {
        self.aba_inputted.get(&slot).copied().unwrap_or(false)
    }

    /// Marks the agreement instance of a slot as inputted.
    pub fn set_aba_inputted(&mut self, slot: usize) {
        self.aba_inputted.insert(slot, true);
    }

    /// Records the broadcast value delivered for a slot.
    pub fn set_rbc_value(&mut self, slot: usize, value: Vec<u8>) {
        self.rbc_values.insert(slot, value);
    }

    /// The broadcast value delivered for a slot, if any.
    pub fn rbc_value(&self, slot: usize) -> Option<Vec<u8>> {
        self.rbc_values.get(&slot).cloned()
    }

    /// Records the agreement decision of a slot.
    pub fn set_aba_value(&mut self, slot: usize, value: bool) {
        self.aba_values.insert(slot, value);
    }

    /// The agreement decision of a slot, if decided.
    pub fn aba_value(&self, slot: usize) -> Option<bool> {
        self.aba_values.get(&slot).copied()
    }

    /// The running tally of agreement instances that decided one.
    pub fn ones_count(&self) -> usize {
        self.aba_values.values().filter(|&&v| v).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ones_count() {
        let mut store = AcsStore::default();
        store.set_aba_value(0, true);
        store.set_aba_value(1, false);
        store.set_aba_value(3, true);
        assert_eq!(store.ones_count(), 2);
        assert_eq!(store.aba_value(1), Some(false));
        assert_eq!(store.aba_value(2), None);
    }

    #[test]
    fn test_input_guard() {
        let mut store = AcsStore::default();
        assert!(!store.has_aba_inputted(2));
        store.set_aba_inputted(2);
        assert!(store.has_aba_inputted(2));
    }
}
