//! Label manager (§4.I).

use rustc_hash::FxHashMap;

use crate::error::LinkerError;

/// Tracks synthetic-label generation and the address each label resolves
/// to once linker pass 1 has run.
#[derive(Debug, Default)]
pub struct LabelManager {
    defined: FxHashMap<String, u64>,
    next_label_id: u64,
}

impl LabelManager {
    /// An empty label manager.
    pub fn new() -> LabelManager {
        LabelManager::default()
    }

    /// Generate a fresh, process-unique synthetic label (`.L0`, `.L1`, ...).
    /// Does not define it; callers still call [`LabelManager::define`] once
    /// they know its address.
    pub fn create_label(&mut self) -> String {
        let label = format!(".L{}", self.next_label_id);
        self.next_label_id += 1;
        label
    }

    /// Record `name`'s address. Fails if `name` was already defined —
    /// labels are single-assignment.
    pub fn define(&mut self, name: &str, address: u64) -> Result<(), LinkerError> {
        if self.defined.contains_key(name) {
            return Err(LinkerError::DuplicateLabel(name.to_string()));
        }
        self.defined.insert(name.to_string(), address);
        Ok(())
    }

    /// The address `name` was defined at, if any.
    pub fn lookup(&self, name: &str) -> Result<u64, LinkerError> {
        self.defined
            .get(name)
            .copied()
            .ok_or_else(|| LinkerError::UndefinedLabel(name.to_string()))
    }

    /// Whether `name` has been defined.
    pub fn is_defined(&self, name: &str) -> bool {
        self.defined.contains_key(name)
    }

    /// Forget every defined label and reset the synthetic-label counter,
    /// for reuse across successive compilation units.
    pub fn reset(&mut self) {
        self.defined.clear();
        self.next_label_id = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_label_is_unique_and_incrementing() {
        let mut labels = LabelManager::new();
        assert_eq!(labels.create_label(), ".L0");
        assert_eq!(labels.create_label(), ".L1");
    }

    #[test]
    fn define_then_lookup_round_trips() {
        let mut labels = LabelManager::new();
        labels.define("entry", 0x1000).unwrap();
        assert_eq!(labels.lookup("entry"), Ok(0x1000));
    }

    #[test]
    fn duplicate_define_is_rejected() {
        let mut labels = LabelManager::new();
        labels.define("entry", 0x1000).unwrap();
        assert_eq!(
            labels.define("entry", 0x2000),
            Err(LinkerError::DuplicateLabel("entry".to_string()))
        );
    }

    #[test]
    fn lookup_of_undefined_label_fails() {
        let labels = LabelManager::new();
        assert_eq!(
            labels.lookup("missing"),
            Err(LinkerError::UndefinedLabel("missing".to_string()))
        );
    }

    #[test]
    fn reset_clears_definitions_and_counter() {
        let mut labels = LabelManager::new();
        labels.create_label();
        labels.define("entry", 0x1000).unwrap();
        labels.reset();
        assert!(!labels.is_defined("entry"));
        assert_eq!(labels.create_label(), ".L0");
    }
}
