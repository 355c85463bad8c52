//! Ordered staging writes.
//!
//! Staging pushes a list of `(address, value)` pairs to the device in order
//! and remembers what each signal held before, so unstaging can put it back.

use hxntools_core::{SignalIo, Value};
use log::{debug, warn};

/// Insertion-ordered signal values to apply when staging.
///
/// Setting an address that is already present replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageSigs {
    entries: Vec<(String, Value)>,
}

impl StageSigs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the value staged for `address`.
    pub fn set(&mut self, address: &str, value: impl Into<Value>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(a, _)| a == address) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((address.to_string(), value)),
        }
    }

    /// Moves `address` to the end of the write order. Returns false if it is
    /// not staged.
    pub fn move_to_end(&mut self, address: &str) -> bool {
        let Some(pos) = self.entries.iter().position(|(a, _)| a == address) else {
            return false;
        };
        let entry = self.entries.remove(pos);
        self.entries.push(entry);
        true
    }

    /// Appends every entry of `other`, keeping its order.
    pub fn extend(&mut self, other: &StageSigs) {
        for (address, value) in &other.entries {
            self.set(address, value.clone());
        }
    }

    #[must_use]
    pub fn get(&self, address: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(a, _)| a == address)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(a, v)| (a.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes every entry in order, waiting for each put to complete.
    ///
    /// # Errors
    /// On a failed read or write, signals already changed are restored and
    /// the error is returned.
    pub fn apply(&self, signals: &dyn SignalIo) -> hxntools_core::Result<Staged> {
        let mut staged = Staged::default();
        for (address, value) in &self.entries {
            let result = signals
                .get(address)
                .and_then(|original| {
                    signals.put(address, value.clone(), true)?;
                    Ok(original)
                });
            match result {
                Ok(original) => {
                    debug!("staged {address} = {value}");
                    staged.originals.push((address.clone(), original));
                }
                Err(e) => {
                    if let Err(restore) = staged.restore(signals) {
                        warn!("failed to restore after staging error: {restore}");
                    }
                    return Err(e);
                }
            }
        }
        Ok(staged)
    }
}

/// Values that signals held before staging.
#[derive(Debug, Default)]
pub struct Staged {
    originals: Vec<(String, Value)>,
}

impl Staged {
    /// Writes the original values back, last staged first.
    ///
    /// Every signal is attempted; the first failure is returned.
    pub fn restore(self, signals: &dyn SignalIo) -> hxntools_core::Result<()> {
        let mut first_err = None;
        for (address, value) in self.originals.into_iter().rev() {
            if let Err(e) = signals.put(&address, value, true) {
                warn!("failed to restore {address}: {e}");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hxntools_core::MemorySignals;

    #[test]
    fn test_set_replaces_in_place() {
        let mut sigs = StageSigs::new();
        sigs.set("a", 1_i64);
        sigs.set("b", 2_i64);
        sigs.set("a", 3_i64);
        let order: Vec<_> = sigs.iter().map(|(a, v)| (a, v.clone())).collect();
        assert_eq!(order, vec![("a", Value::Int(3)), ("b", Value::Int(2))]);
    }

    #[test]
    fn test_move_to_end() {
        let mut sigs = StageSigs::new();
        sigs.set("capture", 1_i64);
        sigs.set("num_capture", 10_i64);
        assert!(sigs.move_to_end("capture"));
        assert!(!sigs.move_to_end("missing"));
        let order: Vec<_> = sigs.iter().map(|(a, _)| a).collect();
        assert_eq!(order, vec!["num_capture", "capture"]);
    }

    #[test]
    fn test_apply_then_restore() {
        let signals = MemorySignals::new();
        signals.seed("mode", "Single");
        let mut sigs = StageSigs::new();
        sigs.set("mode", "Multiple");
        sigs.set("count", 5_i64);

        let staged = sigs.apply(&signals).unwrap();
        assert_eq!(signals.peek("mode"), Some(Value::from("Multiple")));
        assert!(signals.writes().iter().all(|w| w.wait));

        signals.clear_journal();
        staged.restore(&signals).unwrap();
        let order: Vec<_> = signals.writes().into_iter().map(|w| w.address).collect();
        assert_eq!(order, vec!["count", "mode"]);
        assert_eq!(signals.peek("mode"), Some(Value::from("Single")));
        assert_eq!(signals.peek("count"), Some(Value::Int(0)));
    }
}
