//! Device signal access.
//!
//! Every hardware control point is addressed by a fully qualified
//! process-variable name. Adapters hold an `Arc<dyn SignalIo>` handed to them
//! at construction and never resolve addresses lazily.

use crate::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Value carried by a device signal.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
        }
    }

    /// Interprets the value as an integer.
    ///
    /// Floats with no fractional part are accepted.
    #[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
    pub fn as_int(&self, address: &str) -> Result<i64> {
        match self {
            Value::Int(v) => Ok(*v),
            Value::Float(v) if v.is_finite() && v.trunc() == *v => Ok(*v as i64),
            other => Err(Error::SignalType {
                address: address.to_string(),
                expected: "int",
                found: other.kind(),
            }),
        }
    }

    /// Interprets the value as a float.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_float(&self, address: &str) -> Result<f64> {
        match self {
            Value::Int(v) => Ok(*v as f64),
            Value::Float(v) => Ok(*v),
            Value::Text(_) => Err(Error::SignalType {
                address: address.to_string(),
                expected: "float",
                found: "text",
            }),
        }
    }

    /// Interprets the value as text.
    pub fn as_text(&self, address: &str) -> Result<&str> {
        match self {
            Value::Text(v) => Ok(v),
            other => Err(Error::SignalType {
                address: address.to_string(),
                expected: "text",
                found: other.kind(),
            }),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// Read/write access to device signals.
pub trait SignalIo: Send + Sync {
    /// Reads the current value of a signal.
    fn get(&self, address: &str) -> Result<Value>;

    /// Writes a value. With `wait`, returns only once the device reports
    /// completion of the put.
    fn put(&self, address: &str, value: Value, wait: bool) -> Result<()>;

    /// Reads a signal as an integer.
    fn get_int(&self, address: &str) -> Result<i64> {
        self.get(address)?.as_int(address)
    }

    /// Reads a signal as a float.
    fn get_float(&self, address: &str) -> Result<f64> {
        self.get(address)?.as_float(address)
    }
}

/// One recorded write to a [`MemorySignals`] backend.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalWrite {
    pub address: String,
    pub value: Value,
    pub wait: bool,
}

/// In-memory signal backend.
///
/// Unset signals read as `Int(0)`. Every put is appended to a journal so
/// callers can inspect write ordering.
#[derive(Debug, Default)]
pub struct MemorySignals {
    values: Mutex<HashMap<String, Value>>,
    journal: Mutex<Vec<SignalWrite>>,
}

impl MemorySignals {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a signal without journaling the write.
    pub fn seed(&self, address: &str, value: impl Into<Value>) {
        lock(&self.values).insert(address.to_string(), value.into());
    }

    /// Returns a copy of the current value, if the signal has been set.
    #[must_use]
    pub fn peek(&self, address: &str) -> Option<Value> {
        lock(&self.values).get(address).cloned()
    }

    /// Returns every recorded write, oldest first.
    #[must_use]
    pub fn writes(&self) -> Vec<SignalWrite> {
        lock(&self.journal).clone()
    }

    /// Returns the recorded writes to one address, oldest first.
    #[must_use]
    pub fn writes_to(&self, address: &str) -> Vec<Value> {
        lock(&self.journal)
            .iter()
            .filter(|w| w.address == address)
            .map(|w| w.value.clone())
            .collect()
    }

    /// Forgets the write journal, keeping current values.
    pub fn clear_journal(&self) {
        lock(&self.journal).clear();
    }
}

impl SignalIo for MemorySignals {
    fn get(&self, address: &str) -> Result<Value> {
        Ok(lock(&self.values)
            .get(address)
            .cloned()
            .unwrap_or(Value::Int(0)))
    }

    fn put(&self, address: &str, value: Value, wait: bool) -> Result<()> {
        lock(&self.values).insert(address.to_string(), value.clone());
        lock(&self.journal).push(SignalWrite {
            address: address.to_string(),
            value,
            wait,
        });
        Ok(())
    }
}

// A poisoned map is still structurally valid; keep serving it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
