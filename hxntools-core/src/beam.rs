//! Beam-availability gate.
//!
//! Tracks the storage-ring shutter and beam current and decides when the
//! beamline is usable. Consumers that need beam call
//! [`BeamGate::request_wait`] and block on the returned [`WaitToken`]; the
//! gate fulfils every outstanding token the moment both inputs are good.
//!
//! The gate is driven by two independent subscriptions. Its methods take
//! `&mut self`, so callbacks arriving on different threads must share it
//! through a single `Mutex`.

use log::warn;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default minimum ring current (mA) for the beam to count as usable.
pub const DEFAULT_MIN_CURRENT: f64 = 100.0;

/// Beam gate configuration.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BeamGateConfig {
    /// Minimum ring current; the reading must be strictly greater.
    pub min_current: f64,
}

impl Default for BeamGateConfig {
    fn default() -> Self {
        Self {
            min_current: DEFAULT_MIN_CURRENT,
        }
    }
}

/// Whether the beamline can currently be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BeamState {
    #[default]
    Blocked,
    Usable,
}

impl BeamState {
    fn from_usable(usable: bool) -> Self {
        if usable {
            BeamState::Usable
        } else {
            BeamState::Blocked
        }
    }
}

/// Emitted whenever the gate flips between blocked and usable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeamTransition {
    pub state: BeamState,
    pub shutter_open: bool,
    pub current_ok: bool,
    /// Threshold the current was compared against.
    pub min_current: f64,
}

/// Snapshot reported by [`BeamGate::read`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeamReading {
    pub beam_current: Option<f64>,
    pub shutter_open: bool,
    pub state: BeamState,
}

/// Completion token handed to a consumer waiting for beam.
///
/// Clones share the same completion flag.
#[derive(Debug, Clone, Default)]
pub struct WaitToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl WaitToken {
    fn new() -> Self {
        Self::default()
    }

    fn fulfilled() -> Self {
        let token = Self::new();
        token.mark_done();
        token
    }

    fn mark_done(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    fn flag(&self) -> MutexGuard<'_, bool> {
        self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns true once the beam has become usable for this waiter.
    #[must_use]
    pub fn is_done(&self) -> bool {
        *self.flag()
    }

    /// Blocks until fulfilled or until `timeout` elapses. Returns whether the
    /// token was fulfilled.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (_, cvar) = &*self.inner;
        let guard = self.flag();
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |done| !*done)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/// Shutter/current state machine.
#[derive(Debug)]
pub struct BeamGate {
    min_current: f64,
    shutter_open: bool,
    current_ok: bool,
    last_current: Option<f64>,
    last_state: BeamState,
    waiters: Vec<WaitToken>,
}

impl Default for BeamGate {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_CURRENT)
    }
}

impl BeamGate {
    /// Creates a gate in the blocked state.
    #[must_use]
    pub fn new(min_current: f64) -> Self {
        Self {
            min_current,
            shutter_open: false,
            current_ok: false,
            last_current: None,
            last_state: BeamState::Blocked,
            waiters: Vec::new(),
        }
    }

    /// Creates a gate from configuration.
    #[must_use]
    pub fn from_config(config: &BeamGateConfig) -> Self {
        Self::new(config.min_current)
    }

    /// Current threshold.
    #[must_use]
    pub fn min_current(&self) -> f64 {
        self.min_current
    }

    /// Current gate state.
    #[must_use]
    pub fn state(&self) -> BeamState {
        BeamState::from_usable(self.is_usable())
    }

    /// True when the shutter is open and the current clears the threshold.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.shutter_open && self.current_ok
    }

    /// Number of registered, unfulfilled waiters.
    #[must_use]
    pub fn pending_waiters(&self) -> usize {
        self.waiters.len()
    }

    /// Handles a shutter-status update.
    pub fn update_shutter(&mut self, open: bool) -> Option<BeamTransition> {
        self.shutter_open = open;
        self.evaluate()
    }

    /// Handles a beam-current update.
    pub fn update_current(&mut self, current: f64) -> Option<BeamTransition> {
        self.last_current = Some(current);
        self.current_ok = current > self.min_current;
        self.evaluate()
    }

    /// Changes the threshold and re-checks the last observed current.
    pub fn set_min_current(&mut self, min_current: f64) -> Option<BeamTransition> {
        self.min_current = min_current;
        self.current_ok = self
            .last_current
            .is_some_and(|current| current > self.min_current);
        self.evaluate()
    }

    /// Registers interest in beam availability.
    ///
    /// Returns an already-fulfilled token when the beam is usable now.
    pub fn request_wait(&mut self) -> WaitToken {
        if self.is_usable() {
            return WaitToken::fulfilled();
        }

        let token = WaitToken::new();
        self.waiters.push(token.clone());
        warn!("Waiting for beam status to change...");
        token
    }

    /// Read hook: drops every outstanding waiter without fulfilling it.
    pub fn on_read(&mut self) {
        self.waiters.clear();
    }

    /// Reports the gate state. Triggers [`BeamGate::on_read`].
    pub fn read(&mut self) -> BeamReading {
        self.on_read();
        BeamReading {
            beam_current: self.last_current,
            shutter_open: self.shutter_open,
            state: self.state(),
        }
    }

    fn evaluate(&mut self) -> Option<BeamTransition> {
        let state = self.state();

        if state == BeamState::Usable {
            for waiter in self.waiters.drain(..) {
                waiter.mark_done();
            }
        }

        if state == self.last_state {
            return None;
        }
        self.last_state = state;

        let transition = BeamTransition {
            state,
            shutter_open: self.shutter_open,
            current_ok: self.current_ok,
            min_current: self.min_current,
        };
        log_transition(&transition);
        Some(transition)
    }
}

fn log_transition(transition: &BeamTransition) {
    warn!("Beam status changed: {:?}", transition.state);
    if transition.shutter_open {
        warn!("Shutters are open");
    } else {
        warn!("Shutters are closed");
    }
    if transition.current_ok {
        warn!("Current meets threshold of {}", transition.min_current);
    } else {
        warn!(
            "Current does not meet threshold of {}",
            transition.min_current
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_initially_blocked() {
        let gate = BeamGate::default();
        assert_eq!(gate.state(), BeamState::Blocked);
        assert!((gate.min_current() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_from_config_threshold() {
        let config = BeamGateConfig { min_current: 250.0 };
        let mut gate = BeamGate::from_config(&config);
        gate.update_shutter(true);
        gate.update_current(200.0);
        assert_eq!(gate.state(), BeamState::Blocked);
        gate.update_current(250.5);
        assert_eq!(gate.state(), BeamState::Usable);

        let default = BeamGate::from_config(&BeamGateConfig::default());
        assert!((default.min_current() - DEFAULT_MIN_CURRENT).abs() < f64::EPSILON);
    }

    #[test]
    fn test_usable_once_and_waiters_released() {
        let mut gate = BeamGate::new(100.0);
        let early = gate.request_wait();
        let other = gate.request_wait();
        assert!(!early.is_done());
        assert_eq!(gate.pending_waiters(), 2);

        assert!(gate.update_shutter(true).is_none());
        assert!(!early.is_done());

        let transition = gate.update_current(150.0).unwrap();
        assert_eq!(transition.state, BeamState::Usable);
        assert!((transition.min_current - 100.0).abs() < f64::EPSILON);
        assert!(early.is_done());
        assert!(other.is_done());
        assert_eq!(gate.pending_waiters(), 0);

        // Further good readings are not new transitions.
        assert!(gate.update_current(160.0).is_none());

        let late = gate.request_wait();
        assert!(late.is_done());
        assert_eq!(gate.pending_waiters(), 0);
    }

    #[test]
    fn test_current_threshold_is_strict() {
        let mut gate = BeamGate::new(100.0);
        gate.update_shutter(true);
        gate.update_current(100.0);
        assert_eq!(gate.state(), BeamState::Blocked);
        gate.update_current(100.1);
        assert_eq!(gate.state(), BeamState::Usable);
    }

    #[test]
    fn test_raising_threshold_blocks_without_new_reading() {
        let mut gate = BeamGate::new(100.0);
        gate.update_shutter(true);
        gate.update_current(150.0);
        assert!(gate.is_usable());

        let transition = gate.set_min_current(200.0).unwrap();
        assert_eq!(transition.state, BeamState::Blocked);
        assert!(!transition.current_ok);
        assert!((transition.min_current - 200.0).abs() < f64::EPSILON);

        assert!(gate.set_min_current(120.0).is_some());
        assert!(gate.is_usable());
    }

    #[test]
    fn test_threshold_without_current_stays_blocked() {
        let mut gate = BeamGate::new(100.0);
        gate.update_shutter(true);
        assert!(gate.set_min_current(0.0).is_none());
        assert_eq!(gate.state(), BeamState::Blocked);
    }

    #[test]
    fn test_shutter_close_blocks() {
        let mut gate = BeamGate::new(100.0);
        gate.update_current(300.0);
        gate.update_shutter(true);
        let transition = gate.update_shutter(false).unwrap();
        assert_eq!(transition.state, BeamState::Blocked);
        assert!(!transition.shutter_open);
        assert!(transition.current_ok);
    }

    #[test]
    fn test_malformed_current_is_not_usable() {
        let mut gate = BeamGate::new(100.0);
        gate.update_shutter(true);
        gate.update_current(f64::NAN);
        assert!(!gate.is_usable());

        let mut gate = BeamGate::new(f64::NAN);
        gate.update_shutter(true);
        gate.update_current(500.0);
        assert!(!gate.is_usable());
    }

    #[test]
    fn test_read_drops_waiters() {
        let mut gate = BeamGate::new(100.0);
        let token = gate.request_wait();
        let reading = gate.read();
        assert_eq!(reading.state, BeamState::Blocked);
        assert_eq!(reading.beam_current, None);
        assert_eq!(gate.pending_waiters(), 0);

        gate.update_shutter(true);
        gate.update_current(150.0);
        assert!(!token.is_done());
    }

    #[test]
    fn test_waiter_unblocks_across_threads() {
        let gate = Arc::new(Mutex::new(BeamGate::new(100.0)));
        let token = gate.lock().unwrap().request_wait();

        let feeder = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                gate.lock().unwrap().update_current(250.0);
                gate.lock().unwrap().update_shutter(true);
            })
        };

        assert!(token.wait_timeout(Duration::from_secs(5)));
        feeder.join().unwrap();
    }

    #[test]
    fn test_wait_timeout_expires() {
        let mut gate = BeamGate::new(100.0);
        let token = gate.request_wait();
        assert!(!token.wait_timeout(Duration::from_millis(10)));
    }
}
