//! Leading-edge debounce for noisy state updates.
//!
//! The first call after an idle period is applied immediately. Further calls
//! arriving within `delay` of the previous call are coalesced: the latest
//! value is kept while the window restarts, and nothing fires when the window
//! closes. A gate without a delay applies every call.
//!
//! The gate is an explicit state machine driven by an injected [`Clock`], so
//! it can be exercised without sleeping.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Time source for debounce windows.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Clock backed by the tokio timer (honours `tokio::time::pause`).
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum GateState<T> {
    Idle,
    /// A burst is in progress; `until` is when its window closes.
    Pending { last: T, until: Instant },
}

/// Debounce state machine for one gated function.
pub struct DebounceGate<T> {
    delay: Duration,
    state: GateState<T>,
    clock: Arc<dyn Clock>,
}

impl<T: Clone> DebounceGate<T> {
    pub fn new(delay: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            delay,
            state: GateState::Idle,
            clock,
        }
    }

    /// Feed a value through the gate.
    ///
    /// Returns the value when it opens a new burst and must be applied now,
    /// `None` when it was coalesced into the running burst.
    pub fn call(&mut self, value: T) -> Option<T> {
        self.timer_fired();
        let until = self.clock.now() + self.delay;
        if let GateState::Pending {
            last,
            until: deadline,
        } = &mut self.state
        {
            *last = value;
            *deadline = until;
            return None;
        }
        self.state = GateState::Pending {
            last: value.clone(),
            until,
        };
        Some(value)
    }

    /// Close the window if it has elapsed.
    ///
    /// Returns the value the burst ended with; it is discarded, not applied.
    pub fn timer_fired(&mut self) -> Option<T> {
        let now = self.clock.now();
        let expired = matches!(&self.state, GateState::Pending { until, .. } if now >= *until);
        if !expired {
            return None;
        }
        match std::mem::replace(&mut self.state, GateState::Idle) {
            GateState::Pending { last, .. } => Some(last),
            GateState::Idle => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, GateState::Pending { .. })
    }

    /// Most recent value of the running burst.
    pub fn pending_value(&self) -> Option<&T> {
        match &self.state {
            GateState::Pending { last, .. } => Some(last),
            GateState::Idle => None,
        }
    }
}

/// An apply function behind an optional debounce gate.
pub struct Debounced<T, F> {
    gate: Option<DebounceGate<T>>,
    apply: F,
}

impl<T: Clone, F: FnMut(T)> Debounced<T, F> {
    /// Gate `apply` with `delay`; `None` bypasses debouncing entirely.
    ///
    /// A zero delay closes every window as soon as it opens, so each call is
    /// applied, including calls made back to back within the same task poll.
    pub fn new(delay: Option<Duration>, clock: Arc<dyn Clock>, apply: F) -> Self {
        Self {
            gate: delay.map(|d| DebounceGate::new(d, clock)),
            apply,
        }
    }

    pub fn is_bypassed(&self) -> bool {
        self.gate.is_none()
    }

    pub fn gate(&self) -> Option<&DebounceGate<T>> {
        self.gate.as_ref()
    }

    pub fn call(&mut self, value: T) {
        let value = match &mut self.gate {
            Some(gate) => match gate.call(value) {
                Some(value) => value,
                None => return,
            },
            None => value,
        };
        (self.apply)(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl FnMut(&'static str)) {
        let applied = Arc::new(Mutex::new(Vec::new()));
        let sink = applied.clone();
        (applied, move |v| sink.lock().push(v))
    }

    #[test]
    fn test_leading_edge_burst_applies_first_value_once() {
        let clock = Arc::new(ManualClock::new());
        let (applied, apply) = recorder();
        let mut gated = Debounced::new(Some(ms(50)), clock.clone(), apply);

        gated.call("t0");
        clock.advance(ms(5));
        gated.call("t5");
        clock.advance(ms(15));
        gated.call("t20");

        assert_eq!(*applied.lock(), vec!["t0"]);
        assert_eq!(gated.gate().unwrap().pending_value(), Some(&"t20"));

        // Window restarts on every call: still closed at t=69
        clock.advance(ms(49));
        assert!(gated.gate.as_mut().unwrap().timer_fired().is_none());

        // Nothing fires when the window closes
        clock.advance(ms(1));
        assert_eq!(gated.gate.as_mut().unwrap().timer_fired(), Some("t20"));
        assert_eq!(*applied.lock(), vec!["t0"]);
    }

    #[test]
    fn test_new_burst_after_window_applies_immediately() {
        let clock = Arc::new(ManualClock::new());
        let (applied, apply) = recorder();
        let mut gated = Debounced::new(Some(ms(50)), clock.clone(), apply);

        gated.call("first");
        clock.advance(ms(30));
        gated.call("coalesced");
        clock.advance(ms(49));
        gated.call("still coalesced");
        clock.advance(ms(50));
        gated.call("second");

        assert_eq!(*applied.lock(), vec!["first", "second"]);
    }

    #[test]
    fn test_bypass_applies_every_call_in_order() {
        let clock = Arc::new(ManualClock::new());
        let (applied, apply) = recorder();
        let mut gated = Debounced::new(None, clock, apply);
        assert!(gated.is_bypassed());

        for v in ["a", "b", "c", "d"] {
            gated.call(v);
        }

        assert_eq!(*applied.lock(), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_zero_delay_applies_every_call() {
        let clock = Arc::new(ManualClock::new());
        let (applied, apply) = recorder();
        let mut gated = Debounced::new(Some(Duration::ZERO), clock, apply);

        gated.call("a");
        gated.call("b");

        assert_eq!(*applied.lock(), vec!["a", "b"]);
    }

    #[test]
    fn test_gate_states() {
        let clock = Arc::new(ManualClock::new());
        let mut gate = DebounceGate::new(ms(10), clock.clone());
        assert!(!gate.is_pending());
        assert_eq!(gate.timer_fired(), None);

        assert_eq!(gate.call(1), Some(1));
        assert!(gate.is_pending());
        assert_eq!(gate.call(2), None);
        assert_eq!(gate.pending_value(), Some(&2));

        clock.advance(ms(10));
        assert_eq!(gate.timer_fired(), Some(2));
        assert!(!gate.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_follows_paused_time() {
        let (applied, apply) = recorder();
        let mut gated = Debounced::new(Some(ms(50)), Arc::new(TokioClock), apply);

        gated.call("a");
        tokio::time::advance(ms(20)).await;
        gated.call("b");
        tokio::time::advance(ms(60)).await;
        gated.call("c");

        assert_eq!(*applied.lock(), vec!["a", "c"]);
    }
}
