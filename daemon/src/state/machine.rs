//! Core state machine implementation
//!
//! Consumes finalized utterances and periodic ticks from the decision loop.
//! The machine is owned by that loop alone; it never runs concurrently.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::config::ListenerConfig;
use crate::decoder::Utterance;
use crate::events::ListenerEvent;

/// The two states of the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    /// Waiting for the wake phrase
    #[default]
    Idle,
    /// Wake phrase heard, waiting for the trigger phrase
    Active,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            State::Idle => write!(f, "Idle"),
            State::Active => write!(f, "Active"),
        }
    }
}

/// What a step of the machine did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Idle -> Active
    Woke,
    /// Active -> Idle with an activation; the caller must dispatch and pause
    Activated,
    /// Active -> Idle because the window elapsed
    Expired,
}

/// Wake -> trigger detector
pub struct WakeTriggerMachine {
    /// Current state
    state: State,
    /// When the current Active window opened
    activated_at: Option<Instant>,
    /// Set after an activation until capture is reopened
    latched: bool,
    /// Channel for emitting listener events
    event_tx: broadcast::Sender<ListenerEvent>,
}

impl WakeTriggerMachine {
    /// Create a new machine in Idle
    pub fn new(event_tx: broadcast::Sender<ListenerEvent>) -> Self {
        Self {
            state: State::Idle,
            activated_at: None,
            latched: false,
            event_tx,
        }
    }

    /// Get the current state
    pub fn state(&self) -> State {
        self.state
    }

    /// When the current Active window opened
    #[cfg(test)]
    pub fn activated_at(&self) -> Option<Instant> {
        self.activated_at
    }

    /// Whether an activation has fired since the last `rearm`
    #[cfg(test)]
    pub fn is_latched(&self) -> bool {
        self.latched
    }

    /// Allow the next activation; called on (re)open and on resume
    pub fn rearm(&mut self) {
        if self.latched {
            debug!("detector re-armed");
        }
        self.latched = false;
    }

    /// Evaluate one finalized utterance
    ///
    /// An elapsed window is expired first, so a late trigger phrase never
    /// fires; the utterance is then matched against the resulting state.
    pub fn observe(
        &mut self,
        config: &ListenerConfig,
        utterance: &Utterance,
        now: Instant,
    ) -> Option<Transition> {
        let expired = self.tick(config, now);

        if !utterance.is_meaningful() {
            debug!(text = utterance.text(), state = %self.state, "ignoring empty utterance");
            return expired;
        }

        info!(text = utterance.text(), state = %self.state, "heard");
        let _ = self.event_tx.send(ListenerEvent::UtteranceHeard {
            text: utterance.text().to_string(),
        });

        if self.latched {
            debug!("activation already fired, waiting for resume");
            return expired;
        }

        match self.state {
            State::Idle if utterance.contains_phrase(&config.wake_phrase) => {
                info!(phrase = %config.wake_phrase, "wake phrase detected, waiting for trigger");
                self.transition_to(State::Active, now);
                let _ = self.event_tx.send(ListenerEvent::WakeDetected);
                Some(Transition::Woke)
            }
            State::Active if utterance.contains_phrase(&config.trigger_phrase) => {
                let elapsed_ms = self.window_elapsed(now).as_millis() as u64;
                info!(phrase = %config.trigger_phrase, elapsed_ms, "trigger phrase detected");
                self.transition_to(State::Idle, now);
                self.latched = true;
                let _ = self.event_tx.send(ListenerEvent::Activated { elapsed_ms });
                Some(Transition::Activated)
            }
            _ => expired,
        }
    }

    /// Expire the Active window once `activation_timeout` has been exceeded
    pub fn tick(&mut self, config: &ListenerConfig, now: Instant) -> Option<Transition> {
        if self.state != State::Active {
            return None;
        }

        let waited = self.window_elapsed(now);
        if waited <= config.activation_timeout {
            return None;
        }

        let waited_ms = waited.as_millis() as u64;
        info!(waited_ms, "timed out waiting for trigger phrase");
        self.transition_to(State::Idle, now);
        let _ = self.event_tx.send(ListenerEvent::ActivationExpired { waited_ms });
        Some(Transition::Expired)
    }

    fn window_elapsed(&self, now: Instant) -> Duration {
        self.activated_at
            .map(|t| now.saturating_duration_since(t))
            .unwrap_or_default()
    }

    /// Perform a state transition
    fn transition_to(&mut self, new_state: State, now: Instant) {
        info!(from = %self.state, to = %new_state, "state transition");

        self.state = new_state;
        self.activated_at = match new_state {
            State::Active => Some(now),
            State::Idle => None,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_machine() -> (WakeTriggerMachine, broadcast::Receiver<ListenerEvent>) {
        let (tx, rx) = broadcast::channel(64);
        (WakeTriggerMachine::new(tx), rx)
    }

    fn drain(rx: &mut broadcast::Receiver<ListenerEvent>) -> Vec<ListenerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn activations(events: &[ListenerEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, ListenerEvent::Activated { .. }))
            .count()
    }

    fn say(text: &str) -> Utterance {
        Utterance::new(text)
    }

    #[test]
    fn test_initial_state() {
        let (sm, _) = create_machine();
        assert_eq!(sm.state(), State::Idle);
        assert!(sm.activated_at().is_none());
        assert!(!sm.is_latched());
    }

    #[test]
    fn test_idle_ignores_non_wake_utterances() {
        let (mut sm, _) = create_machine();
        let config = ListenerConfig::default();
        let now = Instant::now();

        for text in ["", "[unk]", "open", "hello there", "wake", "up wake"] {
            assert_eq!(sm.observe(&config, &say(text), now), None);
            assert_eq!(sm.state(), State::Idle);
        }
    }

    #[test]
    fn test_wake_phrase_substring_activates() {
        let (mut sm, mut rx) = create_machine();
        let config = ListenerConfig::default();
        let now = Instant::now();

        let transition = sm.observe(&config, &say("hey WAKE UP please"), now);
        assert_eq!(transition, Some(Transition::Woke));
        assert_eq!(sm.state(), State::Active);
        assert_eq!(sm.activated_at(), Some(now));
        assert!(drain(&mut rx).contains(&ListenerEvent::WakeDetected));
    }

    #[test]
    fn test_trigger_within_window_fires_once() {
        let (mut sm, mut rx) = create_machine();
        let config = ListenerConfig::default();
        let t0 = Instant::now();

        sm.observe(&config, &say("wake up"), t0);
        let transition = sm.observe(&config, &say("open sesame"), t0 + Duration::from_secs(2));

        assert_eq!(transition, Some(Transition::Activated));
        assert_eq!(sm.state(), State::Idle);
        assert!(sm.is_latched());

        // Latched: a second full sequence does nothing until re-armed
        sm.observe(&config, &say("wake up"), t0 + Duration::from_secs(3));
        sm.observe(&config, &say("open"), t0 + Duration::from_secs(4));
        assert_eq!(sm.state(), State::Idle);
        assert_eq!(activations(&drain(&mut rx)), 1);
    }

    #[test]
    fn test_rearm_allows_next_activation() {
        let (mut sm, mut rx) = create_machine();
        let config = ListenerConfig::default();
        let t0 = Instant::now();

        sm.observe(&config, &say("wake up"), t0);
        sm.observe(&config, &say("open"), t0 + Duration::from_secs(1));
        sm.rearm();
        sm.observe(&config, &say("wake up"), t0 + Duration::from_secs(2));
        sm.observe(&config, &say("open"), t0 + Duration::from_secs(3));

        assert_eq!(activations(&drain(&mut rx)), 2);
    }

    #[test]
    fn test_window_expires_without_activation() {
        let (mut sm, mut rx) = create_machine();
        let config = ListenerConfig::default();
        let t0 = Instant::now();

        sm.observe(&config, &say("wake up"), t0);
        assert_eq!(sm.tick(&config, t0 + Duration::from_secs(5)), None);
        assert_eq!(sm.state(), State::Active);

        let transition = sm.tick(&config, t0 + Duration::from_secs(6));
        assert_eq!(transition, Some(Transition::Expired));
        assert_eq!(sm.state(), State::Idle);
        assert!(!sm.is_latched());

        let events = drain(&mut rx);
        assert_eq!(activations(&events), 0);
        assert!(events
            .iter()
            .any(|e| matches!(e, ListenerEvent::ActivationExpired { waited_ms: 6000 })));
    }

    #[test]
    fn test_late_trigger_does_not_fire() {
        let (mut sm, mut rx) = create_machine();
        let config = ListenerConfig::default();
        let t0 = Instant::now();

        sm.observe(&config, &say("wake up"), t0);
        let transition = sm.observe(&config, &say("open"), t0 + Duration::from_secs(7));

        assert_eq!(transition, Some(Transition::Expired));
        assert_eq!(sm.state(), State::Idle);
        assert_eq!(activations(&drain(&mut rx)), 0);
    }

    #[test]
    fn test_late_wake_reopens_window() {
        let (mut sm, _) = create_machine();
        let config = ListenerConfig::default();
        let t0 = Instant::now();
        let late = t0 + Duration::from_secs(9);

        sm.observe(&config, &say("wake up"), t0);
        assert_eq!(sm.observe(&config, &say("wake up"), late), Some(Transition::Woke));
        assert_eq!(sm.activated_at(), Some(late));
    }

    #[test]
    fn test_both_phrases_in_one_utterance_only_wakes() {
        let (mut sm, mut rx) = create_machine();
        let config = ListenerConfig::default();
        let t0 = Instant::now();

        let transition = sm.observe(&config, &say("wake up and open"), t0);
        assert_eq!(transition, Some(Transition::Woke));
        assert_eq!(sm.state(), State::Active);
        assert_eq!(activations(&drain(&mut rx)), 0);
    }

    #[test]
    fn test_active_ignores_unrelated_utterances() {
        let (mut sm, _) = create_machine();
        let config = ListenerConfig::default();
        let t0 = Instant::now();

        sm.observe(&config, &say("wake up"), t0);
        let transition = sm.observe(&config, &say("what time is it"), t0 + Duration::from_secs(1));
        assert_eq!(transition, None);
        assert_eq!(sm.state(), State::Active);
        assert_eq!(sm.activated_at(), Some(t0));
    }

    #[test]
    fn test_wake_then_trigger_one_second_apart() {
        let (mut sm, mut rx) = create_machine();
        let config = ListenerConfig::default();
        let t0 = Instant::now();

        let stream = ["", "wake up please", "open the door"];
        let transitions: Vec<_> = stream
            .iter()
            .enumerate()
            .map(|(i, text)| sm.observe(&config, &say(text), t0 + Duration::from_secs(i as u64)))
            .collect();

        assert_eq!(
            transitions,
            vec![None, Some(Transition::Woke), Some(Transition::Activated)]
        );
        assert_eq!(activations(&drain(&mut rx)), 1);
    }

    #[test]
    fn test_config_swap_keeps_window() {
        let (mut sm, _) = create_machine();
        let t0 = Instant::now();

        sm.observe(&ListenerConfig::default(), &say("wake up"), t0);

        let reloaded = ListenerConfig {
            trigger_phrase: "launch".into(),
            ..ListenerConfig::default()
        };
        let later = t0 + Duration::from_secs(1);
        assert_eq!(sm.observe(&reloaded, &say("open"), later), None);
        assert_eq!(sm.state(), State::Active);
        assert_eq!(
            sm.observe(&reloaded, &say("launch it"), later),
            Some(Transition::Activated)
        );
    }
}
