//! State machine module for wake/trigger detection
//!
//! Provides an explicit two-state machine:
//! - Idle: waiting for the wake phrase
//! - Active: wake phrase heard, waiting a bounded time for the trigger phrase

mod machine;

pub use machine::{State, Transition, WakeTriggerMachine};
