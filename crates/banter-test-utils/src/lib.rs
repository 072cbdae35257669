//! Test helpers shared across Banter crates.

pub mod agents;

pub use agents::{
    FailingAfterAgent, FailingAgent, FlakyAgent, GatedAgent, RecordingAgent, ScriptedAgent,
};
