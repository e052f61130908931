//! Shared test utilities for archivist integration tests.
//!
//! This module provides:
//! - `ScriptedPlugin`, a plugin whose failures are scripted per object and
//!   whose lifecycle calls are counted in a shared `Tally`
//! - `RecordingStore`, a job store that checks the counter invariant on
//!   every persisted snapshot
//! - `TestHarness`, a catalog of AIPs wired to an orchestrator

pub mod harness;
pub mod plugins;

pub use harness::{settings, RecordingStore, TestHarness};
pub use plugins::{Gate, Tally, Script, ScriptedPlugin};
