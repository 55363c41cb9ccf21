//! Cross-crate test infrastructure for the ssync protocol engines.
//!
//! The harness runs scripted receiver sessions over in-process duplex
//! streams and provides a recording store so tests can assert on exactly
//! what the engines dispatched.

pub mod harness;

#[cfg(test)]
mod end_to_end;
#[cfg(test)]
mod proptest_missing;

pub use harness::{body_lines, run_session, ApplyMode, RecordedCall, RecordingStore};
