//! Test doubles for session-layer tests.

pub mod mocks;

pub use mocks::RecordingDispatcher;
