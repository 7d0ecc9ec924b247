//! Observability support for the session layer.

pub mod logging;

pub use logging::{init_default_logging, init_logging, init_test_logging, LogFormat};
