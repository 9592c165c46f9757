//! Global subscriber installation
//!
//! `logging::init` sets the process-wide dispatcher, so it gets its own test binary
//! and never shares a process with tests that install scoped subscribers.

use beam_dash::config::DashConfig;
use beam_dash::logging::{self, OutputFormat, TracingConfig};

#[test]
fn test_init_is_idempotent() {
    let config = TracingConfig::default().with_format(OutputFormat::Json);
    assert!(logging::init(config).is_ok());

    // Second call finds the dispatcher already set and still succeeds
    assert!(logging::init(TracingConfig::default()).is_ok());
    assert!(logging::init_from_config(&DashConfig::default()).is_ok());

    tracing::info!("logging initialised");
}
