// tests/common/mod.rs

use std::sync::Once;

static INIT: Once = Once::new();

/// Install a test tracing subscriber once per test binary.
///
/// Level comes from `CMDRUN_LOG` (default `info`), output goes through the
/// test writer so it only shows for failing tests.
pub fn init_tracing() {
    INIT.call_once(|| {
        use tracing_subscriber::{fmt, EnvFilter};
        let filter = EnvFilter::try_from_env("CMDRUN_LOG")
            .unwrap_or_else(|_| EnvFilter::new("info"));
        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}
