//! Log output for tests.

use tracing_subscriber::EnvFilter;

/// Default directives: everything from the benchmark crates, errors from the rest.
const DIRECTIVES: &str = "ERROR,swiftbench=TRACE,swiftbench_client=TRACE";

/// Routes logs into the test harness's captured output.
///
/// `RUST_LOG` replaces the default directives. Worker threads are named, so each line carries
/// the worker it came from. Repeated calls are no-ops.
pub fn init() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DIRECTIVES));

    tracing_subscriber::fmt::fmt()
        .with_env_filter(env_filter)
        .with_thread_names(true)
        .with_test_writer()
        .compact()
        .try_init()
        .ok();
}

#[cfg(test)]
mod tests {
    #[test]
    fn init_is_idempotent() {
        super::init();
        super::init();
    }
}
