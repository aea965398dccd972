//! Test utilities and global setup
//!
//! Provides centralized test logging configuration and other test helpers.

/// Test logging utilities
#[cfg(all(test, feature = "test-logging"))]
pub mod logging {
    use std::sync::Once;
    use tracing_subscriber::{EnvFilter, fmt};

    static INIT: Once = Once::new();

    /// Initialize test logging globally - safe to call multiple times
    ///
    /// Respects `RUST_LOG` and writes through the test writer so output is
    /// captured per test. Enable it for a test module with:
    ///
    /// ```rust
    /// #[cfg(feature = "test-logging")]
    /// #[ctor::ctor]
    /// fn init_test_logging() {
    ///     crate::test_utils::logging::init();
    /// }
    /// ```
    ///
    /// ```bash
    /// RUST_LOG=lsp_symbols::lsp=trace cargo test --features test-logging
    /// ```
    pub fn init() {
        INIT.call_once(|| {
            let env_filter = EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("debug,tokio=info"));

            fmt()
                .with_env_filter(env_filter)
                .with_test_writer()
                .with_target(true)
                .with_thread_ids(true)
                .compact()
                .try_init()
                .ok(); // Another test may have installed a subscriber already
        });
    }
}

/// Get gopls path for integration tests
///
/// Checks the GOPLS_PATH environment variable and falls back to "gopls".
#[cfg(all(test, feature = "gopls-integration-tests"))]
pub fn get_test_gopls_path() -> String {
    std::env::var("GOPLS_PATH").unwrap_or_else(|_| "gopls".to_string())
}
