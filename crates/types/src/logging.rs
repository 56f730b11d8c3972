// Copyright (c) 2021-2024 Espresso Systems (espressosys.com)
// This file is part of the HotShot repository.

// You should have received a copy of the MIT License
// along with the HotShot repository. If not, see <https://mit-license.org/>.

//! Helper functions for logging

use std::sync::Once;

use tracing_subscriber::EnvFilter;

/// A `Once` instance to ensure that logging is only initialized once.
static LOGGING_INITIALIZED: Once = Once::new();

/// Helper function to setup logging for the node and its tests.
///
/// Reads the filter from `RUST_LOG`. `RUST_LOG_FORMAT=json` switches to JSON lines.
pub fn setup_logging() {
    LOGGING_INITIALIZED.call_once(|| {
        let builder = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer();
        // a subscriber may already be installed by the embedding process
        let _ = if std::env::var("RUST_LOG_FORMAT").as_deref() == Ok("json") {
            builder.json().try_init()
        } else {
            builder.try_init()
        };
    });
}
