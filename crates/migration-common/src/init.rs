//! One-time process environment initialization.

use std::sync::Once;

static INIT: Once = Once::new();

/// Load a `.env` file (if present) exactly once per process.
///
/// Safe to call from every binary's `main` and from test setup; repeated
/// calls are no-ops.
pub fn initialize_environment() {
    INIT.call_once(|| {
        dotenvy::dotenv().ok();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_environment_is_idempotent() {
        initialize_environment();
        initialize_environment();
    }
}
