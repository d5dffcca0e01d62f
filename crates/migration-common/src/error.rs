//! Shared error-handling building blocks used across the engine's crates.

/// Common constructors implemented by every crate-level error enum.
///
/// Gives each crate's error type a uniform way to wrap an I/O failure, a
/// configuration problem, or an uncategorized one, without forcing every
/// crate to hand-write the same three `From` impls.
pub trait CommonError {
    fn io_error(msg: impl Into<String>) -> Self;
    fn config_error(msg: impl Into<String>) -> Self;
    fn other_error(msg: impl Into<String>) -> Self;
}

/// `anyhow`-style context helper for errors that implement `std::error::Error`.
pub trait ErrorContext<T> {
    /// # Errors
    /// Returns the original error wrapped with additional context if the
    /// result was `Err`.
    fn context(self, msg: impl Into<String>) -> anyhow::Result<T>;

    /// # Errors
    /// Returns the original error wrapped with additional context if the
    /// result was `Err`.
    fn with_context(self, f: impl FnOnce() -> String) -> anyhow::Result<T>;
}

impl<T, E> ErrorContext<T> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, msg: impl Into<String>) -> anyhow::Result<T> {
        self.map_err(|e| anyhow::anyhow!("{}: {e}", msg.into()))
    }

    fn with_context(self, f: impl FnOnce() -> String) -> anyhow::Result<T> {
        self.map_err(|e| anyhow::anyhow!("{}: {e}", f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct Boom;

    #[test]
    fn test_error_context() {
        let result: Result<(), Boom> = Err(Boom);
        let wrapped = result.context("doing a thing");
        assert!(wrapped.unwrap_err().to_string().contains("doing a thing"));
    }
}
