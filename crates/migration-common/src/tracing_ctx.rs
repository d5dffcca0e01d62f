//! Correlation id threaded through tracing spans across process boundaries.

use std::fmt;
use uuid::Uuid;

/// Opaque identifier that ties together log lines for one migration job
/// across the control plane, the queue, and every worker that touches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for CorrelationId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Uuid::parse_str(s).map_or_else(|_| Self::new(), Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_id_roundtrip() {
        let id = CorrelationId::new();
        let parsed = CorrelationId::from(id.to_string().as_str());
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_correlation_id_from_garbage_is_random() {
        let a = CorrelationId::from("not-a-uuid");
        let b = CorrelationId::from("not-a-uuid");
        assert_ne!(a, b);
    }
}
