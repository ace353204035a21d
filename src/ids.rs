//! Request-ID generation, injected so tests can assert on predictable IDs.

use uuid::Uuid;

/// Generates unique request identifiers for MDReqID, SecurityReqID,
/// TradSesReqID, and SecurityStatusReqID.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

/// Default generator, backed by a random UUIDv4.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod test_support {
    use super::IdGenerator;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Deterministic, monotonically increasing IDs for assertions.
    #[derive(Default)]
    pub struct SequentialIdGenerator {
        next: AtomicU64,
        prefix: &'static str,
    }

    impl SequentialIdGenerator {
        pub fn new(prefix: &'static str) -> Self {
            Self {
                next: AtomicU64::new(1),
                prefix,
            }
        }
    }

    impl IdGenerator for SequentialIdGenerator {
        fn next_id(&self) -> String {
            let n = self.next.fetch_add(1, Ordering::SeqCst);
            format!("{}-{n}", self.prefix)
        }
    }
}
