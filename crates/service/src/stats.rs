use std::sync::atomic::{AtomicUsize, Ordering};

pub trait Number {
    fn add(&self, value: usize);
    fn get(&self) -> usize;
}

/// # Test
///
/// ```
/// use radius_client_service::stats::{Count, Number};
///
/// let count = Count::default();
///
/// count.add(1);
/// assert_eq!(count.get(), 1);
///
/// count.add(2);
/// assert_eq!(count.get(), 3);
/// ```
#[derive(Default)]
pub struct Count(AtomicUsize);

impl Number for Count {
    fn add(&self, value: usize) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

/// Client wide counters.
///
/// Updated by every worker; relaxed atomics, reads are advisory.
#[derive(Default)]
pub struct Statistics {
    /// Queries accepted by `query()`.
    pub queries: Count,
    /// Datagrams put on the wire, first transmissions included.
    pub transmits: Count,
    /// Retransmissions only.
    pub retransmits: Count,
    /// Authenticated responses delivered to callers.
    pub responses: Count,
    /// Datagrams dropped: malformed, unknown identifier, wrong source
    /// or failed verification.
    pub dropped: Count,
    /// Queries that exhausted every server budget.
    pub timeouts: Count,
}
