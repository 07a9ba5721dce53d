//! Injectable clock.

/// Time source for the transport.
///
/// Every timer in the transport (backoff, connect timeout, resend interval,
/// token renewal, keep-alive) is measured with [`Clock::tick_ms`]. The clock
/// only needs to be monotonic; it never has to match wall time. Wall time is
/// used for one thing only: the expiry field of a key-derived SAS token.
pub trait Clock {
    /// Monotonic milliseconds since an arbitrary origin.
    fn tick_ms(&self) -> u64;

    /// Seconds since the Unix epoch, or `None` when the device has no wall clock.
    fn unix_time(&self) -> Option<u64>;
}

impl<T: Clock + ?Sized> Clock for &T {
    fn tick_ms(&self) -> u64 {
        (**self).tick_ms()
    }

    fn unix_time(&self) -> Option<u64> {
        (**self).unix_time()
    }
}

/// Milliseconds elapsed between two ticks, zero if the clock went backwards.
pub(crate) fn elapsed_ms(since: u64, now: u64) -> u64 {
    now.saturating_sub(since)
}
