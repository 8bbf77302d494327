use crate::{Counters, DeliveryClass, Message, Result};

/// The framing/ACK/retry engine underneath the application layer.
///
/// Implementations own retries, checksums and timeouts. Everything is polled:
/// no call blocks, and none may be made concurrently from several threads.
pub trait Transport {
    /// One-time setup. A failure here is final for this instance.
    fn initialize(&mut self) -> Result<()>;

    /// Push one received byte. Returns a message once one is complete.
    fn feed_byte(&mut self, byte: u8) -> Option<Message>;

    /// Drive buffered and scheduled sends. Call at a steady rate.
    fn tick(&mut self) -> Result<()>;

    /// Queue a fully encoded message. Delivery is only observable later via counters.
    fn post(&mut self, msg: Message) -> Result<()>;

    /// Messages still buffered for transmission, across both delivery classes.
    fn queued(&self) -> usize;

    fn counters(&self, class: DeliveryClass) -> Counters;

    /// Zero both local counter sets.
    fn reset_counters(&mut self);

    /// Monotonic milliseconds from the environment's tick source.
    fn now_ms(&self) -> u32;
}

/// Capabilities the environment hands to a transport.
pub trait LinkIo {
    /// Physical send; returns the number of bytes accepted.
    fn transmit(&mut self, bytes: &[u8]) -> Result<usize>;

    fn now_ms(&self) -> u32;
}
