use crate::{
    Counters, DeliveryClass, LinkIo, Message, Result, Transport, TransportError, HEADER_LEN,
};
use std::collections::VecDeque;
use tracing::{debug, warn};

const DEFAULT_CAPACITY: usize = 32;

/// Recording I/O with a manually advanced clock.
#[derive(Debug, Default)]
pub struct MockIo {
    sent: Vec<Vec<u8>>,
    clock_ms: u32,
    fail_transmit: bool,
}

impl MockIo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&mut self, ms: u32) {
        self.clock_ms = self.clock_ms.wrapping_add(ms);
    }

    pub fn set_time(&mut self, ms: u32) {
        self.clock_ms = ms;
    }

    /// Make every following transmit fail (simulates a dead line).
    pub fn set_fail_transmit(&mut self, fail: bool) {
        self.fail_transmit = fail;
    }

    pub fn sent(&self) -> &[Vec<u8>] {
        &self.sent
    }

    pub fn take_sent(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.sent)
    }
}

impl LinkIo for MockIo {
    fn transmit(&mut self, bytes: &[u8]) -> Result<usize> {
        if self.fail_transmit {
            return Err(TransportError::Io("mock line down".to_string()));
        }
        self.sent.push(bytes.to_vec());
        Ok(bytes.len())
    }

    fn now_ms(&self) -> u32 {
        self.clock_ms
    }
}

/// An in-process transport without checksums or retries.
///
/// Posted messages are written out unframed on the next `tick`; received bytes
/// are reassembled from the length field. Each instance is independent.
pub struct MockTransport<I: LinkIo = MockIo> {
    io: I,
    initialized: bool,
    fail_init: Option<String>,
    queue: VecDeque<Message>,
    capacity: usize,
    rx: Vec<u8>,
    ack: Counters,
    noack: Counters,
}

impl MockTransport<MockIo> {
    pub fn new() -> Self {
        Self::with_io(MockIo::default())
    }
}

impl Default for MockTransport<MockIo> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: LinkIo> MockTransport<I> {
    pub fn with_io(io: I) -> Self {
        Self {
            io,
            initialized: false,
            fail_init: None,
            queue: VecDeque::new(),
            capacity: DEFAULT_CAPACITY,
            rx: Vec::with_capacity(HEADER_LEN + u8::MAX as usize),
            ack: Counters::default(),
            noack: Counters::default(),
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Make `initialize` fail with the given reason.
    pub fn failing_init(mut self, reason: &str) -> Self {
        self.fail_init = Some(reason.to_string());
        self
    }

    pub fn io(&self) -> &I {
        &self.io
    }

    pub fn io_mut(&mut self) -> &mut I {
        &mut self.io
    }

    /// Direct access to a counter set, for fixtures.
    pub fn counters_mut(&mut self, class: DeliveryClass) -> &mut Counters {
        match class {
            DeliveryClass::Ack => &mut self.ack,
            DeliveryClass::NoAck => &mut self.noack,
        }
    }
}

impl<I: LinkIo> Transport for MockTransport<I> {
    fn initialize(&mut self) -> Result<()> {
        if let Some(reason) = &self.fail_init {
            return Err(TransportError::InitFailed(reason.clone()));
        }
        self.initialized = true;
        Ok(())
    }

    fn feed_byte(&mut self, byte: u8) -> Option<Message> {
        if self.rx.is_empty() && DeliveryClass::from_som(byte).is_none() {
            // Line noise between messages
            return None;
        }
        self.rx.push(byte);
        if self.rx.len() < HEADER_LEN {
            return None;
        }
        let class = DeliveryClass::from_som(self.rx[0]).unwrap_or(DeliveryClass::NoAck);
        let declared = self.rx[1] as usize;
        if declared < 2 {
            bump(&mut self.counters_mut(class).unplausible_response);
            self.rx.clear();
            return None;
        }
        if self.rx.len() < HEADER_LEN + declared {
            return None;
        }
        let parsed = Message::from_bytes(&self.rx);
        self.rx.clear();
        match parsed {
            Ok(msg) => {
                bump(&mut self.counters_mut(class).rx);
                Some(msg)
            }
            Err(e) => {
                debug!(error = %e, "dropping inbound message");
                bump(&mut self.counters_mut(class).unknown_commands);
                None
            }
        }
    }

    fn tick(&mut self) -> Result<()> {
        if !self.initialized {
            return Err(TransportError::NotInitialized);
        }
        while let Some(msg) = self.queue.pop_front() {
            let class = msg.class();
            match self.io.transmit(&msg.to_bytes()) {
                Ok(_) => bump(&mut self.counters_mut(class).tx),
                Err(e) => {
                    warn!(error = %e, "transmit failed");
                    bump(&mut self.counters_mut(class).tx_failed);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn post(&mut self, msg: Message) -> Result<()> {
        if !self.initialized {
            return Err(TransportError::NotInitialized);
        }
        if self.queue.len() >= self.capacity {
            return Err(TransportError::QueueFull(self.capacity));
        }
        self.queue.push_back(msg);
        Ok(())
    }

    fn queued(&self) -> usize {
        self.queue.len()
    }

    fn counters(&self, class: DeliveryClass) -> Counters {
        match class {
            DeliveryClass::Ack => self.ack,
            DeliveryClass::NoAck => self.noack,
        }
    }

    fn reset_counters(&mut self) {
        self.ack.reset();
        self.noack.reset();
    }

    fn now_ms(&self) -> u32 {
        self.io.now_ms()
    }
}

/// Counters wrap like the board's own u32 counters.
fn bump(counter: &mut u32) {
    *counter = counter.wrapping_add(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Command;

    fn ready() -> MockTransport {
        let mut t = MockTransport::new();
        t.initialize().unwrap();
        t
    }

    fn msg(class: DeliveryClass, code: u8, payload: &[u8]) -> Message {
        Message::new(class, Command::WriteRequest, code, payload).unwrap()
    }

    #[test]
    fn test_post_requires_initialize() {
        let mut t = MockTransport::new();
        let err = t.post(msg(DeliveryClass::Ack, 1, &[])).unwrap_err();
        assert!(matches!(err, TransportError::NotInitialized));
    }

    #[test]
    fn test_failing_init() {
        let mut t = MockTransport::new().failing_init("no port");
        assert!(matches!(t.initialize(), Err(TransportError::InitFailed(_))));
    }

    #[test]
    fn test_tick_sends_in_post_order() {
        let mut t = ready();
        t.post(msg(DeliveryClass::Ack, 1, &[1])).unwrap();
        t.post(msg(DeliveryClass::NoAck, 2, &[2])).unwrap();
        t.post(msg(DeliveryClass::Ack, 3, &[3])).unwrap();
        assert_eq!(t.queued(), 3);
        t.tick().unwrap();
        assert_eq!(t.queued(), 0);
        let codes: Vec<u8> = t.io().sent().iter().map(|b| b[3]).collect();
        assert_eq!(codes, vec![1, 2, 3]);
        assert_eq!(t.counters(DeliveryClass::Ack).tx, 2);
        assert_eq!(t.counters(DeliveryClass::NoAck).tx, 1);
    }

    #[test]
    fn test_queue_full() {
        let mut t = ready().with_capacity(1);
        t.post(msg(DeliveryClass::Ack, 1, &[])).unwrap();
        let err = t.post(msg(DeliveryClass::Ack, 1, &[])).unwrap_err();
        assert!(matches!(err, TransportError::QueueFull(1)));
    }

    #[test]
    fn test_transmit_failure_counts() {
        let mut t = ready();
        t.io_mut().set_fail_transmit(true);
        t.post(msg(DeliveryClass::NoAck, 1, &[])).unwrap();
        assert!(t.tick().is_err());
        assert_eq!(t.counters(DeliveryClass::NoAck).tx_failed, 1);
    }

    #[test]
    fn test_feed_reassembles_messages() {
        let mut t = ready();
        let bytes = msg(DeliveryClass::Ack, 0x0E, &[9, 8, 7]).to_bytes();
        let mut got = None;
        // leading noise is skipped
        assert!(t.feed_byte(0xFF).is_none());
        for b in bytes {
            if let Some(m) = t.feed_byte(b) {
                got = Some(m);
            }
        }
        let m = got.unwrap();
        assert_eq!(m.code(), 0x0E);
        assert_eq!(m.payload(), &[9, 8, 7]);
        assert_eq!(t.counters(DeliveryClass::Ack).rx, 1);
    }

    #[test]
    fn test_feed_counts_unknown_command() {
        let mut t = ready();
        for b in [0x04, 2, b'X', 0x01] {
            assert!(t.feed_byte(b).is_none());
        }
        assert_eq!(t.counters(DeliveryClass::NoAck).unknown_commands, 1);
        assert_eq!(t.counters(DeliveryClass::NoAck).rx, 0);
    }

    #[test]
    fn test_reset_counters() {
        let mut t = ready();
        t.counters_mut(DeliveryClass::Ack).rx = 5;
        t.counters_mut(DeliveryClass::NoAck).tx_retries = 2;
        t.reset_counters();
        assert_eq!(t.counters(DeliveryClass::Ack), Counters::default());
        assert_eq!(t.counters(DeliveryClass::NoAck), Counters::default());
    }

    #[test]
    fn test_clock_comes_from_io() {
        let mut t = ready();
        t.io_mut().advance(25);
        assert_eq!(t.now_ms(), 25);
    }

    #[test]
    fn test_counters_wrap_instead_of_overflowing() {
        let mut t = ready();
        t.counters_mut(DeliveryClass::NoAck).rx = u32::MAX;
        t.counters_mut(DeliveryClass::NoAck).tx = u32::MAX;
        for b in msg(DeliveryClass::NoAck, 0x09, &[1]).to_bytes() {
            t.feed_byte(b);
        }
        t.post(msg(DeliveryClass::NoAck, 0x09, &[1])).unwrap();
        t.tick().unwrap();
        assert_eq!(t.counters(DeliveryClass::NoAck).rx, 0);
        assert_eq!(t.counters(DeliveryClass::NoAck).tx, 0);
    }
}
