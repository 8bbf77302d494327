//! Standing requests for periodic retransmission of a parameter.
//!
//! A request written to the subscriptions channel arms an entry on the receiving
//! side; that side's `tick` then emits the value every `period_ms`. There is no
//! separate cancel message: a request with `count == 0` removes the entry for its
//! code, and any other request for the same code replaces the existing entry.

use crate::decode::decode_subscription;
use crate::registry::{ParamEvent, ParamHandler};
use crate::types::Code;
use hb_transport::DeliveryClass;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, warn};

/// Repeat count meaning "until replaced".
pub const UNBOUNDED: i32 = -1;

/// Entries a table holds at most.
pub const MAX_SUBSCRIPTIONS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    pub code: Code,
    /// Remaining sends, or [`UNBOUNDED`].
    pub count: i32,
    /// Zero sends on every tick.
    pub period_ms: u32,
    pub next_send_time: u32,
    pub class: DeliveryClass,
}

impl SubscriptionRequest {
    pub fn new(code: Code, count: i32, period_ms: u32, class: DeliveryClass) -> Self {
        Self {
            code,
            count,
            period_ms,
            next_send_time: 0,
            class,
        }
    }

    pub fn cancel(code: Code) -> Self {
        Self::new(code, 0, 0, DeliveryClass::NoAck)
    }

    pub fn is_cancel(&self) -> bool {
        self.count == 0
    }

    fn due(&self, now_ms: u32) -> bool {
        // wrap-safe: due once `now` has reached or passed `next_send_time`
        (now_ms.wrapping_sub(self.next_send_time) as i32) >= 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmOutcome {
    Added,
    Replaced,
    Cancelled,
    /// Cancel for a code that had no entry.
    NotFound,
    /// Table already holds [`MAX_SUBSCRIPTIONS`] other codes.
    TableFull,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    req: SubscriptionRequest,
    /// Armed but not sent yet; due on the next tick whatever the clock reads.
    fresh: bool,
}

#[derive(Debug, Default, Clone)]
pub struct SubscriptionTable {
    entries: Vec<Slot>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, code: Code) -> Option<&SubscriptionRequest> {
        self.entries.iter().map(|s| &s.req).find(|e| e.code == code)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SubscriptionRequest> {
        self.entries.iter().map(|s| &s.req)
    }

    /// Install `req`. The first send happens on the next tick; the
    /// `next_send_time` carried by `req` is replaced once it goes out.
    pub fn arm(&mut self, req: SubscriptionRequest) -> ArmOutcome {
        let pos = self.entries.iter().position(|e| e.req.code == req.code);
        let slot = Slot { req, fresh: true };
        match (pos, req.is_cancel()) {
            (Some(i), true) => {
                self.entries.remove(i);
                ArmOutcome::Cancelled
            }
            (None, true) => ArmOutcome::NotFound,
            (Some(i), false) => {
                self.entries[i] = slot;
                ArmOutcome::Replaced
            }
            (None, false) if self.entries.len() >= MAX_SUBSCRIPTIONS => ArmOutcome::TableFull,
            (None, false) => {
                self.entries.push(slot);
                ArmOutcome::Added
            }
        }
    }

    /// Entries due at `now_ms`, in arming order. Nothing is advanced.
    pub fn due(&self, now_ms: u32) -> Vec<(Code, DeliveryClass)> {
        self.entries
            .iter()
            .filter(|s| s.fresh || s.req.due(now_ms))
            .map(|s| (s.req.code, s.req.class))
            .collect()
    }

    /// Record a send of `code` at `now_ms`: schedule the next one and spend one count.
    /// A bounded entry is dropped once its count reaches zero.
    pub fn mark_sent(&mut self, code: Code, now_ms: u32) {
        let Some(i) = self.entries.iter().position(|s| s.req.code == code) else {
            return;
        };
        let slot = &mut self.entries[i];
        slot.fresh = false;
        slot.req.next_send_time = now_ms.wrapping_add(slot.req.period_ms);
        if slot.req.count > 0 {
            slot.req.count -= 1;
        }
        if slot.req.count == 0 {
            self.entries.remove(i);
        }
    }
}

/// Default handler of the subscriptions channel: arms the shared table on every write.
pub struct SubscriptionHandler {
    table: Rc<RefCell<SubscriptionTable>>,
}

impl SubscriptionHandler {
    pub fn new(table: Rc<RefCell<SubscriptionTable>>) -> Self {
        Self { table }
    }
}

impl ParamHandler for SubscriptionHandler {
    fn handle(&mut self, event: ParamEvent, _code: Code, data: &[u8]) {
        if event != ParamEvent::PostWrite {
            return;
        }
        let Some(req) = decode_subscription(data) else {
            warn!(len = data.len(), "ignoring malformed subscription request");
            return;
        };
        let Ok(mut table) = self.table.try_borrow_mut() else {
            warn!(code = %req.code, "subscription table busy, request dropped");
            return;
        };
        match table.arm(req) {
            ArmOutcome::TableFull => {
                warn!(code = %req.code, "subscription table full, request dropped")
            }
            outcome => debug!(code = %req.code, ?outcome, "subscription armed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::encode_subscription;

    fn req(code: Code, count: i32, period: u32) -> SubscriptionRequest {
        SubscriptionRequest::new(code, count, period, DeliveryClass::NoAck)
    }

    /// Send everything due at `now`, the way the link does.
    fn take_due(t: &mut SubscriptionTable, now: u32) -> Vec<(Code, DeliveryClass)> {
        let due = t.due(now);
        for (code, _) in &due {
            t.mark_sent(*code, now);
        }
        due
    }

    #[test]
    fn test_new_request_replaces_old() {
        let mut t = SubscriptionTable::new();
        assert_eq!(t.arm(req(Code::SensHall, 5, 10)), ArmOutcome::Added);
        assert_eq!(t.arm(req(Code::SensHall, -1, 20)), ArmOutcome::Replaced);
        assert_eq!(t.len(), 1);
        assert_eq!(t.get(Code::SensHall).unwrap().period_ms, 20);
    }

    #[test]
    fn test_zero_count_cancels() {
        let mut t = SubscriptionTable::new();
        t.arm(req(Code::SensHall, -1, 10));
        assert_eq!(t.arm(SubscriptionRequest::cancel(Code::SensHall)), ArmOutcome::Cancelled);
        assert!(t.is_empty());
        assert_eq!(t.arm(SubscriptionRequest::cancel(Code::SensHall)), ArmOutcome::NotFound);
    }

    #[test]
    fn test_table_limit() {
        let mut t = SubscriptionTable::new();
        for code in Code::ALL.iter().take(MAX_SUBSCRIPTIONS) {
            assert_eq!(t.arm(req(*code, 1, 1)), ArmOutcome::Added);
        }
        let extra = Code::ALL[MAX_SUBSCRIPTIONS];
        assert_eq!(t.arm(req(extra, 1, 1)), ArmOutcome::TableFull);
        // replacing an existing code still works when full
        assert_eq!(t.arm(req(Code::ALL[0], 2, 1)), ArmOutcome::Replaced);
    }

    #[test]
    fn test_bounded_count_runs_out() {
        let mut t = SubscriptionTable::new();
        t.arm(req(Code::SensHall, 2, 10));
        assert_eq!(take_due(&mut t, 0).len(), 1);
        assert!(take_due(&mut t, 5).is_empty());
        assert_eq!(take_due(&mut t, 10).len(), 1);
        assert!(t.is_empty());
        assert!(take_due(&mut t, 100).is_empty());
    }

    #[test]
    fn test_unbounded_keeps_going() {
        let mut t = SubscriptionTable::new();
        t.arm(req(Code::SensElectrical, UNBOUNDED, 0));
        for now in 0..50 {
            assert_eq!(take_due(&mut t, now), vec![(Code::SensElectrical, DeliveryClass::NoAck)]);
        }
        assert_eq!(t.get(Code::SensElectrical).unwrap().count, UNBOUNDED);
    }

    #[test]
    fn test_due_survives_clock_wrap() {
        let mut t = SubscriptionTable::new();
        t.arm(req(Code::SensHall, UNBOUNDED, 20));
        assert_eq!(take_due(&mut t, u32::MAX - 25).len(), 1);
        assert_eq!(t.get(Code::SensHall).unwrap().next_send_time, u32::MAX - 5);
        assert!(take_due(&mut t, u32::MAX - 10).is_empty());
        assert_eq!(take_due(&mut t, 3).len(), 1);
        assert_eq!(t.get(Code::SensHall).unwrap().next_send_time, 23);
    }

    #[test]
    fn test_fresh_entry_fires_late_in_the_clock() {
        let mut t = SubscriptionTable::new();
        t.arm(req(Code::SensHall, 2, 10));
        let start = 0x8000_0000u32;
        assert_eq!(take_due(&mut t, start).len(), 1);
        assert!(take_due(&mut t, start + 5).is_empty());
        assert_eq!(take_due(&mut t, start + 10).len(), 1);
        assert!(t.is_empty());
    }

    #[test]
    fn test_due_does_not_advance() {
        let mut t = SubscriptionTable::new();
        t.arm(req(Code::SensHall, 1, 10));
        assert_eq!(t.due(0).len(), 1);
        assert_eq!(t.due(0).len(), 1);
        assert_eq!(t.get(Code::SensHall).unwrap().count, 1);
        t.mark_sent(Code::SensHall, 0);
        assert!(t.is_empty());
    }

    #[test]
    fn test_handler_arms_on_post_write_only() {
        let table = Rc::new(RefCell::new(SubscriptionTable::new()));
        let mut h = SubscriptionHandler::new(table.clone());
        let bytes = encode_subscription(&req(Code::SensHall, 3, 7));
        h.handle(ParamEvent::PreWrite, Code::ProtocolSubscriptions, &bytes);
        assert!(table.borrow().is_empty());
        h.handle(ParamEvent::PostWrite, Code::ProtocolSubscriptions, &bytes);
        assert_eq!(table.borrow().get(Code::SensHall).unwrap().count, 3);
        h.handle(ParamEvent::PostWrite, Code::ProtocolSubscriptions, &bytes[..4]);
        assert_eq!(table.borrow().len(), 1);
    }
}
