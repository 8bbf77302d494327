use crate::decode::{
    decode_counters, decode_electrical, decode_hall, ElectricalMeasurements, HallSample,
};
use crate::encode::{self, encode_counters, encode_subscription, BuzzerData, PwmLimits};
use crate::loader::LinkConfig;
use crate::registry::{BoxedHandler, ParamEvent, ParamRegistry, Storage};
use crate::stats::LinkStats;
use crate::subscription::{SubscriptionHandler, SubscriptionRequest, SubscriptionTable};
use crate::telemetry;
use crate::types::Code;
use crate::{LinkError, RegistryError, Result};
use hb_transport::{Command, Counters, DeliveryClass, Message, Transport};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, info, warn};

/// One controller-to-board link: registry, subscriptions and statistics over a transport.
///
/// Drive it from a single thread: call [`feed_byte`](Self::feed_byte) for every received
/// byte and [`tick`](Self::tick) at a steady rate. Handlers run inside those calls.
pub struct HoverboardLink<T: Transport> {
    transport: T,
    registry: ParamRegistry,
    subscriptions: Rc<RefCell<SubscriptionTable>>,
    remote_refreshed_ms: Option<u32>,
}

impl<T: Transport> HoverboardLink<T> {
    /// Initialize `transport` and set up the default registry.
    ///
    /// An initialization failure is returned as is; retrying or halting is up to the caller.
    pub fn new(mut transport: T) -> Result<Self> {
        transport.initialize()?;
        let mut registry = ParamRegistry::new();
        let subscriptions = Rc::new(RefCell::new(SubscriptionTable::new()));
        registry.register_or_replace(
            Code::ProtocolSubscriptions,
            Some(Box::new(SubscriptionHandler::new(subscriptions.clone()))),
        )?;
        info!("hoverboard link initialized");
        Ok(Self {
            transport,
            registry,
            subscriptions,
            remote_refreshed_ms: None,
        })
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn registry(&self) -> &ParamRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ParamRegistry {
        &mut self.registry
    }

    /// Push one received byte; returns the code of a message it completed.
    pub fn feed_byte(&mut self, byte: u8) -> Result<Option<Code>> {
        let Some(msg) = self.transport.feed_byte(byte) else {
            return Ok(None);
        };
        self.handle_message(&msg).map(Some)
    }

    /// Feed a run of bytes, stopping at the first message that fails to apply.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<usize> {
        let mut handled = 0;
        for b in bytes {
            if self.feed_byte(*b)?.is_some() {
                handled += 1;
            }
        }
        Ok(handled)
    }

    /// Emit due subscriptions, then let the transport send what is queued.
    ///
    /// The transport is ticked even when a subscription could not be posted, so a
    /// full queue drains. An entry whose post failed keeps its count and stays due.
    /// The first post failure is returned after the transport tick.
    pub fn tick(&mut self) -> Result<()> {
        let now = self.transport.now_ms();
        let due = match self.subscriptions.try_borrow() {
            Ok(table) => table.due(now),
            Err(_) => Vec::new(),
        };
        let mut deferred = None;
        for (code, class) in due {
            match self.post_subscribed(code, class) {
                Ok(()) => {
                    if let Ok(mut table) = self.subscriptions.try_borrow_mut() {
                        table.mark_sent(code, now);
                    }
                }
                Err(LinkError::Registry(RegistryError::StorageBusy(_))) => {
                    debug!(%code, "subscription deferred, storage busy");
                }
                Err(e) => {
                    warn!(%code, error = %e, "subscription send deferred");
                    deferred = Some(e);
                    break;
                }
            }
        }
        self.transport.tick()?;
        match deferred {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn post_subscribed(&mut self, code: Code, class: DeliveryClass) -> Result<()> {
        let payload = self.response_payload(code)?;
        let msg = Message::new(class, Command::ReadResponse, code.value(), &payload)
            .ok_or(RegistryError::PayloadTooLarge(payload.len()))?;
        self.post(msg)
    }

    /// Messages buffered in the transport across both delivery classes.
    pub fn tx_buffer_level(&self) -> usize {
        self.transport.queued()
    }

    pub fn update_param_handler(
        &mut self,
        code: Code,
        handler: Option<BoxedHandler>,
    ) -> Result<Option<BoxedHandler>> {
        Ok(self.registry.register_or_replace(code, handler)?)
    }

    pub fn update_param_variable(
        &mut self,
        code: Code,
        storage: Storage,
        len: usize,
    ) -> Result<()> {
        Ok(self.registry.bind(code, storage, len)?)
    }

    /// Ask the board for its current value of `code`. Handle the answer with a handler
    /// or read it from the bound storage.
    pub fn request_read(&mut self, code: Code, class: DeliveryClass) -> Result<()> {
        let msg = encode::read_request(&self.registry, code, class)?;
        self.post(msg)
    }

    pub fn send_pwm(&mut self, drive: i16, steer: i16, class: DeliveryClass) -> Result<()> {
        let msg = encode::pwm_message(&self.registry, drive, steer, class)?;
        self.post(msg)
    }

    pub fn send_pwm_data(
        &mut self,
        drive: i16,
        steer: i16,
        limits: &PwmLimits,
        class: DeliveryClass,
    ) -> Result<()> {
        let msg = encode::pwm_data_message(&self.registry, drive, steer, limits, class)?;
        self.post(msg)
    }

    pub fn send_buzzer(&mut self, buzzer: &BuzzerData, class: DeliveryClass) -> Result<()> {
        let msg = encode::buzzer_message(&self.registry, buzzer, class)?;
        self.post(msg)
    }

    pub fn send_enable(&mut self, enable: bool, class: DeliveryClass) -> Result<()> {
        let msg = encode::enable_message(&self.registry, enable, class)?;
        self.post(msg)
    }

    /// Ask the board to zero its counters. Only a later counters read shows the effect.
    pub fn send_counter_reset(&mut self, class: DeliveryClass) -> Result<()> {
        let msg = encode::counter_reset_message(&self.registry, class)?;
        self.post(msg)
    }

    /// Refresh the remote counters mirror.
    pub fn request_counters(&mut self, class: DeliveryClass) -> Result<()> {
        self.request_read(Code::ProtocolCountSum, class)
    }

    /// Have the board send `code` every `period_ms`, `count` times (`-1` unbounded, `0` cancels).
    pub fn schedule_read(
        &mut self,
        code: Code,
        count: i32,
        period_ms: u32,
        class: DeliveryClass,
    ) -> Result<()> {
        let req = SubscriptionRequest::new(code, count, period_ms, class);
        let msg = encode::subscription_message(&self.registry, &req)?;
        self.post(msg)
    }

    /// Arm a subscription in this process through the local subscriptions handler.
    ///
    /// Returns false when no handler is installed for the subscriptions channel.
    pub fn schedule_transmission(
        &mut self,
        code: Code,
        count: i32,
        period_ms: u32,
        class: DeliveryClass,
    ) -> Result<bool> {
        let req = SubscriptionRequest::new(code, count, period_ms, class);
        let bytes = encode_subscription(&req);
        Ok(self
            .registry
            .notify(Code::ProtocolSubscriptions, ParamEvent::PostWrite, &bytes)?)
    }

    /// Locally armed subscriptions.
    pub fn subscriptions(&self) -> Vec<SubscriptionRequest> {
        self.subscriptions
            .try_borrow()
            .map(|t| t.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn apply_config(&mut self, cfg: &LinkConfig) -> Result<()> {
        for plan in &cfg.subscriptions {
            let class = plan.class.unwrap_or(cfg.default_class);
            self.schedule_read(plan.code, plan.count, plan.period_ms, class)?;
        }
        Ok(())
    }

    pub fn stats(&self) -> LinkStats {
        LinkStats {
            local_ack: self.transport.counters(DeliveryClass::Ack),
            local_noack: self.transport.counters(DeliveryClass::NoAck),
            remote: self
                .bound_bytes(Code::ProtocolCountSum)
                .and_then(|b| decode_counters(&b))
                .unwrap_or_default(),
            remote_refreshed_ms: self.remote_refreshed_ms,
            tx_queued: self.transport.queued(),
        }
    }

    /// Zero both local counter sets now. The remote mirror is left alone.
    pub fn reset_counters(&mut self) {
        self.transport.reset_counters();
        info!("local counters reset");
    }

    pub fn hall(&self) -> [HallSample; 2] {
        self.bound_bytes(Code::SensHall)
            .and_then(|b| decode_hall(&b))
            .unwrap_or_default()
    }

    pub fn electrical(&self) -> ElectricalMeasurements {
        self.bound_bytes(Code::SensElectrical)
            .and_then(|b| decode_electrical(&b))
            .unwrap_or_default()
    }

    pub fn speed_kmh(&self) -> f64 {
        telemetry::speed_kmh(&self.hall())
    }

    pub fn steer_kmh(&self) -> f64 {
        telemetry::steer_kmh(&self.hall())
    }

    pub fn speed_mms(&self) -> f64 {
        telemetry::speed_mms(&self.hall())
    }

    pub fn steer_mms(&self) -> f64 {
        telemetry::steer_mms(&self.hall())
    }

    pub fn speed0_mms(&self) -> f64 {
        f64::from(self.hall()[0].speed_mm_per_s)
    }

    pub fn speed1_mms(&self) -> f64 {
        f64::from(self.hall()[1].speed_mm_per_s)
    }

    pub fn speed0_kmh(&self) -> f64 {
        telemetry::mms_to_kmh(self.speed0_mms())
    }

    pub fn speed1_kmh(&self) -> f64 {
        telemetry::mms_to_kmh(self.speed1_mms())
    }

    pub fn battery_voltage(&self) -> f32 {
        telemetry::battery_voltage(&self.electrical())
    }

    pub fn motor_amps_avg(&self, motor: usize) -> Option<f32> {
        telemetry::motor_amps_avg(&self.electrical(), motor)
    }

    fn post(&mut self, msg: Message) -> Result<()> {
        debug!(%msg, "post");
        self.transport.post(msg)?;
        Ok(())
    }

    fn bound_bytes(&self, code: Code) -> Option<Vec<u8>> {
        self.registry.lookup(code).and_then(|d| d.read_bytes())
    }

    fn local_counters(&self, code: Code) -> Option<Counters> {
        let ack = self.transport.counters(DeliveryClass::Ack);
        let noack = self.transport.counters(DeliveryClass::NoAck);
        match code {
            Code::ProtocolCountSum => Some(ack.sum(&noack)),
            Code::ProtocolCountAck => Some(ack),
            Code::ProtocolCountNoAck => Some(noack),
            _ => None,
        }
    }

    /// What we answer for `code`: live counters for the counter channels,
    /// bound storage for everything else.
    fn response_payload(&mut self, code: Code) -> Result<Vec<u8>> {
        match self.local_counters(code) {
            Some(c) => Ok(encode_counters(&c)),
            None => Ok(self.registry.read_for_send(code)?),
        }
    }

    fn handle_message(&mut self, msg: &Message) -> Result<Code> {
        let code = Code::try_from(msg.code())?;
        match (msg.command(), code) {
            (
                Command::ReadRequest,
                Code::ProtocolCountSum | Code::ProtocolCountAck | Code::ProtocolCountNoAck,
            ) => {
                let payload = self.response_payload(code)?;
                let reply = Message::new(msg.class(), Command::ReadResponse, msg.code(), &payload)
                    .ok_or(RegistryError::PayloadTooLarge(payload.len()))?;
                self.post(reply)?;
            }
            (Command::WriteRequest, Code::ProtocolCountSum) => {
                self.transport.reset_counters();
                info!("counters reset by peer");
                let reply = Message::new(msg.class(), Command::WriteResponse, msg.code(), &[])
                    .ok_or(RegistryError::PayloadTooLarge(0))?;
                self.post(reply)?;
            }
            _ => {
                if let Some(reply) = self.registry.dispatch(msg)? {
                    self.post(reply)?;
                }
                if msg.command() == Command::ReadResponse && code == Code::ProtocolCountSum {
                    self.remote_refreshed_ms = Some(self.transport.now_ms());
                }
            }
        }
        Ok(code)
    }
}
