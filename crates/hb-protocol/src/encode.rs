use crate::subscription::SubscriptionRequest;
use crate::types::{Code, BUZZER_LEN, COUNTERS_LEN, PWM_DATA_LEN, PWM_LEN, SUBSCRIPTION_LEN};
use crate::{ParamRegistry, RegistryError};
use hb_transport::{Command, Counters, DeliveryClass, Message, MAX_PAYLOAD_LEN};
use serde::{Deserialize, Serialize};

/// Wheel setpoints as sent to the board.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PwmSetpoint {
    pub left: i32,
    pub right: i32,
}

impl PwmSetpoint {
    /// Mix drive and steer into wheel values: `left = drive + steer`, `right = drive - steer`.
    pub fn from_drive_steer(drive: i16, steer: i16) -> Self {
        let (drive, steer) = (i32::from(drive), i32::from(steer));
        Self {
            left: drive + steer,
            right: drive - steer,
        }
    }
}

/// Power limits carried by the extended PWM message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PwmLimits {
    pub max_power: i8,
    pub min_power: i8,
    pub minimum_pwm: i8,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuzzerData {
    pub freq: u8,
    pub pattern: u8,
    pub len: u16,
}

pub fn encode_pwm(pwm: &PwmSetpoint) -> Vec<u8> {
    let mut out = Vec::with_capacity(PWM_LEN);
    out.extend_from_slice(&pwm.left.to_le_bytes());
    out.extend_from_slice(&pwm.right.to_le_bytes());
    out
}

pub fn encode_pwm_data(pwm: &PwmSetpoint, limits: &PwmLimits) -> Vec<u8> {
    let mut out = Vec::with_capacity(PWM_DATA_LEN);
    out.extend_from_slice(&encode_pwm(pwm));
    out.extend_from_slice(&limits.max_power.to_le_bytes());
    out.extend_from_slice(&limits.min_power.to_le_bytes());
    out.extend_from_slice(&limits.minimum_pwm.to_le_bytes());
    out
}

pub fn encode_buzzer(buzzer: &BuzzerData) -> Vec<u8> {
    let mut out = Vec::with_capacity(BUZZER_LEN);
    out.push(buzzer.freq);
    out.push(buzzer.pattern);
    out.extend_from_slice(&buzzer.len.to_le_bytes());
    out
}

pub fn encode_enable(enable: bool) -> Vec<u8> {
    vec![u8::from(enable)]
}

pub fn encode_counters(c: &Counters) -> Vec<u8> {
    let fields = [
        c.rx,
        c.rx_missing,
        c.tx,
        c.tx_retries,
        c.tx_failed,
        c.unwanted_acks,
        c.unwanted_nacks,
        c.unknown_commands,
        c.unplausible_response,
    ];
    let mut out = Vec::with_capacity(COUNTERS_LEN);
    for f in fields {
        out.extend_from_slice(&f.to_le_bytes());
    }
    out
}

pub fn encode_subscription(req: &SubscriptionRequest) -> Vec<u8> {
    let mut out = Vec::with_capacity(SUBSCRIPTION_LEN);
    out.push(req.code.value());
    out.extend_from_slice(&req.count.to_le_bytes());
    out.extend_from_slice(&req.period_ms.to_le_bytes());
    out.extend_from_slice(&req.next_send_time.to_le_bytes());
    out.push(req.class.som());
    out
}

/// Ask the peer to transmit its current value of `code`.
pub fn read_request(
    registry: &ParamRegistry,
    code: Code,
    class: DeliveryClass,
) -> Result<Message, RegistryError> {
    let desc = registry
        .lookup(code)
        .ok_or(RegistryError::Unregistered(code))?;
    if !desc.access().readable() {
        return Err(RegistryError::AccessDenied(code, "read"));
    }
    Message::new(class, Command::ReadRequest, code.value(), &[])
        .ok_or(RegistryError::PayloadTooLarge(0))
}

/// Push raw value bytes for `code` to the peer.
pub fn write_request(
    registry: &ParamRegistry,
    code: Code,
    class: DeliveryClass,
    payload: &[u8],
) -> Result<Message, RegistryError> {
    let desc = registry
        .lookup(code)
        .ok_or(RegistryError::Unregistered(code))?;
    if !desc.access().writable() {
        return Err(RegistryError::AccessDenied(code, "write"));
    }
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(RegistryError::PayloadTooLarge(payload.len()));
    }
    Message::new(class, Command::WriteRequest, code.value(), payload)
        .ok_or(RegistryError::PayloadTooLarge(payload.len()))
}

pub fn pwm_message(
    registry: &ParamRegistry,
    drive: i16,
    steer: i16,
    class: DeliveryClass,
) -> Result<Message, RegistryError> {
    let pwm = PwmSetpoint::from_drive_steer(drive, steer);
    write_request(registry, Code::SetPointPwm, class, &encode_pwm(&pwm))
}

pub fn pwm_data_message(
    registry: &ParamRegistry,
    drive: i16,
    steer: i16,
    limits: &PwmLimits,
    class: DeliveryClass,
) -> Result<Message, RegistryError> {
    let pwm = PwmSetpoint::from_drive_steer(drive, steer);
    write_request(
        registry,
        Code::SetPointPwmData,
        class,
        &encode_pwm_data(&pwm, limits),
    )
}

pub fn buzzer_message(
    registry: &ParamRegistry,
    buzzer: &BuzzerData,
    class: DeliveryClass,
) -> Result<Message, RegistryError> {
    write_request(registry, Code::SetBuzzer, class, &encode_buzzer(buzzer))
}

pub fn enable_message(
    registry: &ParamRegistry,
    enable: bool,
    class: DeliveryClass,
) -> Result<Message, RegistryError> {
    write_request(registry, Code::EnableMotors, class, &encode_enable(enable))
}

/// All-zero counters written to the counters-sum channel; the peer zeroes its own set.
pub fn counter_reset_message(
    registry: &ParamRegistry,
    class: DeliveryClass,
) -> Result<Message, RegistryError> {
    write_request(
        registry,
        Code::ProtocolCountSum,
        class,
        &encode_counters(&Counters::default()),
    )
}

/// Install `req` on the peer. Always acknowledged, whatever class `req` asks for.
pub fn subscription_message(
    registry: &ParamRegistry,
    req: &SubscriptionRequest,
) -> Result<Message, RegistryError> {
    write_request(
        registry,
        Code::ProtocolSubscriptions,
        DeliveryClass::Ack,
        &encode_subscription(req),
    )
}
