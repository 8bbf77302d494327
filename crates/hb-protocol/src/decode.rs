use crate::encode::{BuzzerData, PwmLimits, PwmSetpoint};
use crate::subscription::SubscriptionRequest;
use crate::types::{
    Code, BUZZER_LEN, COUNTERS_LEN, ELECTRICAL_LEN, HALL_SAMPLE_LEN, PWM_DATA_LEN, PWM_LEN,
    SUBSCRIPTION_LEN,
};
use hb_transport::{Counters, DeliveryClass};
use serde::{Deserialize, Serialize};

/// Little-endian cursor over a payload. Every read is bounds-checked.
struct LeReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> LeReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let end = self.pos.checked_add(N)?;
        let bytes: [u8; N] = self.data.get(self.pos..end)?.try_into().ok()?;
        self.pos = end;
        Some(bytes)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take::<1>().map(|b| b[0])
    }

    fn i8(&mut self) -> Option<i8> {
        self.take::<1>().map(i8::from_le_bytes)
    }

    fn u16(&mut self) -> Option<u16> {
        self.take::<2>().map(u16::from_le_bytes)
    }

    fn i32(&mut self) -> Option<i32> {
        self.take::<4>().map(i32::from_le_bytes)
    }

    fn u32(&mut self) -> Option<u32> {
        self.take::<4>().map(u32::from_le_bytes)
    }

    fn f32(&mut self) -> Option<f32> {
        self.take::<4>().map(f32::from_le_bytes)
    }
}

/// Hall sensor record for one wheel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HallSample {
    /// 90 steps per revolution
    pub posn: i32,
    pub speed: i32,
    pub skipped: i32,
    pub posn_mm: i32,
    pub speed_mm_per_s: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MotorMeasurements {
    pub dc_amps: f32,
    pub dc_amps_avg: f32,
    pub r1: i32,
    pub r2: i32,
    pub q: i32,
    pub dc_amps_x100: i32,
    pub dc_adc_limit: i32,
    pub dc_adc_offset: i32,
    pub pwm_limiter: i32,
    pub pwm_requested: i32,
    pub pwm_actual: i32,
    pub limiter_count: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ElectricalMeasurements {
    pub bat_raw: i32,
    pub battery_voltage: f32,
    pub board_temp_raw: i32,
    pub board_temp_filtered: f32,
    pub board_temp_deg_c: f32,
    pub charging: i32,
    pub dc_cur_lim: i32,
    pub dc_adc_limit: i32,
    pub motors: [MotorMeasurements; 2],
}

pub fn decode_pwm(data: &[u8]) -> Option<PwmSetpoint> {
    if data.len() < PWM_LEN {
        return None;
    }
    let mut r = LeReader::new(data);
    Some(PwmSetpoint {
        left: r.i32()?,
        right: r.i32()?,
    })
}

pub fn decode_pwm_data(data: &[u8]) -> Option<(PwmSetpoint, PwmLimits)> {
    if data.len() < PWM_DATA_LEN {
        return None;
    }
    let pwm = decode_pwm(data)?;
    let mut r = LeReader::new(&data[PWM_LEN..]);
    let limits = PwmLimits {
        max_power: r.i8()?,
        min_power: r.i8()?,
        minimum_pwm: r.i8()?,
    };
    Some((pwm, limits))
}

pub fn decode_buzzer(data: &[u8]) -> Option<BuzzerData> {
    if data.len() < BUZZER_LEN {
        return None;
    }
    let mut r = LeReader::new(data);
    Some(BuzzerData {
        freq: r.u8()?,
        pattern: r.u8()?,
        len: r.u16()?,
    })
}

pub fn decode_enable(data: &[u8]) -> Option<bool> {
    data.first().map(|b| *b != 0)
}

pub fn decode_counters(data: &[u8]) -> Option<Counters> {
    if data.len() < COUNTERS_LEN {
        return None;
    }
    let mut r = LeReader::new(data);
    Some(Counters {
        rx: r.u32()?,
        rx_missing: r.u32()?,
        tx: r.u32()?,
        tx_retries: r.u32()?,
        tx_failed: r.u32()?,
        unwanted_acks: r.u32()?,
        unwanted_nacks: r.u32()?,
        unknown_commands: r.u32()?,
        unplausible_response: r.u32()?,
    })
}

/// Fails on short input, unknown codes and unknown delivery classes.
pub fn decode_subscription(data: &[u8]) -> Option<SubscriptionRequest> {
    if data.len() < SUBSCRIPTION_LEN {
        return None;
    }
    let mut r = LeReader::new(data);
    let code = Code::try_from(r.u8()?).ok()?;
    let count = r.i32()?;
    let period_ms = r.u32()?;
    let next_send_time = r.u32()?;
    let class = DeliveryClass::from_som(r.u8()?)?;
    Some(SubscriptionRequest {
        code,
        count,
        period_ms,
        next_send_time,
        class,
    })
}

fn read_hall(r: &mut LeReader<'_>) -> Option<HallSample> {
    Some(HallSample {
        posn: r.i32()?,
        speed: r.i32()?,
        skipped: r.i32()?,
        posn_mm: r.i32()?,
        speed_mm_per_s: r.i32()?,
    })
}

pub fn decode_hall(data: &[u8]) -> Option<[HallSample; 2]> {
    if data.len() < 2 * HALL_SAMPLE_LEN {
        return None;
    }
    let mut r = LeReader::new(data);
    Some([read_hall(&mut r)?, read_hall(&mut r)?])
}

pub fn encode_hall(samples: &[HallSample; 2]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 * HALL_SAMPLE_LEN);
    for s in samples {
        for v in [s.posn, s.speed, s.skipped, s.posn_mm, s.speed_mm_per_s] {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
    out
}

fn read_motor(r: &mut LeReader<'_>) -> Option<MotorMeasurements> {
    Some(MotorMeasurements {
        dc_amps: r.f32()?,
        dc_amps_avg: r.f32()?,
        r1: r.i32()?,
        r2: r.i32()?,
        q: r.i32()?,
        dc_amps_x100: r.i32()?,
        dc_adc_limit: r.i32()?,
        dc_adc_offset: r.i32()?,
        pwm_limiter: r.i32()?,
        pwm_requested: r.i32()?,
        pwm_actual: r.i32()?,
        limiter_count: r.u32()?,
    })
}

pub fn decode_electrical(data: &[u8]) -> Option<ElectricalMeasurements> {
    if data.len() < ELECTRICAL_LEN {
        return None;
    }
    let mut r = LeReader::new(data);
    Some(ElectricalMeasurements {
        bat_raw: r.i32()?,
        battery_voltage: r.f32()?,
        board_temp_raw: r.i32()?,
        board_temp_filtered: r.f32()?,
        board_temp_deg_c: r.f32()?,
        charging: r.i32()?,
        dc_cur_lim: r.i32()?,
        dc_adc_limit: r.i32()?,
        motors: [read_motor(&mut r)?, read_motor(&mut r)?],
    })
}

/// Typed view of a payload, chosen by code.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum DecodedValue {
    Version { version: u32 },
    Hall { wheels: [HallSample; 2] },
    Electrical(ElectricalMeasurements),
    Flag { enabled: bool },
    Pwm(PwmSetpoint),
    PwmData { pwm: PwmSetpoint, limits: PwmLimits },
    Buzzer(BuzzerData),
    Subscription(SubscriptionRequest),
    Counters(Counters),
}

pub fn decode_payload(code: Code, data: &[u8]) -> Option<DecodedValue> {
    match code {
        Code::ProtocolVersion => LeReader::new(data)
            .u32()
            .map(|version| DecodedValue::Version { version }),
        Code::SensHall => decode_hall(data).map(|wheels| DecodedValue::Hall { wheels }),
        Code::SensElectrical => decode_electrical(data).map(DecodedValue::Electrical),
        Code::EnableMotors | Code::DisablePoweroff | Code::DebugOut => {
            decode_enable(data).map(|enabled| DecodedValue::Flag { enabled })
        }
        Code::SetPointPwm => decode_pwm(data).map(DecodedValue::Pwm),
        Code::SetPointPwmData => {
            decode_pwm_data(data).map(|(pwm, limits)| DecodedValue::PwmData { pwm, limits })
        }
        Code::SetBuzzer => decode_buzzer(data).map(DecodedValue::Buzzer),
        Code::ProtocolSubscriptions => decode_subscription(data).map(DecodedValue::Subscription),
        Code::ProtocolCountSum | Code::ProtocolCountAck | Code::ProtocolCountNoAck => {
            decode_counters(data).map(DecodedValue::Counters)
        }
    }
}
