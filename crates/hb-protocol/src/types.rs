use serde::{Deserialize, Serialize};

use crate::RegistryError;

/// Protocol-visible variables. The numeric values are shared with the board firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Code {
    /// Generic read/write channel; every peer answers it.
    ProtocolVersion = 0x00,
    SensHall = 0x02,
    SensElectrical = 0x08,
    EnableMotors = 0x09,
    DisablePoweroff = 0x0A,
    DebugOut = 0x0B,
    SetPointPwmData = 0x0D,
    SetPointPwm = 0x0E,
    SetBuzzer = 0x21,
    ProtocolSubscriptions = 0x22,
    ProtocolCountSum = 0x23,
    ProtocolCountAck = 0x24,
    ProtocolCountNoAck = 0x25,
}

impl Code {
    pub const ALL: [Code; 13] = [
        Code::ProtocolVersion,
        Code::SensHall,
        Code::SensElectrical,
        Code::EnableMotors,
        Code::DisablePoweroff,
        Code::DebugOut,
        Code::SetPointPwmData,
        Code::SetPointPwm,
        Code::SetBuzzer,
        Code::ProtocolSubscriptions,
        Code::ProtocolCountSum,
        Code::ProtocolCountAck,
        Code::ProtocolCountNoAck,
    ];

    pub const fn value(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Code::ProtocolVersion => "protocol_version",
            Code::SensHall => "sens_hall",
            Code::SensElectrical => "sens_electrical",
            Code::EnableMotors => "enable_motors",
            Code::DisablePoweroff => "disable_poweroff",
            Code::DebugOut => "debug_out",
            Code::SetPointPwmData => "set_point_pwm_data",
            Code::SetPointPwm => "set_point_pwm",
            Code::SetBuzzer => "set_buzzer",
            Code::ProtocolSubscriptions => "protocol_subscriptions",
            Code::ProtocolCountSum => "protocol_count_sum",
            Code::ProtocolCountAck => "protocol_count_ack",
            Code::ProtocolCountNoAck => "protocol_count_no_ack",
        }
    }
}

impl TryFrom<u8> for Code {
    type Error = RegistryError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Code::ALL
            .iter()
            .copied()
            .find(|c| c.value() == value)
            .ok_or(RegistryError::UnknownCode(value))
    }
}

impl core::fmt::Display for Code {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}(0x{:02X})", self.name(), self.value())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    U8,
    U32,
    /// Fixed-layout record, see the per-shape encoders.
    Struct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl Access {
    pub fn readable(self) -> bool {
        matches!(self, Access::ReadOnly | Access::ReadWrite)
    }

    pub fn writable(self) -> bool {
        matches!(self, Access::WriteOnly | Access::ReadWrite)
    }
}

/// A row of the fixed protocol definition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamDef {
    pub code: Code,
    pub kind: ParamType,
    pub size: usize,
    pub access: Access,
}

const fn def(code: Code, kind: ParamType, size: usize, access: Access) -> ParamDef {
    ParamDef {
        code,
        kind,
        size,
        access,
    }
}

pub const HALL_SAMPLE_LEN: usize = 20;
pub const ELECTRICAL_LEN: usize = 128;
pub const PWM_LEN: usize = 8;
pub const PWM_DATA_LEN: usize = 11;
pub const BUZZER_LEN: usize = 4;
pub const SUBSCRIPTION_LEN: usize = 14;
pub const COUNTERS_LEN: usize = 36;

pub const PROTOCOL_TABLE: [ParamDef; 13] = [
    def(Code::ProtocolVersion, ParamType::U32, 4, Access::ReadOnly),
    def(Code::SensHall, ParamType::Struct, 2 * HALL_SAMPLE_LEN, Access::ReadOnly),
    def(Code::SensElectrical, ParamType::Struct, ELECTRICAL_LEN, Access::ReadOnly),
    def(Code::EnableMotors, ParamType::U8, 1, Access::ReadWrite),
    def(Code::DisablePoweroff, ParamType::U8, 1, Access::ReadWrite),
    def(Code::DebugOut, ParamType::U8, 1, Access::ReadWrite),
    def(Code::SetPointPwmData, ParamType::Struct, PWM_DATA_LEN, Access::ReadWrite),
    def(Code::SetPointPwm, ParamType::Struct, PWM_LEN, Access::ReadWrite),
    def(Code::SetBuzzer, ParamType::Struct, BUZZER_LEN, Access::ReadWrite),
    def(Code::ProtocolSubscriptions, ParamType::Struct, SUBSCRIPTION_LEN, Access::ReadWrite),
    def(Code::ProtocolCountSum, ParamType::Struct, COUNTERS_LEN, Access::ReadWrite),
    def(Code::ProtocolCountAck, ParamType::Struct, COUNTERS_LEN, Access::ReadOnly),
    def(Code::ProtocolCountNoAck, ParamType::Struct, COUNTERS_LEN, Access::ReadOnly),
];

/// Definition of `code` in the protocol table.
pub fn protocol_def(code: Code) -> Option<&'static ParamDef> {
    PROTOCOL_TABLE.iter().find(|d| d.code == code)
}
