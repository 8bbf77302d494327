//! hb-protocol: application layer of the hoverboard serial protocol
//!
//! Maps parameter codes to application storage and handlers, builds outbound messages,
//! serves periodic subscriptions and keeps link statistics. Framing, checksums and
//! retries belong to the transport underneath (see `hb-transport`).

mod types;
pub use types::*;

mod error;
pub use error::{LinkError, RegistryError, Result};

mod registry;
pub use registry::{
    new_storage, BoxedHandler, ParamDescriptor, ParamEvent, ParamHandler, ParamRegistry, Storage,
};

mod encode;
pub use encode::{
    buzzer_message, counter_reset_message, enable_message, encode_buzzer, encode_counters,
    encode_enable, encode_pwm, encode_pwm_data, encode_subscription, pwm_data_message,
    pwm_message, read_request, subscription_message, write_request, BuzzerData, PwmLimits,
    PwmSetpoint,
};

mod decode;
pub use decode::{
    decode_buzzer, decode_counters, decode_electrical, decode_enable, decode_hall,
    decode_payload, decode_pwm, decode_pwm_data, decode_subscription, encode_hall,
    DecodedValue, ElectricalMeasurements, HallSample, MotorMeasurements,
};

mod subscription;
pub use subscription::{
    ArmOutcome, SubscriptionHandler, SubscriptionRequest, SubscriptionTable, MAX_SUBSCRIPTIONS,
    UNBOUNDED,
};

pub mod telemetry;

mod stats;
pub use stats::LinkStats;

mod metrics;
pub use metrics::{LinkMetrics, MetricsHub};

mod loader;
pub use loader::{load_link_config, parse_link_config, LinkConfig, SubscriptionPlan};

mod link;
pub use link::HoverboardLink;
