//! hb-transport: contract between the hoverboard protocol layer and its transport engine
//!
//! The framing/ACK/retry engine itself lives outside this workspace. This crate fixes the
//! message layout both ends agree on, the polled `Transport` interface the application
//! layer drives, and a `mock` backend so that everything above it can be exercised on any
//! host without a serial line.

mod types;
pub use types::{Command, Counters, DeliveryClass, Message, HEADER_LEN, MAX_PAYLOAD_LEN};

mod error;
pub use error::{Result, TransportError};

mod traits;
pub use traits::{LinkIo, Transport};

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::{MockIo, MockTransport};
