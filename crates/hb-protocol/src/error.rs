use hb_transport::TransportError;
use thiserror::Error;

use crate::Code;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no descriptor registered for {0}")]
    Unregistered(Code),
    #[error("bound length {len} exceeds storage of {capacity} bytes")]
    LengthExceedsStorage { len: usize, capacity: usize },
    #[error("{0} does not allow {1}")]
    AccessDenied(Code, &'static str),
    #[error("payload of {0} bytes does not fit in one message")]
    PayloadTooLarge(usize),
    #[error("unknown code 0x{0:02X}")]
    UnknownCode(u8),
    #[error("storage of {0} is borrowed elsewhere")]
    StorageBusy(Code),
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub type Result<T, E = LinkError> = core::result::Result<T, E>;
